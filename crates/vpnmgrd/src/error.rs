//! Error types for vpnmgrd

use std::path::PathBuf;
use thiserror::Error;
use vpn_orch_common::{TaskError, WorkerClosed};
use vpn_types::ParseError;

/// Rejections raised while validating or diffing VPN policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    /// A route distinguisher or route target token contains whitespace
    #[error("{field} token '{token}' contains whitespace")]
    WhitespaceInToken { field: &'static str, token: String },

    /// A token is otherwise malformed (e.g. empty)
    #[error("invalid {field} token: {source}")]
    InvalidToken {
        field: &'static str,
        #[source]
        source: ParseError,
    },

    /// An update drops route distinguishers the VPN already carries
    #[error("unsupported operation: removing route distinguishers {removed:?}")]
    UnsupportedRdRemoval { removed: Vec<String> },

    /// An update changes which route distinguisher is primary
    #[error("unsupported operation: primary route distinguisher {old} cannot change to {new}")]
    PrimaryRdChanged { old: String, new: String },

    /// An L3 BGP-VPN arrived without any route distinguisher
    #[error("BGP-VPN {vpn} has no route distinguisher")]
    MissingRds { vpn: String },
}

impl From<DiffError> for TaskError {
    fn from(e: DiffError) -> Self {
        TaskError::invalid_entry(e.to_string())
    }
}

/// Failures reported by the VPN-instance collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VpnManagerError {
    #[error("VPN instance not found: {0}")]
    VpnNotFound(String),

    #[error("VPN instance already exists: {0}")]
    VpnAlreadyExists(String),

    #[error("route distinguisher {rd} already in use by VPN {owner}")]
    RdInUse { rd: String, owner: String },

    #[error("router {router} already associated with VPN {vpn}")]
    RouterAlreadyAssociated { router: String, vpn: String },

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<VpnManagerError> for TaskError {
    fn from(e: VpnManagerError) -> Self {
        match e {
            VpnManagerError::VpnAlreadyExists(_)
            | VpnManagerError::RdInUse { .. }
            | VpnManagerError::RouterAlreadyAssociated { .. } => TaskError::conflict(e.to_string()),
            VpnManagerError::VpnNotFound(_) | VpnManagerError::Backend(_) => {
                TaskError::downstream(e.to_string())
            }
        }
    }
}

/// Result type for VPN-instance collaborator calls.
pub type ManagerResult<T> = std::result::Result<T, VpnManagerError>;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Event replay errors
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("worker for {kind} events is closed")]
    WorkerClosed { kind: &'static str },
}

impl ReplayError {
    pub(crate) fn closed(kind: &'static str) -> impl FnOnce(WorkerClosed) -> Self {
        move |_| ReplayError::WorkerClosed { kind }
    }
}
