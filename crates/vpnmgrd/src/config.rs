//! Configuration file support for vpnmgrd
//!
//! Loads and validates vpnmgrd configuration from TOML files.
//! Default location: /etc/sonic/vpnmgrd.toml

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/vpnmgrd.toml";

/// Per-VPN lock configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockingConfig {
    /// Bounded wait for the per-VPN lock in milliseconds
    #[serde(default = "default_lock_timeout")]
    pub timeout_ms: u64,
}

/// Extra-route reconciliation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutesConfig {
    /// Pause between withdrawing stale routes and installing new ones
    #[serde(default = "default_delete_add_delay")]
    pub delete_add_delay_ms: u64,
}

/// External gateway MAC refresh configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayMacConfig {
    /// Run the periodic refresher
    #[serde(default = "default_gateway_mac_enabled")]
    pub enabled: bool,

    /// Periodic refresh interval in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Delay before an on-demand refresh after a router add/update
    #[serde(default = "default_post_update_delay")]
    pub post_update_delay_ms: u64,
}

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Capacity of each per-type event queue
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

/// Complete vpnmgrd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnMgrConfig {
    #[serde(default)]
    pub locking: LockingConfig,

    #[serde(default)]
    pub routes: RoutesConfig,

    #[serde(default)]
    pub gateway_mac: GatewayMacConfig,

    #[serde(default)]
    pub workers: WorkersConfig,
}

// Default functions
fn default_lock_timeout() -> u64 {
    5000
}

fn default_delete_add_delay() -> u64 {
    1000
}

fn default_gateway_mac_enabled() -> bool {
    true
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_post_update_delay() -> u64 {
    1000
}

fn default_queue_depth() -> usize {
    1024
}

// Default implementations
impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout(),
        }
    }
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            delete_add_delay_ms: default_delete_add_delay(),
        }
    }
}

impl Default for GatewayMacConfig {
    fn default() -> Self {
        Self {
            enabled: default_gateway_mac_enabled(),
            refresh_interval_secs: default_refresh_interval(),
            post_update_delay_ms: default_post_update_delay(),
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
        }
    }
}

impl VpnMgrConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "vpnmgrd: Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get per-VPN lock timeout as Duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.locking.timeout_ms)
    }

    /// Get the delete/add barrier delay as Duration
    pub fn delete_add_delay(&self) -> Duration {
        Duration::from_millis(self.routes.delete_add_delay_ms)
    }

    /// Get the gateway MAC refresh interval as Duration
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.gateway_mac.refresh_interval_secs)
    }

    /// Get the on-demand refresh delay as Duration
    pub fn post_update_delay(&self) -> Duration {
        Duration::from_millis(self.gateway_mac.post_update_delay_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.locking.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "locking.timeout_ms must be > 0".to_string(),
            ));
        }

        if self.gateway_mac.enabled && self.gateway_mac.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "gateway_mac.refresh_interval_secs must be > 0".to_string(),
            ));
        }

        if self.workers.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "workers.queue_depth must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
