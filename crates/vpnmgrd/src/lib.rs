//! BGP-VPN association reconciliation daemon
//!
//! Keeps VPN instances consistent with the BGP-VPN, association, router
//! and subnet objects of the logical network model. Each object type is
//! consumed by its own sequential worker; workers touching the same VPN
//! serialize on a per-VPN lock, and associations that arrive before their
//! VPN are parked in a pending store until it is created.

pub mod barrier;
pub mod classify;
pub mod config;
pub mod daemon;
pub mod diff;
pub mod error;
pub mod gateway_mac;
pub mod manager;
pub mod model;
pub mod reconciler;
pub mod replay;
pub mod stats;
pub mod topology;

pub use barrier::{FixedDelayBarrier, InterPhaseBarrier};
pub use classify::{ClassifiedRoutes, LinkResolver, RouteClassifier, RouteFailure};
pub use config::{VpnMgrConfig, DEFAULT_CONFIG_PATH};
pub use daemon::{DaemonReport, VpnMgrDaemon};
pub use diff::{AttributeDiffEngine, PolicyTokens, RouteDiff, TargetDiff, TargetSets, VpnPolicy};
pub use error::{
    ConfigError, ConfigResult, DiffError, ManagerResult, ReplayError, VpnManagerError,
};
pub use gateway_mac::{
    GatewayMacRefresher, GatewayMacTrigger, LogOnlyResolver, NeighborResolver, RefresherStats,
};
pub use manager::{LinkMap, VpnAssociations, VpnInstanceSpec, VpnLookup, VpnManager};
pub use model::{InMemoryVpnModel, ModelSnapshot, VpnInstanceView};
pub use reconciler::{
    AssociationReconciler, BgpVpnListener, NetworkAssociationListener, RouterAssociationListener,
    RouterListener, SubnetListener,
};
pub use replay::{EventRecord, ReplaySummary};
pub use stats::{ReconcilerStats, ReconcilerStatsSnapshot};
pub use topology::TopologyCache;
