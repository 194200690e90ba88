//! VpnMgrDaemon implementation.
//!
//! The daemon wires the reconciler to its collaborators and owns the
//! running tasks:
//! - One sequential worker per watched object type
//! - The gateway MAC refresher, when enabled
//! - The in-memory VPN model serving as manager and lookup

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vpn_orch_common::{EventWorker, WorkerHandle, WorkerStats};
use vpn_types::{BgpVpn, NetworkAssociation, Router, RouterAssociation, Subnet};

use crate::barrier::FixedDelayBarrier;
use crate::config::VpnMgrConfig;
use crate::error::{ConfigResult, ReplayError};
use crate::gateway_mac::{
    GatewayMacRefresher, LogOnlyResolver, NeighborResolver, RefresherHandle, RefresherStats,
};
use crate::model::InMemoryVpnModel;
use crate::reconciler::AssociationReconciler;
use crate::replay::EventRecord;
use crate::stats::ReconcilerStatsSnapshot;
use crate::topology::TopologyCache;

/// Final counters collected at shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DaemonReport {
    /// Outcome counters per worker, keyed by listener name
    pub workers: BTreeMap<String, WorkerStats>,
    /// Gateway MAC refresher totals, if it was running
    pub gateway_mac: Option<RefresherStats>,
    pub reconciler: ReconcilerStatsSnapshot,
}

/// The BGP-VPN reconciliation daemon.
pub struct VpnMgrDaemon {
    /// VPN model shared by every listener
    model: Arc<InMemoryVpnModel>,
    /// Listener factory and shared reconciler state
    reconciler: AssociationReconciler,
    bgpvpn: WorkerHandle<BgpVpn>,
    network_assoc: WorkerHandle<NetworkAssociation>,
    router_assoc: WorkerHandle<RouterAssociation>,
    router: WorkerHandle<Router>,
    subnet: WorkerHandle<Subnet>,
    /// Running refresher, if enabled in the configuration
    refresher: Option<RefresherHandle>,
}

impl VpnMgrDaemon {
    /// Starts the daemon with an empty model and a log-only neighbor resolver.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &VpnMgrConfig) -> ConfigResult<Self> {
        Self::start_with(
            config,
            Arc::new(InMemoryVpnModel::new()),
            Arc::new(LogOnlyResolver),
        )
    }

    /// Starts the daemon against the given model and resolver.
    pub fn start_with(
        config: &VpnMgrConfig,
        model: Arc<InMemoryVpnModel>,
        resolver: Arc<dyn NeighborResolver>,
    ) -> ConfigResult<Self> {
        config.validate()?;

        let topology = Arc::new(TopologyCache::new());
        let refresher = config.gateway_mac.enabled.then(|| {
            GatewayMacRefresher::new(
                Arc::clone(&topology),
                resolver,
                config.refresh_interval(),
                config.post_update_delay(),
            )
            .spawn(CancellationToken::new())
        });

        let mut reconciler = AssociationReconciler::new(
            model.clone(),
            model.clone(),
            topology,
            config.lock_timeout(),
        )
        .with_barrier(Arc::new(FixedDelayBarrier::new(config.delete_add_delay())));
        if let Some(handle) = &refresher {
            reconciler = reconciler.with_gateway_trigger(handle.trigger());
        }

        let depth = config.workers.queue_depth;
        let daemon = Self {
            bgpvpn: EventWorker::spawn(Arc::new(reconciler.bgpvpn_listener()), depth),
            network_assoc: EventWorker::spawn(
                Arc::new(reconciler.network_association_listener()),
                depth,
            ),
            router_assoc: EventWorker::spawn(
                Arc::new(reconciler.router_association_listener()),
                depth,
            ),
            router: EventWorker::spawn(Arc::new(reconciler.router_listener()), depth),
            subnet: EventWorker::spawn(Arc::new(reconciler.subnet_listener()), depth),
            model,
            reconciler,
            refresher,
        };

        info!(
            "vpnmgrd started (lock timeout {:?}, delete/add delay {:?}, gateway MAC refresh {})",
            config.lock_timeout(),
            config.delete_add_delay(),
            if config.gateway_mac.enabled { "enabled" } else { "disabled" }
        );
        Ok(daemon)
    }

    pub fn model(&self) -> &Arc<InMemoryVpnModel> {
        &self.model
    }

    pub fn reconciler(&self) -> &AssociationReconciler {
        &self.reconciler
    }

    /// Queues a record on the worker for its object type.
    ///
    /// Inter-VPN links are applied to the model directly.
    pub async fn submit(&self, record: EventRecord) -> Result<(), ReplayError> {
        let kind = record.kind();
        match record {
            EventRecord::Bgpvpn(event) => self.bgpvpn.submit(event).await,
            EventRecord::NetworkAssociation(event) => self.network_assoc.submit(event).await,
            EventRecord::RouterAssociation(event) => self.router_assoc.submit(event).await,
            EventRecord::Router(event) => self.router.submit(event).await,
            EventRecord::Subnet(event) => self.subnet.submit(event).await,
            EventRecord::InterVpnLink(link) => {
                self.model.upsert_link(link);
                Ok(())
            }
        }
        .map_err(ReplayError::closed(kind))
    }

    /// Drains every worker, then stops the refresher.
    pub async fn shutdown(self) -> DaemonReport {
        info!("vpnmgrd shutting down");
        let mut report = DaemonReport::default();

        let drained = [
            ("bgpvpn", self.bgpvpn.shutdown().await),
            ("network_association", self.network_assoc.shutdown().await),
            ("router_association", self.router_assoc.shutdown().await),
            ("router", self.router.shutdown().await),
            ("subnet", self.subnet.shutdown().await),
        ];
        for (name, stats) in drained {
            report.workers.insert(name.to_string(), stats);
        }

        if let Some(refresher) = self.refresher {
            report.gateway_mac = Some(refresher.shutdown().await);
        }
        report.reconciler = self.reconciler.stats();
        report
    }
}
