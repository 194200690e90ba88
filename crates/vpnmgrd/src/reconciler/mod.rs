//! Association reconciler.
//!
//! One listener per watched object type, all sharing a
//! [`ReconcilerContext`]: the collaborator handles, the per-VPN lock table
//! and the pending-association store. Every mutation of per-VPN state
//! happens while holding that VPN's lock.
//!
//! ```text
//!  BgpVpnListener ─────────┐
//!  NetworkAssociationListener ─┤
//!  RouterAssociationListener ──┼──> NamedKeyLock(vpn) ──> VpnManager
//!  RouterListener ──────────┤            │
//!  SubnetListener ──────────┘   PendingAssociationStore
//! ```

mod bgpvpn;
mod network_assoc;
mod router;
mod router_assoc;
mod subnet;

pub use bgpvpn::BgpVpnListener;
pub use network_assoc::NetworkAssociationListener;
pub use router::RouterListener;
pub use router_assoc::RouterAssociationListener;
pub use subnet::SubnetListener;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use vpn_orch_common::{
    NamedKeyLock, NamedLockGuard, PendingAssociationStore, TaskError, TaskResult, TaskResultExt,
};
use vpn_types::{ExtraRoute, IpAddress, NetworkId, RouterId, VpnId};

use crate::barrier::{FixedDelayBarrier, InterPhaseBarrier};
use crate::classify::{ClassifiedRoutes, RouteClassifier};
use crate::gateway_mac::GatewayMacTrigger;
use crate::manager::{VpnInstanceSpec, VpnLookup, VpnManager};
use crate::stats::{ReconcilerStats, ReconcilerStatsSnapshot};
use crate::topology::TopologyCache;

/// Default pause between the delete and add phases of a route update.
pub const DEFAULT_DELETE_ADD_DELAY: Duration = Duration::from_millis(1000);

/// State shared by every listener.
pub struct ReconcilerContext {
    pub(crate) manager: Arc<dyn VpnManager>,
    pub(crate) lookup: Arc<dyn VpnLookup>,
    pub(crate) locks: NamedKeyLock,
    pub(crate) pending: Arc<PendingAssociationStore>,
    pub(crate) stats: Arc<ReconcilerStats>,
    pub(crate) topology: Arc<TopologyCache>,
    pub(crate) barrier: Arc<dyn InterPhaseBarrier>,
}

impl ReconcilerContext {
    /// Acquires the lock for `vpn`, mapping a timeout to a dropped event.
    pub(crate) async fn lock_vpn(&self, vpn: &VpnId) -> TaskResult<NamedLockGuard> {
        self.locks.acquire(vpn.as_str()).await.map_err(|e| {
            warn!(vpn = %vpn, waited = ?e.waited, "Failed to acquire VPN lock, event dropped");
            TaskError::lock_timeout(e.key)
        })
    }

    /// The VPN instance whose routing table holds `router`'s extra routes:
    /// its explicit VPN if associated, its internal VPN otherwise.
    pub(crate) fn serving_vpn(&self, router: &RouterId) -> VpnId {
        self.lookup
            .vpn_for_router(router)
            .unwrap_or_else(|| VpnId::from(router))
    }

    /// Withdraws `routes` from `vpn`. Caller must hold the lock for `vpn`.
    pub(crate) async fn withdraw_routes(
        &self,
        vpn: &VpnId,
        router: &RouterId,
        routes: &[ExtraRoute],
    ) -> TaskResult<usize> {
        let classified = self.classify_routes(vpn, routes);
        if !classified.inter_vpn_link.is_empty() {
            self.manager
                .remove_inter_vpn_routes(vpn, &classified.inter_vpn_link, &classified.nexthop_to_link)
                .await?;
        }
        if !classified.ordinary.is_empty() {
            self.manager
                .remove_extra_route_adjacency(vpn, &classified.ordinary)
                .await?;
        }
        let count = classified.inter_vpn_link.len() + classified.ordinary.len();
        if count > 0 {
            self.stats.routes_removed(count);
            info!("Removed {} extra route(s) of router {} from VPN {}", count, router, vpn);
        }
        Ok(count)
    }

    /// Installs `routes` into `vpn`. Caller must hold the lock for `vpn`.
    pub(crate) async fn install_routes(
        &self,
        vpn: &VpnId,
        router: &RouterId,
        routes: &[ExtraRoute],
    ) -> TaskResult<usize> {
        let classified = self.classify_routes(vpn, routes);
        if !classified.inter_vpn_link.is_empty() {
            self.manager
                .add_inter_vpn_routes(vpn, &classified.inter_vpn_link, &classified.nexthop_to_link)
                .await?;
        }
        if !classified.ordinary.is_empty() {
            self.manager
                .add_extra_route_adjacency(vpn, &classified.ordinary)
                .await?;
        }
        let count = classified.inter_vpn_link.len() + classified.ordinary.len();
        if count > 0 {
            self.stats.routes_added(count);
            info!("Added {} extra route(s) of router {} to VPN {}", count, router, vpn);
        }
        Ok(count)
    }

    fn classify_routes(&self, vpn: &VpnId, routes: &[ExtraRoute]) -> ClassifiedRoutes {
        let lookup = Arc::clone(&self.lookup);
        let resolver = |ip: &IpAddress| lookup.inter_vpn_link_by_endpoint(ip);
        let classified = RouteClassifier::classify(routes, &resolver);
        for failure in &classified.failures {
            error!(vpn = %vpn, link = %failure.link, "{}", failure);
        }
        self.stats.route_failures(classified.failures.len());
        classified
    }

    /// Moves the extra routes installed for `router` from `from` to `to`.
    ///
    /// Called right after the router's explicit association changed, with
    /// the explicit VPN's lock held. The router's internal VPN is locked
    /// here, so the route list read from the topology is the one installed
    /// in `from`. Deletes finish before the barrier and the adds.
    pub(crate) async fn move_router_routes(
        &self,
        router: &RouterId,
        from: &VpnId,
        to: &VpnId,
    ) -> TaskResult<()> {
        let _guard = self.lock_vpn(&VpnId::from(router)).await?;
        let routes = match self.topology.router(router) {
            Some(known) if !known.routes.is_empty() => known.routes,
            _ => return Ok(()),
        };

        let mut withdrawn = 0;
        if self.lookup.vpn_exists(from) {
            withdrawn = self.withdraw_routes(from, router, &routes).await?;
        }
        if !self.lookup.vpn_exists(to) {
            warn!(router = %router, vpn = %to, "VPN instance missing, extra routes not moved");
            return Ok(());
        }
        if withdrawn > 0 {
            self.barrier.wait(to).await;
        }
        self.install_routes(to, router, &routes).await?;
        info!("Moved extra routes of router {} from VPN {} to VPN {}", router, from, to);
        Ok(())
    }

    /// Counts the outcome of one event and passes it through.
    pub(crate) fn finish(&self, result: TaskResult<()>) -> TaskResult<()> {
        self.stats.record_outcome(result.to_status());
        result
    }

    /// Creates a VPN instance and applies associations recorded for it.
    ///
    /// Caller must hold the lock for `spec.id`. Deferred routers already
    /// associated with another VPN are dropped with a conflict log; the
    /// others bring their extra routes along. If creation fails, drained
    /// entries go back to the pending store.
    pub(crate) async fn materialize(&self, mut spec: VpnInstanceSpec) -> TaskResult<()> {
        let pending = self.pending.drain_pending_for(&spec.id);
        if !pending.is_empty() {
            info!(
                "Applying {} pending network(s) and {} pending router(s) to VPN {}",
                pending.networks.len(),
                pending.routers.len(),
                spec.id
            );
        }

        let mut routers: Vec<RouterId> = Vec::new();
        for router in spec.routers.iter().chain(pending.routers.iter()) {
            if routers.contains(router) {
                continue;
            }
            match self.lookup.vpn_for_router(router) {
                Some(owner) if owner != spec.id => {
                    error!(
                        router = %router,
                        vpn = %spec.id,
                        owner = %owner,
                        "Router already associated with another VPN, association rejected"
                    );
                    self.stats.association_rejected();
                }
                _ => routers.push(router.clone()),
            }
        }

        let mut networks: Vec<NetworkId> = Vec::new();
        for network in spec.networks.iter().chain(pending.networks.iter()) {
            if !networks.contains(network) {
                networks.push(network.clone());
            }
        }

        spec.routers = routers.clone();
        spec.networks = networks;
        let id = spec.id.clone();
        let applied = spec.routers.len() + spec.networks.len();

        match self.manager.create_vpn(spec).await {
            Ok(messages) => {
                for message in &messages {
                    warn!(vpn = %id, "{}", message);
                }
                self.stats.vpn_created();
                self.stats
                    .associations_applied(applied.saturating_sub(messages.len()));
                for router in &routers {
                    self.move_router_routes(router, &VpnId::from(router), &id)
                        .await?;
                }
                Ok(())
            }
            Err(e) => {
                for network in &pending.networks {
                    self.pending.add_pending_network(&id, network);
                }
                for router in &pending.routers {
                    self.pending.add_pending_router(&id, router);
                }
                Err(e.into())
            }
        }
    }
}

/// Builds the listeners for every watched object type.
pub struct AssociationReconciler {
    ctx: Arc<ReconcilerContext>,
    gateway: Option<GatewayMacTrigger>,
}

impl AssociationReconciler {
    pub fn new(
        manager: Arc<dyn VpnManager>,
        lookup: Arc<dyn VpnLookup>,
        topology: Arc<TopologyCache>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            ctx: Arc::new(ReconcilerContext {
                manager,
                lookup,
                locks: NamedKeyLock::new(lock_timeout),
                pending: Arc::new(PendingAssociationStore::new()),
                stats: Arc::new(ReconcilerStats::new()),
                topology,
                barrier: Arc::new(FixedDelayBarrier::new(DEFAULT_DELETE_ADD_DELAY)),
            }),
            gateway: None,
        }
    }

    /// Replaces the barrier between route deletes and adds.
    ///
    /// Only takes effect before any listener has been built.
    pub fn with_barrier(mut self, barrier: Arc<dyn InterPhaseBarrier>) -> Self {
        match Arc::get_mut(&mut self.ctx) {
            Some(ctx) => ctx.barrier = barrier,
            None => warn!("Listeners already built, delete/add barrier not replaced"),
        }
        self
    }

    /// Enables on-demand gateway MAC refresh after router changes.
    pub fn with_gateway_trigger(mut self, trigger: GatewayMacTrigger) -> Self {
        self.gateway = Some(trigger);
        self
    }

    pub fn bgpvpn_listener(&self) -> BgpVpnListener {
        BgpVpnListener::new(Arc::clone(&self.ctx))
    }

    pub fn network_association_listener(&self) -> NetworkAssociationListener {
        NetworkAssociationListener::new(Arc::clone(&self.ctx))
    }

    pub fn router_association_listener(&self) -> RouterAssociationListener {
        RouterAssociationListener::new(Arc::clone(&self.ctx))
    }

    pub fn router_listener(&self) -> RouterListener {
        RouterListener::new(Arc::clone(&self.ctx), self.gateway.clone())
    }

    pub fn subnet_listener(&self) -> SubnetListener {
        SubnetListener::new(Arc::clone(&self.ctx))
    }

    pub fn pending(&self) -> &PendingAssociationStore {
        &self.ctx.pending
    }

    pub fn locks(&self) -> &NamedKeyLock {
        &self.ctx.locks
    }

    pub fn topology(&self) -> Arc<TopologyCache> {
        Arc::clone(&self.ctx.topology)
    }

    pub fn stats(&self) -> ReconcilerStatsSnapshot {
        self.ctx.stats.snapshot()
    }
}
