//! Router reconciler: internal VPN lifecycle and extra-route programming.
//!
//! Each router gets an internal VPN instance named after it. Extra routes
//! are programmed into the explicit VPN the router is associated with, or
//! into its internal VPN otherwise. Route updates run as two phases, all
//! deletes then all adds, separated by an
//! [`InterPhaseBarrier`](crate::barrier::InterPhaseBarrier).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use vpn_orch_common::{Listener, TaskError, TaskResult};
use vpn_types::{ExtraRoute, Router, VpnId};

use super::ReconcilerContext;
use crate::diff::AttributeDiffEngine;
use crate::gateway_mac::GatewayMacTrigger;
use crate::manager::VpnInstanceSpec;

/// Attempts at locking the VPN serving a router while its association
/// keeps changing.
const MAX_TARGET_ATTEMPTS: usize = 3;

pub struct RouterListener {
    ctx: Arc<ReconcilerContext>,
    gateway: Option<GatewayMacTrigger>,
}

impl RouterListener {
    pub(crate) fn new(ctx: Arc<ReconcilerContext>, gateway: Option<GatewayMacTrigger>) -> Self {
        Self { ctx, gateway }
    }

    #[instrument(skip(self, router), fields(router_id = %router.id))]
    async fn on_add(&self, router: &Router) -> TaskResult<()> {
        self.ensure_internal_vpn(router).await?;
        self.sync_routes(router, &[]).await?;
        self.schedule_gateway_refresh(router);
        Ok(())
    }

    #[instrument(skip(self, before, after), fields(router_id = %after.id))]
    async fn on_update(&self, before: &Router, after: &Router) -> TaskResult<()> {
        if before == after {
            return Err(TaskError::ignored("router unchanged"));
        }
        self.ensure_internal_vpn(after).await?;
        self.sync_routes(after, &before.routes).await?;
        self.schedule_gateway_refresh(after);
        Ok(())
    }

    #[instrument(skip(self, router), fields(router_id = %router.id))]
    async fn on_remove(&self, router: &Router) -> TaskResult<()> {
        let mut withdrawn = router.clone();
        withdrawn.routes.clear();
        match self.sync_routes(&withdrawn, &router.routes).await {
            Ok(()) => {}
            Err(e) if e.to_status().is_success() => debug!("{}", e),
            Err(e) => return Err(e),
        }

        if let Some(vpn) = self.ctx.lookup.vpn_for_router(&router.id) {
            let _guard = self.ctx.lock_vpn(&vpn).await?;
            if self.ctx.lookup.vpn_for_router(&router.id).as_ref() == Some(&vpn) {
                self.ctx.manager.dissociate_router(&vpn, &router.id).await?;
                info!("Dissociated removed router {} from VPN {}", router.id, vpn);
            }
        }

        let internal = VpnId::from(&router.id);
        {
            let _guard = self.ctx.lock_vpn(&internal).await?;
            self.ctx.pending.drain_pending_for(&internal);
            if self.ctx.lookup.vpn_exists(&internal) {
                self.ctx.manager.remove_vpn(&internal).await?;
                self.ctx.stats.vpn_removed();
                info!("Removed internal VPN instance of router {}", router.id);
            }
        }

        self.ctx.topology.remove_router(&router.id);
        Ok(())
    }

    /// Creates the router's internal VPN instance if it is missing.
    async fn ensure_internal_vpn(&self, router: &Router) -> TaskResult<()> {
        let internal = VpnId::from(&router.id);
        let _guard = self.ctx.lock_vpn(&internal).await?;
        if self.ctx.lookup.vpn_exists(&internal) {
            return Ok(());
        }
        self.ctx
            .materialize(VpnInstanceSpec::internal(
                &router.id,
                &router.name,
                &router.tenant_id,
            ))
            .await?;
        info!("Created internal VPN instance for router {}", router.id);
        Ok(())
    }

    /// Brings the routes installed for `router` in line with `router.routes`
    /// and records it in the topology.
    ///
    /// The installed list comes from the topology, falling back to
    /// `previous` for a router not seen yet. The serving VPN is re-checked
    /// once locked and stays locked across the delete and add phases.
    async fn sync_routes(&self, router: &Router, previous: &[ExtraRoute]) -> TaskResult<()> {
        for _ in 0..MAX_TARGET_ATTEMPTS {
            let target = self.ctx.serving_vpn(&router.id);
            let _guard = self.ctx.lock_vpn(&target).await?;
            if self.ctx.serving_vpn(&router.id) != target {
                debug!("VPN serving router {} changed from {}, retrying", router.id, target);
                continue;
            }

            let installed = self
                .ctx
                .topology
                .router(&router.id)
                .map(|known| known.routes)
                .unwrap_or_else(|| previous.to_vec());
            let diff = AttributeDiffEngine::diff_routes(&installed, &router.routes);
            if diff.is_empty() {
                self.ctx.topology.upsert_router(router.clone());
                return Ok(());
            }

            if !self.ctx.lookup.vpn_exists(&target) {
                let mut known = router.clone();
                known.routes = installed;
                self.ctx.topology.upsert_router(known);
                return Err(TaskError::waiting_for(format!("VPN instance {}", target)));
            }

            let removed = self
                .ctx
                .withdraw_routes(&target, &router.id, &diff.removed)
                .await?;
            if removed > 0 && !diff.added.is_empty() {
                self.ctx.barrier.wait(&target).await;
            }
            self.ctx
                .install_routes(&target, &router.id, &diff.added)
                .await?;
            self.ctx.topology.upsert_router(router.clone());
            return Ok(());
        }
        Err(TaskError::lock_timeout(router.id.to_string()))
    }

    fn schedule_gateway_refresh(&self, router: &Router) {
        if router.external_gateway.is_none() {
            return;
        }
        if let Some(trigger) = &self.gateway {
            trigger.schedule(&router.id);
        }
    }
}

#[async_trait]
impl Listener for RouterListener {
    type Object = Router;

    fn name(&self) -> &str {
        "router"
    }

    async fn add(&self, _id: &str, object: &Router) -> TaskResult<()> {
        self.ctx.finish(self.on_add(object).await)
    }

    async fn update(&self, _id: &str, before: &Router, after: &Router) -> TaskResult<()> {
        self.ctx.finish(self.on_update(before, after).await)
    }

    async fn remove(&self, _id: &str, object: &Router) -> TaskResult<()> {
        self.ctx.finish(self.on_remove(object).await)
    }
}
