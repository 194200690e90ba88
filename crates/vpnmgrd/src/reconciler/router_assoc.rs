//! Router association reconciler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument};
use vpn_orch_common::{Listener, TaskError, TaskResult};
use vpn_types::{RouterAssociation, VpnId};

use super::ReconcilerContext;

/// Associates routers with VPN instances. A router belongs to at most one
/// explicit VPN at a time; its extra routes move with the association.
pub struct RouterAssociationListener {
    ctx: Arc<ReconcilerContext>,
}

impl RouterAssociationListener {
    pub(crate) fn new(ctx: Arc<ReconcilerContext>) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, assoc), fields(vpn_id = %assoc.vpn_id, router_id = %assoc.router_id))]
    async fn on_add(&self, assoc: &RouterAssociation) -> TaskResult<()> {
        let vpn = &assoc.vpn_id;
        let router = &assoc.router_id;
        let _guard = self.ctx.lock_vpn(vpn).await?;

        if !self.ctx.lookup.vpn_exists(vpn) {
            if self.ctx.pending.add_pending_router(vpn, router) {
                info!("VPN {} not yet created, router {} deferred", vpn, router);
            }
            return Err(TaskError::waiting_for(format!("VPN instance {}", vpn)));
        }

        match self.ctx.lookup.vpn_for_router(router) {
            Some(owner) if owner == *vpn => {
                return Err(TaskError::ignored(format!(
                    "router {} already associated with VPN {}",
                    router, vpn
                )));
            }
            Some(owner) => {
                error!(
                    router = %router,
                    vpn = %vpn,
                    owner = %owner,
                    "Router already associated with another VPN"
                );
                return Err(TaskError::conflict(format!(
                    "router {} already associated with VPN {}",
                    router, owner
                )));
            }
            None => {}
        }

        self.ctx.manager.associate_router(vpn, router).await?;
        self.ctx.stats.associations_applied(1);
        info!("Associated router {} with VPN {}", router, vpn);
        self.ctx
            .move_router_routes(router, &VpnId::from(router), vpn)
            .await
    }

    #[instrument(skip(self, assoc), fields(vpn_id = %assoc.vpn_id, router_id = %assoc.router_id))]
    async fn on_remove(&self, assoc: &RouterAssociation) -> TaskResult<()> {
        let vpn = &assoc.vpn_id;
        let router = &assoc.router_id;
        let _guard = self.ctx.lock_vpn(vpn).await?;

        let was_pending = self.ctx.pending.remove_pending_router(vpn, router);
        if was_pending {
            info!("Dropped pending router {} for VPN {}", router, vpn);
        }

        if self.ctx.lookup.vpn_for_router(router).as_ref() != Some(vpn) {
            if was_pending {
                return Ok(());
            }
            return Err(TaskError::ignored(format!(
                "router {} is not associated with VPN {}",
                router, vpn
            )));
        }

        self.ctx.manager.dissociate_router(vpn, router).await?;
        info!("Dissociated router {} from VPN {}", router, vpn);
        self.ctx
            .move_router_routes(router, vpn, &VpnId::from(router))
            .await
    }
}

#[async_trait]
impl Listener for RouterAssociationListener {
    type Object = RouterAssociation;

    fn name(&self) -> &str {
        "router_association"
    }

    async fn add(&self, _id: &str, object: &RouterAssociation) -> TaskResult<()> {
        self.ctx.finish(self.on_add(object).await)
    }

    async fn update(
        &self,
        _id: &str,
        before: &RouterAssociation,
        after: &RouterAssociation,
    ) -> TaskResult<()> {
        if before.vpn_id == after.vpn_id && before.router_id == after.router_id {
            return self
                .ctx
                .finish(Err(TaskError::ignored("router association unchanged")));
        }
        let removed = self.on_remove(before).await;
        if let Err(e) = &removed {
            if !e.to_status().is_success() {
                return self.ctx.finish(removed);
            }
        }
        self.ctx.finish(self.on_add(after).await)
    }

    async fn remove(&self, _id: &str, object: &RouterAssociation) -> TaskResult<()> {
        self.ctx.finish(self.on_remove(object).await)
    }
}
