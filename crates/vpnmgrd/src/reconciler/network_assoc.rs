//! Network association reconciler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument};
use vpn_orch_common::{Listener, TaskError, TaskResult};
use vpn_types::NetworkAssociation;

use super::ReconcilerContext;

/// Associates networks with VPN instances, deferring those whose VPN does
/// not exist yet.
pub struct NetworkAssociationListener {
    ctx: Arc<ReconcilerContext>,
}

impl NetworkAssociationListener {
    pub(crate) fn new(ctx: Arc<ReconcilerContext>) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, assoc), fields(vpn_id = %assoc.vpn_id, network_id = %assoc.network_id))]
    async fn on_add(&self, assoc: &NetworkAssociation) -> TaskResult<()> {
        let vpn = &assoc.vpn_id;
        let network = &assoc.network_id;
        let _guard = self.ctx.lock_vpn(vpn).await?;

        if !self.ctx.lookup.vpn_exists(vpn) {
            if self.ctx.pending.add_pending_network(vpn, network) {
                info!("VPN {} not yet created, network {} deferred", vpn, network);
            }
            return Err(TaskError::waiting_for(format!("VPN instance {}", vpn)));
        }

        match self.ctx.lookup.vpn_for_network(network) {
            Some(owner) if owner == *vpn => {
                return Err(TaskError::ignored(format!(
                    "network {} already associated with VPN {}",
                    network, vpn
                )));
            }
            Some(owner) => {
                error!(
                    network = %network,
                    vpn = %vpn,
                    owner = %owner,
                    "Network already associated with another VPN"
                );
                return Err(TaskError::conflict(format!(
                    "network {} already associated with VPN {}",
                    network, owner
                )));
            }
            None => {}
        }

        let messages = self
            .ctx
            .manager
            .associate_networks(vpn, std::slice::from_ref(network))
            .await?;
        if !messages.is_empty() {
            return Err(TaskError::conflict(messages.join("; ")));
        }

        self.ctx.stats.associations_applied(1);
        info!("Associated network {} with VPN {}", network, vpn);
        Ok(())
    }

    #[instrument(skip(self, assoc), fields(vpn_id = %assoc.vpn_id, network_id = %assoc.network_id))]
    async fn on_remove(&self, assoc: &NetworkAssociation) -> TaskResult<()> {
        let vpn = &assoc.vpn_id;
        let network = &assoc.network_id;
        let _guard = self.ctx.lock_vpn(vpn).await?;

        let was_pending = self.ctx.pending.remove_pending_network(vpn, network);
        if was_pending {
            info!("Dropped pending network {} for VPN {}", network, vpn);
        }

        if !self.ctx.lookup.vpn_exists(vpn)
            || self.ctx.lookup.vpn_for_network(network).as_ref() != Some(vpn)
        {
            if was_pending {
                return Ok(());
            }
            return Err(TaskError::ignored(format!(
                "network {} is not associated with VPN {}",
                network, vpn
            )));
        }

        let messages = self
            .ctx
            .manager
            .dissociate_networks(vpn, std::slice::from_ref(network))
            .await?;
        if !messages.is_empty() {
            return Err(TaskError::downstream(messages.join("; ")));
        }

        info!("Dissociated network {} from VPN {}", network, vpn);
        Ok(())
    }
}

#[async_trait]
impl Listener for NetworkAssociationListener {
    type Object = NetworkAssociation;

    fn name(&self) -> &str {
        "network_association"
    }

    async fn add(&self, _id: &str, object: &NetworkAssociation) -> TaskResult<()> {
        self.ctx.finish(self.on_add(object).await)
    }

    async fn update(
        &self,
        _id: &str,
        before: &NetworkAssociation,
        after: &NetworkAssociation,
    ) -> TaskResult<()> {
        if before.vpn_id == after.vpn_id && before.network_id == after.network_id {
            return self
                .ctx
                .finish(Err(TaskError::ignored("network association unchanged")));
        }
        let removed = self.on_remove(before).await;
        if let Err(e) = &removed {
            if !e.to_status().is_success() {
                return self.ctx.finish(removed);
            }
        }
        self.ctx.finish(self.on_add(after).await)
    }

    async fn remove(&self, _id: &str, object: &NetworkAssociation) -> TaskResult<()> {
        self.ctx.finish(self.on_remove(object).await)
    }
}
