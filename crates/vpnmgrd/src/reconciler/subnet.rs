//! Subnet reconciler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use vpn_orch_common::{Listener, TaskError, TaskResult};
use vpn_types::Subnet;

use super::ReconcilerContext;

/// Tracks subnets for gateway resolution and withdraws subnets deleted
/// while their network is still VPN-associated.
pub struct SubnetListener {
    ctx: Arc<ReconcilerContext>,
}

impl SubnetListener {
    pub(crate) fn new(ctx: Arc<ReconcilerContext>) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, subnet), fields(subnet_id = %subnet.id, network_id = %subnet.network_id))]
    async fn on_remove(&self, subnet: &Subnet) -> TaskResult<()> {
        self.ctx.topology.remove_subnet(&subnet.id);

        let Some(vpn) = self.ctx.lookup.vpn_for_network(&subnet.network_id) else {
            return Err(TaskError::ignored(format!(
                "network {} is not VPN-associated",
                subnet.network_id
            )));
        };

        let _guard = self.ctx.lock_vpn(&vpn).await?;
        if self.ctx.lookup.vpn_for_network(&subnet.network_id).as_ref() != Some(&vpn) {
            return Err(TaskError::ignored(format!(
                "network {} left VPN {} before subnet removal",
                subnet.network_id, vpn
            )));
        }

        let targets = self
            .ctx
            .lookup
            .route_targets_for_vpn(&vpn)
            .unwrap_or_else(|| {
                warn!(vpn = %vpn, "No route targets found, withdrawing subnet without them");
                Default::default()
            });
        self.ctx
            .manager
            .remove_subnet_from_vpn(&vpn, subnet, &targets)
            .await?;

        info!(
            "Withdrew subnet {} ({}) from VPN {}",
            subnet.id, subnet.cidr, vpn
        );
        Ok(())
    }
}

#[async_trait]
impl Listener for SubnetListener {
    type Object = Subnet;

    fn name(&self) -> &str {
        "subnet"
    }

    async fn add(&self, _id: &str, object: &Subnet) -> TaskResult<()> {
        self.ctx.topology.upsert_subnet(object.clone());
        debug!(subnet = %object.id, cidr = %object.cidr, "subnet tracked");
        self.ctx.finish(Ok(()))
    }

    async fn update(&self, _id: &str, before: &Subnet, after: &Subnet) -> TaskResult<()> {
        if before == after {
            return self.ctx.finish(Err(TaskError::ignored("subnet unchanged")));
        }
        self.ctx.topology.upsert_subnet(after.clone());
        self.ctx.finish(Ok(()))
    }

    async fn remove(&self, _id: &str, object: &Subnet) -> TaskResult<()> {
        self.ctx.finish(self.on_remove(object).await)
    }
}
