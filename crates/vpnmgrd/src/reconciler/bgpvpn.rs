//! BGP-VPN object reconciler.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};
use vpn_orch_common::{Listener, TaskError, TaskResult};
use vpn_types::{BgpVpn, BgpVpnType, NetworkId, VpnId};

use super::ReconcilerContext;
use crate::diff::{AttributeDiffEngine, PolicyTokens};
use crate::manager::VpnInstanceSpec;

/// Creates, updates and destroys VPN instances for BGP-VPN objects.
pub struct BgpVpnListener {
    ctx: Arc<ReconcilerContext>,
}

impl BgpVpnListener {
    pub(crate) fn new(ctx: Arc<ReconcilerContext>) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, vpn), fields(vpn_id = %vpn.id))]
    async fn on_add(&self, vpn: &BgpVpn) -> TaskResult<()> {
        if vpn.vpn_type != BgpVpnType::L3 {
            return Err(TaskError::invalid_entry(format!(
                "BGP-VPN {} of type {} is not supported",
                vpn.id, vpn.vpn_type
            )));
        }
        let policy = AttributeDiffEngine::validate_policy(vpn)?;

        let _guard = self.ctx.lock_vpn(&vpn.id).await?;

        if self.ctx.lookup.vpn_exists(&vpn.id) {
            return Err(TaskError::ignored(format!(
                "VPN instance {} already exists",
                vpn.id
            )));
        }

        if let Some(primary) = policy.primary_rd() {
            if let Some(owner) = self
                .ctx
                .lookup
                .vpn_for_rd(primary.as_str())
                .filter(|owner| *owner != vpn.id)
            {
                error!(
                    vpn = %vpn.id,
                    owner = %owner,
                    rd = %primary,
                    "Primary RD already in use, VPN instance not created"
                );
                return Err(TaskError::conflict(format!(
                    "route distinguisher {} already in use by VPN {}",
                    primary, owner
                )));
            }
        }

        let spec = VpnInstanceSpec {
            id: vpn.id.clone(),
            name: vpn.name.clone(),
            tenant_id: vpn.tenant_id.clone(),
            rds: policy.rds,
            targets: policy.targets,
            routers: vpn.routers.clone(),
            networks: vpn.networks.clone(),
            is_l2: false,
            l3vni: vpn.vni,
            is_internal: false,
        };
        self.ctx.materialize(spec).await?;

        info!("Created VPN instance {}", vpn.id);
        Ok(())
    }

    #[instrument(skip(self, before, after), fields(vpn_id = %after.id))]
    async fn on_update(&self, before: &BgpVpn, after: &BgpVpn) -> TaskResult<()> {
        if before == after {
            return Err(TaskError::ignored("BGP-VPN unchanged"));
        }
        if before.vpn_type != after.vpn_type || after.vpn_type != BgpVpnType::L3 {
            return Err(TaskError::invalid_entry(format!(
                "changing BGP-VPN {} type from {} to {} is not supported",
                after.id, before.vpn_type, after.vpn_type
            )));
        }
        let diff =
            AttributeDiffEngine::diff_targets(&PolicyTokens::from(before), &PolicyTokens::from(after))?;

        let guard = self.ctx.lock_vpn(&after.id).await?;

        if !self.ctx.lookup.vpn_exists(&after.id) {
            // Creation was rejected earlier; the corrected object may succeed.
            drop(guard);
            info!("VPN instance {} missing on update, creating it", after.id);
            return self.on_add(after).await;
        }

        for rd in &diff.added_rds {
            if let Some(owner) = self
                .ctx
                .lookup
                .vpn_for_rd(rd.as_str())
                .filter(|owner| *owner != after.id)
            {
                return Err(TaskError::conflict(format!(
                    "route distinguisher {} already in use by VPN {}",
                    rd, owner
                )));
            }
        }

        let added_routers = added(&before.routers, &after.routers);
        for router in &added_routers {
            if let Some(owner) = self
                .ctx
                .lookup
                .vpn_for_router(router)
                .filter(|owner| *owner != after.id)
            {
                error!(
                    router = %router,
                    vpn = %after.id,
                    owner = %owner,
                    "Router already associated with another VPN"
                );
                return Err(TaskError::conflict(format!(
                    "router {} already associated with VPN {}",
                    router, owner
                )));
            }
        }

        if diff.rds_changed() {
            self.ctx
                .manager
                .update_vpn_rds(&after.id, &diff.rds)
                .await?;
            info!("Added RDs {:?} to VPN {}", diff.added_rds, after.id);
        }

        if diff.targets_changed() {
            self.ctx
                .manager
                .update_vpn_targets(&after.id, &diff.targets)
                .await?;
            info!(
                "Updated route targets of VPN {} (import +{} -{}, export +{} -{})",
                after.id,
                diff.imports_added.len(),
                diff.imports_removed.len(),
                diff.exports_added.len(),
                diff.exports_removed.len()
            );
        }

        let added_networks: Vec<NetworkId> = added(&before.networks, &after.networks);
        if !added_networks.is_empty() {
            let messages = self
                .ctx
                .manager
                .associate_networks(&after.id, &added_networks)
                .await?;
            log_messages(&after.id, &messages);
            self.ctx
                .stats
                .associations_applied(added_networks.len().saturating_sub(messages.len()));
        }

        let removed_networks: Vec<NetworkId> = added(&after.networks, &before.networks);
        if !removed_networks.is_empty() {
            let messages = self
                .ctx
                .manager
                .dissociate_networks(&after.id, &removed_networks)
                .await?;
            log_messages(&after.id, &messages);
        }

        for router in &added_routers {
            self.ctx.manager.associate_router(&after.id, router).await?;
            self.ctx.stats.associations_applied(1);
            self.ctx
                .move_router_routes(router, &VpnId::from(router), &after.id)
                .await?;
        }
        for router in added(&after.routers, &before.routers) {
            if self.ctx.lookup.vpn_for_router(&router).as_ref() != Some(&after.id) {
                continue;
            }
            self.ctx.manager.dissociate_router(&after.id, &router).await?;
            self.ctx
                .move_router_routes(&router, &after.id, &VpnId::from(&router))
                .await?;
        }

        if before.vni != after.vni {
            warn!(
                "L3VNI change on VPN {} is not supported, keeping {:?}",
                after.id, before.vni
            );
        }

        Ok(())
    }

    #[instrument(skip(self, vpn), fields(vpn_id = %vpn.id))]
    async fn on_remove(&self, vpn: &BgpVpn) -> TaskResult<()> {
        let _guard = self.ctx.lock_vpn(&vpn.id).await?;

        let dropped = self.ctx.pending.drain_pending_for(&vpn.id);
        if !dropped.is_empty() {
            info!(
                "Discarded {} pending association(s) for VPN {}",
                dropped.networks.len() + dropped.routers.len(),
                vpn.id
            );
        }

        if !self.ctx.lookup.vpn_exists(&vpn.id) {
            return Err(TaskError::ignored(format!(
                "VPN instance {} does not exist",
                vpn.id
            )));
        }

        let live = self.ctx.lookup.vpn_associations(&vpn.id);
        if !live.networks.is_empty() {
            let messages = self
                .ctx
                .manager
                .dissociate_networks(&vpn.id, &live.networks)
                .await?;
            log_messages(&vpn.id, &messages);
        }
        for router in &live.routers {
            self.ctx.manager.dissociate_router(&vpn.id, router).await?;
            self.ctx
                .move_router_routes(router, &vpn.id, &VpnId::from(router))
                .await?;
        }

        self.ctx.manager.remove_vpn(&vpn.id).await?;
        self.ctx.stats.vpn_removed();
        info!("Removed VPN instance {}", vpn.id);
        Ok(())
    }
}

/// Items of `new` missing from `old`, in `new` order.
fn added<T: Ord + Clone>(old: &[T], new: &[T]) -> Vec<T> {
    let old: BTreeSet<&T> = old.iter().collect();
    let mut seen = BTreeSet::new();
    new.iter()
        .filter(|item| !old.contains(item) && seen.insert(*item))
        .cloned()
        .collect()
}

fn log_messages(vpn: &VpnId, messages: &[String]) {
    for message in messages {
        warn!(vpn = %vpn, "{}", message);
    }
}

#[async_trait]
impl Listener for BgpVpnListener {
    type Object = BgpVpn;

    fn name(&self) -> &str {
        "bgpvpn"
    }

    async fn add(&self, _id: &str, object: &BgpVpn) -> TaskResult<()> {
        self.ctx.finish(self.on_add(object).await)
    }

    async fn update(&self, _id: &str, before: &BgpVpn, after: &BgpVpn) -> TaskResult<()> {
        self.ctx.finish(self.on_update(before, after).await)
    }

    async fn remove(&self, _id: &str, object: &BgpVpn) -> TaskResult<()> {
        self.ctx.finish(self.on_remove(object).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vpn_types::RouterId;

    #[test]
    fn test_added_keeps_order_and_dedups() {
        let old = vec![RouterId::new("r1")];
        let new = vec![
            RouterId::new("r3"),
            RouterId::new("r1"),
            RouterId::new("r2"),
            RouterId::new("r3"),
        ];
        assert_eq!(added(&old, &new), vec![RouterId::new("r3"), RouterId::new("r2")]);
    }
}
