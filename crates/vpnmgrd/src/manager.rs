//! Collaborator interfaces: VPN-instance mutation and model lookups.
//!
//! The reconcilers never touch VPN-instance state directly. Mutations go
//! through [`VpnManager`], reads through [`VpnLookup`]. Lookups may be
//! served without the per-VPN lock and can be stale.

use std::collections::BTreeMap;

use async_trait::async_trait;
use vpn_types::{
    ExtraRoute, InterVpnLink, IpAddress, NetworkId, RouteDistinguisher, RouterId, Subnet, VpnId,
};

use crate::diff::TargetSets;
use crate::error::ManagerResult;

/// Everything needed to materialize a VPN instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VpnInstanceSpec {
    pub id: VpnId,
    pub name: String,
    pub tenant_id: String,
    /// Route distinguishers; the first is primary.
    pub rds: Vec<RouteDistinguisher>,
    pub targets: TargetSets,
    /// Routers to associate at creation.
    pub routers: Vec<RouterId>,
    /// Networks to associate at creation.
    pub networks: Vec<NetworkId>,
    pub is_l2: bool,
    pub l3vni: Option<u32>,
    /// Created implicitly for a router without an explicit BGP-VPN.
    pub is_internal: bool,
}

impl VpnInstanceSpec {
    /// Spec for the implicit VPN instance of a router.
    pub fn internal(router: &RouterId, name: &str, tenant_id: &str) -> Self {
        Self {
            id: VpnId::from(router),
            name: name.to_string(),
            tenant_id: tenant_id.to_string(),
            is_internal: true,
            ..Default::default()
        }
    }
}

/// Link used by each inter-VPN-link nexthop in a route batch.
pub type LinkMap = BTreeMap<IpAddress, InterVpnLink>;

/// Live associations of one VPN instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VpnAssociations {
    pub networks: Vec<NetworkId>,
    pub routers: Vec<RouterId>,
}

/// VPN-instance mutation API.
///
/// Calls are expected to be idempotent when retried with the same input.
#[async_trait]
pub trait VpnManager: Send + Sync {
    /// Creates a VPN instance and associates the listed routers and
    /// networks. Returns one message per network that could not be
    /// associated.
    async fn create_vpn(&self, spec: VpnInstanceSpec) -> ManagerResult<Vec<String>>;

    async fn remove_vpn(&self, id: &VpnId) -> ManagerResult<()>;

    /// Replaces the RD list of an existing instance.
    async fn update_vpn_rds(&self, id: &VpnId, rds: &[RouteDistinguisher]) -> ManagerResult<()>;

    /// Replaces the import/export route targets of an existing instance.
    async fn update_vpn_targets(&self, id: &VpnId, targets: &TargetSets) -> ManagerResult<()>;

    /// Returns one message per network that could not be associated.
    async fn associate_networks(
        &self,
        id: &VpnId,
        networks: &[NetworkId],
    ) -> ManagerResult<Vec<String>>;

    /// Returns one message per network that could not be dissociated.
    async fn dissociate_networks(
        &self,
        id: &VpnId,
        networks: &[NetworkId],
    ) -> ManagerResult<Vec<String>>;

    async fn associate_router(&self, id: &VpnId, router: &RouterId) -> ManagerResult<()>;

    async fn dissociate_router(&self, id: &VpnId, router: &RouterId) -> ManagerResult<()>;

    async fn add_extra_route_adjacency(
        &self,
        id: &VpnId,
        routes: &[ExtraRoute],
    ) -> ManagerResult<()>;

    async fn remove_extra_route_adjacency(
        &self,
        id: &VpnId,
        routes: &[ExtraRoute],
    ) -> ManagerResult<()>;

    async fn add_inter_vpn_routes(
        &self,
        id: &VpnId,
        routes: &[ExtraRoute],
        links: &LinkMap,
    ) -> ManagerResult<()>;

    async fn remove_inter_vpn_routes(
        &self,
        id: &VpnId,
        routes: &[ExtraRoute],
        links: &LinkMap,
    ) -> ManagerResult<()>;

    /// Withdraws a deleted subnet that was still VPN-associated.
    async fn remove_subnet_from_vpn(
        &self,
        id: &VpnId,
        subnet: &Subnet,
        targets: &TargetSets,
    ) -> ManagerResult<()>;
}

/// Read-only view of VPN-instance state.
pub trait VpnLookup: Send + Sync {
    fn vpn_exists(&self, id: &VpnId) -> bool;

    /// Explicit (non-internal) VPN the router is associated with.
    fn vpn_for_router(&self, router: &RouterId) -> Option<VpnId>;

    /// VPN holding `rd`, in configuration or operational state.
    fn vpn_for_rd(&self, rd: &str) -> Option<VpnId>;

    fn vpn_for_network(&self, network: &NetworkId) -> Option<VpnId>;

    fn inter_vpn_link_by_endpoint(&self, ip: &IpAddress) -> Option<InterVpnLink>;

    fn route_targets_for_vpn(&self, id: &VpnId) -> Option<TargetSets>;

    fn vpn_associations(&self, id: &VpnId) -> VpnAssociations;
}
