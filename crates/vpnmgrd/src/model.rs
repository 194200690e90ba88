//! In-memory VPN-instance model.
//!
//! Implements both collaborator traits so the daemon can run
//! self-contained. Keeps an RD registry, router/network reverse indices,
//! extra routes and inter-VPN links.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};
use vpn_types::{
    ExtraRoute, InterVpnLink, IpAddress, NetworkId, RouteDistinguisher, RouteTarget, RouterId,
    Subnet, SubnetId, VpnId,
};

use crate::diff::TargetSets;
use crate::error::{ManagerResult, VpnManagerError};
use crate::manager::{LinkMap, VpnAssociations, VpnInstanceSpec, VpnLookup, VpnManager};

#[derive(Debug, Clone, Default)]
struct VpnRecord {
    name: String,
    tenant_id: String,
    rds: Vec<RouteDistinguisher>,
    targets: TargetSets,
    is_l2: bool,
    is_internal: bool,
    l3vni: Option<u32>,
    networks: BTreeSet<NetworkId>,
    routers: BTreeSet<RouterId>,
    extra_routes: BTreeSet<ExtraRoute>,
    /// Inter-VPN routes with the link name they ride on.
    inter_vpn_routes: BTreeMap<ExtraRoute, String>,
    withdrawn_subnets: BTreeSet<SubnetId>,
}

#[derive(Debug, Default)]
struct ModelState {
    vpns: BTreeMap<VpnId, VpnRecord>,
    /// RDs still bound in operational state, possibly after config removal.
    operational_rds: HashMap<String, VpnId>,
    router_index: HashMap<RouterId, VpnId>,
    network_index: HashMap<NetworkId, VpnId>,
    links: BTreeMap<String, InterVpnLink>,
}

impl ModelState {
    fn record_mut(&mut self, id: &VpnId) -> ManagerResult<&mut VpnRecord> {
        self.vpns
            .get_mut(id)
            .ok_or_else(|| VpnManagerError::VpnNotFound(id.to_string()))
    }

    fn configured_rd_owner(&self, rd: &str) -> Option<&VpnId> {
        self.vpns
            .iter()
            .find(|(_, record)| record.rds.iter().any(|r| r.as_str() == rd))
            .map(|(id, _)| id)
    }

    fn associate_network(&mut self, id: &VpnId, network: &NetworkId) -> Option<String> {
        match self.network_index.get(network) {
            Some(owner) if owner == id => None,
            Some(owner) => Some(format!(
                "network {} already associated with VPN {}",
                network, owner
            )),
            None => {
                self.network_index.insert(network.clone(), id.clone());
                if let Some(record) = self.vpns.get_mut(id) {
                    record.networks.insert(network.clone());
                }
                None
            }
        }
    }
}

/// Read-only copy of one VPN instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VpnInstanceView {
    pub id: VpnId,
    pub name: String,
    pub tenant_id: String,
    pub rds: Vec<RouteDistinguisher>,
    pub import_targets: Vec<RouteTarget>,
    pub export_targets: Vec<RouteTarget>,
    pub is_l2: bool,
    pub is_internal: bool,
    pub l3vni: Option<u32>,
    pub networks: Vec<NetworkId>,
    pub routers: Vec<RouterId>,
    pub extra_routes: Vec<ExtraRoute>,
    pub inter_vpn_routes: Vec<ExtraRoute>,
    pub withdrawn_subnets: Vec<SubnetId>,
}

/// Serializable dump of the whole model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelSnapshot {
    pub vpns: Vec<VpnInstanceView>,
    pub links: Vec<InterVpnLink>,
}

/// VPN-instance model held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryVpnModel {
    state: RwLock<ModelState>,
}

impl InMemoryVpnModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an inter-VPN link.
    pub fn upsert_link(&self, link: InterVpnLink) {
        info!(
            "Inter-VPN link {} is {:?} ({} <-> {})",
            link.name, link.state, link.first.vpn_id, link.second.vpn_id
        );
        self.state.write().links.insert(link.name.clone(), link);
    }

    pub fn remove_link(&self, name: &str) -> Option<InterVpnLink> {
        self.state.write().links.remove(name)
    }

    /// Binds `rd` to `vpn` in operational state only.
    pub fn register_operational_rd(&self, rd: &str, vpn: &VpnId) {
        self.state
            .write()
            .operational_rds
            .insert(rd.to_string(), vpn.clone());
    }

    pub fn vpn_count(&self) -> usize {
        self.state.read().vpns.len()
    }

    pub fn vpn(&self, id: &VpnId) -> Option<VpnInstanceView> {
        let state = self.state.read();
        state.vpns.get(id).map(|record| view(id, record))
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        let state = self.state.read();
        ModelSnapshot {
            vpns: state
                .vpns
                .iter()
                .map(|(id, record)| view(id, record))
                .collect(),
            links: state.links.values().cloned().collect(),
        }
    }
}

fn view(id: &VpnId, record: &VpnRecord) -> VpnInstanceView {
    VpnInstanceView {
        id: id.clone(),
        name: record.name.clone(),
        tenant_id: record.tenant_id.clone(),
        rds: record.rds.clone(),
        import_targets: record.targets.import.iter().cloned().collect(),
        export_targets: record.targets.export.iter().cloned().collect(),
        is_l2: record.is_l2,
        is_internal: record.is_internal,
        l3vni: record.l3vni,
        networks: record.networks.iter().cloned().collect(),
        routers: record.routers.iter().cloned().collect(),
        extra_routes: record.extra_routes.iter().copied().collect(),
        inter_vpn_routes: record.inter_vpn_routes.keys().copied().collect(),
        withdrawn_subnets: record.withdrawn_subnets.iter().cloned().collect(),
    }
}

#[async_trait]
impl VpnManager for InMemoryVpnModel {
    async fn create_vpn(&self, spec: VpnInstanceSpec) -> ManagerResult<Vec<String>> {
        let mut state = self.state.write();

        if state.vpns.contains_key(&spec.id) {
            return Err(VpnManagerError::VpnAlreadyExists(spec.id.to_string()));
        }
        for rd in &spec.rds {
            let owner = state
                .configured_rd_owner(rd.as_str())
                .or_else(|| state.operational_rds.get(rd.as_str()));
            if let Some(owner) = owner {
                return Err(VpnManagerError::RdInUse {
                    rd: rd.to_string(),
                    owner: owner.to_string(),
                });
            }
        }
        for router in &spec.routers {
            if let Some(owner) = state.router_index.get(router) {
                return Err(VpnManagerError::RouterAlreadyAssociated {
                    router: router.to_string(),
                    vpn: owner.to_string(),
                });
            }
        }

        for rd in &spec.rds {
            state
                .operational_rds
                .insert(rd.to_string(), spec.id.clone());
        }
        for router in &spec.routers {
            state.router_index.insert(router.clone(), spec.id.clone());
        }
        state.vpns.insert(
            spec.id.clone(),
            VpnRecord {
                name: spec.name,
                tenant_id: spec.tenant_id,
                rds: spec.rds,
                targets: spec.targets,
                is_l2: spec.is_l2,
                is_internal: spec.is_internal,
                l3vni: spec.l3vni,
                routers: spec.routers.iter().cloned().collect(),
                ..Default::default()
            },
        );

        let messages: Vec<String> = spec
            .networks
            .iter()
            .filter_map(|network| state.associate_network(&spec.id, network))
            .collect();

        info!(vpn = %spec.id, internal = spec.is_internal, "VPN instance created");
        Ok(messages)
    }

    async fn remove_vpn(&self, id: &VpnId) -> ManagerResult<()> {
        let mut state = self.state.write();
        let record = state
            .vpns
            .remove(id)
            .ok_or_else(|| VpnManagerError::VpnNotFound(id.to_string()))?;

        state.operational_rds.retain(|_, owner| owner != id);
        state.router_index.retain(|_, owner| owner != id);
        state.network_index.retain(|_, owner| owner != id);

        info!(
            vpn = %id,
            networks = record.networks.len(),
            routers = record.routers.len(),
            "VPN instance removed"
        );
        Ok(())
    }

    async fn update_vpn_rds(&self, id: &VpnId, rds: &[RouteDistinguisher]) -> ManagerResult<()> {
        let mut state = self.state.write();
        for rd in rds {
            let owner = state
                .configured_rd_owner(rd.as_str())
                .or_else(|| state.operational_rds.get(rd.as_str()));
            if let Some(owner) = owner.filter(|owner| *owner != id) {
                return Err(VpnManagerError::RdInUse {
                    rd: rd.to_string(),
                    owner: owner.to_string(),
                });
            }
        }
        state.record_mut(id)?.rds = rds.to_vec();
        for rd in rds {
            state.operational_rds.insert(rd.to_string(), id.clone());
        }
        debug!(vpn = %id, count = rds.len(), "VPN RDs updated");
        Ok(())
    }

    async fn update_vpn_targets(&self, id: &VpnId, targets: &TargetSets) -> ManagerResult<()> {
        self.state.write().record_mut(id)?.targets = targets.clone();
        debug!(vpn = %id, "VPN route targets updated");
        Ok(())
    }

    async fn associate_networks(
        &self,
        id: &VpnId,
        networks: &[NetworkId],
    ) -> ManagerResult<Vec<String>> {
        let mut state = self.state.write();
        state.record_mut(id)?;
        Ok(networks
            .iter()
            .filter_map(|network| state.associate_network(id, network))
            .collect())
    }

    async fn dissociate_networks(
        &self,
        id: &VpnId,
        networks: &[NetworkId],
    ) -> ManagerResult<Vec<String>> {
        let mut state = self.state.write();
        state.record_mut(id)?;

        let mut messages = Vec::new();
        for network in networks {
            if state.network_index.get(network) == Some(id) {
                state.network_index.remove(network);
                state.record_mut(id)?.networks.remove(network);
            } else {
                messages.push(format!(
                    "network {} is not associated with VPN {}",
                    network, id
                ));
            }
        }
        Ok(messages)
    }

    async fn associate_router(&self, id: &VpnId, router: &RouterId) -> ManagerResult<()> {
        let mut state = self.state.write();
        state.record_mut(id)?;
        match state.router_index.get(router) {
            Some(owner) if owner == id => Ok(()),
            Some(owner) => Err(VpnManagerError::RouterAlreadyAssociated {
                router: router.to_string(),
                vpn: owner.to_string(),
            }),
            None => {
                state.router_index.insert(router.clone(), id.clone());
                state.record_mut(id)?.routers.insert(router.clone());
                Ok(())
            }
        }
    }

    async fn dissociate_router(&self, id: &VpnId, router: &RouterId) -> ManagerResult<()> {
        let mut state = self.state.write();
        if state.router_index.get(router) == Some(id) {
            state.router_index.remove(router);
        }
        state.record_mut(id)?.routers.remove(router);
        Ok(())
    }

    async fn add_extra_route_adjacency(
        &self,
        id: &VpnId,
        routes: &[ExtraRoute],
    ) -> ManagerResult<()> {
        let mut state = self.state.write();
        state.record_mut(id)?.extra_routes.extend(routes.iter().copied());
        Ok(())
    }

    async fn remove_extra_route_adjacency(
        &self,
        id: &VpnId,
        routes: &[ExtraRoute],
    ) -> ManagerResult<()> {
        let mut state = self.state.write();
        let record = state.record_mut(id)?;
        for route in routes {
            record.extra_routes.remove(route);
        }
        Ok(())
    }

    async fn add_inter_vpn_routes(
        &self,
        id: &VpnId,
        routes: &[ExtraRoute],
        links: &LinkMap,
    ) -> ManagerResult<()> {
        let mut state = self.state.write();
        let record = state.record_mut(id)?;
        for route in routes {
            let link = links
                .get(&route.nexthop)
                .map(|link| link.name.clone())
                .ok_or_else(|| {
                    VpnManagerError::Backend(format!("no inter-VPN link for {}", route.nexthop))
                })?;
            record.inter_vpn_routes.insert(*route, link);
        }
        Ok(())
    }

    async fn remove_inter_vpn_routes(
        &self,
        id: &VpnId,
        routes: &[ExtraRoute],
        _links: &LinkMap,
    ) -> ManagerResult<()> {
        let mut state = self.state.write();
        let record = state.record_mut(id)?;
        for route in routes {
            record.inter_vpn_routes.remove(route);
        }
        Ok(())
    }

    async fn remove_subnet_from_vpn(
        &self,
        id: &VpnId,
        subnet: &Subnet,
        targets: &TargetSets,
    ) -> ManagerResult<()> {
        let mut state = self.state.write();
        let record = state.record_mut(id)?;
        if record.targets != *targets {
            warn!(
                vpn = %id,
                subnet = %subnet.id,
                "route targets supplied for subnet withdrawal differ from the VPN's"
            );
        }
        record.withdrawn_subnets.insert(subnet.id.clone());
        Ok(())
    }
}

impl VpnLookup for InMemoryVpnModel {
    fn vpn_exists(&self, id: &VpnId) -> bool {
        self.state.read().vpns.contains_key(id)
    }

    fn vpn_for_router(&self, router: &RouterId) -> Option<VpnId> {
        let state = self.state.read();
        state
            .router_index
            .get(router)
            .filter(|vpn| state.vpns.get(*vpn).is_some_and(|r| !r.is_internal))
            .cloned()
    }

    fn vpn_for_rd(&self, rd: &str) -> Option<VpnId> {
        let state = self.state.read();
        state
            .configured_rd_owner(rd)
            .or_else(|| state.operational_rds.get(rd))
            .cloned()
    }

    fn vpn_for_network(&self, network: &NetworkId) -> Option<VpnId> {
        self.state.read().network_index.get(network).cloned()
    }

    fn inter_vpn_link_by_endpoint(&self, ip: &IpAddress) -> Option<InterVpnLink> {
        self.state
            .read()
            .links
            .values()
            .find(|link| link.endpoint_for(ip).is_some())
            .cloned()
    }

    fn route_targets_for_vpn(&self, id: &VpnId) -> Option<TargetSets> {
        self.state.read().vpns.get(id).map(|r| r.targets.clone())
    }

    fn vpn_associations(&self, id: &VpnId) -> VpnAssociations {
        let state = self.state.read();
        state
            .vpns
            .get(id)
            .map(|record| VpnAssociations {
                networks: record.networks.iter().cloned().collect(),
                routers: record.routers.iter().cloned().collect(),
            })
            .unwrap_or_default()
    }
}
