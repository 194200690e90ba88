//! Cache of logical router and subnet state.
//!
//! Filled by the router and subnet reconcilers; read by the gateway MAC
//! refresher.

use dashmap::DashMap;
use vpn_types::{Router, RouterId, Subnet, SubnetId};

#[derive(Debug, Default)]
pub struct TopologyCache {
    routers: DashMap<RouterId, Router>,
    subnets: DashMap<SubnetId, Subnet>,
}

impl TopologyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_router(&self, router: Router) {
        self.routers.insert(router.id.clone(), router);
    }

    pub fn remove_router(&self, id: &RouterId) -> Option<Router> {
        self.routers.remove(id).map(|(_, router)| router)
    }

    pub fn router(&self, id: &RouterId) -> Option<Router> {
        self.routers.get(id).map(|r| r.clone())
    }

    /// Routers with an external gateway, sorted by id.
    pub fn routers_with_gateway(&self) -> Vec<Router> {
        let mut routers: Vec<Router> = self
            .routers
            .iter()
            .filter(|r| r.external_gateway.is_some())
            .map(|r| r.value().clone())
            .collect();
        routers.sort_by(|a, b| a.id.cmp(&b.id));
        routers
    }

    pub fn upsert_subnet(&self, subnet: Subnet) {
        self.subnets.insert(subnet.id.clone(), subnet);
    }

    pub fn remove_subnet(&self, id: &SubnetId) -> Option<Subnet> {
        self.subnets.remove(id).map(|(_, subnet)| subnet)
    }

    pub fn subnet(&self, id: &SubnetId) -> Option<Subnet> {
        self.subnets.get(id).map(|s| s.clone())
    }

    pub fn router_count(&self) -> usize {
        self.routers.len()
    }

    pub fn subnet_count(&self) -> usize {
        self.subnets.len()
    }
}
