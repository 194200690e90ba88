//! Integration tests for the association reconciler
//!
//! These tests drive the listeners directly against a recording VPN
//! manager that forwards every call to the in-memory model, so both the
//! issued calls and the resulting state can be checked.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use vpn_orch_common::{Listener, TaskStatus};
use vpn_types::{
    BgpVpn, BgpVpnType, ExternalGateway, ExtraRoute, InterVpnLink, LinkEndpoint, LinkState,
    MacAddress, NetworkAssociation, NetworkId, Router, RouterAssociation, RouterId, Subnet,
    SubnetId, VpnId,
};
use vpnmgrd::{
    AssociationReconciler, FixedDelayBarrier, GatewayMacRefresher, InMemoryVpnModel,
    InterPhaseBarrier, LinkMap, LogOnlyResolver, ManagerResult, TargetSets, TopologyCache,
    VpnInstanceSpec, VpnLookup, VpnManager,
};

/// Mock VPN manager for testing
///
/// Records every call in order and forwards it to an in-memory model.
pub struct MockVpnManager {
    /// Backing model
    model: Arc<InMemoryVpnModel>,
    /// Call log shared with the recording barrier
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockVpnManager {
    pub fn new(model: Arc<InMemoryVpnModel>, calls: Arc<Mutex<Vec<String>>>) -> Self {
        Self { model, calls }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl VpnManager for MockVpnManager {
    async fn create_vpn(&self, spec: VpnInstanceSpec) -> ManagerResult<Vec<String>> {
        self.record(format!(
            "create_vpn {} rds=[{}] routers=[{}] networks=[{}]",
            spec.id,
            join(&spec.rds),
            join(&spec.routers),
            join(&spec.networks)
        ));
        self.model.create_vpn(spec).await
    }

    async fn remove_vpn(&self, id: &VpnId) -> ManagerResult<()> {
        self.record(format!("remove_vpn {}", id));
        self.model.remove_vpn(id).await
    }

    async fn update_vpn_rds(
        &self,
        id: &VpnId,
        rds: &[vpn_types::RouteDistinguisher],
    ) -> ManagerResult<()> {
        self.record(format!("update_vpn_rds {} [{}]", id, join(rds)));
        self.model.update_vpn_rds(id, rds).await
    }

    async fn update_vpn_targets(&self, id: &VpnId, targets: &TargetSets) -> ManagerResult<()> {
        let import: Vec<_> = targets.import.iter().cloned().collect();
        let export: Vec<_> = targets.export.iter().cloned().collect();
        self.record(format!(
            "update_vpn_targets {} import=[{}] export=[{}]",
            id,
            join(&import),
            join(&export)
        ));
        self.model.update_vpn_targets(id, targets).await
    }

    async fn associate_networks(
        &self,
        id: &VpnId,
        networks: &[NetworkId],
    ) -> ManagerResult<Vec<String>> {
        self.record(format!("associate_networks {} [{}]", id, join(networks)));
        self.model.associate_networks(id, networks).await
    }

    async fn dissociate_networks(
        &self,
        id: &VpnId,
        networks: &[NetworkId],
    ) -> ManagerResult<Vec<String>> {
        self.record(format!("dissociate_networks {} [{}]", id, join(networks)));
        self.model.dissociate_networks(id, networks).await
    }

    async fn associate_router(&self, id: &VpnId, router: &RouterId) -> ManagerResult<()> {
        self.record(format!("associate_router {} {}", id, router));
        self.model.associate_router(id, router).await
    }

    async fn dissociate_router(&self, id: &VpnId, router: &RouterId) -> ManagerResult<()> {
        self.record(format!("dissociate_router {} {}", id, router));
        self.model.dissociate_router(id, router).await
    }

    async fn add_extra_route_adjacency(
        &self,
        id: &VpnId,
        routes: &[ExtraRoute],
    ) -> ManagerResult<()> {
        self.record(format!("add_adjacency {} [{}]", id, join(routes)));
        self.model.add_extra_route_adjacency(id, routes).await
    }

    async fn remove_extra_route_adjacency(
        &self,
        id: &VpnId,
        routes: &[ExtraRoute],
    ) -> ManagerResult<()> {
        self.record(format!("remove_adjacency {} [{}]", id, join(routes)));
        self.model.remove_extra_route_adjacency(id, routes).await
    }

    async fn add_inter_vpn_routes(
        &self,
        id: &VpnId,
        routes: &[ExtraRoute],
        links: &LinkMap,
    ) -> ManagerResult<()> {
        self.record(format!("add_inter_vpn_routes {} [{}]", id, join(routes)));
        self.model.add_inter_vpn_routes(id, routes, links).await
    }

    async fn remove_inter_vpn_routes(
        &self,
        id: &VpnId,
        routes: &[ExtraRoute],
        links: &LinkMap,
    ) -> ManagerResult<()> {
        self.record(format!("remove_inter_vpn_routes {} [{}]", id, join(routes)));
        self.model.remove_inter_vpn_routes(id, routes, links).await
    }

    async fn remove_subnet_from_vpn(
        &self,
        id: &VpnId,
        subnet: &Subnet,
        targets: &TargetSets,
    ) -> ManagerResult<()> {
        self.record(format!("remove_subnet_from_vpn {} {}", id, subnet.id));
        self.model.remove_subnet_from_vpn(id, subnet, targets).await
    }
}

/// Barrier that logs into the manager's call log instead of sleeping.
struct RecordingBarrier {
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl InterPhaseBarrier for RecordingBarrier {
    async fn wait(&self, vpn: &VpnId) {
        self.calls.lock().unwrap().push(format!("barrier {}", vpn));
    }
}

struct Harness {
    model: Arc<InMemoryVpnModel>,
    calls: Arc<Mutex<Vec<String>>>,
    reconciler: AssociationReconciler,
}

impl Harness {
    fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5))
    }

    fn with_lock_timeout(timeout: Duration) -> Self {
        let model = Arc::new(InMemoryVpnModel::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let manager = Arc::new(MockVpnManager::new(Arc::clone(&model), Arc::clone(&calls)));
        let reconciler = AssociationReconciler::new(
            manager,
            model.clone(),
            Arc::new(TopologyCache::new()),
            timeout,
        )
        .with_barrier(Arc::new(RecordingBarrier {
            calls: Arc::clone(&calls),
        }));
        Self {
            model,
            calls,
            reconciler,
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    async fn create_vpn(&self, id: &str, rd: &str) {
        let vpn = BgpVpn::new(id).with_rds(&[rd]).with_route_targets(&[rd]);
        self.reconciler
            .bgpvpn_listener()
            .add(id, &vpn)
            .await
            .unwrap();
    }
}

fn route(destination: &str, nexthop: &str) -> ExtraRoute {
    ExtraRoute::new(destination.parse().unwrap(), nexthop.parse().unwrap())
}

fn link(name: &str, ip: &str, state: LinkState) -> InterVpnLink {
    InterVpnLink {
        name: name.to_string(),
        first: LinkEndpoint {
            vpn_id: VpnId::new("v-left"),
            ip: ip.parse().unwrap(),
        },
        second: LinkEndpoint {
            vpn_id: VpnId::new("v-right"),
            ip: "169.254.255.254".parse().unwrap(),
        },
        state,
    }
}

fn status(result: vpn_orch_common::TaskResult<()>) -> TaskStatus {
    match result {
        Ok(()) => TaskStatus::Success,
        Err(e) => e.to_status(),
    }
}

#[tokio::test]
async fn test_pending_network_applied_on_vpn_creation() {
    let h = Harness::new();
    let v1 = VpnId::new("v1");
    let n1 = NetworkId::new("n1");

    let assoc = NetworkAssociation::new("v1", "n1");
    let result = h
        .reconciler
        .network_association_listener()
        .add(&assoc.id, &assoc)
        .await;
    assert_eq!(status(result), TaskStatus::WaitingForDependency);
    assert!(h.reconciler.pending().is_network_pending(&v1, &n1));

    let vpn = BgpVpn::new("v1")
        .with_rds(&["100:1"])
        .with_import_targets(&["100:1"])
        .with_export_targets(&["100:1"]);
    h.reconciler.bgpvpn_listener().add("v1", &vpn).await.unwrap();

    assert_eq!(
        h.calls(),
        vec!["create_vpn v1 rds=[100:1] routers=[] networks=[n1]".to_string()]
    );
    assert_eq!(h.model.vpn_for_network(&n1), Some(v1.clone()));
    assert!(!h.reconciler.pending().is_network_pending(&v1, &n1));
    assert!(h.reconciler.pending().is_empty());
}

#[tokio::test]
async fn test_primary_rd_must_be_unique() {
    let h = Harness::new();
    h.create_vpn("v1", "100:1").await;

    let duplicate = BgpVpn::new("v2").with_rds(&["100:1"]);
    let result = h.reconciler.bgpvpn_listener().add("v2", &duplicate).await;
    assert_eq!(status(result), TaskStatus::Conflict);
    assert!(!h.model.vpn_exists(&VpnId::new("v2")));

    h.model
        .register_operational_rd("200:1", &VpnId::new("legacy"));
    let operational = BgpVpn::new("v3").with_rds(&["200:1"]);
    let result = h.reconciler.bgpvpn_listener().add("v3", &operational).await;
    assert_eq!(status(result), TaskStatus::Conflict);
    assert!(!h.model.vpn_exists(&VpnId::new("v3")));

    assert_eq!(h.model.vpn_count(), 1);
    assert_eq!(h.reconciler.stats().rejected, 2);
}

#[tokio::test]
async fn test_invalid_policy_rejected_before_mutation() {
    let h = Harness::new();
    let listener = h.reconciler.bgpvpn_listener();

    let spaced = BgpVpn::new("v1").with_rds(&["100: 1"]);
    assert_eq!(status(listener.add("v1", &spaced).await), TaskStatus::InvalidEntry);

    let no_rd = BgpVpn::new("v1").with_route_targets(&["100:1"]);
    assert_eq!(status(listener.add("v1", &no_rd).await), TaskStatus::InvalidEntry);

    let l2 = BgpVpn::new("v1")
        .with_rds(&["100:1"])
        .with_type(BgpVpnType::L2);
    assert_eq!(status(listener.add("v1", &l2).await), TaskStatus::InvalidEntry);

    assert!(h.calls().is_empty());
    assert_eq!(h.model.vpn_count(), 0);
}

#[tokio::test]
async fn test_rd_update_superset_only() {
    let h = Harness::new();
    let listener = h.reconciler.bgpvpn_listener();
    let v1 = VpnId::new("v1");

    let before = BgpVpn::new("v1")
        .with_rds(&["100:1", "100:2"])
        .with_route_targets(&["100:1"]);
    listener.add("v1", &before).await.unwrap();
    h.clear_calls();

    let dropped = before.clone().with_rds(&["100:1"]);
    let result = listener.update("v1", &before, &dropped).await;
    assert_eq!(status(result), TaskStatus::InvalidEntry);
    assert!(h.calls().is_empty());
    assert_eq!(h.model.vpn(&v1).unwrap().rds.len(), 2);

    let grown = before.clone().with_rds(&["100:1", "100:2", "100:3"]);
    listener.update("v1", &before, &grown).await.unwrap();
    assert_eq!(
        h.calls(),
        vec!["update_vpn_rds v1 [100:1,100:2,100:3]".to_string()]
    );
    assert_eq!(h.model.vpn_for_rd("100:3"), Some(v1));

    let result = listener.update("v1", &grown, &grown).await;
    assert_eq!(status(result), TaskStatus::Ignore);
}

#[tokio::test]
async fn test_reordered_rds_keep_target_update() {
    let h = Harness::new();
    let listener = h.reconciler.bgpvpn_listener();
    let v1 = VpnId::new("v1");

    let before = BgpVpn::new("v1")
        .with_rds(&["100:1", "100:2"])
        .with_route_targets(&["100:1"]);
    listener.add("v1", &before).await.unwrap();
    h.clear_calls();

    let after = before
        .clone()
        .with_rds(&["100:2", "100:1"])
        .with_import_targets(&["200:1"]);
    listener.update("v1", &before, &after).await.unwrap();

    assert_eq!(
        h.calls(),
        vec!["update_vpn_targets v1 import=[100:1,200:1] export=[100:1]".to_string()]
    );
    let rds: Vec<String> = h
        .model
        .vpn(&v1)
        .unwrap()
        .rds
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(rds, vec!["100:1".to_string(), "100:2".to_string()]);
    assert_eq!(h.model.route_targets_for_vpn(&v1).unwrap().import.len(), 2);
}

#[tokio::test]
async fn test_router_routes_move_with_association() {
    let h = Harness::new();
    h.create_vpn("v1", "100:1").await;
    let (v1, internal) = (VpnId::new("v1"), VpnId::new("r1"));
    let r = route("10.1.0.0/24", "192.168.0.1");

    let routers = h.reconciler.router_listener();
    let with_route = Router::new("r1").with_routes(vec![r]);
    routers.add("r1", &with_route).await.unwrap();
    assert_eq!(h.model.vpn(&internal).unwrap().extra_routes, vec![r]);
    h.clear_calls();

    let assocs = h.reconciler.router_association_listener();
    let assoc = RouterAssociation::new("v1", "r1");
    assocs.add(&assoc.id, &assoc).await.unwrap();
    assert_eq!(
        h.calls(),
        vec![
            "associate_router v1 r1".to_string(),
            "remove_adjacency r1 [10.1.0.0/24 via 192.168.0.1]".to_string(),
            "barrier v1".to_string(),
            "add_adjacency v1 [10.1.0.0/24 via 192.168.0.1]".to_string(),
        ]
    );
    assert!(h.model.vpn(&internal).unwrap().extra_routes.is_empty());
    assert_eq!(h.model.vpn(&v1).unwrap().extra_routes, vec![r]);

    let cleared = Router::new("r1");
    routers.update("r1", &with_route, &cleared).await.unwrap();
    assert!(h.model.vpn(&internal).unwrap().extra_routes.is_empty());
    assert!(h.model.vpn(&v1).unwrap().extra_routes.is_empty());

    routers.update("r1", &cleared, &with_route).await.unwrap();
    assert_eq!(h.model.vpn(&v1).unwrap().extra_routes, vec![r]);

    assocs.remove(&assoc.id, &assoc).await.unwrap();
    assert!(h.model.vpn(&v1).unwrap().extra_routes.is_empty());
    assert_eq!(h.model.vpn(&internal).unwrap().extra_routes, vec![r]);
}

#[tokio::test]
async fn test_deferred_router_routes_move_on_vpn_creation() {
    let h = Harness::new();
    let r = route("10.9.0.0/24", "192.168.9.1");
    h.reconciler
        .router_listener()
        .add("r2", &Router::new("r2").with_routes(vec![r]))
        .await
        .unwrap();

    let assoc = RouterAssociation::new("v2", "r2");
    let result = h
        .reconciler
        .router_association_listener()
        .add(&assoc.id, &assoc)
        .await;
    assert_eq!(status(result), TaskStatus::WaitingForDependency);

    h.create_vpn("v2", "100:2").await;

    assert_eq!(h.model.vpn(&VpnId::new("v2")).unwrap().extra_routes, vec![r]);
    assert!(h.model.vpn(&VpnId::new("r2")).unwrap().extra_routes.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_route_update_racing_association_converges() {
    let h = Harness::new();
    h.create_vpn("v1", "100:1").await;
    let (old, new) = (
        route("10.1.0.0/24", "192.168.0.1"),
        route("10.2.0.0/24", "192.168.0.2"),
    );
    let before = Router::new("r1").with_routes(vec![old]);
    let after = Router::new("r1").with_routes(vec![new]);
    h.reconciler.router_listener().add("r1", &before).await.unwrap();

    let held = h.reconciler.locks().acquire("r1").await.unwrap();

    let routers = h.reconciler.router_listener();
    let update = tokio::spawn(async move { routers.update("r1", &before, &after).await });
    tokio::time::sleep(Duration::from_millis(1)).await;

    let assocs = h.reconciler.router_association_listener();
    let assoc = RouterAssociation::new("v1", "r1");
    let associate = tokio::spawn(async move { assocs.add(&assoc.id, &assoc).await });
    tokio::time::sleep(Duration::from_millis(1)).await;

    drop(held);
    update.await.unwrap().unwrap();
    associate.await.unwrap().unwrap();

    assert_eq!(h.model.vpn(&VpnId::new("v1")).unwrap().extra_routes, vec![new]);
    assert!(h.model.vpn(&VpnId::new("r1")).unwrap().extra_routes.is_empty());
}

#[tokio::test]
async fn test_router_association_remove_clears_pending_and_live() {
    let h = Harness::new();
    h.create_vpn("v1", "100:1").await;
    let v1 = VpnId::new("v1");
    let r1 = RouterId::new("r1");
    let listener = h.reconciler.router_association_listener();

    let assoc = RouterAssociation::new("v1", "r1");
    listener.add(&assoc.id, &assoc).await.unwrap();
    h.reconciler.pending().add_pending_router(&v1, &r1);

    listener.remove(&assoc.id, &assoc).await.unwrap();
    assert!(h.reconciler.pending().is_empty());
    assert_eq!(h.model.vpn_for_router(&r1), None);
}

#[tokio::test]
async fn test_network_association_remove_clears_pending_and_live() {
    let h = Harness::new();
    h.create_vpn("v1", "100:1").await;
    let v1 = VpnId::new("v1");
    let n1 = NetworkId::new("n1");
    let listener = h.reconciler.network_association_listener();

    let assoc = NetworkAssociation::new("v1", "n1");
    listener.add(&assoc.id, &assoc).await.unwrap();
    h.reconciler.pending().add_pending_network(&v1, &n1);

    listener.remove(&assoc.id, &assoc).await.unwrap();
    assert!(h.reconciler.pending().is_empty());
    assert_eq!(h.model.vpn_for_network(&n1), None);
}

#[tokio::test(start_paused = true)]
async fn test_gateway_refresh_after_every_router_change() {
    let model = Arc::new(InMemoryVpnModel::new());
    let topology = Arc::new(TopologyCache::new());
    let refresher = GatewayMacRefresher::new(
        Arc::clone(&topology),
        Arc::new(LogOnlyResolver),
        Duration::from_secs(3600),
        Duration::ZERO,
    )
    .spawn(CancellationToken::new());
    let reconciler =
        AssociationReconciler::new(model.clone(), model.clone(), topology, Duration::from_secs(5))
            .with_barrier(Arc::new(FixedDelayBarrier::new(Duration::ZERO)))
            .with_gateway_trigger(refresher.trigger());
    let listener = reconciler.router_listener();

    let before = Router::new("r1").with_gateway(ExternalGateway {
        network_id: NetworkId::new("ext"),
        port_mac: MacAddress::new([0, 1, 2, 3, 4, 5]),
        fixed_ips: Vec::new(),
    });
    let after = before
        .clone()
        .with_routes(vec![route("10.1.0.0/24", "192.168.0.1")]);
    listener.add("r1", &before).await.unwrap();
    listener.update("r1", &before, &after).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let stats = refresher.shutdown().await;
    assert_eq!(stats.on_demand_runs, 2);
    assert_eq!(stats.periodic_runs, 0);
}

#[tokio::test]
async fn test_target_update_applied() {
    let h = Harness::new();
    let listener = h.reconciler.bgpvpn_listener();

    let before = BgpVpn::new("v1")
        .with_rds(&["100:1"])
        .with_route_targets(&["100:1"]);
    listener.add("v1", &before).await.unwrap();
    h.clear_calls();

    let after = before.clone().with_import_targets(&["200:1"]);
    listener.update("v1", &before, &after).await.unwrap();

    assert_eq!(
        h.calls(),
        vec!["update_vpn_targets v1 import=[100:1,200:1] export=[100:1]".to_string()]
    );
    let targets = h.model.route_targets_for_vpn(&VpnId::new("v1")).unwrap();
    assert_eq!(targets.import.len(), 2);
    assert_eq!(targets.export.len(), 1);
}

#[tokio::test]
async fn test_router_single_association() {
    let h = Harness::new();
    h.create_vpn("v1", "100:1").await;
    h.create_vpn("v2", "100:2").await;
    let listener = h.reconciler.router_association_listener();
    let r1 = RouterId::new("r1");

    let first = RouterAssociation::new("v1", "r1");
    listener.add(&first.id, &first).await.unwrap();

    let second = RouterAssociation::new("v2", "r1");
    let result = listener.add(&second.id, &second).await;
    assert_eq!(status(result), TaskStatus::Conflict);
    assert_eq!(h.model.vpn_for_router(&r1), Some(VpnId::new("v1")));

    let result = listener.add(&first.id, &first).await;
    assert_eq!(status(result), TaskStatus::Ignore);
}

#[tokio::test]
async fn test_pending_router_idempotent() {
    let h = Harness::new();
    let listener = h.reconciler.router_association_listener();
    let v1 = VpnId::new("v1");
    let assoc = RouterAssociation::new("v1", "r1");

    listener.add(&assoc.id, &assoc).await.unwrap_err();
    listener.add(&assoc.id, &assoc).await.unwrap_err();
    assert_eq!(
        h.reconciler.pending().pending_routers(&v1),
        vec![RouterId::new("r1")]
    );

    listener.remove(&assoc.id, &assoc).await.unwrap();
    assert!(h.reconciler.pending().is_empty());

    let result = listener.remove(&assoc.id, &assoc).await;
    assert_eq!(status(result), TaskStatus::Ignore);
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_pending_router_owned_elsewhere_dropped_at_creation() {
    let h = Harness::new();
    h.create_vpn("v1", "100:1").await;
    let listener = h.reconciler.router_association_listener();

    let owned = RouterAssociation::new("v1", "r1");
    listener.add(&owned.id, &owned).await.unwrap();
    let deferred = RouterAssociation::new("v2", "r1");
    assert_eq!(
        status(listener.add(&deferred.id, &deferred).await),
        TaskStatus::WaitingForDependency
    );

    h.create_vpn("v2", "100:2").await;

    let v2 = h.model.vpn(&VpnId::new("v2")).unwrap();
    assert!(v2.routers.is_empty());
    assert_eq!(
        h.model.vpn_for_router(&RouterId::new("r1")),
        Some(VpnId::new("v1"))
    );
    assert_eq!(h.reconciler.stats().rejected, 1);
    assert!(h.reconciler.pending().is_empty());
}

#[tokio::test]
async fn test_route_update_deletes_before_adds() {
    let h = Harness::new();
    let listener = h.reconciler.router_listener();

    let before = Router::new("r1").with_routes(vec![
        route("10.1.0.0/24", "192.168.0.1"),
        route("10.2.0.0/24", "192.168.0.2"),
    ]);
    listener.add("r1", &before).await.unwrap();
    assert_eq!(
        h.calls(),
        vec![
            "create_vpn r1 rds=[] routers=[] networks=[]".to_string(),
            "add_adjacency r1 [10.1.0.0/24 via 192.168.0.1,10.2.0.0/24 via 192.168.0.2]"
                .to_string(),
        ]
    );
    h.clear_calls();

    let after = Router::new("r1").with_routes(vec![
        route("10.2.0.0/24", "192.168.0.2"),
        route("10.3.0.0/24", "192.168.0.3"),
    ]);
    listener.update("r1", &before, &after).await.unwrap();

    assert_eq!(
        h.calls(),
        vec![
            "remove_adjacency r1 [10.1.0.0/24 via 192.168.0.1]".to_string(),
            "barrier r1".to_string(),
            "add_adjacency r1 [10.3.0.0/24 via 192.168.0.3]".to_string(),
        ]
    );
    let stats = h.reconciler.stats();
    assert_eq!(stats.routes_added, 3);
    assert_eq!(stats.routes_removed, 1);
}

#[tokio::test]
async fn test_inactive_link_route_reported() {
    let h = Harness::new();
    h.model
        .upsert_link(link("l-down", "169.254.0.1", LinkState::Inactive));
    h.model
        .upsert_link(link("l-up", "169.254.1.1", LinkState::Active));

    let router = Router::new("r1").with_routes(vec![
        route("10.1.0.0/24", "169.254.0.1"),
        route("10.2.0.0/24", "169.254.1.1"),
        route("10.3.0.0/24", "192.168.0.3"),
    ]);
    h.reconciler
        .router_listener()
        .add("r1", &router)
        .await
        .unwrap();

    let calls = h.calls();
    assert_eq!(
        calls[1..].to_vec(),
        vec![
            "add_inter_vpn_routes r1 [10.2.0.0/24 via 169.254.1.1]".to_string(),
            "add_adjacency r1 [10.3.0.0/24 via 192.168.0.3]".to_string(),
        ]
    );
    let view = h.model.vpn(&VpnId::new("r1")).unwrap();
    assert_eq!(view.inter_vpn_routes, vec![route("10.2.0.0/24", "169.254.1.1")]);
    assert_eq!(view.extra_routes, vec![route("10.3.0.0/24", "192.168.0.3")]);
    assert_eq!(h.reconciler.stats().route_failures, 1);
}

#[tokio::test]
async fn test_router_routes_follow_explicit_vpn() {
    let h = Harness::new();
    h.create_vpn("v1", "100:1").await;
    let assoc = RouterAssociation::new("v1", "r1");
    h.reconciler
        .router_association_listener()
        .add(&assoc.id, &assoc)
        .await
        .unwrap();
    h.clear_calls();

    let router = Router::new("r1").with_routes(vec![route("10.1.0.0/24", "192.168.0.1")]);
    let listener = h.reconciler.router_listener();
    listener.add("r1", &router).await.unwrap();
    assert_eq!(
        h.calls()[1],
        "add_adjacency v1 [10.1.0.0/24 via 192.168.0.1]".to_string()
    );
    h.clear_calls();

    listener.remove("r1", &router).await.unwrap();
    assert_eq!(
        h.calls(),
        vec![
            "remove_adjacency v1 [10.1.0.0/24 via 192.168.0.1]".to_string(),
            "dissociate_router v1 r1".to_string(),
            "remove_vpn r1".to_string(),
        ]
    );
    assert!(!h.model.vpn_exists(&VpnId::new("r1")));
    assert_eq!(h.model.vpn_for_router(&RouterId::new("r1")), None);
    assert!(h.reconciler.topology().router(&RouterId::new("r1")).is_none());
}

#[tokio::test]
async fn test_bgpvpn_remove_clears_everything() {
    let h = Harness::new();
    h.create_vpn("v1", "100:1").await;
    let v1 = VpnId::new("v1");

    let net = NetworkAssociation::new("v1", "n1");
    h.reconciler
        .network_association_listener()
        .add(&net.id, &net)
        .await
        .unwrap();
    h.reconciler.pending().add_pending_router(&v1, &RouterId::new("r9"));

    let vpn = BgpVpn::new("v1").with_rds(&["100:1"]).with_route_targets(&["100:1"]);
    h.reconciler.bgpvpn_listener().remove("v1", &vpn).await.unwrap();

    assert!(!h.model.vpn_exists(&v1));
    assert_eq!(h.model.vpn_for_network(&NetworkId::new("n1")), None);
    assert_eq!(h.model.vpn_for_rd("100:1"), None);
    assert!(h.reconciler.pending().is_empty());
    assert_eq!(h.reconciler.stats().vpns_removed, 1);
}

#[tokio::test]
async fn test_subnet_removal_withdraws_from_vpn() {
    let h = Harness::new();
    h.create_vpn("v1", "100:1").await;
    let net = NetworkAssociation::new("v1", "n1");
    h.reconciler
        .network_association_listener()
        .add(&net.id, &net)
        .await
        .unwrap();
    h.clear_calls();

    let subnet = Subnet {
        id: SubnetId::new("s1"),
        network_id: NetworkId::new("n1"),
        cidr: "10.1.0.0/24".parse().unwrap(),
        gateway_ip: Some("10.1.0.1".parse().unwrap()),
    };
    let listener = h.reconciler.subnet_listener();
    listener.add("s1", &subnet).await.unwrap();
    listener.remove("s1", &subnet).await.unwrap();

    assert_eq!(h.calls(), vec!["remove_subnet_from_vpn v1 s1".to_string()]);
    assert_eq!(
        h.model.vpn(&VpnId::new("v1")).unwrap().withdrawn_subnets,
        vec![SubnetId::new("s1")]
    );

    let other = Subnet {
        id: SubnetId::new("s2"),
        network_id: NetworkId::new("n-unassociated"),
        cidr: "10.2.0.0/24".parse().unwrap(),
        gateway_ip: None,
    };
    assert_eq!(
        status(listener.remove("s2", &other).await),
        TaskStatus::Ignore
    );
}

#[tokio::test(start_paused = true)]
async fn test_lock_timeout_leaves_model_untouched() {
    let h = Harness::with_lock_timeout(Duration::from_millis(50));
    let held = h.reconciler.locks().acquire("v1").await.unwrap();

    let vpn = BgpVpn::new("v1").with_rds(&["100:1"]);
    let result = h.reconciler.bgpvpn_listener().add("v1", &vpn).await;
    assert_eq!(status(result), TaskStatus::LockTimeout);

    let assoc = NetworkAssociation::new("v1", "n1");
    let result = h
        .reconciler
        .network_association_listener()
        .add(&assoc.id, &assoc)
        .await;
    assert_eq!(status(result), TaskStatus::LockTimeout);

    assert!(h.calls().is_empty());
    assert!(h.reconciler.pending().is_empty());
    assert_eq!(h.reconciler.stats().lock_timeouts, 2);

    drop(held);
    h.reconciler.bgpvpn_listener().add("v1", &vpn).await.unwrap();
    assert!(h.model.vpn_exists(&VpnId::new("v1")));
}
