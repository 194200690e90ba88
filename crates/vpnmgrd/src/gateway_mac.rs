//! External gateway MAC refresher.
//!
//! Periodically, and shortly after a router add or gateway change, probes
//! the gateway of every external subnet a router is attached to: ARP for
//! IPv4, neighbor solicitation for IPv6. Per-router failures are logged
//! and never abort the batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vpn_types::{IpAddress, MacAddress, Router, RouterId};

use crate::topology::TopologyCache;

const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no interface towards {0}")]
    Unreachable(IpAddress),

    #[error("failed to send probe: {0}")]
    Send(String),
}

/// Sends address-resolution probes on behalf of a router gateway port.
#[async_trait]
pub trait NeighborResolver: Send + Sync {
    async fn send_arp_request(
        &self,
        src_mac: MacAddress,
        src_ip: IpAddress,
        target: IpAddress,
    ) -> Result<(), ResolveError>;

    async fn send_neighbor_solicitation(
        &self,
        src_mac: MacAddress,
        src_ip: IpAddress,
        target: IpAddress,
    ) -> Result<(), ResolveError>;
}

/// Resolver that only logs the probes it would send.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyResolver;

#[async_trait]
impl NeighborResolver for LogOnlyResolver {
    async fn send_arp_request(
        &self,
        src_mac: MacAddress,
        src_ip: IpAddress,
        target: IpAddress,
    ) -> Result<(), ResolveError> {
        debug!(%src_mac, %src_ip, %target, "ARP request");
        Ok(())
    }

    async fn send_neighbor_solicitation(
        &self,
        src_mac: MacAddress,
        src_ip: IpAddress,
        target: IpAddress,
    ) -> Result<(), ResolveError> {
        debug!(%src_mac, %src_ip, %target, "neighbor solicitation");
        Ok(())
    }
}

/// Outcome of one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub routers: usize,
    pub probes: usize,
    pub failures: usize,
}

impl RefreshReport {
    fn merge(&mut self, other: RefreshReport) {
        self.routers += other.routers;
        self.probes += other.probes;
        self.failures += other.failures;
    }
}

/// Totals accumulated by a running refresher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefresherStats {
    pub periodic_runs: u64,
    pub on_demand_runs: u64,
    pub probes: u64,
    pub failures: u64,
}

impl RefresherStats {
    fn account(&mut self, report: &RefreshReport) {
        self.probes += report.probes as u64;
        self.failures += report.failures as u64;
    }
}

/// Schedules an on-demand refresh for one router.
#[derive(Debug, Clone)]
pub struct GatewayMacTrigger {
    tx: mpsc::UnboundedSender<RouterId>,
}

impl GatewayMacTrigger {
    pub fn schedule(&self, router: &RouterId) {
        if self.tx.send(router.clone()).is_err() {
            debug!(router = %router, "gateway MAC refresher stopped, trigger ignored");
        }
    }
}

/// Owner of a running refresher task.
pub struct RefresherHandle {
    trigger: GatewayMacTrigger,
    cancel: CancellationToken,
    join: JoinHandle<RefresherStats>,
}

impl RefresherHandle {
    pub fn trigger(&self) -> GatewayMacTrigger {
        self.trigger.clone()
    }

    /// Stops scheduling and waits for in-flight refreshes to finish.
    pub async fn shutdown(self) -> RefresherStats {
        self.cancel.cancel();
        match self.join.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "gateway MAC refresher terminated abnormally");
                RefresherStats::default()
            }
        }
    }
}

#[derive(Clone)]
pub struct GatewayMacRefresher {
    topology: Arc<TopologyCache>,
    resolver: Arc<dyn NeighborResolver>,
    interval: Duration,
    post_update_delay: Duration,
}

impl GatewayMacRefresher {
    pub fn new(
        topology: Arc<TopologyCache>,
        resolver: Arc<dyn NeighborResolver>,
        interval: Duration,
        post_update_delay: Duration,
    ) -> Self {
        Self {
            topology,
            resolver,
            interval,
            post_update_delay,
        }
    }

    /// Refreshes every known router with an external gateway.
    pub async fn refresh_all(&self) -> RefreshReport {
        let mut report = RefreshReport::default();
        for router in self.topology.routers_with_gateway() {
            report.merge(self.refresh_router(&router).await);
        }
        report
    }

    /// Probes each external subnet gateway of `router`.
    pub async fn refresh_router(&self, router: &Router) -> RefreshReport {
        let mut report = RefreshReport::default();
        let Some(gateway) = &router.external_gateway else {
            return report;
        };
        report.routers = 1;

        for fixed in &gateway.fixed_ips {
            let Some(subnet) = self.topology.subnet(&fixed.subnet_id) else {
                debug!(router = %router.id, subnet = %fixed.subnet_id, "external subnet not known yet");
                continue;
            };
            let Some(gateway_ip) = subnet.gateway_ip else {
                continue;
            };
            if gateway_ip.is_ipv4() != fixed.ip.is_ipv4() {
                warn!(
                    router = %router.id,
                    src = %fixed.ip,
                    gateway = %gateway_ip,
                    "address family mismatch, skipping gateway probe"
                );
                continue;
            }

            let result = if gateway_ip.is_ipv4() {
                self.resolver
                    .send_arp_request(gateway.port_mac, fixed.ip, gateway_ip)
                    .await
            } else {
                self.resolver
                    .send_neighbor_solicitation(gateway.port_mac, fixed.ip, gateway_ip)
                    .await
            };
            report.probes += 1;

            if let Err(e) = result {
                report.failures += 1;
                warn!(
                    router = %router.id,
                    gateway = %gateway_ip,
                    error = %e,
                    "gateway MAC resolution failed"
                );
            }
        }

        report
    }

    /// Starts the periodic task. Cancelling `cancel` stops it.
    pub fn spawn(self, cancel: CancellationToken) -> RefresherHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(self.run(rx, cancel.clone()));
        RefresherHandle {
            trigger: GatewayMacTrigger { tx },
            cancel,
            join,
        }
    }

    async fn run(
        self,
        mut triggers: mpsc::UnboundedReceiver<RouterId>,
        cancel: CancellationToken,
    ) -> RefresherStats {
        let mut stats = RefresherStats::default();
        let mut interval = tokio::time::interval(self.interval.max(MIN_INTERVAL));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        let mut delayed: JoinSet<RefreshReport> = JoinSet::new();
        info!(
            "Gateway MAC refresher started (interval {:?}, post-update delay {:?})",
            self.interval, self.post_update_delay
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(router_id) = triggers.recv() => {
                    delayed.spawn(self.clone().refresh_later(router_id, cancel.clone()));
                }
                Some(done) = delayed.join_next(), if !delayed.is_empty() => {
                    if let Ok(report) = done {
                        stats.on_demand_runs += 1;
                        stats.account(&report);
                    }
                }
                _ = interval.tick() => {
                    let report = self.refresh_all().await;
                    stats.periodic_runs += 1;
                    stats.account(&report);
                    debug!(routers = report.routers, probes = report.probes, failures = report.failures, "periodic gateway MAC refresh");
                }
            }
        }

        while let Some(done) = delayed.join_next().await {
            if let Ok(report) = done {
                stats.on_demand_runs += 1;
                stats.account(&report);
            }
        }
        info!("Gateway MAC refresher stopped");
        stats
    }

    async fn refresh_later(self, router_id: RouterId, cancel: CancellationToken) -> RefreshReport {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return RefreshReport::default(),
            () = tokio::time::sleep(self.post_update_delay) => {}
        }
        match self.topology.router(&router_id) {
            Some(router) => self.refresh_router(&router).await,
            None => {
                debug!(router = %router_id, "router gone before gateway refresh");
                RefreshReport::default()
            }
        }
    }
}
