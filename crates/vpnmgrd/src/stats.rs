//! Reconciler counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use vpn_orch_common::TaskStatus;

/// Counters shared by all reconcilers.
#[derive(Debug, Default)]
pub struct ReconcilerStats {
    events_handled: AtomicU64,
    rejected: AtomicU64,
    deferred: AtomicU64,
    lock_timeouts: AtomicU64,
    downstream_failures: AtomicU64,
    vpns_created: AtomicU64,
    vpns_removed: AtomicU64,
    associations_applied: AtomicU64,
    routes_added: AtomicU64,
    routes_removed: AtomicU64,
    route_failures: AtomicU64,
}

/// Point-in-time copy of [`ReconcilerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilerStatsSnapshot {
    pub events_handled: u64,
    pub rejected: u64,
    pub deferred: u64,
    pub lock_timeouts: u64,
    pub downstream_failures: u64,
    pub vpns_created: u64,
    pub vpns_removed: u64,
    pub associations_applied: u64,
    pub routes_added: u64,
    pub routes_removed: u64,
    pub route_failures: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl ReconcilerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the final outcome of one event.
    pub fn record_outcome(&self, status: TaskStatus) {
        bump(&self.events_handled, 1);
        match status {
            TaskStatus::InvalidEntry | TaskStatus::Conflict => bump(&self.rejected, 1),
            TaskStatus::WaitingForDependency => bump(&self.deferred, 1),
            TaskStatus::LockTimeout => bump(&self.lock_timeouts, 1),
            TaskStatus::Failed => bump(&self.downstream_failures, 1),
            TaskStatus::Success | TaskStatus::Ignore => {}
        }
    }

    /// Counts a rejection that did not end the event, such as a deferred
    /// router dropped while its VPN is created.
    pub fn association_rejected(&self) {
        bump(&self.rejected, 1);
    }

    pub fn vpn_created(&self) {
        bump(&self.vpns_created, 1);
    }

    pub fn vpn_removed(&self) {
        bump(&self.vpns_removed, 1);
    }

    pub fn associations_applied(&self, count: usize) {
        bump(&self.associations_applied, count as u64);
    }

    pub fn routes_added(&self, count: usize) {
        bump(&self.routes_added, count as u64);
    }

    pub fn routes_removed(&self, count: usize) {
        bump(&self.routes_removed, count as u64);
    }

    pub fn route_failures(&self, count: usize) {
        bump(&self.route_failures, count as u64);
    }

    pub fn snapshot(&self) -> ReconcilerStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ReconcilerStatsSnapshot {
            events_handled: load(&self.events_handled),
            rejected: load(&self.rejected),
            deferred: load(&self.deferred),
            lock_timeouts: load(&self.lock_timeouts),
            downstream_failures: load(&self.downstream_failures),
            vpns_created: load(&self.vpns_created),
            vpns_removed: load(&self.vpns_removed),
            associations_applied: load(&self.associations_applied),
            routes_added: load(&self.routes_added),
            routes_removed: load(&self.routes_removed),
            route_failures: load(&self.route_failures),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_counted() {
        let stats = ReconcilerStats::new();
        stats.record_outcome(TaskStatus::Success);
        stats.record_outcome(TaskStatus::Conflict);
        stats.record_outcome(TaskStatus::InvalidEntry);
        stats.record_outcome(TaskStatus::LockTimeout);
        stats.record_outcome(TaskStatus::WaitingForDependency);
        stats.routes_added(3);

        let snap = stats.snapshot();
        assert_eq!(snap.events_handled, 5);
        assert_eq!(snap.rejected, 2);
        assert_eq!(snap.lock_timeouts, 1);
        assert_eq!(snap.deferred, 1);
        assert_eq!(snap.routes_added, 3);
        assert_eq!(snap.downstream_failures, 0);
    }
}
