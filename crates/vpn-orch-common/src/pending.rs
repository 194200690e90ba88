//! Deferred associations waiting for their VPN instance.
//!
//! Associations can arrive before the VPN instance they reference. They
//! are parked here, keyed by VPN id, and drained exactly once when the
//! instance materializes.
//!
//! The store is safe for concurrent use from independent reconcilers.
//! Each call is atomic on its own; callers that need consistency across
//! calls for one VPN must hold that VPN's [`NamedKeyLock`](crate::NamedKeyLock).

use dashmap::DashMap;
use std::hash::Hash;
use vpn_types::{NetworkId, RouterId, VpnId};

/// An ordered, duplicate-free set of items per dependency key.
#[derive(Debug)]
pub struct DeferredSet<K, T>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Vec<T>>,
}

impl<K, T> Default for DeferredSet<K, T>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K, T> DeferredSet<K, T>
where
    K: Eq + Hash + Clone,
    T: PartialEq + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `item` under `key`. Returns false if it was already present.
    pub fn insert(&self, key: K, item: T) -> bool {
        let mut items = self.entries.entry(key).or_default();
        if items.contains(&item) {
            false
        } else {
            items.push(item);
            true
        }
    }

    /// Removes `item` from `key`. Returns false if it was absent.
    pub fn remove(&self, key: &K, item: &T) -> bool {
        let removed = match self.entries.get_mut(key) {
            Some(mut items) => {
                let before = items.len();
                items.retain(|i| i != item);
                items.len() != before
            }
            None => false,
        };
        self.entries.remove_if(key, |_, items| items.is_empty());
        removed
    }

    /// Removes and returns every item under `key`, in insertion order.
    pub fn drain(&self, key: &K) -> Vec<T> {
        self.entries
            .remove(key)
            .map(|(_, items)| items)
            .unwrap_or_default()
    }

    /// Returns a snapshot of the items under `key`.
    pub fn get(&self, key: &K) -> Vec<T> {
        self.entries
            .get(key)
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &K, item: &T) -> bool {
        self.entries
            .get(key)
            .is_some_and(|items| items.contains(item))
    }

    /// Returns the keys that currently hold items.
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Total number of items across all keys.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Associations drained for one VPN, in arrival order per type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingAssociations {
    pub networks: Vec<NetworkId>,
    pub routers: Vec<RouterId>,
}

impl PendingAssociations {
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty() && self.routers.is_empty()
    }
}

/// Network and router associations recorded before their VPN exists.
#[derive(Debug, Default)]
pub struct PendingAssociationStore {
    networks: DeferredSet<VpnId, NetworkId>,
    routers: DeferredSet<VpnId, RouterId>,
}

impl PendingAssociationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a network association. Duplicate inserts are no-ops.
    pub fn add_pending_network(&self, vpn_id: &VpnId, network_id: &NetworkId) -> bool {
        self.networks.insert(vpn_id.clone(), network_id.clone())
    }

    /// Records a router association. Duplicate inserts are no-ops.
    pub fn add_pending_router(&self, vpn_id: &VpnId, router_id: &RouterId) -> bool {
        self.routers.insert(vpn_id.clone(), router_id.clone())
    }

    /// Forgets a network association. Absent entries are no-ops.
    pub fn remove_pending_network(&self, vpn_id: &VpnId, network_id: &NetworkId) -> bool {
        self.networks.remove(vpn_id, network_id)
    }

    /// Forgets a router association. Absent entries are no-ops.
    pub fn remove_pending_router(&self, vpn_id: &VpnId, router_id: &RouterId) -> bool {
        self.routers.remove(vpn_id, router_id)
    }

    /// Returns and clears everything pending for `vpn_id`.
    pub fn drain_pending_for(&self, vpn_id: &VpnId) -> PendingAssociations {
        PendingAssociations {
            networks: self.networks.drain(vpn_id),
            routers: self.routers.drain(vpn_id),
        }
    }

    pub fn pending_networks(&self, vpn_id: &VpnId) -> Vec<NetworkId> {
        self.networks.get(vpn_id)
    }

    pub fn pending_routers(&self, vpn_id: &VpnId) -> Vec<RouterId> {
        self.routers.get(vpn_id)
    }

    pub fn is_network_pending(&self, vpn_id: &VpnId, network_id: &NetworkId) -> bool {
        self.networks.contains(vpn_id, network_id)
    }

    pub fn is_router_pending(&self, vpn_id: &VpnId, router_id: &RouterId) -> bool {
        self.routers.contains(vpn_id, router_id)
    }

    /// VPN ids with at least one pending association.
    pub fn waiting_vpns(&self) -> Vec<VpnId> {
        let mut vpns = self.networks.keys();
        for vpn in self.routers.keys() {
            if !vpns.contains(&vpn) {
                vpns.push(vpn);
            }
        }
        vpns.sort();
        vpns
    }

    /// Total number of pending associations.
    pub fn len(&self) -> usize {
        self.networks.len() + self.routers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty() && self.routers.is_empty()
    }
}
