//! Inter-VPN links.

use crate::{IpAddress, VpnId};
use serde::{Deserialize, Serialize};

/// Operational state of an inter-VPN link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Active,
    #[default]
    Inactive,
}

/// One side of an inter-VPN link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkEndpoint {
    pub vpn_id: VpnId,
    pub ip: IpAddress,
}

/// A named logical link between two VPN instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterVpnLink {
    pub name: String,
    pub first: LinkEndpoint,
    pub second: LinkEndpoint,
    #[serde(default)]
    pub state: LinkState,
}

impl InterVpnLink {
    pub fn is_active(&self) -> bool {
        self.state == LinkState::Active
    }

    /// Returns the endpoint owning `ip`, if any.
    pub fn endpoint_for(&self, ip: &IpAddress) -> Option<&LinkEndpoint> {
        if self.first.ip == *ip {
            Some(&self.first)
        } else if self.second.ip == *ip {
            Some(&self.second)
        } else {
            None
        }
    }

    /// Returns the endpoint opposite to the one owning `ip`.
    pub fn other_endpoint(&self, ip: &IpAddress) -> Option<&LinkEndpoint> {
        if self.first.ip == *ip {
            Some(&self.second)
        } else if self.second.ip == *ip {
            Some(&self.first)
        } else {
            None
        }
    }
}
