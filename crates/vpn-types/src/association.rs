//! Network/router association objects and subnets.

use crate::{IpAddress, IpPrefix, NetworkId, RouterId, SubnetId, VpnId};
use serde::{Deserialize, Serialize};

/// "This network participates in this VPN's routing domain."
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkAssociation {
    #[serde(default)]
    pub id: String,
    pub vpn_id: VpnId,
    pub network_id: NetworkId,
}

impl NetworkAssociation {
    pub fn new(vpn_id: impl Into<VpnId>, network_id: impl Into<NetworkId>) -> Self {
        let vpn_id = vpn_id.into();
        let network_id = network_id.into();
        Self {
            id: format!("{}:{}", vpn_id, network_id),
            vpn_id,
            network_id,
        }
    }
}

/// "This router participates in this VPN's routing domain."
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouterAssociation {
    #[serde(default)]
    pub id: String,
    pub vpn_id: VpnId,
    pub router_id: RouterId,
}

impl RouterAssociation {
    pub fn new(vpn_id: impl Into<VpnId>, router_id: impl Into<RouterId>) -> Self {
        let vpn_id = vpn_id.into();
        let router_id = router_id.into();
        Self {
            id: format!("{}:{}", vpn_id, router_id),
            vpn_id,
            router_id,
        }
    }
}

/// A subnet of a tenant network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: SubnetId,
    pub network_id: NetworkId,
    pub cidr: IpPrefix,
    #[serde(default)]
    pub gateway_ip: Option<IpAddress>,
}
