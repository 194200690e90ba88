//! Router state: extra routes and external gateway information.

use crate::{IpAddress, IpPrefix, MacAddress, NetworkId, RouterId, SubnetId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A statically configured (destination, nexthop) pair attached to a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExtraRoute {
    pub destination: IpPrefix,
    pub nexthop: IpAddress,
}

impl ExtraRoute {
    pub fn new(destination: IpPrefix, nexthop: IpAddress) -> Self {
        Self {
            destination,
            nexthop,
        }
    }
}

impl fmt::Display for ExtraRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.destination, self.nexthop)
    }
}

/// A fixed IP held by the router's gateway port on an external subnet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GatewayFixedIp {
    pub subnet_id: SubnetId,
    pub ip: IpAddress,
}

/// External gateway attachment of a router.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalGateway {
    pub network_id: NetworkId,
    /// MAC of the router's gateway port, used as the probe source.
    pub port_mac: MacAddress,
    #[serde(default)]
    pub fixed_ips: Vec<GatewayFixedIp>,
}

/// A tenant router as delivered by the change stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Router {
    pub id: RouterId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub routes: Vec<ExtraRoute>,
    #[serde(default)]
    pub external_gateway: Option<ExternalGateway>,
}

impl Router {
    pub fn new(id: impl Into<RouterId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_routes(mut self, routes: Vec<ExtraRoute>) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_gateway(mut self, gateway: ExternalGateway) -> Self {
        self.external_gateway = Some(gateway);
        self
    }
}
