//! Common types for BGP-VPN association reconciliation.
//!
//! This crate provides type-safe representations of the logical network
//! model consumed by the reconciliation daemon:
//!
//! - [`VpnId`], [`NetworkId`], [`RouterId`], [`SubnetId`]: opaque identities
//! - [`IpAddress`], [`IpPrefix`], [`MacAddress`]: addressing primitives
//! - [`BgpVpn`], [`RouteDistinguisher`], [`RouteTarget`]: VPN definitions
//! - [`Router`], [`ExtraRoute`], [`ExternalGateway`]: router state
//! - [`InterVpnLink`], [`LinkState`]: cross-VPN links
//! - [`NetworkAssociation`], [`RouterAssociation`], [`Subnet`]: association objects

mod addr;
mod association;
mod bgpvpn;
mod ids;
mod link;
mod router;

pub use addr::{IpAddress, IpPrefix, MacAddress};
pub use association::{NetworkAssociation, RouterAssociation, Subnet};
pub use bgpvpn::{BgpVpn, BgpVpnType, RouteDistinguisher, RouteTarget, TargetDirection};
pub use ids::{NetworkId, RouterId, SubnetId, VpnId};
pub use link::{InterVpnLink, LinkEndpoint, LinkState};
pub use router::{ExternalGateway, ExtraRoute, GatewayFixedIp, Router};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid route distinguisher: {0}")]
    InvalidRouteDistinguisher(String),

    #[error("invalid route target: {0}")]
    InvalidRouteTarget(String),

    #[error("unknown BGP-VPN type: {0}")]
    InvalidVpnType(String),
}
