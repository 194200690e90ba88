//! User-facing BGP-VPN definitions and route policy tokens.

use crate::{NetworkId, ParseError, RouterId, VpnId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Returns true if a policy token is usable (non-empty, no whitespace).
fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && !token.chars().any(char::is_whitespace)
}

/// A validated route distinguisher token (e.g., "100:1").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RouteDistinguisher(String);

impl RouteDistinguisher {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RouteDistinguisher {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if is_valid_token(s) {
            Ok(RouteDistinguisher(s.to_string()))
        } else {
            Err(ParseError::InvalidRouteDistinguisher(s.to_string()))
        }
    }
}

impl TryFrom<String> for RouteDistinguisher {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RouteDistinguisher> for String {
    fn from(rd: RouteDistinguisher) -> String {
        rd.0
    }
}

impl fmt::Display for RouteDistinguisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated route target token (e.g., "100:1").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RouteTarget(String);

impl RouteTarget {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RouteTarget {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if is_valid_token(s) {
            Ok(RouteTarget(s.to_string()))
        } else {
            Err(ParseError::InvalidRouteTarget(s.to_string()))
        }
    }
}

impl TryFrom<String> for RouteTarget {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RouteTarget> for String {
    fn from(rt: RouteTarget) -> String {
        rt.0
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction in which a route target applies on a VPN instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetDirection {
    Import,
    Export,
    Both,
}

/// BGP-VPN flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BgpVpnType {
    #[default]
    L3,
    L2,
}

impl FromStr for BgpVpnType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l3" => Ok(BgpVpnType::L3),
            "l2" => Ok(BgpVpnType::L2),
            _ => Err(ParseError::InvalidVpnType(s.to_string())),
        }
    }
}

impl fmt::Display for BgpVpnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BgpVpnType::L3 => f.write_str("l3"),
            BgpVpnType::L2 => f.write_str("l2"),
        }
    }
}

/// User-facing BGP-VPN definition as delivered by the change stream.
///
/// Policy tokens are kept as raw strings; validation happens in the
/// reconciler so that one malformed token rejects the whole operation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BgpVpn {
    pub id: VpnId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default, rename = "type")]
    pub vpn_type: BgpVpnType,
    #[serde(default)]
    pub route_distinguishers: Vec<String>,
    /// Symmetric targets, used for both import and export.
    #[serde(default)]
    pub route_targets: Vec<String>,
    #[serde(default)]
    pub import_targets: Vec<String>,
    #[serde(default)]
    pub export_targets: Vec<String>,
    /// L3 VNI for EVPN-based VPNs.
    #[serde(default)]
    pub vni: Option<u32>,
    /// Networks associated when the VPN instance is created.
    #[serde(default)]
    pub networks: Vec<NetworkId>,
    /// Routers associated when the VPN instance is created.
    #[serde(default)]
    pub routers: Vec<RouterId>,
}

impl BgpVpn {
    /// Creates an L3 BGP-VPN with the given id and no policy.
    pub fn new(id: impl Into<VpnId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_rds(mut self, rds: &[&str]) -> Self {
        self.route_distinguishers = rds.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_route_targets(mut self, rts: &[&str]) -> Self {
        self.route_targets = rts.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_import_targets(mut self, rts: &[&str]) -> Self {
        self.import_targets = rts.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_export_targets(mut self, rts: &[&str]) -> Self {
        self.export_targets = rts.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_type(mut self, vpn_type: BgpVpnType) -> Self {
        self.vpn_type = vpn_type;
        self
    }

    /// Returns the primary (first) route distinguisher, if any.
    pub fn primary_rd(&self) -> Option<&str> {
        self.route_distinguishers.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tokens_reject_whitespace() {
        assert!("100:1".parse::<RouteDistinguisher>().is_ok());
        assert!("100: 1".parse::<RouteDistinguisher>().is_err());
        assert!("".parse::<RouteTarget>().is_err());
        assert!("100:1\t".parse::<RouteTarget>().is_err());
    }

    #[test]
    fn test_vpn_type_parse() {
        assert_eq!("L3".parse::<BgpVpnType>().unwrap(), BgpVpnType::L3);
        assert_eq!("l2".parse::<BgpVpnType>().unwrap(), BgpVpnType::L2);
        assert!("evpn".parse::<BgpVpnType>().is_err());
    }

    #[test]
    fn test_bgpvpn_json_defaults() {
        let vpn: BgpVpn =
            serde_json::from_str(r#"{"id": "vpn-1", "route_distinguishers": ["100:1"]}"#)
                .unwrap();
        assert_eq!(vpn.vpn_type, BgpVpnType::L3);
        assert_eq!(vpn.primary_rd(), Some("100:1"));
        assert!(vpn.import_targets.is_empty());
    }
}
