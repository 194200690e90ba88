//! Extra-route classification by nexthop.
//!
//! Routes whose nexthop is an inter-VPN-link endpoint are installed through
//! a different downstream path than ordinary adjacency routes, so the two
//! kinds are always handed over separately.

use std::collections::BTreeMap;
use std::fmt;

use vpn_types::{ExtraRoute, InterVpnLink, IpAddress};

/// Resolves a nexthop address to the inter-VPN link owning it.
pub trait LinkResolver {
    fn link_for_endpoint(&self, ip: &IpAddress) -> Option<InterVpnLink>;
}

impl<F> LinkResolver for F
where
    F: Fn(&IpAddress) -> Option<InterVpnLink>,
{
    fn link_for_endpoint(&self, ip: &IpAddress) -> Option<InterVpnLink> {
        self(ip)
    }
}

/// A route dropped because its nexthop is on a link that is not active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteFailure {
    pub route: ExtraRoute,
    pub link: String,
}

impl fmt::Display for RouteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "route {} dropped: inter-VPN link {} is not active",
            self.route, self.link
        )
    }
}

/// Routes partitioned by nexthop kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedRoutes {
    pub inter_vpn_link: Vec<ExtraRoute>,
    pub ordinary: Vec<ExtraRoute>,
    /// Link used by each inter-VPN-link nexthop.
    pub nexthop_to_link: BTreeMap<IpAddress, InterVpnLink>,
    pub failures: Vec<RouteFailure>,
}

impl ClassifiedRoutes {
    pub fn is_empty(&self) -> bool {
        self.inter_vpn_link.is_empty() && self.ordinary.is_empty()
    }
}

pub struct RouteClassifier;

impl RouteClassifier {
    /// Splits `routes` into inter-VPN-link and ordinary routes.
    ///
    /// A nexthop on an inactive link lands in `failures` and in neither
    /// output set.
    pub fn classify<R>(routes: &[ExtraRoute], resolver: &R) -> ClassifiedRoutes
    where
        R: LinkResolver + ?Sized,
    {
        let mut out = ClassifiedRoutes::default();

        for route in routes {
            match resolver.link_for_endpoint(&route.nexthop) {
                Some(link) if link.is_active() => {
                    out.inter_vpn_link.push(*route);
                    out.nexthop_to_link.insert(route.nexthop, link);
                }
                Some(link) => out.failures.push(RouteFailure {
                    route: *route,
                    link: link.name,
                }),
                None => out.ordinary.push(*route),
            }
        }

        out
    }
}
