//! Attribute diffing for BGP-VPN policy and router extra routes.
//!
//! All validation happens up front: a single malformed token rejects the
//! whole operation and nothing downstream is touched.

use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;

use vpn_types::{BgpVpn, ExtraRoute, RouteDistinguisher, RouteTarget, TargetDirection};

use crate::error::DiffError;

const RD_FIELD: &str = "route distinguisher";
const RT_FIELD: &str = "route target";
const IMPORT_FIELD: &str = "import target";
const EXPORT_FIELD: &str = "export target";

/// Borrowed view of the policy tokens carried by a BGP-VPN.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyTokens<'a> {
    pub rds: &'a [String],
    pub route_targets: &'a [String],
    pub import_targets: &'a [String],
    pub export_targets: &'a [String],
}

impl<'a> From<&'a BgpVpn> for PolicyTokens<'a> {
    fn from(vpn: &'a BgpVpn) -> Self {
        Self {
            rds: &vpn.route_distinguishers,
            route_targets: &vpn.route_targets,
            import_targets: &vpn.import_targets,
            export_targets: &vpn.export_targets,
        }
    }
}

/// Effective import and export route-target sets of a VPN.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSets {
    pub import: BTreeSet<RouteTarget>,
    pub export: BTreeSet<RouteTarget>,
}

impl TargetSets {
    /// Builds the effective sets: symmetric targets feed both sides.
    pub fn from_tokens(tokens: &PolicyTokens<'_>) -> Result<Self, DiffError> {
        let symmetric = parse_tokens::<RouteTarget>(RT_FIELD, tokens.route_targets)?;
        let mut import = parse_tokens::<RouteTarget>(IMPORT_FIELD, tokens.import_targets)?;
        let mut export = parse_tokens::<RouteTarget>(EXPORT_FIELD, tokens.export_targets)?;
        import.extend(symmetric.iter().cloned());
        export.extend(symmetric);

        Ok(Self {
            import: import.into_iter().collect(),
            export: export.into_iter().collect(),
        })
    }

    /// Returns every target with the direction it applies in.
    pub fn directions(&self) -> Vec<(RouteTarget, TargetDirection)> {
        let all: BTreeSet<&RouteTarget> = self.import.union(&self.export).collect();
        all.into_iter()
            .map(|rt| {
                let direction = match (self.import.contains(rt), self.export.contains(rt)) {
                    (true, true) => TargetDirection::Both,
                    (true, false) => TargetDirection::Import,
                    _ => TargetDirection::Export,
                };
                (rt.clone(), direction)
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.import.is_empty() && self.export.is_empty()
    }
}

/// Validated, fully parsed BGP-VPN policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VpnPolicy {
    /// Route distinguishers in configured order; the first is primary.
    pub rds: Vec<RouteDistinguisher>,
    pub targets: TargetSets,
}

impl VpnPolicy {
    pub fn primary_rd(&self) -> Option<&RouteDistinguisher> {
        self.rds.first()
    }
}

/// Outcome of comparing old and new BGP-VPN policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetDiff {
    /// Full new RD list, in configured order.
    pub rds: Vec<RouteDistinguisher>,
    /// RDs present in the new list only. Empty when RDs are unchanged.
    pub added_rds: Vec<RouteDistinguisher>,
    pub targets: TargetSets,
    pub imports_added: BTreeSet<RouteTarget>,
    pub imports_removed: BTreeSet<RouteTarget>,
    pub exports_added: BTreeSet<RouteTarget>,
    pub exports_removed: BTreeSet<RouteTarget>,
}

impl TargetDiff {
    pub fn rds_changed(&self) -> bool {
        !self.added_rds.is_empty()
    }

    pub fn targets_changed(&self) -> bool {
        !(self.imports_added.is_empty()
            && self.imports_removed.is_empty()
            && self.exports_added.is_empty()
            && self.exports_removed.is_empty())
    }

    pub fn is_noop(&self) -> bool {
        !self.rds_changed() && !self.targets_changed()
    }
}

/// Delete and add sets for a router's extra routes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteDiff {
    pub removed: Vec<ExtraRoute>,
    pub added: Vec<ExtraRoute>,
}

impl RouteDiff {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Computes validated deltas between previous and new object state.
pub struct AttributeDiffEngine;

impl AttributeDiffEngine {
    /// Validates and parses the policy of a BGP-VPN about to be created.
    pub fn validate_policy(vpn: &BgpVpn) -> Result<VpnPolicy, DiffError> {
        let tokens = PolicyTokens::from(vpn);
        let rds = parse_tokens::<RouteDistinguisher>(RD_FIELD, tokens.rds)?;
        let targets = TargetSets::from_tokens(&tokens)?;
        if rds.is_empty() {
            return Err(DiffError::MissingRds {
                vpn: vpn.id.to_string(),
            });
        }
        Ok(VpnPolicy { rds, targets })
    }

    /// Compares RD and route-target policy.
    ///
    /// The new RD list must keep every old RD. When it holds no more RDs
    /// than the old list, RDs are unchanged whatever their order. A list
    /// that grows must keep the primary RD first.
    pub fn diff_targets(
        old: &PolicyTokens<'_>,
        new: &PolicyTokens<'_>,
    ) -> Result<TargetDiff, DiffError> {
        let new_rds = parse_tokens::<RouteDistinguisher>(RD_FIELD, new.rds)?;
        let new_targets = TargetSets::from_tokens(new)?;

        // Old state was accepted earlier; tolerate tokens it may not parse.
        let old_rds: Vec<&str> = dedup(old.rds.iter().map(String::as_str));
        let old_targets = TargetSets::from_tokens(old).unwrap_or_default();

        let new_set: HashSet<&str> = new_rds.iter().map(RouteDistinguisher::as_str).collect();
        let removed: Vec<String> = old_rds
            .iter()
            .filter(|rd| !new_set.contains(*rd))
            .map(|rd| rd.to_string())
            .collect();
        if !removed.is_empty() {
            return Err(DiffError::UnsupportedRdRemoval { removed });
        }

        // Same RD set, possibly reordered: nothing to apply.
        let added_rds = if new_rds.len() == old_rds.len() {
            Vec::new()
        } else {
            if let (Some(old_primary), Some(new_primary)) = (old_rds.first(), new_rds.first()) {
                if *old_primary != new_primary.as_str() {
                    return Err(DiffError::PrimaryRdChanged {
                        old: old_primary.to_string(),
                        new: new_primary.to_string(),
                    });
                }
            }
            let old_set: HashSet<&str> = old_rds.iter().copied().collect();
            new_rds
                .iter()
                .filter(|rd| !old_set.contains(rd.as_str()))
                .cloned()
                .collect()
        };

        Ok(TargetDiff {
            imports_added: &new_targets.import - &old_targets.import,
            imports_removed: &old_targets.import - &new_targets.import,
            exports_added: &new_targets.export - &old_targets.export,
            exports_removed: &old_targets.export - &new_targets.export,
            rds: new_rds,
            added_rds,
            targets: new_targets,
        })
    }

    /// Symmetric difference of two route lists.
    ///
    /// Routes present on both sides appear in neither output. Input order
    /// is kept and duplicates collapse.
    pub fn diff_routes(old: &[ExtraRoute], new: &[ExtraRoute]) -> RouteDiff {
        let old_set: HashSet<&ExtraRoute> = old.iter().collect();
        let new_set: HashSet<&ExtraRoute> = new.iter().collect();

        RouteDiff {
            removed: dedup(old.iter().filter(|r| !new_set.contains(r)).copied()),
            added: dedup(new.iter().filter(|r| !old_set.contains(r)).copied()),
        }
    }
}

/// Parses tokens in order, dropping duplicates.
fn parse_tokens<T>(field: &'static str, tokens: &[String]) -> Result<Vec<T>, DiffError>
where
    T: FromStr<Err = vpn_types::ParseError> + PartialEq,
{
    let mut parsed = Vec::with_capacity(tokens.len());
    for token in tokens {
        if token.chars().any(char::is_whitespace) {
            return Err(DiffError::WhitespaceInToken {
                field,
                token: token.clone(),
            });
        }
        let value = token
            .parse::<T>()
            .map_err(|source| DiffError::InvalidToken { field, source })?;
        if !parsed.contains(&value) {
            parsed.push(value);
        }
    }
    Ok(parsed)
}

fn dedup<T: PartialEq>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut out = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
