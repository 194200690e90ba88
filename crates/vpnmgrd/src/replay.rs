//! JSON-lines change event replay.
//!
//! One record per line:
//!
//! ```text
//! {"kind":"inter_vpn_link","event":{"name":"l1","first":{...},"second":{...},"state":"active"}}
//! {"kind":"network_association","event":{"op":"add","id":"a1","object":{"vpn_id":"v1","network_id":"n1"}}}
//! {"kind":"bgpvpn","event":{"op":"add","id":"v1","object":{"id":"v1","route_distinguishers":["100:1"]}}}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use vpn_orch_common::ChangeEvent;
use vpn_types::{BgpVpn, InterVpnLink, NetworkAssociation, Router, RouterAssociation, Subnet};

use crate::daemon::VpnMgrDaemon;
use crate::error::ReplayError;

/// One replayable change, tagged with the stream it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "event", rename_all = "snake_case")]
pub enum EventRecord {
    Bgpvpn(ChangeEvent<BgpVpn>),
    NetworkAssociation(ChangeEvent<NetworkAssociation>),
    RouterAssociation(ChangeEvent<RouterAssociation>),
    Router(ChangeEvent<Router>),
    Subnet(ChangeEvent<Subnet>),
    /// Seeds or replaces an inter-VPN link in the VPN model.
    InterVpnLink(InterVpnLink),
}

impl EventRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            EventRecord::Bgpvpn(_) => "bgpvpn",
            EventRecord::NetworkAssociation(_) => "network_association",
            EventRecord::RouterAssociation(_) => "router_association",
            EventRecord::Router(_) => "router",
            EventRecord::Subnet(_) => "subnet",
            EventRecord::InterVpnLink(_) => "inter_vpn_link",
        }
    }
}

/// Records submitted during a replay, per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub records: usize,
    pub by_kind: BTreeMap<&'static str, usize>,
}

/// Parses one line. Returns `None` for blank and comment lines.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<EventRecord>, ReplayError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|source| ReplayError::Parse {
            line: line_no,
            source,
        })
}

/// Parses a whole document, failing on the first malformed line.
pub fn parse_records(content: &str) -> Result<Vec<EventRecord>, ReplayError> {
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if let Some(record) = parse_line(line, idx + 1)? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Submits every record of `path` to the daemon, in file order.
///
/// Returns once all records are queued; call
/// [`VpnMgrDaemon::shutdown`] to wait for them to be processed.
pub async fn replay_file(
    daemon: &VpnMgrDaemon,
    path: impl AsRef<Path>,
) -> Result<ReplaySummary, ReplayError> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path).await?;
    let records = parse_records(&content)?;
    info!("Replaying {} change event(s) from {}", records.len(), path.display());

    let mut summary = ReplaySummary::default();
    for record in records {
        *summary.by_kind.entry(record.kind()).or_default() += 1;
        summary.records += 1;
        daemon.submit(record).await?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vpn_types::{LinkState, VpnId};

    #[test]
    fn test_parse_bgpvpn_add() {
        let line = r#"{"kind":"bgpvpn","event":{"op":"add","id":"v1","object":{"id":"v1","route_distinguishers":["100:1"],"route_targets":["100:1"]}}}"#;
        let record = parse_line(line, 1).unwrap().unwrap();
        let expected = EventRecord::Bgpvpn(ChangeEvent::add(
            "v1",
            BgpVpn::new("v1")
                .with_rds(&["100:1"])
                .with_route_targets(&["100:1"]),
        ));
        assert_eq!(record, expected);
        assert_eq!(record.kind(), "bgpvpn");
    }

    #[test]
    fn test_parse_link_record() {
        let line = r#"{"kind":"inter_vpn_link","event":{"name":"l1","first":{"vpn_id":"v1","ip":"169.254.0.1"},"second":{"vpn_id":"v2","ip":"169.254.0.2"},"state":"active"}}"#;
        let Some(EventRecord::InterVpnLink(link)) = parse_line(line, 1).unwrap() else {
            panic!("expected link record");
        };
        assert_eq!(link.name, "l1");
        assert_eq!(link.first.vpn_id, VpnId::new("v1"));
        assert_eq!(link.state, LinkState::Active);
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let content = "# seed\n\n{\"kind\":\"network_association\",\"event\":{\"op\":\"remove\",\"id\":\"a\",\"object\":{\"vpn_id\":\"v1\",\"network_id\":\"n1\"}}}\n";
        let records = parse_records(content).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), "network_association");
    }

    #[test]
    fn test_parse_error_reports_line() {
        let content = "# header\n{\"kind\":\"router\",\"event\":{}}\n";
        match parse_records(content) {
            Err(ReplayError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_record_serializes_adjacently_tagged() {
        let record = EventRecord::RouterAssociation(ChangeEvent::add(
            "a1",
            RouterAssociation::new("v1", "r1"),
        ));
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "router_association");
        assert_eq!(json["event"]["op"], "add");
        assert_eq!(json["event"]["object"]["router_id"], "r1");
    }
}
