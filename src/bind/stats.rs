//! BIND statistics channel: fetching and the typed snapshot.
//!
//! The statistics channel serves an XML document (schema v3):
//!
//! ```text
//! statistics
//! ├── server
//! │   └── counters[@type]          opcode, qtype, nsstat, sockstat, ...
//! │       └── counter[@name]       integer text
//! └── views
//!     └── view[@name]              "_default", ...
//!         ├── zones/zone[@name]    serial child
//!         └── counters[@type]      resqtype, cachestats, ...
//! ```
//!
//! Only the parts above are read. Everything else is ignored.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::CheckError;

/// Name of the view whose zones and cache are reported.
pub const DEFAULT_VIEW: &str = "_default";

/// Where a set of counters lives in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterPath {
    /// `server/counters[@type=...]`
    Server(&'static str),
    /// `views/view[@name=...]/counters[@type=...]`
    View(&'static str, &'static str),
}

/// Counters of one `counters` element, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    entries: Vec<(String, u64)>,
}

impl Counters {
    /// Build from `(name, value)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            entries: pairs.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        }
    }

    /// Value of the named counter.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// All counters in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// Number of counters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no counters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A zone as listed in a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    /// Zone name as BIND reports it, possibly with a `/CLASS` suffix.
    pub name: String,
    /// SOA serial as text. Absent for zones that are not loaded.
    pub serial: Option<String>,
}

impl Zone {
    /// Zone name without the `/CLASS` suffix, suitable for DNS queries.
    pub fn dns_name(&self) -> &str {
        dns_name(&self.name)
    }
}

/// Strip the `/CLASS` suffix BIND appends to zone names.
pub fn dns_name(zone: &str) -> &str {
    zone.split_once('/').map_or(zone, |(name, _)| name)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct View {
    counters: HashMap<String, Counters>,
    zones: Vec<Zone>,
}

/// One fetched statistics document. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    server: HashMap<String, Counters>,
    views: HashMap<String, View>,
}

impl Snapshot {
    /// Parse a statistics document.
    pub fn from_xml(xml: &str) -> Result<Self, CheckError> {
        let raw: RawStatistics = quick_xml::de::from_str(xml)?;
        Ok(Self::from(raw))
    }

    /// Counters at `path`, or `None` if the document has no such set.
    pub fn counters(&self, path: CounterPath) -> Option<&Counters> {
        match path {
            CounterPath::Server(kind) => self.server.get(kind),
            CounterPath::View(view, kind) => self.views.get(view)?.counters.get(kind),
        }
    }

    /// Zones of a view, or `None` if the view is absent.
    pub fn zones(&self, view: &str) -> Option<&[Zone]> {
        self.views.get(view).map(|v| v.zones.as_slice())
    }

    /// Builder used by tests and hosts that obtain statistics elsewhere.
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }
}

/// Incremental construction of a [`Snapshot`].
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    snapshot: Snapshot,
}

impl SnapshotBuilder {
    /// Set the counters at `path`.
    pub fn counters(mut self, path: CounterPath, counters: Counters) -> Self {
        match path {
            CounterPath::Server(kind) => {
                self.snapshot.server.insert(kind.to_string(), counters);
            }
            CounterPath::View(view, kind) => {
                self.snapshot
                    .views
                    .entry(view.to_string())
                    .or_default()
                    .counters
                    .insert(kind.to_string(), counters);
            }
        }
        self
    }

    /// Append a zone to a view.
    pub fn zone(mut self, view: &str, name: &str, serial: &str) -> Self {
        self.snapshot
            .views
            .entry(view.to_string())
            .or_default()
            .zones
            .push(Zone {
                name: name.to_string(),
                serial: Some(serial.to_string()),
            });
        self
    }

    /// Finish.
    pub fn build(self) -> Snapshot {
        self.snapshot
    }
}

#[derive(Debug, Deserialize)]
struct RawStatistics {
    #[serde(default)]
    server: Option<RawServer>,
    #[serde(default)]
    views: Option<RawViews>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    #[serde(rename = "counters", default)]
    counters: Vec<RawCounters>,
}

#[derive(Debug, Deserialize)]
struct RawCounters {
    #[serde(rename = "@type")]
    kind: String,
    #[serde(rename = "counter", default)]
    counters: Vec<RawCounter>,
}

#[derive(Debug, Deserialize)]
struct RawCounter {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "$text")]
    value: u64,
}

#[derive(Debug, Deserialize)]
struct RawViews {
    #[serde(rename = "view", default)]
    views: Vec<RawView>,
}

#[derive(Debug, Deserialize)]
struct RawView {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "counters", default)]
    counters: Vec<RawCounters>,
    #[serde(default)]
    zones: Option<RawZones>,
}

#[derive(Debug, Deserialize)]
struct RawZones {
    #[serde(rename = "zone", default)]
    zones: Vec<RawZone>,
}

#[derive(Debug, Deserialize)]
struct RawZone {
    #[serde(rename = "@name")]
    name: String,
    #[serde(default)]
    serial: Option<String>,
}

fn collect_counters(raw: Vec<RawCounters>) -> HashMap<String, Counters> {
    let mut sets: HashMap<String, Counters> = HashMap::new();
    for set in raw {
        let entry = sets.entry(set.kind).or_default();
        entry
            .entries
            .extend(set.counters.into_iter().map(|c| (c.name, c.value)));
    }
    sets
}

impl From<RawStatistics> for Snapshot {
    fn from(raw: RawStatistics) -> Self {
        let server = raw
            .server
            .map(|s| collect_counters(s.counters))
            .unwrap_or_default();

        let mut views = HashMap::new();
        for view in raw.views.map(|v| v.views).unwrap_or_default() {
            let zones = view
                .zones
                .map(|z| z.zones)
                .unwrap_or_default()
                .into_iter()
                .map(|z| Zone {
                    name: z.name,
                    serial: z.serial.map(|s| s.trim().to_string()),
                })
                .collect();
            if views.contains_key(&view.name) {
                warn!(view = %view.name, "duplicate view in statistics, keeping the last one");
            }
            views.insert(
                view.name,
                View {
                    counters: collect_counters(view.counters),
                    zones,
                },
            );
        }

        Self { server, views }
    }
}

/// HTTP client for a BIND statistics channel.
#[derive(Debug, Clone)]
pub struct StatsClient {
    http: reqwest::Client,
}

impl StatsClient {
    /// Create a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, CheckError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Fetch and parse the statistics document at `url`. Not retried.
    pub async fn fetch(&self, url: &str) -> Result<Snapshot, CheckError> {
        debug!(%url, "fetching statistics");

        let response = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                CheckError::Timeout {
                    url: url.to_string(),
                }
            } else {
                CheckError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CheckError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                CheckError::Timeout {
                    url: url.to_string(),
                }
            } else {
                CheckError::Http(e)
            }
        })?;

        let snapshot = Snapshot::from_xml(&body)?;
        debug!(
            %url,
            bytes = body.len(),
            server_sets = snapshot.server.len(),
            views = snapshot.views.len(),
            "parsed statistics"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<statistics version="3.6">
  <server>
    <boot-time>2017-09-10T12:00:00Z</boot-time>
    <counters type="opcode">
      <counter name="QUERY">120</counter>
      <counter name="NOTIFY">3</counter>
    </counters>
    <counters type="nsstat">
      <counter name="Requestv4">120</counter>
      <counter name="QryUDP">110</counter>
    </counters>
  </server>
  <views>
    <view name="_default">
      <zones>
        <zone name="example.com/IN" rdataclass="IN">
          <type>master</type>
          <serial>2017091001</serial>
        </zone>
        <zone name="0.in-addr.arpa/IN" rdataclass="IN">
          <type>builtin</type>
        </zone>
      </zones>
      <counters type="resqtype">
        <counter name="A">40</counter>
      </counters>
      <cache name="_default">
        <rrset><name>A</name><counter>4</counter></rrset>
      </cache>
      <counters type="cachestats">
        <counter name="CacheHits">7</counter>
        <counter name="CacheNodes">30</counter>
      </counters>
    </view>
    <view name="_bind">
      <zones/>
    </view>
  </views>
</statistics>
"#;

    #[test]
    fn test_parse_server_counters() {
        let snapshot = Snapshot::from_xml(SAMPLE).unwrap();
        let nsstat = snapshot.counters(CounterPath::Server("nsstat")).unwrap();
        assert_eq!(nsstat.get("Requestv4"), Some(120));
        assert_eq!(nsstat.get("QryUDP"), Some(110));
        assert_eq!(nsstat.get("Missing"), None);

        let opcode = snapshot.counters(CounterPath::Server("opcode")).unwrap();
        let names: Vec<&str> = opcode.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["QUERY", "NOTIFY"]);
    }

    #[test]
    fn test_parse_view_counters_around_cache_element() {
        let snapshot = Snapshot::from_xml(SAMPLE).unwrap();
        let resq = snapshot
            .counters(CounterPath::View(DEFAULT_VIEW, "resqtype"))
            .unwrap();
        assert_eq!(resq.get("A"), Some(40));

        let cache = snapshot
            .counters(CounterPath::View(DEFAULT_VIEW, "cachestats"))
            .unwrap();
        assert_eq!(cache.get("CacheNodes"), Some(30));
    }

    #[test]
    fn test_parse_zones() {
        let snapshot = Snapshot::from_xml(SAMPLE).unwrap();
        let zones = snapshot.zones(DEFAULT_VIEW).unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].name, "example.com/IN");
        assert_eq!(zones[0].serial.as_deref(), Some("2017091001"));
        assert_eq!(zones[0].dns_name(), "example.com");
        assert_eq!(zones[1].serial, None);

        assert_eq!(snapshot.zones("_bind").map(|z| z.len()), Some(0));
    }

    #[test]
    fn test_absent_sets_are_none() {
        let snapshot = Snapshot::from_xml(SAMPLE).unwrap();
        assert!(snapshot.counters(CounterPath::Server("sockstat")).is_none());
        assert!(snapshot
            .counters(CounterPath::View("internal", "resqtype"))
            .is_none());
        assert!(snapshot.zones("internal").is_none());
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        let err = Snapshot::from_xml("<statistics><server><counters type=\"x\">").unwrap_err();
        assert!(matches!(err, CheckError::Parse(_)));
    }

    #[test]
    fn test_non_numeric_counter_is_parse_error() {
        let xml = r#"<statistics><server><counters type="nsstat"><counter name="Requestv4">lots</counter></counters></server></statistics>"#;
        assert!(matches!(
            Snapshot::from_xml(xml),
            Err(CheckError::Parse(_))
        ));
    }

    #[test]
    fn test_dns_name_without_class() {
        assert_eq!(dns_name("dal.moz.com"), "dal.moz.com");
        assert_eq!(dns_name("dc.example.com/IN"), "dc.example.com");
    }

    #[test]
    fn test_builder() {
        let snapshot = Snapshot::builder()
            .counters(
                CounterPath::Server("nsstat"),
                Counters::from_pairs([("Requestv4", 5)]),
            )
            .zone(DEFAULT_VIEW, "a.example.com", "1")
            .build();
        assert_eq!(
            snapshot
                .counters(CounterPath::Server("nsstat"))
                .and_then(|c| c.get("Requestv4")),
            Some(5)
        );
        assert_eq!(snapshot.zones(DEFAULT_VIEW).unwrap()[0].name, "a.example.com");
    }
}
