//! Zone serial drift between two snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};

use crate::bind::stats::{Snapshot, DEFAULT_VIEW};

/// Zone name to SOA serial, as reported by one snapshot.
pub type ZoneSerials = BTreeMap<String, String>;

/// How a zone's serial moved between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialChange {
    /// The zone appears in only one of the two snapshots.
    CreatedOrRemoved {
        /// The only serial seen.
        serial: String,
    },
    /// The zone is in both snapshots with different serials.
    Updated {
        /// Serial in the previous snapshot.
        old: String,
        /// Serial in the current snapshot.
        new: String,
    },
}

impl SerialChange {
    /// Serials involved, oldest first.
    pub fn serials(&self) -> Vec<&str> {
        match self {
            SerialChange::CreatedOrRemoved { serial } => vec![serial.as_str()],
            SerialChange::Updated { old, new } => vec![old.as_str(), new.as_str()],
        }
    }

    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SerialChange::CreatedOrRemoved { .. } => "created_or_removed",
            SerialChange::Updated { .. } => "updated",
        }
    }

    /// Human-readable event text for `zone`.
    pub fn message(&self, zone: &str) -> String {
        match self {
            SerialChange::CreatedOrRemoved { serial } => {
                format!("Zone {} created or removed (serial {})", zone, serial)
            }
            SerialChange::Updated { old, new } => {
                format!("Zone {} updated (serial {} -> {})", zone, old, new)
            }
        }
    }
}

impl fmt::Display for SerialChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serials().join(" -> "))
    }
}

/// Serials of the default view's zones.
///
/// Zones without a serial (not loaded) are skipped. If a zone is listed twice
/// the last entry wins.
pub fn extract_serials(snapshot: &Snapshot) -> ZoneSerials {
    let mut serials = ZoneSerials::new();

    for zone in snapshot.zones(DEFAULT_VIEW).unwrap_or_default() {
        let Some(serial) = &zone.serial else {
            debug!(zone = %zone.name, "zone has no serial");
            continue;
        };
        if let Some(earlier) = serials.insert(zone.name.clone(), serial.clone()) {
            warn!(
                zone = %zone.name,
                earlier = %earlier,
                serial = %serial,
                "zone listed twice in statistics, keeping the last serial"
            );
        }
    }

    serials
}

/// Zones whose serial differs between `previous` and `current`.
///
/// Works on the symmetric difference of the two `(zone, serial)` sets: a zone
/// left with one entry was created or removed, a zone left with two entries
/// was updated, previous serial first.
pub fn changed(previous: &ZoneSerials, current: &ZoneSerials) -> BTreeMap<String, SerialChange> {
    let before: BTreeSet<(&str, &str)> = previous
        .iter()
        .map(|(z, s)| (z.as_str(), s.as_str()))
        .collect();
    let after: BTreeSet<(&str, &str)> = current
        .iter()
        .map(|(z, s)| (z.as_str(), s.as_str()))
        .collect();

    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for &(zone, serial) in before.difference(&after) {
        grouped.entry(zone).or_default().push(serial);
    }
    for &(zone, serial) in after.difference(&before) {
        grouped.entry(zone).or_default().push(serial);
    }

    let mut changes = BTreeMap::new();
    for (zone, serials) in grouped {
        let change = match serials.as_slice() {
            [serial] => SerialChange::CreatedOrRemoved {
                serial: serial.to_string(),
            },
            [old, new] => SerialChange::Updated {
                old: old.to_string(),
                new: new.to_string(),
            },
            other => {
                warn!(zone, serials = ?other, "unexpected number of serials for zone, skipping");
                continue;
            }
        };
        changes.insert(zone.to_string(), change);
    }

    changes
}
