//! Metric extraction rules and the counter-delta engine.
//!
//! BIND only exposes cumulative counters. Monotonic metrics are reported as
//! the increase between the previous and the current snapshot; gauges are
//! reported as-is.

use std::sync::LazyLock;
use tracing::{debug, trace};

use crate::bind::stats::{CounterPath, Counters, Snapshot, DEFAULT_VIEW};
use crate::metrics;
use crate::sink::{Metric, MetricKind};

const RDTYPE_TAG: &str = "rdtype";

const SOCK_TYPES: [&str; 5] = ["UDP4", "UDP6", "TCP4", "TCP6", "Unix"];

const SOCK_METRIC_TYPES: [&str; 10] = [
    "Open",
    "OpenFail",
    "Close",
    "BindFail",
    "ConnFail",
    "Conn",
    "AcceptFail",
    "Accept",
    "SendErr",
    "RecvErr",
];

/// Default-view cache statistics: (counter, metric suffix, kind).
const CACHE_STATS: [(&str, &str, MetricKind); 8] = [
    ("CacheHits", "cache_hits", MetricKind::MonotonicCount),
    ("CacheMisses", "cache_misses", MetricKind::MonotonicCount),
    ("QueryHits", "query_hits", MetricKind::MonotonicCount),
    ("QueryMisses", "query_misses", MetricKind::MonotonicCount),
    ("DeleteLRU", "delete_lru", MetricKind::MonotonicCount),
    ("DeleteTTL", "delete_ttl", MetricKind::MonotonicCount),
    ("CacheNodes", "cache_nodes", MetricKind::Gauge),
    ("CacheBuckets", "cache_buckets", MetricKind::Gauge),
];

/// How a rule finds its counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// One named counter, reported under the rule's metric name.
    Counter {
        /// Set holding the counter.
        path: CounterPath,
        /// Counter name.
        name: String,
    },
    /// Every counter of the set, each reported as `{metric}.{snake_name}`.
    ByName {
        /// Set to enumerate.
        path: CounterPath,
    },
    /// Every counter of the set under the rule's metric name, tagged
    /// `{tag}:{lower_name}`.
    ByTag {
        /// Set to enumerate.
        path: CounterPath,
        /// Tag key.
        tag: String,
    },
}

/// A declared metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRule {
    /// Metric name, or prefix for [`Locator::ByName`].
    pub metric: String,
    /// Where the values come from.
    pub locator: Locator,
    /// Gauge or monotonic count.
    pub kind: MetricKind,
    /// Fixed tags added to every sample of this rule.
    pub tags: Vec<String>,
}

impl MetricRule {
    fn by_name(prefix: &str, path: CounterPath) -> Self {
        Self {
            metric: prefix.to_string(),
            locator: Locator::ByName { path },
            kind: MetricKind::MonotonicCount,
            tags: Vec::new(),
        }
    }

    fn by_tag(metric: &str, path: CounterPath, tag: &str) -> Self {
        Self {
            metric: metric.to_string(),
            locator: Locator::ByTag {
                path,
                tag: tag.to_string(),
            },
            kind: MetricKind::MonotonicCount,
            tags: Vec::new(),
        }
    }

    fn counter(metric: String, path: CounterPath, name: String, kind: MetricKind) -> Self {
        Self {
            metric,
            locator: Locator::Counter { path, name },
            kind,
            tags: Vec::new(),
        }
    }
}

/// Every metric the BIND check reports.
pub static BIND_METRICS: LazyLock<Vec<MetricRule>> = LazyLock::new(|| {
    let mut rules = vec![
        MetricRule::by_name("bind.network", CounterPath::Server("nsstat")),
        MetricRule::by_tag("bind.opcode.in", CounterPath::Server("opcode"), "opcode"),
        MetricRule::by_tag("bind.queries.in", CounterPath::Server("qtype"), RDTYPE_TAG),
        MetricRule::by_tag(
            "bind.queries.out",
            CounterPath::View(DEFAULT_VIEW, "resqtype"),
            RDTYPE_TAG,
        ),
    ];

    for (counter, suffix, kind) in CACHE_STATS {
        rules.push(MetricRule::counter(
            format!("bind.cache.{}", suffix),
            CounterPath::View(DEFAULT_VIEW, "cachestats"),
            counter.to_string(),
            kind,
        ));
    }

    for sock_type in SOCK_TYPES {
        for metric_type in SOCK_METRIC_TYPES {
            rules.push(MetricRule {
                tags: vec![format!("socket_type:{}", sock_type.to_lowercase())],
                ..MetricRule::counter(
                    format!("bind.socket.{}", metric_type.to_lowercase()),
                    CounterPath::Server("sockstat"),
                    format!("{}{}", sock_type, metric_type),
                    MetricKind::MonotonicCount,
                )
            });
        }
    }

    rules
});

/// Counter names whose published metric suffix does not follow the
/// word-boundary rule.
const SUFFIX_OVERRIDES: [(&str, &str); 1] = [("QrySERVFAIL", "qry_serv_fail")];

/// Convert a BIND counter name to a metric suffix.
///
/// Word boundaries fall before an upper-case letter that follows a lower-case
/// letter or digit, and before the last capital of an acronym when a
/// lower-case letter follows it: `FDWatch` → `fd_watch`, `QryUDP` → `qry_udp`,
/// `NSIDOpt` → `nsid_opt`, `ReqEdns0` → `req_edns0`.
pub fn to_snake_case(name: &str) -> String {
    if let Some((_, suffix)) = SUFFIX_OVERRIDES.iter().find(|(n, _)| *n == name) {
        return suffix.to_string();
    }

    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            if prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower)
            {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }

    out
}

/// Increase of a counter between two polls.
///
/// A counter absent from the previous snapshot counts from zero. A counter
/// lower than before means the server restarted, and the current value is
/// what accumulated since.
pub fn counter_delta(previous: Option<u64>, current: u64) -> u64 {
    match previous {
        None => current,
        Some(prev) if current < prev => {
            debug!(previous = prev, current, "counter went backwards, assuming reset");
            metrics::record_counter_reset();
            current
        }
        Some(prev) => current - prev,
    }
}

/// Evaluate `rules` over a (previous, current) pair.
///
/// Without a previous snapshot only gauges are produced.
pub fn evaluate(
    rules: &[MetricRule],
    previous: Option<&Snapshot>,
    current: &Snapshot,
    instance_tags: &[String],
) -> Vec<Metric> {
    let mut out = Vec::new();

    for rule in rules {
        if rule.kind == MetricKind::MonotonicCount && previous.is_none() {
            continue;
        }
        evaluate_rule(rule, previous, current, instance_tags, &mut out);
    }

    out
}

fn evaluate_rule(
    rule: &MetricRule,
    previous: Option<&Snapshot>,
    current: &Snapshot,
    instance_tags: &[String],
    out: &mut Vec<Metric>,
) {
    let path = match &rule.locator {
        Locator::Counter { path, .. } | Locator::ByName { path } | Locator::ByTag { path, .. } => {
            *path
        }
    };

    let Some(current_set) = current.counters(path) else {
        trace!(metric = %rule.metric, ?path, "counter set absent");
        return;
    };
    let previous_set = previous.and_then(|p| p.counters(path));

    let value = |name: &str, current: u64| match rule.kind {
        MetricKind::Gauge => current,
        MetricKind::MonotonicCount => {
            counter_delta(previous_set.and_then(|p: &Counters| p.get(name)), current)
        }
    };

    let tags = |extra: Option<String>| {
        let mut tags = rule.tags.clone();
        tags.extend(extra);
        tags.extend(instance_tags.iter().cloned());
        tags
    };

    match &rule.locator {
        Locator::Counter { name, .. } => {
            if let Some(current) = current_set.get(name) {
                out.push(Metric {
                    name: rule.metric.clone(),
                    kind: rule.kind,
                    value: value(name, current),
                    tags: tags(None),
                });
            }
        }
        Locator::ByName { .. } => {
            for (name, current) in current_set.iter() {
                out.push(Metric {
                    name: format!("{}.{}", rule.metric, to_snake_case(name)),
                    kind: rule.kind,
                    value: value(name, current),
                    tags: tags(None),
                });
            }
        }
        Locator::ByTag { tag, .. } => {
            for (name, current) in current_set.iter() {
                out.push(Metric {
                    name: rule.metric.clone(),
                    kind: rule.kind,
                    value: value(name, current),
                    tags: tags(Some(format!("{}:{}", tag, name.to_lowercase()))),
                });
            }
        }
    }
}
