//! Observations emitted by the checks and where they go.
//!
//! The host agent owns delivery. Checks only hand each metric, service check
//! and event to a [`Sink`].

use metrics::Label;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// How a metric value should be interpreted upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Point-in-time value.
    Gauge,
    /// Increase of a monotonic counter since the previous poll.
    MonotonicCount,
}

/// A single metric sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Metric name (e.g., "bind.network.requestv4").
    pub name: String,
    /// Gauge or monotonic increment.
    pub kind: MetricKind,
    /// Sample value.
    pub value: u64,
    /// `key:value` tags.
    pub tags: Vec<String>,
}

/// Service check status, numbered the way monitoring agents expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceCheckStatus {
    /// Healthy.
    Ok = 0,
    /// Degraded.
    Warning = 1,
    /// Failing.
    Critical = 2,
    /// Could not be determined.
    Unknown = 3,
}

impl ServiceCheckStatus {
    /// Lower-case name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCheckStatus::Ok => "ok",
            ServiceCheckStatus::Warning => "warning",
            ServiceCheckStatus::Critical => "critical",
            ServiceCheckStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServiceCheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a health probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCheck {
    /// Check name (e.g., "bind.can_connect").
    pub name: String,
    /// Status.
    pub status: ServiceCheckStatus,
    /// Optional human-readable detail.
    pub message: Option<String>,
    /// `key:value` tags.
    pub tags: Vec<String>,
}

/// A discrete occurrence worth a line in the event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event type (e.g., "bind.serial_change").
    pub event_type: String,
    /// Integration that produced the event.
    pub source_type: String,
    /// Short title.
    pub title: String,
    /// Free-text body.
    pub text: String,
    /// Key used upstream to group related events.
    pub aggregation_key: String,
    /// `key:value` tags.
    pub tags: Vec<String>,
}

/// Receiver of everything a check emits.
pub trait Sink: Send + Sync {
    /// Submit a metric sample.
    fn metric(&self, metric: Metric);

    /// Submit a service check result.
    fn service_check(&self, check: ServiceCheck);

    /// Submit an event.
    fn event(&self, event: Event);
}

/// Sink forwarding metrics and service checks to the `metrics` facade, and
/// events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

impl Sink for MetricsSink {
    fn metric(&self, metric: Metric) {
        let labels = tags_to_labels(&metric.tags);
        match metric.kind {
            MetricKind::Gauge => {
                metrics::gauge!(metric.name, labels).set(metric.value as f64);
            }
            MetricKind::MonotonicCount => {
                metrics::counter!(metric.name, labels).increment(metric.value);
            }
        }
    }

    fn service_check(&self, check: ServiceCheck) {
        info!(
            check = %check.name,
            status = %check.status,
            message = check.message.as_deref().unwrap_or(""),
            tags = ?check.tags,
            "service check"
        );
        let labels = tags_to_labels(&check.tags);
        metrics::gauge!(check.name, labels).set(check.status as u8 as f64);
    }

    fn event(&self, event: Event) {
        info!(
            event_type = %event.event_type,
            source_type = %event.source_type,
            aggregation_key = %event.aggregation_key,
            tags = ?event.tags,
            title = %event.title,
            "{}",
            event.text
        );
    }
}

/// Convert `key:value` tags into metric labels. A tag without a colon becomes
/// a label with an empty value.
pub fn tags_to_labels(tags: &[String]) -> Vec<Label> {
    tags.iter()
        .map(|tag| match tag.split_once(':') {
            Some((key, value)) => Label::new(key.to_string(), value.to_string()),
            None => Label::new(tag.clone(), String::new()),
        })
        .collect()
}

/// Sink that keeps everything in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    inner: Arc<Mutex<Recorded>>,
}

#[derive(Debug, Default)]
struct Recorded {
    metrics: Vec<Metric>,
    service_checks: Vec<ServiceCheck>,
    events: Vec<Event>,
}

impl RecordingSink {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All metric samples received so far.
    pub fn metrics(&self) -> Vec<Metric> {
        self.inner.lock().metrics.clone()
    }

    /// All service checks received so far.
    pub fn service_checks(&self) -> Vec<ServiceCheck> {
        self.inner.lock().service_checks.clone()
    }

    /// All events received so far.
    pub fn events(&self) -> Vec<Event> {
        self.inner.lock().events.clone()
    }

    /// Samples of one metric name.
    pub fn metrics_named(&self, name: &str) -> Vec<Metric> {
        self.inner
            .lock()
            .metrics
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    /// Service checks of one name.
    pub fn service_checks_named(&self, name: &str) -> Vec<ServiceCheck> {
        self.inner
            .lock()
            .service_checks
            .iter()
            .filter(|c| c.name == name)
            .cloned()
            .collect()
    }

    /// Drop everything recorded so far.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.clear();
        inner.service_checks.clear();
        inner.events.clear();
    }
}

impl Sink for RecordingSink {
    fn metric(&self, metric: Metric) {
        self.inner.lock().metrics.push(metric);
    }

    fn service_check(&self, check: ServiceCheck) {
        self.inner.lock().service_checks.push(check);
    }

    fn event(&self, event: Event) {
        self.inner.lock().events.push(event);
    }
}
