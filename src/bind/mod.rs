//! BIND/named check.
//!
//! One poll of an instance:
//!
//! ```text
//! fetch statistics ──▶ swap into state store ──▶ counter deltas
//!        │                                   └─▶ zone serial changes (events)
//!        └─▶ per zone: SOA @resolver → A(mname) → SOA @master  (bind.zone_sync)
//! ```
//!
//! A failed fetch or parse reports CRITICAL on `bind.can_connect` and ends the
//! poll. A failed DNS walk only affects that zone's `bind.zone_sync`.

pub mod delta;
pub mod state;
pub mod stats;
pub mod sync;
pub mod zones;

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::{BindInstance, InstanceId};
use crate::error::CheckError;
use crate::metrics::{self, PollResult, Timer};
use crate::sink::{Event, ServiceCheck, ServiceCheckStatus, Sink};

use self::delta::BIND_METRICS;
use self::state::InstanceStateStore;
use self::stats::{StatsClient, DEFAULT_VIEW};
use self::sync::{DnsLookup, MasterSyncVerifier, ServerLookup, ZoneSync};
use self::zones::SerialChange;

/// Integration name.
pub const SOURCE_TYPE_NAME: &str = "bind";
/// Service check reporting whether the statistics channel answered.
pub const SERVICE_CHECK_NAME: &str = "bind.can_connect";
/// Service check reporting each zone's sync with its master.
pub const SERIAL_CHECK_NAME: &str = "bind.zone_sync";
/// Event type of zone serial changes.
pub const SERIAL_CHANGE_EVENT: &str = "bind.serial_change";

/// What one successful poll produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// True when a previous snapshot was available to diff against.
    pub diffed: bool,
    /// Metric samples emitted.
    pub metrics: usize,
    /// Serial-change events emitted.
    pub events: usize,
    /// Zones whose master sync was checked.
    pub zones_checked: usize,
    /// Zones reported CRITICAL.
    pub zones_critical: usize,
}

/// BIND/named check.
pub struct BindCheck<L = ServerLookup> {
    instance: BindInstance,
    id: InstanceId,
    client: StatsClient,
    verifier: MasterSyncVerifier<L>,
}

impl BindCheck<ServerLookup> {
    /// Check for `instance`, querying the configured DNS servers directly.
    pub fn new(instance: BindInstance, id: InstanceId) -> Result<Self, CheckError> {
        let lookup = ServerLookup::new(instance.dns_port, instance.dns_timeout());
        Self::with_lookup(instance, id, lookup)
    }
}

impl<L: DnsLookup> BindCheck<L> {
    /// Check for `instance` with a custom DNS lookup implementation.
    pub fn with_lookup(instance: BindInstance, id: InstanceId, lookup: L) -> Result<Self, CheckError> {
        let client = StatsClient::new(instance.timeout())?;
        let verifier = MasterSyncVerifier::new(lookup, instance.resolver);
        Ok(Self {
            instance,
            id,
            client,
            verifier,
        })
    }

    /// Configuration of this instance.
    pub fn instance(&self) -> &BindInstance {
        &self.instance
    }

    /// Identity used as the state store key.
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// Run one poll, emitting everything to `sink`.
    ///
    /// Polls of the same instance id are serialized through `store`.
    pub async fn poll(
        &self,
        store: &InstanceStateStore,
        sink: &dyn Sink,
    ) -> Result<PollReport, CheckError> {
        let timer = Timer::start();
        let url = self.instance.url();
        debug!(%url, "starting check run");

        let handle = store.get_or_create(&self.id);
        let mut state = handle.lock().await;

        let snapshot = match self.client.fetch(&url).await {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                let message = match &e {
                    CheckError::Timeout { .. } => format!("Timeout hitting {}.", url),
                    other => format!("Error hitting {}. Error: {}", url, other),
                };
                error!(%url, error = %e, "statistics fetch failed");
                sink.service_check(ServiceCheck {
                    name: SERVICE_CHECK_NAME.to_string(),
                    status: ServiceCheckStatus::Critical,
                    message: Some(message),
                    tags: self.instance.tags.clone(),
                });
                let result = if e.is_connectivity() {
                    PollResult::ConnectivityError
                } else {
                    PollResult::ParseError
                };
                metrics::record_poll(SOURCE_TYPE_NAME, result, timer.elapsed());
                return Err(e);
            }
        };

        let previous = state.replace(snapshot.clone());

        let mut report = PollReport {
            diffed: previous.is_some(),
            ..PollReport::default()
        };

        let samples = delta::evaluate(
            &BIND_METRICS,
            previous.as_deref(),
            &snapshot,
            &self.instance.tags,
        );
        report.metrics = samples.len();
        for sample in samples {
            sink.metric(sample);
        }

        if let Some(previous) = previous.as_deref() {
            let changes = zones::changed(
                &zones::extract_serials(previous),
                &zones::extract_serials(&snapshot),
            );
            report.events = changes.len();
            for (zone, change) in &changes {
                sink.event(self.serial_change_event(zone, change));
                metrics::record_serial_change(change.kind());
            }
        }

        let zone_names: Vec<&str> = snapshot
            .zones(DEFAULT_VIEW)
            .unwrap_or_default()
            .iter()
            .map(|z| z.name.as_str())
            .collect();
        debug!(zones = zone_names.len(), "checking serial against master");

        let results = join_all(zone_names.iter().map(|zone| self.check_zone(zone))).await;
        report.zones_checked = results.len();
        for (zone, (status, message)) in zone_names.iter().zip(results) {
            if status == ServiceCheckStatus::Critical {
                report.zones_critical += 1;
            }
            let mut tags = vec![format!("zone:{}", zone)];
            tags.extend(self.instance.tags.iter().cloned());
            sink.service_check(ServiceCheck {
                name: SERIAL_CHECK_NAME.to_string(),
                status,
                message,
                tags,
            });
        }

        sink.service_check(ServiceCheck {
            name: SERVICE_CHECK_NAME.to_string(),
            status: ServiceCheckStatus::Ok,
            message: None,
            tags: self.instance.tags.clone(),
        });

        metrics::record_poll(SOURCE_TYPE_NAME, PollResult::Success, timer.elapsed());
        debug!(?report, "finishing check run");
        Ok(report)
    }

    /// Status and optional detail for one zone's `bind.zone_sync`.
    async fn check_zone(&self, zone: &str) -> (ServiceCheckStatus, Option<String>) {
        let timer = Timer::start();
        let result = match self.verifier.verify(zone).await {
            Ok(ZoneSync::InSync { serial }) => {
                debug!(zone, serial, "zone in sync with master");
                (ServiceCheckStatus::Ok, None)
            }
            Ok(ZoneSync::Drifted {
                local,
                master,
                master_addr,
            }) => {
                warn!(zone, local, master, %master_addr, "zone serial differs from master");
                (
                    ServiceCheckStatus::Critical,
                    Some(format!(
                        "Serial {} differs from master {} ({})",
                        local, master, master_addr
                    )),
                )
            }
            Err(e) => {
                warn!(zone, error = %e, "could not verify zone against master");
                (ServiceCheckStatus::Critical, Some(e.to_string()))
            }
        };
        metrics::record_zone_sync(result.0, timer.elapsed());
        result
    }

    fn serial_change_event(&self, zone: &str, change: &SerialChange) -> Event {
        let mut tags = vec![format!("bind_zone:{}", zone)];
        tags.extend(self.instance.tags.iter().cloned());
        Event {
            event_type: SERIAL_CHANGE_EVENT.to_string(),
            source_type: SOURCE_TYPE_NAME.to_string(),
            title: format!("Serial change on zone {}", zone),
            text: change.message(zone),
            aggregation_key: zone.to_string(),
            tags,
        }
    }
}
