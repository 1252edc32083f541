//! Agent checks - polling monitors for BIND/named and local health probes.
//!
//! The BIND check polls named's XML statistics channel, turns its counters
//! into metrics, reports zone serial changes between polls, and verifies that
//! each zone's serial matches the one served by its master.
//!
//! ## Features
//!
//! - Counter deltas between consecutive polls, per instance
//! - `bind.serial_change` events when a zone's serial moves
//! - `bind.zone_sync` service checks comparing local and master SOA serials
//! - File content and process exit code checks
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                           agent-checks                            │
//! │                                                                   │
//! │  ┌──────────┐  tick   ┌──────────────┐  XML   ┌──────────────┐    │
//! │  │  Runner  │────────▶│  BindCheck   │◀───────│ named :8053  │    │
//! │  └──────────┘         └──────┬───────┘        └──────────────┘    │
//! │       │                      │ swap                               │
//! │       │                      ▼                                    │
//! │       │           ┌────────────────────┐                          │
//! │       │           │ InstanceStateStore │                          │
//! │       │           └─────────┬──────────┘                          │
//! │       │                     │ previous, current                   │
//! │       │           ┌─────────┴──────────┐   SOA/A   ┌───────────┐  │
//! │       │           │ deltas │ serials   │◀─────────▶│ resolver, │  │
//! │       │           │        │ zone sync │  UDP/TCP  │ masters   │  │
//! │       │           └─────────┬──────────┘           └───────────┘  │
//! │       ▼                     ▼                                     │
//! │  ┌──────────────────────────────────┐                             │
//! │  │ Sink (metrics facade / tracing)  │                             │
//! │  └──────────────────────────────────┘                             │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use agent_checks::{BindInstance, Config, MetricsSink, Runner};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config {
//!         bind: vec![BindInstance {
//!             host: "127.0.0.1".to_string(),
//!             port: 8053,
//!             ..BindInstance::default()
//!         }],
//!         ..Config::default()
//!     };
//!
//!     let runner = Runner::new(&config, Arc::new(MetricsSink)).unwrap();
//!     runner.run(CancellationToken::new()).await;
//! }
//! ```

#![warn(missing_docs)]

pub mod bind;
pub mod config;
pub mod error;
pub mod file_grep;
pub mod metrics;
pub mod runner;
pub mod sink;
pub mod status_process;
pub mod telemetry;

// Re-export main types
pub use bind::state::InstanceStateStore;
pub use bind::BindCheck;
pub use config::{BindInstance, Config, InstanceId, TelemetryConfig};
pub use error::{CheckError, ResolutionError};
pub use runner::Runner;
pub use sink::{MetricsSink, RecordingSink, ServiceCheckStatus, Sink};
