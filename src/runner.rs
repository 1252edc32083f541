//! Scheduling of configured check instances.
//!
//! Every instance gets its own task ticking on the configured interval. All
//! BIND instances share one [`InstanceStateStore`].

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bind::state::InstanceStateStore;
use crate::bind::BindCheck;
use crate::config::{Config, InstanceId};
use crate::error::CheckError;
use crate::file_grep::FileGrepCheck;
use crate::sink::Sink;
use crate::status_process::StatusProcessCheck;

enum Check {
    Bind(BindCheck),
    FileGrep(FileGrepCheck),
    StatusProcess(StatusProcessCheck),
}

impl Check {
    fn label(&self) -> String {
        match self {
            Check::Bind(c) => format!("bind:{}", c.instance().url()),
            Check::FileGrep(_) => "file_grep".to_string(),
            Check::StatusProcess(_) => "status_process".to_string(),
        }
    }

    async fn run_once(&self, store: &InstanceStateStore, sink: &dyn Sink) {
        match self {
            Check::Bind(check) => {
                if let Err(e) = check.poll(store, sink).await {
                    debug!(instance = %check.id(), error = %e, "bind poll failed");
                }
            }
            Check::FileGrep(check) => {
                check.poll(sink).await;
            }
            Check::StatusProcess(check) => {
                if let Err(e) = check.poll(sink).await {
                    debug!(error = %e, "status_process poll failed");
                }
            }
        }
    }
}

/// Runs every configured instance until cancelled.
pub struct Runner {
    checks: Vec<Arc<Check>>,
    interval: Duration,
    sink: Arc<dyn Sink>,
    store: InstanceStateStore,
}

impl Runner {
    /// Build the checks described by `config`, emitting to `sink`.
    pub fn new(config: &Config, sink: Arc<dyn Sink>) -> Result<Self, CheckError> {
        let mut checks = Vec::new();

        for instance in &config.bind {
            let id = InstanceId::derive(instance)?;
            checks.push(Arc::new(Check::Bind(BindCheck::new(instance.clone(), id)?)));
        }
        for instance in &config.file_grep {
            checks.push(Arc::new(Check::FileGrep(FileGrepCheck::new(instance.clone()))));
        }
        for instance in &config.status_process {
            checks.push(Arc::new(Check::StatusProcess(StatusProcessCheck::new(
                instance.clone(),
            ))));
        }

        if checks.is_empty() {
            warn!("no check instances configured");
        }

        Ok(Self {
            checks,
            interval: config.interval(),
            sink,
            store: InstanceStateStore::new(),
        })
    }

    /// Number of configured instances.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// True when nothing is configured.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// State shared by the BIND instances.
    pub fn store(&self) -> &InstanceStateStore {
        &self.store
    }

    /// Poll every instance once, concurrently.
    pub async fn poll_once(&self) {
        join_all(
            self.checks
                .iter()
                .map(|check| check.run_once(&self.store, self.sink.as_ref())),
        )
        .await;
    }

    /// Poll on the interval until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        info!(
            instances = self.checks.len(),
            interval_secs = self.interval.as_secs(),
            "starting checks"
        );

        let mut handles = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            let check = check.clone();
            let store = self.store.clone();
            let sink = self.sink.clone();
            let token = token.clone();
            let interval = self.interval;
            handles.push(tokio::spawn(async move {
                check_loop(check, store, sink, interval, token).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "check task panicked");
            }
        }

        info!("all checks stopped");
    }
}

async fn check_loop(
    check: Arc<Check>,
    store: InstanceStateStore,
    sink: Arc<dyn Sink>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                check.run_once(&store, sink.as_ref()).await;
            }
            _ = token.cancelled() => {
                debug!(check = %check.label(), "check loop shutting down");
                return;
            }
        }
    }
}
