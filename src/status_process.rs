//! Process exit code check.
//!
//! Runs a shell command and maps its exit code to a service check status.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::StatusProcessInstance;
use crate::error::CheckError;
use crate::metrics::{self, PollResult, Timer};
use crate::sink::{ServiceCheck, ServiceCheckStatus, Sink};

/// Integration name.
pub const SOURCE_TYPE_NAME: &str = "status_process";
/// Service check reporting the command's health.
pub const HEALTH_CHECK: &str = "status_process.ok";

/// How the command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Exited with this code.
    Exited(i32),
    /// Killed by a signal.
    Signaled,
    /// Still running when the timeout fired; it was killed.
    TimedOut,
}

/// Run `command` through `sh -c`, killing it after `timeout`.
pub async fn run_command(command: &str, timeout: Duration) -> Result<Outcome, CheckError> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => Ok(match status?.code() {
            Some(code) => Outcome::Exited(code),
            None => Outcome::Signaled,
        }),
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!(command, error = %e, "failed to kill timed out command");
            }
            Ok(Outcome::TimedOut)
        }
    }
}

/// Exit code check.
#[derive(Debug, Clone)]
pub struct StatusProcessCheck {
    instance: StatusProcessInstance,
}

impl StatusProcessCheck {
    /// Check for `instance`.
    pub fn new(instance: StatusProcessInstance) -> Self {
        Self { instance }
    }

    /// Status for an outcome, with the extra tag it carries.
    pub fn classify(&self, outcome: Outcome) -> (ServiceCheckStatus, Option<&'static str>) {
        match outcome {
            Outcome::Exited(code) if self.instance.return_codes.contains(&code) => {
                (ServiceCheckStatus::Ok, None)
            }
            Outcome::TimedOut => (ServiceCheckStatus::Warning, Some("timeout")),
            Outcome::Exited(_) | Outcome::Signaled => (ServiceCheckStatus::Critical, None),
        }
    }

    /// Run one poll, emitting to `sink`.
    pub async fn poll(&self, sink: &dyn Sink) -> Result<ServiceCheckStatus, CheckError> {
        let timer = Timer::start();
        let mut tags = vec![format!("check_name:{}", self.instance.check_name)];
        tags.extend(self.instance.tags.iter().cloned());

        let timeout = Duration::from_secs(self.instance.timeout_secs);
        let outcome = match run_command(&self.instance.command, timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(command = %self.instance.command, error = %e, "cannot run command");
                sink.service_check(ServiceCheck {
                    name: HEALTH_CHECK.to_string(),
                    status: ServiceCheckStatus::Unknown,
                    message: Some(e.to_string()),
                    tags,
                });
                metrics::record_poll(SOURCE_TYPE_NAME, PollResult::Error, timer.elapsed());
                return Err(e);
            }
        };
        debug!(command = %self.instance.command, ?outcome, "command finished");

        let (status, extra_tag) = self.classify(outcome);
        tags.extend(extra_tag.map(String::from));
        sink.service_check(ServiceCheck {
            name: HEALTH_CHECK.to_string(),
            status,
            message: None,
            tags,
        });
        metrics::record_poll(SOURCE_TYPE_NAME, PollResult::Success, timer.elapsed());
        Ok(status)
    }
}
