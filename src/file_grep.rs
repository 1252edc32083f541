//! File content match check.
//!
//! Reports the file size and whether the file contains a given string.

use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::FileGrepInstance;
use crate::error::CheckError;
use crate::metrics::{self, PollResult, Timer};
use crate::sink::{Metric, MetricKind, ServiceCheck, ServiceCheckStatus, Sink};

/// Integration name.
pub const SOURCE_TYPE_NAME: &str = "file_grep";
/// Service check reporting the match.
pub const SERVICE_CHECK_NAME: &str = "file_grep.match_ok";
/// Gauge reporting the file size in bytes.
pub const SIZE_METRIC: &str = "file_grep.size";

/// Size of the file and whether the needle was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrepOutcome {
    /// File size in bytes.
    pub size: u64,
    /// True if the needle occurs in the file.
    pub found: bool,
}

/// Search `path` for `needle` through a read-only memory map.
pub fn grep_file(path: &Path, needle: &[u8]) -> Result<GrepOutcome, CheckError> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();

    // Zero-length files cannot be mapped.
    if size == 0 {
        return Ok(GrepOutcome {
            size,
            found: needle.is_empty(),
        });
    }

    // SAFETY: the map is read-only and dropped before returning. A concurrent
    // truncation by another process is the usual mmap caveat.
    let map = unsafe { Mmap::map(&file)? };
    Ok(GrepOutcome {
        size,
        found: contains(&map, needle),
    })
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// File grep check.
#[derive(Debug, Clone)]
pub struct FileGrepCheck {
    instance: FileGrepInstance,
}

impl FileGrepCheck {
    /// Check for `instance`.
    pub fn new(instance: FileGrepInstance) -> Self {
        Self { instance }
    }

    /// Run one poll, emitting to `sink`. Returns the status reported.
    pub async fn poll(&self, sink: &dyn Sink) -> ServiceCheckStatus {
        let timer = Timer::start();
        debug!(file = %self.instance.file, "starting check run");

        let path = self.instance.file.clone();
        let needle = self.instance.search_string.clone().into_bytes();
        let result = tokio::task::spawn_blocking(move || grep_file(Path::new(&path), &needle))
            .await
            .unwrap_or_else(|e| Err(CheckError::Io(std::io::Error::other(e))));

        let mut tags = vec![format!("check_name:{}", self.instance.name)];
        tags.extend(self.instance.tags.iter().cloned());

        let (status, poll_result) = match result {
            Ok(outcome) => {
                if self.instance.additional_metrics {
                    let mut size_tags = vec![format!("file:{}", self.instance.file)];
                    size_tags.extend(self.instance.tags.iter().cloned());
                    sink.metric(Metric {
                        name: SIZE_METRIC.to_string(),
                        kind: MetricKind::Gauge,
                        value: outcome.size,
                        tags: size_tags,
                    });
                }
                if outcome.found {
                    debug!(file = %self.instance.file, "match");
                    (ServiceCheckStatus::Ok, PollResult::Success)
                } else {
                    debug!(file = %self.instance.file, "no match");
                    (ServiceCheckStatus::Critical, PollResult::Success)
                }
            }
            Err(e) => {
                warn!(file = %self.instance.file, error = %e, "cannot search file");
                (ServiceCheckStatus::Unknown, PollResult::Error)
            }
        };

        sink.service_check(ServiceCheck {
            name: SERVICE_CHECK_NAME.to_string(),
            status,
            message: None,
            tags,
        });
        metrics::record_poll(SOURCE_TYPE_NAME, poll_result, timer.elapsed());
        status
    }
}
