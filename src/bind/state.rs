//! Per-instance snapshot store.
//!
//! Each instance id owns one slot holding the last fetched [`Snapshot`]. A
//! slot is guarded by an async mutex held for a whole poll, so two polls of
//! the same instance run one after the other while polls of different
//! instances never touch each other's slot.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::bind::stats::Snapshot;
use crate::config::InstanceId;
use crate::metrics;

/// State kept for one instance between polls.
#[derive(Debug, Default)]
pub struct InstanceState {
    snapshot: Option<Arc<Snapshot>>,
}

/// Handle to one instance's slot.
#[derive(Debug, Clone)]
pub struct StateHandle {
    slot: Arc<Mutex<InstanceState>>,
}

impl StateHandle {
    /// Wait for exclusive access to the slot.
    pub async fn lock(&self) -> StateGuard {
        StateGuard {
            guard: self.slot.clone().lock_owned().await,
        }
    }
}

/// Exclusive access to one instance's state for the duration of a poll.
#[derive(Debug)]
pub struct StateGuard {
    guard: OwnedMutexGuard<InstanceState>,
}

impl StateGuard {
    /// The stored snapshot, if any.
    ///
    /// Snapshots are immutable and shared, so the returned value is unaffected
    /// by a later [`update`](Self::update).
    pub fn snapshot_before_update(&self) -> Option<Arc<Snapshot>> {
        self.guard.snapshot.clone()
    }

    /// Replace the stored snapshot.
    pub fn update(&mut self, snapshot: Arc<Snapshot>) {
        self.guard.snapshot = Some(snapshot);
    }

    /// Store `snapshot` and return the one it replaced.
    pub fn replace(&mut self, snapshot: Arc<Snapshot>) -> Option<Arc<Snapshot>> {
        let previous = self.snapshot_before_update();
        self.update(snapshot);
        previous
    }
}

/// Thread-safe mapping from instance id to its state.
#[derive(Debug, Clone, Default)]
pub struct InstanceStateStore {
    inner: Arc<RwLock<HashMap<InstanceId, StateHandle>>>,
}

impl InstanceStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `id`, creating an empty slot on first sight.
    pub fn get_or_create(&self, id: &InstanceId) -> StateHandle {
        if let Some(handle) = self.inner.read().get(id) {
            return handle.clone();
        }

        let mut inner = self.inner.write();
        let handle = inner
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(instance = %id, "tracking new instance");
                StateHandle {
                    slot: Arc::new(Mutex::new(InstanceState::default())),
                }
            })
            .clone();
        metrics::record_tracked_instances(inner.len());
        handle
    }

    /// Number of instances seen so far.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True if no instance has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
