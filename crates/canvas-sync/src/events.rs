//! Progress reporting for sync runs.
//!
//! Provides `SyncProgress` snapshots and an `EventBus` that fans them out to
//! subscribers. The orchestrator emits one snapshot per stage change and per
//! completed batch; the last snapshot of a run always has a terminal status.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Lifecycle of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    Idle,
    Connecting,
    Syncing,
    Completed,
    Error,
    Cancelled,
}

impl SyncStatus {
    /// Whether a run has ended in this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Error | SyncStatus::Cancelled
        )
    }
}

/// A progress snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub status: SyncStatus,
    /// Nodes processed so far.
    pub current: usize,
    /// Nodes scheduled for this run.
    pub total: usize,
    pub message: String,
    pub errors: Vec<String>,
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::idle()
    }
}

impl SyncProgress {
    pub fn idle() -> Self {
        Self {
            status: SyncStatus::Idle,
            current: 0,
            total: 0,
            message: String::new(),
            errors: Vec::new(),
        }
    }

    pub fn new(status: SyncStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            ..Self::idle()
        }
    }

    pub fn with_counts(mut self, current: usize, total: usize) -> Self {
        self.current = current;
        self.total = total;
        self
    }

    pub fn with_errors(mut self, errors: &[String]) -> Self {
        self.errors = errors.to_vec();
        self
    }
}

type Listener = Arc<dyn Fn(&SyncProgress) + Send + Sync>;

/// Keeps a listener registered for as long as it lives.
pub struct Subscription {
    bus: Weak<EventBus>,
    key: u64,
}

impl Subscription {
    /// Drop the listener now instead of at end of scope.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        bus.remove_listener(self.key);
    }
}

/// Fans progress snapshots out to listeners. Subscribing needs an `Arc<EventBus>`.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<BTreeMap<u64, Listener>>,
    next_key: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&SyncProgress) + Send + Sync + 'static,
    ) -> Subscription {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, Arc::new(listener));
        Subscription {
            bus: Arc::downgrade(self),
            key,
        }
    }

    fn remove_listener(&self, key: u64) {
        // May run while `emit` holds the read lock (drop inside a listener).
        if let Ok(mut listeners) = self.listeners.try_write() {
            listeners.remove(&key);
        }
    }

    pub fn emit(&self, progress: &SyncProgress) {
        // Snapshot first: listeners are allowed to subscribe.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        listeners.iter().for_each(|listener| listener(progress));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
