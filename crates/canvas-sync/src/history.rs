//! Sync history: which remote note each canvas node produced, and the content
//! hash it had when it was pushed.
//!
//! The history is loaded once before a run and saved once after it. Entries
//! are never deleted automatically; the orchestrator prunes an entry only
//! when the remote contradicts it (note gone and recreation rejected).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;

use crate::remote::NoteId;

/// Current on-disk format version.
pub const HISTORY_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid history data: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Unsupported history version {0}")]
    UnsupportedVersion(u32),
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// One previously-synced node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub node_id: String,
    pub remote_note_id: NoteId,
    pub content_hash: String,
    pub last_sync_time: DateTime<Utc>,
}

/// All records for one canvas, keyed by node id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHistory {
    pub version: u32,
    #[serde(default)]
    pub entries: BTreeMap<String, SyncRecord>,
}

impl Default for SyncHistory {
    fn default() -> Self {
        Self {
            version: HISTORY_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

impl SyncHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &str) -> Option<&SyncRecord> {
        self.entries.get(node_id)
    }

    /// Add or update the record for `record.node_id`.
    pub fn upsert(&mut self, record: SyncRecord) {
        self.entries.insert(record.node_id.clone(), record);
    }

    pub fn remove(&mut self, node_id: &str) -> Option<SyncRecord> {
        self.entries.remove(node_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let history: SyncHistory = serde_json::from_str(json)?;
        if history.version > HISTORY_VERSION {
            return Err(HistoryError::UnsupportedVersion(history.version));
        }
        Ok(history)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Durable home of a [`SyncHistory`].
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Load the history; a store that has never been saved yields an empty one.
    async fn load(&self) -> Result<SyncHistory>;

    /// Replace the stored history.
    async fn save(&self, history: &SyncHistory) -> Result<()>;
}

/// In-memory history store for testing and embedding.
#[derive(Default)]
pub struct MemoryHistoryStore {
    history: RwLock<SyncHistory>,
    saves: RwLock<usize>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: SyncHistory) -> Self {
        Self {
            history: RwLock::new(history),
            saves: RwLock::new(0),
        }
    }

    /// Snapshot of the stored history.
    pub fn snapshot(&self) -> SyncHistory {
        self.history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// How many times `save` has been called.
    pub fn save_count(&self) -> usize {
        *self.saves.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn load(&self) -> Result<SyncHistory> {
        Ok(self.snapshot())
    }

    async fn save(&self, history: &SyncHistory) -> Result<()> {
        *self.history.write().unwrap_or_else(|e| e.into_inner()) = history.clone();
        *self.saves.write().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}
