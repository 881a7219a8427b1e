//! Sync behavior settings.

use serde::{Deserialize, Serialize};

use crate::canvas::CanvasColor;

pub const DEFAULT_DECK: &str = "Obsidian Canvas";
pub const DEFAULT_MODEL: &str = "Obsidian Canvas Card";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_DIVIDER: &str = "---";

/// What to sync and how. Connection details live with the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    /// Target deck; created when missing.
    pub deck_name: String,
    /// Name of the engine-owned note type.
    pub model_name: String,
    /// Color allow-list used by incremental sync. Empty means every node.
    pub colors: Vec<CanvasColor>,
    /// Skip nodes whose content hash is unchanged since the last push.
    pub incremental_sync: bool,
    /// Push every node regardless of its recorded hash.
    pub force_sync: bool,
    pub batch_size: usize,
    /// Separates the front of a card from its back inside node text.
    pub divider: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            deck_name: DEFAULT_DECK.to_string(),
            model_name: DEFAULT_MODEL.to_string(),
            colors: Vec::new(),
            incremental_sync: true,
            force_sync: false,
            batch_size: DEFAULT_BATCH_SIZE,
            divider: DEFAULT_DIVIDER.to_string(),
        }
    }
}

impl SyncSettings {
    /// Whether unchanged nodes may be skipped without touching the remote.
    pub fn hash_skip_enabled(&self) -> bool {
        self.incremental_sync && !self.force_sync
    }

    /// Batch size clamped to at least one node.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}
