//! File-backed `HistoryStore`.

use async_trait::async_trait;
use canvas_sync::history::Result;
use canvas_sync::{HistoryStore, SyncHistory};
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Stores a [`SyncHistory`] as pretty-printed JSON at a fixed path.
///
/// A missing file loads as an empty history; parent directories are created
/// on save.
#[derive(Debug, Clone)]
pub struct JsonFileHistoryStore {
    path: PathBuf,
}

impl JsonFileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn random_hex() -> String {
        let bytes: [u8; 8] = rand::rng().random();
        hex::encode(bytes)
    }

    /// Write to a sibling temp file, then rename over the target.
    async fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
        let temp_path = path.with_extension(format!("{}.tmp", Self::random_hex()));

        if let Err(e) = fs::write(&temp_path, content).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for JsonFileHistoryStore {
    async fn load(&self) -> Result<SyncHistory> {
        if !fs::try_exists(&self.path).await? {
            debug!("No sync history at {:?}, starting fresh", self.path);
            return Ok(SyncHistory::new());
        }
        let json = fs::read_to_string(&self.path).await?;
        let history = SyncHistory::from_json(&json)?;
        debug!("Loaded {} history entries from {:?}", history.len(), self.path);
        Ok(history)
    }

    async fn save(&self, history: &SyncHistory) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        Self::atomic_write(&self.path, &history.to_json()?).await?;
        debug!("Saved {} history entries to {:?}", history.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_sync::{HistoryError, SyncRecord};

    fn history_with(node_id: &str, note_id: i64) -> SyncHistory {
        let json = format!(
            r#"{{"version": 1, "entries": {{"{id}": {{
                "nodeId": "{id}",
                "remoteNoteId": {note},
                "contentHash": "abc",
                "lastSyncTime": "2024-05-01T12:00:00Z"
            }}}}}}"#,
            id = node_id,
            note = note_id
        );
        SyncHistory::from_json(&json).unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileHistoryStore::new(dir.path().join("none.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_creates_parent_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".canvas-anki").join("board.history.json");
        let store = JsonFileHistoryStore::new(&path);

        let history = history_with("n1", 42);
        store.save(&history).await.unwrap();

        assert!(path.exists());
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, history);
        let record: &SyncRecord = loaded.get("n1").unwrap();
        assert_eq!(record.remote_note_id, 42);
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileHistoryStore::new(dir.path().join("h.json"));
        store.save(&history_with("a", 1)).await.unwrap();
        store.save(&history_with("b", 2)).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["h.json"]);
        assert!(store.load().await.unwrap().get("b").is_some());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.json");
        std::fs::write(&path, "not json").unwrap();

        let store = JsonFileHistoryStore::new(&path);
        assert!(matches!(store.load().await, Err(HistoryError::Format(_))));
    }
}
