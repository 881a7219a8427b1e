//! SyncOrchestrator: drives one sync run from node selection to history save.
//!
//! A run moves through `Connecting -> Syncing -> {Completed | Cancelled}`.
//! Readiness failures (connectivity, note type, deck) abort the run before any
//! note is touched and come back as `Err`. Per-node failures never abort; they
//! are collected as `"<node id>: <reason>"` strings in the [`SyncResult`].

use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::canvas::{Canvas, CanvasColor, CanvasNode, SourceRef};
use crate::content_hash::ContentHash;
use crate::events::{EventBus, SyncProgress, SyncStatus};
use crate::groups::resolve_by_color;
use crate::history::{HistoryError, HistoryStore, SyncHistory, SyncRecord};
use crate::mapper::{ContentMapper, is_managed_tag};
use crate::remote::{NoteId, NoteInfo, RemoteNote, RemoteStore};
use crate::schema::SchemaManager;
use crate::settings::SyncSettings;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("A sync is already in progress")]
    AlreadyRunning,

    #[error("No syncable nodes in selection")]
    NothingToSync,

    #[error("Cannot reach the flashcard application")]
    Connectivity,

    #[error("Note type '{0}' could not be prepared")]
    Schema(String),

    #[error("Deck '{0}' could not be created")]
    Deck(String),

    #[error("History error: {0}")]
    History(#[from] HistoryError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Aggregated outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// Completed with no per-node errors.
    pub success: bool,
    /// `Completed` or `Cancelled`.
    pub status: SyncStatus,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub total_processed: usize,
    pub duration_ms: u64,
}

/// What happened to a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeOutcome {
    Created,
    Updated,
    Unchanged,
    Failed(String),
}

#[derive(Debug, Default)]
struct RunStats {
    created: usize,
    updated: usize,
    skipped: usize,
    errors: Vec<String>,
}

impl RunStats {
    fn record(&mut self, node_id: &str, outcome: NodeOutcome) {
        match outcome {
            NodeOutcome::Created => self.created += 1,
            NodeOutcome::Updated => self.updated += 1,
            NodeOutcome::Unchanged => self.skipped += 1,
            NodeOutcome::Failed(reason) => {
                self.skipped += 1;
                self.errors.push(format!("{}: {}", node_id, reason));
            }
        }
    }

    fn processed(&self) -> usize {
        self.created + self.updated + self.skipped
    }
}

/// Clears the single-flight flag on every exit path.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Split `items` into consecutive batches of at most `size` (0 counts as 1).
pub fn partition_batches<T>(items: &[T], size: usize) -> Vec<&[T]> {
    items.chunks(size.max(1)).collect()
}

/// Drop nodes that can never become cards, keeping the first of any
/// duplicate id.
pub fn validate_nodes(nodes: Vec<CanvasNode>) -> Vec<CanvasNode> {
    let mut seen = HashSet::new();
    nodes
        .into_iter()
        .filter(|node| {
            let reason = if node.id.is_empty() {
                Some("empty id")
            } else if node.is_group() {
                Some("group node")
            } else if !node.bounds().is_finite() {
                Some("invalid geometry")
            } else if !node.has_content() {
                Some("no content")
            } else if !seen.insert(node.id.clone()) {
                Some("duplicate id")
            } else {
                None
            };
            if let Some(reason) = reason {
                debug!("Dropping node '{}' ({}): {}", node.id, node.kind.name(), reason);
            }
            reason.is_none()
        })
        .collect()
}

/// `"field:value"` search term with the remote's wildcard and quote
/// characters escaped.
fn search_term(field: &str, value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '*' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("\"{}:{}\"", field, escaped)
}

/// Runs syncs of canvas nodes into a [`RemoteStore`], one at a time.
pub struct SyncOrchestrator<R: RemoteStore + ?Sized, H: HistoryStore + ?Sized> {
    remote: Arc<R>,
    history: Arc<H>,
    settings: SyncSettings,
    events: Arc<EventBus>,
    progress: RwLock<SyncProgress>,
    running: AtomicBool,
}

impl<R: RemoteStore + ?Sized, H: HistoryStore + ?Sized> SyncOrchestrator<R, H> {
    pub fn new(remote: Arc<R>, history: Arc<H>, settings: SyncSettings) -> Self {
        Self {
            remote,
            history,
            settings,
            events: Arc::new(EventBus::new()),
            progress: RwLock::new(SyncProgress::idle()),
            running: AtomicBool::new(false),
        }
    }

    /// Publish progress on an existing bus instead of a private one.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Latest progress snapshot.
    pub fn progress(&self) -> SyncProgress {
        self.progress
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Sync the nodes whose ids are listed, in document order.
    pub async fn sync_by_ids(
        &self,
        canvas: &Canvas,
        source: &SourceRef,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<SyncResult> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let nodes = canvas
            .nodes
            .iter()
            .filter(|n| wanted.contains(n.id.as_str()))
            .cloned()
            .collect();
        self.perform_sync(nodes, source, cancel).await
    }

    /// Sync nodes selected by color, including matching members of groups.
    pub async fn sync_by_colors(
        &self,
        canvas: &Canvas,
        source: &SourceRef,
        colors: &[CanvasColor],
        cancel: &CancellationToken,
    ) -> Result<SyncResult> {
        let nodes = resolve_by_color(&canvas.nodes, colors);
        self.perform_sync(nodes, source, cancel).await
    }

    /// Sync using the configured color allow-list, or every node when the
    /// list is empty.
    pub async fn sync_incremental(
        &self,
        canvas: &Canvas,
        source: &SourceRef,
        cancel: &CancellationToken,
    ) -> Result<SyncResult> {
        let nodes = if self.settings.colors.is_empty() {
            canvas
                .nodes
                .iter()
                .filter(|n| !n.is_group())
                .cloned()
                .collect()
        } else {
            resolve_by_color(&canvas.nodes, &self.settings.colors)
        };
        self.perform_sync(nodes, source, cancel).await
    }

    /// Push `nodes` to the remote store.
    pub async fn perform_sync(
        &self,
        nodes: Vec<CanvasNode>,
        source: &SourceRef,
        cancel: &CancellationToken,
    ) -> Result<SyncResult> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            warn!("Sync requested while another sync is running");
            return Err(SyncError::AlreadyRunning);
        };

        let started = Instant::now();
        let result = self.run(nodes, source, cancel, started).await;
        if let Err(e) = &result {
            error!("Sync aborted: {}", e);
            self.publish(SyncProgress::new(SyncStatus::Error, e.to_string()));
        }
        result
    }

    async fn run(
        &self,
        nodes: Vec<CanvasNode>,
        source: &SourceRef,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<SyncResult> {
        let nodes = validate_nodes(nodes);
        if nodes.is_empty() {
            return Err(SyncError::NothingToSync);
        }
        let total = nodes.len();
        info!("Starting sync of {} node(s) from {}", total, source.path);

        self.publish(
            SyncProgress::new(SyncStatus::Connecting, "Connecting to Anki").with_counts(0, total),
        );
        self.ensure_ready().await?;

        let mut history = self.history.load().await?;
        let mapper = ContentMapper::from_settings(&self.settings);
        let batches = partition_batches(&nodes, self.settings.effective_batch_size());
        let mut stats = RunStats::default();
        let mut status = SyncStatus::Completed;

        self.publish(
            SyncProgress::new(SyncStatus::Syncing, "Syncing").with_counts(0, total),
        );

        for (index, batch) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Sync cancelled before batch {}/{}", index + 1, batches.len());
                status = SyncStatus::Cancelled;
                break;
            }

            for node in batch.iter() {
                let outcome = self.sync_node(node, source, &mapper, &mut history).await;
                debug!("Node '{}': {:?}", node.id, outcome);
                stats.record(&node.id, outcome);
            }

            self.publish(
                SyncProgress::new(
                    SyncStatus::Syncing,
                    format!("Batch {}/{} done", index + 1, batches.len()),
                )
                .with_counts(stats.processed(), total)
                .with_errors(&stats.errors),
            );
        }

        if let Err(e) = self.history.save(&history).await {
            error!("Failed to save sync history: {}", e);
            stats.errors.push(format!("history: {}", e));
        }

        let result = SyncResult {
            success: status == SyncStatus::Completed && stats.errors.is_empty(),
            status,
            created: stats.created,
            updated: stats.updated,
            skipped: stats.skipped,
            total_processed: stats.processed(),
            errors: stats.errors,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            "Sync {:?}: {} created, {} updated, {} skipped, {} error(s) in {}ms",
            result.status,
            result.created,
            result.updated,
            result.skipped,
            result.errors.len(),
            result.duration_ms
        );
        self.publish(
            SyncProgress::new(
                status,
                format!(
                    "{} created, {} updated, {} skipped",
                    result.created, result.updated, result.skipped
                ),
            )
            .with_counts(result.total_processed, total)
            .with_errors(&result.errors),
        );

        Ok(result)
    }

    /// Connectivity, note type and deck, in that order.
    async fn ensure_ready(&self) -> Result<()> {
        if !self.remote.ping().await {
            return Err(SyncError::Connectivity);
        }

        let model = &self.settings.model_name;
        if !SchemaManager::new(&*self.remote, model).ensure_schema_ready().await {
            return Err(SyncError::Schema(model.clone()));
        }

        let deck = &self.settings.deck_name;
        if !self.remote.deck_exists(deck).await {
            info!("Creating deck '{}'", deck);
            if self.remote.create_deck(deck).await.is_none() {
                return Err(SyncError::Deck(deck.clone()));
            }
        }
        Ok(())
    }

    async fn sync_node(
        &self,
        node: &CanvasNode,
        source: &SourceRef,
        mapper: &ContentMapper,
        history: &mut SyncHistory,
    ) -> NodeOutcome {
        let note = match mapper.map(node, source) {
            Ok(note) => note,
            Err(e) => return NodeOutcome::Failed(e.to_string()),
        };
        let hash = ContentHash::of_node(node);

        if let Some(record) = history.get(&node.id).cloned() {
            if self.settings.hash_skip_enabled() && record.content_hash == hash.as_str() {
                return NodeOutcome::Unchanged;
            }

            let existing = self
                .remote
                .notes_info(&[record.remote_note_id])
                .await
                .into_iter()
                .find(|info| info.note_id == record.remote_note_id);
            match existing {
                Some(info) => {
                    if self.update_note(&info, &note).await {
                        remember(history, node, info.note_id, &hash);
                        return NodeOutcome::Updated;
                    }
                    warn!(
                        "Update of note {} for '{}' failed, creating instead",
                        info.note_id, node.id
                    );
                }
                None => debug!(
                    "Note {} for '{}' no longer exists, recreating",
                    record.remote_note_id, node.id
                ),
            }
        }

        self.create_note(node, &note, &hash, history).await
    }

    async fn create_note(
        &self,
        node: &CanvasNode,
        note: &RemoteNote,
        hash: &ContentHash,
        history: &mut SyncHistory,
    ) -> NodeOutcome {
        if let Some(id) = self.remote.add_note(note).await {
            remember(history, node, id, hash);
            return NodeOutcome::Created;
        }

        // A rejected create usually means the note already exists remotely
        // without a history entry pointing at it.
        let query = format!(
            "{} {}",
            search_term("note", &note.model_name),
            search_term("NodeId", &node.id)
        );
        let found = self.remote.find_notes(&query).await;
        let adopted = match found.first() {
            Some(id) => self.remote.notes_info(&[*id]).await.into_iter().next(),
            None => None,
        };

        match adopted {
            Some(info) => {
                debug!("Adopting existing note {} for '{}'", info.note_id, node.id);
                if self.update_note(&info, note).await {
                    remember(history, node, info.note_id, hash);
                    NodeOutcome::Updated
                } else {
                    NodeOutcome::Failed(format!("could not update existing note {}", info.note_id))
                }
            }
            None => {
                if history.remove(&node.id).is_some() {
                    debug!("Pruned stale history entry for '{}'", node.id);
                }
                NodeOutcome::Failed("remote rejected note creation".to_string())
            }
        }
    }

    /// Write fields, then reconcile engine-managed tags. Tag failures are
    /// logged but do not fail the update.
    async fn update_note(&self, info: &NoteInfo, note: &RemoteNote) -> bool {
        let ids: [NoteId; 1] = [info.note_id];
        if !self.remote.update_note_fields(info.note_id, &note.fields).await {
            return false;
        }

        let stale: Vec<String> = info
            .tags
            .iter()
            .filter(|t| is_managed_tag(t) && !note.tags.contains(*t))
            .cloned()
            .collect();
        if !stale.is_empty() && !self.remote.remove_tags(&ids, &stale).await {
            warn!("Failed to remove tags {:?} from note {}", stale, info.note_id);
        }

        let missing: Vec<String> = note
            .tags
            .iter()
            .filter(|t| !info.tags.contains(*t))
            .cloned()
            .collect();
        if !missing.is_empty() && !self.remote.add_tags(&ids, &missing).await {
            warn!("Failed to add tags {:?} to note {}", missing, info.note_id);
        }
        true
    }

    fn publish(&self, progress: SyncProgress) {
        *self.progress.write().unwrap_or_else(|e| e.into_inner()) = progress.clone();
        self.events.emit(&progress);
    }
}

fn remember(history: &mut SyncHistory, node: &CanvasNode, note_id: NoteId, hash: &ContentHash) {
    history.upsert(SyncRecord {
        node_id: node.id.clone(),
        remote_note_id: note_id,
        content_hash: hash.as_str().to_string(),
        last_sync_time: Utc::now(),
    });
}
