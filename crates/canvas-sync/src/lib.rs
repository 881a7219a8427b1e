//! canvas-sync: Core library for pushing Obsidian canvas nodes into a
//! flashcard application.
//!
//! This crate provides the core functionality for:
//! - Parsing canvas documents and resolving group membership
//! - Mapping nodes into notes of a dedicated note type
//! - Incremental, idempotent sync runs with persisted history
//! - RemoteStore and HistoryStore trait abstractions (with in-memory fakes)

pub mod cancel;
pub mod canvas;
pub mod content_hash;
pub mod events;
pub mod groups;
pub mod history;
pub mod mapper;
pub mod orchestrator;
pub mod remote;
pub mod schema;
pub mod settings;

pub use cancel::CancellationToken;
pub use canvas::{Canvas, CanvasColor, CanvasError, CanvasNode, NodeKind, Rect, SourceRef};
pub use content_hash::ContentHash;
pub use events::{EventBus, Subscription, SyncProgress, SyncStatus};
pub use groups::{GroupAnalysisResult, GroupInfo, GroupStats, analyze, resolve_by_color};
pub use history::{HistoryError, HistoryStore, MemoryHistoryStore, SyncHistory, SyncRecord};
pub use mapper::{ContentMapper, ConversionError};
pub use orchestrator::{SyncError, SyncOrchestrator, SyncResult};
pub use remote::{
    CardTemplate, InMemoryRemote, ModelSpec, NoteFields, NoteId, NoteInfo, RemoteNote,
    RemoteStore,
};
pub use schema::SchemaManager;
pub use settings::SyncSettings;
