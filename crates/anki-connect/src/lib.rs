//! anki-connect library: AnkiConnect transport and native storage for
//! canvas-sync.
//!
//! This is the native side of the sync engine: the HTTP client, the
//! `RemoteStore` implementation, file-backed history and configuration,
//! exposed as a library so integration tests and the CLI share it.

pub mod canvas_file;
pub mod config;
pub mod error;
pub mod gateway;
pub mod history_file;
pub mod retry;
pub mod rpc;

// Re-export key types for convenience
pub use canvas_file::{
    CanvasFileError, default_history_path, find_vault_root, load_canvas, resolve_source, source_ref,
};
pub use config::{Config, ConfigError, ConnectionSettings};
pub use error::{RpcError, RpcErrorKind};
pub use gateway::AnkiConnect;
pub use history_file::JsonFileHistoryStore;
pub use retry::{Backoff, RetryPolicy};
pub use rpc::RpcClient;
