//! Loading `.canvas` files from disk and locating them inside a vault.

use canvas_sync::{Canvas, CanvasError, SourceRef};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory Obsidian keeps at the root of every vault.
const VAULT_MARKER: &str = ".obsidian";

/// Per-canvas state directory, next to the canvas file.
const STATE_DIR: &str = ".canvas-anki";

#[derive(Debug, Error)]
pub enum CanvasFileError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid canvas {path:?}: {source}")]
    Parse { path: PathBuf, source: CanvasError },
}

pub async fn load_canvas(path: &Path) -> Result<Canvas, CanvasFileError> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CanvasFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Canvas::from_json(&json).map_err(|source| CanvasFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Nearest ancestor directory containing `.obsidian`.
pub fn find_vault_root(canvas_path: &Path) -> Option<PathBuf> {
    canvas_path
        .ancestors()
        .skip(1)
        .find(|dir| dir.join(VAULT_MARKER).is_dir())
        .map(Path::to_path_buf)
}

/// Describe a canvas for deep links: vault-relative path plus vault name when
/// the canvas sits inside `vault_root`, otherwise just the file name.
pub fn source_ref(canvas_path: &Path, vault_root: Option<&Path>) -> SourceRef {
    let in_vault = vault_root.and_then(|root| {
        let relative = canvas_path.strip_prefix(root).ok()?;
        let name = root.file_name()?.to_str()?.to_string();
        Some((relative, name))
    });

    match in_vault {
        Some((relative, vault)) => SourceRef::from_path(to_slash_path(relative)).in_vault(vault),
        None => {
            let file_name = canvas_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| canvas_path.to_string_lossy().into_owned());
            SourceRef::from_path(file_name)
        }
    }
}

/// Canonical canvas path plus its [`SourceRef`].
///
/// Relative paths (`canvas_path` and `vault_root`) resolve against `base_dir`.
/// Without an explicit vault root the nearest `.obsidian` ancestor is used.
pub async fn resolve_source(
    canvas_path: &Path,
    vault_root: Option<&Path>,
    base_dir: &Path,
) -> Result<(PathBuf, SourceRef), CanvasFileError> {
    let canvas_path = canonicalize(&base_dir.join(canvas_path)).await?;
    let vault_root = match vault_root {
        Some(root) => Some(canonicalize(&base_dir.join(root)).await?),
        None => find_vault_root(&canvas_path),
    };
    let source = source_ref(&canvas_path, vault_root.as_deref());
    Ok((canvas_path, source))
}

async fn canonicalize(path: &Path) -> Result<PathBuf, CanvasFileError> {
    tokio::fs::canonicalize(path)
        .await
        .map_err(|source| CanvasFileError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// `<canvas dir>/.canvas-anki/<canvas stem>.history.json`
pub fn default_history_path(canvas_path: &Path) -> PathBuf {
    let stem = canvas_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "canvas".to_string());
    canvas_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(STATE_DIR)
        .join(format!("{}.history.json", stem))
}

/// Obsidian paths always use `/`.
fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_canvas_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Board.canvas");
        std::fs::write(
            &path,
            r#"{"nodes": [{"id": "a", "type": "text", "text": "Q", "x": 0, "y": 0, "width": 10, "height": 10}], "edges": []}"#,
        )
        .unwrap();

        let canvas = load_canvas(&path).await.unwrap();
        assert_eq!(canvas.nodes.len(), 1);
        assert_eq!(canvas.nodes[0].id, "a");
    }

    #[tokio::test]
    async fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_canvas(&dir.path().join("missing.canvas")).await;
        assert!(matches!(missing, Err(CanvasFileError::Io { .. })));

        let bad = dir.path().join("bad.canvas");
        std::fs::write(&bad, "{nodes").unwrap();
        assert!(matches!(
            load_canvas(&bad).await,
            Err(CanvasFileError::Parse { .. })
        ));
    }

    #[test]
    fn test_vault_detection_and_source() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("My Vault");
        std::fs::create_dir_all(vault.join(".obsidian")).unwrap();
        std::fs::create_dir_all(vault.join("Boards")).unwrap();
        let canvas = vault.join("Boards").join("Biology.canvas");

        let root = find_vault_root(&canvas).unwrap();
        assert_eq!(root, vault);

        let source = source_ref(&canvas, Some(&root));
        assert_eq!(source.path, "Boards/Biology.canvas");
        assert_eq!(source.short_name, "Biology");
        assert_eq!(source.vault.as_deref(), Some("My Vault"));
    }

    fn vault_with_canvas(dir: &Path) -> PathBuf {
        let vault = dir.join("Study");
        std::fs::create_dir_all(vault.join(".obsidian")).unwrap();
        std::fs::create_dir_all(vault.join("Boards")).unwrap();
        std::fs::write(vault.join("Boards").join("Biology.canvas"), r#"{"nodes": []}"#).unwrap();
        vault
    }

    #[tokio::test]
    async fn test_resolve_relative_canvas_path() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_with_canvas(dir.path());

        let (path, source) = resolve_source(Path::new("Boards/Biology.canvas"), None, &vault)
            .await
            .unwrap();
        assert!(path.is_absolute());
        assert_eq!(source.path, "Boards/Biology.canvas");
        assert_eq!(source.vault.as_deref(), Some("Study"));
    }

    #[tokio::test]
    async fn test_resolve_relative_vault_flag() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_with_canvas(dir.path());
        let boards = vault.join("Boards");

        let (_, source) = resolve_source(Path::new("Biology.canvas"), Some(Path::new("..")), &boards)
            .await
            .unwrap();
        assert_eq!(source.path, "Boards/Biology.canvas");
        assert_eq!(source.vault.as_deref(), Some("Study"));
    }

    #[tokio::test]
    async fn test_resolve_missing_canvas() {
        let dir = tempfile::tempdir().unwrap();
        let result = resolve_source(Path::new("nope.canvas"), None, dir.path()).await;
        assert!(matches!(result, Err(CanvasFileError::Io { .. })));
    }

    #[test]
    fn test_source_outside_vault() {
        let source = source_ref(Path::new("/tmp/elsewhere/Chem.canvas"), None);
        assert_eq!(source.path, "Chem.canvas");
        assert_eq!(source.short_name, "Chem");
        assert_eq!(source.vault, None);
    }

    #[test]
    fn test_default_history_path() {
        assert_eq!(
            default_history_path(Path::new("/v/Boards/Biology.canvas")),
            PathBuf::from("/v/Boards/.canvas-anki/Biology.history.json")
        );
    }
}
