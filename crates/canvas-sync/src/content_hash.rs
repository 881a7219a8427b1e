//! Content hash utilities for change detection.
//!
//! Canvas files carry no reliable modification clock, so a node is considered
//! changed when the hash of its card-relevant content differs from the hash
//! recorded at its last successful sync. Geometry is deliberately left out:
//! moving or resizing a node does not change the card.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::canvas::{CanvasNode, NodeKind};

/// A content hash over a node's type and content fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHash(String);

/// Canonical hash input. Field order is fixed by the struct definition.
#[derive(Serialize)]
struct HashInput<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: Option<&'a str>,
    file: Option<&'a str>,
    // Omitted when absent; hashes of subpath-less nodes are unchanged.
    #[serde(skip_serializing_if = "Option::is_none")]
    subpath: Option<&'a str>,
    url: Option<&'a str>,
    color: Option<String>,
}

impl ContentHash {
    /// Compute hash from raw content bytes.
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Compute the change-detection hash of a canvas node.
    pub fn of_node(node: &CanvasNode) -> Self {
        let (text, file, url) = match &node.kind {
            NodeKind::Text { text } => (Some(text.as_str()), None, None),
            NodeKind::File { file, .. } => (None, Some(file.as_str()), None),
            NodeKind::Link { url } => (None, None, Some(url.as_str())),
            NodeKind::Group { .. } | NodeKind::Unsupported => (None, None, None),
        };
        let subpath = match &node.kind {
            NodeKind::File {
                subpath: Some(sub), ..
            } => Some(sub.trim_start_matches('#')).filter(|s| !s.is_empty()),
            _ => None,
        };
        let input = HashInput {
            kind: node.kind.name(),
            text,
            file,
            subpath,
            url,
            color: node.color.as_ref().map(|c| c.to_string()),
        };
        // Serializing a struct of strings cannot fail.
        let canonical = serde_json::to_string(&input).unwrap_or_default();
        Self::from_content(&canonical)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ContentHash {
    fn from(hash: String) -> Self {
        Self(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{CanvasColor, Rect};

    fn node(text: &str) -> CanvasNode {
        CanvasNode::text("n1", text, Rect::new(0.0, 0.0, 100.0, 50.0))
    }

    #[test]
    fn test_content_hash_deterministic() {
        let hash1 = ContentHash::from_content("hello world");
        let hash2 = ContentHash::from_content("hello world");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_hash_as_str() {
        let hash = ContentHash::from_content("test");
        // SHA-256 hex is 64 characters
        assert_eq!(hash.as_str().len(), 64);
    }

    #[test]
    fn test_geometry_does_not_affect_hash() {
        let a = node("Hello");
        let mut b = node("Hello");
        b.x = 999.0;
        b.y = -40.0;
        b.width = 10.0;
        assert_eq!(ContentHash::of_node(&a), ContentHash::of_node(&b));
    }

    #[test]
    fn test_text_and_color_affect_hash() {
        let base = ContentHash::of_node(&node("Hello"));
        assert_ne!(base, ContentHash::of_node(&node("Hello!")));
        assert_ne!(
            base,
            ContentHash::of_node(&node("Hello").colored(CanvasColor::Red))
        );
    }

    #[test]
    fn test_subpath_affects_hash() {
        let bounds = Rect::new(0.0, 0.0, 1.0, 1.0);
        let with_subpath = |sub: Option<&str>| {
            let mut node = CanvasNode::file("f", "Notes/Cell.md", bounds);
            node.kind = NodeKind::File {
                file: "Notes/Cell.md".into(),
                subpath: sub.map(str::to_string),
            };
            node
        };
        let plain = ContentHash::of_node(&CanvasNode::file("f", "Notes/Cell.md", bounds));
        assert_eq!(plain, ContentHash::of_node(&with_subpath(None)));
        assert_eq!(plain, ContentHash::of_node(&with_subpath(Some(""))));

        let mitosis = ContentHash::of_node(&with_subpath(Some("#Mitosis")));
        assert_ne!(plain, mitosis);
        assert_ne!(mitosis, ContentHash::of_node(&with_subpath(Some("#Meiosis"))));
    }

    #[test]
    fn test_type_affects_hash() {
        let bounds = Rect::new(0.0, 0.0, 1.0, 1.0);
        let text = CanvasNode::text("n", "a.md", bounds);
        let file = CanvasNode::file("n", "a.md", bounds);
        assert_ne!(ContentHash::of_node(&text), ContentHash::of_node(&file));
    }
}
