//! ContentMapper: turns one canvas node into one flashcard note.
//!
//! Mapping never blocks a run on content quirks: an empty front falls back to
//! a per-type placeholder, so `Front` is never empty. Only node kinds that can
//! never become cards (groups, unknown types) are rejected.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::canvas::{CanvasNode, NodeKind, SourceRef};
use crate::remote::{NoteFields, RemoteNote};
use crate::settings::SyncSettings;

/// Tag carried by every note the engine writes.
pub const ENGINE_TAG: &str = "obsidian-canvas";

/// URI action handled by the canvas grid view.
pub const DEEP_LINK_ACTION: &str = "canvas-grid";

const SECTION_BREAK: &str = "<br><br>";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("group nodes are not synced as cards")]
    GroupNode,

    #[error("unsupported node type")]
    Unsupported,
}

/// `#tag` tokens in Obsidian syntax, preceded by start of text or whitespace.
static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)#([\p{L}\p{N}_/-]+)").expect("valid tag regex"));

/// Maps nodes into notes for one deck and note type.
#[derive(Debug, Clone)]
pub struct ContentMapper {
    deck_name: String,
    model_name: String,
    divider: String,
}

impl ContentMapper {
    pub fn new(
        deck_name: impl Into<String>,
        model_name: impl Into<String>,
        divider: impl Into<String>,
    ) -> Self {
        Self {
            deck_name: deck_name.into(),
            model_name: model_name.into(),
            divider: divider.into(),
        }
    }

    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(
            settings.deck_name.clone(),
            settings.model_name.clone(),
            settings.divider.clone(),
        )
    }

    pub fn map(&self, node: &CanvasNode, source: &SourceRef) -> Result<RemoteNote, ConversionError> {
        let raw = extract_text(node)?;
        let (front, back) = split_front_back(&raw, &self.divider);

        let front = if front.is_empty() {
            fallback_front(&node.kind).to_string()
        } else {
            to_html(&front)
        };

        let mut sections = vec![front];
        if let Some(color) = &node.color {
            sections.push(format!("#{}", color.tag_slug()));
        }
        sections.push(format!(
            "<a href=\"{}\">Open in canvas</a>",
            deep_link(node, source)
        ));

        let fields = NoteFields {
            front: sections.join(SECTION_BREAK),
            back: to_html(&back),
            node_id: node.id.clone(),
            source: source.short_name.clone(),
            color: node
                .color
                .as_ref()
                .map(|c| c.display_name().to_string())
                .unwrap_or_default(),
        };

        Ok(RemoteNote {
            deck_name: self.deck_name.clone(),
            model_name: self.model_name.clone(),
            fields,
            tags: build_tags(node, &raw),
        })
    }
}

/// Plain-text representation of a node's payload.
pub fn extract_text(node: &CanvasNode) -> Result<String, ConversionError> {
    match &node.kind {
        NodeKind::Text { text } => Ok(text.clone()),
        NodeKind::File { file, subpath } => Ok(match subpath {
            Some(sub) if !sub.is_empty() => {
                format!("File: {}#{}", file, sub.trim_start_matches('#'))
            }
            _ => format!("File: {}", file),
        }),
        NodeKind::Link { url } => Ok(url.clone()),
        NodeKind::Group { .. } => Err(ConversionError::GroupNode),
        NodeKind::Unsupported => Err(ConversionError::Unsupported),
    }
}

/// Split on the first divider occurrence into trimmed front and back.
///
/// An empty divider disables splitting.
pub fn split_front_back(text: &str, divider: &str) -> (String, String) {
    if !divider.is_empty() {
        if let Some((front, back)) = text.split_once(divider) {
            return (front.trim().to_string(), back.trim().to_string());
        }
    }
    (text.trim().to_string(), String::new())
}

/// Placeholder front for nodes without usable text.
pub fn fallback_front(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Text { .. } => "Empty text card",
        NodeKind::File { .. } => "File card",
        NodeKind::Link { .. } => "Link card",
        NodeKind::Group { .. } => "Group",
        NodeKind::Unsupported => "Canvas card",
    }
}

/// Link back to the node's location in its canvas.
pub fn deep_link(node: &CanvasNode, source: &SourceRef) -> String {
    let mut params = Vec::with_capacity(5);
    if let Some(vault) = &source.vault {
        params.push(format!("vault={}", urlencoding::encode(vault)));
    }
    params.push(format!("file={}", urlencoding::encode(&source.path)));
    params.push(format!("node={}", urlencoding::encode(&node.id)));
    params.push(format!("x={}", node.x));
    params.push(format!("y={}", node.y));
    format!("obsidian://{}?{}", DEEP_LINK_ACTION, params.join("&"))
}

/// `#tag` tokens from raw text, without the `#`, in order of appearance.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    TAG_PATTERN
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('/'))
        .filter(|tag| !tag.is_empty() && !tag.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

fn build_tags(node: &CanvasNode, raw: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut push = |tag: String| {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    };

    push(ENGINE_TAG.to_string());
    push(format!("type-{}", node.kind.name()));
    if let Some(color) = &node.color {
        push(format!("color-{}", color.tag_slug()));
    }
    for tag in extract_hashtags(raw) {
        push(tag);
    }
    tags
}

fn to_html(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "<br>")
}

/// Whether a tag is one the engine manages (and may therefore remove).
pub fn is_managed_tag(tag: &str) -> bool {
    tag == ENGINE_TAG || tag.starts_with("type-") || tag.starts_with("color-")
}
