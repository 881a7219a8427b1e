//! Canvas document model: nodes, colors and geometry as stored in `.canvas` files.
//!
//! A `.canvas` file is JSON of the shape `{ "nodes": [...], "edges": [...] }`.
//! Nodes share an id, a bounding box and an optional color; the `type` tag
//! selects the payload. Unknown node types deserialize as
//! [`NodeKind::Unsupported`] so one exotic node never breaks a whole document.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("Invalid canvas JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid color '{0}': expected a preset id 1-6 or #rrggbb")]
    InvalidColor(String),
}

/// Axis-aligned rectangle in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// True when `other` lies entirely inside this rectangle (edges inclusive).
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// Node color: one of Obsidian's six preset ids or a custom hex color.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CanvasColor {
    Red,
    Orange,
    Yellow,
    Green,
    Cyan,
    Purple,
    /// Lowercased `#rrggbb`.
    Custom(String),
}

impl CanvasColor {
    /// Human-readable name, used for the `Color` field.
    pub fn display_name(&self) -> &str {
        match self {
            CanvasColor::Red => "Red",
            CanvasColor::Orange => "Orange",
            CanvasColor::Yellow => "Yellow",
            CanvasColor::Green => "Green",
            CanvasColor::Cyan => "Cyan",
            CanvasColor::Purple => "Purple",
            CanvasColor::Custom(hex) => hex,
        }
    }

    /// Tag-safe slug: `green`, or the hex digits for custom colors.
    pub fn tag_slug(&self) -> String {
        match self {
            CanvasColor::Custom(hex) => hex.trim_start_matches('#').to_string(),
            preset => preset.display_name().to_ascii_lowercase(),
        }
    }
}

impl Display for CanvasColor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let id = match self {
            CanvasColor::Red => "1",
            CanvasColor::Orange => "2",
            CanvasColor::Yellow => "3",
            CanvasColor::Green => "4",
            CanvasColor::Cyan => "5",
            CanvasColor::Purple => "6",
            CanvasColor::Custom(hex) => hex,
        };
        f.write_str(id)
    }
}

impl FromStr for CanvasColor {
    type Err = CanvasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(CanvasColor::Red),
            "2" => Ok(CanvasColor::Orange),
            "3" => Ok(CanvasColor::Yellow),
            "4" => Ok(CanvasColor::Green),
            "5" => Ok(CanvasColor::Cyan),
            "6" => Ok(CanvasColor::Purple),
            hex if hex.len() == 7
                && hex.starts_with('#')
                && hex[1..].chars().all(|c| c.is_ascii_hexdigit()) =>
            {
                Ok(CanvasColor::Custom(hex.to_ascii_lowercase()))
            }
            _ => Err(CanvasError::InvalidColor(s.to_string())),
        }
    }
}

// Colors travel as their canvas id ("4", "#ff8800") in canvas files and config.
impl Serialize for CanvasColor {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CanvasColor {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Type-specific node payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    Text {
        #[serde(default)]
        text: String,
    },
    File {
        #[serde(default)]
        file: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subpath: Option<String>,
    },
    Link {
        #[serde(default)]
        url: String,
    },
    Group {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    #[serde(other)]
    Unsupported,
}

impl NodeKind {
    /// The canvas `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Text { .. } => "text",
            NodeKind::File { .. } => "file",
            NodeKind::Link { .. } => "link",
            NodeKind::Group { .. } => "group",
            NodeKind::Unsupported => "unsupported",
        }
    }
}

/// Unrecognized node colors read as uncolored instead of rejecting the file.
fn lenient_color<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<CanvasColor>, D::Error> {
    let raw = match Option::<serde_json::Value>::deserialize(d)? {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(other) => {
            debug!("Ignoring non-string node color {}", other);
            return Ok(None);
        }
        None => return Ok(None),
    };
    match raw.parse() {
        Ok(color) => Ok(Some(color)),
        Err(e) => {
            debug!("Ignoring node color: {}", e);
            Ok(None)
        }
    }
}

fn missing_coordinate() -> f64 {
    f64::NAN
}

/// One spatial element of a canvas document.
///
/// Geometry defaults to NaN when absent so malformed nodes survive parsing
/// and are rejected by validation instead of failing the whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasNode {
    #[serde(default)]
    pub id: String,
    #[serde(default = "missing_coordinate")]
    pub x: f64,
    #[serde(default = "missing_coordinate")]
    pub y: f64,
    #[serde(default = "missing_coordinate")]
    pub width: f64,
    #[serde(default = "missing_coordinate")]
    pub height: f64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_color"
    )]
    pub color: Option<CanvasColor>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl CanvasNode {
    pub fn text(id: impl Into<String>, text: impl Into<String>, bounds: Rect) -> Self {
        Self::with_kind(id, NodeKind::Text { text: text.into() }, bounds)
    }

    pub fn file(id: impl Into<String>, file: impl Into<String>, bounds: Rect) -> Self {
        Self::with_kind(
            id,
            NodeKind::File {
                file: file.into(),
                subpath: None,
            },
            bounds,
        )
    }

    pub fn link(id: impl Into<String>, url: impl Into<String>, bounds: Rect) -> Self {
        Self::with_kind(id, NodeKind::Link { url: url.into() }, bounds)
    }

    pub fn group(id: impl Into<String>, label: Option<&str>, bounds: Rect) -> Self {
        Self::with_kind(
            id,
            NodeKind::Group {
                label: label.map(str::to_string),
            },
            bounds,
        )
    }

    fn with_kind(id: impl Into<String>, kind: NodeKind, bounds: Rect) -> Self {
        Self {
            id: id.into(),
            x: bounds.x,
            y: bounds.y,
            width: bounds.width,
            height: bounds.height,
            color: None,
            kind,
        }
    }

    /// Builder-style color setter.
    pub fn colored(mut self, color: CanvasColor) -> Self {
        self.color = Some(color);
        self
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group { .. })
    }

    /// Whether the node carries a non-empty payload worth turning into a card.
    pub fn has_content(&self) -> bool {
        match &self.kind {
            NodeKind::Text { text } => !text.trim().is_empty(),
            NodeKind::File { file, .. } => !file.trim().is_empty(),
            NodeKind::Link { url } => !url.trim().is_empty(),
            NodeKind::Group { .. } | NodeKind::Unsupported => false,
        }
    }
}

/// A parsed `.canvas` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Canvas {
    #[serde(default)]
    pub nodes: Vec<CanvasNode>,
    /// Edges are carried through untouched; the sync engine ignores them.
    #[serde(default)]
    pub edges: Vec<serde_json::Value>,
}

impl Canvas {
    pub fn new(nodes: Vec<CanvasNode>) -> Self {
        Self {
            nodes,
            edges: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, CanvasError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Where the nodes came from, used for the `Source` field and deep links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Vault-relative path of the canvas file, e.g. `Boards/Biology.canvas`.
    pub path: String,
    /// Short display name, e.g. `Biology`.
    pub short_name: String,
    /// Vault name, when known. Deep links omit it otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<String>,
}

impl SourceRef {
    /// Derive the short name from the file stem of `path`.
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let short_name = Path::new(&path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&path)
            .to_string();
        Self {
            path,
            short_name,
            vault: None,
        }
    }

    pub fn in_vault(mut self, vault: impl Into<String>) -> Self {
        self.vault = Some(vault.into());
        self
    }
}
