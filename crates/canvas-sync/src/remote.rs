//! RemoteStore trait abstraction over the flashcard application.
//!
//! Implementations:
//! - `InMemoryRemote` - For testing
//! - `AnkiConnect` (in anki-connect) - HTTP JSON-RPC against a running Anki
//!
//! Every operation degrades to `None`/`false`/an empty collection on failure
//! instead of returning an error, so the sync loop never handles protocol
//! errors itself. Implementations log the underlying cause.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Remote note identifier.
pub type NoteId = i64;

/// Field values of the dedicated note type.
///
/// Serializes to the `{"Front": .., "Back": .., ...}` map the remote expects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteFields {
    #[serde(rename = "Front")]
    pub front: String,
    #[serde(rename = "Back")]
    pub back: String,
    #[serde(rename = "NodeId")]
    pub node_id: String,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Color")]
    pub color: String,
}

impl NoteFields {
    /// Field names in schema order.
    pub const NAMES: [&'static str; 5] = ["Front", "Back", "NodeId", "Source", "Color"];

    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            "Front" => Some(&self.front),
            "Back" => Some(&self.back),
            "NodeId" => Some(&self.node_id),
            "Source" => Some(&self.source),
            "Color" => Some(&self.color),
            _ => None,
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        Self::NAMES
            .iter()
            .map(|name| (name.to_string(), self.get(name).unwrap_or_default().to_string()))
            .collect()
    }
}

/// A note ready to be written to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNote {
    pub deck_name: String,
    pub model_name: String,
    pub fields: NoteFields,
    /// Ordered, duplicate-free.
    pub tags: Vec<String>,
}

/// One card template of a note type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardTemplate {
    pub name: String,
    pub front: String,
    pub back: String,
}

/// Everything needed to create a note type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub fields: Vec<String>,
    pub css: String,
    pub templates: Vec<CardTemplate>,
}

/// Remote view of an existing note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteInfo {
    pub note_id: NoteId,
    pub model_name: String,
    pub tags: Vec<String>,
    pub fields: BTreeMap<String, String>,
}

/// Typed operations against the flashcard store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Connectivity probe.
    async fn ping(&self) -> bool;

    /// Protocol version reported by the remote.
    async fn version(&self) -> Option<u32>;

    async fn deck_names(&self) -> Vec<String>;

    /// Create a deck (no-op remotely when it already exists).
    async fn create_deck(&self, name: &str) -> Option<i64>;

    async fn model_names(&self) -> Vec<String>;

    async fn model_names_and_ids(&self) -> HashMap<String, i64>;

    /// Field names in order, or `None` when the model is unknown.
    async fn model_field_names(&self, model: &str) -> Option<Vec<String>>;

    async fn model_field_add(&self, model: &str, field: &str, index: usize) -> bool;

    async fn model_field_remove(&self, model: &str, field: &str) -> bool;

    async fn model_templates(&self, model: &str) -> Option<Vec<CardTemplate>>;

    async fn model_styling(&self, model: &str) -> Option<String>;

    async fn create_model(&self, spec: &ModelSpec) -> bool;

    async fn update_model_templates(&self, model: &str, templates: &[CardTemplate]) -> bool;

    async fn update_model_styling(&self, model: &str, css: &str) -> bool;

    async fn add_note(&self, note: &RemoteNote) -> Option<NoteId>;

    /// Batch create; one slot per input note, `None` for rejected notes.
    async fn add_notes(&self, notes: &[RemoteNote]) -> Vec<Option<NoteId>>;

    async fn find_notes(&self, query: &str) -> Vec<NoteId>;

    /// Info for the notes that still exist; missing ids are omitted.
    async fn notes_info(&self, ids: &[NoteId]) -> Vec<NoteInfo>;

    async fn update_note_fields(&self, id: NoteId, fields: &NoteFields) -> bool;

    async fn add_tags(&self, ids: &[NoteId], tags: &[String]) -> bool;

    async fn remove_tags(&self, ids: &[NoteId], tags: &[String]) -> bool;

    async fn deck_exists(&self, name: &str) -> bool {
        self.deck_names().await.iter().any(|d| d == name)
    }

    async fn model_exists(&self, name: &str) -> bool {
        self.model_names().await.iter().any(|m| m == name)
    }

    async fn note_exists(&self, id: NoteId) -> bool {
        self.notes_info(&[id]).await.iter().any(|n| n.note_id == id)
    }
}

/// A note as held by [`InMemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNote {
    pub deck_name: String,
    pub model_name: String,
    pub fields: NoteFields,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
struct StoredModel {
    id: i64,
    fields: Vec<String>,
    templates: Vec<CardTemplate>,
    css: String,
}

#[derive(Default)]
struct RemoteState {
    online: bool,
    fail_updates: bool,
    rejected_nodes: Vec<String>,
    decks: Vec<String>,
    models: BTreeMap<String, StoredModel>,
    notes: BTreeMap<NoteId, StoredNote>,
    next_id: NoteId,
    calls: Vec<&'static str>,
}

type AddHook = Arc<dyn Fn(usize) + Send + Sync>;

/// In-memory flashcard store for testing.
///
/// Mirrors the remote's observable behavior closely enough for the sync loop:
/// duplicate fronts within a deck are rejected, missing notes are omitted from
/// `notes_info`, and every call is recorded by its wire action name.
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
    on_add: Mutex<Option<AddHook>>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState {
                online: true,
                next_id: 1_000,
                decks: vec!["Default".to_string()],
                ..Default::default()
            }),
            on_add: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, action: &'static str) -> MutexGuard<'_, RemoteState> {
        let mut state = self.state();
        state.calls.push(action);
        state
    }

    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    /// Make every `updateNoteFields` call fail.
    pub fn fail_updates(&self, fail: bool) {
        self.state().fail_updates = fail;
    }

    /// Reject creation of notes whose `NodeId` field equals `node_id`.
    pub fn reject_creates_for(&self, node_id: &str) {
        self.state().rejected_nodes.push(node_id.to_string());
    }

    /// Delete a note behind the engine's back.
    pub fn remove_note(&self, id: NoteId) {
        self.state().notes.remove(&id);
    }

    /// Install a model directly, bypassing `createModel`.
    pub fn insert_model(&self, name: &str, fields: &[&str]) {
        let mut state = self.state();
        let id = state.models.len() as i64 + 1;
        state.models.insert(
            name.to_string(),
            StoredModel {
                id,
                fields: fields.iter().map(|f| f.to_string()).collect(),
                templates: Vec::new(),
                css: String::new(),
            },
        );
    }

    /// Called with the running note count after every successful create.
    pub fn on_add(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.on_add.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(hook));
    }

    pub fn note(&self, id: NoteId) -> Option<StoredNote> {
        self.state().notes.get(&id).cloned()
    }

    pub fn note_count(&self) -> usize {
        self.state().notes.len()
    }

    /// Number of recorded calls for a wire action, e.g. `"addNote"`.
    pub fn call_count(&self, action: &str) -> usize {
        self.state().calls.iter().filter(|a| **a == action).count()
    }

    /// Total recorded calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.state().calls.len()
    }

    fn insert_note(state: &mut RemoteState, note: &RemoteNote) -> Option<NoteId> {
        if !state.online
            || !state.decks.contains(&note.deck_name)
            || !state.models.contains_key(&note.model_name)
            || state.rejected_nodes.contains(&note.fields.node_id)
        {
            return None;
        }
        let duplicate = state.notes.values().any(|n| {
            n.deck_name == note.deck_name
                && n.model_name == note.model_name
                && n.fields.front == note.fields.front
        });
        if duplicate {
            return None;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.notes.insert(
            id,
            StoredNote {
                deck_name: note.deck_name.clone(),
                model_name: note.model_name.clone(),
                fields: note.fields.clone(),
                tags: note.tags.clone(),
            },
        );
        Some(id)
    }

    fn fire_add_hook(&self) {
        let count = self.note_count();
        let hook = self.on_add.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(hook) = hook {
            hook(count);
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn ping(&self) -> bool {
        self.record("version").online
    }

    async fn version(&self) -> Option<u32> {
        self.record("version").online.then_some(6)
    }

    async fn deck_names(&self) -> Vec<String> {
        let state = self.record("deckNames");
        if !state.online {
            return Vec::new();
        }
        state.decks.clone()
    }

    async fn create_deck(&self, name: &str) -> Option<i64> {
        let mut state = self.record("createDeck");
        if !state.online {
            return None;
        }
        if !state.decks.iter().any(|d| d == name) {
            state.decks.push(name.to_string());
        }
        state.decks.iter().position(|d| d == name).map(|i| i as i64 + 1)
    }

    async fn model_names(&self) -> Vec<String> {
        let state = self.record("modelNames");
        if !state.online {
            return Vec::new();
        }
        state.models.keys().cloned().collect()
    }

    async fn model_names_and_ids(&self) -> HashMap<String, i64> {
        let state = self.record("modelNamesAndIds");
        if !state.online {
            return HashMap::new();
        }
        state
            .models
            .iter()
            .map(|(name, model)| (name.clone(), model.id))
            .collect()
    }

    async fn model_field_names(&self, model: &str) -> Option<Vec<String>> {
        let state = self.record("modelFieldNames");
        if !state.online {
            return None;
        }
        state.models.get(model).map(|m| m.fields.clone())
    }

    async fn model_field_add(&self, model: &str, field: &str, index: usize) -> bool {
        let mut state = self.record("modelFieldAdd");
        if !state.online {
            return false;
        }
        match state.models.get_mut(model) {
            Some(m) if !m.fields.iter().any(|f| f == field) => {
                let index = index.min(m.fields.len());
                m.fields.insert(index, field.to_string());
                true
            }
            _ => false,
        }
    }

    async fn model_field_remove(&self, model: &str, field: &str) -> bool {
        let mut state = self.record("modelFieldRemove");
        if !state.online {
            return false;
        }
        match state.models.get_mut(model) {
            Some(m) => {
                let before = m.fields.len();
                m.fields.retain(|f| f != field);
                m.fields.len() != before
            }
            None => false,
        }
    }

    async fn model_templates(&self, model: &str) -> Option<Vec<CardTemplate>> {
        let state = self.record("modelTemplates");
        if !state.online {
            return None;
        }
        state.models.get(model).map(|m| m.templates.clone())
    }

    async fn model_styling(&self, model: &str) -> Option<String> {
        let state = self.record("modelStyling");
        if !state.online {
            return None;
        }
        state.models.get(model).map(|m| m.css.clone())
    }

    async fn create_model(&self, spec: &ModelSpec) -> bool {
        let mut state = self.record("createModel");
        if !state.online || state.models.contains_key(&spec.name) {
            return false;
        }
        let id = state.models.len() as i64 + 1;
        state.models.insert(
            spec.name.clone(),
            StoredModel {
                id,
                fields: spec.fields.clone(),
                templates: spec.templates.clone(),
                css: spec.css.clone(),
            },
        );
        true
    }

    async fn update_model_templates(&self, model: &str, templates: &[CardTemplate]) -> bool {
        let mut state = self.record("updateModelTemplates");
        if !state.online {
            return false;
        }
        match state.models.get_mut(model) {
            Some(m) => {
                m.templates = templates.to_vec();
                true
            }
            None => false,
        }
    }

    async fn update_model_styling(&self, model: &str, css: &str) -> bool {
        let mut state = self.record("updateModelStyling");
        if !state.online {
            return false;
        }
        match state.models.get_mut(model) {
            Some(m) => {
                m.css = css.to_string();
                true
            }
            None => false,
        }
    }

    async fn add_note(&self, note: &RemoteNote) -> Option<NoteId> {
        let id = {
            let mut state = self.record("addNote");
            Self::insert_note(&mut state, note)
        };
        if id.is_some() {
            self.fire_add_hook();
        }
        id
    }

    async fn add_notes(&self, notes: &[RemoteNote]) -> Vec<Option<NoteId>> {
        let ids: Vec<_> = {
            let mut state = self.record("addNotes");
            notes
                .iter()
                .map(|note| Self::insert_note(&mut state, note))
                .collect()
        };
        if ids.iter().any(Option::is_some) {
            self.fire_add_hook();
        }
        ids
    }

    /// Understands the `"note:<model>" "NodeId:<id>"` queries the engine issues.
    async fn find_notes(&self, query: &str) -> Vec<NoteId> {
        let state = self.record("findNotes");
        if !state.online {
            return Vec::new();
        }
        let terms: Vec<(String, String)> = query
            .split("\" \"")
            .map(|t| {
                t.trim_matches('"')
                    .replace("\\\"", "\"")
                    .replace("\\_", "_")
                    .replace("\\*", "*")
                    .replace("\\\\", "\\")
            })
            .filter_map(|t| t.split_once(':').map(|(k, v)| (k.to_string(), v.to_string())))
            .collect();
        state
            .notes
            .iter()
            .filter(|(_, note)| {
                terms.iter().all(|(key, value)| match key.as_str() {
                    "note" => &note.model_name == value,
                    "deck" => &note.deck_name == value,
                    field => note.fields.get(field) == Some(value.as_str()),
                })
            })
            .map(|(id, _)| *id)
            .collect()
    }

    async fn notes_info(&self, ids: &[NoteId]) -> Vec<NoteInfo> {
        let state = self.record("notesInfo");
        if !state.online {
            return Vec::new();
        }
        ids.iter()
            .filter_map(|id| {
                state.notes.get(id).map(|note| NoteInfo {
                    note_id: *id,
                    model_name: note.model_name.clone(),
                    tags: note.tags.clone(),
                    fields: note.fields.to_map(),
                })
            })
            .collect()
    }

    async fn update_note_fields(&self, id: NoteId, fields: &NoteFields) -> bool {
        let mut state = self.record("updateNoteFields");
        if !state.online || state.fail_updates {
            return false;
        }
        match state.notes.get_mut(&id) {
            Some(note) => {
                note.fields = fields.clone();
                true
            }
            None => false,
        }
    }

    async fn add_tags(&self, ids: &[NoteId], tags: &[String]) -> bool {
        let mut state = self.record("addTags");
        if !state.online {
            return false;
        }
        for id in ids {
            if let Some(note) = state.notes.get_mut(id) {
                for tag in tags {
                    if !note.tags.contains(tag) {
                        note.tags.push(tag.clone());
                    }
                }
            }
        }
        true
    }

    async fn remove_tags(&self, ids: &[NoteId], tags: &[String]) -> bool {
        let mut state = self.record("removeTags");
        if !state.online {
            return false;
        }
        for id in ids {
            if let Some(note) = state.notes.get_mut(id) {
                note.tags.retain(|t| !tags.contains(t));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_note(front: &str, node_id: &str) -> RemoteNote {
        RemoteNote {
            deck_name: "Default".into(),
            model_name: "Basic".into(),
            fields: NoteFields {
                front: front.into(),
                node_id: node_id.into(),
                ..Default::default()
            },
            tags: vec!["a".into()],
        }
    }

    #[test]
    fn test_note_fields_serialize_as_field_map() {
        let fields = NoteFields {
            front: "Q".into(),
            back: "A".into(),
            node_id: "n1".into(),
            source: "Board".into(),
            color: "Green".into(),
        };
        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(json["Front"], "Q");
        assert_eq!(json["NodeId"], "n1");
        assert_eq!(fields.to_map().len(), 5);
    }

    #[tokio::test]
    async fn test_in_memory_rejects_duplicate_front() {
        let remote = InMemoryRemote::new();
        remote.insert_model("Basic", &["Front", "Back"]);

        assert!(remote.add_note(&sample_note("Q1", "a")).await.is_some());
        assert!(remote.add_note(&sample_note("Q1", "b")).await.is_none());
        assert_eq!(remote.note_count(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_find_by_node_id() {
        let remote = InMemoryRemote::new();
        remote.insert_model("Basic", &["Front", "Back"]);
        let id = remote.add_note(&sample_note("Q1", "node_1")).await.unwrap();

        let found = remote
            .find_notes("\"note:Basic\" \"NodeId:node\\_1\"")
            .await;
        assert_eq!(found, vec![id]);
    }

    #[tokio::test]
    async fn test_notes_info_omits_missing() {
        let remote = InMemoryRemote::new();
        remote.insert_model("Basic", &["Front", "Back"]);
        let id = remote.add_note(&sample_note("Q1", "a")).await.unwrap();

        assert!(remote.note_exists(id).await);
        remote.remove_note(id);
        assert!(!remote.note_exists(id).await);
        assert_eq!(remote.call_count("notesInfo"), 2);
    }

    #[tokio::test]
    async fn test_offline_degrades_to_empty() {
        let remote = InMemoryRemote::new();
        remote.set_online(false);
        assert!(!remote.ping().await);
        assert!(remote.deck_names().await.is_empty());
        assert!(remote.create_deck("X").await.is_none());
    }
}
