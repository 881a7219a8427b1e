//! `AnkiConnect`: the [`RemoteStore`] implementation backed by [`RpcClient`].
//!
//! Failures never surface as errors here. Each operation logs the cause at
//! `warn` and degrades to `None`, `false` or an empty collection, leaving the
//! decision to the sync engine.

use async_trait::async_trait;
use canvas_sync::{CardTemplate, ModelSpec, NoteFields, NoteId, NoteInfo, RemoteNote, RemoteStore};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::rpc::RpcClient;

#[derive(Deserialize)]
struct TemplateSides {
    #[serde(rename = "Front")]
    front: String,
    #[serde(rename = "Back")]
    back: String,
}

#[derive(Deserialize)]
struct Styling {
    css: String,
}

#[derive(Deserialize)]
struct FieldValue {
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireNoteInfo {
    note_id: NoteId,
    model_name: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    fields: BTreeMap<String, FieldValue>,
}

impl From<WireNoteInfo> for NoteInfo {
    fn from(info: WireNoteInfo) -> Self {
        NoteInfo {
            note_id: info.note_id,
            model_name: info.model_name,
            tags: info.tags,
            fields: info
                .fields
                .into_iter()
                .map(|(name, field)| (name, field.value))
                .collect(),
        }
    }
}

fn note_params(note: &RemoteNote) -> Value {
    json!({
        "deckName": note.deck_name,
        "modelName": note.model_name,
        "fields": note.fields,
        "tags": note.tags,
        "options": {
            "allowDuplicate": false,
            "duplicateScope": "deck"
        }
    })
}

fn templates_by_name(templates: &[CardTemplate]) -> Value {
    let map: Map<String, Value> = templates
        .iter()
        .map(|t| (t.name.clone(), json!({ "Front": t.front, "Back": t.back })))
        .collect();
    Value::Object(map)
}

/// AnkiConnect-backed flashcard store.
#[derive(Debug, Clone)]
pub struct AnkiConnect {
    rpc: RpcClient,
}

impl AnkiConnect {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    async fn call<T: DeserializeOwned>(&self, action: &str, params: Value) -> Option<T> {
        match self.rpc.invoke_as(action, params).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("AnkiConnect {} failed: {}", action, e);
                None
            }
        }
    }

    /// For actions whose result is `null` on success.
    async fn call_unit(&self, action: &str, params: Value) -> bool {
        self.call::<Value>(action, params).await.is_some()
    }
}

#[async_trait]
impl RemoteStore for AnkiConnect {
    async fn ping(&self) -> bool {
        match self.rpc.invoke("version", Value::Null).await {
            Ok(_) => true,
            Err(e) => {
                debug!("AnkiConnect not reachable at {}: {}", self.rpc.endpoint(), e);
                false
            }
        }
    }

    async fn version(&self) -> Option<u32> {
        self.call("version", Value::Null).await
    }

    async fn deck_names(&self) -> Vec<String> {
        self.call("deckNames", Value::Null).await.unwrap_or_default()
    }

    async fn create_deck(&self, name: &str) -> Option<i64> {
        self.call("createDeck", json!({ "deck": name })).await
    }

    async fn model_names(&self) -> Vec<String> {
        self.call("modelNames", Value::Null).await.unwrap_or_default()
    }

    async fn model_names_and_ids(&self) -> HashMap<String, i64> {
        self.call("modelNamesAndIds", Value::Null)
            .await
            .unwrap_or_default()
    }

    async fn model_field_names(&self, model: &str) -> Option<Vec<String>> {
        self.call("modelFieldNames", json!({ "modelName": model }))
            .await
    }

    async fn model_field_add(&self, model: &str, field: &str, index: usize) -> bool {
        self.call_unit(
            "modelFieldAdd",
            json!({ "modelName": model, "fieldName": field, "index": index }),
        )
        .await
    }

    async fn model_field_remove(&self, model: &str, field: &str) -> bool {
        self.call_unit(
            "modelFieldRemove",
            json!({ "modelName": model, "fieldName": field }),
        )
        .await
    }

    async fn model_templates(&self, model: &str) -> Option<Vec<CardTemplate>> {
        let templates: BTreeMap<String, TemplateSides> = self
            .call("modelTemplates", json!({ "modelName": model }))
            .await?;
        Some(
            templates
                .into_iter()
                .map(|(name, sides)| CardTemplate {
                    name,
                    front: sides.front,
                    back: sides.back,
                })
                .collect(),
        )
    }

    async fn model_styling(&self, model: &str) -> Option<String> {
        let styling: Styling = self
            .call("modelStyling", json!({ "modelName": model }))
            .await?;
        Some(styling.css)
    }

    async fn create_model(&self, spec: &ModelSpec) -> bool {
        let card_templates: Vec<Value> = spec
            .templates
            .iter()
            .map(|t| json!({ "Name": t.name, "Front": t.front, "Back": t.back }))
            .collect();
        self.call_unit(
            "createModel",
            json!({
                "modelName": spec.name,
                "inOrderFields": spec.fields,
                "css": spec.css,
                "isCloze": false,
                "cardTemplates": card_templates
            }),
        )
        .await
    }

    async fn update_model_templates(&self, model: &str, templates: &[CardTemplate]) -> bool {
        self.call_unit(
            "updateModelTemplates",
            json!({ "model": { "name": model, "templates": templates_by_name(templates) } }),
        )
        .await
    }

    async fn update_model_styling(&self, model: &str, css: &str) -> bool {
        self.call_unit(
            "updateModelStyling",
            json!({ "model": { "name": model, "css": css } }),
        )
        .await
    }

    async fn add_note(&self, note: &RemoteNote) -> Option<NoteId> {
        self.call("addNote", json!({ "note": note_params(note) }))
            .await
    }

    async fn add_notes(&self, notes: &[RemoteNote]) -> Vec<Option<NoteId>> {
        let params: Vec<Value> = notes.iter().map(note_params).collect();
        self.call("addNotes", json!({ "notes": params }))
            .await
            .unwrap_or_else(|| vec![None; notes.len()])
    }

    async fn find_notes(&self, query: &str) -> Vec<NoteId> {
        self.call("findNotes", json!({ "query": query }))
            .await
            .unwrap_or_default()
    }

    async fn notes_info(&self, ids: &[NoteId]) -> Vec<NoteInfo> {
        // Deleted notes come back as `{}` entries.
        let entries: Vec<Value> = self
            .call("notesInfo", json!({ "notes": ids }))
            .await
            .unwrap_or_default();
        entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value::<WireNoteInfo>(entry).ok())
            .map(NoteInfo::from)
            .collect()
    }

    async fn update_note_fields(&self, id: NoteId, fields: &NoteFields) -> bool {
        self.call_unit(
            "updateNoteFields",
            json!({ "note": { "id": id, "fields": fields } }),
        )
        .await
    }

    async fn add_tags(&self, ids: &[NoteId], tags: &[String]) -> bool {
        self.call_unit("addTags", json!({ "notes": ids, "tags": tags.join(" ") }))
            .await
    }

    async fn remove_tags(&self, ids: &[NoteId], tags: &[String]) -> bool {
        self.call_unit("removeTags", json!({ "notes": ids, "tags": tags.join(" ") }))
            .await
    }
}
