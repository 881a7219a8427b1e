//! Full sync runs against a wiremock-backed AnkiConnect.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anki_connect::{AnkiConnect, ConnectionSettings, JsonFileHistoryStore, RetryPolicy, RpcClient};
use canvas_sync::{
    CancellationToken, Canvas, HistoryStore, SourceRef, SyncError, SyncOrchestrator,
    SyncSettings, SyncStatus,
};
use serde_json::{Value, json};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Default)]
struct AnkiState {
    decks: Vec<String>,
    models: BTreeMap<String, Vec<String>>,
    notes: BTreeMap<i64, Value>,
    next_id: i64,
    actions: Vec<String>,
}

/// Just enough of AnkiConnect to run the sync engine end to end.
#[derive(Clone, Default)]
struct FakeAnki {
    state: Arc<Mutex<AnkiState>>,
}

impl FakeAnki {
    fn count(&self, action: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.actions.iter().filter(|a| *a == action).count()
    }

    fn notes(&self) -> Vec<Value> {
        self.state.lock().unwrap().notes.values().cloned().collect()
    }

    fn handle(&self, action: &str, params: &Value) -> Result<Value, String> {
        let mut state = self.state.lock().unwrap();
        state.actions.push(action.to_string());

        match action {
            "version" => Ok(json!(6)),
            "deckNames" => Ok(json!(state.decks)),
            "createDeck" => {
                let deck = params["deck"].as_str().unwrap_or_default().to_string();
                if !state.decks.contains(&deck) {
                    state.decks.push(deck);
                }
                Ok(json!(state.decks.len()))
            }
            "modelNames" => Ok(json!(state.models.keys().collect::<Vec<_>>())),
            "createModel" => {
                let name = params["modelName"].as_str().unwrap_or_default().to_string();
                let fields: Vec<String> =
                    serde_json::from_value(params["inOrderFields"].clone()).unwrap_or_default();
                state.models.insert(name, fields);
                Ok(json!({ "id": 1 }))
            }
            "modelFieldNames" => {
                let name = params["modelName"].as_str().unwrap_or_default();
                state
                    .models
                    .get(name)
                    .map(|fields| json!(fields))
                    .ok_or_else(|| format!("model was not found: {}", name))
            }
            "modelTemplates" | "modelStyling" => {
                // Report drift so the engine re-pushes presentation.
                Ok(if action == "modelStyling" {
                    json!({ "css": "" })
                } else {
                    json!({})
                })
            }
            "updateModelTemplates" | "updateModelStyling" => Ok(Value::Null),
            "addNote" => {
                let note = &params["note"];
                let front = &note["fields"]["Front"];
                if state.notes.values().any(|n| &n["fields"]["Front"] == front) {
                    return Err("cannot create note because it is a duplicate".into());
                }
                state.next_id += 1;
                let id = 1_700_000_000_000 + state.next_id;
                state.notes.insert(id, note.clone());
                Ok(json!(id))
            }
            "notesInfo" => {
                let ids: Vec<i64> = serde_json::from_value(params["notes"].clone()).unwrap_or_default();
                Ok(Value::Array(
                    ids.iter()
                        .map(|id| match state.notes.get(id) {
                            Some(note) => {
                                let fields: serde_json::Map<String, Value> = note["fields"]
                                    .as_object()
                                    .map(|f| {
                                        f.iter()
                                            .map(|(k, v)| (k.clone(), json!({ "value": v, "order": 0 })))
                                            .collect()
                                    })
                                    .unwrap_or_default();
                                json!({
                                    "noteId": id,
                                    "modelName": note["modelName"],
                                    "tags": note["tags"],
                                    "fields": fields,
                                    "cards": []
                                })
                            }
                            None => json!({}),
                        })
                        .collect(),
                ))
            }
            "updateNoteFields" => {
                let id = params["note"]["id"].as_i64().unwrap_or_default();
                let fields = params["note"]["fields"].clone();
                match state.notes.get_mut(&id) {
                    Some(note) => {
                        note["fields"] = fields;
                        Ok(Value::Null)
                    }
                    None => Err("note was not found".into()),
                }
            }
            "findNotes" | "addTags" | "removeTags" => Ok(if action == "findNotes" {
                json!([])
            } else {
                Value::Null
            }),
            other => Err(format!("unsupported action: {}", other)),
        }
    }
}

impl Respond for FakeAnki {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let action = body["action"].as_str().unwrap_or_default();
        let envelope = match self.handle(action, &body["params"]) {
            Ok(result) => json!({ "result": result, "error": null }),
            Err(message) => json!({ "result": null, "error": message }),
        };
        ResponseTemplate::new(200).set_body_json(envelope)
    }
}

async fn start_anki() -> (MockServer, FakeAnki) {
    let server = MockServer::start().await;
    let anki = FakeAnki::default();
    Mock::given(method("POST"))
        .respond_with(anki.clone())
        .mount(&server)
        .await;
    (server, anki)
}

fn gateway(endpoint: String) -> Arc<AnkiConnect> {
    let settings = ConnectionSettings {
        endpoint,
        timeout_ms: 2_000,
        ..Default::default()
    };
    let rpc = RpcClient::new(&settings)
        .unwrap()
        .with_policy(RetryPolicy::none());
    Arc::new(AnkiConnect::new(rpc))
}

fn board() -> Canvas {
    Canvas::from_json(
        r#"{
            "nodes": [
                {"id": "g1", "type": "group", "label": "Cells", "x": 0, "y": 0, "width": 1000, "height": 600, "color": "6"},
                {"id": "n1", "type": "text", "text": "Hello\n---\nWorld #biology", "x": 20, "y": 20, "width": 250, "height": 60, "color": "4"},
                {"id": "n2", "type": "file", "file": "Notes/Mitosis.md", "x": 300, "y": 20, "width": 250, "height": 60},
                {"id": "n3", "type": "link", "url": "https://en.wikipedia.org/wiki/Cell", "x": 20, "y": 200, "width": 250, "height": 60, "color": "1"},
                {"id": "n4", "type": "text", "text": "", "x": 20, "y": 400, "width": 250, "height": 60}
            ],
            "edges": [{"id": "e1", "fromNode": "n1", "toNode": "n2"}]
        }"#,
    )
    .unwrap()
}

fn source() -> SourceRef {
    SourceRef::from_path("Boards/Biology.canvas").in_vault("Study")
}

#[tokio::test]
async fn test_full_sync_then_incremental_noop() {
    let (server, anki) = start_anki().await;
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join(".canvas-anki").join("Biology.history.json");
    let history = Arc::new(JsonFileHistoryStore::new(&history_path));
    let orchestrator = SyncOrchestrator::new(
        gateway(server.uri()),
        Arc::clone(&history),
        SyncSettings::default(),
    );
    let cancel = CancellationToken::new();

    let first = orchestrator
        .sync_incremental(&board(), &source(), &cancel)
        .await
        .unwrap();
    assert!(first.success, "errors: {:?}", first.errors);
    assert_eq!(first.status, SyncStatus::Completed);
    assert_eq!(first.created, 3);
    assert_eq!(anki.count("createModel"), 1);
    assert_eq!(anki.count("createDeck"), 1);

    let notes = anki.notes();
    let n1 = notes
        .iter()
        .find(|n| n["fields"]["NodeId"] == "n1")
        .unwrap();
    let front = n1["fields"]["Front"].as_str().unwrap();
    assert!(front.starts_with("Hello"));
    assert!(front.contains("#green"));
    assert!(front.contains("obsidian://canvas-grid?vault=Study&file=Boards%2FBiology.canvas&node=n1&x=20&y=20"));
    assert_eq!(n1["fields"]["Back"], "World #biology");
    assert_eq!(n1["fields"]["Color"], "Green");
    assert_eq!(n1["fields"]["Source"], "Biology");
    assert_eq!(n1["deckName"], "Obsidian Canvas");
    assert_eq!(n1["options"]["duplicateScope"], "deck");
    let tags: Vec<&str> = n1["tags"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(tags, vec!["obsidian-canvas", "type-text", "color-green", "biology"]);

    assert!(history_path.exists());
    assert_eq!(history.load().await.unwrap().len(), 3);

    let second = orchestrator
        .sync_incremental(&board(), &source(), &cancel)
        .await
        .unwrap();
    assert!(second.success);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.created + second.updated, 0);
    assert_eq!(anki.count("addNote"), 3);
    assert_eq!(anki.count("updateNoteFields"), 0);
}

#[tokio::test]
async fn test_edit_updates_existing_note() {
    let (server, anki) = start_anki().await;
    let dir = tempfile::tempdir().unwrap();
    let history = Arc::new(JsonFileHistoryStore::new(dir.path().join("h.json")));
    let orchestrator = SyncOrchestrator::new(
        gateway(server.uri()),
        Arc::clone(&history),
        SyncSettings::default(),
    );
    let cancel = CancellationToken::new();

    let mut canvas = board();
    orchestrator
        .sync_incremental(&canvas, &source(), &cancel)
        .await
        .unwrap();

    canvas.nodes[1].kind = canvas_sync::NodeKind::Text {
        text: "Hello again---World".into(),
    };
    canvas.nodes[2].x += 100.0;

    let result = orchestrator
        .sync_incremental(&canvas, &source(), &cancel)
        .await
        .unwrap();
    assert_eq!(result.updated, 1);
    assert_eq!(result.skipped, 2);
    assert_eq!(anki.notes().len(), 3);
    assert!(anki
        .notes()
        .iter()
        .any(|n| n["fields"]["Front"].as_str().unwrap_or_default().starts_with("Hello again")));
}

#[tokio::test]
async fn test_color_selection_syncs_group_members_only_by_own_color() {
    let (server, anki) = start_anki().await;
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = SyncOrchestrator::new(
        gateway(server.uri()),
        Arc::new(JsonFileHistoryStore::new(dir.path().join("h.json"))),
        SyncSettings::default(),
    );

    let result = orchestrator
        .sync_by_colors(
            &board(),
            &source(),
            &["1".parse().unwrap()],
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.created, 1);
    assert_eq!(anki.notes()[0]["fields"]["NodeId"], "n3");
}

#[tokio::test]
async fn test_unreachable_anki_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("h.json");
    let orchestrator = SyncOrchestrator::new(
        gateway("http://127.0.0.1:9".into()),
        Arc::new(JsonFileHistoryStore::new(&history_path)),
        SyncSettings::default(),
    );

    let result = orchestrator
        .sync_incremental(&board(), &source(), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(SyncError::Connectivity)));
    assert!(!history_path.exists());
}
