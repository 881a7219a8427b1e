//! SchemaManager: keeps the engine-owned note type in the shape the engine
//! writes.
//!
//! `ensure_schema_ready` is idempotent and cheap when nothing drifted, so the
//! orchestrator calls it at the start of every run:
//!
//! 1. Missing note type: create it with the required fields, the card
//!    template and the stylesheet.
//! 2. Field set differs (order-insensitive): add missing fields one at a time
//!    at their canonical index, then remove extras one at a time in reverse
//!    order, then push the template and stylesheet unconditionally.
//! 3. Fields match: re-push template or stylesheet only if they drifted.

use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::remote::{CardTemplate, ModelSpec, NoteFields, RemoteStore};

pub const TEMPLATE_NAME: &str = "Canvas Card";

const FRONT_TEMPLATE: &str = "<div class=\"canvas-card front\">{{Front}}</div>";

const BACK_TEMPLATE: &str = r#"<div class="canvas-card front">{{FrontSide}}</div>

<hr id="answer">

<div class="canvas-card back">{{Back}}</div>

<div class="source-info">
  {{#Source}}<span class="source">{{Source}}</span>{{/Source}}
  {{#Color}}<span class="color">{{Color}}</span>{{/Color}}
  <span class="node-id">{{NodeId}}</span>
</div>"#;

pub const CARD_CSS: &str = r#".card {
  font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
  font-size: 18px;
  line-height: 1.5;
  text-align: left;
  color: #1f2328;
  background-color: #ffffff;
  padding: 16px;
}

.canvas-card a {
  color: #7b6cd9;
  text-decoration: none;
  font-size: 13px;
}

hr#answer {
  border: none;
  border-top: 1px solid #d0d7de;
  margin: 16px 0;
}

.source-info {
  margin-top: 24px;
  font-size: 12px;
  color: #656d76;
}

.source-info span + span {
  margin-left: 8px;
}

.source-info .node-id {
  display: none;
}

.nightMode.card,
.night_mode .card {
  color: #e6edf3;
  background-color: #1e1e1e;
}

.nightMode .source-info,
.night_mode .source-info {
  color: #8b949e;
}

.nightMode hr#answer,
.night_mode hr#answer {
  border-top-color: #30363d;
}
"#;

/// Field names the note type must have, in canonical order.
pub fn required_fields() -> Vec<String> {
    NoteFields::NAMES.iter().map(|f| f.to_string()).collect()
}

pub fn canonical_templates() -> Vec<CardTemplate> {
    vec![CardTemplate {
        name: TEMPLATE_NAME.to_string(),
        front: FRONT_TEMPLATE.to_string(),
        back: BACK_TEMPLATE.to_string(),
    }]
}

pub fn model_spec(model_name: &str) -> ModelSpec {
    ModelSpec {
        name: model_name.to_string(),
        fields: required_fields(),
        css: CARD_CSS.to_string(),
        templates: canonical_templates(),
    }
}

/// Field changes needed to turn `current` into the required set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPlan {
    /// `(canonical index, name)` of fields to add.
    pub missing: Vec<(usize, String)>,
    /// Fields to remove, in the order they appear remotely.
    pub extra: Vec<String>,
}

impl FieldPlan {
    pub fn diff(current: &[String], required: &[String]) -> Self {
        let current_set: HashSet<&str> = current.iter().map(String::as_str).collect();
        let required_set: HashSet<&str> = required.iter().map(String::as_str).collect();

        let missing = required
            .iter()
            .enumerate()
            .filter(|(_, f)| !current_set.contains(f.as_str()))
            .map(|(i, f)| (i, f.clone()))
            .collect();
        let extra = current
            .iter()
            .filter(|f| !required_set.contains(f.as_str()))
            .cloned()
            .collect();

        Self { missing, extra }
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// Ensures the dedicated note type exists with the required fields.
pub struct SchemaManager<'a, R: RemoteStore + ?Sized> {
    remote: &'a R,
    model_name: &'a str,
}

impl<'a, R: RemoteStore + ?Sized> SchemaManager<'a, R> {
    pub fn new(remote: &'a R, model_name: &'a str) -> Self {
        Self { remote, model_name }
    }

    /// Create or reconcile the note type. Returns false when it could not be
    /// brought into the required shape.
    pub async fn ensure_schema_ready(&self) -> bool {
        if !self.remote.model_exists(self.model_name).await {
            info!("Creating note type '{}'", self.model_name);
            let created = self.remote.create_model(&model_spec(self.model_name)).await;
            if !created {
                warn!("Failed to create note type '{}'", self.model_name);
            }
            return created;
        }

        let Some(current) = self.remote.model_field_names(self.model_name).await else {
            warn!("Could not read fields of note type '{}'", self.model_name);
            return false;
        };

        let required = required_fields();
        let plan = FieldPlan::diff(&current, &required);
        if plan.is_empty() {
            debug!("Note type '{}' fields up to date", self.model_name);
            return self.refresh_presentation().await;
        }

        info!(
            "Reconciling note type '{}': adding {:?}, removing {:?}",
            self.model_name, plan.missing, plan.extra
        );
        if !self.apply_field_plan(&plan).await {
            return false;
        }

        match self.remote.model_field_names(self.model_name).await {
            Some(fields) if FieldPlan::diff(&fields, &required).is_empty() => {}
            other => {
                warn!(
                    "Note type '{}' still differs after reconciliation: {:?}",
                    self.model_name, other
                );
                return false;
            }
        }

        self.push_presentation().await
    }

    async fn apply_field_plan(&self, plan: &FieldPlan) -> bool {
        // Adding first keeps the note type from ever dropping to zero fields.
        for (index, field) in &plan.missing {
            if !self.remote.model_field_add(self.model_name, field, *index).await {
                warn!("Failed to add field '{}' to '{}'", field, self.model_name);
                return false;
            }
        }
        // Reverse order so positional implementations keep valid indices.
        for field in plan.extra.iter().rev() {
            if !self.remote.model_field_remove(self.model_name, field).await {
                warn!("Failed to remove field '{}' from '{}'", field, self.model_name);
                return false;
            }
        }
        true
    }

    async fn push_presentation(&self) -> bool {
        let templates_ok = self
            .remote
            .update_model_templates(self.model_name, &canonical_templates())
            .await;
        let styling_ok = self
            .remote
            .update_model_styling(self.model_name, CARD_CSS)
            .await;
        if !(templates_ok && styling_ok) {
            warn!("Failed to update templates/styling of '{}'", self.model_name);
        }
        templates_ok && styling_ok
    }

    /// Re-push template and stylesheet only where they differ from canonical.
    async fn refresh_presentation(&self) -> bool {
        let mut ok = true;

        let templates = canonical_templates();
        if self.remote.model_templates(self.model_name).await.as_ref() != Some(&templates) {
            debug!("Template drift on '{}'", self.model_name);
            ok &= self
                .remote
                .update_model_templates(self.model_name, &templates)
                .await;
        }

        if self.remote.model_styling(self.model_name).await.as_deref() != Some(CARD_CSS) {
            debug!("Styling drift on '{}'", self.model_name);
            ok &= self
                .remote
                .update_model_styling(self.model_name, CARD_CSS)
                .await;
        }

        if !ok {
            warn!("Failed to refresh presentation of '{}'", self.model_name);
        }
        ok
    }
}
