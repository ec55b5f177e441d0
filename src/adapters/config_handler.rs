//! Configuration endpoints
//!
//! Writes validate the full configuration and atomically swap the in-memory
//! record; readers always see a consistent snapshot. API key values never
//! appear in config payloads — slots name an environment variable instead,
//! and unknown fields (including a literal `api_key`) are rejected by the
//! typed deserialization.

use std::env;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use super::AppState;
use crate::config::{Settings, SlotConfig};

/// GET /config — current configuration snapshot.
pub async fn get_config(State(state): State<AppState>) -> Json<Settings> {
    Json(state.settings.read().await.clone())
}

/// PUT /config — validate and replace the whole configuration.
pub async fn put_config(
    State(state): State<AppState>,
    Json(candidate): Json<Settings>,
) -> (StatusCode, Json<Value>) {
    if let Err(e) = candidate.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": e.to_string()})),
        );
    }

    *state.settings.write().await = candidate;
    (StatusCode::OK, Json(json!({"ok": true})))
}

/// POST /models/{slot}/config — replace or add one slot's configuration.
pub async fn update_slot(
    State(state): State<AppState>,
    Path(slot): Path<String>,
    Json(mut candidate): Json<SlotConfig>,
) -> (StatusCode, Json<Value>) {
    candidate.name = slot.clone();

    let mut next = state.settings.read().await.clone();
    match next.slots.iter_mut().find(|s| s.name == slot) {
        Some(existing) => *existing = candidate,
        None => next.slots.push(candidate),
    }

    if let Err(e) = next.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": e.to_string()})),
        );
    }

    *state.settings.write().await = next;
    (StatusCode::OK, Json(json!({"ok": true, "slot": slot})))
}

/// GET /models — all slots with their readiness status.
pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let settings = state.settings.read().await;
    let models: Vec<Value> = settings
        .slots
        .iter()
        .map(|slot| {
            let errors = slot_errors(slot);
            let status = if !slot.enabled {
                "disabled"
            } else if errors.is_empty() {
                "active"
            } else {
                "error"
            };
            json!({
                "name": slot.name,
                "enabled": slot.enabled,
                "provider": slot.provider.to_string(),
                "model": slot.model,
                "role": slot.role,
                "identity": slot.identity,
                "local_model": slot.local_model,
                "collaboration_enabled": slot.collaboration_enabled,
                "endpoint": slot.endpoint(),
                "api_key_env": slot.api_key_env,
                "validation_errors": errors,
                "status": status,
            })
        })
        .collect();
    Json(json!({ "models": models }))
}

/// Runtime readiness problems for one slot. Disabled slots are not checked.
fn slot_errors(slot: &SlotConfig) -> Vec<String> {
    let mut errors = Vec::new();
    if !slot.enabled {
        return errors;
    }
    if slot.endpoint().is_empty() {
        errors.push("no endpoint configured".to_string());
    }
    if !slot.local_model && slot.provider != crate::config::ProviderKind::Ollama {
        match slot.api_key_env.as_deref() {
            None | Some("") => errors.push("no api_key_env configured".to_string()),
            Some(var) if env::var(var).map(|v| v.is_empty()).unwrap_or(true) => {
                errors.push(format!("environment variable {} not set", var));
            }
            Some(_) => {}
        }
    }
    errors
}
