//! Collaboration log endpoints: pull reads and out-of-band slot input

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::domain::{Phase, SlotEvent, INBOX_SESSION};

#[derive(Debug, Deserialize)]
pub struct HeadQuery {
    pub slot: String,
    #[serde(default = "default_n")]
    pub n: usize,
}

fn default_n() -> usize {
    1
}

/// GET /collaboration/head — last n events for a slot, newest first.
pub async fn head(State(state): State<AppState>, Query(query): Query<HeadQuery>) -> Json<Value> {
    let items = state.store.head(&query.slot, query.n).await;
    Json(json!({ "items": items }))
}

#[derive(Debug, Deserialize)]
pub struct InputIn {
    pub message: String,
}

/// POST /collaboration/input/{slot} — queue a user message for a slot.
///
/// The message is appended to the slot's inbox log and folded into the next
/// prompt the engine dispatches to that slot. It never constitutes a vote and
/// never starts a session.
pub async fn input(
    State(state): State<AppState>,
    Path(slot): Path<String>,
    Json(payload): Json<InputIn>,
) -> (StatusCode, Json<Value>) {
    if payload.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": "message content is required"})),
        );
    }

    let known = {
        let settings = state.settings.read().await;
        settings.slot(&slot).map(|s| s.enabled)
    };
    match known {
        None => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"ok": false, "error": format!("slot {} not found", slot)})),
            )
        }
        Some(false) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"ok": false, "error": format!("slot {} is not enabled", slot)})),
            )
        }
        Some(true) => {}
    }

    let event = SlotEvent::new(&slot, INBOX_SESSION, Phase::Meta, "user.input", payload.message);
    match state.store.append(event).await {
        Ok(_) => (StatusCode::OK, Json(json!({"ok": true, "slot": slot}))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ok": false, "error": e.to_string()})),
        ),
    }
}
