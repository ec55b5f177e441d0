//! Skill lifecycle endpoints: test, promote, execute

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::skills::SkillError;

#[derive(Debug, Deserialize, Default)]
pub struct RunIn {
    #[serde(default = "default_message")]
    pub message: String,
}

fn default_message() -> String {
    "hello world".to_string()
}

/// GET /skills — the library, drafts included.
pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let skills = state.skills.list().await;
    Json(json!({ "skills": skills }))
}

/// POST /skills/{id}/test — run the skill in the sandbox and record the
/// report. Safe to repeat.
pub async fn test(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<RunIn>>,
) -> (StatusCode, Json<Value>) {
    let message = payload.map(|Json(p)| p.message).unwrap_or_else(default_message);
    match state.skills.test(&id, &message).await {
        Ok(report) => (StatusCode::OK, Json(json!({"ok": report.ok, "report": report}))),
        Err(e) => error_response(e),
    }
}

/// POST /skills/{id}/promote — draft to active, gated on a passing test.
pub async fn promote(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.skills.promote(&id).await {
        Ok(record) => (
            StatusCode::OK,
            Json(json!({"ok": true, "skill": record.name, "state": record.state})),
        ),
        Err(e) => error_response(e),
    }
}

/// POST /skills/{id}/execute — run an active skill against a message.
pub async fn execute(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<RunIn>>,
) -> (StatusCode, Json<Value>) {
    let message = payload.map(|Json(p)| p.message).unwrap_or_else(default_message);
    match state.skills.execute(&id, &message).await {
        Ok(report) => (StatusCode::OK, Json(json!({"ok": report.ok, "report": report}))),
        Err(e) => error_response(e),
    }
}

fn error_response(err: SkillError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        SkillError::NotFound(_) => StatusCode::NOT_FOUND,
        SkillError::NotTested(_) | SkillError::NotActive(_) => StatusCode::CONFLICT,
        SkillError::Sandbox(_) | SkillError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"ok": false, "error": err.to_string()})))
}
