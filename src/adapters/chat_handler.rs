//! POST /chat — run one collaboration session to completion

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::domain::SkillExecution;
use crate::engine::{EngineError, SessionRequest};

#[derive(Debug, Deserialize)]
pub struct ChatIn {
    pub message: String,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed: Option<SkillExecution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collaboration_session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub class: String,
    pub message: String,
}

/// Blocks until the session reaches a terminal state or its deadline.
pub async fn chat(
    State(state): State<AppState>,
    Json(payload): Json<ChatIn>,
) -> (StatusCode, Json<ChatOut>) {
    let request = SessionRequest {
        message: payload.message,
        campaign_id: payload.campaign_id,
        session_id: payload.session_id,
    };

    match state.engine.clone().run_session(request).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ChatOut {
                session_id: Some(outcome.session_id.clone()),
                reply: Some(outcome.reply),
                executed: outcome.executed,
                collaboration_session: Some(outcome.session_id),
                error: None,
            }),
        ),
        Err(failure) => {
            let status = match &failure.error {
                EngineError::Busy => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Deadline => StatusCode::GATEWAY_TIMEOUT,
                EngineError::Config(_) => StatusCode::BAD_REQUEST,
                EngineError::Canceled | EngineError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (
                status,
                Json(ChatOut {
                    session_id: failure.session_id.clone(),
                    reply: None,
                    executed: None,
                    collaboration_session: failure.session_id.clone(),
                    error: Some(ErrorBody {
                        class: failure.error.class().to_string(),
                        message: failure.error.to_string(),
                    }),
                }),
            )
        }
    }
}
