//! Ollama chat API (local models, no auth)

use serde::Deserialize;
use serde_json::{json, Value};

use super::{provider_error, LlmError, LlmResult};
use crate::config::SlotConfig;

pub(super) async fn call(
    client: &reqwest::Client,
    slot: &SlotConfig,
    system: &str,
    user: &str,
) -> LlmResult<String> {
    let url = format!("{}/api/chat", slot.endpoint());
    let body = build_request_body(slot, system, user);

    let response = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| LlmError::transport(&slot.name, e))?;

    let status = response.status();
    if !status.is_success() {
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        return Err(provider_error(slot, status, &headers, body));
    }

    let parsed: OllamaResponse = response.json().await.map_err(|e| LlmError::Decode {
        slot: slot.name.clone(),
        reason: e.to_string(),
    })?;

    Ok(parsed.message.content)
}

fn build_request_body(slot: &SlotConfig, system: &str, user: &str) -> Value {
    let mut messages = Vec::new();
    if !system.is_empty() {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": user}));

    json!({
        "model": slot.model,
        "messages": messages,
        "stream": false,
        "options": {
            "temperature": slot.params.temperature,
            "top_p": slot.params.top_p,
            "num_ctx": slot.params.context_length,
            "num_predict": slot.params.max_tokens,
        }
    })
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}
