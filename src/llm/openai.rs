//! OpenAI-compatible chat completions (also covers custom endpoints)

use serde::Deserialize;
use serde_json::{json, Value};

use super::{provider_error, LlmError, LlmResult};
use crate::config::SlotConfig;

pub(super) async fn call(
    client: &reqwest::Client,
    slot: &SlotConfig,
    api_key: Option<&str>,
    system: &str,
    user: &str,
) -> LlmResult<String> {
    let url = format!("{}/chat/completions", slot.endpoint());
    let body = build_request_body(slot, system, user);

    let mut request = client.post(&url).json(&body);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }

    let response = request
        .send()
        .await
        .map_err(|e| LlmError::transport(&slot.name, e))?;

    let status = response.status();
    if !status.is_success() {
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        return Err(provider_error(slot, status, &headers, body));
    }

    let parsed: ChatCompletionResponse = response.json().await.map_err(|e| LlmError::Decode {
        slot: slot.name.clone(),
        reason: e.to_string(),
    })?;

    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| LlmError::Decode {
            slot: slot.name.clone(),
            reason: "response contained no choices".to_string(),
        })
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
        "temperature": slot.params.temperature,
        "top_p": slot.params.top_p,
        "max_tokens": slot.params.max_tokens,
        "frequency_penalty": slot.params.frequency_penalty,
        "presence_penalty": slot.params.presence_penalty,
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}
