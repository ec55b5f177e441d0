//! Anthropic messages API

use serde::Deserialize;
use serde_json::{json, Value};

use super::{provider_error, LlmError, LlmResult};
use crate::config::SlotConfig;

/// Pinned API revision.
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub(super) async fn call(
    client: &reqwest::Client,
    slot: &SlotConfig,
    api_key: Option<&str>,
    system: &str,
    user: &str,
) -> LlmResult<String> {
    let url = format!("{}/messages", slot.endpoint());
    let body = build_request_body(slot, system, user);

    let mut request = client
        .post(&url)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&body);
    if let Some(key) = api_key {
        request = request.header("x-api-key", key);
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

    let parsed: MessagesResponse = response.json().await.map_err(|e| LlmError::Decode {
        slot: slot.name.clone(),
        reason: e.to_string(),
    })?;

    let text: String = parsed
        .content
        .iter()
        .filter_map(|block| block.text.as_deref())
        .collect();

    if parsed.content.is_empty() {
        return Err(LlmError::Decode {
            slot: slot.name.clone(),
            reason: "response contained no content blocks".to_string(),
        });
    }
    Ok(text)
}

fn build_request_body(slot: &SlotConfig, system: &str, user: &str) -> Value {
    let mut body = json!({
        "model": slot.model,
        "messages": [{"role": "user", "content": user}],
        "max_tokens": slot.params.max_tokens,
        "temperature": slot.params.temperature,
        "top_p": slot.params.top_p,
    });
    if !system.is_empty() {
        body["system"] = json!(system);
    }
    body
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    _block_type: Option<String>,
    text: Option<String>,
}
