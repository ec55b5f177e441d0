//! Provider-agnostic LLM client
//!
//! A unified single-shot chat call over the supported wire shapes:
//! - OpenAI-compatible chat completions (also used for custom endpoints)
//! - Anthropic messages
//! - Ollama chat (local models)
//!
//! API keys come from the environment variable named in the slot config and
//! are never logged. Transient failures retry with exponential backoff;
//! everything else surfaces as a typed, class-tagged error.

mod anthropic;
mod ollama;
mod openai;

use std::env;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ProviderKind, SlotConfig};

/// Maximum retry attempts on transient errors.
const MAX_RETRIES: u32 = 3;

/// Base backoff, doubled per attempt.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Upper bound of the random jitter added to each backoff.
const JITTER_MS: u64 = 250;

/// Default per-call deadline when the caller sets none.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("[{slot}] configuration error: {reason}")]
    Config { slot: String, reason: String },

    #[error("[{slot}] transport error: {reason}")]
    Transport { slot: String, reason: String },

    #[error("[{slot}] provider returned {status}: {reason}")]
    Provider {
        slot: String,
        status: u16,
        reason: String,
        retry_after_ms: Option<u64>,
    },

    #[error("[{slot}] call exceeded its deadline")]
    Timeout { slot: String },

    #[error("[{slot}] call canceled")]
    Canceled { slot: String },

    #[error("[{slot}] malformed provider response: {reason}")]
    Decode { slot: String, reason: String },
}

impl LlmError {
    /// Short class tag recorded in slot events.
    pub fn class(&self) -> &'static str {
        match self {
            LlmError::Config { .. } => "config",
            LlmError::Transport { .. } => "transport",
            LlmError::Provider { status, .. } if *status >= 500 => "provider_5xx",
            LlmError::Provider { .. } => "provider_4xx",
            LlmError::Timeout { .. } => "timeout",
            LlmError::Canceled { .. } => "canceled",
            LlmError::Decode { .. } => "decode",
        }
    }

    /// Whether retrying could help. 429 is the only retryable 4xx.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Transport { .. } => true,
            LlmError::Provider { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    fn transport(slot: &str, err: reqwest::Error) -> Self {
        LlmError::Transport {
            slot: slot.to_string(),
            reason: err.to_string(),
        }
    }
}

pub type LlmResult<T> = Result<T, LlmError>;

/// Call metadata recorded alongside the reply text.
#[derive(Debug, Clone)]
pub struct CallMeta {
    pub provider: ProviderKind,
    pub model: String,
    pub duration_ms: u64,
    pub retries: u32,
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub meta: CallMeta,
}

/// The seam between the slot runtime and the wire. Tests substitute a
/// scripted implementation; production uses [`HttpLlmClient`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn call(
        &self,
        slot: &SlotConfig,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> LlmResult<ChatReply>;
}

pub struct HttpLlmClient {
    client: reqwest::Client,
    call_timeout: Duration,
}

impl HttpLlmClient {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            call_timeout,
        }
    }

    /// Resolve the API key for a slot. Local models and ollama need none.
    fn api_key(slot: &SlotConfig) -> LlmResult<Option<String>> {
        if slot.local_model || slot.provider == ProviderKind::Ollama {
            return Ok(None);
        }
        let env_var = slot.api_key_env.as_deref().filter(|v| !v.is_empty()).ok_or_else(|| {
            LlmError::Config {
                slot: slot.name.clone(),
                reason: "no api_key_env configured for remote slot".to_string(),
            }
        })?;
        match env::var(env_var) {
            Ok(key) if !key.is_empty() => Ok(Some(key)),
            _ => Err(LlmError::Config {
                slot: slot.name.clone(),
                reason: format!("environment variable {} not set", env_var),
            }),
        }
    }

    async fn dispatch(
        &self,
        slot: &SlotConfig,
        api_key: Option<&str>,
        system: &str,
        user: &str,
    ) -> LlmResult<String> {
        if slot.endpoint().is_empty() {
            return Err(LlmError::Config {
                slot: slot.name.clone(),
                reason: "no endpoint configured".to_string(),
            });
        }
        match slot.provider {
            ProviderKind::OpenaiCompatible | ProviderKind::CustomOpenaiCompatible => {
                openai::call(&self.client, slot, api_key, system, user).await
            }
            ProviderKind::Anthropic => {
                anthropic::call(&self.client, slot, api_key, system, user).await
            }
            ProviderKind::Ollama => ollama::call(&self.client, slot, system, user).await,
        }
    }

    async fn call_with_retries(
        &self,
        slot: &SlotConfig,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
        retries_out: &mut u32,
    ) -> LlmResult<String> {
        let api_key = Self::api_key(slot)?;

        let mut attempt: u32 = 0;
        loop {
            match self.dispatch(slot, api_key.as_deref(), system, user).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                    let backoff = match &err {
                        LlmError::Provider {
                            retry_after_ms: Some(ms),
                            ..
                        } => Duration::from_millis(*ms),
                        _ => {
                            let jitter = rand::thread_rng().gen_range(0..=JITTER_MS);
                            BACKOFF_BASE * 2u32.pow(attempt) + Duration::from_millis(jitter)
                        }
                    };
                    warn!(
                        slot = %slot.name,
                        class = err.class(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Transient LLM error, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(LlmError::Canceled { slot: slot.name.clone() });
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    attempt += 1;
                    *retries_out = attempt;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn call(
        &self,
        slot: &SlotConfig,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> LlmResult<ChatReply> {
        let start = Instant::now();
        let mut retries = 0u32;

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(LlmError::Canceled { slot: slot.name.clone() }),
            outcome = tokio::time::timeout(
                self.call_timeout,
                self.call_with_retries(slot, system, user, cancel, &mut retries),
            ) => match outcome {
                Ok(r) => r,
                Err(_) => Err(LlmError::Timeout { slot: slot.name.clone() }),
            },
        };

        let text = result?;
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(slot = %slot.name, duration_ms, retries, "LLM call complete");
        Ok(ChatReply {
            text,
            meta: CallMeta {
                provider: slot.provider,
                model: slot.model.clone(),
                duration_ms,
                retries,
            },
        })
    }
}

/// Map a non-success HTTP status to a provider error, extracting Retry-After
/// from throttling responses.
pub(crate) fn provider_error(
    slot: &SlotConfig,
    status: reqwest::StatusCode,
    headers: &reqwest::header::HeaderMap,
    body: String,
) -> LlmError {
    let retry_after_ms = if status.as_u16() == 429 {
        headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000)
    } else {
        None
    };
    LlmError::Provider {
        slot: slot.name.clone(),
        status: status.as_u16(),
        reason: body,
        retry_after_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlotParams;

    fn slot(provider: ProviderKind, api_key_env: Option<&str>) -> SlotConfig {
        SlotConfig {
            name: "analyst".to_string(),
            enabled: true,
            provider,
            endpoint: Some("https://example.invalid/v1".to_string()),
            model: "test-model".to_string(),
            api_key_env: api_key_env.map(String::from),
            local_model: false,
            identity: String::new(),
            role: String::new(),
            prompt: String::new(),
            params: SlotParams::default(),
            collaboration_enabled: true,
            collaboration_directory: None,
        }
    }

    #[test]
    fn test_error_classes() {
        let config = LlmError::Config {
            slot: "a".into(),
            reason: "x".into(),
        };
        assert_eq!(config.class(), "config");
        assert!(!config.is_transient());

        let throttled = LlmError::Provider {
            slot: "a".into(),
            status: 429,
            reason: "slow down".into(),
            retry_after_ms: Some(1000),
        };
        assert_eq!(throttled.class(), "provider_4xx");
        assert!(throttled.is_transient());

        let server = LlmError::Provider {
            slot: "a".into(),
            status: 503,
            reason: "unavailable".into(),
            retry_after_ms: None,
        };
        assert_eq!(server.class(), "provider_5xx");
        assert!(server.is_transient());

        let bad_request = LlmError::Provider {
            slot: "a".into(),
            status: 400,
            reason: "bad".into(),
            retry_after_ms: None,
        };
        assert!(!bad_request.is_transient());
    }

    #[test]
    fn test_missing_env_var_is_config_error() {
        let slot = slot(ProviderKind::OpenaiCompatible, Some("CONCLAVE_TEST_UNSET_KEY"));
        let err = HttpLlmClient::api_key(&slot).unwrap_err();
        assert_eq!(err.class(), "config");
    }

    #[test]
    fn test_local_model_needs_no_key() {
        let mut slot = slot(ProviderKind::OpenaiCompatible, None);
        slot.local_model = true;
        assert!(HttpLlmClient::api_key(&slot).unwrap().is_none());
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let slot = slot(ProviderKind::Ollama, None);
        assert!(HttpLlmClient::api_key(&slot).unwrap().is_none());
    }

    #[test]
    fn test_retry_after_extracted_from_throttle() {
        let slot = slot(ProviderKind::OpenaiCompatible, Some("KEY"));
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "2".parse().unwrap());

        let err = provider_error(
            &slot,
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            &headers,
            "slow down".to_string(),
        );
        match err {
            LlmError::Provider {
                status,
                retry_after_ms,
                ..
            } => {
                assert_eq!(status, 429);
                assert_eq!(retry_after_ms, Some(2000));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // Retry-After is only honored on throttling responses.
        let err = provider_error(
            &slot,
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            &headers,
            "down".to_string(),
        );
        match err {
            LlmError::Provider { retry_after_ms, .. } => assert_eq!(retry_after_ms, None),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
