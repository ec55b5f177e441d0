use std::collections::HashMap;

use thiserror::Error;

use crate::config::{ProviderKind, Settings, SlotConfig};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Duplicate entry: {0}")]
    Duplicate(String),

    #[error("Required slot error: {0}")]
    RequiredSlot(String),
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if settings.server.host.is_empty() {
            errors.push(ValidationError::MissingField("server.host".to_string()));
        }
        if settings.server.port == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "server.port".to_string(),
                reason: "Port must be greater than 0".to_string(),
            });
        }

        Self::validate_slots(&settings.slots, &mut errors);
        Self::validate_weights(settings, &mut errors);

        // dexter must exist and be enabled for any session to run.
        match settings.slot("dexter") {
            None => errors.push(ValidationError::RequiredSlot(
                "slot 'dexter' must be configured".to_string(),
            )),
            Some(dexter) if !dexter.enabled => errors.push(ValidationError::RequiredSlot(
                "slot 'dexter' must be enabled".to_string(),
            )),
            Some(_) => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_slots(slots: &[SlotConfig], errors: &mut Vec<ValidationError>) {
        let mut seen = HashMap::new();

        for (idx, slot) in slots.iter().enumerate() {
            if let Some(prev) = seen.insert(&slot.name, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Slot name '{}' appears at indices {} and {}",
                    slot.name, prev, idx
                )));
            }

            if slot.name.is_empty() {
                errors.push(ValidationError::MissingField(format!("slots[{}].name", idx)));
            } else if slot.name != slot.name.to_lowercase() {
                errors.push(ValidationError::InvalidValue {
                    field: format!("slots[{}].name", idx),
                    reason: "slot names must be lowercase".to_string(),
                });
            }

            if slot.model.is_empty() {
                errors.push(ValidationError::MissingField(format!("slots[{}].model", idx)));
            }

            // Remote slots need an endpoint and an API key env var name;
            // local-model and ollama slots do not.
            if !slot.local_model && slot.provider != ProviderKind::Ollama {
                if slot.endpoint.as_deref().unwrap_or("").is_empty() {
                    errors.push(ValidationError::MissingField(format!(
                        "slots[{}].endpoint (required for remote slot '{}')",
                        idx, slot.name
                    )));
                }
                if slot.api_key_env.as_deref().unwrap_or("").is_empty() {
                    errors.push(ValidationError::MissingField(format!(
                        "slots[{}].api_key_env (required for remote slot '{}')",
                        idx, slot.name
                    )));
                }
            }

            if let Some(endpoint) = &slot.endpoint {
                if !endpoint.is_empty()
                    && !endpoint.starts_with("http://")
                    && !endpoint.starts_with("https://")
                {
                    errors.push(ValidationError::InvalidValue {
                        field: format!("slots[{}].endpoint", idx),
                        reason: format!("'{}' is not an absolute http(s) URL", endpoint),
                    });
                }
            }

            Self::validate_params(idx, slot, errors);
        }
    }

    fn validate_params(idx: usize, slot: &SlotConfig, errors: &mut Vec<ValidationError>) {
        let p = &slot.params;
        let mut bad = |field: &str, reason: String| {
            errors.push(ValidationError::InvalidValue {
                field: format!("slots[{}].params.{}", idx, field),
                reason,
            });
        };

        if !(0.0..=2.0).contains(&p.temperature) {
            bad("temperature", format!("{} outside [0, 2]", p.temperature));
        }
        if !(0.0..=1.0).contains(&p.top_p) {
            bad("top_p", format!("{} outside [0, 1]", p.top_p));
        }
        if p.max_tokens == 0 {
            bad("max_tokens", "must be greater than 0".to_string());
        }
        if !(-2.0..=2.0).contains(&p.frequency_penalty) {
            bad("frequency_penalty", format!("{} outside [-2, 2]", p.frequency_penalty));
        }
        if !(-2.0..=2.0).contains(&p.presence_penalty) {
            bad("presence_penalty", format!("{} outside [-2, 2]", p.presence_penalty));
        }
        if p.context_length == 0 {
            bad("context_length", "must be greater than 0".to_string());
        }
    }

    fn validate_weights(settings: &Settings, errors: &mut Vec<ValidationError>) {
        for (name, weight) in &settings.vote_weights {
            if *weight < 0.0 || !weight.is_finite() {
                errors.push(ValidationError::InvalidValue {
                    field: format!("vote_weights.{}", name),
                    reason: format!("{} is not a nonnegative finite number", weight),
                });
            }
        }
        // Unknown weight names are tolerated; the engine emits a warning
        // event for them at session start.
    }
}
