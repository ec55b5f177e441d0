use std::collections::HashMap;
use std::path::Path;

use config::{Config, File};
use serde::{Deserialize, Serialize};

pub mod validator;
pub mod watcher;

use crate::cli::Cli;

/// Default endpoint for local models when none is configured.
pub const LOCAL_ENDPOINT: &str = "http://localhost:11434";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    /// The team. Order is not significant; names must be unique.
    #[serde(default)]
    pub slots: Vec<SlotConfig>,
    /// Vote weight per slot name. Absent slots default to 1.0.
    #[serde(default)]
    pub vote_weights: HashMap<String, f64>,
    #[serde(default)]
    pub collaboration: CollaborationSettings,
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub limits: LimitSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    OpenaiCompatible,
    Anthropic,
    Ollama,
    CustomOpenaiCompatible,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenaiCompatible => write!(f, "openai-compatible"),
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::Ollama => write!(f, "ollama"),
            ProviderKind::CustomOpenaiCompatible => write!(f, "custom-openai-compatible"),
        }
    }
}

/// Declarative configuration of one LLM slot.
///
/// Unknown fields are rejected at load time so a typo in the config file
/// fails fast instead of silently configuring nothing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SlotConfig {
    /// Unique lowercase identifier, stable across reloads.
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    pub provider: ProviderKind,
    /// Absolute URL of the provider's chat resource base.
    #[serde(default)]
    pub endpoint: Option<String>,
    pub model: String,
    /// Name of the environment variable holding the API key. The key value
    /// itself is never persisted in config.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// When true, api_key_env is ignored and the endpoint defaults to the
    /// local model endpoint.
    #[serde(default)]
    pub local_model: bool,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub role: String,
    /// System prompt.
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub params: SlotParams,
    #[serde(default = "default_true")]
    pub collaboration_enabled: bool,
    /// Opaque identifier for the slot's log namespace.
    #[serde(default)]
    pub collaboration_directory: Option<String>,
}

impl SlotConfig {
    /// Resolved endpoint honoring the local-model default.
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(e) => e.trim_end_matches('/').to_string(),
            None if self.local_model => LOCAL_ENDPOINT.to_string(),
            None => String::new(),
        }
    }

    /// Whether this slot participates in collaboration sessions.
    pub fn participates(&self) -> bool {
        self.enabled && self.collaboration_enabled
    }

    /// System prompt composed from identity, role and the configured prompt.
    pub fn system_prompt(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for p in [&self.identity, &self.role, &self.prompt] {
            if !p.trim().is_empty() {
                parts.push(p.trim());
            }
        }
        parts.join("\n\n")
    }
}

/// Sampling knobs passed through to the provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SlotParams {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default = "default_context_length")]
    pub context_length: u32,
}

impl Default for SlotParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            context_length: default_context_length(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_context_length() -> u32 {
    8192
}

fn default_true() -> bool {
    true
}

/// Knobs for the collaboration store and event bus.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollaborationSettings {
    /// Root directory for JSONL log persistence. None keeps logs in memory
    /// only.
    #[serde(default)]
    pub persist_root: Option<String>,
    #[serde(default = "default_log_cap")]
    pub max_events_per_log: usize,
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: usize,
}

impl Default for CollaborationSettings {
    fn default() -> Self {
        Self {
            persist_root: None,
            max_events_per_log: default_log_cap(),
            bus_capacity: default_bus_capacity(),
            max_subscribers: default_max_subscribers(),
        }
    }
}

fn default_log_cap() -> usize {
    1024
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_max_subscribers() -> usize {
    64
}

/// Sandbox provider selection and limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SandboxSettings {
    #[serde(default = "default_sandbox_provider")]
    pub provider: String,
    /// Interpreter for the process back-end.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Image for the container back-end.
    #[serde(default = "default_sandbox_image")]
    pub image: String,
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u64,
    #[serde(default = "default_stdout_cap")]
    pub stdout_cap_bytes: usize,
    /// Directory where promoted skills are kept.
    #[serde(default = "default_skills_dir")]
    pub skills_dir: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            provider: default_sandbox_provider(),
            interpreter: default_interpreter(),
            image: default_sandbox_image(),
            timeout_secs: default_sandbox_timeout(),
            memory_mib: default_memory_mib(),
            stdout_cap_bytes: default_stdout_cap(),
            skills_dir: default_skills_dir(),
        }
    }
}

fn default_sandbox_provider() -> String {
    "process".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_sandbox_image() -> String {
    "python:3.11-slim".to_string()
}

fn default_sandbox_timeout() -> u64 {
    10
}

fn default_memory_mib() -> u64 {
    256
}

fn default_stdout_cap() -> usize {
    1024 * 1024
}

fn default_skills_dir() -> String {
    "./skills".to_string()
}

/// Deadlines and concurrency caps.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitSettings {
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_phase_timeout")]
    pub phase_timeout_secs: u64,
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_calls_per_slot")]
    pub max_calls_per_slot: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
            phase_timeout_secs: default_phase_timeout(),
            session_timeout_secs: default_session_timeout(),
            max_sessions: default_max_sessions(),
            max_calls_per_slot: default_calls_per_slot(),
        }
    }
}

fn default_call_timeout() -> u64 {
    120
}

fn default_phase_timeout() -> u64 {
    90
}

fn default_session_timeout() -> u64 {
    600
}

fn default_max_sessions() -> usize {
    32
}

fn default_calls_per_slot() -> usize {
    4
}

impl Settings {
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_path(Path::new("conclave.toml"))
    }

    /// Create settings from CLI arguments (config file plus CLI overrides).
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let mut settings = Self::from_path(&cli.config)?;
        settings.apply_cli_overrides(cli);
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: &Path) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3900)?
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        Ok(settings)
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
    }

    /// Run the validator, collapsing its error list into one message.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        validator::ConfigValidator::validate(self).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!("Configuration validation failed:\n{}", messages.join("\n"))
        })
    }

    pub fn slot(&self, name: &str) -> Option<&SlotConfig> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// Slots dispatched in collaboration sessions, dexter included.
    pub fn participating_slots(&self) -> Vec<&SlotConfig> {
        self.slots.iter().filter(|s| s.participates()).collect()
    }

    /// Vote weight for a slot; absent names default to 1.0.
    pub fn weight(&self, slot: &str) -> f64 {
        self.vote_weights.get(slot).copied().unwrap_or(1.0)
    }

    /// Weight names that do not match any configured slot. Reported as
    /// warnings, never errors.
    pub fn unknown_weight_names(&self) -> Vec<String> {
        self.vote_weights
            .keys()
            .filter(|name| self.slot(name).is_none())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn slot(name: &str, enabled: bool) -> SlotConfig {
        SlotConfig {
            name: name.to_string(),
            enabled,
            provider: ProviderKind::OpenaiCompatible,
            endpoint: Some("https://api.openai.com/v1".to_string()),
            model: "gpt-4o-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            local_model: false,
            identity: String::new(),
            role: String::new(),
            prompt: String::new(),
            params: SlotParams::default(),
            collaboration_enabled: true,
            collaboration_directory: None,
        }
    }

    fn settings_with(slots: Vec<SlotConfig>) -> Settings {
        Settings {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 3900,
            },
            slots,
            vote_weights: HashMap::new(),
            collaboration: Default::default(),
            sandbox: Default::default(),
            limits: Default::default(),
        }
    }

    #[test]
    fn test_local_model_endpoint_default() {
        let mut s = slot("dexter", true);
        s.endpoint = None;
        s.local_model = true;
        assert_eq!(s.endpoint(), LOCAL_ENDPOINT);
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let mut s = slot("dexter", true);
        s.endpoint = Some("https://api.openai.com/v1/".to_string());
        assert_eq!(s.endpoint(), "https://api.openai.com/v1");
    }

    #[test]
    fn test_system_prompt_composition() {
        let mut s = slot("dexter", true);
        s.identity = "You are Dexter.".to_string();
        s.role = "Chief orchestrator.".to_string();
        s.prompt = String::new();
        assert_eq!(s.system_prompt(), "You are Dexter.\n\nChief orchestrator.");
    }

    #[test]
    fn test_default_weight_is_one() {
        let settings = settings_with(vec![slot("dexter", true)]);
        assert_eq!(settings.weight("dexter"), 1.0);
    }

    #[test]
    fn test_unknown_weight_names() {
        let mut settings = settings_with(vec![slot("dexter", true)]);
        settings.vote_weights.insert("ghost".to_string(), 0.5);
        settings.vote_weights.insert("dexter".to_string(), 1.0);
        assert_eq!(settings.unknown_weight_names(), vec!["ghost".to_string()]);
    }

    #[test]
    fn test_participating_excludes_disabled() {
        let mut analyst = slot("analyst", true);
        analyst.collaboration_enabled = false;
        let settings = settings_with(vec![slot("dexter", true), analyst, slot("engineer", false)]);
        let names: Vec<&str> = settings.participating_slots().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["dexter"]);
    }

    #[test]
    fn test_unknown_slot_field_rejected() {
        let toml = r#"
            name = "dexter"
            provider = "ollama"
            model = "llama3.1"
            surprise = true
        "#;
        let parsed: Result<SlotConfig, _> = toml::from_str(toml);
        assert!(parsed.is_err());
    }
}
