//! Isolated execution of candidate skills
//!
//! The engine depends only on the [`SandboxRunner`] contract. Two back-ends
//! are provided: an interpreter subprocess with a scratch directory, and a
//! container runner for installations that want memory and network isolation
//! enforced by the OS.

mod container;
mod process;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::SandboxSettings;
use crate::domain::CandidateSkill;

pub use container::ContainerSandbox;
pub use process::ProcessSandbox;

/// Marker appended when captured stdout exceeds the cap.
pub const TRUNCATION_MARKER: &str = "\n...[output truncated]";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Sandbox setup failed: {0}")]
    Setup(#[from] std::io::Error),

    #[error("Unknown sandbox provider: {0}")]
    UnknownProvider(String),
}

#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub timeout: Duration,
    pub memory_mib: u64,
    pub stdout_cap_bytes: usize,
}

impl SandboxLimits {
    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout_secs),
            memory_mib: settings.memory_mib,
            stdout_cap_bytes: settings.stdout_cap_bytes,
        }
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            memory_mib: 256,
            stdout_cap_bytes: 1024 * 1024,
        }
    }
}

/// Result of one sandboxed run.
///
/// `ok` means the skill exited 0 within the deadline and produced output on
/// stdout.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxReport {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn run(
        &self,
        skill: &CandidateSkill,
        input: &str,
        limits: &SandboxLimits,
    ) -> Result<SandboxReport, SandboxError>;
}

/// Build the configured sandbox back-end.
pub fn create_sandbox(settings: &SandboxSettings) -> Result<Arc<dyn SandboxRunner>, SandboxError> {
    match settings.provider.as_str() {
        "process" => Ok(Arc::new(ProcessSandbox::new(&settings.interpreter))),
        "container" => Ok(Arc::new(ContainerSandbox::new(&settings.image))),
        other => Err(SandboxError::UnknownProvider(other.to_string())),
    }
}

/// Cap captured output, marking the cut.
pub(crate) fn cap_output(raw: Vec<u8>, cap: usize) -> String {
    let mut text = String::from_utf8_lossy(&raw).into_owned();
    if text.len() > cap {
        text.truncate(cap);
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

/// Scratch-side launcher invoking the skill's entry with the input message.
pub(crate) fn launcher_source(entry: &str) -> String {
    format!(
        "import sys\nimport skill\n\nif __name__ == \"__main__\":\n    print(skill.{}(sys.argv[1]))\n",
        entry
    )
}
