//! Interpreter-subprocess sandbox back-end

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{cap_output, launcher_source, SandboxError, SandboxLimits, SandboxReport, SandboxRunner};
use crate::domain::CandidateSkill;

/// Runs skills as an interpreter subprocess inside a throwaway scratch
/// directory with a stripped environment.
///
/// Enforces the wall-clock deadline and output caps; the memory cap and
/// network isolation are the container back-end's job.
pub struct ProcessSandbox {
    interpreter: String,
}

impl ProcessSandbox {
    pub fn new(interpreter: &str) -> Self {
        Self {
            interpreter: interpreter.to_string(),
        }
    }
}

#[async_trait]
impl SandboxRunner for ProcessSandbox {
    async fn run(
        &self,
        skill: &CandidateSkill,
        input: &str,
        limits: &SandboxLimits,
    ) -> Result<SandboxReport, SandboxError> {
        let scratch = tempfile::tempdir()?;
        std::fs::write(scratch.path().join("skill.py"), &skill.source)?;
        std::fs::write(scratch.path().join("main.py"), launcher_source(&skill.entry))?;

        let started = Instant::now();
        let path = std::env::var("PATH").unwrap_or_default();
        let child = Command::new(&self.interpreter)
            .arg("main.py")
            .arg(input)
            .current_dir(scratch.path())
            .env_clear()
            .env("PATH", path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let report = match tokio::time::timeout(limits.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = cap_output(output.stdout, limits.stdout_cap_bytes);
                let stderr = cap_output(output.stderr, limits.stdout_cap_bytes);
                let exit_code = output.status.code().unwrap_or(-1);
                SandboxReport {
                    ok: exit_code == 0 && !stdout.trim().is_empty(),
                    stdout,
                    stderr,
                    exit_code,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
            Ok(Err(e)) => return Err(SandboxError::Setup(e)),
            // Deadline hit; dropping the future kills the child.
            Err(_) => SandboxReport {
                ok: false,
                stdout: String::new(),
                stderr: format!("wall-clock limit of {:?} exceeded", limits.timeout),
                exit_code: -1,
                duration_ms: started.elapsed().as_millis() as u64,
            },
        };

        debug!(
            skill = %skill.name,
            ok = report.ok,
            exit_code = report.exit_code,
            duration_ms = report.duration_ms,
            "Sandbox run finished"
        );
        Ok(report)
    }
}
