//! Container sandbox back-end
//!
//! Shells out to the container runtime so the memory cap, network isolation
//! and privilege drops are enforced by the OS rather than trusted to the
//! interpreter.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;

use super::{cap_output, launcher_source, SandboxError, SandboxLimits, SandboxReport, SandboxRunner};
use crate::domain::CandidateSkill;

pub struct ContainerSandbox {
    image: String,
}

impl ContainerSandbox {
    pub fn new(image: &str) -> Self {
        Self {
            image: image.to_string(),
        }
    }
}

#[async_trait]
impl SandboxRunner for ContainerSandbox {
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
        let child = Command::new("docker")
            .arg("run")
            .arg("--rm")
            .arg("--network")
            .arg("none")
            .arg("--memory")
            .arg(format!("{}m", limits.memory_mib))
            .arg("--cpus")
            .arg("0.5")
            .arg("--user")
            .arg("nobody")
            .arg("--cap-drop")
            .arg("ALL")
            .arg("--security-opt")
            .arg("no-new-privileges")
            // The sources are written on the host before the run; the skill
            // only ever reads them. Its writable scratch is a tmpfs that
            // dies with the container.
            .arg("--read-only")
            .arg("--tmpfs")
            .arg("/tmp")
            .arg("-v")
            .arg(format!("{}:/sandbox:ro", scratch.path().display()))
            .arg("-w")
            .arg("/sandbox")
            .arg(&self.image)
            .arg("python")
            .arg("main.py")
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match tokio::time::timeout(limits.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = cap_output(output.stdout, limits.stdout_cap_bytes);
                let stderr = cap_output(output.stderr, limits.stdout_cap_bytes);
                let exit_code = output.status.code().unwrap_or(-1);
                Ok(SandboxReport {
                    ok: exit_code == 0 && !stdout.trim().is_empty(),
                    stdout,
                    stderr,
                    exit_code,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => Err(SandboxError::Setup(e)),
            Err(_) => Ok(SandboxReport {
                ok: false,
                stdout: String::new(),
                stderr: format!("wall-clock limit of {:?} exceeded", limits.timeout),
                exit_code: -1,
                duration_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }
}
