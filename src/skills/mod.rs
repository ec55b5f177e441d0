//! Skill library
//!
//! Skills arrive as drafts extracted from winning solutions, are validated in
//! the sandbox, and only then promoted to the active library. Promotion is
//! at-most-once; re-running a test is always safe.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::domain::{unix_now, CandidateSkill, SkillState};
use crate::sandbox::{SandboxError, SandboxLimits, SandboxReport, SandboxRunner};

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("Skill not found: {0}")]
    NotFound(String),

    #[error("Skill {0} has not passed a sandbox test")]
    NotTested(String),

    #[error("Skill {0} is not active")]
    NotActive(String),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Failed to store skill: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillRecord {
    pub id: String,
    pub name: String,
    pub entry: String,
    pub state: SkillState,
    pub created_ts: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_test: Option<SandboxReport>,
    #[serde(skip)]
    pub source: String,
}

impl SkillRecord {
    fn candidate(&self) -> CandidateSkill {
        CandidateSkill {
            name: self.name.clone(),
            source: self.source.clone(),
            entry: self.entry.clone(),
        }
    }
}

pub struct SkillLibrary {
    records: RwLock<HashMap<String, SkillRecord>>,
    sandbox: Arc<dyn SandboxRunner>,
    limits: SandboxLimits,
    skills_dir: PathBuf,
}

impl SkillLibrary {
    pub fn new(sandbox: Arc<dyn SandboxRunner>, limits: SandboxLimits, skills_dir: PathBuf) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            sandbox,
            limits,
            skills_dir,
        }
    }

    /// Register a new draft. Nothing is written to disk until promotion.
    pub async fn create_draft(&self, skill: CandidateSkill) -> SkillRecord {
        let record = SkillRecord {
            id: Uuid::new_v4().to_string(),
            name: skill.name,
            entry: skill.entry,
            state: SkillState::Draft,
            created_ts: unix_now(),
            last_test: None,
            source: skill.source,
        };
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        record
    }

    pub async fn get(&self, id: &str) -> Option<SkillRecord> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<SkillRecord> {
        let mut records: Vec<SkillRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.created_ts.partial_cmp(&b.created_ts).unwrap_or(std::cmp::Ordering::Equal));
        records
    }

    /// Run the skill in the sandbox and record the report.
    pub async fn test(&self, id: &str, input: &str) -> Result<SandboxReport, SkillError> {
        let candidate = {
            let records = self.records.read().await;
            records
                .get(id)
                .ok_or_else(|| SkillError::NotFound(id.to_string()))?
                .candidate()
        };

        let report = self.sandbox.run(&candidate, input, &self.limits).await?;

        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(id) {
            record.last_test = Some(report.clone());
        }
        Ok(report)
    }

    /// Promote a draft to the active library. Requires a passing test.
    pub async fn promote(&self, id: &str) -> Result<SkillRecord, SkillError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| SkillError::NotFound(id.to_string()))?;

        if record.state == SkillState::Active {
            return Ok(record.clone());
        }
        match &record.last_test {
            Some(report) if report.ok => {}
            _ => return Err(SkillError::NotTested(id.to_string())),
        }

        std::fs::create_dir_all(&self.skills_dir)?;
        let path = self.skills_dir.join(format!("{}.py", record.name));
        std::fs::write(path, &record.source)?;

        record.state = SkillState::Active;
        info!(skill = %record.name, "Skill promoted to active library");
        Ok(record.clone())
    }

    /// Execute an active skill against a message.
    pub async fn execute(&self, id: &str, message: &str) -> Result<SandboxReport, SkillError> {
        let candidate = {
            let records = self.records.read().await;
            let record = records
                .get(id)
                .ok_or_else(|| SkillError::NotFound(id.to_string()))?;
            if record.state != SkillState::Active {
                return Err(SkillError::NotActive(id.to_string()));
            }
            record.candidate()
        };
        Ok(self.sandbox.run(&candidate, message, &self.limits).await?)
    }
}
