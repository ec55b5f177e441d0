//! Live session state shared between the engine and the public surface

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::event::unix_now;

/// Lifecycle of one collaboration session. Forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Proposal,
    Refinement,
    Vote,
    Done,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Done | SessionStatus::Failed)
    }
}

/// Result of running a session to completion.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub reply: String,
    /// Winning peer slot from the vote, if any peer received votes.
    pub winner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed: Option<SkillExecution>,
}

/// Outcome of the optional skill build-and-test path.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SkillExecution {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_name: Option<String>,
    pub promoted: bool,
}

/// Live handle for one in-flight session.
///
/// Created by the registry, mutated only by the engine; readers get a cheap
/// `Arc` clone and see consistent snapshots through the per-field locks.
pub struct SessionHandle {
    pub id: String,
    pub campaign_id: Option<String>,
    pub started_ts: f64,
    pub started_at: Instant,
    pub cancel: CancellationToken,
    pub status: RwLock<SessionStatus>,
    /// Latest `proposal.ok` text per slot.
    pub proposals: RwLock<HashMap<String, String>>,
    /// Latest `refinement.ok` text per slot.
    pub refined: RwLock<HashMap<String, String>>,
    /// Weighted vote totals per slot.
    pub tally: RwLock<HashMap<String, f64>>,
    pub final_answer: RwLock<Option<String>>,
}

impl SessionHandle {
    pub fn new(id: Option<String>, campaign_id: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            campaign_id,
            started_ts: unix_now(),
            started_at: Instant::now(),
            cancel: CancellationToken::new(),
            status: RwLock::new(SessionStatus::Proposal),
            proposals: RwLock::new(HashMap::new()),
            refined: RwLock::new(HashMap::new()),
            tally: RwLock::new(HashMap::new()),
            final_answer: RwLock::new(None),
        })
    }

    /// Advance the session status. Backwards transitions are refused so an
    /// orchestration bug cannot rewind a terminal session.
    pub async fn advance(&self, next: SessionStatus) -> bool {
        let mut status = self.status.write().await;
        let forward = match (*status, next) {
            (SessionStatus::Proposal, SessionStatus::Refinement)
            | (SessionStatus::Refinement, SessionStatus::Vote)
            | (SessionStatus::Proposal, SessionStatus::Done)
            | (SessionStatus::Refinement, SessionStatus::Done)
            | (SessionStatus::Vote, SessionStatus::Done) => true,
            (current, SessionStatus::Failed) if !current.is_terminal() => true,
            _ => false,
        };
        if forward {
            *status = next;
        }
        forward
    }

    pub async fn is_terminal(&self) -> bool {
        self.status.read().await.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_only_transitions() {
        let handle = SessionHandle::new(None, None);
        assert!(handle.advance(SessionStatus::Refinement).await);
        assert!(handle.advance(SessionStatus::Vote).await);
        assert!(handle.advance(SessionStatus::Done).await);
        // Terminal: nothing moves it again.
        assert!(!handle.advance(SessionStatus::Failed).await);
        assert!(!handle.advance(SessionStatus::Refinement).await);
    }

    #[tokio::test]
    async fn test_any_live_state_can_fail() {
        let handle = SessionHandle::new(None, None);
        assert!(handle.advance(SessionStatus::Failed).await);
        assert!(handle.is_terminal().await);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = SessionHandle::new(None, None);
        let b = SessionHandle::new(None, None);
        assert_ne!(a.id, b.id);
    }
}
