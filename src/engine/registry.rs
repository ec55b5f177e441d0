//! Session registry
//!
//! Maps session ids to live handles so the public surface can cancel, query,
//! and attach to sessions the engine is driving. Terminal sessions are
//! garbage-collected lazily on create and list.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::SessionHandle;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Session capacity reached ({0} live sessions)")]
    Busy(usize),

    #[error("Session id already live: {0}")]
    Duplicate(String),
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Create and register a new session handle.
    ///
    /// Re-running an aborted session id is allowed once the old handle is
    /// terminal; a still-live duplicate is refused.
    pub async fn create(
        &self,
        id: Option<String>,
        campaign_id: Option<String>,
    ) -> Result<Arc<SessionHandle>, RegistryError> {
        let mut sessions = self.sessions.write().await;

        // Collect terminal handles first so finished sessions never count
        // against the cap.
        let mut terminal = Vec::new();
        for (sid, handle) in sessions.iter() {
            if handle.is_terminal().await {
                terminal.push(sid.clone());
            }
        }
        for sid in terminal {
            sessions.remove(&sid);
            debug!(session = %sid, "Reaped terminal session");
        }

        if let Some(requested) = &id {
            if sessions.contains_key(requested) {
                return Err(RegistryError::Duplicate(requested.clone()));
            }
        }
        if sessions.len() >= self.max_sessions {
            return Err(RegistryError::Busy(sessions.len()));
        }

        let handle = SessionHandle::new(id, campaign_id);
        sessions.insert(handle.id.clone(), handle.clone());
        Ok(handle)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Signal cancellation for a session. Returns false when unknown.
    pub async fn cancel(&self, id: &str) -> bool {
        match self.get(id).await {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn list(&self, active_only: bool) -> Vec<Arc<SessionHandle>> {
        let sessions = self.sessions.read().await;
        let mut out = Vec::new();
        for handle in sessions.values() {
            if !active_only || !handle.is_terminal().await {
                out.push(handle.clone());
            }
        }
        out
    }

    /// Drop a terminal session's handle immediately.
    pub async fn remove_if_terminal(&self, id: &str) {
        let mut sessions = self.sessions.write().await;
        let is_terminal = match sessions.get(id) {
            Some(handle) => handle.is_terminal().await,
            None => false,
        };
        if is_terminal {
            sessions.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionStatus;

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = SessionRegistry::new(4);
        let handle = registry.create(None, Some("campaign-1".to_string())).await.unwrap();
        let fetched = registry.get(&handle.id).await.unwrap();
        assert_eq!(fetched.campaign_id.as_deref(), Some("campaign-1"));
    }

    #[tokio::test]
    async fn test_capacity_returns_busy() {
        let registry = SessionRegistry::new(2);
        registry.create(None, None).await.unwrap();
        registry.create(None, None).await.unwrap();
        assert!(matches!(
            registry.create(None, None).await,
            Err(RegistryError::Busy(2))
        ));
    }

    #[tokio::test]
    async fn test_terminal_sessions_free_capacity() {
        let registry = SessionRegistry::new(1);
        let first = registry.create(None, None).await.unwrap();
        first.advance(SessionStatus::Failed).await;

        // The finished session is reaped; capacity is available again.
        assert!(registry.create(None, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_live_id_refused() {
        let registry = SessionRegistry::new(4);
        let handle = registry.create(Some("fixed".to_string()), None).await.unwrap();
        assert!(matches!(
            registry.create(Some("fixed".to_string()), None).await,
            Err(RegistryError::Duplicate(_))
        ));

        // Once terminal, the id may be reused for a fresh generation.
        handle.advance(SessionStatus::Failed).await;
        assert!(registry.create(Some("fixed".to_string()), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_propagates() {
        let registry = SessionRegistry::new(4);
        let handle = registry.create(None, None).await.unwrap();
        assert!(!handle.cancel.is_cancelled());
        assert!(registry.cancel(&handle.id).await);
        assert!(handle.cancel.is_cancelled());
        assert!(!registry.cancel("unknown").await);
    }

    #[tokio::test]
    async fn test_list_active_only() {
        let registry = SessionRegistry::new(4);
        let live = registry.create(None, None).await.unwrap();
        let done = registry.create(None, None).await.unwrap();
        done.advance(SessionStatus::Failed).await;

        let active = registry.list(true).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, live.id);
        assert_eq!(registry.list(false).await.len(), 2);
    }
}
