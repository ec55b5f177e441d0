//! Per-slot runtime
//!
//! Owns the state machine for one (slot, session) pair: build prompt, invoke
//! the LLM client, record the outcome in the store, advance. The engine
//! drives every transition; the runtime never self-advances.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::collab::CollabStore;
use crate::config::SlotConfig;
use crate::domain::{Phase, SlotEvent};
use crate::llm::{LlmClient, LlmError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Running(Phase),
    DoneProposal,
    DoneRefinement,
    DoneVote,
    Failed,
    Canceled,
}

/// Result of one dispatch as the engine sees it.
#[derive(Debug, Clone)]
pub enum DispatchResult {
    Ok(String),
    Failed,
    Canceled,
}

impl DispatchResult {
    pub fn into_text(self) -> Option<String> {
        match self {
            DispatchResult::Ok(text) => Some(text),
            _ => None,
        }
    }
}

pub struct SlotRuntime {
    slot: SlotConfig,
    session: String,
    store: Arc<CollabStore>,
    client: Arc<dyn LlmClient>,
    /// Bounds concurrent in-flight calls for this slot across sessions.
    gate: Arc<Semaphore>,
    state: SlotState,
}

impl SlotRuntime {
    pub fn new(
        slot: SlotConfig,
        session: String,
        store: Arc<CollabStore>,
        client: Arc<dyn LlmClient>,
        gate: Arc<Semaphore>,
    ) -> Self {
        Self {
            slot,
            session,
            store,
            client,
            gate,
            state: SlotState::Idle,
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn slot_name(&self) -> &str {
        &self.slot.name
    }

    fn expected_state(phase: Phase) -> SlotState {
        match phase {
            Phase::Proposal => SlotState::Idle,
            Phase::Refinement => SlotState::DoneProposal,
            Phase::Vote => SlotState::DoneRefinement,
            Phase::Meta => SlotState::Idle,
        }
    }

    fn done_state(phase: Phase) -> SlotState {
        match phase {
            Phase::Proposal => SlotState::DoneProposal,
            Phase::Refinement => SlotState::DoneRefinement,
            Phase::Vote | Phase::Meta => SlotState::DoneVote,
        }
    }

    /// Run one phase for this slot. Appends exactly one terminal event.
    pub async fn dispatch(
        &mut self,
        phase: Phase,
        user_prompt: &str,
        cancel: &CancellationToken,
    ) -> DispatchResult {
        if self.state != Self::expected_state(phase) {
            // Phase ordering is the engine's invariant; a mismatch is an
            // internal error, not a provider failure.
            error!(slot = %self.slot.name, ?phase, state = ?self.state, "Dispatch out of order");
            self.record(SlotEvent::error(
                &self.slot.name,
                &self.session,
                phase,
                "internal",
                format!("dispatch of {} in state {:?}", phase, self.state),
            ))
            .await;
            self.state = SlotState::Failed;
            return DispatchResult::Failed;
        }

        self.state = SlotState::Running(phase);

        let permit = tokio::select! {
            _ = cancel.cancelled() => None,
            permit = self.gate.clone().acquire_owned() => permit.ok(),
        };
        if permit.is_none() {
            self.record(SlotEvent::canceled(&self.slot.name, &self.session, phase))
                .await;
            self.state = SlotState::Canceled;
            return DispatchResult::Canceled;
        }

        let system = self.slot.system_prompt();
        match self.client.call(&self.slot, &system, user_prompt, cancel).await {
            Ok(reply) => {
                let event = SlotEvent::ok(&self.slot.name, &self.session, phase, reply.text.clone())
                    .with_meta("provider", reply.meta.provider.to_string())
                    .with_meta("model", reply.meta.model)
                    .with_meta("duration_ms", reply.meta.duration_ms.to_string())
                    .with_meta("retry_count", reply.meta.retries.to_string());
                self.record(event).await;
                self.state = Self::done_state(phase);
                DispatchResult::Ok(reply.text)
            }
            Err(LlmError::Canceled { .. }) => {
                self.record(SlotEvent::canceled(&self.slot.name, &self.session, phase))
                    .await;
                self.state = SlotState::Canceled;
                DispatchResult::Canceled
            }
            Err(err) => {
                warn!(slot = %self.slot.name, ?phase, class = err.class(), "Slot phase failed");
                self.record(SlotEvent::error(
                    &self.slot.name,
                    &self.session,
                    phase,
                    err.class(),
                    err.to_string(),
                ))
                .await;
                self.state = SlotState::Failed;
                DispatchResult::Failed
            }
        }
    }

    async fn record(&self, event: SlotEvent) {
        if let Err(e) = self.store.append(event).await {
            error!(slot = %self.slot.name, "Failed to append slot event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{EventBus, EventFilter};
    use crate::config::{ProviderKind, SlotParams};
    use crate::llm::{CallMeta, ChatReply, LlmResult};
    use async_trait::async_trait;

    struct FixedClient {
        outcome: Result<String, &'static str>,
    }

    #[async_trait]
    impl LlmClient for FixedClient {
        async fn call(
            &self,
            slot: &SlotConfig,
            _system: &str,
            _user: &str,
            _cancel: &CancellationToken,
        ) -> LlmResult<ChatReply> {
            match &self.outcome {
                Ok(text) => Ok(ChatReply {
                    text: text.clone(),
                    meta: CallMeta {
                        provider: slot.provider,
                        model: slot.model.clone(),
                        duration_ms: 5,
                        retries: 0,
                    },
                }),
                Err(kind) if *kind == "canceled" => Err(LlmError::Canceled {
                    slot: slot.name.clone(),
                }),
                Err(_) => Err(LlmError::Config {
                    slot: slot.name.clone(),
                    reason: "missing key".to_string(),
                }),
            }
        }
    }

    fn slot_config() -> SlotConfig {
        SlotConfig {
            name: "analyst".to_string(),
            enabled: true,
            provider: ProviderKind::Ollama,
            endpoint: None,
            model: "llama3.1".to_string(),
            api_key_env: None,
            local_model: true,
            identity: String::new(),
            role: "researcher".to_string(),
            prompt: String::new(),
            params: SlotParams::default(),
            collaboration_enabled: true,
            collaboration_directory: None,
        }
    }

    fn runtime(outcome: Result<String, &'static str>) -> (SlotRuntime, Arc<CollabStore>) {
        let bus = EventBus::new(64, 8).shared();
        let store = Arc::new(CollabStore::new(bus, 1024, None));
        let runtime = SlotRuntime::new(
            slot_config(),
            "s-1".to_string(),
            store.clone(),
            Arc::new(FixedClient { outcome }),
            Arc::new(Semaphore::new(4)),
        );
        (runtime, store)
    }

    #[tokio::test]
    async fn test_ok_dispatch_advances_and_records() {
        let (mut runtime, store) = runtime(Ok("my proposal".to_string()));
        let cancel = CancellationToken::new();

        let result = runtime.dispatch(Phase::Proposal, "prompt", &cancel).await;
        assert!(matches!(result, DispatchResult::Ok(ref t) if t == "my proposal"));
        assert_eq!(runtime.state(), SlotState::DoneProposal);

        let head = store.head("analyst", 1).await;
        assert_eq!(head[0].event, "proposal.ok");
        assert_eq!(head[0].meta.get("retry_count").map(String::as_str), Some("0"));
    }

    #[tokio::test]
    async fn test_error_dispatch_fails_slot() {
        let (mut runtime, store) = runtime(Err("config"));
        let cancel = CancellationToken::new();

        let result = runtime.dispatch(Phase::Proposal, "prompt", &cancel).await;
        assert!(matches!(result, DispatchResult::Failed));
        assert_eq!(runtime.state(), SlotState::Failed);

        let head = store.head("analyst", 1).await;
        assert_eq!(head[0].event, "proposal.error");
        assert_eq!(head[0].meta.get("error_class").map(String::as_str), Some("config"));
    }

    #[tokio::test]
    async fn test_canceled_dispatch_records_marker() {
        let (mut runtime, store) = runtime(Err("canceled"));
        let cancel = CancellationToken::new();

        let result = runtime.dispatch(Phase::Proposal, "prompt", &cancel).await;
        assert!(matches!(result, DispatchResult::Canceled));
        assert_eq!(runtime.state(), SlotState::Canceled);

        let head = store.head("analyst", 1).await;
        assert_eq!(head[0].event, "proposal.canceled");
    }

    #[tokio::test]
    async fn test_out_of_order_dispatch_is_internal_error() {
        let (mut runtime, store) = runtime(Ok("text".to_string()));
        let cancel = CancellationToken::new();

        // Vote before proposal: refused and recorded as internal.
        let result = runtime.dispatch(Phase::Vote, "prompt", &cancel).await;
        assert!(matches!(result, DispatchResult::Failed));

        let head = store.head("analyst", 1).await;
        assert_eq!(head[0].meta.get("error_class").map(String::as_str), Some("internal"));
    }

    #[tokio::test]
    async fn test_full_phase_progression() {
        let (mut runtime, _store) = runtime(Ok("text".to_string()));
        let cancel = CancellationToken::new();

        runtime.dispatch(Phase::Proposal, "p", &cancel).await;
        assert_eq!(runtime.state(), SlotState::DoneProposal);
        runtime.dispatch(Phase::Refinement, "r", &cancel).await;
        assert_eq!(runtime.state(), SlotState::DoneRefinement);
        runtime.dispatch(Phase::Vote, "v", &cancel).await;
        assert_eq!(runtime.state(), SlotState::DoneVote);
    }

    #[tokio::test]
    async fn test_event_stream_sees_dispatch() {
        let bus = EventBus::new(64, 8).shared();
        let store = Arc::new(CollabStore::new(bus.clone(), 1024, None));
        let mut stream = bus.subscribe(EventFilter::new().session("s-1")).unwrap();

        let mut runtime = SlotRuntime::new(
            slot_config(),
            "s-1".to_string(),
            store,
            Arc::new(FixedClient {
                outcome: Ok("live".to_string()),
            }),
            Arc::new(Semaphore::new(4)),
        );
        runtime
            .dispatch(Phase::Proposal, "prompt", &CancellationToken::new())
            .await;

        let event = stream.recv().await.unwrap();
        assert_eq!(event.event, "proposal.ok");
        assert_eq!(event.text, "live");
    }
}
