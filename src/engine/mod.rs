//! Collaboration engine
//!
//! Drives one session through the three-phase protocol: every participating
//! slot proposes in parallel, refines with peer context, then votes. Dexter,
//! the chief orchestrator, always speaks for the team — the vote ranks peer
//! answers so the reply can be composed with knowledge of the preferred one,
//! but dexter's refinement is the user-facing text whenever it exists.

pub mod prompts;
pub mod registry;
pub mod runtime;
pub mod vote;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::collab::CollabStore;
use crate::config::Settings;
use crate::domain::{
    extract_code_block, implies_skill_creation, CandidateSkill, Phase, SessionHandle,
    SessionOutcome, SessionStatus, SkillExecution, SlotEvent, INBOX_SESSION, SESSION_SLOT,
};
use crate::llm::LlmClient;
use crate::skills::SkillLibrary;

pub use registry::{RegistryError, SessionRegistry};
pub use runtime::{DispatchResult, SlotRuntime, SlotState};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server is at session capacity")]
    Busy,

    #[error("session canceled")]
    Canceled,

    #[error("session deadline exceeded")]
    Deadline,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn class(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "config",
            EngineError::Busy => "busy",
            EngineError::Canceled => "canceled",
            EngineError::Deadline => "timeout",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl From<RegistryError> for EngineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Busy(_) => EngineError::Busy,
            RegistryError::Duplicate(id) => {
                EngineError::Config(format!("session id {} is still live", id))
            }
        }
    }
}

/// An engine error plus the session it belongs to, when one was created
/// before the failure. The public surface reports the id so callers can
/// inspect the event log.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct SessionFailure {
    pub error: EngineError,
    pub session_id: Option<String>,
}

impl SessionFailure {
    fn bare(error: EngineError) -> Self {
        Self {
            error,
            session_id: None,
        }
    }

    fn in_session(error: EngineError, session_id: &str) -> Self {
        Self {
            error,
            session_id: Some(session_id.to_string()),
        }
    }
}

/// One user request as handed to the engine.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub message: String,
    pub campaign_id: Option<String>,
    pub session_id: Option<String>,
}

pub struct CollaborationEngine {
    settings: Arc<RwLock<Settings>>,
    store: Arc<CollabStore>,
    registry: Arc<SessionRegistry>,
    client: Arc<dyn LlmClient>,
    skills: Arc<SkillLibrary>,
    /// Per-slot concurrency gates, shared across sessions.
    slot_gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    /// High-water marks for consumed out-of-band input, per slot.
    inbox_cursor: Mutex<HashMap<String, f64>>,
}

impl CollaborationEngine {
    pub fn new(
        settings: Arc<RwLock<Settings>>,
        store: Arc<CollabStore>,
        registry: Arc<SessionRegistry>,
        client: Arc<dyn LlmClient>,
        skills: Arc<SkillLibrary>,
    ) -> Self {
        Self {
            settings,
            store,
            registry,
            client,
            skills,
            slot_gates: Mutex::new(HashMap::new()),
            inbox_cursor: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run one request through proposal, refinement and vote, and compose the
    /// final answer. In-flight sessions keep the configuration snapshot they
    /// started with.
    ///
    /// The phase work runs on a detached task so a dropped caller (client
    /// disconnect) cancels the session cooperatively instead of tearing the
    /// slot tasks down mid-append: the drop guard fires the session token,
    /// in-flight slots record their `.canceled` events, and the session is
    /// marked failed.
    pub async fn run_session(
        self: Arc<Self>,
        request: SessionRequest,
    ) -> Result<SessionOutcome, SessionFailure> {
        let settings = self.settings.read().await.clone();

        match settings.slot("dexter") {
            Some(dexter) if dexter.participates() => {}
            Some(_) => {
                return Err(SessionFailure::bare(EngineError::Config(
                    "slot 'dexter' is disabled; sessions cannot proceed".to_string(),
                )))
            }
            None => {
                return Err(SessionFailure::bare(EngineError::Config(
                    "slot 'dexter' is not configured".to_string(),
                )))
            }
        }

        let handle = self
            .registry
            .create(request.session_id.clone(), request.campaign_id.clone())
            .await
            .map_err(|e| SessionFailure::bare(e.into()))?;

        info!(session = %handle.id, "Collaboration session started");

        let session_deadline = Duration::from_secs(settings.limits.session_timeout_secs);
        let worker = tokio::spawn({
            let engine = self.clone();
            let handle = handle.clone();
            let message = request.message.clone();
            async move {
                let phases = engine.run_phases(&settings, &handle, &message);
                tokio::pin!(phases);

                let result = tokio::select! {
                    result = &mut phases => result,
                    _ = tokio::time::sleep(session_deadline) => {
                        handle.cancel.cancel();
                        // Bounded window for slots to record their
                        // cancellations before the session is forced down.
                        let _ = tokio::time::timeout(Duration::from_secs(5), &mut phases).await;
                        Err(EngineError::Deadline)
                    }
                };

                match &result {
                    Ok(outcome) => {
                        handle.advance(SessionStatus::Done).await;
                        *handle.final_answer.write().await = Some(outcome.reply.clone());
                        engine.meta_event(&handle.id, "session.done", "").await;
                        info!(session = %handle.id, "Collaboration session done");
                    }
                    Err(err) => {
                        handle.advance(SessionStatus::Failed).await;
                        engine
                            .meta_event_with(&handle.id, "session.failed", "", &[("error_class", err.class())])
                            .await;
                        warn!(session = %handle.id, class = err.class(), "Collaboration session failed");
                    }
                }

                result
            }
        });

        // Dropping this future before the worker finishes cancels the
        // session; the worker itself keeps running until the logs are
        // consistent.
        let _guard = handle.cancel.clone().drop_guard();

        match worker.await {
            Ok(result) => result.map_err(|e| SessionFailure::in_session(e, &handle.id)),
            Err(join_err) => Err(SessionFailure::in_session(
                EngineError::Internal(format!("session worker panicked: {}", join_err)),
                &handle.id,
            )),
        }
    }

    async fn run_phases(
        &self,
        settings: &Settings,
        handle: &Arc<SessionHandle>,
        message: &str,
    ) -> Result<SessionOutcome, EngineError> {
        let participants: Vec<_> = settings
            .participating_slots()
            .into_iter()
            .cloned()
            .collect();
        let names: Vec<String> = participants.iter().map(|s| s.name.clone()).collect();
        let roles: HashMap<String, String> = participants
            .iter()
            .map(|s| (s.name.clone(), s.role.clone()))
            .collect();

        self.meta_event_with(
            &handle.id,
            "session.start",
            message,
            &[
                ("participants", &names.join(",")),
                ("campaign", handle.campaign_id.as_deref().unwrap_or("")),
            ],
        )
        .await;
        for unknown in settings.unknown_weight_names() {
            self.meta_event_with(
                &handle.id,
                "config.warning",
                &format!("vote weight configured for unknown slot '{}'", unknown),
                &[],
            )
            .await;
        }

        let phase_timeout = Duration::from_secs(settings.limits.phase_timeout_secs);

        // Phase 1 — every participating slot proposes in parallel.
        let mut set: JoinSet<(SlotRuntime, DispatchResult)> = JoinSet::new();
        let phase_token = handle.cancel.child_token();
        for slot in &participants {
            let peers: Vec<String> = names.iter().filter(|n| **n != slot.name).cloned().collect();
            let prompt = prompts::with_user_inputs(
                prompts::proposal(&peers, &slot.role, message),
                &self.take_inputs(&slot.name).await,
            );
            let mut runtime = self.runtime_for(settings, slot.clone(), &handle.id).await;
            let token = phase_token.clone();
            set.spawn(async move {
                let result = runtime.dispatch(Phase::Proposal, &prompt, &token).await;
                (runtime, result)
            });
        }
        let (mut runtimes, proposals) = Self::barrier(set, phase_timeout, &phase_token).await;
        *handle.proposals.write().await = proposals.clone();

        if handle.cancel.is_cancelled() {
            return Err(EngineError::Canceled);
        }
        handle.advance(SessionStatus::Refinement).await;

        // Phase 2 — slots that proposed refine with peer context.
        let peer_texts: Vec<(String, String, String)> = proposals
            .iter()
            .map(|(name, text)| {
                (
                    name.clone(),
                    roles.get(name).cloned().unwrap_or_default(),
                    text.clone(),
                )
            })
            .collect();

        let mut set: JoinSet<(SlotRuntime, DispatchResult)> = JoinSet::new();
        let phase_token = handle.cancel.child_token();
        for (name, own_text) in &proposals {
            let Some(mut runtime) = runtimes.remove(name) else {
                continue;
            };
            let prompt = prompts::with_user_inputs(
                prompts::refinement(own_text, &prompts::peer_context(name, &peer_texts)),
                &self.take_inputs(name).await,
            );
            let token = phase_token.clone();
            set.spawn(async move {
                let result = runtime.dispatch(Phase::Refinement, &prompt, &token).await;
                (runtime, result)
            });
        }
        let (mut runtimes, refined) = Self::barrier(set, phase_timeout, &phase_token).await;
        *handle.refined.write().await = refined.clone();

        if handle.cancel.is_cancelled() {
            return Err(EngineError::Canceled);
        }
        handle.advance(SessionStatus::Vote).await;

        // Phase 3 — slots with a refined answer vote. A solo session has no
        // peers to rank, so the vote is skipped outright.
        let raw_votes = if participants.len() >= 2 {
            let mut answers: Vec<(String, String)> = refined
                .iter()
                .map(|(name, text)| (name.clone(), text.clone()))
                .collect();
            answers.sort_by(|a, b| a.0.cmp(&b.0));
            let labeled = prompts::labeled_answers(&answers);

            let mut set: JoinSet<(SlotRuntime, DispatchResult)> = JoinSet::new();
            let phase_token = handle.cancel.child_token();
            for name in refined.keys() {
                let Some(mut runtime) = runtimes.remove(name) else {
                    continue;
                };
                let prompt = prompts::vote(&labeled);
                let token = phase_token.clone();
                set.spawn(async move {
                    let result = runtime.dispatch(Phase::Vote, &prompt, &token).await;
                    (runtime, result)
                });
            }
            let (_, raw_votes) = Self::barrier(set, phase_timeout, &phase_token).await;
            raw_votes
        } else {
            HashMap::new()
        };

        if handle.cancel.is_cancelled() {
            return Err(EngineError::Canceled);
        }

        let mut ballots: HashMap<String, String> = HashMap::new();
        for (voter, raw) in &raw_votes {
            match vote::parse_ballot(raw, &names) {
                Some(voted) => {
                    ballots.insert(voter.clone(), voted);
                }
                None => {
                    warn!(session = %handle.id, voter = %voter, "Discarding unparseable ballot");
                }
            }
        }

        let weight_of = |slot: &str| settings.weight(slot);
        let outcome = vote::tally(&ballots, weight_of, "dexter");
        *handle.tally.write().await = outcome.totals.clone();

        let totals_json = serde_json::to_string(&outcome.totals).unwrap_or_default();
        self.meta_event_with(
            &handle.id,
            "vote.tally",
            outcome.winner.as_deref().unwrap_or(""),
            &[("totals", &totals_json), ("ballots", &ballots.len().to_string())],
        )
        .await;

        // Compose the final answer. Dexter's voice first: its refinement,
        // else its proposal. Only a fully absent dexter hands the reply to
        // the peer winner.
        let reply = refined
            .get("dexter")
            .cloned()
            .or_else(|| proposals.get("dexter").cloned())
            .or_else(|| {
                outcome
                    .winner
                    .as_ref()
                    .and_then(|w| refined.get(w).cloned())
            })
            .or_else(|| {
                vote::best_by_weight(refined.keys(), weight_of)
                    .and_then(|w| refined.get(&w).cloned())
            })
            .or_else(|| {
                outcome
                    .winner
                    .as_ref()
                    .and_then(|w| proposals.get(w).cloned())
            })
            .or_else(|| {
                vote::best_by_weight(proposals.keys(), weight_of)
                    .and_then(|w| proposals.get(&w).cloned())
            })
            .ok_or_else(|| EngineError::Internal("no slot produced any text".to_string()))?;

        self.meta_event(&handle.id, "chat.ok", &reply).await;

        let executed = if implies_skill_creation(message) {
            self.try_build_skill(handle, &outcome.winner, &refined, &reply)
                .await
        } else {
            None
        };

        Ok(SessionOutcome {
            session_id: handle.id.clone(),
            reply,
            winner: outcome.winner,
            executed,
        })
    }

    /// Wait for every dispatched slot to reach a terminal for this phase, or
    /// cancel the stragglers at the deadline.
    async fn barrier(
        mut set: JoinSet<(SlotRuntime, DispatchResult)>,
        deadline: Duration,
        token: &CancellationToken,
    ) -> (HashMap<String, SlotRuntime>, HashMap<String, String>) {
        let mut runtimes = HashMap::new();
        let mut texts = HashMap::new();

        let timer = tokio::time::sleep(deadline);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    Some(Ok((runtime, result))) => {
                        let name = runtime.slot_name().to_string();
                        if let Some(text) = result.into_text() {
                            texts.insert(name.clone(), text);
                        }
                        runtimes.insert(name, runtime);
                    }
                    Some(Err(join_err)) => {
                        error!("Slot task panicked: {}", join_err);
                    }
                    None => break,
                },
                _ = &mut timer => {
                    warn!("Phase deadline elapsed; cancelling stragglers");
                    token.cancel();
                    while let Some(joined) = set.join_next().await {
                        if let Ok((runtime, result)) = joined {
                            let name = runtime.slot_name().to_string();
                            if let Some(text) = result.into_text() {
                                texts.insert(name.clone(), text);
                            }
                            runtimes.insert(name, runtime);
                        }
                    }
                    break;
                }
            }
        }

        (runtimes, texts)
    }

    async fn try_build_skill(
        &self,
        handle: &Arc<SessionHandle>,
        winner: &Option<String>,
        refined: &HashMap<String, String>,
        reply: &str,
    ) -> Option<SkillExecution> {
        let solution = winner
            .as_ref()
            .and_then(|w| refined.get(w))
            .map(String::as_str)
            .unwrap_or(reply);
        let source = extract_code_block(solution)?;

        let name = format!("skill_{}", handle.id.replace('-', "_"));
        let draft = self
            .skills
            .create_draft(CandidateSkill {
                name: name.clone(),
                source,
                entry: "run".to_string(),
            })
            .await;

        match self.skills.test(&draft.id, "hello world").await {
            Ok(report) if report.ok => match self.skills.promote(&draft.id).await {
                Ok(_) => Some(SkillExecution {
                    ok: true,
                    skill_name: Some(name),
                    promoted: true,
                }),
                Err(e) => {
                    warn!(session = %handle.id, "Skill promotion failed: {}", e);
                    Some(SkillExecution {
                        ok: true,
                        skill_name: Some(name),
                        promoted: false,
                    })
                }
            },
            Ok(_) => Some(SkillExecution {
                ok: false,
                skill_name: Some(name),
                promoted: false,
            }),
            Err(e) => {
                warn!(session = %handle.id, "Skill sandbox test failed to run: {}", e);
                Some(SkillExecution {
                    ok: false,
                    skill_name: Some(name),
                    promoted: false,
                })
            }
        }
    }

    async fn runtime_for(
        &self,
        settings: &Settings,
        slot: crate::config::SlotConfig,
        session: &str,
    ) -> SlotRuntime {
        let gate = {
            let mut gates = self.slot_gates.lock().await;
            gates
                .entry(slot.name.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(settings.limits.max_calls_per_slot)))
                .clone()
        };
        SlotRuntime::new(
            slot,
            session.to_string(),
            self.store.clone(),
            self.client.clone(),
            gate,
        )
    }

    /// Drain out-of-band user input queued for a slot since the last prompt
    /// that consumed it.
    async fn take_inputs(&self, slot: &str) -> Vec<String> {
        let mut cursor = self.inbox_cursor.lock().await;
        let since = cursor.get(slot).copied().unwrap_or(0.0);
        let events: Vec<_> = self
            .store
            .tail_since(slot, since)
            .await
            .into_iter()
            .filter(|e| e.session == INBOX_SESSION && e.event == "user.input")
            .collect();
        if let Some(last) = events.last() {
            cursor.insert(slot.to_string(), last.ts);
        }
        events.into_iter().map(|e| e.text).collect()
    }

    async fn meta_event(&self, session: &str, event: &str, text: &str) {
        self.meta_event_with(session, event, text, &[]).await;
    }

    async fn meta_event_with(&self, session: &str, event: &str, text: &str, meta: &[(&str, &str)]) {
        let mut record = SlotEvent::new(SESSION_SLOT, session, Phase::Meta, event, text);
        for (key, value) in meta {
            record = record.with_meta(key, *value);
        }
        if let Err(e) = self.store.append(record).await {
            error!(session = %session, "Failed to append session meta event: {}", e);
        }
    }
}
