//! Slot event records — the unit of the collaboration log

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Virtual slot name under which the engine writes orchestrator meta-events.
pub const SESSION_SLOT: &str = "session";

/// Virtual session id under which out-of-band user input is queued per slot.
pub const INBOX_SESSION: &str = "inbox";

/// Phase of the collaboration protocol. Transitions are forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Proposal,
    Refinement,
    Vote,
    /// Orchestrator meta-events (session start, tally, completion).
    Meta,
}

impl Phase {
    /// Event tag prefix for this phase (`proposal.ok`, `refinement.error`, ...).
    pub fn tag(&self) -> &'static str {
        match self {
            Phase::Proposal => "proposal",
            Phase::Refinement => "refinement",
            Phase::Vote => "vote",
            Phase::Meta => "meta",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// One immutable record in a slot's collaboration log.
///
/// `ts` is unix seconds; the store clamps it nondecreasing per (slot, session)
/// log. `meta` carries provider, model, duration_ms, retry counts and error
/// classes as plain strings so the record stays schema-stable on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotEvent {
    pub ts: f64,
    pub slot: String,
    pub session: String,
    pub phase: Phase,
    pub event: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl SlotEvent {
    pub fn new(slot: &str, session: &str, phase: Phase, event: &str, text: impl Into<String>) -> Self {
        Self {
            ts: unix_now(),
            slot: slot.to_string(),
            session: session.to_string(),
            phase,
            event: event.to_string(),
            text: text.into(),
            meta: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    /// Phase-tagged success event (`proposal.ok` etc).
    pub fn ok(slot: &str, session: &str, phase: Phase, text: impl Into<String>) -> Self {
        Self::new(slot, session, phase, &format!("{}.ok", phase.tag()), text)
    }

    /// Phase-tagged failure event carrying the error class in meta.
    pub fn error(slot: &str, session: &str, phase: Phase, class: &str, message: impl Into<String>) -> Self {
        Self::new(slot, session, phase, &format!("{}.error", phase.tag()), message)
            .with_meta("error_class", class)
    }

    /// Phase-tagged cancellation marker.
    pub fn canceled(slot: &str, session: &str, phase: Phase) -> Self {
        Self::new(slot, session, phase, &format!("{}.canceled", phase.tag()), "")
    }
}

/// Current unix time in seconds with sub-second precision.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
