//! Core domain types shared across the engine, store, and public surface

pub mod event;
pub mod session;
pub mod skill;

pub use event::{unix_now, Phase, SlotEvent, INBOX_SESSION, SESSION_SLOT};
pub use session::{SessionHandle, SessionOutcome, SessionStatus, SkillExecution};
pub use skill::{extract_code_block, implies_skill_creation, CandidateSkill, SkillState};
