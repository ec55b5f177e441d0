//! HTTP surface
//!
//! Axum handlers exposed to external collaborators (front-end, CLI). The core
//! never calls back into the UI: reads are pull (`/collaboration/head`),
//! live updates are push (`/events` SSE) off the event bus.

pub mod chat_handler;
pub mod collab_handler;
pub mod config_handler;
pub mod events_handler;
pub mod health_handler;
pub mod skills_handler;

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::collab::{CollabStore, SharedEventBus};
use crate::config::Settings;
use crate::engine::CollaborationEngine;
use crate::skills::SkillLibrary;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<RwLock<Settings>>,
    pub store: Arc<CollabStore>,
    pub bus: SharedEventBus,
    pub engine: Arc<CollaborationEngine>,
    pub skills: Arc<SkillLibrary>,
}
