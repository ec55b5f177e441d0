//! # Conclave - Multi-Slot LLM Collaboration Server
//!
//! Conclave orchestrates a configurable team of LLM "slots" through a
//! three-phase protocol — proposal, peer refinement, weighted vote — to
//! produce a single reply per user request. The distinguished `dexter` slot
//! is the chief orchestrator whose output always faces the user. Winning
//! solutions can be materialized as executable skills, validated in an
//! isolated sandbox before promotion.
//!
//! ## Architecture
//!
//! - **Domain**: events, sessions, skills — the shared vocabulary
//! - **Collab**: append-only per-slot logs plus a live event bus
//! - **LLM**: provider-agnostic chat client (OpenAI-compatible, Anthropic,
//!   Ollama)
//! - **Engine**: phase orchestration, slot runtimes, voting, the registry
//! - **Sandbox / Skills**: isolated validation and the promoted library
//! - **Adapters**: the HTTP surface (axum), including the SSE event feed

pub mod adapters;
pub mod cli;
pub mod collab;
pub mod config;
pub mod domain;
pub mod engine;
pub mod llm;
pub mod sandbox;
pub mod skills;

use axum::routing::{get, post};
use axum::Router;

pub use adapters::AppState;

/// Creates the Axum application router with all endpoints configured.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(adapters::chat_handler::chat))
        .route("/events", get(adapters::events_handler::events))
        .route("/collaboration/head", get(adapters::collab_handler::head))
        .route("/collaboration/input/:slot", post(adapters::collab_handler::input))
        .route(
            "/config",
            get(adapters::config_handler::get_config).put(adapters::config_handler::put_config),
        )
        .route("/models", get(adapters::config_handler::list_models))
        .route("/models/:slot/config", post(adapters::config_handler::update_slot))
        .route("/health", get(adapters::health_handler::health))
        .route("/skills", get(adapters::skills_handler::list))
        .route("/skills/:id/test", post(adapters::skills_handler::test))
        .route("/skills/:id/promote", post(adapters::skills_handler::promote))
        .route("/skills/:id/execute", post(adapters::skills_handler::execute))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}
