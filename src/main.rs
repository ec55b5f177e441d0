use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use conclave::adapters::AppState;
use conclave::cli::Cli;
use conclave::collab::{CollabStore, EventBus};
use conclave::config::{watcher::ConfigWatcher, Settings};
use conclave::engine::{CollaborationEngine, SessionRegistry};
use conclave::llm::HttpLlmClient;
use conclave::sandbox::{create_sandbox, SandboxLimits};
use conclave::skills::SkillLibrary;
use tokio::sync::RwLock;
use tracing::{error, info};

// sysexits-style codes so wrappers can distinguish failure modes.
const EXIT_CONFIG: u8 = 64;
const EXIT_UNAVAILABLE: u8 = 69;
const EXIT_INTERNAL: u8 = 70;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let settings = match Settings::new_with_cli(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let host = settings.server.host.clone();
    let port = settings.server.port;
    info!("Starting Conclave on {}:{}", host, port);

    match run(cli, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Bind(e)) => {
            error!("Failed to bind server socket: {}", e);
            ExitCode::from(EXIT_UNAVAILABLE)
        }
        Err(RunError::Internal(e)) => {
            error!("Internal error: {:#}", e);
            ExitCode::from(EXIT_INTERNAL)
        }
    }
}

enum RunError {
    Bind(std::io::Error),
    Internal(anyhow::Error),
}

async fn run(cli: Cli, settings: Settings) -> Result<(), RunError> {
    let host = settings.server.host.clone();
    let port = settings.server.port;

    // Services are built leaves-first: bus, store, registry, engine. Teardown
    // follows process exit; sessions hold their own snapshots.
    let bus = EventBus::new(
        settings.collaboration.bus_capacity,
        settings.collaboration.max_subscribers,
    )
    .shared();
    let store = Arc::new(CollabStore::new(
        bus.clone(),
        settings.collaboration.max_events_per_log,
        settings.collaboration.persist_root.as_ref().map(PathBuf::from),
    ));
    let registry = Arc::new(SessionRegistry::new(settings.limits.max_sessions));
    let client = Arc::new(HttpLlmClient::new(Duration::from_secs(
        settings.limits.call_timeout_secs,
    )));

    let sandbox = create_sandbox(&settings.sandbox)
        .map_err(|e| RunError::Internal(anyhow::anyhow!(e)))?;
    let skills = Arc::new(SkillLibrary::new(
        sandbox,
        SandboxLimits::from_settings(&settings.sandbox),
        PathBuf::from(&settings.sandbox.skills_dir),
    ));

    let settings = Arc::new(RwLock::new(settings));
    let engine = Arc::new(CollaborationEngine::new(
        settings.clone(),
        store.clone(),
        registry,
        client,
        skills.clone(),
    ));

    // Hot reload: the watcher validates and atomically swaps the settings
    // record. In-flight sessions keep the snapshot they started with.
    let _watcher =
        ConfigWatcher::spawn(cli.clone(), settings.clone()).map_err(RunError::Internal)?;

    let state = AppState {
        settings,
        store,
        bus,
        engine,
        skills,
    };
    let app = conclave::create_app(state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| RunError::Internal(anyhow::anyhow!("invalid listen address: {}", e)))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(RunError::Bind)?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| RunError::Internal(e.into()))
}
