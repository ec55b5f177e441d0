//! Configuration hot reload
//!
//! Watches the config file named on the command line and swaps a freshly
//! loaded, validated [`Settings`] record into the shared handle. A reload
//! that fails validation is rejected and the running configuration stays in
//! place. Sessions already in flight keep the snapshot they started with.

use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::config::Settings;

/// Editors fire several filesystem events per save; everything inside this
/// window collapses into one reload.
const DEBOUNCE: Duration = Duration::from_millis(200);

pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching the CLI's config file and reloading into `settings`.
    pub fn spawn(cli: Cli, settings: Arc<RwLock<Settings>>) -> Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())?;

        if cli.config.exists() {
            watcher.watch(&cli.config, RecursiveMode::NonRecursive)?;
            info!("Watching configuration file: {}", cli.config.display());
        } else {
            warn!(
                "Configuration file does not exist, hot reload disabled: {}",
                cli.config.display()
            );
        }

        std::thread::spawn(move || loop {
            // Block for the first interesting event of a burst.
            match rx.recv() {
                Ok(Ok(event)) if touches_content(&event) => {}
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    error!("Configuration watch error: {:?}", e);
                    continue;
                }
                Err(_) => break,
            }
            // Swallow the rest of the burst before reloading once.
            loop {
                match rx.recv_timeout(DEBOUNCE) {
                    Ok(_) => continue,
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            Self::reload(&cli, &settings);
        });

        Ok(Self { _watcher: watcher })
    }

    /// Load, validate, and swap. The swap is atomic: readers see either the
    /// old record or the new one, never a mix.
    fn reload(cli: &Cli, settings: &Arc<RwLock<Settings>>) {
        match Settings::new_with_cli(cli) {
            Ok(next) => {
                let enabled_slots = next.slots.iter().filter(|s| s.enabled).count();
                *settings.blocking_write() = next;
                info!(enabled_slots, "Configuration reloaded");
            }
            Err(e) => error!("Rejected configuration reload: {:#}", e),
        }
    }
}

/// Only content changes warrant a reload; access notifications do not.
fn touches_content(event: &notify::Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
