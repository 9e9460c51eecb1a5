//! `cardbox watch` — index everything, then apply targeted updates as
//! files change.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::BoxConfig;
use crate::index::FsIndex;
use crate::log;
use crate::logger::{status_error, status_success};
use crate::realm::Realm;
use crate::track::FilesTracker;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

fn is_shutdown() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

pub fn run_watch(config: &BoxConfig) -> Result<()> {
    ctrlc::set_handler(|| SHUTDOWN.store(true, Ordering::SeqCst))
        .context("failed to install Ctrl+C handler")?;

    let manager = config.realm_manager();
    let mut tracker = FilesTracker::new();
    let mut sink = FsIndex::new(config.index_dir());

    for realm in manager.realms() {
        tracker
            .update(realm, &mut sink)
            .with_context(|| format!("failed to index realm `{}`", realm.url()))?;
    }
    log!("watch"; "initial index complete, watching for changes (Ctrl+C to stop)");

    while !is_shutdown() {
        let Some(event) = tracker.recv_event(Duration::from_millis(200)) else {
            continue;
        };
        match tracker.handle_event(&event, &mut sink) {
            Ok(()) => status_success(&format!("updated {}", event.path.display())),
            Err(err) => status_error(
                &format!("update failed for {}", event.path.display()),
                &err.to_string(),
            ),
        }
    }

    tracker.close();
    log!("watch"; "stopped");
    Ok(())
}
