//! `cardbox index` — full indexing update over every configured realm.

use anyhow::{Context, Result};

use crate::config::BoxConfig;
use crate::index::{FsIndex, IndexingOperations, RecordedOp, RecordingIndex};
use crate::log;
use crate::realm::{Realm, RealmManager};
use crate::track::FilesTracker;

pub fn run_index(dry_run: bool, config: &BoxConfig) -> Result<()> {
    let manager = config.realm_manager();
    let mut tracker = FilesTracker::new();

    let result = if dry_run {
        let mut sink = RecordingIndex::new();
        let result = update_all(&mut tracker, &manager, &mut sink);
        report_dry_run(&sink);
        result
    } else {
        let mut sink = FsIndex::new(config.index_dir());
        update_all(&mut tracker, &manager, &mut sink)
    };

    tracker.close();
    result
}

fn update_all(
    tracker: &mut FilesTracker,
    manager: &RealmManager,
    sink: &mut dyn IndexingOperations,
) -> Result<()> {
    for realm in manager.realms() {
        log!("index"; "updating {}", realm.url());
        tracker
            .update(realm, sink)
            .with_context(|| format!("failed to index realm `{}`", realm.url()))?;
    }
    Ok(())
}

fn report_dry_run(sink: &RecordingIndex) {
    for op in &sink.ops {
        match op {
            RecordedOp::BeginReplaceAll => log!("index"; "begin replace-all"),
            RecordedOp::Save(id, _) => log!("index"; "save {id}"),
            RecordedOp::Delete(id) => log!("index"; "delete {id}"),
            RecordedOp::FinishReplaceAll => log!("index"; "finish replace-all"),
        }
    }
    log!("index"; "dry run: {} operation(s), nothing written", sink.ops.len());
}
