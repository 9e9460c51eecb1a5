//! Files-realm tracker.
//!
//! Owns the long-lived incremental state per realm directory: the previous
//! snapshot tree, the card-directory to upstream-identity map, and the file
//! watch subscriptions. Converts filesystem deltas into minimal indexing
//! operations. Every update for one realm must run to completion before the
//! next begins; the caller serializes.

mod entry;

pub use entry::{Entry, EntryMap, crawl_dir, unchanged};

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::card::tree_to_json;
use crate::error::{CardError, Result};
use crate::index::{IndexingOperations, UpstreamDocument, UpstreamIdentity};
use crate::log;
use crate::realm::{FsRealm, Realm, read_card_document, read_file_tree, read_package_json};

/// What kind of filesystem change an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Change,
    Delete,
}

/// One filesystem event, already attributed to its watched realm root.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub root: PathBuf,
}

struct Subscription {
    realm: FsRealm,
    // Dropping the watcher unregisters it.
    _watcher: Option<RecommendedWatcher>,
}

pub struct FilesTracker {
    snapshots: FxHashMap<PathBuf, EntryMap>,
    upstream_ids: FxHashMap<PathBuf, UpstreamIdentity>,
    subscriptions: FxHashMap<PathBuf, Subscription>,
    events_tx: Sender<WatchEvent>,
    events_rx: Receiver<WatchEvent>,
}

impl Default for FilesTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FilesTracker {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            snapshots: FxHashMap::default(),
            upstream_ids: FxHashMap::default(),
            subscriptions: FxHashMap::default(),
            events_tx,
            events_rx,
        }
    }

    /// Full update: crawl the realm directory, diff against the previous
    /// snapshot, and emit the minimal save/delete set. The first update for
    /// a realm has no prior snapshot and brackets the whole scan in a
    /// replace-all. The new snapshot replaces the old one only after every
    /// emitted operation succeeds.
    pub fn update(&mut self, realm: &FsRealm, ops: &mut dyn IndexingOperations) -> Result<()> {
        self.ensure_subscribed(realm)?;
        let root = realm.directory().to_path_buf();

        let new_map = crawl_dir(&root)?;
        let old_map = self.snapshots.get(&root);
        let replace_all = old_map.is_none();

        if replace_all {
            ops.begin_replace_all()?;
        }

        let mut pending_saves: Vec<(PathBuf, UpstreamIdentity)> = Vec::new();
        let mut pending_removals: Vec<PathBuf> = Vec::new();

        // Cards live one directory level down; top-level plain files are
        // never cards.
        let mut names: Vec<&String> = new_map.keys().collect();
        names.sort();
        for name in names {
            let Entry::Dir(_) = &new_map[name] else {
                continue;
            };
            if let Some(old_entry) = old_map.and_then(|map| map.get(name))
                && unchanged(old_entry, &new_map[name])
            {
                continue;
            }
            let card_dir = root.join(name);
            if let Some((id, doc)) = assemble_card(realm, &card_dir)? {
                ops.save(&id, doc)?;
                pending_saves.push((card_dir, id));
            }
        }

        // Directories that vanished or turned into files are deletions.
        if let Some(old_map) = old_map {
            let mut gone: Vec<&String> = old_map
                .iter()
                .filter(|(name, old_entry)| {
                    matches!(old_entry, Entry::Dir(_))
                        && !matches!(new_map.get(*name), Some(Entry::Dir(_)))
                })
                .map(|(name, _)| name)
                .collect();
            gone.sort();

            for name in gone {
                let card_dir = root.join(name);
                let Some(id) = self.upstream_ids.get(&card_dir) else {
                    return Err(CardError::internal(format!(
                        "missing upstream id for `{}` (bug in files-realm tracker)",
                        card_dir.display()
                    )));
                };
                ops.delete(id)?;
                pending_removals.push(card_dir);
            }
        }

        if replace_all {
            ops.finish_replace_all()?;
        }

        for (card_dir, id) in pending_saves {
            self.upstream_ids.insert(card_dir, id);
        }
        for card_dir in pending_removals {
            self.upstream_ids.remove(&card_dir);
        }
        self.snapshots.insert(root, new_map);
        Ok(())
    }

    /// Targeted update for one changed file: re-save or delete the single
    /// card directory containing it. Never brackets in a replace-all.
    pub fn update_file(
        &mut self,
        realm: &FsRealm,
        changed: &Path,
        ops: &mut dyn IndexingOperations,
    ) -> Result<()> {
        self.ensure_subscribed(realm)?;
        let root = realm.directory().to_path_buf();

        let Ok(relative) = changed.strip_prefix(&root) else {
            log!("watch"; "`{}` is outside realm `{}`", changed.display(), realm.url());
            return Ok(());
        };
        let Some(name) = relative
            .components()
            .next()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
        else {
            return Ok(());
        };
        let card_dir = root.join(&name);

        if card_dir.is_dir() {
            // A full single-card reindex, not a byte-level patch.
            if let Some((id, doc)) = assemble_card(realm, &card_dir)? {
                ops.save(&id, doc)?;
                self.upstream_ids.insert(card_dir.clone(), id);
                if let Some(snapshot) = self.snapshots.get_mut(&root) {
                    snapshot.insert(name, Entry::Dir(crawl_dir(&card_dir)?));
                }
            }
        } else {
            // Gone, or no longer a directory. A missing recorded identity
            // means the deletion was already observed.
            if let Some(id) = self.upstream_ids.remove(&card_dir) {
                ops.delete(&id)?;
            }
            if let Some(snapshot) = self.snapshots.get_mut(&root) {
                snapshot.remove(&name);
            }
        }
        Ok(())
    }

    /// Translate a watch event into a targeted update against the owning
    /// realm. Events for untracked roots are logged and dropped.
    pub fn handle_event(
        &mut self,
        event: &WatchEvent,
        ops: &mut dyn IndexingOperations,
    ) -> Result<()> {
        let Some(subscription) = self.subscriptions.get(&event.root) else {
            log!("watch"; "dropping event for untracked root `{}`", event.root.display());
            return Ok(());
        };
        let realm = subscription.realm.clone();
        self.update_file(&realm, &event.path, ops)
    }

    /// Block up to `timeout` waiting for the next watch event.
    pub fn recv_event(&self, timeout: Duration) -> Option<WatchEvent> {
        self.events_rx.recv_timeout(timeout).ok()
    }

    /// Subscribe a realm directory, starting a file watcher unless the
    /// realm opts out. Re-subscribing an already-subscribed directory is a
    /// no-op.
    fn ensure_subscribed(&mut self, realm: &FsRealm) -> Result<()> {
        let root = realm.directory().to_path_buf();
        if self.subscriptions.contains_key(&root) {
            return Ok(());
        }

        let watcher = if realm.watcher_enabled() {
            Some(self.spawn_watcher(&root)?)
        } else {
            None
        };
        self.subscriptions.insert(root, Subscription {
            realm: realm.clone(),
            _watcher: watcher,
        });
        Ok(())
    }

    fn spawn_watcher(&self, root: &Path) -> Result<RecommendedWatcher> {
        let tx = self.events_tx.clone();
        let watched_root = root.to_path_buf();

        let mut watcher = recommended_watcher(move |result: notify::Result<Event>| {
            let Ok(event) = result else { return };
            let kind = match event.kind {
                EventKind::Create(_) => ChangeKind::Add,
                EventKind::Modify(_) => ChangeKind::Change,
                EventKind::Remove(_) => ChangeKind::Delete,
                _ => return,
            };
            for path in event.paths {
                tx.send(WatchEvent {
                    kind,
                    path,
                    root: watched_root.clone(),
                })
                .ok();
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        log!("watch"; "watching {}", root.display());
        Ok(watcher)
    }

    /// Tear down every subscription and forget all tracked state. Applied
    /// index operations are never rolled back.
    pub fn close(&mut self) {
        self.subscriptions.clear();
        self.snapshots.clear();
        self.upstream_ids.clear();
    }
}

/// Assemble a card directory into its upstream document. Parse failures
/// and missing documents are downgraded to a skip with a warning; the
/// overall update keeps going.
fn assemble_card(
    realm: &FsRealm,
    card_dir: &Path,
) -> Result<Option<(UpstreamIdentity, UpstreamDocument)>> {
    let mut doc = match read_card_document(card_dir) {
        Ok(doc) => doc,
        Err(err) => {
            log!("index"; "skipping `{}`: {err}", card_dir.display());
            return Ok(None);
        }
    };
    let package = match read_package_json(card_dir) {
        Ok(package) => package,
        Err(err) => {
            log!("index"; "skipping `{}`: {err}", card_dir.display());
            return Ok(None);
        }
    };

    let Some(cs_id) = doc.cs_id().map(str::to_string) else {
        log!("index"; "skipping `{}`: card.json has no csId", card_dir.display());
        return Ok(None);
    };
    let cs_original_realm = doc
        .cs_original_realm()
        .unwrap_or(realm.url())
        .to_string();

    // csFiles is derived; never trust a stale value from card.json.
    let files = read_file_tree(card_dir)?;
    doc.set_attr("csFiles", Value::Object(tree_to_json(&files)));
    if !package.peer_dependencies.is_empty() {
        doc.set_attr("peerDependencies", Value::Object(package.peer_dependencies));
    }

    let identity = UpstreamIdentity {
        cs_id,
        cs_original_realm,
    };
    Ok(Some((identity, UpstreamDocument { document: doc })))
}
