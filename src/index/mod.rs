//! Indexing sink seam.
//!
//! The tracker emits minimal save/delete operations against an
//! `IndexingOperations` implementation. The search engine proper lives
//! elsewhere; this module carries the contract, a filesystem sink used by
//! the CLI, and a recording sink for tests and dry runs.

use std::fs;
use std::path::{Path, PathBuf};

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::card::CardDocument;
use crate::error::{CardError, Result};

/// The store's stable key for a card, independent of its realm-relative
/// path. Stable across renames as long as the same card directory is
/// re-resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpstreamIdentity {
    pub cs_id: String,
    pub cs_original_realm: String,
}

impl std::fmt::Display for UpstreamIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.cs_original_realm, self.cs_id)
    }
}

/// The document handed to the sink: the card's single-resource document
/// with derived attributes (`csFiles`, `peerDependencies`) filled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpstreamDocument {
    pub document: CardDocument,
}

/// Contract implemented by the search/index layer.
///
/// `begin_replace_all`/`finish_replace_all` bracket a full-realm resync and
/// signal the sink to atomically swap in a fresh generation; they are
/// omitted entirely for targeted updates.
pub trait IndexingOperations {
    fn begin_replace_all(&mut self) -> Result<()>;
    fn save(&mut self, id: &UpstreamIdentity, doc: UpstreamDocument) -> Result<()>;
    fn delete(&mut self, id: &UpstreamIdentity) -> Result<()>;
    fn finish_replace_all(&mut self) -> Result<()>;
}

// ============================================================================
// Filesystem sink
// ============================================================================

/// Name of the staging directory used while a replace-all is in flight.
const STAGING_DIR: &str = ".staging";
/// Name of the live generation directory.
const CURRENT_DIR: &str = "current";

/// Materializes upstream documents as JSON files.
///
/// Layout: `<dir>/current/<realm>__<id>.json`. During a replace-all,
/// writes land in `<dir>/.staging` and the whole generation is swapped
/// into place on finish.
pub struct FsIndex {
    dir: PathBuf,
    staging: bool,
}

impl FsIndex {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            staging: false,
        }
    }

    fn active_dir(&self) -> PathBuf {
        if self.staging {
            self.dir.join(STAGING_DIR)
        } else {
            self.dir.join(CURRENT_DIR)
        }
    }

    fn doc_path(&self, id: &UpstreamIdentity) -> PathBuf {
        let realm = utf8_percent_encode(&id.cs_original_realm, NON_ALPHANUMERIC);
        let cs_id = utf8_percent_encode(&id.cs_id, NON_ALPHANUMERIC);
        self.active_dir().join(format!("{realm}__{cs_id}.json"))
    }

    /// Read a previously saved document back out of the live generation.
    pub fn lookup(&self, id: &UpstreamIdentity) -> Result<Option<UpstreamDocument>> {
        let realm = utf8_percent_encode(&id.cs_original_realm, NON_ALPHANUMERIC);
        let cs_id = utf8_percent_encode(&id.cs_id, NON_ALPHANUMERIC);
        let path = self
            .dir
            .join(CURRENT_DIR)
            .join(format!("{realm}__{cs_id}.json"));
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).map_err(|e| CardError::Io(path, e))?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn write_doc(&self, path: &Path, doc: &UpstreamDocument) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CardError::Io(parent.to_path_buf(), e))?;
        }
        let json = serde_json::to_string_pretty(doc)?;
        fs::write(path, json).map_err(|e| CardError::Io(path.to_path_buf(), e))
    }
}

impl IndexingOperations for FsIndex {
    fn begin_replace_all(&mut self) -> Result<()> {
        let staging = self.dir.join(STAGING_DIR);
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| CardError::Io(staging.clone(), e))?;
        }
        fs::create_dir_all(&staging).map_err(|e| CardError::Io(staging, e))?;
        self.staging = true;
        Ok(())
    }

    fn save(&mut self, id: &UpstreamIdentity, doc: UpstreamDocument) -> Result<()> {
        let path = self.doc_path(id);
        self.write_doc(&path, &doc)?;
        crate::debug!("index"; "saved {}", id);
        Ok(())
    }

    fn delete(&mut self, id: &UpstreamIdentity) -> Result<()> {
        let path = self.doc_path(id);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| CardError::Io(path, e))?;
        }
        crate::debug!("index"; "deleted {}", id);
        Ok(())
    }

    fn finish_replace_all(&mut self) -> Result<()> {
        let staging = self.dir.join(STAGING_DIR);
        let current = self.dir.join(CURRENT_DIR);
        if current.exists() {
            fs::remove_dir_all(&current).map_err(|e| CardError::Io(current.clone(), e))?;
        }
        fs::rename(&staging, &current).map_err(|e| CardError::Io(staging, e))?;
        self.staging = false;
        Ok(())
    }
}

// ============================================================================
// Recording sink
// ============================================================================

/// One recorded indexing operation.
#[derive(Debug, Clone)]
pub enum RecordedOp {
    BeginReplaceAll,
    Save(UpstreamIdentity, UpstreamDocument),
    Delete(UpstreamIdentity),
    FinishReplaceAll,
}

/// Captures the operation stream instead of applying it. Backs `--dry-run`
/// and the tracker tests.
#[derive(Debug, Default)]
pub struct RecordingIndex {
    pub ops: Vec<RecordedOp>,
}

impl RecordingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saves(&self) -> Vec<&UpstreamIdentity> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Save(id, _) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<&UpstreamIdentity> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Delete(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn saved_doc(&self, cs_id: &str) -> Option<&UpstreamDocument> {
        self.ops.iter().rev().find_map(|op| match op {
            RecordedOp::Save(id, doc) if id.cs_id == cs_id => Some(doc),
            _ => None,
        })
    }

    pub fn has_replace_all_bracket(&self) -> bool {
        matches!(self.ops.first(), Some(RecordedOp::BeginReplaceAll))
            && matches!(self.ops.last(), Some(RecordedOp::FinishReplaceAll))
    }
}

impl IndexingOperations for RecordingIndex {
    fn begin_replace_all(&mut self) -> Result<()> {
        self.ops.push(RecordedOp::BeginReplaceAll);
        Ok(())
    }

    fn save(&mut self, id: &UpstreamIdentity, doc: UpstreamDocument) -> Result<()> {
        self.ops.push(RecordedOp::Save(id.clone(), doc));
        Ok(())
    }

    fn delete(&mut self, id: &UpstreamIdentity) -> Result<()> {
        self.ops.push(RecordedOp::Delete(id.clone()));
        Ok(())
    }

    fn finish_replace_all(&mut self) -> Result<()> {
        self.ops.push(RecordedOp::FinishReplaceAll);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity(id: &str) -> UpstreamIdentity {
        UpstreamIdentity {
            cs_id: id.to_string(),
            cs_original_realm: "https://cards.example.com/demo/".to_string(),
        }
    }

    fn doc() -> UpstreamDocument {
        UpstreamDocument {
            document: CardDocument::new(),
        }
    }

    #[test]
    fn test_fs_index_replace_all_swaps_generation() {
        let dir = TempDir::new().unwrap();
        let mut index = FsIndex::new(dir.path());

        index.begin_replace_all().unwrap();
        index.save(&identity("first-card"), doc()).unwrap();
        index.finish_replace_all().unwrap();
        assert!(index.lookup(&identity("first-card")).unwrap().is_some());

        // A second generation replaces the first wholesale.
        index.begin_replace_all().unwrap();
        index.save(&identity("second-card"), doc()).unwrap();
        index.finish_replace_all().unwrap();
        assert!(index.lookup(&identity("first-card")).unwrap().is_none());
        assert!(index.lookup(&identity("second-card")).unwrap().is_some());
    }

    #[test]
    fn test_fs_index_targeted_save_and_delete() {
        let dir = TempDir::new().unwrap();
        let mut index = FsIndex::new(dir.path());

        index.begin_replace_all().unwrap();
        index.finish_replace_all().unwrap();

        index.save(&identity("first-card"), doc()).unwrap();
        assert!(index.lookup(&identity("first-card")).unwrap().is_some());

        index.delete(&identity("first-card")).unwrap();
        assert!(index.lookup(&identity("first-card")).unwrap().is_none());
    }

    #[test]
    fn test_recording_index_bracket_detection() {
        let mut rec = RecordingIndex::new();
        rec.begin_replace_all().unwrap();
        rec.save(&identity("a"), doc()).unwrap();
        rec.finish_replace_all().unwrap();
        assert!(rec.has_replace_all_bracket());
        assert_eq!(rec.saves().len(), 1);

        let mut rec = RecordingIndex::new();
        rec.save(&identity("a"), doc()).unwrap();
        assert!(!rec.has_replace_all_bracket());
    }
}
