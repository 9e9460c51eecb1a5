//! Realms: named collections of cards served under a URL prefix.
//!
//! A filesystem realm maps one directory to one URL prefix. Every child
//! directory holding a `card.json` is a card; the card's URL is the realm
//! URL joined with the directory name. Card lookup across realms goes
//! through `RealmManager`, which picks the realm whose URL is the longest
//! prefix of the requested card URL.

use std::fs;
use std::path::{Path, PathBuf};

use jwalk::WalkDir;
use serde_json::{Map, Value};

use crate::card::{
    CardDocument, FileNode, FileTree, Format, PackageJson, RESERVED_FILES, RawCard,
};
use crate::error::{CardError, Result};

/// Source of raw cards, and the write/delete surface the compiler needs.
pub trait Realm {
    /// The realm's URL prefix, always ending in `/`.
    fn url(&self) -> &str;

    fn get_raw_card(&self, card_url: &str) -> Result<RawCard>;

    fn does_card_exist(&self, card_url: &str) -> bool;

    /// Overwrite the card's `data` attribute in its `card.json`.
    fn update_card_data(&self, card_url: &str, data: Map<String, Value>) -> Result<()>;

    /// Remove the card's directory and everything under it.
    fn delete_card(&self, card_url: &str) -> Result<()>;
}

// ============================================================================
// Filesystem realm
// ============================================================================

/// A realm backed by a local directory.
#[derive(Debug, Clone)]
pub struct FsRealm {
    url: String,
    directory: PathBuf,
    watcher_enabled: bool,
}

impl FsRealm {
    pub fn new(url: impl Into<String>, directory: impl Into<PathBuf>, watcher_enabled: bool) -> Self {
        let mut url = url.into();
        if !url.ends_with('/') {
            url.push('/');
        }
        Self {
            url,
            directory: directory.into(),
            watcher_enabled,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn watcher_enabled(&self) -> bool {
        self.watcher_enabled
    }

    /// The local directory a card URL maps to.
    pub fn card_directory(&self, card_url: &str) -> Result<PathBuf> {
        let relative = card_url
            .strip_prefix(&self.url)
            .ok_or_else(|| {
                CardError::missing(format!("card `{card_url}` is not in realm `{}`", self.url))
            })?
            .trim_end_matches('/');
        if relative.is_empty() || relative.contains('/') {
            return Err(CardError::missing(format!(
                "card `{card_url}` does not name a card directory in realm `{}`",
                self.url
            )));
        }
        Ok(self.directory.join(relative))
    }

}

impl Realm for FsRealm {
    fn url(&self) -> &str {
        &self.url
    }

    fn get_raw_card(&self, card_url: &str) -> Result<RawCard> {
        let dir = self.card_directory(card_url)?;
        let doc = read_card_document(&dir)?;

        let mut raw = RawCard::new(card_url.trim_end_matches('/'));
        raw.adopts_from = doc.adopts_from().map(str::to_string);
        raw.schema = doc.schema().map(str::to_string);
        raw.isolated = doc.format_path(Format::Isolated).map(str::to_string);
        raw.embedded = doc.format_path(Format::Embedded).map(str::to_string);
        raw.edit = doc.format_path(Format::Edit).map(str::to_string);
        raw.data = doc.card_data().cloned();
        raw.files = read_file_tree(&dir)?;
        Ok(raw)
    }

    fn does_card_exist(&self, card_url: &str) -> bool {
        self.card_directory(card_url)
            .map(|dir| dir.join("card.json").is_file())
            .unwrap_or(false)
    }

    fn update_card_data(&self, card_url: &str, data: Map<String, Value>) -> Result<()> {
        let dir = self.card_directory(card_url)?;
        let mut doc = read_card_document(&dir)?;
        doc.set_attr("data", Value::Object(data));

        let path = dir.join("card.json");
        let json = serde_json::to_string_pretty(&doc)?;
        fs::write(&path, json).map_err(|e| CardError::Io(path, e))
    }

    fn delete_card(&self, card_url: &str) -> Result<()> {
        let dir = self.card_directory(card_url)?;
        if !dir.exists() {
            return Err(CardError::missing(format!("card `{card_url}` does not exist")));
        }
        fs::remove_dir_all(&dir).map_err(|e| CardError::Io(dir, e))
    }
}

/// Read and parse a card directory's `card.json`.
pub fn read_card_document(card_dir: &Path) -> Result<CardDocument> {
    let path = card_dir.join("card.json");
    if !path.is_file() {
        return Err(CardError::missing(format!(
            "`{}` has no card.json",
            card_dir.display()
        )));
    }
    let json = fs::read_to_string(&path).map_err(|e| CardError::Io(path.clone(), e))?;
    serde_json::from_str(&json).map_err(|e| CardError::Parse {
        path: path.display().to_string(),
        detail: e.to_string(),
    })
}

/// Read a card directory's optional `package.json`. Absent file yields the
/// default (no peer dependencies); a present but malformed file is an error
/// so callers can decide whether to skip.
pub fn read_package_json(card_dir: &Path) -> Result<PackageJson> {
    let path = card_dir.join("package.json");
    if !path.is_file() {
        return Ok(PackageJson::default());
    }
    let json = fs::read_to_string(&path).map_err(|e| CardError::Io(path.clone(), e))?;
    serde_json::from_str(&json).map_err(|e| CardError::Parse {
        path: path.display().to_string(),
        detail: e.to_string(),
    })
}

/// Build a card's file tree from disk, skipping the reserved documents at
/// the top level. File content is read as UTF-8.
pub fn read_file_tree(card_dir: &Path) -> Result<FileTree> {
    let mut tree = FileTree::default();

    for entry in WalkDir::new(card_dir).sort(true) {
        let entry = entry.map_err(|e| {
            CardError::missing(format!("failed to walk `{}`: {e}", card_dir.display()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path
            .strip_prefix(card_dir)
            .map_err(|_| CardError::internal("walked entry escaped its card directory"))?;

        let components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if components.len() == 1 && RESERVED_FILES.contains(&components[0].as_str()) {
            continue;
        }

        let content = fs::read_to_string(&path).map_err(|e| CardError::Io(path.clone(), e))?;
        insert_file(&mut tree, &components, content);
    }

    Ok(tree)
}

fn insert_file(tree: &mut FileTree, components: &[String], content: String) {
    let (leaf, dirs) = match components.split_last() {
        Some(split) => split,
        None => return,
    };
    let mut current = tree;
    for dir in dirs {
        let node = current
            .entry(dir.clone())
            .or_insert_with(|| FileNode::Dir(Default::default()));
        match node {
            FileNode::Dir(children) => current = children,
            // A file and directory cannot share a path on disk.
            FileNode::File(_) => return,
        }
    }
    current.insert(leaf.clone(), FileNode::File(content));
}

// ============================================================================
// Realm manager
// ============================================================================

/// Routes card URLs to realms by longest matching URL prefix.
#[derive(Debug, Default)]
pub struct RealmManager {
    realms: Vec<FsRealm>,
}

impl RealmManager {
    pub fn new(realms: Vec<FsRealm>) -> Self {
        Self { realms }
    }

    pub fn realms(&self) -> &[FsRealm] {
        &self.realms
    }

    /// The realm owning `card_url`, by longest URL prefix.
    pub fn realm_for(&self, card_url: &str) -> Result<&FsRealm> {
        self.realms
            .iter()
            .filter(|realm| card_url.starts_with(realm.url()))
            .max_by_key(|realm| realm.url().len())
            .ok_or_else(|| CardError::missing(format!("no realm serves `{card_url}`")))
    }

    pub fn get_raw_card(&self, card_url: &str) -> Result<RawCard> {
        self.realm_for(card_url)?.get_raw_card(card_url)
    }

    pub fn does_card_exist(&self, card_url: &str) -> bool {
        self.realm_for(card_url)
            .map(|realm| realm.does_card_exist(card_url))
            .unwrap_or(false)
    }
}
