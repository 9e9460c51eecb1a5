//! Filesystem snapshot trees.
//!
//! An `Entry` is a pure value used for structural diffing: leaves carry
//! mtime + size, directories are name maps. Two trees are "unchanged" when
//! every leaf's mtime and size match and the file/directory shape is
//! identical at every name. mtime + size equality is a heuristic, not a
//! content guarantee.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use rustc_hash::FxHashMap;

use crate::error::{CardError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Leaf { mtime: SystemTime, size: u64 },
    Dir(EntryMap),
}

pub type EntryMap = FxHashMap<String, Entry>;

/// Crawl a directory into a fresh snapshot tree.
pub fn crawl_dir(dir: &Path) -> Result<EntryMap> {
    let mut map = EntryMap::default();
    let entries = fs::read_dir(dir).map_err(|e| CardError::Io(dir.to_path_buf(), e))?;

    for entry in entries {
        let entry = entry.map_err(|e| CardError::Io(dir.to_path_buf(), e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        let node = if path.is_dir() {
            Entry::Dir(crawl_dir(&path)?)
        } else {
            let meta = entry.metadata().map_err(|e| CardError::Io(path.clone(), e))?;
            Entry::Leaf {
                mtime: meta.modified().map_err(|e| CardError::Io(path, e))?,
                size: meta.len(),
            }
        };
        map.insert(name, node);
    }

    Ok(map)
}

/// Recursive structural equality between two snapshot nodes.
pub fn unchanged(old: &Entry, new: &Entry) -> bool {
    match (old, new) {
        (
            Entry::Leaf { mtime: om, size: os },
            Entry::Leaf { mtime: nm, size: ns },
        ) => om == nm && os == ns,
        (Entry::Dir(old_map), Entry::Dir(new_map)) => map_unchanged(old_map, new_map),
        _ => false,
    }
}

pub fn map_unchanged(old: &EntryMap, new: &EntryMap) -> bool {
    old.len() == new.len()
        && old.iter().all(|(name, old_entry)| {
            new.get(name).is_some_and(|new_entry| unchanged(old_entry, new_entry))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_crawl_mirrors_directory_shape() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("card")).unwrap();
        fs::write(dir.path().join("card/card.json"), "{}").unwrap();
        fs::write(dir.path().join("readme.txt"), "hi").unwrap();

        let map = crawl_dir(dir.path()).unwrap();
        assert!(matches!(map["readme.txt"], Entry::Leaf { size: 2, .. }));
        let Entry::Dir(card) = &map["card"] else {
            panic!("card should be a directory entry");
        };
        assert!(matches!(card["card.json"], Entry::Leaf { size: 2, .. }));
    }

    #[test]
    fn test_unchanged_detects_edits_and_shape_flips() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("card")).unwrap();
        fs::write(dir.path().join("card/a.txt"), "one").unwrap();

        let before = crawl_dir(dir.path()).unwrap();
        assert!(map_unchanged(&before, &crawl_dir(dir.path()).unwrap()));

        fs::write(dir.path().join("card/a.txt"), "changed").unwrap();
        let after = crawl_dir(dir.path()).unwrap();
        assert!(!map_unchanged(&before, &after));
        assert!(!unchanged(&before["card"], &after["card"]));

        // Same name, file vs directory.
        fs::remove_dir_all(dir.path().join("card")).unwrap();
        fs::write(dir.path().join("card"), "now a file").unwrap();
        let flipped = crawl_dir(dir.path()).unwrap();
        assert!(!unchanged(&before["card"], &flipped["card"]));
    }

    #[test]
    fn test_added_and_removed_names_change_the_map() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        let before = crawl_dir(dir.path()).unwrap();

        fs::write(dir.path().join("b.txt"), "b").unwrap();
        assert!(!map_unchanged(&before, &crawl_dir(dir.path()).unwrap()));

        fs::remove_file(dir.path().join("a.txt")).unwrap();
        fs::remove_file(dir.path().join("b.txt")).unwrap();
        assert!(!map_unchanged(&before, &crawl_dir(dir.path()).unwrap()));
    }
}
