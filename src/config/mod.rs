//! Project configuration from `cardbox.toml`.
//!
//! ```toml
//! [[realm]]
//! url = "https://cards.example.com/demo/"
//! directory = "cards"
//! watcher = true
//!
//! [cache]
//! directory = ".cardbox/cache"
//!
//! [index]
//! directory = ".cardbox/index"
//! ```
//!
//! Relative paths resolve against the config file's directory. Unknown
//! keys are warned about, never fatal.

mod error;

pub use error::ConfigError;

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::log;
use crate::realm::{FsRealm, RealmManager};

#[derive(Debug, Clone, Deserialize)]
pub struct BoxConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Project root directory, the config file's parent (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    #[serde(default, rename = "realm")]
    pub realms: Vec<RealmEntry>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealmEntry {
    pub url: String,
    pub directory: PathBuf,
    #[serde(default = "default_true")]
    pub watcher: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub directory: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(crate::compiler::CACHE_DIR)
}

fn default_index_dir() -> PathBuf {
    PathBuf::from(".cardbox/index")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            directory: default_index_dir(),
        }
    }
}

impl BoxConfig {
    /// Load configuration from a config file path.
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(config_path)
            .map_err(|e| ConfigError::Io(config_path.to_path_buf(), e))?;
        let (mut config, ignored) = Self::parse_with_ignored(&content)?;

        if !ignored.is_empty() {
            log!("warning"; "unknown fields in {}, ignoring:", config_path.display());
            for field in &ignored {
                eprintln!("- {field}");
            }
        }

        config.config_path = config_path.to_path_buf();
        config.root = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.realms.is_empty() {
            return Err(ConfigError::Validation(
                "at least one [[realm]] is required".to_string(),
            ));
        }
        for realm in &self.realms {
            if !realm.url.ends_with('/') {
                return Err(ConfigError::Validation(format!(
                    "realm url `{}` must end with '/'",
                    realm.url
                )));
            }
        }
        Ok(())
    }

    /// Resolve a configured path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.resolve(&self.cache.directory)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.resolve(&self.index.directory)
    }

    /// Build the realm manager from the configured realm entries.
    pub fn realm_manager(&self) -> RealmManager {
        let realms = self
            .realms
            .iter()
            .map(|entry| FsRealm::new(entry.url.clone(), self.resolve(&entry.directory), entry.watcher))
            .collect();
        RealmManager::new(realms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::Realm;
    use tempfile::TempDir;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("cardbox.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[[realm]]
url = "https://cards.example.com/demo/"
directory = "cards"
"#,
        );

        let config = BoxConfig::load(&path).unwrap();
        assert_eq!(config.realms.len(), 1);
        assert!(config.realms[0].watcher);
        assert_eq!(config.cache_dir(), dir.path().join(".cardbox/cache"));
        assert_eq!(config.index_dir(), dir.path().join(".cardbox/index"));

        let manager = config.realm_manager();
        assert_eq!(manager.realms()[0].url(), "https://cards.example.com/demo/");
        assert_eq!(manager.realms()[0].directory(), dir.path().join("cards"));
    }

    #[test]
    fn test_watcher_opt_out_and_custom_dirs() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[[realm]]
url = "https://cards.example.com/demo/"
directory = "cards"
watcher = false

[cache]
directory = "build/cache"
"#,
        );

        let config = BoxConfig::load(&path).unwrap();
        assert!(!config.realms[0].watcher);
        assert!(!config.realm_manager().realms()[0].watcher_enabled());
        assert_eq!(config.cache_dir(), dir.path().join("build/cache"));
    }

    #[test]
    fn test_realm_url_must_end_with_slash() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[[realm]]
url = "https://cards.example.com/demo"
directory = "cards"
"#,
        );

        let err = BoxConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_missing_realms_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path(), "");
        let err = BoxConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
