//! Dual-environment card cache.
//!
//! Compiled artifacts are kept in memory and written through to disk under
//! `.cardbox/cache`. Each module exists twice, once per consuming
//! environment: the browser copy stays ESM, the node copy is the CJS
//! transform. Binary-ish card files become content-addressed assets shared
//! by both environments.
//!
//! Layout:
//! ```text
//! .cardbox/cache/
//!   browser/<encoded card url>/<relative path>
//!   node/<encoded card url>/<relative path>
//!   assets/<blake3 hex>.<ext>
//!   cards/<encoded card url>.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use rustc_hash::FxHashMap;

use crate::card::CompiledCard;
use crate::error::{CardError, Result};

/// Cache directory, relative to the project root.
pub const CACHE_DIR: &str = ".cardbox/cache";

/// Consumer environment a cached module is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    Browser,
    Node,
}

impl Environment {
    pub const ALL: [Environment; 2] = [Environment::Browser, Environment::Node];

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Browser => "browser",
            Environment::Node => "node",
        }
    }
}

fn encode(url: &str) -> String {
    utf8_percent_encode(url, NON_ALPHANUMERIC).to_string()
}

/// In-memory cache with disk write-through.
pub struct CardCache {
    root: PathBuf,
    modules: FxHashMap<(Environment, String), String>,
    assets: FxHashMap<String, String>,
    compiled: FxHashMap<String, CompiledCard>,
}

impl CardCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            modules: FxHashMap::default(),
            assets: FxHashMap::default(),
            compiled: FxHashMap::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Module id for a file inside a card. Doubles as the import specifier
    /// other cards use to reach it.
    pub fn module_id(card_url: &str, rel_path: &str) -> String {
        format!("{}/{rel_path}", card_url.trim_end_matches('/'))
    }

    fn module_path(&self, env: Environment, card_url: &str, rel_path: &str) -> PathBuf {
        self.root
            .join(env.as_str())
            .join(encode(card_url))
            .join(rel_path)
    }

    fn compiled_path(&self, card_url: &str) -> PathBuf {
        self.root.join("cards").join(format!("{}.json", encode(card_url)))
    }

    /// Store one environment's copy of a card module. Returns the module id.
    pub fn set_module(
        &mut self,
        env: Environment,
        card_url: &str,
        rel_path: &str,
        source: &str,
    ) -> Result<String> {
        let path = self.module_path(env, card_url, rel_path);
        write_file(&path, source.as_bytes())?;

        let id = Self::module_id(card_url, rel_path);
        self.modules.insert((env, id.clone()), source.to_string());
        Ok(id)
    }

    /// Fetch a module's source for one environment.
    pub fn module(&self, env: Environment, module_id: &str) -> Option<&str> {
        self.modules.get(&(env, module_id.to_string())).map(String::as_str)
    }

    /// Store a non-module file as a content-addressed asset. Returns the
    /// asset's cache-relative path.
    pub fn write_asset(&mut self, content: &[u8], ext: &str) -> Result<String> {
        let hash = blake3::hash(content);
        let name = if ext.is_empty() {
            hex::encode(hash.as_bytes())
        } else {
            format!("{}.{ext}", hex::encode(hash.as_bytes()))
        };
        let path = self.root.join("assets").join(&name);
        // Content addressing makes rewrites of an existing asset no-ops.
        if !path.exists() {
            write_file(&path, content)?;
        }
        Ok(format!("assets/{name}"))
    }

    /// Store a card file as an asset and remember which card file it
    /// resolves to.
    pub fn set_asset(
        &mut self,
        card_url: &str,
        rel_path: &str,
        content: &[u8],
        ext: &str,
    ) -> Result<String> {
        let asset = self.write_asset(content, ext)?;
        self.assets
            .insert(Self::module_id(card_url, rel_path), asset.clone());
        Ok(asset)
    }

    /// Cache-relative asset path a card file was stored under.
    pub fn asset(&self, id: &str) -> Option<&str> {
        self.assets.get(id).map(String::as_str)
    }

    /// Store a card's compiled form.
    pub fn set_compiled(&mut self, card: CompiledCard) -> Result<()> {
        let path = self.compiled_path(&card.url);
        let json = serde_json::to_string_pretty(&card)?;
        write_file(&path, json.as_bytes())?;
        self.compiled.insert(card.url.clone(), card);
        Ok(())
    }

    /// Fetch a card's compiled form, falling back to the on-disk copy left
    /// by a previous run.
    pub fn compiled(&mut self, card_url: &str) -> Result<Option<&CompiledCard>> {
        if !self.compiled.contains_key(card_url) {
            let path = self.compiled_path(card_url);
            if path.is_file() {
                let json = fs::read_to_string(&path).map_err(|e| CardError::Io(path, e))?;
                let card: CompiledCard = serde_json::from_str(&json)?;
                self.compiled.insert(card_url.to_string(), card);
            }
        }
        Ok(self.compiled.get(card_url))
    }

    /// Replace the `data` of an already-compiled card without recompiling
    /// its modules.
    pub fn update_data(
        &mut self,
        card_url: &str,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let Some(card) = self.compiled.get_mut(card_url) else {
            return Err(CardError::missing(format!(
                "`{card_url}` is not in the card cache"
            )));
        };
        card.data = Some(data);

        let path = self.compiled_path(card_url);
        let json = serde_json::to_string_pretty(&self.compiled[card_url])?;
        write_file(&path, json.as_bytes())
    }

    /// Evict everything cached for one card. Shared assets stay; they are
    /// content-addressed and other cards may point at them.
    pub fn delete(&mut self, card_url: &str) -> Result<()> {
        self.compiled.remove(card_url);
        let prefix = format!("{}/", card_url.trim_end_matches('/'));
        self.modules
            .retain(|(_, id), _| !id.starts_with(&prefix) && id != card_url);
        self.assets.retain(|id, _| !id.starts_with(&prefix));

        for env in Environment::ALL {
            let dir = self.root.join(env.as_str()).join(encode(card_url));
            if dir.exists() {
                fs::remove_dir_all(&dir).map_err(|e| CardError::Io(dir.clone(), e))?;
            }
        }
        let path = self.compiled_path(card_url);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| CardError::Io(path, e))?;
        }
        Ok(())
    }
}

fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CardError::Io(parent.to_path_buf(), e))?;
    }
    fs::write(path, content).map_err(|e| CardError::Io(path.to_path_buf(), e))
}
