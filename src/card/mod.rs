//! Core card data model.
//!
//! A card is a unit of schema + presentation templates, optionally adopting
//! from a parent card. `RawCard` is the pre-compilation source document read
//! from a realm; `CompiledCard` is the post-compilation runtime artifact.

mod document;

pub use document::{CardDocument, PackageJson, RESERVED_FILES};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Module specifier that schema annotations must be imported from.
pub const TYPES_MODULE: &str = "@cardbox/types";

/// Module specifier providing the template-compilation call.
pub const TEMPLATE_MODULE: &str = "@cardbox/template";

/// Name of the template-compilation call inside template modules.
pub const TEMPLATE_CALL: &str = "compileTemplate";

// ============================================================================
// Formats
// ============================================================================

/// A named presentation variant of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Isolated,
    Embedded,
    Edit,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Isolated, Format::Embedded, Format::Edit];

    pub fn as_str(self) -> &'static str {
        match self {
            Format::Isolated => "isolated",
            Format::Embedded => "embedded",
            Format::Edit => "edit",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Fields
// ============================================================================

/// Relationship kind declared by a schema field annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    HasMany,
    BelongsTo,
    Contains,
    ContainsMany,
}

impl FieldKind {
    /// The annotation name as written in schema source.
    pub fn annotation(self) -> &'static str {
        match self {
            FieldKind::HasMany => "hasMany",
            FieldKind::BelongsTo => "belongsTo",
            FieldKind::Contains => "contains",
            FieldKind::ContainsMany => "containsMany",
        }
    }

    pub fn from_annotation(name: &str) -> Option<Self> {
        match name {
            "hasMany" => Some(FieldKind::HasMany),
            "belongsTo" => Some(FieldKind::BelongsTo),
            "contains" => Some(FieldKind::Contains),
            "containsMany" => Some(FieldKind::ContainsMany),
            _ => None,
        }
    }
}

/// A single declared field: which card it points at, how, and the local
/// binding name its card module was imported under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub card_url: String,
    pub kind: FieldKind,
    pub local_name: String,
}

/// Declared fields keyed by field name. Insertion order is irrelevant.
pub type FieldsMeta = FxHashMap<String, FieldMeta>;

/// The single card a schema adopts from. Absent on adoption-chain roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentMeta {
    pub card_url: String,
}

// ============================================================================
// File trees
// ============================================================================

/// A card's on-disk file tree: leaf content or a nested directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNode {
    File(String),
    Dir(FxHashMap<String, FileNode>),
}

/// Top level of a card's file tree, keyed by name.
pub type FileTree = FxHashMap<String, FileNode>;

/// Look up a slash-separated relative path in a file tree.
pub fn lookup_file<'a>(tree: &'a FileTree, path: &str) -> Option<&'a str> {
    let mut parts = path.split('/').filter(|p| !p.is_empty());
    let first = parts.next()?;
    let mut node = tree.get(first)?;
    for part in parts {
        match node {
            FileNode::Dir(children) => node = children.get(part)?,
            FileNode::File(_) => return None,
        }
    }
    match node {
        FileNode::File(content) => Some(content),
        FileNode::Dir(_) => None,
    }
}

/// Convert a file tree into a JSON object (the `csFiles` attribute shape).
pub fn tree_to_json(tree: &FileTree) -> Map<String, Value> {
    let mut sorted: Vec<_> = tree.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut map = Map::new();
    for (name, node) in sorted {
        let value = match node {
            FileNode::File(content) => Value::String(content.clone()),
            FileNode::Dir(children) => Value::Object(tree_to_json(children)),
        };
        map.insert(name.clone(), value);
    }
    map
}

// ============================================================================
// Raw and compiled cards
// ============================================================================

/// A card as read from its realm. Immutable once read; one instance per
/// compile invocation.
#[derive(Debug, Clone)]
pub struct RawCard {
    pub url: String,
    pub adopts_from: Option<String>,
    /// Relative path of the schema module, if this card declares one.
    pub schema: Option<String>,
    pub isolated: Option<String>,
    pub embedded: Option<String>,
    pub edit: Option<String>,
    pub data: Option<Map<String, Value>>,
    pub files: FileTree,
}

impl RawCard {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            adopts_from: None,
            schema: None,
            isolated: None,
            embedded: None,
            edit: None,
            data: None,
            files: FileTree::default(),
        }
    }

    /// Relative path of the template module declared for `format`, if any.
    pub fn template_path(&self, format: Format) -> Option<&str> {
        match format {
            Format::Isolated => self.isolated.as_deref(),
            Format::Embedded => self.embedded.as_deref(),
            Format::Edit => self.edit.as_deref(),
        }
    }

    /// Read a file's content out of the card's file tree.
    pub fn file(&self, path: &str) -> Option<&str> {
        lookup_file(&self.files, path)
    }
}

/// One compiled presentation component: where its module lives in the
/// cache, which fields the template uses, and the original template when
/// it was simple enough to inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub module: String,
    pub used_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_template: Option<String>,
}

/// The runtime artifact produced by compiling a raw card. Built bottom-up:
/// a card's compiled form is never computed before its parent's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledCard {
    pub url: String,
    /// Module id of the true schema owner's schema (first ancestor, walking
    /// toward the root, that declares one).
    pub schema_module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adopts_from: Option<Box<CompiledCard>>,
    /// Own + inherited fields; own entries shadow same-named parent entries.
    pub fields: FieldsMeta,
    pub component_infos: FxHashMap<Format, ComponentInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl CompiledCard {
    /// Walk the adoption chain from this card toward the root.
    pub fn chain(&self) -> impl Iterator<Item = &CompiledCard> {
        std::iter::successors(Some(self), |card| card.adopts_from.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(entries: &[(&str, &str)]) -> FileTree {
        let mut tree = FileTree::default();
        for (path, content) in entries {
            insert(&mut tree, path, content);
        }
        tree
    }

    fn insert(tree: &mut FileTree, path: &str, content: &str) {
        let mut parts: Vec<&str> = path.split('/').collect();
        let leaf = parts.pop().unwrap();
        let mut current = tree;
        for part in parts {
            let node = current
                .entry(part.to_string())
                .or_insert_with(|| FileNode::Dir(FxHashMap::default()));
            match node {
                FileNode::Dir(children) => current = children,
                FileNode::File(_) => panic!("file/dir conflict in test tree"),
            }
        }
        current.insert(leaf.to_string(), FileNode::File(content.to_string()));
    }

    #[test]
    fn test_lookup_nested_file() {
        let tree = tree_with(&[("schema.js", "export default class {}"), ("lib/util.js", "x")]);
        assert_eq!(lookup_file(&tree, "schema.js"), Some("export default class {}"));
        assert_eq!(lookup_file(&tree, "lib/util.js"), Some("x"));
        assert_eq!(lookup_file(&tree, "lib"), None);
        assert_eq!(lookup_file(&tree, "missing.js"), None);
    }

    #[test]
    fn test_tree_to_json_sorted_and_nested() {
        let tree = tree_with(&[("b.txt", "B"), ("a/inner.txt", "I")]);
        let json = tree_to_json(&tree);
        let keys: Vec<_> = json.keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b.txt"]);
        assert_eq!(json["a"]["inner.txt"], "I");
    }

    #[test]
    fn test_chain_walks_to_root() {
        let root = CompiledCard {
            url: "https://cards.example.com/base".into(),
            schema_module: "m".into(),
            adopts_from: None,
            fields: FieldsMeta::default(),
            component_infos: FxHashMap::default(),
            data: None,
        };
        let child = CompiledCard {
            url: "https://cards.example.com/person".into(),
            schema_module: "m".into(),
            adopts_from: Some(Box::new(root)),
            fields: FieldsMeta::default(),
            component_infos: FxHashMap::default(),
            data: None,
        };
        let urls: Vec<_> = child.chain().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec![
            "https://cards.example.com/person",
            "https://cards.example.com/base"
        ]);
    }
}
