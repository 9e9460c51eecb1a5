//! On-disk card document shapes: `card.json` and `package.json`.
//!
//! `card.json` is a single-resource document. Its `attributes` may carry
//! `csFiles`, a nested map mirroring every non-reserved file physically in
//! the card directory - the compiler treats `csFiles` as derived and always
//! regenerates it from the real file tree rather than trusting a stale
//! value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Files that never appear inside `csFiles`.
pub const RESERVED_FILES: [&str; 2] = ["card.json", "package.json"];

/// The `card.json` document: a single resource under `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardDocument {
    pub data: CardResource,
}

/// The resource half of `card.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardResource {
    #[serde(rename = "type", default = "default_type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

fn default_type() -> String {
    "cards".to_string()
}

impl CardDocument {
    pub fn new() -> Self {
        Self {
            data: CardResource {
                kind: default_type(),
                attributes: Map::new(),
            },
        }
    }

    fn str_attr(&self, name: &str) -> Option<&str> {
        self.data.attributes.get(name).and_then(Value::as_str)
    }

    /// The store's stable id for this card, required for indexing.
    pub fn cs_id(&self) -> Option<&str> {
        self.str_attr("csId")
    }

    /// Realm the card originally came from; falls back to the current
    /// realm's URL when absent.
    pub fn cs_original_realm(&self) -> Option<&str> {
        self.str_attr("csOriginalRealm")
    }

    pub fn adopts_from(&self) -> Option<&str> {
        self.str_attr("adoptsFrom")
    }

    pub fn schema(&self) -> Option<&str> {
        self.str_attr("schema")
    }

    pub fn format_path(&self, format: super::Format) -> Option<&str> {
        self.str_attr(format.as_str())
    }

    pub fn card_data(&self) -> Option<&Map<String, Value>> {
        self.data.attributes.get("data").and_then(Value::as_object)
    }

    pub fn set_attr(&mut self, name: &str, value: Value) {
        self.data.attributes.insert(name.to_string(), value);
    }
}

impl Default for CardDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// The subset of `package.json` the indexer consumes. `peerDependencies`
/// is copied into the upstream document verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageJson {
    #[serde(default, rename = "peerDependencies")]
    pub peer_dependencies: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_document_accessors() {
        let doc: CardDocument = serde_json::from_str(
            r#"{
                "data": {
                    "type": "cards",
                    "attributes": {
                        "csId": "first-card",
                        "adoptsFrom": "https://cards.example.com/base",
                        "schema": "schema.js",
                        "isolated": "isolated.js"
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(doc.cs_id(), Some("first-card"));
        assert_eq!(doc.cs_original_realm(), None);
        assert_eq!(doc.adopts_from(), Some("https://cards.example.com/base"));
        assert_eq!(doc.schema(), Some("schema.js"));
        assert_eq!(doc.format_path(crate::card::Format::Isolated), Some("isolated.js"));
        assert_eq!(doc.format_path(crate::card::Format::Edit), None);
    }

    #[test]
    fn test_missing_attributes_default_empty() {
        let doc: CardDocument = serde_json::from_str(r#"{"data": {"type": "cards"}}"#).unwrap();
        assert!(doc.data.attributes.is_empty());
    }

    #[test]
    fn test_package_json_peer_dependencies() {
        let pkg: PackageJson =
            serde_json::from_str(r#"{"name": "x", "peerDependencies": {"left-pad": "^1.0.0"}}"#)
                .unwrap();
        assert_eq!(pkg.peer_dependencies["left-pad"], "^1.0.0");
    }
}
