//! Compiled-card builder.
//!
//! `Compiler::compile` resolves a card's full adoption chain parent-first,
//! runs the schema extractor and template rewriter, merges inherited field
//! and format metadata, and writes every artifact through the dual
//! environment cache. Compiling the same URL twice concurrently is the
//! caller's problem; per-URL serialization happens above this layer.

mod cache;
mod module;

pub use cache::{CACHE_DIR, CardCache, Environment};
pub use module::transform_to_cjs;

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use url::Url;

use crate::card::{
    CompiledCard, ComponentInfo, FieldMeta, FileNode, FileTree, Format, RawCard,
};
use crate::debug;
use crate::error::{CardError, Result};
use crate::realm::{Realm, RealmManager};
use crate::schema::{self, SchemaAnalysis};
use crate::template::rewrite_module;

/// File extensions compiled as modules into both environments. Anything
/// else becomes a content-addressed asset.
const MODULE_EXTENSIONS: [&str; 4] = ["js", "mjs", "cjs", "ts"];

/// Per-field resolution computed before template rewriting: the module id
/// of the field card's embedded component and that component's already
/// flattened field usage.
struct FieldComponent {
    module: String,
    nested_used: Vec<String>,
}

pub struct Compiler<'a> {
    realms: &'a RealmManager,
    cache: &'a mut CardCache,
}

impl<'a> Compiler<'a> {
    pub fn new(realms: &'a RealmManager, cache: &'a mut CardCache) -> Self {
        Self { realms, cache }
    }

    /// Compile a card and its whole adoption chain, writing artifacts
    /// through the cache. Already-compiled cards are returned as-is.
    pub fn compile(&mut self, card_url: &str) -> Result<CompiledCard> {
        let mut stack = Vec::new();
        self.compile_inner(card_url, &mut stack)
    }

    fn compile_inner(&mut self, card_url: &str, stack: &mut Vec<String>) -> Result<CompiledCard> {
        if stack.iter().any(|url| url == card_url) {
            return Err(CardError::internal(format!(
                "adoption cycle detected: {} -> {card_url}",
                stack.join(" -> ")
            )));
        }
        if let Some(card) = self.cache.compiled(card_url)? {
            return Ok(card.clone());
        }

        stack.push(card_url.to_string());
        let result = self.build(card_url, stack);
        stack.pop();
        result
    }

    fn build(&mut self, card_url: &str, stack: &mut Vec<String>) -> Result<CompiledCard> {
        debug!("compile"; "compiling {card_url}");
        let raw = self.realms.get_raw_card(card_url)?;

        let (analysis, own_schema) = match &raw.schema {
            Some(path) => {
                let source = raw.file(path).ok_or_else(|| {
                    CardError::missing(format!("schema module `{path}` not found in `{card_url}`"))
                })?;
                let analysis = schema::extract(source, path)?;
                let module = self.write_module(&raw.url, path, source)?;
                (analysis, Some(module))
            }
            None => (SchemaAnalysis::default(), None),
        };

        // Parents are always fully resolved before children.
        let parent = match parent_url(&raw, &analysis)? {
            Some(url) => Some(self.compile_inner(&url, stack)?),
            None => None,
        };

        // Own entries shadow same-named parent entries.
        let mut fields = parent
            .as_ref()
            .map(|card| card.fields.clone())
            .unwrap_or_default();
        fields.extend(analysis.fields);

        // The true schema owner is the first ancestor declaring one.
        let schema_module = match own_schema {
            Some(module) => module,
            None => match &parent {
                Some(card) => card.schema_module.clone(),
                None => {
                    return Err(CardError::internal(format!(
                        "adoption chain of `{card_url}` declares no schema"
                    )));
                }
            },
        };

        let field_components = self.resolve_field_components(&fields, stack)?;
        let resolver = |meta: &FieldMeta| -> String {
            field_components
                .get(&meta.card_url)
                .map(|component| component.module.clone())
                .unwrap_or_else(|| CardCache::module_id(&meta.card_url, "embedded.js"))
        };

        let mut component_infos = FxHashMap::default();
        for format in Format::ALL {
            let Some(path) = raw.template_path(format) else {
                if let Some(inherited) = parent
                    .as_ref()
                    .and_then(|card| card.component_infos.get(&format))
                {
                    component_infos.insert(format, inherited.clone());
                }
                continue;
            };

            let source = raw.file(path).ok_or_else(|| {
                CardError::missing(format!(
                    "{format} template `{path}` not found in `{card_url}`"
                ))
            })?;
            let rewrite = rewrite_module(source, path, &fields, &resolver)?;
            let module = self.write_module(&raw.url, path, &rewrite.source)?;

            let mut used_fields = Vec::new();
            for name in &rewrite.used_fields {
                let nested = fields
                    .get(name)
                    .and_then(|meta| field_components.get(&meta.card_url))
                    .map(|component| component.nested_used.as_slice())
                    .unwrap_or_default();
                if nested.is_empty() {
                    used_fields.push(name.clone());
                } else {
                    for nested_name in nested {
                        used_fields.push(format!("{name}.{nested_name}"));
                    }
                }
            }

            component_infos.insert(format, ComponentInfo {
                module,
                used_fields,
                inline_template: rewrite.inline_template,
            });
        }

        self.write_remaining_files(&raw)?;

        let card = CompiledCard {
            url: raw.url.clone(),
            schema_module,
            adopts_from: parent.map(Box::new),
            fields,
            component_infos,
            data: raw.data.clone(),
        };
        self.cache.set_compiled(card.clone())?;
        Ok(card)
    }

    /// Compile every field's card so templates can point at its embedded
    /// component. A field card already on the compile stack is treated as a
    /// leaf; its module id is still derivable without recursing.
    fn resolve_field_components(
        &mut self,
        fields: &FxHashMap<String, FieldMeta>,
        stack: &mut Vec<String>,
    ) -> Result<FxHashMap<String, FieldComponent>> {
        let mut components = FxHashMap::default();

        for meta in fields.values() {
            if components.contains_key(&meta.card_url) {
                continue;
            }
            let component = if stack.iter().any(|url| url == &meta.card_url) {
                let path = self
                    .realms
                    .get_raw_card(&meta.card_url)?
                    .template_path(Format::Embedded)
                    .unwrap_or("embedded.js")
                    .to_string();
                FieldComponent {
                    module: CardCache::module_id(&meta.card_url, &path),
                    nested_used: Vec::new(),
                }
            } else {
                let compiled = self.compile_inner(&meta.card_url, stack)?;
                match compiled.component_infos.get(&Format::Embedded) {
                    Some(info) => FieldComponent {
                        module: info.module.clone(),
                        nested_used: info.used_fields.clone(),
                    },
                    None => FieldComponent {
                        module: CardCache::module_id(&meta.card_url, "embedded.js"),
                        nested_used: Vec::new(),
                    },
                }
            };
            components.insert(meta.card_url.clone(), component);
        }

        Ok(components)
    }

    /// Write one module into both environment trees. Returns the module id.
    fn write_module(&mut self, card_url: &str, rel_path: &str, source: &str) -> Result<String> {
        let cjs = transform_to_cjs(source, rel_path)?;
        self.cache
            .set_module(Environment::Browser, card_url, rel_path, source)?;
        self.cache
            .set_module(Environment::Node, card_url, rel_path, &cjs)
    }

    /// Files not claimed as schema or templates: modules get both
    /// environment copies, everything else becomes an asset.
    fn write_remaining_files(&mut self, raw: &RawCard) -> Result<()> {
        let mut claimed: Vec<&str> = raw.schema.as_deref().into_iter().collect();
        for format in Format::ALL {
            if let Some(path) = raw.template_path(format) {
                claimed.push(path);
            }
        }

        let mut paths = Vec::new();
        collect_files(&raw.files, String::new(), &mut paths);
        for (path, content) in paths {
            if claimed.contains(&path.as_str()) {
                continue;
            }
            let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
            if MODULE_EXTENSIONS.contains(&ext) {
                self.write_module(&raw.url, &path, content)?;
            } else {
                let asset = self.cache.set_asset(&raw.url, &path, content.as_bytes(), ext)?;
                debug!("compile"; "stored `{path}` as {asset}");
            }
        }
        Ok(())
    }

    /// Merge attributes into the card's persisted data and its cached
    /// compiled form without recompiling.
    pub fn update_card_data(&mut self, card_url: &str, attrs: Map<String, Value>) -> Result<()> {
        let compiled = self
            .cache
            .compiled(card_url)?
            .ok_or_else(|| CardError::missing(format!("`{card_url}` has not been compiled")))?;

        let mut data = compiled.data.clone().unwrap_or_default();
        data.extend(attrs);

        self.realms
            .realm_for(card_url)?
            .update_card_data(card_url, data.clone())?;
        self.cache.update_data(card_url, data)
    }

    /// Remove cache and realm state for one card. Not atomic across the two
    /// stores; a crash between them can leave one side stale.
    pub fn delete_card(&mut self, card_url: &str) -> Result<()> {
        self.cache.delete(card_url)?;
        self.realms.realm_for(card_url)?.delete_card(card_url)
    }
}

/// The card's parent URL, resolved against the card itself. An explicit
/// `adoptsFrom` in card.json wins over the schema's `adopts` annotation.
fn parent_url(raw: &RawCard, analysis: &SchemaAnalysis) -> Result<Option<String>> {
    let spec = raw
        .adopts_from
        .as_deref()
        .or(analysis.parent.as_ref().map(|parent| parent.card_url.as_str()));
    spec.map(|spec| resolve_card_url(&raw.url, spec)).transpose()
}

/// Resolve a possibly relative card reference against a card URL.
pub fn resolve_card_url(base: &str, spec: &str) -> Result<String> {
    if let Ok(url) = Url::parse(spec) {
        return Ok(url.to_string().trim_end_matches('/').to_string());
    }
    let base = Url::parse(base)
        .map_err(|e| CardError::missing(format!("invalid card URL `{base}`: {e}")))?;
    let joined = base
        .join(spec)
        .map_err(|e| CardError::missing(format!("cannot resolve `{spec}` against `{base}`: {e}")))?;
    Ok(joined.to_string().trim_end_matches('/').to_string())
}

fn collect_files<'t>(tree: &'t FileTree, prefix: String, out: &mut Vec<(String, &'t str)>) {
    for (name, node) in tree {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        match node {
            FileNode::File(content) => out.push((path, content.as_str())),
            FileNode::Dir(children) => collect_files(children, path, out),
        }
    }
}
