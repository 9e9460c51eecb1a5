//! `cardbox compile` — compile one card into the cache.

use anyhow::{Context, Result};

use crate::compiler::{CardCache, Compiler};
use crate::config::BoxConfig;
use crate::log;

pub fn run_compile(url: &str, config: &BoxConfig) -> Result<()> {
    let realms = config.realm_manager();
    let mut cache = CardCache::new(config.cache_dir());

    let card = Compiler::new(&realms, &mut cache)
        .compile(url)
        .with_context(|| format!("failed to compile `{url}`"))?;

    log!("compile"; "{}", card.url);
    log!("compile"; "schema: {}", card.schema_module);
    if let Some(parent) = &card.adopts_from {
        log!("compile"; "adopts from: {}", parent.url);
    }

    let mut names: Vec<&String> = card.fields.keys().collect();
    names.sort();
    for name in names {
        let field = &card.fields[name];
        log!("compile"; "field {name}: {} ({})", field.card_url, field.kind.annotation());
    }

    for (format, info) in &card.component_infos {
        let inlined = if info.inline_template.is_some() {
            " (inlined)"
        } else {
            ""
        };
        log!("compile"; "{format}: {}{inlined} uses [{}]", info.module, info.used_fields.join(", "));
    }

    Ok(())
}
