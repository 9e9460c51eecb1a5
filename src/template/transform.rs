//! Field-aware template transform.
//!
//! Scans a template for `@fields` references and replaces each one with a
//! resolved sub-component binding obtained from the import allocator. The
//! component resolver decides which module a field's sub-component is
//! imported from; it is a callback so the compiler can point references at
//! already-compiled field cards.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::card::{FieldMeta, FieldsMeta};
use crate::error::{CardError, Result};

use super::allocator::ImportAllocator;

/// Resolves a field to the module specifier of its sub-component.
pub type ComponentResolver<'r> = &'r dyn Fn(&FieldMeta) -> String;

/// Element form `<@fields.name />` or mustache form `{{@fields.name}}`.
/// ASCII classes only; the regex build omits the Unicode tables.
static FIELD_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"<@fields\.([A-Za-z_][0-9A-Za-z_-]*)[ \t]*/>|\{\{@fields\.([A-Za-z_][0-9A-Za-z_-]*)\}\}",
    )
    .expect("field reference pattern")
});

/// Result of rewriting one template string.
#[derive(Debug)]
pub struct TransformResult {
    pub template: String,
    /// Directly referenced field names, in order of first reference.
    pub used_fields: Vec<String>,
}

/// Rewrite every field reference in `template`.
///
/// `base_offset` is the byte offset of the template string inside its
/// module source, used to locate errors in the enclosing module.
pub fn rewrite_template(
    template: &str,
    base_offset: u32,
    module_source: &str,
    fields: &FieldsMeta,
    resolver: ComponentResolver<'_>,
    allocator: &mut ImportAllocator,
) -> Result<TransformResult> {
    let mut used_fields: Vec<String> = Vec::new();
    let mut failure: Option<CardError> = None;

    let rewritten = FIELD_REF.replace_all(template, |caps: &Captures<'_>| {
        let (name, element_form) = match (caps.get(1), caps.get(2)) {
            (Some(m), _) => (m, true),
            (_, Some(m)) => (m, false),
            _ => unreachable!("pattern has two alternates"),
        };

        let Some(meta) = fields.get(name.as_str()) else {
            if failure.is_none() {
                failure = Some(CardError::usage(
                    format!("template references unknown field `{}`", name.as_str()),
                    module_source,
                    base_offset + name.start() as u32,
                ));
            }
            return String::new();
        };

        if !used_fields.iter().any(|f| f == name.as_str()) {
            used_fields.push(name.as_str().to_string());
        }

        let binding = allocator.allocate(name.as_str(), &resolver(meta));
        if element_form {
            format!("<{binding} />")
        } else {
            format!("{{{{{binding}}}}}")
        }
    });

    if let Some(err) = failure {
        return Err(err);
    }

    Ok(TransformResult {
        template: rewritten.into_owned(),
        used_fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::FieldKind;
    use rustc_hash::FxHashSet;

    fn fields(names: &[&str]) -> FieldsMeta {
        names
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    FieldMeta {
                        card_url: format!("https://cards.example.com/base/{name}"),
                        kind: FieldKind::Contains,
                        local_name: name.to_string(),
                    },
                )
            })
            .collect()
    }

    fn resolve(meta: &FieldMeta) -> String {
        format!("{}/embedded.js", meta.card_url)
    }

    #[test]
    fn test_rewrites_both_reference_forms() {
        let mut alloc = ImportAllocator::new(FxHashSet::default());
        let result = rewrite_template(
            "<h1><@fields.title /></h1> {{@fields.author}}",
            0,
            "",
            &fields(&["title", "author"]),
            &resolve,
            &mut alloc,
        )
        .unwrap();

        assert_eq!(result.template, "<h1><titleField /></h1> {{authorField}}");
        assert_eq!(result.used_fields, vec!["title", "author"]);
        assert_eq!(alloc.imports().len(), 2);
        assert_eq!(
            alloc.imports()[0].specifier,
            "https://cards.example.com/base/title/embedded.js"
        );
    }

    #[test]
    fn test_repeated_reference_counts_once() {
        let mut alloc = ImportAllocator::new(FxHashSet::default());
        let result = rewrite_template(
            "<@fields.title /> and again <@fields.title/>",
            0,
            "",
            &fields(&["title"]),
            &resolve,
            &mut alloc,
        )
        .unwrap();

        assert_eq!(result.used_fields, vec!["title"]);
        assert_eq!(alloc.imports().len(), 1);
        assert!(result.template.contains("<titleField /> and again <titleField />"));
    }

    #[test]
    fn test_dashed_name_and_padded_element_close() {
        let mut alloc = ImportAllocator::new(FxHashSet::default());
        let result = rewrite_template(
            "<@fields.start-date  /> {{@fields.start-date}}",
            0,
            "",
            &fields(&["start-date"]),
            &resolve,
            &mut alloc,
        )
        .unwrap();

        assert_eq!(result.template, "<start_dateField /> {{start_dateField}}");
        assert_eq!(result.used_fields, vec!["start-date"]);
        assert_eq!(alloc.imports().len(), 1);
    }

    #[test]
    fn test_unknown_field_is_a_usage_error() {
        let mut alloc = ImportAllocator::new(FxHashSet::default());
        let err = rewrite_template(
            "{{@fields.nope}}",
            0,
            "{{@fields.nope}}",
            &fields(&["title"]),
            &resolve,
            &mut alloc,
        )
        .unwrap_err();
        assert!(format!("{err}").contains("unknown field `nope`"));
    }

    #[test]
    fn test_template_without_references_untouched() {
        let mut alloc = ImportAllocator::new(FxHashSet::default());
        let result =
            rewrite_template("<h1>Hello</h1>", 0, "", &fields(&[]), &resolve, &mut alloc).unwrap();
        assert_eq!(result.template, "<h1>Hello</h1>");
        assert!(result.used_fields.is_empty());
        assert!(alloc.is_empty());
    }
}
