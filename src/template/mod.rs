//! Template module rewriting.
//!
//! A card's presentation template lives in a module shaped like:
//!
//! ```js
//! import { compileTemplate } from "@cardbox/template";
//! export default compileTemplate("<h1><@fields.title /></h1>", {
//!   strict: true,
//!   scope: {},
//! });
//! ```
//!
//! The rewriter operates only inside the default-exported
//! template-compilation call, and only when its options ask for strict
//! resolution; an unstrict call passes through untouched. Field references
//! are rewritten to allocated sub-component bindings, new imports are
//! appended as top-level import declarations, and the call's `scope` object
//! is augmented with the generated bindings (never overwriting entries that
//! were already there).
//!
//! Inlining: the original template - unmodified - may be inlined into the
//! compiled card's metadata only when the call declared no extra scope
//! entries and the rewrite required zero new imports. Otherwise the fully
//! resolved, scope-augmented module is the only valid form.

mod allocator;
mod transform;

pub use allocator::{ImportAllocator, NewImport};
pub use transform::{ComponentResolver, rewrite_template};

use oxc::allocator::Allocator;
use oxc::ast::ast::{
    BindingPattern, CallExpression, Declaration, Expression, ImportDeclarationSpecifier,
    ObjectExpression, ObjectPropertyKind, Program, PropertyKey, Statement,
};
use oxc::ast_visit::{Visit, walk};
use oxc::parser::Parser;
use oxc::span::{SourceType, Span};
use rustc_hash::FxHashSet;

use crate::card::{FieldsMeta, TEMPLATE_CALL, TEMPLATE_MODULE};
use crate::error::{CardError, Result};

/// Result of rewriting one template module.
#[derive(Debug)]
pub struct ModuleRewrite {
    /// Full module source after rewriting (identical to the input for
    /// unstrict calls).
    pub source: String,
    /// Fields the template references directly, in order of first use.
    pub used_fields: Vec<String>,
    /// The original template, present only when inlining is permitted.
    pub inline_template: Option<String>,
}

/// Rewrite a template module against the card's resolved fields.
pub fn rewrite_module(
    source: &str,
    module_path: &str,
    fields: &FieldsMeta,
    resolver: ComponentResolver<'_>,
) -> Result<ModuleRewrite> {
    let oxc_allocator = Allocator::default();
    let parsed = Parser::new(&oxc_allocator, source, SourceType::mjs()).parse();
    if let Some(err) = parsed.errors.first() {
        return Err(CardError::Parse {
            path: module_path.to_string(),
            detail: err.to_string(),
        });
    }
    let program = parsed.program;

    let Some(call_binding) = compile_call_binding(&program) else {
        return Err(CardError::usage(
            format!("template module must import `{TEMPLATE_CALL}` from \"{TEMPLATE_MODULE}\""),
            source,
            0,
        ));
    };

    let Some(export_span) = default_export_span(&program) else {
        return Err(CardError::usage(
            format!("template module must default-export a `{call_binding}(...)` call"),
            source,
            0,
        ));
    };

    let mut finder = FindCall {
        name: &call_binding,
        export_span,
        source,
        facts: None,
    };
    finder.visit_program(&program);
    let facts = match finder.facts {
        Some(result) => result?,
        None => {
            return Err(CardError::usage(
                format!("default export must wrap a `{call_binding}(...)` call"),
                source,
                export_span.start,
            ));
        }
    };

    // An unstrict call is not this component's concern.
    if !facts.strict {
        return Ok(ModuleRewrite {
            source: source.to_string(),
            used_fields: Vec::new(),
            inline_template: None,
        });
    }

    // Keys already present in the scope object are off-limits too; a
    // generated shorthand must never replace an entry the author wrote.
    let mut taken = existing_bindings(&program);
    if let Some(scope) = &facts.scope {
        taken.extend(scope.keys.iter().cloned());
    }
    let mut import_allocator = ImportAllocator::new(taken);
    let transformed = rewrite_template(
        &facts.template,
        // +1 skips the opening quote of the string literal
        facts.template_span.start + 1,
        source,
        fields,
        resolver,
        &mut import_allocator,
    )?;

    let scope_entries = facts.scope.as_ref().map_or(0, |scope| scope.entries);
    let inline_template = (scope_entries == 0 && import_allocator.is_empty())
        .then(|| facts.template.clone());

    let mut edits: Vec<(u32, u32, String)> = Vec::new();
    edits.push((
        facts.template_span.start,
        facts.template_span.end,
        encode_js_string(&transformed.template),
    ));

    if !import_allocator.is_empty() {
        edits.push(scope_edit(&facts, import_allocator.imports()));
        edits.push(imports_edit(&program, import_allocator.imports()));
    }

    Ok(ModuleRewrite {
        source: apply_edits(source, edits),
        used_fields: transformed.used_fields,
        inline_template,
    })
}

// ============================================================================
// Call discovery
// ============================================================================

/// What we need to know about the template-compilation call, owned so no
/// AST lifetimes escape the parse.
#[derive(Debug)]
struct CallFacts {
    template: String,
    template_span: Span,
    options_span: Span,
    options_has_props: bool,
    strict: bool,
    scope: Option<ScopeFacts>,
}

#[derive(Debug)]
struct ScopeFacts {
    span: Span,
    entries: usize,
    keys: Vec<String>,
}

/// Local binding name of the template-compilation call import.
fn compile_call_binding(program: &Program<'_>) -> Option<String> {
    for statement in &program.body {
        let Statement::ImportDeclaration(import) = statement else {
            continue;
        };
        if import.source.value.as_str() != TEMPLATE_MODULE {
            continue;
        }
        for specifier in import.specifiers.iter().flatten() {
            if let ImportDeclarationSpecifier::ImportSpecifier(named) = specifier
                && named.imported.name().as_str() == TEMPLATE_CALL
            {
                return Some(named.local.name.to_string());
            }
        }
    }
    None
}

fn default_export_span(program: &Program<'_>) -> Option<Span> {
    program.body.iter().find_map(|statement| match statement {
        Statement::ExportDefaultDeclaration(export) => Some(export.span),
        _ => None,
    })
}

/// Every name already bound at the module's top level.
fn existing_bindings(program: &Program<'_>) -> FxHashSet<String> {
    let mut names = FxHashSet::default();

    for statement in &program.body {
        match statement {
            Statement::ImportDeclaration(import) => {
                for specifier in import.specifiers.iter().flatten() {
                    let local = match specifier {
                        ImportDeclarationSpecifier::ImportSpecifier(s) => &s.local,
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => &s.local,
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => &s.local,
                    };
                    names.insert(local.name.to_string());
                }
            }
            Statement::VariableDeclaration(decl) => collect_variable_names(decl, &mut names),
            Statement::FunctionDeclaration(function) => {
                if let Some(id) = &function.id {
                    names.insert(id.name.to_string());
                }
            }
            Statement::ClassDeclaration(class) => {
                if let Some(id) = &class.id {
                    names.insert(id.name.to_string());
                }
            }
            Statement::ExportNamedDeclaration(export) => match &export.declaration {
                Some(Declaration::VariableDeclaration(decl)) => {
                    collect_variable_names(decl, &mut names);
                }
                Some(Declaration::FunctionDeclaration(function)) => {
                    if let Some(id) = &function.id {
                        names.insert(id.name.to_string());
                    }
                }
                Some(Declaration::ClassDeclaration(class)) => {
                    if let Some(id) = &class.id {
                        names.insert(id.name.to_string());
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    names
}

fn collect_variable_names(
    decl: &oxc::ast::ast::VariableDeclaration<'_>,
    names: &mut FxHashSet<String>,
) {
    for declarator in &decl.declarations {
        if let BindingPattern::BindingIdentifier(ident) = &declarator.id {
            names.insert(ident.name.to_string());
        }
    }
}

/// Finds the first template-compilation call inside the default export.
struct FindCall<'x> {
    name: &'x str,
    export_span: Span,
    source: &'x str,
    facts: Option<Result<CallFacts>>,
}

impl<'a, 'x> Visit<'a> for FindCall<'x> {
    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if self.facts.is_none()
            && call.span.start >= self.export_span.start
            && call.span.end <= self.export_span.end
            && let Expression::Identifier(callee) = &call.callee
            && callee.name.as_str() == self.name
        {
            self.facts = Some(examine_call(call, self.source));
            return;
        }
        walk::walk_call_expression(self, call);
    }
}

/// Validate the call's shape: exactly a string-literal template and an
/// options object.
fn examine_call(call: &CallExpression<'_>, source: &str) -> Result<CallFacts> {
    if call.arguments.len() != 2 {
        return Err(CardError::usage(
            format!(
                "`{TEMPLATE_CALL}` requires exactly two arguments (template, options), got {}",
                call.arguments.len()
            ),
            source,
            call.span.start,
        ));
    }

    let Some(Expression::StringLiteral(template)) = call.arguments[0].as_expression() else {
        return Err(CardError::usage(
            format!("`{TEMPLATE_CALL}` template argument must be a string literal"),
            source,
            call.span.start,
        ));
    };

    let Some(Expression::ObjectExpression(options)) = call.arguments[1].as_expression() else {
        return Err(CardError::usage(
            format!("`{TEMPLATE_CALL}` options argument must be an object literal"),
            source,
            call.span.start,
        ));
    };

    let mut strict = false;
    let mut scope = None;
    for property in &options.properties {
        let ObjectPropertyKind::ObjectProperty(property) = property else {
            continue;
        };
        match static_key(&property.key).as_deref() {
            Some("strict") => {
                if let Expression::BooleanLiteral(flag) = &property.value {
                    strict = flag.value;
                }
            }
            Some("scope") => {
                if let Expression::ObjectExpression(object) = &property.value {
                    scope = Some(scope_facts(object));
                }
            }
            _ => {}
        }
    }

    Ok(CallFacts {
        template: template.value.to_string(),
        template_span: template.span,
        options_span: options.span,
        options_has_props: !options.properties.is_empty(),
        strict,
        scope,
    })
}

fn scope_facts(object: &ObjectExpression<'_>) -> ScopeFacts {
    let keys = object
        .properties
        .iter()
        .filter_map(|property| match property {
            ObjectPropertyKind::ObjectProperty(property) => static_key(&property.key),
            ObjectPropertyKind::SpreadProperty(_) => None,
        })
        .collect();
    ScopeFacts {
        span: object.span,
        entries: object.properties.len(),
        keys,
    }
}

fn static_key(key: &PropertyKey<'_>) -> Option<String> {
    match key {
        PropertyKey::StaticIdentifier(ident) => Some(ident.name.to_string()),
        PropertyKey::StringLiteral(literal) => Some(literal.value.to_string()),
        _ => None,
    }
}

// ============================================================================
// Source splicing
// ============================================================================

/// Fold the generated bindings into the call's `scope` object, creating
/// one when the options had none. Pre-existing entries stay ahead of the
/// insertions and are never overwritten.
fn scope_edit(facts: &CallFacts, imports: &[NewImport]) -> (u32, u32, String) {
    let bindings: Vec<&str> = imports.iter().map(|import| import.binding.as_str()).collect();
    let joined = bindings.join(", ");

    match &facts.scope {
        Some(scope) => {
            let text = if scope.entries > 0 {
                format!(", {joined} ")
            } else {
                format!(" {joined} ")
            };
            (scope.span.end - 1, scope.span.end - 1, text)
        }
        None => {
            let text = if facts.options_has_props {
                format!(", scope: {{ {joined} }}")
            } else {
                format!("scope: {{ {joined} }}")
            };
            (facts.options_span.end - 1, facts.options_span.end - 1, text)
        }
    }
}

/// Append the generated import declarations after the module's last import.
fn imports_edit(program: &Program<'_>, imports: &[NewImport]) -> (u32, u32, String) {
    let insert_at = program
        .body
        .iter()
        .filter_map(|statement| match statement {
            Statement::ImportDeclaration(import) => Some(import.span.end),
            _ => None,
        })
        .max()
        .unwrap_or(0);

    let mut text = String::new();
    for import in imports {
        text.push('\n');
        text.push_str(&format!(
            "import {} from {};",
            import.binding,
            encode_js_string(&import.specifier)
        ));
    }
    if insert_at == 0 {
        text.push('\n');
    }
    (insert_at, insert_at, text)
}

/// JSON string encoding doubles as JS string-literal encoding.
fn encode_js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""))
}

fn apply_edits(source: &str, mut edits: Vec<(u32, u32, String)>) -> String {
    edits.sort_by_key(|(start, _, _)| std::cmp::Reverse(*start));
    let mut out = source.to_string();
    for (start, end, text) in edits {
        out.replace_range(start as usize..end as usize, &text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{FieldKind, FieldMeta};

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

    const PLAIN: &str = r#"import { compileTemplate } from "@cardbox/template";
export default compileTemplate("<h1>Hello world</h1>", { strict: true });
"#;

    #[test]
    fn test_plain_template_is_inlined() {
        let rewrite = rewrite_module(PLAIN, "isolated.js", &fields(&[]), &resolve).unwrap();
        assert_eq!(rewrite.inline_template.as_deref(), Some("<h1>Hello world</h1>"));
        assert!(rewrite.used_fields.is_empty());
    }

    #[test]
    fn test_one_field_reference_disables_inlining() {
        let source = r#"import { compileTemplate } from "@cardbox/template";
export default compileTemplate("<h1><@fields.title /></h1>", { strict: true });
"#;
        let rewrite = rewrite_module(source, "isolated.js", &fields(&["title"]), &resolve).unwrap();

        assert!(rewrite.inline_template.is_none());
        assert_eq!(rewrite.used_fields, vec!["title"]);
        assert!(rewrite.source.contains("<titleField />"));
        assert!(rewrite.source.contains(
            r#"import titleField from "https://cards.example.com/base/title/embedded.js";"#
        ));
        assert!(rewrite.source.contains("scope: { titleField }"));
    }

    #[test]
    fn test_existing_scope_entries_disable_inlining_and_are_kept() {
        let source = r#"import { compileTemplate } from "@cardbox/template";
import helper from "./helper.js";
export default compileTemplate("{{helper}} <@fields.title />", {
  strict: true,
  scope: { helper },
});
"#;
        let rewrite = rewrite_module(source, "isolated.js", &fields(&["title"]), &resolve).unwrap();

        assert!(rewrite.inline_template.is_none());
        assert!(rewrite.source.contains("scope: { helper , titleField }"));
    }

    #[test]
    fn test_allocator_avoids_existing_scope_keys() {
        let source = r#"import { compileTemplate } from "@cardbox/template";
import helper from "./helper.js";
export default compileTemplate("<@fields.title />", {
  strict: true,
  scope: { titleField: helper },
});
"#;
        let rewrite = rewrite_module(source, "isolated.js", &fields(&["title"]), &resolve).unwrap();

        // "titleField" is claimed by the author's scope entry; the generated
        // binding must not shadow it.
        assert!(rewrite.source.contains("<title0 />"));
        assert!(rewrite.source.contains("scope: { titleField: helper , title0 }"));
        assert!(rewrite
            .source
            .contains(r#"import title0 from "https://cards.example.com/base/title/embedded.js";"#));
    }

    #[test]
    fn test_scope_only_disables_inlining_without_imports() {
        let source = r#"import { compileTemplate } from "@cardbox/template";
import helper from "./helper.js";
export default compileTemplate("{{helper}}", { strict: true, scope: { helper } });
"#;
        let rewrite = rewrite_module(source, "isolated.js", &fields(&[]), &resolve).unwrap();
        assert!(rewrite.inline_template.is_none());
        // No new imports were needed, so the module body is untouched apart
        // from the (identical) template literal.
        assert!(rewrite.source.contains("scope: { helper }"));
    }

    #[test]
    fn test_unstrict_call_left_untouched() {
        let source = r#"import { compileTemplate } from "@cardbox/template";
export default compileTemplate("<@fields.title />", {});
"#;
        let rewrite = rewrite_module(source, "isolated.js", &fields(&["title"]), &resolve).unwrap();
        assert_eq!(rewrite.source, source);
        assert!(rewrite.used_fields.is_empty());
        assert!(rewrite.inline_template.is_none());
    }

    #[test]
    fn test_wrong_argument_count_fails() {
        let source = r#"import { compileTemplate } from "@cardbox/template";
export default compileTemplate("<h1>Hi</h1>");
"#;
        let err = rewrite_module(source, "isolated.js", &fields(&[]), &resolve).unwrap_err();
        assert!(format!("{err}").contains("exactly two arguments"));
    }

    #[test]
    fn test_allocator_avoids_module_bindings() {
        let source = r#"import { compileTemplate } from "@cardbox/template";
import titleField from "./unrelated.js";
export default compileTemplate("<@fields.title />", { strict: true });
"#;
        let rewrite = rewrite_module(source, "isolated.js", &fields(&["title"]), &resolve).unwrap();
        // titleField is taken by an existing import; allocation falls back.
        assert!(rewrite.source.contains("<title0 />"));
        assert!(rewrite.source.contains("scope: { title0 }"));
    }

    #[test]
    fn test_missing_default_export_fails() {
        let source = r#"import { compileTemplate } from "@cardbox/template";
const t = 1;
"#;
        let err = rewrite_module(source, "isolated.js", &fields(&[]), &resolve).unwrap_err();
        assert!(format!("{err}").contains("default-export"));
    }
}
