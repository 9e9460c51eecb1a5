//! ESM to CJS module transform for the node half of the cache.
//!
//! Works by source splicing over parsed spans rather than regenerating the
//! module: import declarations become `require` bindings, `export default`
//! becomes a `module.exports.default` assignment, and named exports are
//! stripped in place with assignment statements appended at the end. The
//! module body is otherwise byte-identical to the browser copy.

use oxc::allocator::Allocator;
use oxc::ast::ast::{
    Declaration, ExportDefaultDeclarationKind, ImportDeclarationSpecifier, Statement,
};
use oxc::parser::Parser;
use oxc::span::{GetSpan, SourceType};

use crate::error::{CardError, Result};

/// Transform an ES module into its CommonJS equivalent.
pub fn transform_to_cjs(source: &str, module_path: &str) -> Result<String> {
    let allocator = Allocator::default();
    // The TS grammar is a superset here; schema modules carry decorators.
    let parsed = Parser::new(&allocator, source, SourceType::ts()).parse();
    if let Some(err) = parsed.errors.first() {
        return Err(CardError::Parse {
            path: module_path.to_string(),
            detail: err.to_string(),
        });
    }
    let program = parsed.program;

    let mut edits: Vec<(u32, u32, String)> = Vec::new();
    let mut footer: Vec<String> = Vec::new();

    for statement in &program.body {
        match statement {
            Statement::ImportDeclaration(import) => {
                let spec = js_string(import.source.value.as_str());
                let mut lines: Vec<String> = Vec::new();
                let mut named: Vec<String> = Vec::new();

                for specifier in import.specifiers.iter().flatten() {
                    match specifier {
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(default) => {
                            lines.push(format!(
                                "const {} = require({spec}).default;",
                                default.local.name
                            ));
                        }
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(ns) => {
                            lines.push(format!("const {} = require({spec});", ns.local.name));
                        }
                        ImportDeclarationSpecifier::ImportSpecifier(binding) => {
                            let imported = binding.imported.name();
                            let local = binding.local.name.as_str();
                            if imported.as_str() == local {
                                named.push(local.to_string());
                            } else {
                                named.push(format!("{imported}: {local}"));
                            }
                        }
                    }
                }
                if !named.is_empty() {
                    lines.push(format!("const {{ {} }} = require({spec});", named.join(", ")));
                }
                if lines.is_empty() {
                    // Side-effect import.
                    lines.push(format!("require({spec});"));
                }

                edits.push((import.span.start, import.span.end, lines.join("\n")));
            }

            Statement::ExportDefaultDeclaration(export) => {
                let decl_start = match &export.declaration {
                    ExportDefaultDeclarationKind::ClassDeclaration(class) => class.span.start,
                    ExportDefaultDeclarationKind::FunctionDeclaration(function) => {
                        function.span.start
                    }
                    other => match other.as_expression() {
                        Some(expression) => expression.span().start,
                        None => {
                            return Err(CardError::usage(
                                "unsupported default export form",
                                source,
                                export.span.start,
                            ));
                        }
                    },
                };
                edits.push((
                    export.span.start,
                    decl_start,
                    "module.exports.default = ".to_string(),
                ));
            }

            Statement::ExportNamedDeclaration(export) => {
                if let Some(declaration) = &export.declaration {
                    // `export const x = ...`: drop the keyword, keep the
                    // declaration, assign at the end of the module.
                    edits.push((export.span.start, declaration.span().start, String::new()));
                    for name in declared_names(declaration) {
                        footer.push(format!("module.exports.{name} = {name};"));
                    }
                } else if let Some(from) = &export.source {
                    let spec = js_string(from.value.as_str());
                    let mut lines = Vec::new();
                    for specifier in &export.specifiers {
                        lines.push(format!(
                            "module.exports.{} = require({spec}).{};",
                            specifier.exported.name(),
                            specifier.local.name()
                        ));
                    }
                    edits.push((export.span.start, export.span.end, lines.join("\n")));
                } else {
                    // `export { a, b as c }`
                    let mut lines = Vec::new();
                    for specifier in &export.specifiers {
                        lines.push(format!(
                            "module.exports.{} = {};",
                            specifier.exported.name(),
                            specifier.local.name()
                        ));
                    }
                    edits.push((export.span.start, export.span.end, lines.join("\n")));
                }
            }

            Statement::ExportAllDeclaration(export) => {
                let spec = js_string(export.source.value.as_str());
                edits.push((
                    export.span.start,
                    export.span.end,
                    format!("Object.assign(module.exports, require({spec}));"),
                ));
            }

            _ => {}
        }
    }

    let mut out = apply_edits(source, edits);
    if !footer.is_empty() {
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&footer.join("\n"));
        out.push('\n');
    }
    Ok(out)
}

fn declared_names(declaration: &Declaration<'_>) -> Vec<String> {
    use oxc::ast::ast::BindingPattern;

    let mut names = Vec::new();
    match declaration {
        Declaration::VariableDeclaration(decl) => {
            for declarator in &decl.declarations {
                if let BindingPattern::BindingIdentifier(ident) = &declarator.id {
                    names.push(ident.name.to_string());
                }
            }
        }
        Declaration::FunctionDeclaration(function) => {
            if let Some(id) = &function.id {
                names.push(id.name.to_string());
            }
        }
        Declaration::ClassDeclaration(class) => {
            if let Some(id) = &class.id {
                names.push(id.name.to_string());
            }
        }
        _ => {}
    }
    names
}

fn js_string(value: &str) -> String {
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

    #[test]
    fn test_default_import_unwraps_default_export() {
        let out = transform_to_cjs(
            r#"import string from "https://cards.example.com/base/string";"#,
            "schema.js",
        )
        .unwrap();
        assert_eq!(
            out,
            r#"const string = require("https://cards.example.com/base/string").default;"#
        );
    }

    #[test]
    fn test_named_imports_destructure_with_rename() {
        let out = transform_to_cjs(
            r#"import { contains, adopts as inherits } from "@cardbox/types";"#,
            "schema.js",
        )
        .unwrap();
        assert_eq!(
            out,
            r#"const { contains, adopts: inherits } = require("@cardbox/types");"#
        );
    }

    #[test]
    fn test_mixed_default_and_named_import() {
        let out = transform_to_cjs(
            r#"import helper, { format } from "./util.js";"#,
            "isolated.js",
        )
        .unwrap();
        assert!(out.contains(r#"const helper = require("./util.js").default;"#));
        assert!(out.contains(r#"const { format } = require("./util.js");"#));
    }

    #[test]
    fn test_namespace_and_side_effect_imports() {
        let out = transform_to_cjs(
            "import * as util from \"./util.js\";\nimport \"./side.js\";",
            "isolated.js",
        )
        .unwrap();
        assert!(out.contains(r#"const util = require("./util.js");"#));
        assert!(out.contains(r#"require("./side.js");"#));
    }

    #[test]
    fn test_default_export_of_class_and_expression() {
        let out = transform_to_cjs("export default class Person {}", "schema.js").unwrap();
        assert_eq!(out, "module.exports.default = class Person {}");

        let out = transform_to_cjs("export default compileTemplate(`x`, {});", "x.js").unwrap();
        assert_eq!(out, "module.exports.default = compileTemplate(`x`, {});");
    }

    #[test]
    fn test_named_export_declaration_keeps_body() {
        let out = transform_to_cjs(
            "export const greeting = \"hi\";\nexport function shout(s) { return s; }",
            "util.js",
        )
        .unwrap();
        assert!(out.contains("const greeting = \"hi\";"));
        assert!(out.contains("function shout(s) { return s; }"));
        assert!(out.contains("module.exports.greeting = greeting;"));
        assert!(out.contains("module.exports.shout = shout;"));
        assert!(!out.contains("export "));
    }

    #[test]
    fn test_export_specifier_list() {
        let out = transform_to_cjs("const a = 1;\nexport { a, a as b };", "util.js").unwrap();
        assert!(out.contains("module.exports.a = a;"));
        assert!(out.contains("module.exports.b = a;"));
    }

    #[test]
    fn test_reexports() {
        let out = transform_to_cjs(
            "export { x } from \"./other.js\";\nexport * from \"./rest.js\";",
            "util.js",
        )
        .unwrap();
        assert!(out.contains(r#"module.exports.x = require("./other.js").x;"#));
        assert!(out.contains(r#"Object.assign(module.exports, require("./rest.js"));"#));
    }

    #[test]
    fn test_module_body_untouched() {
        let source = r#"import a from "./a.js";
const helper = (x) => x * 2;
export default helper(a);
"#;
        let out = transform_to_cjs(source, "x.js").unwrap();
        assert!(out.contains("const helper = (x) => x * 2;"));
        assert!(out.contains("module.exports.default = helper(a);"));
    }
}
