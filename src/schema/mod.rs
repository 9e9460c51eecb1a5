//! Field/parent extraction from card schema modules.
//!
//! A schema module imports annotations from `@cardbox/types` and applies
//! them as decorators:
//!
//! ```js
//! import { contains, adopts } from "@cardbox/types";
//! import string from "https://cards.example.com/base/string";
//! import person from "https://cards.example.com/base/person";
//!
//! @adopts(person)
//! export default class Employee {
//!   @contains(string) title;
//! }
//! ```
//!
//! Field annotations (`hasMany`, `belongsTo`, `contains`, `containsMany`)
//! must be invoked as a call, used directly as a decorator on a class
//! property with a static key, and take exactly one identifier argument
//! bound to a default import. `adopts` follows the same call rules but
//! attaches to the class itself. Everything else is a source-located usage
//! error. A schema with no annotations at all compiles to an empty
//! analysis; that is how adoption-chain roots look.

use oxc::allocator::Allocator;
use oxc::ast::ast::{
    CallExpression, Class, ClassElement, Declaration, Expression, ExportDefaultDeclarationKind,
    ImportDeclarationSpecifier, Program, PropertyKey, Statement,
};
use oxc::ast_visit::{Visit, walk};
use oxc::parser::Parser;
use oxc::span::{GetSpan, SourceType, Span};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::card::{FieldKind, FieldMeta, FieldsMeta, ParentMeta, TYPES_MODULE};
use crate::error::{CardError, Result};

/// Everything the extractor learns from one schema module. Returned
/// explicitly so results never leak across unrelated compiles.
#[derive(Debug, Default)]
pub struct SchemaAnalysis {
    pub fields: FieldsMeta,
    pub parent: Option<ParentMeta>,
}

/// What an imported annotation binding stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Annotation {
    Field(FieldKind),
    Adopts,
}

impl Annotation {
    fn from_imported_name(name: &str) -> Option<Self> {
        if name == "adopts" {
            return Some(Annotation::Adopts);
        }
        FieldKind::from_annotation(name).map(Annotation::Field)
    }

    fn name(self) -> &'static str {
        match self {
            Annotation::Field(kind) => kind.annotation(),
            Annotation::Adopts => "adopts",
        }
    }
}

/// Bindings gathered from the module's import declarations.
#[derive(Debug, Default)]
struct ModuleImports {
    /// Local binding name -> annotation it refers to.
    annotations: FxHashMap<String, Annotation>,
    /// Local binding name -> source specifier of a default import.
    default_sources: FxHashMap<String, String>,
}

/// Extract field and parent metadata from a schema module's source.
pub fn extract(source: &str, module_path: &str) -> Result<SchemaAnalysis> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::ts()).parse();
    if let Some(err) = parsed.errors.first() {
        return Err(CardError::Parse {
            path: module_path.to_string(),
            detail: err.to_string(),
        });
    }

    let program = parsed.program;
    let imports = collect_imports(&program);
    if imports.annotations.is_empty() {
        return Ok(SchemaAnalysis::default());
    }

    let mut analysis = SchemaAnalysis::default();
    let mut sanctioned = FxHashSet::default();

    for statement in &program.body {
        if let Some(class) = statement_class(statement) {
            extract_from_class(class, &imports, source, &mut analysis, &mut sanctioned)?;
        }
    }

    // Any remaining call of an annotation binding sits outside decorator
    // position and is a usage error.
    let mut sweep = MisuseSweep {
        imports: &imports,
        sanctioned: &sanctioned,
        violation: None,
    };
    sweep.visit_program(&program);
    if let Some((name, span)) = sweep.violation {
        return Err(CardError::usage(
            format!("`{name}` can only be used as a decorator"),
            source,
            span.start,
        ));
    }

    Ok(analysis)
}

/// Pull a class out of a top-level statement, looking through exports.
fn statement_class<'s, 'a>(statement: &'s Statement<'a>) -> Option<&'s Class<'a>> {
    match statement {
        Statement::ClassDeclaration(class) => Some(class),
        Statement::ExportDefaultDeclaration(export) => match &export.declaration {
            ExportDefaultDeclarationKind::ClassDeclaration(class) => Some(class),
            _ => None,
        },
        Statement::ExportNamedDeclaration(export) => match &export.declaration {
            Some(Declaration::ClassDeclaration(class)) => Some(class),
            _ => None,
        },
        _ => None,
    }
}

fn collect_imports(program: &Program<'_>) -> ModuleImports {
    let mut imports = ModuleImports::default();

    for statement in &program.body {
        let Statement::ImportDeclaration(import) = statement else {
            continue;
        };
        let source_spec = import.source.value.as_str();
        let Some(specifiers) = &import.specifiers else {
            continue;
        };

        for specifier in specifiers {
            match specifier {
                ImportDeclarationSpecifier::ImportSpecifier(named) => {
                    if source_spec == TYPES_MODULE
                        && let Some(annotation) =
                            Annotation::from_imported_name(named.imported.name().as_str())
                    {
                        imports
                            .annotations
                            .insert(named.local.name.to_string(), annotation);
                    }
                }
                ImportDeclarationSpecifier::ImportDefaultSpecifier(default) => {
                    imports
                        .default_sources
                        .insert(default.local.name.to_string(), source_spec.to_string());
                }
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(_) => {}
            }
        }
    }

    imports
}

fn extract_from_class(
    class: &Class<'_>,
    imports: &ModuleImports,
    source: &str,
    analysis: &mut SchemaAnalysis,
    sanctioned: &mut FxHashSet<Span>,
) -> Result<()> {
    // Class-level decorators: only `adopts` belongs here.
    for decorator in &class.decorators {
        let Some((annotation, call)) =
            annotation_call(&decorator.expression, imports, source)?
        else {
            continue;
        };
        sanctioned.insert(call.span);

        match annotation {
            Annotation::Adopts => {
                let (card_url, _) = single_card_argument(call, "adopts", imports, source)?;
                analysis.parent = Some(ParentMeta { card_url });
            }
            Annotation::Field(kind) => {
                return Err(CardError::usage(
                    format!(
                        "`{}` must decorate a class property, not the class itself",
                        kind.annotation()
                    ),
                    source,
                    decorator.span.start,
                ));
            }
        }
    }

    for element in &class.body.body {
        match element {
            ClassElement::PropertyDefinition(property) => {
                for decorator in &property.decorators {
                    let Some((annotation, call)) =
                        annotation_call(&decorator.expression, imports, source)?
                    else {
                        continue;
                    };
                    sanctioned.insert(call.span);

                    let Annotation::Field(kind) = annotation else {
                        return Err(CardError::usage(
                            "`adopts` must decorate a class declaration, not a property",
                            source,
                            decorator.span.start,
                        ));
                    };

                    let name = static_property_name(&property.key, property.computed)
                        .ok_or_else(|| {
                            CardError::usage(
                                format!(
                                    "`{}` requires a statically named property",
                                    kind.annotation()
                                ),
                                source,
                                property.span.start,
                            )
                        })?;

                    let (card_url, local_name) =
                        single_card_argument(call, kind.annotation(), imports, source)?;
                    analysis.fields.insert(name, FieldMeta {
                        card_url,
                        kind,
                        local_name,
                    });
                }
            }
            ClassElement::MethodDefinition(method) => {
                for decorator in &method.decorators {
                    if let Some((annotation, _)) =
                        annotation_call(&decorator.expression, imports, source)?
                    {
                        return Err(CardError::usage(
                            format!("`{}` cannot decorate a method", annotation.name()),
                            source,
                            decorator.span.start,
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Recognize a decorator expression as an annotation call. A bare
/// annotation reference (`@contains`) is rule violation number one: the
/// annotation must be invoked.
fn annotation_call<'s, 'a>(
    expression: &'s Expression<'a>,
    imports: &ModuleImports,
    source: &str,
) -> Result<Option<(Annotation, &'s CallExpression<'a>)>> {
    match expression {
        Expression::CallExpression(call) => {
            let Expression::Identifier(callee) = &call.callee else {
                return Ok(None);
            };
            Ok(imports
                .annotations
                .get(callee.name.as_str())
                .map(|annotation| (*annotation, call.as_ref())))
        }
        Expression::Identifier(ident) => {
            if let Some(annotation) = imports.annotations.get(ident.name.as_str()) {
                return Err(CardError::usage(
                    format!("`{}` must be invoked as a call", annotation.name()),
                    source,
                    ident.span.start,
                ));
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// Enforce the one-argument rule: exactly one identifier argument, bound
/// to a default import. Returns (card url, local binding name).
fn single_card_argument(
    call: &CallExpression<'_>,
    annotation: &str,
    imports: &ModuleImports,
    source: &str,
) -> Result<(String, String)> {
    if call.arguments.len() != 1 {
        return Err(CardError::usage(
            format!(
                "`{annotation}` expects exactly one argument, got {}",
                call.arguments.len()
            ),
            source,
            call.span.start,
        ));
    }

    let argument = &call.arguments[0];
    let Some(Expression::Identifier(ident)) = argument.as_expression() else {
        return Err(CardError::usage(
            format!("`{annotation}` expects an imported card as its argument"),
            source,
            argument.span().start,
        ));
    };

    let local_name = ident.name.to_string();
    let Some(card_url) = imports.default_sources.get(&local_name) else {
        return Err(CardError::usage(
            format!("`{annotation}` argument `{local_name}` must be a default-imported card module"),
            source,
            ident.span.start,
        ));
    };

    Ok((card_url.clone(), local_name))
}

fn static_property_name(key: &PropertyKey<'_>, computed: bool) -> Option<String> {
    if computed {
        return None;
    }
    match key {
        PropertyKey::StaticIdentifier(ident) => Some(ident.name.to_string()),
        PropertyKey::StringLiteral(literal) => Some(literal.value.to_string()),
        _ => None,
    }
}

/// AST sweep flagging annotation calls outside decorator position.
struct MisuseSweep<'m, 's> {
    imports: &'m ModuleImports,
    sanctioned: &'m FxHashSet<Span>,
    violation: Option<(&'s str, Span)>,
}

impl<'a, 'm, 's> Visit<'a> for MisuseSweep<'m, 's>
where
    'a: 's,
{
    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if self.violation.is_none()
            && !self.sanctioned.contains(&call.span)
            && let Expression::Identifier(callee) = &call.callee
            && self.imports.annotations.contains_key(callee.name.as_str())
        {
            self.violation = Some((callee.name.as_str(), call.span));
        }
        walk::walk_call_expression(self, call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE_IMPORTS: &str = r#"
import { contains, containsMany, hasMany, belongsTo, adopts } from "@cardbox/types";
import string from "https://cards.example.com/base/string";
import date from "https://cards.example.com/base/date";
import person from "https://cards.example.com/base/person";
"#;

    fn schema(body: &str) -> String {
        format!("{BASE_IMPORTS}\n{body}")
    }

    #[test]
    fn test_extracts_fields_and_parent() {
        let source = schema(
            r#"
@adopts(person)
export default class Employee {
  @contains(string) title;
  @containsMany(string) aliases;
  @belongsTo(person) manager;
  @hasMany(person) reports;
  @contains(date) "start-date";
}
"#,
        );
        let analysis = extract(&source, "schema.js").unwrap();

        assert_eq!(analysis.fields.len(), 5);
        let title = &analysis.fields["title"];
        assert_eq!(title.card_url, "https://cards.example.com/base/string");
        assert_eq!(title.kind, FieldKind::Contains);
        assert_eq!(title.local_name, "string");
        assert_eq!(analysis.fields["reports"].kind, FieldKind::HasMany);
        assert_eq!(
            analysis.fields["start-date"].card_url,
            "https://cards.example.com/base/date"
        );
        assert_eq!(
            analysis.parent,
            Some(ParentMeta {
                card_url: "https://cards.example.com/base/person".into()
            })
        );
    }

    #[test]
    fn test_no_annotations_is_not_an_error() {
        let source = "export default class Base {}";
        let analysis = extract(source, "schema.js").unwrap();
        assert!(analysis.fields.is_empty());
        assert!(analysis.parent.is_none());
    }

    #[test]
    fn test_two_arguments_fails_with_located_error() {
        let source = schema(
            r#"
export default class Card {
  @contains(string, date) title;
}
"#,
        );
        let err = extract(&source, "schema.js").unwrap_err();
        match err {
            CardError::Usage { message, location } => {
                assert!(message.contains("exactly one argument"), "{message}");
                assert!(location.line > 1);
            }
            other => panic!("expected usage error, got {other:?}"),
        }
    }

    #[test]
    fn test_uninvoked_annotation_fails() {
        let source = schema(
            r#"
export default class Card {
  @contains title;
}
"#,
        );
        let err = extract(&source, "schema.js").unwrap_err();
        assert!(format!("{err}").contains("must be invoked as a call"));
    }

    #[test]
    fn test_non_decorator_call_fails() {
        let source = schema(
            r#"
const title = contains(string);
export default class Card {}
"#,
        );
        let err = extract(&source, "schema.js").unwrap_err();
        assert!(format!("{err}").contains("can only be used as a decorator"));
    }

    #[test]
    fn test_computed_key_fails() {
        let source = schema(
            r#"
export default class Card {
  @contains(string) [dynamic] ;
}
"#,
        );
        let err = extract(&source, "schema.js").unwrap_err();
        assert!(format!("{err}").contains("statically named"));
    }

    #[test]
    fn test_argument_must_be_default_import() {
        let source = schema(
            r#"
export default class Card {
  @contains(contains) title;
}
"#,
        );
        let err = extract(&source, "schema.js").unwrap_err();
        assert!(format!("{err}").contains("default-imported card module"));
    }

    #[test]
    fn test_adopts_on_property_fails() {
        let source = schema(
            r#"
export default class Card {
  @adopts(person) parent;
}
"#,
        );
        let err = extract(&source, "schema.js").unwrap_err();
        assert!(format!("{err}").contains("must decorate a class declaration"));
    }

    #[test]
    fn test_field_annotation_on_class_fails() {
        let source = schema(
            r#"
@contains(string)
export default class Card {}
"#,
        );
        let err = extract(&source, "schema.js").unwrap_err();
        assert!(format!("{err}").contains("must decorate a class property"));
    }
}
