//! Class/function units → runtime registration scripts.
//!
//! One source unit holds exactly one top-level component declaration: a
//! default-exported class (or a class plus a default-exported identifier),
//! or a capitalized named function for stateless units. The declaration is
//! replaced in the output by a constructor function and a single
//! `React.toClass` registration assignment; the render body never reaches
//! the script and is compiled into the parallel template artifact instead.

use std::collections::HashMap;

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_ast::AstBuilder;
use oxc_ast_visit::walk_mut::walk_expression;
use oxc_ast_visit::VisitMut;
use oxc_codegen::Codegen;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span, SPAN};
use serde_json::{Map, Value};
use tracing::warn;

use crate::config_eval::evaluate_config;
use crate::error::{source_line, CompileError};
use crate::platform::PlatformRow;
use crate::template::{compile_template, TemplateCx};
use crate::uid::UidGenerator;

lazy_static::lazy_static! {
    static ref PAGE_ID_RE: regex::Regex = regex::Regex::new(r"^(\./)?pages/").unwrap();
}

/// The build-environment member expression replaced by the platform's
/// environment identifier literal in every emitted script.
pub const ENV_EXPRESSION: &str = "process.env.KALEIDO_ENV";

// ─────────────────────────────────────────────────────────────────────────────
// Extracted unit
// ─────────────────────────────────────────────────────────────────────────────

/// One import statement, with enough span information to re-emit it with a
/// rewritten source id.
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub id: String,
    /// Local name of a default import, when it is the only specifier.
    pub default_local: Option<String>,
    pub specifier_count: usize,
    /// Statement text and the byte range of the quoted source within it.
    pub text: String,
    pub source_offset: usize,
    pub source_len: usize,
}

impl ImportRecord {
    /// The statement re-emitted with a different source id.
    pub fn with_source(&self, new_id: &str) -> String {
        let mut out = String::with_capacity(self.text.len() + new_id.len());
        out.push_str(&self.text[..self.source_offset]);
        out.push('"');
        out.push_str(new_id);
        out.push('"');
        out.push_str(&self.text[self.source_offset + self.source_len..]);
        out
    }
}

/// An entry of the instance- or static-method object literal.
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub name: String,
    pub text: String,
}

/// The language-neutral description of one source component, fully owned so
/// it survives the parse arena.
#[derive(Debug, Default)]
pub struct ExtractedUnit {
    pub name: String,
    pub class_uid: String,
    pub superclass: Option<String>,
    /// Non-config instance properties in declaration order.
    pub properties: Vec<(String, String)>,
    pub config: Map<String, Value>,
    /// Constructor statements, superclass call stripped.
    pub ctor_statements: Vec<String>,
    pub instance_entries: Vec<ObjectEntry>,
    pub static_entries: Vec<ObjectEntry>,
    /// Compiled template markup; `None` for the app unit or after a shape
    /// error in the render body.
    pub template: Option<String>,
    pub components_used: std::collections::BTreeSet<String>,
    pub imports: Vec<ImportRecord>,
    /// Top-level statements that are neither imports nor the component
    /// declaration; kept verbatim.
    pub extra_statements: Vec<String>,
    pub stateless: bool,
    pub errors: Vec<CompileError>,
}

fn slice(source: &str, span: Span) -> &str {
    &source[span.start as usize..span.end as usize]
}

/// Parse one component source unit and extract its pieces. `Err` means the
/// unit is abandoned (parse failure, anonymous or duplicate declaration);
/// recoverable problems land in `unit.errors`.
pub fn extract_unit(
    source: &str,
    row: &'static PlatformRow,
    uids: &mut UidGenerator,
    expect_render: bool,
) -> Result<ExtractedUnit, CompileError> {
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_jsx(true).with_module(true);
    let ret = Parser::new(&allocator, source, source_type).parse();
    if !ret.errors.is_empty() {
        return Err(CompileError::Parse {
            message: ret.errors[0].to_string(),
        });
    }
    let program = ret.program;

    let mut unit = ExtractedUnit {
        class_uid: uids.next(),
        ..ExtractedUnit::default()
    };

    // Locate the single component declaration.
    let mut class: Option<&Class> = None;
    let mut function: Option<&Function> = None;
    let mut declarations = 0usize;

    for stmt in &program.body {
        match stmt {
            Statement::ImportDeclaration(decl) => unit.imports.push(import_record(decl, source)),
            Statement::ClassDeclaration(c) => {
                declarations += 1;
                class = Some(&**c);
            }
            Statement::FunctionDeclaration(f) => {
                let capitalized = f
                    .id
                    .as_ref()
                    .map(|id| id.name.chars().next().is_some_and(|c| c.is_uppercase()))
                    .unwrap_or(false);
                if capitalized {
                    declarations += 1;
                    function = Some(&**f);
                } else {
                    unit.extra_statements
                        .push(slice(source, stmt.span()).to_string());
                }
            }
            Statement::ExportDefaultDeclaration(export) => match &export.declaration {
                ExportDefaultDeclarationKind::ClassDeclaration(c) => {
                    declarations += 1;
                    class = Some(&**c);
                }
                ExportDefaultDeclarationKind::FunctionDeclaration(f) => {
                    declarations += 1;
                    function = Some(&**f);
                }
                // `export default Name;` pointing at an earlier declaration.
                _ => {}
            },
            other => unit
                .extra_statements
                .push(slice(source, other.span()).to_string()),
        }
    }

    if declarations == 0 {
        return Err(CompileError::shape("no component declaration found", 1));
    }
    if declarations > 1 {
        return Err(CompileError::shape(
            "a source unit must contain exactly one component declaration",
            1,
        ));
    }

    if let Some(class) = class {
        extract_class(class, source, row, uids, expect_render, &mut unit)?;
    } else if let Some(function) = function {
        extract_function(function, source, row, uids, &mut unit)?;
    }

    Ok(unit)
}

fn import_record(decl: &ImportDeclaration, source: &str) -> ImportRecord {
    let stmt_span = decl.span;
    let text = slice(source, stmt_span).to_string();
    let specifiers: &[ImportDeclarationSpecifier] = match &decl.specifiers {
        Some(v) => v,
        None => &[],
    };
    let default_local = match specifiers {
        [ImportDeclarationSpecifier::ImportDefaultSpecifier(s)] => Some(s.local.name.to_string()),
        _ => None,
    };
    ImportRecord {
        id: decl.source.value.to_string(),
        default_local,
        specifier_count: specifiers.len(),
        text,
        source_offset: (decl.source.span.start - stmt_span.start) as usize,
        source_len: (decl.source.span.end - decl.source.span.start) as usize,
    }
}

fn extract_class(
    class: &Class,
    source: &str,
    row: &'static PlatformRow,
    uids: &mut UidGenerator,
    expect_render: bool,
    unit: &mut ExtractedUnit,
) -> Result<(), CompileError> {
    unit.name = match &class.id {
        Some(id) => id.name.to_string(),
        None => {
            return Err(CompileError::shape(
                "anonymous component declaration",
                source_line(source, class.span.start),
            ));
        }
    };
    unit.superclass = class
        .super_class
        .as_ref()
        .map(|sc| slice(source, sc.span()).to_string());

    let mut render_body: Option<&FunctionBody> = None;

    for element in &class.body.body {
        match element {
            ClassElement::PropertyDefinition(prop) => {
                let Some(key) = property_key_name(&prop.key) else {
                    unit.errors.push(CompileError::shape(
                        "computed property keys are not supported",
                        source_line(source, prop.span.start),
                    ));
                    continue;
                };
                if key == "config" && !prop.r#static {
                    if let Some(value) = &prop.value {
                        match evaluate_config(value, source) {
                            Ok(config) => unit.config = config,
                            Err(e) => {
                                // A malformed config degrades to an empty
                                // object; the unit itself stays healthy.
                                warn!(unit = unit.name.as_str(), error = %e, "config ignored");
                                unit.config = Map::new();
                            }
                        }
                    }
                    continue;
                }
                let value_text = prop
                    .value
                    .as_ref()
                    .map(|v| slice(source, v.span()).to_string())
                    .unwrap_or_else(|| "undefined".to_string());
                if prop.r#static {
                    unit.static_entries.push(ObjectEntry {
                        name: key,
                        text: value_text,
                    });
                } else {
                    unit.properties.push((key, value_text));
                }
            }
            ClassElement::MethodDefinition(method) => {
                let Some(key) = property_key_name(&method.key) else {
                    unit.errors.push(CompileError::shape(
                        "computed method keys are not supported",
                        source_line(source, method.span.start),
                    ));
                    continue;
                };
                match method.kind {
                    MethodDefinitionKind::Constructor => {
                        unit.ctor_statements = constructor_statements(&method.value, source);
                    }
                    MethodDefinitionKind::Get | MethodDefinitionKind::Set => {
                        unit.errors.push(CompileError::shape(
                            "accessor properties are not supported",
                            source_line(source, method.span.start),
                        ));
                    }
                    MethodDefinitionKind::Method => {
                        if key == "render" && !method.r#static {
                            render_body = method.value.body.as_deref();
                        } else {
                            let entry = ObjectEntry {
                                name: key,
                                text: method_function_text(&method.value, source),
                            };
                            if method.r#static {
                                unit.static_entries.push(entry);
                            } else {
                                unit.instance_entries.push(entry);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    if expect_render {
        match render_body {
            Some(body) => compile_unit_template(body, source, row, uids, unit),
            None => unit.errors.push(CompileError::shape(
                format!("component `{}` has no render method", unit.name),
                source_line(source, class.span.start),
            )),
        }
    }
    Ok(())
}

fn extract_function(
    function: &Function,
    source: &str,
    row: &'static PlatformRow,
    uids: &mut UidGenerator,
    unit: &mut ExtractedUnit,
) -> Result<(), CompileError> {
    unit.name = match &function.id {
        Some(id) => id.name.to_string(),
        None => {
            return Err(CompileError::shape(
                "anonymous component declaration",
                source_line(source, function.span.start),
            ));
        }
    };
    unit.stateless = true;
    match &function.body {
        Some(body) => compile_unit_template(body, source, row, uids, unit),
        None => unit.errors.push(CompileError::shape(
            format!("component `{}` has an empty body", unit.name),
            source_line(source, function.span.start),
        )),
    }
    Ok(())
}

fn compile_unit_template(
    body: &FunctionBody,
    source: &str,
    row: &'static PlatformRow,
    uids: &mut UidGenerator,
    unit: &mut ExtractedUnit,
) {
    let mut cx = TemplateCx::new(source, row, uids);
    unit.template = compile_template(&body.statements, &mut cx);
    unit.components_used = cx.components;
    unit.errors.extend(cx.errors);
}

fn property_key_name(key: &PropertyKey) -> Option<String> {
    match key {
        PropertyKey::StaticIdentifier(id) => Some(id.name.to_string()),
        PropertyKey::StringLiteral(s) => Some(s.value.to_string()),
        _ => None,
    }
}

/// Constructor statements with the superclass constructor call stripped.
fn constructor_statements(func: &Function, source: &str) -> Vec<String> {
    let Some(body) = &func.body else {
        return Vec::new();
    };
    body.statements
        .iter()
        .filter(|stmt| {
            if let Statement::ExpressionStatement(es) = stmt {
                if let Expression::CallExpression(call) = &es.expression {
                    if matches!(call.callee, Expression::Super(_)) {
                        return false;
                    }
                }
            }
            true
        })
        .map(|stmt| slice(source, stmt.span()).to_string())
        .collect()
}

fn method_function_text(func: &Function, source: &str) -> String {
    let mut params: Vec<String> = func
        .params
        .items
        .iter()
        .map(|p| slice(source, p.span).to_string())
        .collect();
    if let Some(rest) = &func.params.rest {
        params.push(slice(source, rest.span).to_string());
    }
    let body = func
        .body
        .as_ref()
        .map(|b| slice(source, b.span).to_string())
        .unwrap_or_else(|| "{}".to_string());
    format!("function ({}) {}", params.join(", "), body)
}

// ─────────────────────────────────────────────────────────────────────────────
// Import classification
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportDisposition {
    /// The framework import; stripped and re-injected as a relative path to
    /// the platform runtime.
    Runtime,
    /// Style imports compile into a standalone output next to the script.
    Style,
    /// Page entries of the app unit; removed, recorded in `config.pages`.
    PageEntry,
    /// Sub-component import; removed, the reference rides `usingComponents`.
    SubComponent,
    /// Kept, with the alias-prefixed id rewritten to a relative path.
    KeepAlias,
    Keep,
}

pub fn classify_import(
    record: &ImportRecord,
    is_app: bool,
    superclass: Option<&str>,
) -> ImportDisposition {
    if record.id == "@react" {
        return ImportDisposition::Runtime;
    }
    if record.id.ends_with(".scss") || record.id.ends_with(".less") {
        return ImportDisposition::Style;
    }
    if is_app && PAGE_ID_RE.is_match(&record.id) {
        return ImportDisposition::PageEntry;
    }
    if let Some(local) = &record.default_local {
        let capitalized = local.chars().next().is_some_and(|c| c.is_uppercase());
        let is_superclass = superclass
            .map(|sc| sc == local || sc.starts_with(&format!("{}.", local)))
            .unwrap_or(false);
        if capitalized && !is_superclass && record.specifier_count == 1 {
            return ImportDisposition::SubComponent;
        }
    }
    if record.id.starts_with('@') {
        return ImportDisposition::KeepAlias;
    }
    ImportDisposition::Keep
}

// ─────────────────────────────────────────────────────────────────────────────
// Script emission
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum Registration {
    App,
    /// Carries the page path relative to the source root.
    Page(String),
    Component,
}

#[derive(Debug)]
pub struct EmitEnv {
    /// Relative id of the platform runtime inside the destination tree.
    pub runtime_id: String,
    /// Surviving import statements, already rewritten.
    pub kept_imports: Vec<String>,
    pub registration: Registration,
    /// Environment identifier literal substituted for [`ENV_EXPRESSION`].
    pub env_id: &'static str,
}

pub fn emit_script(unit: &ExtractedUnit, env: &EmitEnv) -> String {
    let mut out = String::new();
    out.push_str(&format!("import React from \"{}\";\n", env.runtime_id));
    for import in &env.kept_imports {
        out.push_str(import);
        out.push('\n');
    }
    out.push('\n');

    for stmt in &unit.extra_statements {
        out.push_str(stmt);
        out.push('\n');
    }
    if !unit.extra_statements.is_empty() {
        out.push('\n');
    }

    // The output dialect has no implicit field initialization, so instance
    // properties become explicit assignments ahead of the constructor body.
    out.push_str(&format!("function {}() {{\n", unit.name));
    for (key, value) in &unit.properties {
        out.push_str(&format!("    this.{} = {};\n", key, value));
    }
    for stmt in &unit.ctor_statements {
        out.push_str(&format!("    {}\n", stmt));
    }
    out.push_str("}\n\n");

    let superclass = unit.superclass.as_deref().unwrap_or("undefined");
    out.push_str(&format!(
        "{} = React.toClass({}, {}, {{\n",
        unit.name, unit.name, superclass
    ));
    out.push_str(&format!("    classUid: \"{}\",\n", unit.class_uid));
    for entry in &unit.instance_entries {
        out.push_str(&format!("    {}: {},\n", entry.name, entry.text));
    }
    out.push_str("}, {\n");
    for entry in &unit.static_entries {
        out.push_str(&format!("    {}: {},\n", entry.name, entry.text));
    }
    out.push_str("});\n\n");

    match &env.registration {
        Registration::App => {
            out.push_str(&format!("App(React.registerApp({}));\n", unit.name));
        }
        Registration::Page(page_path) => {
            out.push_str(&format!(
                "Page(React.registerPage({}, \"{}\"));\n",
                unit.name, page_path
            ));
        }
        Registration::Component => {
            out.push_str(&format!(
                "Component(React.registerComponent({}, \"{}\"));\n",
                unit.name, unit.name
            ));
        }
    }
    out.push_str(&format!("\nexport default {};\n", unit.name));
    out.replace(ENV_EXPRESSION, &format!("\"{}\"", env.env_id))
}

// ─────────────────────────────────────────────────────────────────────────────
// Plain modules
// ─────────────────────────────────────────────────────────────────────────────

/// Import ids of a plain module, for dependency discovery.
pub fn collect_module_imports(source: &str) -> Result<Vec<String>, CompileError> {
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_jsx(true).with_module(true);
    let ret = Parser::new(&allocator, source, source_type).parse();
    if !ret.errors.is_empty() {
        return Err(CompileError::Parse {
            message: ret.errors[0].to_string(),
        });
    }
    Ok(ret
        .program
        .body
        .iter()
        .filter_map(|stmt| match stmt {
            Statement::ImportDeclaration(decl) => Some(decl.source.value.to_string()),
            _ => None,
        })
        .collect())
}

struct ModuleRewriter<'a, 'm> {
    allocator: &'a Allocator,
    ast: AstBuilder<'a>,
    replacements: &'m HashMap<String, String>,
    env_id: &'static str,
}

impl<'a, 'm> ModuleRewriter<'a, 'm> {
    fn is_env_expression(expr: &Expression) -> bool {
        let Expression::StaticMemberExpression(outer) = expr else {
            return false;
        };
        if outer.property.name != "KALEIDO_ENV" {
            return false;
        }
        let Expression::StaticMemberExpression(inner) = &outer.object else {
            return false;
        };
        if inner.property.name != "env" {
            return false;
        }
        matches!(&inner.object, Expression::Identifier(id) if id.name == "process")
    }
}

impl<'a, 'm> VisitMut<'a> for ModuleRewriter<'a, 'm> {
    fn visit_import_declaration(&mut self, decl: &mut ImportDeclaration<'a>) {
        let source = decl.source.value.to_string();
        if let Some(new_source) = self.replacements.get(&source) {
            decl.source.value = self.allocator.alloc_str(new_source).into();
        }
    }

    fn visit_expression(&mut self, expr: &mut Expression<'a>) {
        if Self::is_env_expression(expr) {
            let env_atom = self.allocator.alloc_str(self.env_id);
            *expr = self.ast.expression_string_literal(SPAN, env_atom, None);
            return;
        }
        walk_expression(self, expr);
    }
}

/// Re-print a plain module with alias import ids rewritten to relative
/// paths and the environment expression folded to the platform literal.
/// Everything else passes through the code generator untouched.
pub fn rewrite_plain_module(
    source: &str,
    replacements: &HashMap<String, String>,
    env_id: &'static str,
) -> Result<String, CompileError> {
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_jsx(true).with_module(true);
    let ret = Parser::new(&allocator, source, source_type).parse();
    if !ret.errors.is_empty() {
        return Err(CompileError::Parse {
            message: ret.errors[0].to_string(),
        });
    }
    let mut program = ret.program;
    let mut rewriter = ModuleRewriter {
        allocator: &allocator,
        ast: AstBuilder::new(&allocator),
        replacements,
        env_id,
    };
    rewriter.visit_program(&mut program);
    Ok(Codegen::new().build(&program).code)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
