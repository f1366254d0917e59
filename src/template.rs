//! JSX render bodies → declarative platform templates.
//!
//! The render body is reduced to a platform-agnostic `TemplateNode` tree and
//! then rewritten by a fixed sequence of passes before serialization:
//!
//!   1. build:      control-flow normalization (if/ternary/logical chains
//!                  into conditional branch lists, `.map` calls into loop
//!                  blocks), attribute-value interpolation, text trimming
//!   2. attributes: `className` → `class`, event bindings with synthetic
//!                  uid/beacon attributes
//!   3. elements:   tag remapping and sub-component markers (the pass that
//!                  records `usingComponents` names)
//!   4. serialize:  depth-first emission in the platform's markup syntax
//!
//! The passes run in this order, always; each consumes and returns the tree.

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use oxc_ast::ast::{
    Expression, FormalParameters, JSXAttributeItem, JSXAttributeName, JSXAttributeValue, JSXChild,
    JSXElement, JSXElementName, JSXFragment, LogicalOperator, Statement,
};
use oxc_span::GetSpan;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{source_line, CompileError};
use crate::platform::{is_component_tag, map_element_name, PlatformRow};
use crate::uid::UidGenerator;

lazy_static! {
    static ref ON_EVENT_RE: Regex = Regex::new(r"^on([A-Z][a-zA-Z]*)$").unwrap();
    static ref CATCH_EVENT_RE: Regex = Regex::new(r"^catch([A-Z][a-zA-Z]*)$").unwrap();
    static ref THIS_PREFIX_RE: Regex = Regex::new(r"\bthis\.").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Template tree
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeValue {
    Static(String),
    /// Rendered as `{{ <code> }}` in the platform's interpolation syntax.
    Interpolated(String),
    /// Attribute without a value (`wx:else`, bare boolean attributes).
    Bare,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateAttribute {
    pub name: String,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    pub tag: String,
    pub attributes: Vec<TemplateAttribute>,
    pub children: Vec<TemplateNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalBranch {
    /// `None` marks the final `else` branch.
    pub test: Option<String>,
    pub children: Vec<TemplateNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopNode {
    pub source: String,
    pub item: String,
    pub index: String,
    pub children: Vec<TemplateNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TemplateNode {
    Text { value: String },
    Interpolation { code: String },
    Element(ElementNode),
    ConditionalBlock { branches: Vec<ConditionalBranch> },
    LoopBlock(LoopNode),
}

// ─────────────────────────────────────────────────────────────────────────────
// Compile context
// ─────────────────────────────────────────────────────────────────────────────

pub struct TemplateCx<'s, 'u> {
    source: &'s str,
    row: &'static PlatformRow,
    uids: &'u mut UidGenerator,
    /// Sub-component names referenced by this template; merged into the
    /// owning config's `usingComponents` by the unit finalizer.
    pub components: BTreeSet<String>,
    pub errors: Vec<CompileError>,
}

impl<'s, 'u> TemplateCx<'s, 'u> {
    pub fn new(source: &'s str, row: &'static PlatformRow, uids: &'u mut UidGenerator) -> Self {
        TemplateCx {
            source,
            row,
            uids,
            components: BTreeSet::new(),
            errors: Vec::new(),
        }
    }

    fn slice(&self, span: oxc_span::Span) -> &str {
        &self.source[span.start as usize..span.end as usize]
    }

    /// Expression source rendered for interpolation: leading `this.`
    /// stripped, whitespace collapsed.
    fn interp(&self, span: oxc_span::Span) -> String {
        let code = THIS_PREFIX_RE.replace_all(self.slice(span), "");
        WHITESPACE_RE.replace_all(code.trim(), " ").to_string()
    }

    fn shape(&mut self, message: impl Into<String>, offset: u32) {
        self.errors
            .push(CompileError::shape(message, source_line(self.source, offset)));
    }
}

/// Compile a render body (the statements of a `render` method or a stateless
/// function). Returns `None` when a shape error stopped compilation; the
/// errors stay in the context.
pub fn compile_template<'a>(
    statements: &[Statement<'a>],
    cx: &mut TemplateCx<'_, '_>,
) -> Option<String> {
    let reduced = match reduce_statements(statements, cx.source) {
        Ok(reduced) => reduced,
        Err(e) => {
            cx.errors.push(e);
            return None;
        }
    };

    let tree = lower_reduced(&reduced, cx);
    if cx.errors.iter().any(|e| matches!(e, CompileError::Shape { .. })) {
        return None;
    }
    let tree = rewrite_attributes(tree, cx);
    let tree = remap_elements(tree, cx, None);

    let mut out = String::new();
    serialize_nodes(&tree, cx.row, &mut out);
    Some(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Consequent reduction
// ─────────────────────────────────────────────────────────────────────────────

/// A render body collapsed to the single expression each control path
/// returns. Any other statement shape is a reportable error.
enum Reduced<'a, 'b> {
    Expr(&'b Expression<'a>),
    Branch {
        test: &'b Expression<'a>,
        consequent: Box<Reduced<'a, 'b>>,
        alternate: Option<Box<Reduced<'a, 'b>>>,
    },
}

fn reduce_statements<'a, 'b>(
    statements: &'b [Statement<'a>],
    source: &str,
) -> Result<Reduced<'a, 'b>, CompileError> {
    let stmts: Vec<&'b Statement<'a>> = statements
        .iter()
        .filter(|s| !matches!(s, Statement::EmptyStatement(_)))
        .collect();

    match stmts.len() {
        0 => Err(CompileError::shape("`render` must return a value", 1)),
        1 => reduce_branch(stmts[0], source),
        2 => {
            let trailing = match stmts[1] {
                Statement::ReturnStatement(ret) => ret.argument.as_ref().ok_or_else(|| {
                    CompileError::shape(
                        "`render` must return a value",
                        source_line(source, ret.span.start),
                    )
                })?,
                other => {
                    return Err(CompileError::shape(
                        "each branch of `render` must contain exactly one return statement",
                        source_line(source, other.span().start),
                    ));
                }
            };
            match stmts[0] {
                Statement::IfStatement(if_stmt) => reduce_if(if_stmt, Some(trailing), source),
                other => Err(CompileError::shape(
                    "each branch of `render` must contain exactly one return statement",
                    source_line(source, other.span().start),
                )),
            }
        }
        _ => Err(CompileError::shape(
            "each branch of `render` must contain exactly one return statement",
            source_line(source, stmts[0].span().start),
        )),
    }
}

fn reduce_if<'a, 'b>(
    if_stmt: &'b oxc_ast::ast::IfStatement<'a>,
    trailing_return: Option<&'b Expression<'a>>,
    source: &str,
) -> Result<Reduced<'a, 'b>, CompileError> {
    let consequent = reduce_branch(&if_stmt.consequent, source)?;
    let alternate = match (&if_stmt.alternate, trailing_return) {
        (Some(_), Some(ret)) => {
            return Err(CompileError::shape(
                "unreachable return after an exhaustive if/else",
                source_line(source, ret.span().start),
            ));
        }
        (Some(alt), None) => Some(Box::new(reduce_branch(alt, source)?)),
        (None, Some(ret)) => Some(Box::new(Reduced::Expr(ret))),
        (None, None) => None,
    };
    Ok(Reduced::Branch {
        test: &if_stmt.test,
        consequent: Box::new(consequent),
        alternate,
    })
}

fn reduce_branch<'a, 'b>(
    stmt: &'b Statement<'a>,
    source: &str,
) -> Result<Reduced<'a, 'b>, CompileError> {
    match stmt {
        Statement::ReturnStatement(ret) => match &ret.argument {
            Some(arg) => Ok(Reduced::Expr(arg)),
            None => Err(CompileError::shape(
                "each branch of `render` must return a value",
                source_line(source, ret.span.start),
            )),
        },
        Statement::BlockStatement(block) => reduce_statements(&block.body, source),
        Statement::IfStatement(nested) => reduce_if(nested, None, source),
        other => Err(CompileError::shape(
            "each branch of `render` must contain exactly one return statement",
            source_line(source, other.span().start),
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pass 1: build
// ─────────────────────────────────────────────────────────────────────────────

fn lower_reduced(reduced: &Reduced<'_, '_>, cx: &mut TemplateCx<'_, '_>) -> Vec<TemplateNode> {
    match reduced {
        Reduced::Expr(expr) => lower_expression(expr, cx),
        Reduced::Branch { .. } => {
            let mut branches = Vec::new();
            collect_reduced_branches(reduced, cx, &mut branches);
            vec![TemplateNode::ConditionalBlock { branches }]
        }
    }
}

fn collect_reduced_branches(
    reduced: &Reduced<'_, '_>,
    cx: &mut TemplateCx<'_, '_>,
    out: &mut Vec<ConditionalBranch>,
) {
    match reduced {
        Reduced::Expr(expr) => {
            if !is_nullish(expr) {
                out.push(ConditionalBranch {
                    test: None,
                    children: lower_expression(expr, cx),
                });
            }
        }
        Reduced::Branch {
            test,
            consequent,
            alternate,
        } => {
            let children = lower_reduced(consequent, cx);
            out.push(ConditionalBranch {
                test: Some(cx.interp(test.span())),
                children,
            });
            if let Some(alt) = alternate {
                collect_reduced_branches(alt, cx, out);
            }
        }
    }
}

fn is_nullish(expr: &Expression) -> bool {
    match expr {
        Expression::NullLiteral(_) => true,
        Expression::Identifier(id) => id.name == "undefined",
        Expression::ParenthesizedExpression(p) => is_nullish(&p.expression),
        _ => false,
    }
}

fn lower_expression(expr: &Expression<'_>, cx: &mut TemplateCx<'_, '_>) -> Vec<TemplateNode> {
    match expr {
        Expression::ParenthesizedExpression(p) => lower_expression(&p.expression, cx),
        Expression::JSXElement(el) => vec![lower_jsx_element(el, cx)],
        Expression::JSXFragment(frag) => lower_jsx_children_of_fragment(frag, cx),

        // A canonical ternary unfolds into one conditional block per branch;
        // a nullish alternate contributes no second branch.
        Expression::ConditionalExpression(cond) => {
            let mut branches = vec![ConditionalBranch {
                test: Some(cx.interp(cond.test.span())),
                children: lower_expression(&cond.consequent, cx),
            }];
            collect_alternate_branches(&cond.alternate, cx, &mut branches);
            vec![TemplateNode::ConditionalBlock { branches }]
        }

        // `cond && <jsx/>` is the single-branch conditional.
        Expression::LogicalExpression(logical) if logical.operator == LogicalOperator::And => {
            let branches = vec![ConditionalBranch {
                test: Some(cx.interp(logical.left.span())),
                children: lower_expression(&logical.right, cx),
            }];
            vec![TemplateNode::ConditionalBlock { branches }]
        }

        Expression::CallExpression(call) => {
            if let Some(node) = lower_map_call(call, cx) {
                vec![node]
            } else {
                cx.shape(
                    "only `.map` calls may appear in `render` expressions",
                    call.span.start,
                );
                Vec::new()
            }
        }

        Expression::StringLiteral(s) => vec![TemplateNode::Text {
            value: s.value.to_string(),
        }],
        Expression::NumericLiteral(n) => vec![TemplateNode::Text {
            value: format_number(n.value),
        }],
        Expression::NullLiteral(_) | Expression::BooleanLiteral(_) => Vec::new(),
        Expression::Identifier(id) if id.name == "undefined" => Vec::new(),

        Expression::Identifier(_)
        | Expression::StaticMemberExpression(_)
        | Expression::ComputedMemberExpression(_)
        | Expression::UnaryExpression(_)
        | Expression::BinaryExpression(_)
        | Expression::LogicalExpression(_) => vec![TemplateNode::Interpolation {
            code: cx.interp(expr.span()),
        }],

        other => {
            cx.shape(
                format!(
                    "unsupported expression in `render`: `{}`",
                    WHITESPACE_RE.replace_all(cx.slice(other.span()), " ")
                ),
                other.span().start,
            );
            Vec::new()
        }
    }
}

fn collect_alternate_branches(
    alternate: &Expression<'_>,
    cx: &mut TemplateCx<'_, '_>,
    out: &mut Vec<ConditionalBranch>,
) {
    match alternate {
        Expression::ParenthesizedExpression(p) => collect_alternate_branches(&p.expression, cx, out),
        e if is_nullish(e) => {}
        // `a ? <A/> : b ? <B/> : <C/>` becomes if / elif / else.
        Expression::ConditionalExpression(nested) => {
            out.push(ConditionalBranch {
                test: Some(cx.interp(nested.test.span())),
                children: lower_expression(&nested.consequent, cx),
            });
            collect_alternate_branches(&nested.alternate, cx, out);
        }
        other => out.push(ConditionalBranch {
            test: None,
            children: lower_expression(other, cx),
        }),
    }
}

fn lower_map_call(
    call: &oxc_ast::ast::CallExpression<'_>,
    cx: &mut TemplateCx<'_, '_>,
) -> Option<TemplateNode> {
    let member = match &call.callee {
        Expression::StaticMemberExpression(m) if m.property.name == "map" => m,
        _ => return None,
    };

    let callback = call.arguments.first()?.as_expression()?;
    let (params, reduced) = match callback {
        Expression::ArrowFunctionExpression(arrow) => {
            let reduced = if arrow.expression {
                match arrow.body.statements.first() {
                    Some(Statement::ExpressionStatement(es)) => Reduced::Expr(&es.expression),
                    _ => return None,
                }
            } else {
                match reduce_statements(&arrow.body.statements, cx.source) {
                    Ok(reduced) => reduced,
                    Err(e) => {
                        cx.errors.push(e);
                        return Some(TemplateNode::LoopBlock(LoopNode {
                            source: cx.interp(member.object.span()),
                            item: "item".into(),
                            index: "index".into(),
                            children: Vec::new(),
                        }));
                    }
                }
            };
            (&arrow.params, reduced)
        }
        Expression::FunctionExpression(func) => {
            let body = func.body.as_ref()?;
            let reduced = match reduce_statements(&body.statements, cx.source) {
                Ok(reduced) => reduced,
                Err(e) => {
                    cx.errors.push(e);
                    return Some(TemplateNode::LoopBlock(LoopNode {
                        source: cx.interp(member.object.span()),
                        item: "item".into(),
                        index: "index".into(),
                        children: Vec::new(),
                    }));
                }
            };
            (&func.params, reduced)
        }
        _ => return None,
    };

    // Binder names are synthesized when the callback takes fewer than two
    // parameters.
    let (item, index) = binder_names(params);
    let children = lower_reduced(&reduced, cx);

    Some(TemplateNode::LoopBlock(LoopNode {
        source: cx.interp(member.object.span()),
        item,
        index,
        children,
    }))
}

fn binder_names(params: &FormalParameters) -> (String, String) {
    use oxc_ast::ast::BindingPattern;

    let name_of = |i: usize| -> Option<String> {
        params.items.get(i).and_then(|p| match &p.pattern {
            BindingPattern::BindingIdentifier(id) => Some(id.name.to_string()),
            _ => None,
        })
    };
    (
        name_of(0).unwrap_or_else(|| "item".to_string()),
        name_of(1).unwrap_or_else(|| "index".to_string()),
    )
}

fn lower_jsx_element(el: &JSXElement<'_>, cx: &mut TemplateCx<'_, '_>) -> TemplateNode {
    let tag = match &el.opening_element.name {
        JSXElementName::Identifier(id) => id.name.to_string(),
        JSXElementName::IdentifierReference(id) => id.name.to_string(),
        other => {
            cx.shape(
                "element names must be plain identifiers",
                other.span().start,
            );
            "view".to_string()
        }
    };

    let mut attributes = Vec::new();
    for item in &el.opening_element.attributes {
        match item {
            JSXAttributeItem::Attribute(attr) => {
                let name = match &attr.name {
                    JSXAttributeName::Identifier(id) => id.name.to_string(),
                    JSXAttributeName::NamespacedName(ns) => {
                        format!("{}:{}", ns.namespace.name, ns.name.name)
                    }
                };
                if let Some(value) = lower_attribute_value(&attr.value, cx) {
                    attributes.push(TemplateAttribute { name, value });
                }
            }
            JSXAttributeItem::SpreadAttribute(spread) => {
                cx.shape("spread attributes are not supported", spread.span.start);
            }
        }
    }

    TemplateNode::Element(ElementNode {
        tag,
        attributes,
        children: lower_jsx_children(&el.children, cx),
    })
}

fn lower_attribute_value(
    value: &Option<JSXAttributeValue<'_>>,
    cx: &mut TemplateCx<'_, '_>,
) -> Option<AttributeValue> {
    match value {
        None => Some(AttributeValue::Bare),
        Some(JSXAttributeValue::StringLiteral(s)) => {
            Some(AttributeValue::Static(s.value.to_string()))
        }
        Some(JSXAttributeValue::ExpressionContainer(container)) => {
            let expr = container.expression.as_expression()?;
            match expr {
                Expression::StringLiteral(s) => Some(AttributeValue::Static(s.value.to_string())),
                Expression::Identifier(_)
                | Expression::StaticMemberExpression(_)
                | Expression::ComputedMemberExpression(_)
                | Expression::UnaryExpression(_)
                | Expression::BinaryExpression(_)
                | Expression::LogicalExpression(_)
                | Expression::ConditionalExpression(_)
                | Expression::NumericLiteral(_)
                | Expression::BooleanLiteral(_)
                | Expression::NullLiteral(_) => Some(AttributeValue::Interpolated(cx.interp(expr.span()))),
                other => {
                    cx.shape(
                        format!(
                            "attribute value must be an identifier, member, unary, binary, logical or conditional expression, got `{}`",
                            WHITESPACE_RE.replace_all(cx.slice(other.span()), " ")
                        ),
                        other.span().start,
                    );
                    None
                }
            }
        }
        Some(JSXAttributeValue::Element(el)) => {
            cx.shape("JSX is not allowed as an attribute value", el.span.start);
            None
        }
        Some(JSXAttributeValue::Fragment(frag)) => {
            cx.shape("JSX is not allowed as an attribute value", frag.span.start);
            None
        }
    }
}

fn lower_jsx_children(
    children: &[JSXChild<'_>],
    cx: &mut TemplateCx<'_, '_>,
) -> Vec<TemplateNode> {
    let mut nodes = Vec::new();
    for child in children {
        match child {
            JSXChild::Text(t) => {
                // Whitespace-only text between markup carries no meaning in
                // the declarative output.
                let trimmed = t.value.trim();
                if !trimmed.is_empty() {
                    nodes.push(TemplateNode::Text {
                        value: WHITESPACE_RE.replace_all(trimmed, " ").to_string(),
                    });
                }
            }
            JSXChild::Element(el) => nodes.push(lower_jsx_element(el, cx)),
            JSXChild::Fragment(frag) => {
                nodes.extend(lower_jsx_children_of_fragment(frag, cx));
            }
            JSXChild::ExpressionContainer(container) => {
                if let Some(expr) = container.expression.as_expression() {
                    nodes.extend(lower_expression(expr, cx));
                }
            }
            JSXChild::Spread(spread) => {
                cx.shape("spread children are not supported", spread.span.start);
            }
        }
    }
    nodes
}

fn lower_jsx_children_of_fragment(
    frag: &JSXFragment<'_>,
    cx: &mut TemplateCx<'_, '_>,
) -> Vec<TemplateNode> {
    lower_jsx_children(&frag.children, cx)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pass 2: attributes
// ─────────────────────────────────────────────────────────────────────────────

fn rewrite_attributes(tree: Vec<TemplateNode>, cx: &mut TemplateCx<'_, '_>) -> Vec<TemplateNode> {
    tree.into_iter()
        .map(|node| rewrite_attributes_node(node, cx))
        .collect()
}

fn rewrite_attributes_node(node: TemplateNode, cx: &mut TemplateCx<'_, '_>) -> TemplateNode {
    match node {
        TemplateNode::Element(mut el) => {
            let mut rewritten = Vec::with_capacity(el.attributes.len());
            let mut synthetic = Vec::new();
            for mut attr in el.attributes {
                if attr.name == "className" {
                    attr.name = "class".to_string();
                    rewritten.push(attr);
                    continue;
                }
                if let Some(caps) = CATCH_EVENT_RE.captures(&attr.name) {
                    let (name, extra) = bind_event(&el.tag, &caps[1], true, cx);
                    rewritten.push(TemplateAttribute {
                        name,
                        value: AttributeValue::Static("dispatchEvent".into()),
                    });
                    synthetic.extend(extra);
                    continue;
                }
                if let Some(caps) = ON_EVENT_RE.captures(&attr.name) {
                    let (name, extra) = bind_event(&el.tag, &caps[1], false, cx);
                    rewritten.push(TemplateAttribute {
                        name,
                        value: AttributeValue::Static("dispatchEvent".into()),
                    });
                    synthetic.extend(extra);
                    continue;
                }
                rewritten.push(attr);
            }
            rewritten.extend(synthetic);
            el.attributes = rewritten;
            el.children = rewrite_attributes(el.children, cx);
            TemplateNode::Element(el)
        }
        TemplateNode::ConditionalBlock { branches } => TemplateNode::ConditionalBlock {
            branches: branches
                .into_iter()
                .map(|b| ConditionalBranch {
                    test: b.test,
                    children: rewrite_attributes(b.children, cx),
                })
                .collect(),
        },
        TemplateNode::LoopBlock(mut lp) => {
            lp.children = rewrite_attributes(lp.children, cx);
            TemplateNode::LoopBlock(lp)
        }
        other => other,
    }
}

/// Platform binding name for one event, plus the synthetic uid/beacon
/// attributes the runtime dispatcher keys on.
fn bind_event(
    tag: &str,
    event: &str,
    catch: bool,
    cx: &mut TemplateCx<'_, '_>,
) -> (String, Vec<TemplateAttribute>) {
    let mut event = event.to_string();
    if event == "Click" {
        event = "Tap".to_string();
    }
    if (tag == "input" || tag == "textarea") && event == "Change" {
        event = "Input".to_string();
    }

    let prefix = if catch {
        cx.row.catch_prefix
    } else {
        cx.row.bind_prefix
    };
    let bound = if cx.row.lowercase_events {
        format!("{}{}", prefix, event.to_lowercase())
    } else {
        format!("{}{}", prefix, event)
    };

    let synthetic = vec![
        TemplateAttribute {
            name: format!("data-{}-uid", event.to_lowercase()),
            value: AttributeValue::Static(cx.uids.next()),
        },
        TemplateAttribute {
            name: "data-beacon-uid".to_string(),
            value: AttributeValue::Static("default".into()),
        },
    ];
    (bound, synthetic)
}

// ─────────────────────────────────────────────────────────────────────────────
// Pass 3: elements
// ─────────────────────────────────────────────────────────────────────────────

fn remap_elements(
    tree: Vec<TemplateNode>,
    cx: &mut TemplateCx<'_, '_>,
    loop_index: Option<&str>,
) -> Vec<TemplateNode> {
    tree.into_iter()
        .map(|node| remap_elements_node(node, cx, loop_index))
        .collect()
}

fn remap_elements_node(
    node: TemplateNode,
    cx: &mut TemplateCx<'_, '_>,
    loop_index: Option<&str>,
) -> TemplateNode {
    match node {
        TemplateNode::Element(mut el) => {
            if is_component_tag(&el.tag) {
                let name = std::mem::replace(&mut el.tag, cx.row.use_component_tag.to_string());
                cx.components.insert(name.clone());

                // The instance uid is stable per reference site; inside a
                // loop it is suffixed with the index binder so every
                // iteration gets its own identity.
                let uid = cx.uids.next();
                let instance_uid = match loop_index {
                    Some(index) => {
                        AttributeValue::Interpolated(format!("'{}' + {}", uid, index))
                    }
                    None => AttributeValue::Static(uid),
                };
                el.attributes.push(TemplateAttribute {
                    name: "data-instance-uid".to_string(),
                    value: instance_uid,
                });
                el.attributes.push(TemplateAttribute {
                    name: "is".to_string(),
                    value: AttributeValue::Static(name),
                });
            } else {
                el.tag = map_element_name(&el.tag).to_string();
            }
            el.children = remap_elements(el.children, cx, loop_index);
            TemplateNode::Element(el)
        }
        TemplateNode::ConditionalBlock { branches } => TemplateNode::ConditionalBlock {
            branches: branches
                .into_iter()
                .map(|b| ConditionalBranch {
                    test: b.test,
                    children: remap_elements(b.children, cx, loop_index),
                })
                .collect(),
        },
        TemplateNode::LoopBlock(mut lp) => {
            let index = lp.index.clone();
            lp.children = remap_elements(lp.children, cx, Some(&index));
            TemplateNode::LoopBlock(lp)
        }
        other => other,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pass 4: serialize
// ─────────────────────────────────────────────────────────────────────────────

fn serialize_nodes(nodes: &[TemplateNode], row: &PlatformRow, out: &mut String) {
    for node in nodes {
        serialize_node(node, row, out);
    }
}

fn serialize_node(node: &TemplateNode, row: &PlatformRow, out: &mut String) {
    match node {
        TemplateNode::Text { value } => out.push_str(value),
        TemplateNode::Interpolation { code } => {
            out.push_str("{{");
            out.push_str(code);
            out.push_str("}}");
        }
        TemplateNode::Element(el) => {
            out.push('<');
            out.push_str(&el.tag);
            for attr in &el.attributes {
                serialize_attribute(attr, out);
            }
            if el.children.is_empty() {
                out.push_str(" />");
            } else {
                out.push('>');
                serialize_nodes(&el.children, row, out);
                out.push_str("</");
                out.push_str(&el.tag);
                out.push('>');
            }
        }
        TemplateNode::ConditionalBlock { branches } => {
            for (i, branch) in branches.iter().enumerate() {
                out.push_str("<block");
                match (&branch.test, i) {
                    (Some(test), 0) => {
                        out.push_str(&format!(" {}=\"{{{{{}}}}}\"", row.if_attr, test))
                    }
                    (Some(test), _) => {
                        out.push_str(&format!(" {}=\"{{{{{}}}}}\"", row.else_if_attr, test))
                    }
                    (None, _) => out.push_str(&format!(" {}", row.else_attr)),
                }
                out.push('>');
                serialize_nodes(&branch.children, row, out);
                out.push_str("</block>");
            }
        }
        TemplateNode::LoopBlock(lp) => {
            out.push_str("<block");
            out.push_str(&format!(" {}=\"{{{{{}}}}}\"", row.loop_attr, lp.source));
            out.push_str(&format!(" {}=\"{}\"", row.loop_item_attr, lp.item));
            out.push_str(&format!(" {}=\"{}\"", row.loop_index_attr, lp.index));
            if let Some(key_attr) = row.loop_key_attr {
                out.push_str(&format!(" {}=\"{}\"", key_attr, row.loop_key_value));
            }
            out.push('>');
            serialize_nodes(&lp.children, row, out);
            out.push_str("</block>");
        }
    }
}

fn serialize_attribute(attr: &TemplateAttribute, out: &mut String) {
    match &attr.value {
        AttributeValue::Static(value) => {
            out.push_str(&format!(" {}=\"{}\"", attr.name, escape_attribute(value)))
        }
        AttributeValue::Interpolated(code) => {
            out.push_str(&format!(" {}=\"{{{{{}}}}}\"", attr.name, code))
        }
        AttributeValue::Bare => out.push_str(&format!(" {}", attr.name)),
    }
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use oxc_allocator::Allocator;
    use oxc_ast::ast::{ClassElement, ExportDefaultDeclarationKind, MethodDefinitionKind};
    use oxc_parser::Parser;
    use oxc_span::SourceType;

    /// Compile the render body of a minimal class fixture.
    fn compile_on(platform: Platform, render_body: &str) -> (Option<String>, Vec<CompileError>, BTreeSet<String>) {
        let source = format!(
            "export default class Fixture extends React.Component {{ render() {{ {} }} }}",
            render_body
        );
        let allocator = Allocator::default();
        let source_type = SourceType::default().with_jsx(true).with_module(true);
        let ret = Parser::new(&allocator, &source, source_type).parse();
        assert!(ret.errors.is_empty(), "fixture must parse");

        for stmt in &ret.program.body {
            if let Statement::ExportDefaultDeclaration(export) = stmt {
                if let ExportDefaultDeclarationKind::ClassDeclaration(class) = &export.declaration {
                    for element in &class.body.body {
                        if let ClassElement::MethodDefinition(method) = element {
                            if matches!(method.kind, MethodDefinitionKind::Method) {
                                let body = method.value.body.as_ref().unwrap();
                                let mut uids = UidGenerator::new();
                                let mut cx =
                                    TemplateCx::new(&source, platform.row(), &mut uids);
                                let markup = compile_template(&body.statements, &mut cx);
                                return (markup, cx.errors, cx.components);
                            }
                        }
                    }
                }
            }
        }
        panic!("fixture had no render method");
    }

    fn markup(platform: Platform, render_body: &str) -> String {
        let (markup, errors, _) = compile_on(platform, render_body);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        markup.unwrap()
    }

    #[test]
    fn plain_elements_remap_and_interpolate() {
        let out = markup(
            Platform::Wx,
            r#"return <div className="card"><span>{this.state.title}</span></div>;"#,
        );
        assert_eq!(
            out,
            r#"<view class="card"><text>{{state.title}}</text></view>"#
        );
    }

    #[test]
    fn null_alternate_emits_a_single_conditional_block() {
        for platform in Platform::all() {
            let (out, errors, _) = compile_on(
                platform,
                r#"return this.state.ok ? <div>yes</div> : null;"#,
            );
            let out = out.unwrap();
            assert!(errors.is_empty());
            assert_eq!(out.matches("<block").count(), 1, "{platform}: {out}");
            assert!(out.contains(&format!("{}=\"{{{{state.ok}}}}\"", platform.row().if_attr)));
            assert!(!out.contains(platform.row().else_attr));
        }
    }

    #[test]
    fn ternary_chain_unfolds_into_if_elif_else() {
        let out = markup(
            Platform::Wx,
            r#"return this.state.a ? <div>a</div> : this.state.b ? <div>b</div> : <div>c</div>;"#,
        );
        assert!(out.contains("wx:if=\"{{state.a}}\""));
        assert!(out.contains("wx:elif=\"{{state.b}}\""));
        assert!(out.contains("<block wx:else>"));
    }

    #[test]
    fn logical_and_is_a_single_branch() {
        let out = markup(Platform::Bu, r#"return this.state.shown && <div>hi</div>;"#);
        assert_eq!(out, r#"<block s-if="{{state.shown}}"><view>hi</view></block>"#);
    }

    #[test]
    fn if_statements_normalize_like_ternaries() {
        let out = markup(
            Platform::Wx,
            r#"if (this.state.loading) { return <span>wait</span>; } return <div>done</div>;"#,
        );
        assert_eq!(
            out,
            r#"<block wx:if="{{state.loading}}"><text>wait</text></block><block wx:else><view>done</view></block>"#
        );
    }

    #[test]
    fn malformed_if_branch_is_a_shape_error_not_a_crash() {
        let (out, errors, _) = compile_on(
            Platform::Wx,
            r#"if (this.state.x) { const a = 1; return <div/>; } return <span/>;"#,
        );
        assert!(out.is_none());
        assert!(matches!(errors[0], CompileError::Shape { .. }));
        assert!(errors[0].to_string().contains("exactly one return"));
    }

    #[test]
    fn map_calls_become_loop_blocks_with_table_attributes() {
        for platform in Platform::all() {
            let (out, errors, _) = compile_on(
                platform,
                r#"return <div>{this.state.list.map((item, index) => <span>{item.name}</span>)}</div>;"#,
            );
            assert!(errors.is_empty());
            let out = out.unwrap();
            let row = platform.row();
            assert!(
                out.contains(&format!("{}=\"{{{{state.list}}}}\"", row.loop_attr)),
                "{platform}: {out}"
            );
            assert!(out.contains(&format!("{}=\"item\"", row.loop_item_attr)));
            assert!(out.contains(&format!("{}=\"index\"", row.loop_index_attr)));
            match row.loop_key_attr {
                Some(key) => assert!(out.contains(&format!("{}=\"{}\"", key, row.loop_key_value))),
                None => assert!(!out.contains("key=")),
            }
        }
    }

    #[test]
    fn map_binders_are_synthesized_when_missing() {
        let out = markup(
            Platform::Wx,
            r#"return <div>{this.state.rows.map(function (row) { return <span>{row}</span>; })}</div>;"#,
        );
        assert!(out.contains("wx:for-item=\"row\""));
        assert!(out.contains("wx:for-index=\"index\""));
    }

    #[test]
    fn click_becomes_platform_tap_binding_with_uid_beacon() {
        let out = markup(Platform::Wx, r#"return <div onClick={this.handleTap} />;"#);
        assert!(out.contains("bindtap=\"dispatchEvent\""), "{out}");
        assert!(out.contains("data-tap-uid=\"u1\""));
        assert!(out.contains("data-beacon-uid=\"default\""));

        let out = markup(Platform::Ali, r#"return <div onClick={this.handleTap} />;"#);
        assert!(out.contains("onTap=\"dispatchEvent\""), "{out}");

        let out = markup(Platform::Wx, r#"return <div catchLongPress={this.hold} />;"#);
        assert!(out.contains("catchlongpress=\"dispatchEvent\""), "{out}");
    }

    #[test]
    fn change_on_input_aliases_to_input_event() {
        let out = markup(Platform::Wx, r#"return <input onChange={this.onType} />;"#);
        assert!(out.contains("bindinput=\"dispatchEvent\""), "{out}");
        assert!(out.contains("data-input-uid="));
    }

    #[test]
    fn capitalized_tags_become_component_markers() {
        let (out, errors, components) = compile_on(
            Platform::Wx,
            r#"return <div><Row title={this.state.title} /></div>;"#,
        );
        assert!(errors.is_empty());
        let out = out.unwrap();
        assert!(out.contains("<use-component"));
        assert!(out.contains("is=\"Row\""));
        assert!(out.contains("data-instance-uid=\"u1\""));
        assert!(components.contains("Row"));
    }

    #[test]
    fn component_in_loop_suffixes_instance_uid_with_index() {
        let out = markup(
            Platform::Wx,
            r#"return <div>{this.state.list.map((item, i) => <Row item={item} />)}</div>;"#,
        );
        assert!(out.contains("data-instance-uid=\"{{'u1' + i}}\""), "{out}");
    }

    #[test]
    fn unsupported_attribute_value_reports_the_line() {
        let (out, errors, _) = compile_on(
            Platform::Wx,
            "return <div\n  style={{ color: 'red' }}\n/>;",
        );
        assert!(out.is_none());
        match &errors[0] {
            CompileError::Shape { line, .. } => assert_eq!(*line, 2),
            other => panic!("expected shape error, got {other:?}"),
        }
    }

    #[test]
    fn deterministic_uids_across_identical_runs() {
        let a = markup(
            Platform::Wx,
            r#"return <div onClick={this.go}><Row /></div>;"#,
        );
        let b = markup(
            Platform::Wx,
            r#"return <div onClick={this.go}><Row /></div>;"#,
        );
        assert_eq!(a, b);
    }
}
