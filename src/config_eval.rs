//! Restricted literal evaluation for component `config` properties.
//!
//! Only object/array/literal shapes are accepted; anything that would need
//! evaluation fails closed with a shape error instead of running code. A
//! non-object top-level config degrades to an empty object at the call
//! site.

use oxc_ast::ast::{
    ArrayExpressionElement, Expression, ObjectPropertyKind, PropertyKey, UnaryOperator,
};
use oxc_span::GetSpan;
use serde_json::{Map, Number, Value};

use crate::error::{source_line, CompileError};

/// Evaluate a config initializer into a JSON object. Errors name the line
/// of the offending node.
pub fn evaluate_config(expr: &Expression, source: &str) -> Result<Map<String, Value>, CompileError> {
    match evaluate_literal(expr, source)? {
        Value::Object(map) => Ok(map),
        _ => Err(CompileError::shape(
            "`config` must be a plain object literal",
            source_line(source, expr.span().start),
        )),
    }
}

pub fn evaluate_literal(expr: &Expression, source: &str) -> Result<Value, CompileError> {
    match expr {
        Expression::ObjectExpression(obj) => {
            let mut map = Map::new();
            for property in &obj.properties {
                match property {
                    ObjectPropertyKind::ObjectProperty(prop) => {
                        let key = property_key_name(&prop.key).ok_or_else(|| {
                            CompileError::shape(
                                "config keys must be identifiers or string literals",
                                source_line(source, prop.key.span().start),
                            )
                        })?;
                        map.insert(key, evaluate_literal(&prop.value, source)?);
                    }
                    ObjectPropertyKind::SpreadProperty(spread) => {
                        return Err(CompileError::shape(
                            "spread is not allowed in config literals",
                            source_line(source, spread.span.start),
                        ));
                    }
                }
            }
            Ok(Value::Object(map))
        }
        Expression::ArrayExpression(arr) => {
            let mut items = Vec::new();
            for element in &arr.elements {
                match element {
                    ArrayExpressionElement::Elision(_) => items.push(Value::Null),
                    _ => match element.as_expression() {
                        Some(e) => items.push(evaluate_literal(e, source)?),
                        None => {
                            return Err(CompileError::shape(
                                "spread is not allowed in config literals",
                                source_line(source, arr.span.start),
                            ));
                        }
                    },
                }
            }
            Ok(Value::Array(items))
        }
        Expression::StringLiteral(s) => Ok(Value::String(s.value.to_string())),
        Expression::NumericLiteral(n) => Ok(number_value(n.value)),
        Expression::BooleanLiteral(b) => Ok(Value::Bool(b.value)),
        Expression::NullLiteral(_) => Ok(Value::Null),
        Expression::Identifier(id) if id.name == "undefined" => Ok(Value::Null),
        Expression::UnaryExpression(unary) if unary.operator == UnaryOperator::UnaryNegation => {
            match &unary.argument {
                Expression::NumericLiteral(n) => Ok(number_value(-n.value)),
                _ => Err(CompileError::shape(
                    "only numeric literals may be negated in config literals",
                    source_line(source, unary.span.start),
                )),
            }
        }
        other => Err(CompileError::shape(
            "config literals may only contain objects, arrays and literals",
            source_line(source, other.span().start),
        )),
    }
}

fn property_key_name(key: &PropertyKey) -> Option<String> {
    match key {
        PropertyKey::StaticIdentifier(id) => Some(id.name.to_string()),
        PropertyKey::StringLiteral(s) => Some(s.value.to_string()),
        _ => None,
    }
}

fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::Number(Number::from(value as i64))
    } else {
        Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Page-level config normalization: the navigation bar text style only
/// accepts the named colors, so hex shorthands are folded onto them and
/// anything else falls back to white.
pub fn normalize_page_config(config: &mut Map<String, Value>) {
    const KEY: &str = "navigationBarTextStyle";
    if let Some(Value::String(color)) = config.get(KEY) {
        let normalized = match color.as_str() {
            "#fff" | "white" => "white",
            "#000" | "black" => "black",
            _ => "white",
        };
        config.insert(KEY.to_string(), Value::String(normalized.to_string()));
    }
}
