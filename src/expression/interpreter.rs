//! Tree-walking interpreter
//!
//! Semantics follow JavaScript where it is cheap to do so (truthiness,
//! short-circuiting operators returning operands, string concatenation with
//! `+`) and stay total everywhere else: member access on `null` yields
//! `null`, arithmetic on non-numbers yields `null` instead of `NaN`.

use super::ast::{BinaryOp, Expr, LogicalOp, UnaryOp};
use super::functions::FunctionRegistry;
use super::{number_value, ExpressionError};
use serde_json::Value;
use std::cmp::Ordering;

const ALLOWED_METHODS: &[&str] = &[
    "includes",
    "startsWith",
    "endsWith",
    "toUpperCase",
    "toLowerCase",
    "trim",
];

pub fn is_allowed_method(name: &str) -> bool {
    ALLOWED_METHODS.contains(&name)
}

/// Everything an expression can see
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub form_value: &'a Value,
    pub field_value: Option<&'a Value>,
    /// The enclosing array item (`$`)
    pub item: Option<&'a Value>,
    /// Index of the enclosing array item (`$index`)
    pub index: Option<usize>,
    /// HTTP response body, only inside response mappings
    pub response: Option<&'a Value>,
    pub functions: &'a FunctionRegistry,
}

impl<'a> EvalContext<'a> {
    pub fn new(form_value: &'a Value, functions: &'a FunctionRegistry) -> Self {
        Self {
            form_value,
            field_value: None,
            item: None,
            index: None,
            response: None,
            functions,
        }
    }

    pub fn with_field_value(mut self, value: &'a Value) -> Self {
        self.field_value = Some(value);
        self
    }

    pub fn with_item(mut self, item: &'a Value, index: usize) -> Self {
        self.item = Some(item);
        self.index = Some(index);
        self
    }

    pub fn with_response(mut self, response: &'a Value) -> Self {
        self.response = Some(response);
        self
    }

    fn lookup(&self, name: &str) -> Result<Value, ExpressionError> {
        match name {
            "formValue" => Ok(self.form_value.clone()),
            "fieldValue" => Ok(self.field_value.cloned().unwrap_or(Value::Null)),
            "$" => self.item.cloned().ok_or_else(|| {
                ExpressionError::Evaluation("'$' used outside an array item".to_string())
            }),
            "$index" => self.index.map(Value::from).ok_or_else(|| {
                ExpressionError::Evaluation("'$index' used outside an array item".to_string())
            }),
            "response" if self.response.is_some() => {
                Ok(self.response.cloned().unwrap_or(Value::Null))
            }
            other => Err(ExpressionError::DisallowedIdentifier(other.to_string())),
        }
    }
}

/// Evaluate an expression tree
pub fn evaluate(expr: &Expr, ctx: &EvalContext<'_>) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => ctx.lookup(name),
        Expr::Array(items) => items
            .iter()
            .map(|item| evaluate(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Member {
            object, property, ..
        } => {
            let object = evaluate(object, ctx)?;
            Ok(member(&object, property))
        }
        Expr::Index { object, index, .. } => {
            let object = evaluate(object, ctx)?;
            let index = evaluate(index, ctx)?;
            index_value(&object, &index)
        }
        Expr::Call { function, args } => {
            let func = ctx
                .functions
                .get(function)
                .ok_or_else(|| ExpressionError::UnknownFunction(function.clone()))?;
            let args = args
                .iter()
                .map(|arg| evaluate(arg, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            func(args.as_slice()).map_err(|message| {
                ExpressionError::Evaluation(format!("{}(): {}", function, message))
            })
        }
        Expr::MethodCall {
            object,
            method,
            args,
            ..
        } => {
            if !is_allowed_method(method) {
                return Err(ExpressionError::DisallowedMethod(method.clone()));
            }
            let receiver = evaluate(object, ctx)?;
            let args = args
                .iter()
                .map(|arg| evaluate(arg, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(call_method(&receiver, method, &args))
        }
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, ctx)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!truthy(&value)),
                UnaryOp::Negate => to_number(&value)
                    .map(|n| number_value(-n))
                    .unwrap_or(Value::Null),
                UnaryOp::Plus => to_number(&value).map(number_value).unwrap_or(Value::Null),
            })
        }
        Expr::Binary { op, left, right } => {
            let left = evaluate(left, ctx)?;
            let right = evaluate(right, ctx)?;
            Ok(binary(*op, &left, &right))
        }
        Expr::Logical { op, left, right } => {
            let left = evaluate(left, ctx)?;
            match op {
                LogicalOp::And if !truthy(&left) => Ok(left),
                LogicalOp::Or if truthy(&left) => Ok(left),
                LogicalOp::Nullish if !left.is_null() => Ok(left),
                _ => evaluate(right, ctx),
            }
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            if truthy(&evaluate(test, ctx)?) {
                evaluate(consequent, ctx)
            } else {
                evaluate(alternate, ctx)
            }
        }
    }
}

/// JavaScript truthiness
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric coercion; `None` plays the role of `NaN`
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// String form used for concatenation and `string()`
pub fn to_display(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(to_display).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Equality with numbers compared by value (`1 === 1.0`)
pub fn strict_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| strict_equals(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| strict_equals(v, other)))
        }
        _ => left == right,
    }
}

/// `==`: strict equality plus number/string/bool coercion
pub fn loose_equals(left: &Value, right: &Value) -> bool {
    if strict_equals(left, right) {
        return true;
    }
    match (left, right) {
        (Value::Number(_) | Value::Bool(_), Value::String(_) | Value::Bool(_))
        | (Value::String(_), Value::Number(_) | Value::Bool(_)) => {
            match (to_number(left), to_number(right)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => false,
    }
}

/// Ordering for `< <= > >=`: strings lexicographically, otherwise numerically
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return Some(a.cmp(b));
    }
    if left.is_null() || right.is_null() {
        return None;
    }
    let a = to_number(left)?;
    let b = to_number(right)?;
    a.partial_cmp(&b)
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            if left.is_string() || right.is_string() {
                return Value::String(format!("{}{}", to_display(left), to_display(right)));
            }
            arithmetic(left, right, |a, b| a + b)
        }
        BinaryOp::Sub => arithmetic(left, right, |a, b| a - b),
        BinaryOp::Mul => arithmetic(left, right, |a, b| a * b),
        BinaryOp::Div => arithmetic(left, right, |a, b| a / b),
        BinaryOp::Rem => arithmetic(left, right, |a, b| a % b),
        BinaryOp::Lt => Value::Bool(compare(left, right) == Some(Ordering::Less)),
        BinaryOp::Le => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(compare(left, right) == Some(Ordering::Greater)),
        BinaryOp::Ge => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::LooseEq => Value::Bool(loose_equals(left, right)),
        BinaryOp::LooseNe => Value::Bool(!loose_equals(left, right)),
        BinaryOp::StrictEq => Value::Bool(strict_equals(left, right)),
        BinaryOp::StrictNe => Value::Bool(!strict_equals(left, right)),
    }
}

fn arithmetic(left: &Value, right: &Value, op: impl Fn(f64, f64) -> f64) -> Value {
    if left.is_null() || right.is_null() {
        return Value::Null;
    }
    match (to_number(left), to_number(right)) {
        (Some(a), Some(b)) => number_value(op(a, b)),
        _ => Value::Null,
    }
}

fn member(object: &Value, property: &str) -> Value {
    match (object, property) {
        (Value::Object(map), _) => map.get(property).cloned().unwrap_or(Value::Null),
        (Value::Array(items), "length") => Value::from(items.len()),
        (Value::String(s), "length") => Value::from(s.chars().count()),
        _ => Value::Null,
    }
}

fn index_value(object: &Value, index: &Value) -> Result<Value, ExpressionError> {
    Ok(match (object, index) {
        (Value::Object(map), Value::String(key)) => {
            super::parser::check_property(key)?;
            map.get(key).cloned().unwrap_or(Value::Null)
        }
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| items.get(i as usize))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::Array(_) | Value::String(_), Value::String(key)) if key == "length" => {
            member(object, key)
        }
        (Value::String(s), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| s.chars().nth(i as usize))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    })
}

fn call_method(receiver: &Value, method: &str, args: &[Value]) -> Value {
    let null = Value::Null;
    let arg = args.first().unwrap_or(&null);
    match (receiver, method) {
        (Value::String(s), "includes") => Value::Bool(s.contains(&to_display(arg))),
        (Value::Array(items), "includes") => {
            Value::Bool(items.iter().any(|item| strict_equals(item, arg)))
        }
        (Value::String(s), "startsWith") => Value::Bool(s.starts_with(&to_display(arg))),
        (Value::String(s), "endsWith") => Value::Bool(s.ends_with(&to_display(arg))),
        (Value::String(s), "toUpperCase") => Value::String(s.to_uppercase()),
        (Value::String(s), "toLowerCase") => Value::String(s.to_lowercase()),
        (Value::String(s), "trim") => Value::String(s.trim().to_string()),
        _ => Value::Null,
    }
}
