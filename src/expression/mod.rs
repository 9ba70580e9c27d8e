//! Sandboxed expression language
//!
//! Expressions drive `javascript` conditions, derivations, custom validators
//! and HTTP request building. They look like JavaScript but are run by a
//! dedicated tokenizer → parser → tree-walking interpreter, so nothing in an
//! expression can reach outside the values and functions handed to it:
//!
//! - Root identifiers are limited to `formValue`, `fieldValue`, `$` (the
//!   enclosing array item), `$index` and, in HTTP response mappings,
//!   `response`.
//! - Functions come from a [`FunctionRegistry`]: the built-in pure helpers
//!   plus whatever the host registers.
//! - Property names that reach object internals (`constructor`, `__proto__`,
//!   …) are rejected when parsing.
//!
//! ```rust
//! use dynaform::expression::{EvalContext, Expression, FunctionRegistry};
//! use serde_json::json;
//!
//! let expr = Expression::parse("formValue.price * formValue.qty").unwrap();
//! let form = json!({"price": 2.5, "qty": 4});
//! let functions = FunctionRegistry::new();
//! let ctx = EvalContext::new(&form, &functions);
//! assert_eq!(expr.evaluate(&ctx).unwrap(), json!(10));
//! ```

pub mod ast;
pub mod functions;
pub mod interpreter;
pub mod lexer;
pub mod parser;

use crate::path::FieldPath;
use ast::Expr;
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub use functions::{CustomFunction, FunctionRegistry};
pub use interpreter::{truthy, EvalContext};

/// Errors raised while parsing or evaluating an expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Syntax error at {position} in '{expression}': {message}")]
    Syntax {
        expression: String,
        position: usize,
        message: String,
    },

    #[error("Identifier '{0}' is not available in expressions")]
    DisallowedIdentifier(String),

    #[error("Property '{0}' is not accessible in expressions")]
    DisallowedProperty(String),

    #[error("Method '{0}' is not allowed in expressions")]
    DisallowedMethod(String),

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Expression nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("Evaluation error: {0}")]
    Evaluation(String),
}

/// Root identifiers every expression may use
pub const BASE_ROOTS: &[&str] = &["formValue", "fieldValue", "$", "$index"];

/// A parsed expression, cheap to clone
#[derive(Debug, Clone)]
pub struct Expression {
    source: Arc<str>,
    ast: Arc<Expr>,
}

impl Expression {
    /// Parse an expression string
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let ast = parser::parse(source)?;
        Ok(Self {
            source: Arc::from(source),
            ast: Arc::new(ast),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Evaluate to a value
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Value, ExpressionError> {
        interpreter::evaluate(&self.ast, ctx)
    }

    /// Evaluate and coerce the result to a boolean
    pub fn evaluate_bool(&self, ctx: &EvalContext<'_>) -> Result<bool, ExpressionError> {
        self.evaluate(ctx).map(|v| truthy(&v))
    }

    /// Statically check identifiers and function names without evaluating.
    ///
    /// `roots` lists the root identifiers allowed in this position.
    pub fn check(&self, roots: &[&str], functions: &FunctionRegistry) -> Result<(), ExpressionError> {
        let mut result = Ok(());
        self.ast.walk(&mut |node| {
            if result.is_err() {
                return;
            }
            match node {
                Expr::Ident(name) if !roots.contains(&name.as_str()) => {
                    result = Err(ExpressionError::DisallowedIdentifier(name.clone()));
                }
                Expr::Call { function, .. } if !functions.contains(function) => {
                    result = Err(ExpressionError::UnknownFunction(function.clone()));
                }
                Expr::MethodCall { method, .. } if !interpreter::is_allowed_method(method) => {
                    result = Err(ExpressionError::DisallowedMethod(method.clone()));
                }
                _ => {}
            }
        });
        result
    }

    /// Field paths this expression reads
    pub fn references(&self) -> References {
        let mut refs = References::default();
        collect_references(&self.ast, &mut refs);
        refs.paths.sort();
        refs.paths.dedup();
        refs
    }
}

/// Values read by an expression
#[derive(Debug, Clone, Default, PartialEq)]
pub struct References {
    /// Absolute (`formValue.x`) and relative (`$.x`) paths
    pub paths: Vec<FieldPath>,
    /// Whether `fieldValue` is read
    pub field_value: bool,
}

fn collect_references(expr: &Expr, refs: &mut References) {
    if let Some(path) = static_path(expr) {
        refs.paths.push(path);
        collect_index_references(expr, refs);
        return;
    }

    match expr {
        Expr::Ident(name) if name == "fieldValue" => refs.field_value = true,
        Expr::Literal(_) | Expr::Ident(_) => {}
        Expr::Array(items) => items.iter().for_each(|e| collect_references(e, refs)),
        Expr::Member { object, .. } => collect_references(object, refs),
        Expr::Index { object, index, .. } => {
            collect_references(object, refs);
            collect_references(index, refs);
        }
        Expr::Call { args, .. } => args.iter().for_each(|e| collect_references(e, refs)),
        Expr::MethodCall { object, args, .. } => {
            collect_references(object, refs);
            args.iter().for_each(|e| collect_references(e, refs));
        }
        Expr::Unary { operand, .. } => collect_references(operand, refs),
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            collect_references(left, refs);
            collect_references(right, refs);
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            collect_references(test, refs);
            collect_references(consequent, refs);
            collect_references(alternate, refs);
        }
    }
}

/// References inside dynamic indices of an access chain (`formValue.a[formValue.i]`)
fn collect_index_references(expr: &Expr, refs: &mut References) {
    match expr {
        Expr::Member { object, .. } => collect_index_references(object, refs),
        Expr::Index { object, index, .. } => {
            collect_index_references(object, refs);
            collect_references(index, refs);
        }
        _ => {}
    }
}

/// The longest static path of a `formValue…` or `$…` access chain.
///
/// A dynamic index cuts the chain: `formValue.items[i].price` depends on
/// `items` as a whole.
fn static_path(expr: &Expr) -> Option<FieldPath> {
    match expr {
        Expr::Ident(name) if name == "formValue" => Some(FieldPath::root()),
        Expr::Ident(name) if name == "$" => FieldPath::parse("$").ok(),
        Expr::Member {
            object, property, ..
        } => {
            let base = static_path(object)?;
            if is_full_chain(object) {
                Some(base.child(property))
            } else {
                Some(base)
            }
        }
        Expr::Index { object, index, .. } => {
            let base = static_path(object)?;
            if !is_full_chain(object) {
                return Some(base);
            }
            match index.as_ref() {
                Expr::Literal(Value::Number(n)) => match n.as_u64() {
                    Some(i) => Some(base.index(i as usize)),
                    None => Some(base),
                },
                Expr::Literal(Value::String(key)) => Some(base.child(key)),
                _ => Some(base),
            }
        }
        _ => None,
    }
}

/// Whether every step down to the root is static
fn is_full_chain(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(name) => name == "formValue" || name == "$",
        Expr::Member { object, .. } => is_full_chain(object),
        Expr::Index { object, index, .. } => {
            is_full_chain(object)
                && match index.as_ref() {
                    Expr::Literal(Value::String(_)) => true,
                    Expr::Literal(Value::Number(n)) => n.as_u64().is_some(),
                    _ => false,
                }
        }
        _ => false,
    }
}

/// Convert an `f64` result to a JSON value.
///
/// Integral values become integers so `1 + 1` equals `json!(2)`; non-finite
/// results (division by zero) become `null`.
pub fn number_value(n: f64) -> Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if !n.is_finite() {
        return Value::Null;
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        return Value::from(n as i64);
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

/// Parse-once cache keyed by source text
#[derive(Debug, Default)]
pub struct ExpressionCache {
    entries: HashMap<String, Result<Expression, ExpressionError>>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, source: &str) -> Result<Expression, ExpressionError> {
        if let Some(entry) = self.entries.get(source) {
            return entry.clone();
        }
        let parsed = Expression::parse(source);
        self.entries.insert(source.to_string(), parsed.clone());
        parsed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
