//! Helper functions callable from expressions
//!
//! Every function is pure: it receives evaluated arguments and returns a
//! value or an error message. The registry is owned by the form session, so
//! two forms can carry different custom functions without sharing state.

use super::interpreter::{compare, strict_equals, to_display, to_number, truthy};
use super::number_value;
use crate::path::NULL;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A function callable from expressions
pub type CustomFunction = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Name → function map
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, CustomFunction>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    /// Registry holding the built-in helpers
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.builtin("sum", sum);
        registry.builtin("min", |args| extremum(args, Ordering::Less));
        registry.builtin("max", |args| extremum(args, Ordering::Greater));
        registry.builtin("round", round);
        registry.builtin("floor", |args| unary_math(args, f64::floor));
        registry.builtin("ceil", |args| unary_math(args, f64::ceil));
        registry.builtin("abs", |args| unary_math(args, f64::abs));
        registry.builtin("length", length);
        registry.builtin("isEmpty", |args| Ok(Value::Bool(is_empty(arg(args, 0)))));
        registry.builtin("concat", concat);
        registry.builtin("upper", |args| map_string(args, str::to_uppercase));
        registry.builtin("lower", |args| map_string(args, str::to_lowercase));
        registry.builtin("trim", |args| map_string(args, |s| s.trim().to_string()));
        registry.builtin("number", |args| {
            Ok(to_number(arg(args, 0)).map(number_value).unwrap_or(Value::Null))
        });
        registry.builtin("string", |args| {
            Ok(match arg(args, 0) {
                Value::Null => Value::String(String::new()),
                other => Value::String(to_display(other)),
            })
        });
        registry.builtin("coalesce", |args| {
            Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null))
        });
        registry.builtin("includes", includes);
        registry
    }

    /// Registry without any functions
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    fn builtin(&mut self, name: &str, f: fn(&[Value]) -> Result<Value, String>) {
        self.functions.insert(name.to_string(), Arc::new(f));
    }

    /// Register (or replace) a function
    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&CustomFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

fn arg(args: &[Value], i: usize) -> &Value {
    args.get(i).unwrap_or(&NULL)
}

/// Empty in the form sense: null, blank string, empty list or object
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Either a single list argument or the arguments themselves
fn spread(args: &[Value]) -> &[Value] {
    match args {
        [Value::Array(items)] => items,
        _ => args,
    }
}

fn sum(args: &[Value]) -> Result<Value, String> {
    let total = match args {
        [Value::Array(items), Value::String(key)] => items
            .iter()
            .filter_map(|item| item.get(key).and_then(to_number))
            .sum::<f64>(),
        [_, _, ..] if !args[0].is_array() => spread(args).iter().filter_map(to_number).sum(),
        [Value::Array(items)] => items.iter().filter_map(to_number).sum(),
        [] | [Value::Null] => 0.0,
        [single] => to_number(single).unwrap_or(0.0),
        _ => return Err("expected a list and an optional key".to_string()),
    };
    Ok(number_value(total))
}

fn extremum(args: &[Value], wanted: Ordering) -> Result<Value, String> {
    let mut best: Option<&Value> = None;
    for value in spread(args).iter().filter(|v| !v.is_null()) {
        best = match best {
            Some(current) if compare(value, current) != Some(wanted) => Some(current),
            _ => Some(value),
        };
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}

fn round(args: &[Value]) -> Result<Value, String> {
    let Some(x) = to_number(arg(args, 0)) else {
        return Ok(Value::Null);
    };
    let digits = to_number(arg(args, 1)).unwrap_or(0.0).clamp(0.0, 15.0) as i32;
    let factor = 10f64.powi(digits);
    Ok(number_value((x * factor).round() / factor))
}

fn unary_math(args: &[Value], f: fn(f64) -> f64) -> Result<Value, String> {
    Ok(to_number(arg(args, 0))
        .map(|x| number_value(f(x)))
        .unwrap_or(Value::Null))
}

fn length(args: &[Value]) -> Result<Value, String> {
    Ok(Value::from(match arg(args, 0) {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => 0,
    }))
}

fn concat(args: &[Value]) -> Result<Value, String> {
    if args.iter().all(|a| a.is_array() || a.is_null()) && args.iter().any(Value::is_array) {
        let joined = args
            .iter()
            .filter_map(Value::as_array)
            .flatten()
            .cloned()
            .collect();
        return Ok(Value::Array(joined));
    }
    Ok(Value::String(
        args.iter()
            .filter(|a| !a.is_null())
            .map(to_display)
            .collect(),
    ))
}

fn map_string(args: &[Value], f: impl Fn(&str) -> String) -> Result<Value, String> {
    Ok(match arg(args, 0) {
        Value::String(s) => Value::String(f(s)),
        Value::Null => Value::Null,
        other => Value::String(f(&to_display(other))),
    })
}

fn includes(args: &[Value]) -> Result<Value, String> {
    let needle = arg(args, 1);
    Ok(Value::Bool(match arg(args, 0) {
        Value::Array(items) => items.iter().any(|item| strict_equals(item, needle)),
        Value::String(s) => truthy(needle) && s.contains(&to_display(needle)),
        _ => false,
    }))
}
