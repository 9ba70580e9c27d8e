//! Boolean conditions over the form value
//!
//! Conditions gate field logic (`hidden`, `disabled`, …), validators (`when`)
//! and derivations. They come in four shapes:
//!
//! ```yaml
//! type: fieldValue        # compare one field against a constant
//! fieldPath: age
//! operator: greaterOrEqual
//! value: 18
//! ---
//! type: and               # all of `conditions` (empty → true)
//! conditions: [...]
//! ---
//! type: or                # any of `conditions` (empty → false)
//! conditions: [...]
//! ---
//! type: javascript        # boolean expression, see `crate::expression`
//! expression: "formValue.total > 100"
//! ```
//!
//! Evaluation is pure. Numeric operators only compare JSON numbers; any other
//! operand makes them `false` rather than an error.

use crate::error::{Error, Result};
use crate::expression::{EvalContext, Expression, FunctionRegistry};
use crate::path::{self, FieldPath, Segment};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operators for `fieldValue` conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Equals,
    NotEquals,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Contains,
    StartsWith,
    EndsWith,
}

/// A condition as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    FieldValue {
        #[serde(rename = "fieldPath")]
        field_path: String,
        operator: Operator,
        #[serde(default)]
        value: Value,
    },
    And {
        #[serde(default)]
        conditions: Vec<Condition>,
    },
    Or {
        #[serde(default)]
        conditions: Vec<Condition>,
    },
    #[serde(alias = "expression")]
    Javascript { expression: String },
}

/// Either a constant or a condition (`hidden: true` vs `hidden: {type: ...}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ConditionSpec {
    Static(bool),
    Condition(Condition),
}

impl Condition {
    pub fn and(conditions: Vec<Condition>) -> Self {
        Condition::And { conditions }
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Condition::Or { conditions }
    }

    pub fn field_value(path: &str, operator: Operator, value: Value) -> Self {
        Condition::FieldValue {
            field_path: path.to_string(),
            operator,
            value,
        }
    }

    pub fn javascript(expression: &str) -> Self {
        Condition::Javascript {
            expression: expression.to_string(),
        }
    }
}

/// What a condition is evaluated against
#[derive(Clone, Copy)]
pub struct ConditionContext<'a> {
    pub form_value: &'a Value,
    /// Value of the field the condition belongs to
    pub field_value: Option<&'a Value>,
    /// Path of the enclosing array item, for `$.` paths and `$`
    pub scope: Option<&'a FieldPath>,
    pub functions: &'a FunctionRegistry,
}

impl<'a> ConditionContext<'a> {
    pub fn new(form_value: &'a Value, functions: &'a FunctionRegistry) -> Self {
        Self {
            form_value,
            field_value: None,
            scope: None,
            functions,
        }
    }

    pub fn with_field_value(mut self, value: Option<&'a Value>) -> Self {
        self.field_value = value;
        self
    }

    pub fn with_scope(mut self, scope: Option<&'a FieldPath>) -> Self {
        self.scope = scope;
        self
    }

    /// Expression context with `$`/`$index` bound to the enclosing item
    pub fn eval_context(&self) -> EvalContext<'a> {
        let mut ctx = EvalContext::new(self.form_value, self.functions);
        ctx.field_value = self.field_value;
        if let Some(scope) = self.scope {
            if let (Some(item), Some(Segment::Index(index))) =
                (path::resolve(self.form_value, scope), scope.last())
            {
                ctx = ctx.with_item(item, *index);
            }
        }
        ctx
    }
}

/// A condition with paths and expressions parsed once
#[derive(Debug, Clone)]
pub enum CompiledCondition {
    Always(bool),
    FieldValue {
        path: FieldPath,
        operator: Operator,
        value: Value,
    },
    And(Vec<CompiledCondition>),
    Or(Vec<CompiledCondition>),
    Expression(Expression),
}

impl CompiledCondition {
    pub fn compile(condition: &Condition) -> Result<Self> {
        Ok(match condition {
            Condition::FieldValue {
                field_path,
                operator,
                value,
            } => CompiledCondition::FieldValue {
                path: FieldPath::parse(field_path)?,
                operator: *operator,
                value: value.clone(),
            },
            Condition::And { conditions } => CompiledCondition::And(
                conditions.iter().map(Self::compile).collect::<Result<_>>()?,
            ),
            Condition::Or { conditions } => CompiledCondition::Or(
                conditions.iter().map(Self::compile).collect::<Result<_>>()?,
            ),
            Condition::Javascript { expression } => {
                CompiledCondition::Expression(Expression::parse(expression)?)
            }
        })
    }

    pub fn from_spec(spec: &ConditionSpec) -> Result<Self> {
        match spec {
            ConditionSpec::Static(value) => Ok(CompiledCondition::Always(*value)),
            ConditionSpec::Condition(condition) => Self::compile(condition),
        }
    }

    /// Paths read by this condition and whether it reads `fieldValue`
    pub fn references(&self) -> (Vec<FieldPath>, bool) {
        let mut paths = Vec::new();
        let mut field_value = false;
        self.collect_references(&mut paths, &mut field_value);
        (paths, field_value)
    }

    fn collect_references(&self, paths: &mut Vec<FieldPath>, field_value: &mut bool) {
        match self {
            CompiledCondition::Always(_) => {}
            CompiledCondition::FieldValue { path, .. } => paths.push(path.clone()),
            CompiledCondition::And(conditions) | CompiledCondition::Or(conditions) => {
                for condition in conditions {
                    condition.collect_references(paths, field_value);
                }
            }
            CompiledCondition::Expression(expression) => {
                let refs = expression.references();
                paths.extend(refs.paths);
                *field_value |= refs.field_value;
            }
        }
    }

    pub fn evaluate(&self, ctx: &ConditionContext<'_>) -> Result<bool> {
        match self {
            CompiledCondition::Always(value) => Ok(*value),
            CompiledCondition::FieldValue {
                path: field_path,
                operator,
                value,
            } => {
                let absolute = field_path.resolve_against(ctx.scope)?;
                let actual = path::resolve(ctx.form_value, &absolute).unwrap_or(&path::NULL);
                Ok(compare(*operator, actual, value))
            }
            CompiledCondition::And(conditions) => {
                for condition in conditions {
                    if !condition.evaluate(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            CompiledCondition::Or(conditions) => {
                for condition in conditions {
                    if condition.evaluate(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            CompiledCondition::Expression(expression) => expression
                .evaluate_bool(&ctx.eval_context())
                .map_err(Error::from),
        }
    }
}

/// Compile and evaluate in one step
pub fn evaluate(condition: &Condition, ctx: &ConditionContext<'_>) -> Result<bool> {
    CompiledCondition::compile(condition)?.evaluate(ctx)
}

/// Apply a `fieldValue` operator
pub fn compare(operator: Operator, actual: &Value, expected: &Value) -> bool {
    use crate::expression::interpreter::strict_equals;

    let numbers = || Some((actual.as_f64()?, expected.as_f64()?));
    match operator {
        Operator::Equals => strict_equals(actual, expected),
        Operator::NotEquals => !strict_equals(actual, expected),
        Operator::Greater => numbers().is_some_and(|(a, b)| a > b),
        Operator::GreaterOrEqual => numbers().is_some_and(|(a, b)| a >= b),
        Operator::Less => numbers().is_some_and(|(a, b)| a < b),
        Operator::LessOrEqual => numbers().is_some_and(|(a, b)| a <= b),
        Operator::Contains => match (actual, expected) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), _) => items.iter().any(|item| strict_equals(item, expected)),
            _ => false,
        },
        Operator::StartsWith => match (actual, expected) {
            (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
            _ => false,
        },
        Operator::EndsWith => match (actual, expected) {
            (Value::String(s), Value::String(suffix)) => s.ends_with(suffix.as_str()),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn eval(condition: &Condition, form: &Value) -> Result<bool> {
        let functions = FunctionRegistry::new();
        evaluate(condition, &ConditionContext::new(form, &functions))
    }

    #[rstest]
    #[case(Operator::Equals, json!("a"), json!("a"), true)]
    #[case(Operator::Equals, json!(1), json!(1.0), true)]
    #[case(Operator::NotEquals, json!("a"), json!("b"), true)]
    #[case(Operator::Greater, json!(5), json!(3), true)]
    #[case(Operator::GreaterOrEqual, json!(18), json!(18), true)]
    #[case(Operator::GreaterOrEqual, json!(17), json!(18), false)]
    #[case(Operator::Less, json!("5"), json!(10), false)]
    #[case(Operator::LessOrEqual, json!(null), json!(10), false)]
    #[case(Operator::Contains, json!("hello"), json!("ell"), true)]
    #[case(Operator::Contains, json!(["a", "b"]), json!("b"), true)]
    #[case(Operator::Contains, json!(42), json!("4"), false)]
    #[case(Operator::StartsWith, json!("business"), json!("bus"), true)]
    #[case(Operator::EndsWith, json!("file.pdf"), json!(".pdf"), true)]
    #[case(Operator::EndsWith, json!(null), json!(".pdf"), false)]
    fn test_operators(
        #[case] operator: Operator,
        #[case] actual: Value,
        #[case] expected: Value,
        #[case] result: bool,
    ) {
        assert_eq!(compare(operator, &actual, &expected), result);
    }

    #[test]
    fn test_identity_elements() {
        let form = json!({});
        assert!(eval(&Condition::and(vec![]), &form).unwrap());
        assert!(!eval(&Condition::or(vec![]), &form).unwrap());
    }

    #[test]
    fn test_short_circuit() {
        // the second operand would fail on a disallowed identifier
        let form = json!({"a": 1});
        let failing = Condition::javascript("window.alert");
        let and = Condition::and(vec![
            Condition::field_value("a", Operator::Equals, json!(2)),
            failing.clone(),
        ]);
        assert!(!eval(&and, &form).unwrap());

        let or = Condition::or(vec![
            Condition::field_value("a", Operator::Equals, json!(1)),
            failing.clone(),
        ]);
        assert!(eval(&or, &form).unwrap());
        assert!(eval(&failing, &form).is_err());
    }

    #[test]
    fn test_missing_field_reads_null() {
        let form = json!({});
        let c = Condition::field_value("user.age", Operator::Equals, Value::Null);
        assert!(eval(&c, &form).unwrap());
    }

    #[test]
    fn test_relative_path_in_scope() {
        let form = json!({"items": [{"kind": "a"}, {"kind": "b"}]});
        let functions = FunctionRegistry::new();
        let scope = FieldPath::parse("items[1]").unwrap();
        let ctx = ConditionContext::new(&form, &functions).with_scope(Some(&scope));
        let c = Condition::field_value("$.kind", Operator::Equals, json!("b"));
        assert!(evaluate(&c, &ctx).unwrap());

        let js = Condition::javascript("$.kind === 'b' && $index === 1");
        assert!(evaluate(&js, &ctx).unwrap());

        let outside = ConditionContext::new(&form, &functions);
        assert!(matches!(
            evaluate(&c, &outside),
            Err(Error::Path(crate::path::PathError::NoEnclosingScope { .. }))
        ));
    }

    #[test]
    fn test_references() {
        let c = CompiledCondition::compile(&Condition::or(vec![
            Condition::field_value("accountType", Operator::Equals, json!("business")),
            Condition::javascript("fieldValue > formValue.limit"),
        ]))
        .unwrap();
        let (paths, field_value) = c.references();
        assert_eq!(
            paths,
            vec![
                FieldPath::parse("accountType").unwrap(),
                FieldPath::parse("limit").unwrap()
            ]
        );
        assert!(field_value);
    }

    #[test]
    fn test_deserialize_shapes() {
        let c: Condition = serde_json::from_value(json!({
            "type": "and",
            "conditions": [
                {"type": "fieldValue", "fieldPath": "accountType", "operator": "equals", "value": "business"},
                {"type": "javascript", "expression": "formValue.age >= 18"}
            ]
        }))
        .unwrap();
        let form = json!({"accountType": "business", "age": 20});
        assert!(eval(&c, &form).unwrap());

        let spec: ConditionSpec = serde_json::from_value(json!(true)).unwrap();
        assert_eq!(spec, ConditionSpec::Static(true));
    }
}
