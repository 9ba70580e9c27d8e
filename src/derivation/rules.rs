//! Derivation rule definitions
//!
//! A [`RuleSpec`] is one compiled `derivations` entry (or the `derivation`
//! shorthand). It is still unplaced: the target and dependencies may be
//! relative to an array item. [`super::graph`] places it for each field
//! instance.

use crate::condition::CompiledCondition;
use crate::config::{DerivationConfig, OnErrorConfig};
use crate::expression::Expression;
use crate::path::FieldPath;
use serde_json::Value;

/// Where a derived value comes from
#[derive(Debug, Clone)]
pub enum RuleSource {
    Value(Value),
    Expression(Expression),
    /// Registered synchronous derivation
    Function(String),
    /// Registered async derivation
    Async(String),
}

#[derive(Debug, Clone)]
pub struct RuleSpec {
    /// `None` targets the declaring field
    pub target: Option<FieldPath>,
    pub source: RuleSource,
    pub depends_on: Vec<FieldPath>,
    pub condition: Option<CompiledCondition>,
    pub stop_on_user_override: bool,
    pub re_engage_on_dependency_change: bool,
    pub debounce_ms: u64,
    /// Failure policy of an async source
    pub on_error: OnErrorConfig,
}

impl RuleSpec {
    /// `derivation: "<expr>"` on the target field
    pub fn shorthand(source: &str) -> Result<Self, String> {
        Ok(Self {
            target: None,
            source: RuleSource::Expression(Expression::parse(source).map_err(|e| e.to_string())?),
            depends_on: Vec::new(),
            condition: None,
            stop_on_user_override: false,
            re_engage_on_dependency_change: false,
            debounce_ms: 0,
            on_error: OnErrorConfig::default(),
        })
    }

    pub fn compile(config: &DerivationConfig) -> Result<Self, String> {
        let source = match (
            &config.expression,
            &config.value,
            &config.function_name,
            &config.async_function_name,
        ) {
            (Some(expression), None, None, None) => {
                RuleSource::Expression(Expression::parse(expression).map_err(|e| e.to_string())?)
            }
            (None, Some(value), None, None) => RuleSource::Value(value.clone()),
            (None, None, Some(name), None) => RuleSource::Function(name.clone()),
            (None, None, None, Some(name)) => RuleSource::Async(name.clone()),
            (None, None, None, None) => {
                return Err(
                    "derivation needs one of 'expression', 'value', 'functionName' or 'asyncFunctionName'"
                        .to_string(),
                )
            }
            _ => {
                return Err(
                    "derivation sets more than one of 'expression', 'value', 'functionName', 'asyncFunctionName'"
                        .to_string(),
                )
            }
        };

        let target = config
            .target_field
            .as_deref()
            .map(FieldPath::parse)
            .transpose()
            .map_err(|e| e.to_string())?;
        let depends_on = config
            .depends_on
            .iter()
            .map(|p| FieldPath::parse(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;
        let condition = config
            .condition
            .as_ref()
            .map(CompiledCondition::from_spec)
            .transpose()
            .map_err(|e| e.to_string())?;

        Ok(Self {
            target,
            source,
            depends_on,
            condition,
            stop_on_user_override: config.stop_on_user_override,
            re_engage_on_dependency_change: config.re_engage_on_dependency_change,
            debounce_ms: config.debounce_ms.unwrap_or(0),
            on_error: config.on_error.clone().unwrap_or_default(),
        })
    }

    /// Whether the rule writes somewhere other than the declaring field
    pub fn is_fan_out(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_async(&self) -> bool {
        matches!(self.source, RuleSource::Async(_))
    }

    /// Paths read by the source and the gate, possibly relative
    pub fn references(&self) -> (Vec<FieldPath>, bool) {
        let mut paths = self.depends_on.clone();
        let mut field_value = false;
        if let RuleSource::Expression(expression) = &self.source {
            let refs = expression.references();
            paths.extend(refs.paths);
            field_value |= refs.field_value;
        }
        if let Some(condition) = &self.condition {
            let (condition_paths, reads_field) = condition.references();
            paths.extend(condition_paths);
            field_value |= reads_field;
        }
        paths.sort();
        paths.dedup();
        (paths, field_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: serde_json::Value) -> DerivationConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_compile_expression_rule() {
        let rule = RuleSpec::compile(&config(json!({
            "targetField": "$.total",
            "expression": "$.price * $.qty",
            "dependsOn": ["taxRate"],
            "condition": {"type": "fieldValue", "fieldPath": "mode", "operator": "equals", "value": "auto"}
        })))
        .unwrap();
        assert!(rule.is_fan_out());
        let (paths, field_value) = rule.references();
        let shown: Vec<String> = paths.iter().map(ToString::to_string).collect();
        assert_eq!(shown, vec!["mode", "taxRate", "$.price", "$.qty"]);
        assert!(!field_value);
    }

    #[test]
    fn test_exactly_one_source() {
        assert!(RuleSpec::compile(&config(json!({}))).is_err());
        assert!(RuleSpec::compile(&config(json!({"value": 1, "expression": "2"}))).is_err());
        let rule = RuleSpec::compile(&config(json!({"asyncFunctionName": "lookup"}))).unwrap();
        assert!(rule.is_async());
    }

    #[test]
    fn test_shorthand_reads_field_value() {
        let rule = RuleSpec::shorthand("fieldValue ?? formValue.fallback").unwrap();
        let (paths, field_value) = rule.references();
        assert_eq!(paths, vec![FieldPath::parse("fallback").unwrap()]);
        assert!(field_value);
    }
}
