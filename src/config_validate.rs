//! Config validation
//!
//! Checks a form config ahead of time and reports every problem with a
//! stable code, instead of the runtime diagnostics a [`crate::Form`]
//! collects while it runs. Errors (`E0xx`) make parts of the form
//! unusable; warnings (`W0xx`) point at config that probably does not do
//! what was intended.

use crate::condition::{CompiledCondition, ConditionSpec};
use crate::config::{FieldConfig, FormConfig, ValidatorConfig};
use crate::deps::Dependencies;
use crate::derivation::{RuleGraph, RuleSource, RuleSpec};
use crate::field::{compile_fields, ContainerKind, FieldKind};
use crate::path::FieldPath;
use crate::tree::FieldTree;
use crate::validation;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::Path;

/// Severity level for validation issues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A validation issue found in a config
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    /// Field path the issue belongs to; empty for form-level issues
    pub field: String,
}

impl ConfigIssue {
    pub fn error(code: &str, message: &str, field: &str) -> Self {
        Self {
            severity: Severity::Error,
            code: code.to_string(),
            message: message.to_string(),
            field: field.to_string(),
        }
    }

    pub fn warning(code: &str, message: &str, field: &str) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            message: message.to_string(),
            field: field.to_string(),
        }
    }
}

/// Result of config validation
#[derive(Debug, Default)]
pub struct ConfigValidationResult {
    pub issues: Vec<ConfigIssue>,
    pub fields_checked: usize,
}

impl ConfigValidationResult {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

/// Validate a form config file (YAML or JSON by extension)
pub fn validate_form_file(path: &Path, deps: &Dependencies) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::default();
    let file_str = path.display().to_string();

    if !path.exists() {
        result
            .issues
            .push(ConfigIssue::error("E001", "File does not exist", &file_str));
        return result;
    }

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            result.issues.push(ConfigIssue::error(
                "E002",
                &format!("Cannot read file: {}", e),
                &file_str,
            ));
            return result;
        }
    };

    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let parsed = if is_json {
        FormConfig::from_json(&content)
    } else {
        FormConfig::from_yaml(&content)
    };
    match parsed {
        Ok(config) => validate_form_config(&config, deps),
        Err(e) => {
            result.issues.push(ConfigIssue::error(
                "E003",
                &format!("Invalid config: {}", e),
                &file_str,
            ));
            result
        }
    }
}

/// Validate a parsed form config against the registered collaborators
pub fn validate_form_config(config: &FormConfig, deps: &Dependencies) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::default();

    if config.fields.is_empty() {
        result
            .issues
            .push(ConfigIssue::warning("W001", "Form has no fields", ""));
    }
    if config.max_derivation_iterations == Some(0) {
        result.issues.push(ConfigIssue::error(
            "E011",
            "maxDerivationIterations must be at least 1",
            "",
        ));
    }
    if let Some(action) = config.submission.as_ref().and_then(|s| s.action.as_deref()) {
        if !deps.submit_actions.contains_key(action) {
            result.issues.push(ConfigIssue::warning(
                "W004",
                &format!("Submission action '{}' is not registered", action),
                "",
            ));
        }
    }

    validate_fields(&config.fields, &FieldPath::root(), false, deps, &mut result);
    validate_derivation_order(config, deps, &mut result);
    result
}

/// Check one sibling list; rows and pages share their parent's value level
fn validate_fields(
    fields: &[FieldConfig],
    base: &FieldPath,
    in_array: bool,
    deps: &Dependencies,
    result: &mut ConfigValidationResult,
) {
    let mut seen = BTreeSet::new();
    check_siblings(fields, base, in_array, deps, &mut seen, result);
}

fn check_siblings(
    fields: &[FieldConfig],
    base: &FieldPath,
    in_array: bool,
    deps: &Dependencies,
    seen: &mut BTreeSet<String>,
    result: &mut ConfigValidationResult,
) {
    for field in fields {
        result.fields_checked += 1;
        let path = base.child(&field.key);
        let at = path.to_string();

        if field.key.is_empty() {
            result
                .issues
                .push(ConfigIssue::error("E004", "Field key cannot be empty", &base.to_string()));
        }

        let kind = deps.field_types.kind(&field.field_type);
        let transparent = matches!(
            kind,
            Some(FieldKind::Container(ContainerKind::Row | ContainerKind::Page))
        );
        if !transparent && !field.key.is_empty() && !seen.insert(field.key.clone()) {
            result.issues.push(ConfigIssue::error(
                "E005",
                &format!("Duplicate key '{}' among siblings", field.key),
                &at,
            ));
        }

        let Some(kind) = kind else {
            result.issues.push(ConfigIssue::error(
                "E006",
                &format!("Unknown field type '{}'", field.field_type),
                &at,
            ));
            continue;
        };

        check_logic(field, &at, result);
        check_validators(field, &at, deps, result);
        check_derivations(field, &at, in_array, deps, result);

        match kind {
            FieldKind::Container(container) => {
                if field.fields.is_empty() && field.items.is_empty() {
                    result.issues.push(ConfigIssue::warning(
                        "W002",
                        "Container has no fields",
                        &at,
                    ));
                }
                match container {
                    ContainerKind::Row | ContainerKind::Page => {
                        check_siblings(&field.fields, base, in_array, deps, seen, result)
                    }
                    ContainerKind::Group => validate_fields(&field.fields, &path, in_array, deps, result),
                    ContainerKind::Array => {
                        validate_fields(&field.fields, &path, true, deps, result);
                        for item in &field.items {
                            validate_fields(item, &path, true, deps, result);
                        }
                    }
                }
            }
            _ if !field.fields.is_empty() || !field.items.is_empty() => {
                result.issues.push(ConfigIssue::warning(
                    "W003",
                    &format!("'{}' fields cannot have children; they are ignored", field.field_type),
                    &at,
                ));
            }
            _ => {}
        }
    }
}

fn check_logic(field: &FieldConfig, at: &str, result: &mut ConfigValidationResult) {
    for logic in &field.logic {
        if let ConditionSpec::Condition(condition) = &logic.condition {
            if let Err(e) = CompiledCondition::compile(condition) {
                result.issues.push(ConfigIssue::error(
                    "E007",
                    &format!("Invalid {:?} condition: {}", logic.kind, e),
                    at,
                ));
            }
        }
    }
}

fn check_validators(field: &FieldConfig, at: &str, deps: &Dependencies, result: &mut ConfigValidationResult) {
    let (_, problems) = validation::compile(field);
    for problem in problems {
        result.issues.push(ConfigIssue::error("E008", &problem, at));
    }

    for entry in &field.validators {
        let missing = match entry {
            ValidatorConfig::Custom {
                function_name: Some(name),
                ..
            } if !deps.validators.contains_key(name) => Some(name),
            ValidatorConfig::CustomAsync { function_name, .. }
                if !deps.async_validators.contains_key(function_name) =>
            {
                Some(function_name)
            }
            _ => None,
        };
        if let Some(name) = missing {
            result.issues.push(ConfigIssue::warning(
                "W005",
                &format!("Validator '{}' is not registered", name),
                at,
            ));
        }
    }
    let has_http = field
        .validators
        .iter()
        .any(|v| matches!(v, ValidatorConfig::CustomHttp { .. }));
    if has_http && deps.transport.is_none() {
        result.issues.push(ConfigIssue::warning(
            "W006",
            "HTTP validator configured but no transport is registered",
            at,
        ));
    }
}

fn check_derivations(
    field: &FieldConfig,
    at: &str,
    in_array: bool,
    deps: &Dependencies,
    result: &mut ConfigValidationResult,
) {
    let mut specs = Vec::new();
    if let Some(shorthand) = &field.derivation {
        match RuleSpec::shorthand(shorthand) {
            Ok(spec) => specs.push(spec),
            Err(e) => result
                .issues
                .push(ConfigIssue::error("E009", &format!("Invalid derivation: {}", e), at)),
        }
    }
    for entry in &field.derivations {
        match RuleSpec::compile(entry) {
            Ok(spec) => specs.push(spec),
            Err(e) => result
                .issues
                .push(ConfigIssue::error("E009", &format!("Invalid derivation: {}", e), at)),
        }
    }

    for spec in &specs {
        if !in_array && spec.target.as_ref().is_some_and(FieldPath::is_relative) {
            result.issues.push(ConfigIssue::error(
                "E010",
                "Relative derivation target outside an array item",
                at,
            ));
        }
        let missing = match &spec.source {
            RuleSource::Function(name) if !deps.derivations.contains_key(name) => Some(name),
            RuleSource::Async(name) if !deps.async_derivations.contains_key(name) => Some(name),
            _ => None,
        };
        if let Some(name) = missing {
            result.issues.push(ConfigIssue::warning(
                "W005",
                &format!("Derivation '{}' is not registered", name),
                at,
            ));
        }
    }
}

/// Derivations that form a cycle never settle on their own
fn validate_derivation_order(config: &FormConfig, deps: &Dependencies, result: &mut ConfigValidationResult) {
    let mut diagnostics = Vec::new();
    let defs = compile_fields(&config.fields, &deps.field_types, &FieldPath::root(), &mut diagnostics);
    let mut tree = FieldTree::new(defs);
    tree.rebuild(&Value::Object(Map::new()));
    let graph = RuleGraph::build(&tree, &mut diagnostics);

    let cyclic: BTreeSet<String> = graph
        .rules()
        .iter()
        .filter(|rule| graph.is_cyclic(rule.id))
        .map(|rule| rule.target.to_string())
        .collect();
    for target in cyclic {
        result.issues.push(ConfigIssue::warning(
            "W007",
            "Derivation is part of a dependency cycle; propagation stops at the iteration cap",
            &target,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn check(yaml: &str) -> ConfigValidationResult {
        validate_form_config(&FormConfig::from_yaml(yaml).unwrap(), &Dependencies::new())
    }

    #[test]
    fn test_validate_valid_config() {
        let result = check(
            r#"
fields:
  - key: name
    type: input
    required: true
  - key: contacts
    type: array
    fields:
      - key: phone
        type: input
        derivations:
          - targetField: $.label
            expression: "'Call ' + fieldValue"
      - key: label
        type: input
"#,
        );
        assert!(result.issues.is_empty(), "Expected no issues: {:?}", result.issues);
        assert_eq!(result.fields_checked, 4);
    }

    #[test]
    fn test_duplicate_keys_across_rows() {
        let result = check(
            r#"
fields:
  - key: first
    type: row
    fields:
      - key: name
        type: input
  - key: name
    type: input
"#,
        );
        assert!(result.has_code("E005"));
    }

    #[test]
    fn test_unknown_type_and_bad_pattern() {
        let result = check(
            r#"
fields:
  - key: a
    type: spinner
  - key: b
    type: input
    pattern: "[unclosed"
"#,
        );
        assert!(result.has_code("E006"));
        assert!(result.has_code("E008"));
        assert_eq!(result.error_count(), 2);
    }

    #[test]
    fn test_relative_target_outside_array() {
        let result = check(
            r#"
fields:
  - key: a
    type: input
    derivations:
      - targetField: $.b
        value: 1
"#,
        );
        assert!(result.has_code("E010"));
    }

    #[test]
    fn test_unregistered_collaborators_are_warnings() {
        let result = check(
            r#"
submission:
  action: save
fields:
  - key: email
    type: input
    validators:
      - type: customAsync
        functionName: emailFree
  - key: total
    type: input
    derivations:
      - functionName: sum
"#,
        );
        assert!(!result.has_errors());
        assert!(result.has_code("W004"));
        assert_eq!(result.issues.iter().filter(|i| i.code == "W005").count(), 2);
    }

    #[test]
    fn test_cycle_and_zero_cap() {
        let result = check(
            r#"
maxDerivationIterations: 0
fields:
  - key: a
    type: input
    derivation: "formValue.b"
  - key: b
    type: input
    derivation: "formValue.a"
"#,
        );
        assert!(result.has_code("E011"));
        assert_eq!(result.issues.iter().filter(|i| i.code == "W007").count(), 2);
    }

    #[test]
    fn test_validate_file() {
        let dir = TempDir::new().unwrap();
        let missing = validate_form_file(&dir.path().join("form.yaml"), &Dependencies::new());
        assert!(missing.has_code("E001"));

        let broken = dir.path().join("broken.yaml");
        std::fs::write(&broken, "fields: [").unwrap();
        assert!(validate_form_file(&broken, &Dependencies::new()).has_code("E003"));

        let good = dir.path().join("form.json");
        std::fs::write(&good, r#"{"fields": [{"key": "a", "type": "input"}]}"#).unwrap();
        assert!(validate_form_file(&good, &Dependencies::new()).issues.is_empty());
    }
}
