//! Form configuration
//!
//! A [`FormConfig`] is a declarative, JSON-compatible document describing the
//! field tree and its logic. It loads from JSON or YAML:
//!
//! ```yaml
//! maxDerivationIterations: 10
//! defaultValidationMessages:
//!   required: "{{fieldLabel}} is required"
//! fields:
//!   - key: accountType
//!     type: select
//!   - key: company
//!     type: input
//!     validators:
//!       - type: required
//!         when:
//!           type: fieldValue
//!           fieldPath: accountType
//!           operator: equals
//!           value: business
//! ```
//!
//! Options resolve field override → form value → [`EngineDefaults`]; the
//! result is a [`MergedOptions`].

use crate::condition::{Condition, ConditionSpec};
use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Root configuration of one form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[schemars(title = "Dynaform FormConfig", description = "Declarative form definition")]
pub struct FormConfig {
    /// Top-level fields
    #[serde(default)]
    pub fields: Vec<FieldConfig>,

    /// Messages by error kind, used when a field has none of its own
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_validation_messages: BTreeMap<String, String>,

    /// Names of host functions this form expects to be registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_fn_config: Option<CustomFnConfig>,

    /// Carried through untouched; not interpreted by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<SubmissionConfig>,

    /// Disable every field
    #[serde(default)]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_derivation_iterations: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_value_if_hidden: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_value_if_disabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_value_if_readonly: Option<bool>,
}

/// Host function names referenced by the form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomFnConfig {
    #[serde(default)]
    pub custom_functions: Vec<String>,
    #[serde(default)]
    pub validators: Vec<String>,
    #[serde(default)]
    pub async_validators: Vec<String>,
    #[serde(default)]
    pub derivations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionConfig {
    /// Registered submit action; the default action when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Refuse to submit while any field has errors
    #[serde(default = "default_true")]
    pub require_valid: bool,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            action: None,
            require_valid: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// One node of the field tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    pub key: String,

    /// `page`, `row`, `group`, `array` or a leaf type such as `input`
    #[serde(rename = "type")]
    pub field_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Renderer properties, carried untouched
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, Value>,

    /// Initial value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<ValidatorConfig>,

    /// Messages by error kind for this field
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub validation_messages: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logic: Vec<LogicConfig>,

    /// Shorthand for a derivation targeting this field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derivations: Vec<DerivationConfig>,

    /// Children of a container; the item template of an array
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldConfig>,

    /// Explicit field sets for the first items of an array
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Vec<FieldConfig>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_value_if_hidden: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_value_if_disabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_value_if_readonly: Option<bool>,
}

impl FieldConfig {
    pub fn new(key: &str, field_type: &str) -> Self {
        Self {
            key: key.to_string(),
            field_type: field_type.to_string(),
            ..Self::default()
        }
    }

    /// Label for messages, falling back to the key
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.key)
    }
}

/// Conditional behaviour of a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LogicConfig {
    #[serde(rename = "type")]
    pub kind: LogicKind,
    pub condition: ConditionSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum LogicKind {
    Hidden,
    Disabled,
    Readonly,
    Required,
}

/// A validator entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ValidatorConfig {
    Required {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<Condition>,
    },
    Email {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<Condition>,
    },
    Min {
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<Condition>,
    },
    Max {
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<Condition>,
    },
    MinLength {
        value: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<Condition>,
    },
    MaxLength {
        value: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<Condition>,
    },
    Pattern {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<Condition>,
    },
    /// Sync check: an expression that is truthy when valid, or a registered
    /// validator function
    Custom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expression: Option<String>,
        #[serde(
            rename = "functionName",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        function_name: Option<String>,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        params: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<Condition>,
    },
    CustomAsync {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        #[serde(rename = "functionName")]
        function_name: String,
        #[serde(rename = "onError", default)]
        on_error: OnErrorConfig,
        #[serde(rename = "debounceMs", default, skip_serializing_if = "Option::is_none")]
        debounce_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<Condition>,
    },
    CustomHttp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        http: HttpRequestConfig,
        #[serde(rename = "responseMapping")]
        response_mapping: ResponseMapping,
        #[serde(rename = "onError", default)]
        on_error: OnErrorConfig,
        #[serde(rename = "debounceMs", default, skip_serializing_if = "Option::is_none")]
        debounce_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<Condition>,
    },
}

impl ValidatorConfig {
    pub fn when(&self) -> Option<&Condition> {
        match self {
            ValidatorConfig::Required { when }
            | ValidatorConfig::Email { when }
            | ValidatorConfig::Min { when, .. }
            | ValidatorConfig::Max { when, .. }
            | ValidatorConfig::MinLength { when, .. }
            | ValidatorConfig::MaxLength { when, .. }
            | ValidatorConfig::Pattern { when, .. }
            | ValidatorConfig::Custom { when, .. }
            | ValidatorConfig::CustomAsync { when, .. }
            | ValidatorConfig::CustomHttp { when, .. } => when.as_ref(),
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(
            self,
            ValidatorConfig::CustomAsync { .. } | ValidatorConfig::CustomHttp { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// How to build the request of an HTTP validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestConfig {
    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    /// Query parameter name → expression
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query_params: BTreeMap<String, String>,

    /// Body property name → expression; no body when empty
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub body: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// How to read the response of an HTTP validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMapping {
    /// Expression over `response` that is truthy when the value is valid
    pub valid_when: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// Error parameter name → expression
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub error_params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum OnErrorAction {
    /// Treat a failure as "no error"; it is still reported as a diagnostic
    #[default]
    Suppress,
    /// Turn a failure into a field error
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnErrorConfig {
    #[serde(default)]
    pub action: OnErrorAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// A derivation rule
///
/// Declared on the target (`targetField` omitted, reading `formValue.*`) or
/// on a source field with `targetField` naming where the result goes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DerivationConfig {
    /// Absolute path, or `$.key` inside an array item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    /// Static value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_function_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Gate; the rule is skipped while false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionSpec>,

    #[serde(default)]
    pub stop_on_user_override: bool,

    #[serde(default)]
    pub re_engage_on_dependency_change: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,

    /// What a failed async derivation does to the target field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnErrorConfig>,
}

impl FormConfig {
    /// Parse from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_norway::from_str(yaml).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Load a `.json`, `.yaml` or `.yml` file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Err(Error::ConfigParse(format!(
                "Unsupported config file extension: {}",
                path.display()
            ))),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_norway::to_string(self).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Hash of the configuration for change detection
    pub fn hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let content = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("sha256:{}", hex::encode(&hasher.finalize()[..8]))
    }

    /// JSON Schema of the configuration format
    pub fn json_schema() -> Result<Value> {
        let schema = schemars::schema_for!(FormConfig);
        Ok(serde_json::to_value(&schema)?)
    }

    /// Resolve form-level options against engine defaults
    pub fn options(&self, defaults: &EngineDefaults) -> MergedOptions {
        MergedOptions {
            max_derivation_iterations: self
                .max_derivation_iterations
                .unwrap_or(defaults.max_derivation_iterations),
            exclude_value_if_hidden: self
                .exclude_value_if_hidden
                .unwrap_or(defaults.exclude_value_if_hidden),
            exclude_value_if_disabled: self
                .exclude_value_if_disabled
                .unwrap_or(defaults.exclude_value_if_disabled),
            exclude_value_if_readonly: self
                .exclude_value_if_readonly
                .unwrap_or(defaults.exclude_value_if_readonly),
            disabled: self.disabled,
        }
    }
}

/// Library-wide defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDefaults {
    pub max_derivation_iterations: usize,
    pub exclude_value_if_hidden: bool,
    pub exclude_value_if_disabled: bool,
    pub exclude_value_if_readonly: bool,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            max_derivation_iterations: 10,
            exclude_value_if_hidden: true,
            exclude_value_if_disabled: true,
            exclude_value_if_readonly: false,
        }
    }
}

/// Options of one form after merging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedOptions {
    pub max_derivation_iterations: usize,
    pub exclude_value_if_hidden: bool,
    pub exclude_value_if_disabled: bool,
    pub exclude_value_if_readonly: bool,
    pub disabled: bool,
}

impl Default for MergedOptions {
    fn default() -> Self {
        FormConfig::default().options(&EngineDefaults::default())
    }
}

/// Which states drop a field from the submitted value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusionPolicy {
    pub if_hidden: bool,
    pub if_disabled: bool,
    pub if_readonly: bool,
}

impl MergedOptions {
    /// Apply field-level overrides
    pub fn exclusion_for(&self, field: &FieldConfig) -> ExclusionPolicy {
        ExclusionPolicy {
            if_hidden: field
                .exclude_value_if_hidden
                .unwrap_or(self.exclude_value_if_hidden),
            if_disabled: field
                .exclude_value_if_disabled
                .unwrap_or(self.exclude_value_if_disabled),
            if_readonly: field
                .exclude_value_if_readonly
                .unwrap_or(self.exclude_value_if_readonly),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const YAML: &str = r#"
maxDerivationIterations: 4
excludeValueIfHidden: false
defaultValidationMessages:
  required: "{{fieldLabel}} is required"
fields:
  - key: accountType
    type: select
    value: personal
  - key: company
    type: input
    label: Company
    excludeValueIfHidden: true
    validators:
      - type: required
        when:
          type: fieldValue
          fieldPath: accountType
          operator: equals
          value: business
      - type: minLength
        value: 2
    logic:
      - type: hidden
        condition:
          type: javascript
          expression: "formValue.accountType !== 'business'"
      - type: readonly
        condition: false
"#;

    #[test]
    fn test_from_yaml() {
        let config = FormConfig::from_yaml(YAML).unwrap();
        assert_eq!(config.fields.len(), 2);
        let company = &config.fields[1];
        assert_eq!(company.display_label(), "Company");
        assert_eq!(company.validators.len(), 2);
        assert!(company.validators[0].when().is_some());
        assert_eq!(company.logic[0].kind, LogicKind::Hidden);
        assert_eq!(company.logic[1].condition, ConditionSpec::Static(false));
    }

    #[test]
    fn test_option_precedence() {
        let config = FormConfig::from_yaml(YAML).unwrap();
        let options = config.options(&EngineDefaults::default());
        assert_eq!(options.max_derivation_iterations, 4);
        assert!(!options.exclude_value_if_hidden);
        assert!(options.exclude_value_if_disabled);

        let account = options.exclusion_for(&config.fields[0]);
        let company = options.exclusion_for(&config.fields[1]);
        assert!(!account.if_hidden);
        assert!(company.if_hidden);
        assert!(!company.if_readonly);
    }

    #[test]
    fn test_defaults() {
        let options = MergedOptions::default();
        assert_eq!(options.max_derivation_iterations, 10);
        assert!(options.exclude_value_if_hidden);
        assert!(!options.exclude_value_if_readonly);
    }

    #[test]
    fn test_json_round_trip_preserves_hash() {
        let config = FormConfig::from_yaml(YAML).unwrap();
        let reparsed = FormConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(config, reparsed);
        assert_eq!(config.hash(), reparsed.hash());
    }

    #[test]
    fn test_http_validator_shape() {
        let v: ValidatorConfig = serde_json::from_value(json!({
            "type": "customHttp",
            "kind": "usernameTaken",
            "http": {
                "url": "/api/users/check",
                "queryParams": {"name": "fieldValue"}
            },
            "responseMapping": {"validWhen": "response.available"},
            "debounceMs": 300
        }))
        .unwrap();
        assert!(v.is_async());
        let ValidatorConfig::CustomHttp { http, on_error, debounce_ms, .. } = v else {
            panic!("expected customHttp");
        };
        assert_eq!(http.method, HttpMethod::Get);
        assert_eq!(on_error.action, OnErrorAction::Suppress);
        assert_eq!(debounce_ms, Some(300));
    }

    #[test]
    fn test_json_schema_mentions_fields() {
        let schema = FormConfig::json_schema().unwrap();
        let text = schema.to_string();
        assert!(text.contains("maxDerivationIterations"));
        assert!(text.contains("fieldPath"));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = FormConfig::from_file(Path::new("form.toml")).unwrap_err();
        assert!(matches!(err, Error::Io(_) | Error::ConfigParse(_)));
    }
}
