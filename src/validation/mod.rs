//! Validator pipeline
//!
//! Each value-bearing field carries an ordered list of validators: the
//! shorthands (`email`, `min`, …) first, then the `validators` entries in
//! declaration order, and errors come out in that order. A field that is
//! required by its static flag or by `required` logic reports `required`
//! ahead of everything else; a `required` entry reports it at its own
//! position. Either way it is reported at most once.
//!
//! Synchronous validators run on every refresh. Async (`customAsync`) and
//! HTTP (`customHttp`) validators run as [`ValidationTask`]s, only when the
//! synchronous result is valid, and their last accepted result is merged
//! with the synchronous errors as long as the validator that produced it is
//! still active.
//!
//! A validator whose `when` condition is false is skipped: it contributes
//! nothing, which is different from running and passing only in that it is
//! never evaluated.

pub mod builtin;
pub mod http;
pub mod messages;
pub mod task;

use crate::condition::{CompiledCondition, ConditionContext};
use crate::config::{FieldConfig, OnErrorAction, OnErrorConfig, ValidatorConfig};
use crate::deps::{ValidatorFn, ValidatorInput};
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::expression::{EvalContext, Expression, FunctionRegistry};
use crate::path::FieldPath;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub use http::{HttpRequest, HttpValidator};
pub use messages::{resolve as resolve_message, ResolvedMessage, GENERIC_MESSAGE};
pub use task::{ValidationCompletion, ValidationTask};

/// A validation failure: `{kind, params?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl ValidationError {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, name: &str, value: Value) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    pub fn with_params(mut self, params: &Map<String, Value>) -> Self {
        for (name, value) in params {
            self.params.entry(name.clone()).or_insert_with(|| value.clone());
        }
        self
    }
}

/// What a compiled validator checks
#[derive(Debug, Clone)]
pub enum Check {
    Required,
    Email,
    Min(f64),
    Max(f64),
    MinLength(usize),
    MaxLength(usize),
    Pattern { regex: Regex, shown: String },
    Expression {
        kind: String,
        expression: Expression,
        params: Map<String, Value>,
    },
    Function {
        kind: Option<String>,
        name: String,
        params: Map<String, Value>,
    },
    Async {
        kind: Option<String>,
        name: String,
        on_error: OnErrorConfig,
        debounce_ms: u64,
    },
    Http {
        validator: HttpValidator,
        debounce_ms: u64,
    },
}

#[derive(Debug, Clone)]
pub struct CompiledValidator {
    pub when: Option<CompiledCondition>,
    pub check: Check,
}

impl CompiledValidator {
    fn new(check: Check) -> Self {
        Self { when: None, check }
    }

    pub fn is_async(&self) -> bool {
        matches!(self.check, Check::Async { .. } | Check::Http { .. })
    }
}

/// Compile a field's validators. Entries that cannot be compiled are left
/// out and described in the returned problem list.
pub fn compile(field: &FieldConfig) -> (Vec<CompiledValidator>, Vec<String>) {
    let mut validators = Vec::new();
    let mut problems = Vec::new();

    if field.email == Some(true) {
        validators.push(CompiledValidator::new(Check::Email));
    }
    if let Some(min) = field.min {
        validators.push(CompiledValidator::new(Check::Min(min)));
    }
    if let Some(max) = field.max {
        validators.push(CompiledValidator::new(Check::Max(max)));
    }
    if let Some(len) = field.min_length {
        validators.push(CompiledValidator::new(Check::MinLength(len)));
    }
    if let Some(len) = field.max_length {
        validators.push(CompiledValidator::new(Check::MaxLength(len)));
    }
    if let Some(source) = &field.pattern {
        match builtin::compile_pattern(source) {
            Ok((regex, shown)) => validators.push(CompiledValidator::new(Check::Pattern { regex, shown })),
            Err(e) => problems.push(format!("invalid pattern '{}': {}", source, e)),
        }
    }

    for config in &field.validators {
        match compile_one(config) {
            Ok(validator) => validators.push(validator),
            Err(problem) => problems.push(problem),
        }
    }

    (validators, problems)
}

fn compile_one(config: &ValidatorConfig) -> Result<CompiledValidator, String> {
    let when = config
        .when()
        .map(CompiledCondition::compile)
        .transpose()
        .map_err(|e| format!("invalid 'when' condition: {}", e))?;

    let check = match config {
        ValidatorConfig::Required { .. } => Check::Required,
        ValidatorConfig::Email { .. } => Check::Email,
        ValidatorConfig::Min { value, .. } => Check::Min(*value),
        ValidatorConfig::Max { value, .. } => Check::Max(*value),
        ValidatorConfig::MinLength { value, .. } => Check::MinLength(*value),
        ValidatorConfig::MaxLength { value, .. } => Check::MaxLength(*value),
        ValidatorConfig::Pattern { value, .. } => {
            let (regex, shown) = builtin::compile_pattern(value)
                .map_err(|e| format!("invalid pattern '{}': {}", value, e))?;
            Check::Pattern { regex, shown }
        }
        ValidatorConfig::Custom {
            kind,
            expression,
            function_name,
            params,
            ..
        } => match (expression, function_name) {
            (Some(source), _) => Check::Expression {
                kind: kind.clone().unwrap_or_else(|| "custom".to_string()),
                expression: Expression::parse(source).map_err(|e| e.to_string())?,
                params: params.clone(),
            },
            (None, Some(name)) => Check::Function {
                kind: kind.clone(),
                name: name.clone(),
                params: params.clone(),
            },
            (None, None) => {
                return Err("custom validator needs 'expression' or 'functionName'".to_string());
            }
        },
        ValidatorConfig::CustomAsync {
            kind,
            function_name,
            on_error,
            debounce_ms,
            ..
        } => Check::Async {
            kind: kind.clone(),
            name: function_name.clone(),
            on_error: on_error.clone(),
            debounce_ms: debounce_ms.unwrap_or(0),
        },
        ValidatorConfig::CustomHttp {
            kind,
            http,
            response_mapping,
            on_error,
            debounce_ms,
            ..
        } => Check::Http {
            validator: HttpValidator::compile(kind.as_deref(), http, response_mapping, on_error)
                .map_err(|e| e.to_string())?,
            debounce_ms: debounce_ms.unwrap_or(0),
        },
    };

    Ok(CompiledValidator { when, check })
}

impl OnErrorConfig {
    /// The field error a failed async call turns into, if any
    pub fn to_error(&self, default_kind: &str, message: &str) -> Option<ValidationError> {
        match self.action {
            OnErrorAction::Suppress => None,
            OnErrorAction::Error => Some(
                ValidationError::new(self.kind.as_deref().unwrap_or(default_kind))
                    .with_param("message", Value::String(message.to_string())),
            ),
        }
    }
}

/// Everything a synchronous validator can see
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
    pub field: &'a FieldPath,
    pub value: &'a Value,
    pub form_value: &'a Value,
    /// Enclosing array item
    pub scope: Option<&'a FieldPath>,
    pub required: bool,
    pub functions: &'a FunctionRegistry,
    pub validators: &'a HashMap<String, ValidatorFn>,
}

impl<'a> ValidationContext<'a> {
    fn condition_context(&self) -> ConditionContext<'a> {
        ConditionContext::new(self.form_value, self.functions)
            .with_field_value(Some(self.value))
            .with_scope(self.scope)
    }

    fn eval_context(&self) -> EvalContext<'a> {
        self.condition_context().eval_context()
    }
}

#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub errors: Vec<ValidationError>,
    pub failures: Vec<Diagnostic>,
}

impl SyncOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Whether a validator's `when` gate lets it run
pub fn is_active(
    validator: &CompiledValidator,
    ctx: &ValidationContext<'_>,
    failures: &mut Vec<Diagnostic>,
) -> bool {
    let Some(when) = &validator.when else {
        return true;
    };
    match when.evaluate(&ctx.condition_context()) {
        Ok(active) => active,
        Err(e) => {
            failures.push(Diagnostic::warning(
                DiagnosticCode::ExpressionFailed,
                Some(ctx.field),
                format!("validator condition failed: {}", e),
            ));
            false
        }
    }
}

/// Run the synchronous validators of one field
pub fn run_sync(validators: &[CompiledValidator], ctx: &ValidationContext<'_>) -> SyncOutcome {
    let mut outcome = SyncOutcome::default();

    let mut required_checked = ctx.required;
    if ctx.required {
        if let Some(error) = builtin::required(ctx.value) {
            outcome.errors.push(error);
        }
    }

    for validator in validators {
        let is_required = matches!(validator.check, Check::Required);
        if validator.is_async() || (is_required && required_checked) {
            continue;
        }
        if !is_active(validator, ctx, &mut outcome.failures) {
            continue;
        }
        required_checked |= is_required;
        if let Some(error) = check(&validator.check, ctx, &mut outcome.failures) {
            tracing::trace!(field = %ctx.field, kind = %error.kind, "validator failed");
            outcome.errors.push(error);
        }
    }

    outcome
}

fn check(
    check: &Check,
    ctx: &ValidationContext<'_>,
    failures: &mut Vec<Diagnostic>,
) -> Option<ValidationError> {
    let value = ctx.value;
    match check {
        Check::Required => builtin::required(value),
        Check::Email => builtin::email(value),
        Check::Min(min) => builtin::min(value, *min),
        Check::Max(max) => builtin::max(value, *max),
        Check::MinLength(len) => builtin::min_length(value, *len),
        Check::MaxLength(len) => builtin::max_length(value, *len),
        Check::Pattern { regex, shown } => builtin::pattern(value, regex, shown),
        Check::Expression {
            kind,
            expression,
            params,
        } => match expression.evaluate_bool(&ctx.eval_context()) {
            Ok(true) => None,
            Ok(false) => Some(ValidationError::new(kind.clone()).with_params(params)),
            Err(e) => {
                failures.push(Diagnostic::warning(
                    DiagnosticCode::ExpressionFailed,
                    Some(ctx.field),
                    format!("validator expression '{}' failed: {}", expression.source(), e),
                ));
                None
            }
        },
        Check::Function { kind, name, params } => {
            let Some(validator) = ctx.validators.get(name) else {
                failures.push(Diagnostic::warning(
                    DiagnosticCode::UnknownFunction,
                    Some(ctx.field),
                    format!("validator function '{}' is not registered", name),
                ));
                return None;
            };
            let input = ValidatorInput {
                field: ctx.field,
                value,
                form_value: ctx.form_value,
                params,
            };
            validator(&input).map(|mut error| {
                if let Some(kind) = kind {
                    error.kind = kind.clone();
                }
                error.with_params(params)
            })
        }
        Check::Async { .. } | Check::Http { .. } => None,
    }
}
