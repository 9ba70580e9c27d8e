//! Error message resolution
//!
//! A message for `{kind, params}` is looked up in the field's
//! `validationMessages`, then the form's `defaultValidationMessages`, and
//! falls back to a generic message. Templates interpolate `{{param}}` from
//! the error parameters plus `{{fieldLabel}}`.

use super::ValidationError;
use minijinja::Environment;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Used when no template exists for an error kind
pub const GENERIC_MESSAGE: &str = "This field is invalid";

static ENGINE: OnceLock<Environment<'static>> = OnceLock::new();

fn engine() -> &'static Environment<'static> {
    ENGINE.get_or_init(|| {
        let mut env = Environment::new();
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Lenient);
        env
    })
}

/// Outcome of resolving one error
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMessage {
    pub kind: String,
    pub message: String,
    /// Set when the template failed to render and the generic text was used
    pub template_error: Option<String>,
}

pub fn resolve(
    error: &ValidationError,
    field_messages: &BTreeMap<String, String>,
    default_messages: &BTreeMap<String, String>,
    field_label: &str,
) -> ResolvedMessage {
    let template = field_messages
        .get(&error.kind)
        .or_else(|| default_messages.get(&error.kind));

    let Some(template) = template else {
        // errors that carry their own text (server, async) keep it
        let message = error
            .params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(GENERIC_MESSAGE)
            .to_string();
        return ResolvedMessage {
            kind: error.kind.clone(),
            message,
            template_error: None,
        };
    };

    match render(template, &error.params, field_label) {
        Ok(message) => ResolvedMessage {
            kind: error.kind.clone(),
            message,
            template_error: None,
        },
        Err(e) => ResolvedMessage {
            kind: error.kind.clone(),
            message: GENERIC_MESSAGE.to_string(),
            template_error: Some(e.to_string()),
        },
    }
}

/// Render one template against error parameters
pub fn render(
    template: &str,
    params: &Map<String, Value>,
    field_label: &str,
) -> Result<String, minijinja::Error> {
    let mut ctx = params.clone();
    ctx.entry("fieldLabel".to_string())
        .or_insert_with(|| Value::String(field_label.to_string()));
    engine().render_str(template, Value::Object(ctx))
}
