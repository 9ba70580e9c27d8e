//! HTTP validators
//!
//! Building the request is pure: every query parameter and body property is
//! an expression evaluated against the field's context. Sending it is the
//! job of the injected [`crate::deps::HttpTransport`]. The response is read
//! back through `responseMapping`, whose expressions may also use
//! `response`.

use super::ValidationError;
use crate::config::{HttpMethod, HttpRequestConfig, OnErrorConfig, ResponseMapping};
use crate::expression::interpreter::to_display;
use crate::expression::{EvalContext, Expression, ExpressionError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Error kind used when neither the mapping nor the validator names one
pub const DEFAULT_KIND: &str = "http";

/// Request descriptor handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Query parameters; `null` values are left out
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// A `customHttp` validator with its expressions parsed
#[derive(Debug, Clone)]
pub struct HttpValidator {
    kind: String,
    url: String,
    method: HttpMethod,
    query: Vec<(String, Expression)>,
    body: Vec<(String, Expression)>,
    headers: BTreeMap<String, String>,
    valid_when: Expression,
    error_params: Vec<(String, Expression)>,
    on_error: OnErrorConfig,
}

fn parse_all(entries: &BTreeMap<String, String>) -> Result<Vec<(String, Expression)>, ExpressionError> {
    entries
        .iter()
        .map(|(name, source)| Ok((name.clone(), Expression::parse(source)?)))
        .collect()
}

impl HttpValidator {
    pub fn compile(
        kind: Option<&str>,
        http: &HttpRequestConfig,
        mapping: &ResponseMapping,
        on_error: &OnErrorConfig,
    ) -> Result<Self, ExpressionError> {
        let kind = mapping
            .error_kind
            .as_deref()
            .or(kind)
            .unwrap_or(DEFAULT_KIND)
            .to_string();
        Ok(Self {
            kind,
            url: http.url.clone(),
            method: http.method,
            query: parse_all(&http.query_params)?,
            body: parse_all(&http.body)?,
            headers: http.headers.clone(),
            valid_when: Expression::parse(&mapping.valid_when)?,
            error_params: parse_all(&mapping.error_params)?,
            on_error: on_error.clone(),
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Build the request for the current value
    pub fn build_request(&self, ctx: &EvalContext<'_>) -> Result<HttpRequest, ExpressionError> {
        let mut query = BTreeMap::new();
        for (name, expression) in &self.query {
            let value = expression.evaluate(ctx)?;
            if !value.is_null() {
                query.insert(name.clone(), to_display(&value));
            }
        }

        let body = if self.body.is_empty() {
            None
        } else {
            let mut object = Map::new();
            for (name, expression) in &self.body {
                object.insert(name.clone(), expression.evaluate(ctx)?);
            }
            Some(Value::Object(object))
        };

        Ok(HttpRequest {
            method: self.method,
            url: self.url.clone(),
            query,
            headers: self.headers.clone(),
            body,
        })
    }

    /// Map a response to a validation result
    pub fn interpret(
        &self,
        response: &Value,
        ctx: &EvalContext<'_>,
    ) -> Result<Option<ValidationError>, ExpressionError> {
        let ctx = ctx.with_response(response);
        if self.valid_when.evaluate_bool(&ctx)? {
            return Ok(None);
        }
        let mut error = ValidationError::new(self.kind.clone());
        for (name, expression) in &self.error_params {
            error.params.insert(name.clone(), expression.evaluate(&ctx)?);
        }
        Ok(Some(error))
    }

    /// Apply the `onError` policy to a transport failure
    pub fn on_transport_error(&self, message: &str) -> Option<ValidationError> {
        self.on_error.to_error(&self.kind, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OnErrorAction;
    use crate::expression::FunctionRegistry;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn validator(on_error: OnErrorConfig) -> HttpValidator {
        let http: HttpRequestConfig = serde_json::from_value(json!({
            "url": "/api/users/check",
            "method": "POST",
            "queryParams": {"name": "fieldValue", "skip": "formValue.missing"},
            "body": {"name": "fieldValue", "team": "formValue.team"},
            "headers": {"x-form": "signup"}
        }))
        .unwrap();
        let mapping: ResponseMapping = serde_json::from_value(json!({
            "validWhen": "response.available",
            "errorKind": "usernameTaken",
            "errorParams": {"suggestion": "response.suggestion"}
        }))
        .unwrap();
        HttpValidator::compile(None, &http, &mapping, &on_error).unwrap()
    }

    #[test]
    fn test_build_request() {
        let form = json!({"username": "ada", "team": 7});
        let value = json!("ada");
        let functions = FunctionRegistry::new();
        let ctx = EvalContext::new(&form, &functions).with_field_value(&value);
        let request = validator(OnErrorConfig::default()).build_request(&ctx).unwrap();

        assert_eq!(
            request,
            HttpRequest {
                method: HttpMethod::Post,
                url: "/api/users/check".to_string(),
                query: BTreeMap::from([("name".to_string(), "ada".to_string())]),
                headers: BTreeMap::from([("x-form".to_string(), "signup".to_string())]),
                body: Some(json!({"name": "ada", "team": 7})),
            }
        );
    }

    #[test]
    fn test_interpret_response() {
        let form = json!({});
        let functions = FunctionRegistry::new();
        let ctx = EvalContext::new(&form, &functions);
        let v = validator(OnErrorConfig::default());

        assert_eq!(v.interpret(&json!({"available": true}), &ctx).unwrap(), None);
        let error = v
            .interpret(&json!({"available": false, "suggestion": "ada2"}), &ctx)
            .unwrap()
            .unwrap();
        assert_eq!(error.kind, "usernameTaken");
        assert_eq!(error.params["suggestion"], json!("ada2"));
    }

    #[test]
    fn test_on_error_policy() {
        assert_eq!(validator(OnErrorConfig::default()).on_transport_error("timeout"), None);

        let strict = validator(OnErrorConfig {
            action: OnErrorAction::Error,
            kind: Some("unreachable".to_string()),
        });
        let error = strict.on_transport_error("timeout").unwrap();
        assert_eq!(error.kind, "unreachable");
        assert_eq!(error.params["message"], json!("timeout"));
    }
}
