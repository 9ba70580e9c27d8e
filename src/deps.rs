//! Collaborators injected into a form
//!
//! Everything the engine calls out to (custom functions, named validators
//! and derivations, the HTTP transport, submit actions) is registered on a
//! [`Dependencies`] value and handed to [`crate::Form::new`]. There is no
//! ambient registry.
//!
//! Async collaborators are traits so hosts can implement them on their own
//! clients; closures are accepted through the `*_fn` builder methods.

use crate::config::EngineDefaults;
use crate::expression::FunctionRegistry;
use crate::field::FieldTypes;
use crate::path::FieldPath;
use crate::validation::{HttpRequest, ValidationError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Input of a named synchronous validator
pub struct ValidatorInput<'a> {
    pub field: &'a FieldPath,
    pub value: &'a Value,
    pub form_value: &'a Value,
    pub params: &'a Map<String, Value>,
}

pub type ValidatorFn = Arc<dyn Fn(&ValidatorInput<'_>) -> Option<ValidationError> + Send + Sync>;

/// Input of a named synchronous derivation
pub struct DerivationInput<'a> {
    pub target: &'a FieldPath,
    pub form_value: &'a Value,
    pub field_value: &'a Value,
    pub item: Option<&'a Value>,
    pub index: Option<usize>,
}

pub type DerivationFn = Arc<dyn Fn(&DerivationInput<'_>) -> Result<Value, String> + Send + Sync>;

/// Owned input of an async validator
#[derive(Debug, Clone)]
pub struct AsyncValidatorInput {
    pub field: FieldPath,
    pub value: Value,
    pub form_value: Value,
}

#[async_trait]
pub trait AsyncValidator: Send + Sync {
    /// `Ok(None)` when valid; `Err` is a failure of the check itself
    async fn validate(&self, input: AsyncValidatorInput) -> Result<Option<ValidationError>, String>;
}

/// Owned input of an async derivation
#[derive(Debug, Clone)]
pub struct AsyncDerivationInput {
    pub target: FieldPath,
    pub form_value: Value,
    pub field_value: Value,
    pub item: Option<Value>,
    pub index: Option<usize>,
}

#[async_trait]
pub trait AsyncDerivation: Send + Sync {
    async fn derive(&self, input: AsyncDerivationInput) -> Result<Value, String>;
}

/// Sends HTTP validator requests
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Resolve to the decoded response body
    async fn send(&self, request: HttpRequest) -> Result<Value, String>;
}

/// Field errors returned by a submit action, by field path
pub type ServerErrors = BTreeMap<String, String>;

#[async_trait]
pub trait SubmitAction: Send + Sync {
    /// `Ok(None)` on success, `Ok(Some(errors))` for field-level rejections
    async fn submit(&self, value: Value) -> Result<Option<ServerErrors>, String>;
}

type BoxedFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, O> + Send + Sync>;

struct FnAsyncValidator(BoxedFn<AsyncValidatorInput, Result<Option<ValidationError>, String>>);

#[async_trait]
impl AsyncValidator for FnAsyncValidator {
    async fn validate(&self, input: AsyncValidatorInput) -> Result<Option<ValidationError>, String> {
        (self.0)(input).await
    }
}

struct FnAsyncDerivation(BoxedFn<AsyncDerivationInput, Result<Value, String>>);

#[async_trait]
impl AsyncDerivation for FnAsyncDerivation {
    async fn derive(&self, input: AsyncDerivationInput) -> Result<Value, String> {
        (self.0)(input).await
    }
}

struct FnTransport(BoxedFn<HttpRequest, Result<Value, String>>);

#[async_trait]
impl HttpTransport for FnTransport {
    async fn send(&self, request: HttpRequest) -> Result<Value, String> {
        (self.0)(request).await
    }
}

struct FnSubmitAction(BoxedFn<Value, Result<Option<ServerErrors>, String>>);

#[async_trait]
impl SubmitAction for FnSubmitAction {
    async fn submit(&self, value: Value) -> Result<Option<ServerErrors>, String> {
        (self.0)(value).await
    }
}

/// Registries and collaborators of a form session
#[derive(Clone, Default)]
pub struct Dependencies {
    pub functions: FunctionRegistry,
    pub validators: HashMap<String, ValidatorFn>,
    pub async_validators: HashMap<String, Arc<dyn AsyncValidator>>,
    pub derivations: HashMap<String, DerivationFn>,
    pub async_derivations: HashMap<String, Arc<dyn AsyncDerivation>>,
    pub transport: Option<Arc<dyn HttpTransport>>,
    pub submit_actions: HashMap<String, Arc<dyn SubmitAction>>,
    /// Used when the config names no action
    pub default_submit: Option<Arc<dyn SubmitAction>>,
    pub field_types: FieldTypes,
    pub defaults: EngineDefaults,
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn keys<V>(map: &HashMap<String, V>) -> Vec<&str> {
            let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
            keys.sort_unstable();
            keys
        }
        f.debug_struct("Dependencies")
            .field("functions", &self.functions)
            .field("validators", &keys(&self.validators))
            .field("async_validators", &keys(&self.async_validators))
            .field("derivations", &keys(&self.derivations))
            .field("async_derivations", &keys(&self.async_derivations))
            .field("transport", &self.transport.is_some())
            .field("submit_actions", &keys(&self.submit_actions))
            .field("default_submit", &self.default_submit.is_some())
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pure function callable from expressions
    pub fn function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.register(name, f);
        self
    }

    pub fn validator<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&ValidatorInput<'_>) -> Option<ValidationError> + Send + Sync + 'static,
    {
        self.validators.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn async_validator(mut self, name: &str, validator: Arc<dyn AsyncValidator>) -> Self {
        self.async_validators.insert(name.to_string(), validator);
        self
    }

    pub fn async_validator_fn<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(AsyncValidatorInput) -> BoxFuture<'static, Result<Option<ValidationError>, String>>
            + Send
            + Sync
            + 'static,
    {
        self.async_validator(name, Arc::new(FnAsyncValidator(Arc::new(f))))
    }

    pub fn derivation<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&DerivationInput<'_>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.derivations.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn async_derivation(mut self, name: &str, derivation: Arc<dyn AsyncDerivation>) -> Self {
        self.async_derivations.insert(name.to_string(), derivation);
        self
    }

    pub fn async_derivation_fn<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(AsyncDerivationInput) -> BoxFuture<'static, Result<Value, String>> + Send + Sync + 'static,
    {
        self.async_derivation(name, Arc::new(FnAsyncDerivation(Arc::new(f))))
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn transport_fn<F>(self, f: F) -> Self
    where
        F: Fn(HttpRequest) -> BoxFuture<'static, Result<Value, String>> + Send + Sync + 'static,
    {
        self.transport(Arc::new(FnTransport(Arc::new(f))))
    }

    pub fn submit_action(mut self, name: &str, action: Arc<dyn SubmitAction>) -> Self {
        self.submit_actions.insert(name.to_string(), action);
        self
    }

    pub fn default_submit(mut self, action: Arc<dyn SubmitAction>) -> Self {
        self.default_submit = Some(action);
        self
    }

    pub fn default_submit_fn<F>(self, f: F) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<Option<ServerErrors>, String>> + Send + Sync + 'static,
    {
        self.default_submit(Arc::new(FnSubmitAction(Arc::new(f))))
    }

    pub fn field_types(mut self, field_types: FieldTypes) -> Self {
        self.field_types = field_types;
        self
    }

    pub fn defaults(mut self, defaults: EngineDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// The submit action for a config's `submission.action`
    pub fn submit_for(&self, action: Option<&str>) -> Option<Arc<dyn SubmitAction>> {
        match action {
            Some(name) => self.submit_actions.get(name).cloned(),
            None => self.default_submit.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;

    #[test]
    fn test_builder_registers() {
        let deps = Dependencies::new()
            .function("double", |args| {
                Ok(json!(args.first().and_then(Value::as_f64).unwrap_or(0.0) * 2.0))
            })
            .validator("never", |_| None)
            .derivation("zero", |_| Ok(json!(0)))
            .default_submit_fn(|_| async { Ok(None) }.boxed());

        assert!(deps.functions.contains("double"));
        assert!(deps.functions.contains("sum"));
        assert!(deps.validators.contains_key("never"));
        assert!(deps.derivations.contains_key("zero"));
        assert!(deps.submit_for(None).is_some());
        assert!(deps.submit_for(Some("missing")).is_none());
    }

    #[tokio::test]
    async fn test_closure_transport() {
        let deps = Dependencies::new()
            .transport_fn(|request| async move { Ok(json!({"url": request.url})) }.boxed());
        let transport = deps.transport.clone().unwrap();
        let response = transport
            .send(HttpRequest {
                method: Default::default(),
                url: "/check".to_string(),
                query: BTreeMap::new(),
                headers: BTreeMap::new(),
                body: None,
            })
            .await
            .unwrap();
        assert_eq!(response, json!({"url": "/check"}));
    }
}
