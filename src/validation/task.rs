//! Async validation tasks
//!
//! One task covers every active `customAsync`/`customHttp` validator of one
//! field. It owns a snapshot of everything it needs, so the future is
//! `'static` and can be driven by any executor. Its [`Ticket`] decides on
//! completion whether the result is still wanted.

use super::{is_active, Check, CompiledValidator, HttpRequest, HttpValidator, ValidationContext, ValidationError};
use crate::config::OnErrorConfig;
use crate::deps::{AsyncValidator, AsyncValidatorInput, Dependencies, HttpTransport};
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::expression::{EvalContext, FunctionRegistry};
use crate::generation::Ticket;
use crate::path::{self, FieldPath, Segment};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Error kind of a failed `customAsync` call without `kind` or `onError.kind`
pub const ASYNC_ERROR_KIND: &str = "asyncError";

/// One async call; `index` is the validator's position on the field
enum Job {
    Function {
        index: usize,
        kind: Option<String>,
        on_error: OnErrorConfig,
        validator: Arc<dyn AsyncValidator>,
    },
    Http {
        index: usize,
        validator: HttpValidator,
        request: HttpRequest,
        transport: Arc<dyn HttpTransport>,
    },
}

/// Owned copy of a field's evaluation context
struct Snapshot {
    field: FieldPath,
    value: Value,
    form_value: Value,
    item: Option<(Value, usize)>,
    functions: FunctionRegistry,
}

impl Snapshot {
    fn eval_context(&self) -> EvalContext<'_> {
        let ctx = EvalContext::new(&self.form_value, &self.functions).with_field_value(&self.value);
        match &self.item {
            Some((item, index)) => ctx.with_item(item, *index),
            None => ctx,
        }
    }
}

/// Async jobs of one field, not yet tied to a ticket
pub struct Plan {
    jobs: Vec<Job>,
    debounce_ms: u64,
    snapshot: Snapshot,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn into_task(self, ticket: Ticket) -> ValidationTask {
        let Plan {
            jobs,
            debounce_ms,
            snapshot,
        } = self;
        let future = async move {
            if debounce_ms > 0 {
                tokio::time::sleep(Duration::from_millis(debounce_ms)).await;
            }
            let mut errors = Vec::new();
            let mut failures = Vec::new();
            for job in jobs {
                match job {
                    Job::Function {
                        index,
                        kind,
                        on_error,
                        validator,
                    } => {
                        let input = AsyncValidatorInput {
                            field: snapshot.field.clone(),
                            value: snapshot.value.clone(),
                            form_value: snapshot.form_value.clone(),
                        };
                        match validator.validate(input).await {
                            Ok(Some(mut error)) => {
                                if let Some(kind) = kind {
                                    error.kind = kind;
                                }
                                errors.push((index, error));
                            }
                            Ok(None) => {}
                            Err(message) => {
                                let default_kind = kind.as_deref().unwrap_or(ASYNC_ERROR_KIND);
                                if let Some(error) = on_error.to_error(default_kind, &message) {
                                    errors.push((index, error));
                                }
                                failures.push(message);
                            }
                        }
                    }
                    Job::Http {
                        index,
                        validator,
                        request,
                        transport,
                    } => match transport.send(request).await {
                        Ok(response) => {
                            match validator.interpret(&response, &snapshot.eval_context()) {
                                Ok(Some(error)) => errors.push((index, error)),
                                Ok(None) => {}
                                Err(e) => failures.push(format!("response mapping failed: {}", e)),
                            }
                        }
                        Err(message) => {
                            if let Some(error) = validator.on_transport_error(&message) {
                                errors.push((index, error));
                            }
                            failures.push(message);
                        }
                    },
                }
            }
            (errors, failures)
        };

        ValidationTask {
            ticket: ticket.clone(),
            future: future
                .map(move |(errors, failures)| ValidationCompletion {
                    ticket,
                    errors,
                    failures,
                })
                .boxed(),
        }
    }
}

/// Collect the async work of one field.
///
/// Call only when the synchronous result is valid. Validators that cannot
/// be started (unregistered name, missing transport, request expression
/// failure) are reported in `failures` and skipped.
pub fn plan(
    validators: &[CompiledValidator],
    ctx: &ValidationContext<'_>,
    deps: &Dependencies,
    failures: &mut Vec<Diagnostic>,
) -> Plan {
    let item = ctx.scope.and_then(|scope| {
        let value = path::resolve(ctx.form_value, scope)?;
        match scope.last() {
            Some(Segment::Index(index)) => Some((value.clone(), *index)),
            _ => None,
        }
    });
    let snapshot = Snapshot {
        field: ctx.field.clone(),
        value: ctx.value.clone(),
        form_value: ctx.form_value.clone(),
        item,
        functions: ctx.functions.clone(),
    };

    let mut jobs = Vec::new();
    let mut debounce_ms = 0;
    for (index, validator) in validators.iter().enumerate().filter(|(_, v)| v.is_async()) {
        if !is_active(validator, ctx, failures) {
            continue;
        }
        match &validator.check {
            Check::Async {
                kind,
                name,
                on_error,
                debounce_ms: debounce,
            } => {
                let Some(found) = deps.async_validators.get(name) else {
                    failures.push(Diagnostic::warning(
                        DiagnosticCode::UnknownFunction,
                        Some(ctx.field),
                        format!("async validator '{}' is not registered", name),
                    ));
                    continue;
                };
                debounce_ms = debounce_ms.max(*debounce);
                jobs.push(Job::Function {
                    index,
                    kind: kind.clone(),
                    on_error: on_error.clone(),
                    validator: Arc::clone(found),
                });
            }
            Check::Http {
                validator,
                debounce_ms: debounce,
            } => {
                let Some(transport) = &deps.transport else {
                    failures.push(Diagnostic::warning(
                        DiagnosticCode::AsyncFailed,
                        Some(ctx.field),
                        "HTTP validator configured but no transport is registered",
                    ));
                    continue;
                };
                let request = match validator.build_request(&snapshot.eval_context()) {
                    Ok(request) => request,
                    Err(e) => {
                        failures.push(Diagnostic::warning(
                            DiagnosticCode::ExpressionFailed,
                            Some(ctx.field),
                            format!("HTTP request could not be built: {}", e),
                        ));
                        continue;
                    }
                };
                debounce_ms = debounce_ms.max(*debounce);
                jobs.push(Job::Http {
                    index,
                    validator: validator.clone(),
                    request,
                    transport: Arc::clone(transport),
                });
            }
            _ => {}
        }
    }

    Plan {
        jobs,
        debounce_ms,
        snapshot,
    }
}

/// A pending async validation
pub struct ValidationTask {
    pub ticket: Ticket,
    future: BoxFuture<'static, ValidationCompletion>,
}

impl fmt::Debug for ValidationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationTask")
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

impl ValidationTask {
    pub async fn run(self) -> ValidationCompletion {
        self.future.await
    }
}

/// Result of a finished validation task
#[derive(Debug, Clone)]
pub struct ValidationCompletion {
    pub ticket: Ticket,
    /// Each error with the position of the validator that raised it
    pub errors: Vec<(usize, ValidationError)>,
    /// Transport and validator failures, reported as diagnostics
    pub failures: Vec<String>,
}
