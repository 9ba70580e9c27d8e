//! Derivations: computed field values
//!
//! Rules are compiled per field ([`rules`]), placed for every field
//! instance and ordered ([`graph`]), and propagated to a fixed point after
//! every change ([`scheduler`]). Async rules are handed back to the caller
//! as [`DerivationTask`]s.

pub mod graph;
pub mod rules;
pub mod scheduler;

use crate::config::OnErrorConfig;
use crate::deps::{AsyncDerivation, AsyncDerivationInput};
use crate::generation::Ticket;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use graph::{Rule, RuleGraph};
pub use rules::{RuleSource, RuleSpec};
pub use scheduler::{AsyncRequest, DerivationReport, Propagation, Trigger};

/// A pending async derivation
pub struct DerivationTask {
    pub ticket: Ticket,
    future: BoxFuture<'static, DerivationCompletion>,
}

impl fmt::Debug for DerivationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivationTask")
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

impl DerivationTask {
    pub fn new(
        ticket: Ticket,
        request: &AsyncRequest,
        derivation: Arc<dyn AsyncDerivation>,
        input: AsyncDerivationInput,
    ) -> Self {
        let debounce_ms = request.debounce_ms;
        let stop_on_user_override = request.stop_on_user_override;
        let on_error = request.on_error.clone();
        let completion_ticket = ticket.clone();
        let future = async move {
            if debounce_ms > 0 {
                tokio::time::sleep(Duration::from_millis(debounce_ms)).await;
            }
            derivation.derive(input).await
        }
        .map(move |result| DerivationCompletion {
            ticket: completion_ticket,
            result,
            stop_on_user_override,
            on_error,
        })
        .boxed();
        Self { ticket, future }
    }

    pub async fn run(self) -> DerivationCompletion {
        self.future.await
    }
}

/// Result of a finished async derivation
#[derive(Debug, Clone)]
pub struct DerivationCompletion {
    pub ticket: Ticket,
    pub result: Result<Value, String>,
    pub stop_on_user_override: bool,
    pub on_error: OnErrorConfig,
}
