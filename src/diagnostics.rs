//! Non-fatal problems reported by a form session
//!
//! Anything that goes wrong inside a value-change cycle (a failing
//! expression, a runaway derivation cycle, an async transport error) is
//! recorded here instead of being returned as an error, so the rest of the
//! form keeps working.

use crate::path::FieldPath;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Stable codes for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticCode {
    /// A condition or expression failed to evaluate
    ExpressionFailed,
    /// A derivation did not converge within the iteration cap
    DerivationCapExceeded,
    /// A named function, validator or derivation is not registered
    UnknownFunction,
    /// A field entry could not be set up (bad type, bad path, bad pattern)
    InvalidField,
    /// An array event targeted a key that is not an array
    UnknownArray,
    /// An async validator, derivation or transport failed
    AsyncFailed,
    /// The submission action failed
    SubmissionFailed,
    /// A validation message template failed to render
    MessageTemplate,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::ExpressionFailed => "expression-failed",
            DiagnosticCode::DerivationCapExceeded => "derivation-cap-exceeded",
            DiagnosticCode::UnknownFunction => "unknown-function",
            DiagnosticCode::InvalidField => "invalid-field",
            DiagnosticCode::UnknownArray => "unknown-array",
            DiagnosticCode::AsyncFailed => "async-failed",
            DiagnosticCode::SubmissionFailed => "submission-failed",
            DiagnosticCode::MessageTemplate => "message-template",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    /// The field the problem is attached to, if any
    pub field: Option<FieldPath>,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(code: DiagnosticCode, field: Option<&FieldPath>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            field: field.cloned(),
            message: message.into(),
        }
    }

    pub fn error(code: DiagnosticCode, field: Option<&FieldPath>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            ..Self::warning(code, field, message)
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "[{}] {}: {}", self.code.as_str(), field, self.message),
            None => write!(f, "[{}] {}", self.code.as_str(), self.message),
        }
    }
}

/// Collected diagnostics; every entry is also logged through `tracing`
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Warning => tracing::warn!(
                code = diagnostic.code.as_str(),
                field = diagnostic.field.as_ref().map(|f| f.to_string()),
                "{}",
                diagnostic.message
            ),
            Severity::Error => tracing::error!(
                code = diagnostic.code.as_str(),
                field = diagnostic.field.as_ref().map(|f| f.to_string()),
                "{}",
                diagnostic.message
            ),
        }
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.push(diagnostic);
        }
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn has_code(&self, code: DiagnosticCode) -> bool {
        self.entries.iter().any(|d| d.code == code)
    }
}
