// Production-quality lints
#![warn(
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
// Deny truly dangerous patterns
#![deny(clippy::mem_forget)]
// Allow common patterns in library code
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! # Dynaform: reactive logic for schema-driven forms
//!
//! A form is described once as data (a tree of fields with conditions,
//! derivations and validators) and Dynaform keeps the live form value and
//! every field's state consistent with it while the user types.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dynaform::{Dependencies, Form};
//! use serde_json::json;
//!
//! let mut form = Form::from_yaml(r#"
//! fields:
//!   - key: quantity
//!     type: input
//!     value: 1
//!   - key: unitPrice
//!     type: input
//!     value: 10
//!   - key: total
//!     type: input
//!     derivation: "formValue.quantity * formValue.unitPrice"
//!   - key: discountCode
//!     type: input
//!     logic:
//!       - type: hidden
//!         condition:
//!           type: javascript
//!           expression: "formValue.total < 100"
//! "#, Dependencies::new(), json!({}))?;
//!
//! form.set_value("quantity", json!(12))?;
//! assert_eq!(form.get("total"), Some(&json!(120)));
//! assert!(!form.field_state("discountCode").unwrap().hidden);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                                                             │
//! │  FormConfig (YAML / JSON)                                   │
//! │       │                                                     │
//! │       ├──► field::compile_fields ──► FieldDef tree          │
//! │       │        (conditions, validators, rule specs)         │
//! │       │                                                     │
//! │       └──► config_validate ──► ConfigValidationResult       │
//! │                                                             │
//! │  Form (one session)                                         │
//! │       │                                                     │
//! │       ├──► FieldTree ──► instances per array item           │
//! │       ├──► RuleGraph ──► Propagation to a fixed point       │
//! │       ├──► refresh ──► FieldState (logic, errors, messages) │
//! │       └──► AsyncTask ──► apply(Completion), stale dropped   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Expressions are a small sandboxed language (see [`expression`]); they
//! read `formValue`, `fieldValue` and, inside array items, `$` paths.

// Foundations
pub mod error;
pub mod expression;
pub mod path;

// Configuration
pub mod condition;
pub mod config;
pub mod config_validate;

// Session plumbing
pub mod cell;
pub mod diagnostics;
pub mod generation;
pub mod interaction;

// Field model
pub mod deps;
pub mod field;
pub mod tree;

// Behaviour
pub mod array;
pub mod derivation;
pub mod validation;

pub mod form;

pub use array::{ArrayEvent, ArrayOperation};
pub use cell::{Computed, Observable, Subscription};
pub use condition::{CompiledCondition, Condition, ConditionContext};
pub use config::{EngineDefaults, FieldConfig, FormConfig};
pub use config_validate::{validate_form_config, validate_form_file, ConfigIssue, ConfigValidationResult};
pub use deps::{
    AsyncDerivation, AsyncValidator, Dependencies, HttpTransport, ServerErrors, SubmitAction,
};
pub use diagnostics::{Diagnostic, DiagnosticCode, Severity};
pub use error::{Error, Result};
pub use expression::{Expression, ExpressionError};
pub use field::{FieldKind, FieldTypes};
pub use form::{AsyncTask, ChangeOutcome, Completion, FieldState, Form, SubmissionOutcome, SubmissionTask};
pub use path::FieldPath;
pub use validation::ValidationError;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
