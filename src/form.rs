//! Form sessions
//!
//! A [`Form`] owns one form value, its compiled field tree and everything
//! that changes while a user fills the form in: which fields were edited
//! by hand, which were touched, outstanding async work, server errors and
//! the current wizard page. Every mutation runs the same cycle:
//!
//! 1. write the value,
//! 2. propagate derivations to a fixed point,
//! 3. recompute field state (logic, synchronous validation, messages),
//! 4. start async validation for changed fields whose synchronous result is
//!    valid,
//! 5. publish the value and states to the observable cells.
//!
//! Async work is returned as [`AsyncTask`]s. The caller runs them (or hands
//! them to [`Form::settle`]) and feeds each [`Completion`] back through
//! [`Form::apply`]; completions whose request has been superseded are
//! dropped there.
//!
//! A session is single-threaded. Problems inside a cycle never abort it;
//! they are collected as diagnostics.

use crate::array::{self, ArrayEvent};
use crate::cell::{Computed, Observable};
use crate::condition::ConditionContext;
use crate::config::{FormConfig, LogicKind, MergedOptions};
use crate::deps::{AsyncDerivationInput, Dependencies, ServerErrors};
use crate::derivation::scheduler::item_of;
use crate::derivation::{
    DerivationCompletion, DerivationReport, DerivationTask, Propagation, RuleGraph, Trigger,
};
use crate::diagnostics::{Diagnostic, DiagnosticCode, Diagnostics};
use crate::error::{Error, Result};
use crate::expression::interpreter::strict_equals;
use crate::field::{compile_fields, FieldKind};
use crate::generation::{Generations, Ticket};
use crate::interaction::UserInteractionTracker;
use crate::path::{self, FieldPath};
use crate::tree::{FieldInstance, FieldTree};
use crate::validation::{
    self, resolve_message, ValidationCompletion, ValidationContext, ValidationError, ValidationTask,
};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Computed state of one field
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldState {
    pub hidden: bool,
    pub disabled: bool,
    pub readonly: bool,
    pub required: bool,
    /// Active errors: synchronous, then async, then failed async
    /// derivations, then server
    pub errors: Vec<ValidationError>,
    /// One resolved message per error
    pub messages: Vec<String>,
    pub touched: bool,
    /// An async validation is outstanding
    pub pending: bool,
    /// Errors should be shown: touched, or a submit was attempted
    pub show_errors: bool,
}

impl FieldState {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    hidden: bool,
    disabled: bool,
    readonly: bool,
    required: bool,
}

impl Flags {
    /// What children inherit; `required` is never inherited
    fn inherited(self) -> Self {
        Self {
            required: false,
            ..self
        }
    }
}

/// Async work started by a change
#[derive(Debug)]
pub enum AsyncTask {
    Validation(ValidationTask),
    Derivation(DerivationTask),
}

impl AsyncTask {
    pub fn ticket(&self) -> &Ticket {
        match self {
            AsyncTask::Validation(task) => &task.ticket,
            AsyncTask::Derivation(task) => &task.ticket,
        }
    }

    pub async fn run(self) -> Completion {
        match self {
            AsyncTask::Validation(task) => Completion::Validation(task.run().await),
            AsyncTask::Derivation(task) => Completion::Derivation(task.run().await),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Completion {
    Validation(ValidationCompletion),
    Derivation(DerivationCompletion),
}

/// Result of one mutation
#[derive(Debug, Default)]
pub struct ChangeOutcome {
    /// Paths written by derivations
    pub changed: Vec<FieldPath>,
    pub passes: usize,
    /// False when the derivation cap was hit
    pub converged: bool,
    pub tasks: Vec<AsyncTask>,
}

/// A submission in flight
pub struct SubmissionTask {
    value: Value,
    future: BoxFuture<'static, SubmissionOutcome>,
}

impl fmt::Debug for SubmissionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionTask")
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl SubmissionTask {
    /// The submitted value
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub async fn run(self) -> SubmissionOutcome {
        self.future.await
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub result: std::result::Result<Option<ServerErrors>, String>,
}

/// Error kind of a failed async derivation with `onError: {action: error}`
pub const DERIVATION_ERROR_KIND: &str = "derivationFailed";

/// One form session
pub struct Form {
    config: FormConfig,
    hash: String,
    deps: Dependencies,
    options: MergedOptions,
    tree: FieldTree,
    graph: RuleGraph,
    value: Value,
    initial: Value,
    tracker: UserInteractionTracker,
    touched: BTreeSet<FieldPath>,
    submitted: bool,
    submitting: bool,
    validations: Generations,
    derivations: Generations,
    /// Async results, keyed by field, with the raising validator's position
    async_errors: BTreeMap<FieldPath, Vec<(usize, ValidationError)>>,
    derivation_errors: BTreeMap<FieldPath, ValidationError>,
    server_errors: BTreeMap<FieldPath, Vec<ValidationError>>,
    states: BTreeMap<FieldPath, FieldState>,
    current_page: usize,
    diagnostics: Diagnostics,
    queued: Vec<AsyncTask>,
    value_cell: Observable<Value>,
    states_cell: Observable<BTreeMap<FieldPath, FieldState>>,
    submitting_cell: Observable<bool>,
    valid_cell: Computed<bool>,
}

impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Form")
            .field("hash", &self.hash)
            .field("value", &self.value)
            .field("submitting", &self.submitting)
            .field("current_page", &self.current_page)
            .finish_non_exhaustive()
    }
}

impl Form {
    /// Start a session.
    ///
    /// Config problems are recorded as diagnostics. Async derivations needed
    /// for the initial value are queued; see [`Form::take_tasks`].
    pub fn new(config: FormConfig, deps: Dependencies, initial: Value) -> Self {
        let hash = config.hash();
        let options = config.options(&deps.defaults);
        let states_cell = Observable::new(BTreeMap::new());
        let valid_cell = states_cell.map(|states: &BTreeMap<FieldPath, FieldState>| {
            states.values().all(FieldState::is_valid)
        });

        let mut form = Self {
            config,
            hash,
            deps,
            options,
            tree: FieldTree::default(),
            graph: RuleGraph::default(),
            value: Value::Null,
            initial,
            tracker: UserInteractionTracker::new(),
            touched: BTreeSet::new(),
            submitted: false,
            submitting: false,
            validations: Generations::new(),
            derivations: Generations::new(),
            async_errors: BTreeMap::new(),
            derivation_errors: BTreeMap::new(),
            server_errors: BTreeMap::new(),
            states: BTreeMap::new(),
            current_page: 0,
            diagnostics: Diagnostics::new(),
            queued: Vec::new(),
            value_cell: Observable::new(Value::Null),
            states_cell,
            submitting_cell: Observable::new(false),
            valid_cell,
        };
        form.compile();
        form.restart();
        form
    }

    /// Parse a YAML config and start a session
    pub fn from_yaml(yaml: &str, deps: Dependencies, initial: Value) -> Result<Self> {
        Ok(Self::new(FormConfig::from_yaml(yaml)?, deps, initial))
    }

    fn compile(&mut self) {
        let mut diagnostics = Vec::new();
        let defs = compile_fields(
            &self.config.fields,
            &self.deps.field_types,
            &FieldPath::root(),
            &mut diagnostics,
        );
        self.tree = FieldTree::new(defs);
        self.options = self.config.options(&self.deps.defaults);
        for diagnostic in diagnostics {
            self.report(diagnostic);
        }
    }

    /// Load the initial value and run every derivation
    fn restart(&mut self) {
        self.value = match &self.initial {
            Value::Object(_) => self.initial.clone(),
            _ => Value::Object(Map::new()),
        };
        self.tree.reset_arrays();
        self.rebuild_tree();
        let report = self.derive(Trigger::All);
        let outcome = self.finish_change(report, Vec::new());
        self.queued.extend(outcome.tasks);
    }

    fn rebuild_tree(&mut self) {
        self.tree.rebuild(&self.value);
        self.tree.fill_defaults(&mut self.value);
        let mut diagnostics = Vec::new();
        self.graph = RuleGraph::build(&self.tree, &mut diagnostics);
        for diagnostic in diagnostics {
            self.report(diagnostic);
        }
    }

    /// Record a diagnostic once
    fn report(&mut self, diagnostic: Diagnostic) {
        if !self.diagnostics.entries().contains(&diagnostic) {
            self.diagnostics.push(diagnostic);
        }
    }

    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    pub fn options(&self) -> &MergedOptions {
        &self.options
    }

    pub fn tree(&self) -> &FieldTree {
        &self.tree
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        path::get(&self.value, path)
    }

    pub fn field_state(&self, path: &str) -> Option<&FieldState> {
        let path = FieldPath::parse(path).ok()?;
        self.states.get(&path)
    }

    pub fn states(&self) -> &BTreeMap<FieldPath, FieldState> {
        &self.states
    }

    pub fn is_valid(&self) -> bool {
        self.states.values().all(FieldState::is_valid)
    }

    /// Fields with errors
    pub fn errors(&self) -> BTreeMap<FieldPath, Vec<ValidationError>> {
        self.states
            .iter()
            .filter(|(_, state)| !state.errors.is_empty())
            .map(|(path, state)| (path.clone(), state.errors.clone()))
            .collect()
    }

    pub fn tracker(&self) -> &UserInteractionTracker {
        &self.tracker
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.diagnostics.entries()
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.take()
    }

    /// Async tasks queued by construction, reset or reconfiguration
    pub fn take_tasks(&mut self) -> Vec<AsyncTask> {
        std::mem::take(&mut self.queued)
    }

    pub fn value_cell(&self) -> Observable<Value> {
        self.value_cell.clone()
    }

    pub fn states_cell(&self) -> Observable<BTreeMap<FieldPath, FieldState>> {
        self.states_cell.clone()
    }

    pub fn submitting_cell(&self) -> Observable<bool> {
        self.submitting_cell.clone()
    }

    pub fn valid_cell(&self) -> &Computed<bool> {
        &self.valid_cell
    }

    /// A field that holds a value
    fn value_field(&self, path: &str) -> Result<FieldPath> {
        let parsed = FieldPath::parse(path)?;
        match self.tree.get(&parsed) {
            Some(instance) if instance.def.holds_value() => Ok(parsed),
            _ => Err(Error::UnknownField(path.to_string())),
        }
    }

    /// User input: the field is marked as edited by hand and its server
    /// errors are cleared
    pub fn set_value(&mut self, path: &str, value: Value) -> Result<ChangeOutcome> {
        let path = self.value_field(path)?;
        self.tracker.mark(&path);
        self.server_errors.retain(|p, _| !p.is_related(&path));
        self.derivation_errors.retain(|p, _| !p.is_related(&path));
        Ok(self.write(path, value))
    }

    /// Programmatic write; does not count as user input
    pub fn patch(&mut self, path: &str, value: Value) -> Result<ChangeOutcome> {
        let path = self.value_field(path)?;
        Ok(self.write(path, value))
    }

    fn write(&mut self, path: FieldPath, value: Value) -> ChangeOutcome {
        path::write(&mut self.value, &path, value);
        self.sync_structure(std::slice::from_ref(&path));
        let changed = [path.clone()];
        let report = self.derive(Trigger::Changed(&changed));
        self.finish_change(report, vec![path])
    }

    /// Mark a field touched and validate it again
    pub fn blur(&mut self, path: &str) -> Result<Vec<AsyncTask>> {
        let path = FieldPath::parse(path)?;
        if self.tree.get(&path).is_none() {
            return Err(Error::UnknownField(path.to_string()));
        }
        self.touched.insert(path.clone());
        self.refresh();
        let tasks = self.validate_async(&[path]);
        self.refresh();
        self.publish();
        Ok(tasks)
    }

    /// Apply an array event
    pub fn dispatch(&mut self, event: ArrayEvent) -> Result<ChangeOutcome> {
        let mut diagnostics = Vec::new();
        let applied = array::apply(
            &event,
            &mut self.tree,
            &mut self.value,
            &self.deps.field_types,
            &mut diagnostics,
        );
        for diagnostic in diagnostics {
            self.report(diagnostic);
        }
        let applied = match applied {
            Ok(applied) => applied,
            Err(e) => {
                let code = match &e {
                    Error::UnknownArray(_) => DiagnosticCode::UnknownArray,
                    _ => DiagnosticCode::InvalidField,
                };
                self.report(Diagnostic::error(code, None, e.to_string()));
                return Err(e);
            }
        };

        let renumber = |p: &FieldPath| applied.renumber(p);
        self.tracker.renumber(renumber);
        self.touched = self.touched.iter().filter_map(renumber).collect();
        self.validations.renumber(renumber);
        self.derivations.renumber(renumber);
        self.async_errors = renumber_map(std::mem::take(&mut self.async_errors), renumber);
        self.derivation_errors = renumber_map(std::mem::take(&mut self.derivation_errors), renumber);
        self.server_errors = renumber_map(std::mem::take(&mut self.server_errors), renumber);

        self.rebuild_tree();
        let array = [applied.array().clone()];
        let report = self.derive(Trigger::Changed(&array));
        let validate = match &applied {
            array::Applied::Inserted { .. } => vec![applied.item()],
            array::Applied::Removed { .. } => Vec::new(),
        };
        Ok(self.finish_change(report, validate))
    }

    fn derive(&mut self, trigger: Trigger<'_>) -> DerivationReport {
        Propagation {
            graph: &self.graph,
            deps: &self.deps,
            tracker: &mut self.tracker,
            max_passes: self.options.max_derivation_iterations,
        }
        .run(&mut self.value, trigger)
    }

    /// Re-read array item counts for arrays overwritten at `changed`
    fn sync_structure(&mut self, changed: &[FieldPath]) {
        let stale: Vec<FieldPath> = self
            .tree
            .array_paths()
            .filter(|array| changed.iter().any(|c| array.starts_with(c)))
            .cloned()
            .collect();
        if stale.is_empty() {
            return;
        }
        for array in &stale {
            self.tree.forget_arrays_under(array);
        }
        self.rebuild_tree();
    }

    fn finish_change(&mut self, mut report: DerivationReport, mut validate: Vec<FieldPath>) -> ChangeOutcome {
        for diagnostic in std::mem::take(&mut report.diagnostics) {
            self.report(diagnostic);
        }
        self.sync_structure(&report.changed);

        let mut tasks = self.start_derivations(&report);
        validate.extend(report.changed.iter().cloned());
        self.refresh();
        tasks.extend(self.validate_async(&validate));
        self.refresh();
        self.publish();

        ChangeOutcome {
            changed: report.changed,
            passes: report.passes,
            converged: report.converged,
            tasks,
        }
    }

    fn start_derivations(&mut self, report: &DerivationReport) -> Vec<AsyncTask> {
        let mut tasks = Vec::new();
        for request in &report.async_requests {
            let Some(derivation) = self.deps.async_derivations.get(&request.name).cloned() else {
                self.report(Diagnostic::warning(
                    DiagnosticCode::UnknownFunction,
                    Some(&request.owner),
                    format!("async derivation '{}' is not registered", request.name),
                ));
                continue;
            };
            let (item, index) = item_of(&self.value, request.scope.as_ref());
            let input = AsyncDerivationInput {
                target: request.target.clone(),
                form_value: self.value.clone(),
                field_value: path::resolve(&self.value, &request.owner)
                    .cloned()
                    .unwrap_or(Value::Null),
                item: item.cloned(),
                index,
            };
            let ticket = self.derivations.issue(&request.target);
            tracing::debug!(target_path = %request.target, generation = ticket.generation, "async derivation issued");
            tasks.push(AsyncTask::Derivation(DerivationTask::new(ticket, request, derivation, input)));
        }
        tasks
    }

    /// Start async validation for value fields related to `paths`, or whose
    /// async validators are gated on them
    fn validate_async(&mut self, paths: &[FieldPath]) -> Vec<AsyncTask> {
        let mut tasks = Vec::new();
        let mut failures = Vec::new();
        let targets: Vec<usize> = self
            .tree
            .instances()
            .iter()
            .enumerate()
            .filter(|(_, instance)| {
                instance.kind() == FieldKind::Value
                    && instance.def.validators.iter().any(|v| v.is_async())
                    && paths
                        .iter()
                        .any(|p| p.is_related(&instance.path) || async_gate_reads(instance, p))
            })
            .map(|(i, _)| i)
            .collect();

        for position in targets {
            let instance = &self.tree.instances()[position];
            let field = instance.path.clone();
            let state = self.states.get(&field).cloned().unwrap_or_default();
            self.async_errors.remove(&field);
            if state.hidden || state.disabled {
                self.validations.invalidate(&field);
                continue;
            }

            let value = path::resolve(&self.value, &field).unwrap_or(&path::NULL);
            let ctx = ValidationContext {
                field: &field,
                value,
                form_value: &self.value,
                scope: instance.scope.as_ref(),
                required: state.required,
                functions: &self.deps.functions,
                validators: &self.deps.validators,
            };
            let sync = validation::run_sync(&instance.def.validators, &ctx);
            if !sync.is_valid() {
                self.validations.invalidate(&field);
                continue;
            }
            let plan = validation::task::plan(&instance.def.validators, &ctx, &self.deps, &mut failures);
            if plan.is_empty() {
                self.validations.invalidate(&field);
                continue;
            }
            let ticket = self.validations.issue(&field);
            tracing::debug!(field = %field, generation = ticket.generation, "async validation issued");
            tasks.push(AsyncTask::Validation(plan.into_task(ticket)));
        }

        for failure in failures {
            self.report(failure);
        }
        tasks
    }

    /// Recompute every field's state
    fn refresh(&mut self) {
        let instances = self.tree.instances();
        let mut flags: Vec<Flags> = Vec::with_capacity(instances.len());
        let mut states = BTreeMap::new();
        let mut diagnostics = Vec::new();

        for instance in instances {
            let def = &instance.def;
            let field_value = path::resolve(&self.value, &instance.path);
            let ctx = ConditionContext::new(&self.value, &self.deps.functions)
                .with_field_value(field_value)
                .with_scope(instance.scope.as_ref());

            let mut own = instance
                .parent
                .map(|parent| flags[parent].inherited())
                .unwrap_or_default();
            own.disabled |= self.options.disabled;
            for (kind, condition) in &def.logic {
                let on = match condition.evaluate(&ctx) {
                    Ok(on) => on,
                    Err(e) => {
                        diagnostics.push(Diagnostic::warning(
                            DiagnosticCode::ExpressionFailed,
                            Some(&instance.path),
                            format!("{:?} condition failed: {}", kind, e),
                        ));
                        false
                    }
                };
                match kind {
                    LogicKind::Hidden => own.hidden |= on,
                    LogicKind::Disabled => own.disabled |= on,
                    LogicKind::Readonly => own.readonly |= on,
                    LogicKind::Required => own.required |= on,
                }
            }
            flags.push(own);

            let mut errors = Vec::new();
            if def.kind == FieldKind::Value && !own.hidden && !own.disabled {
                let ctx = ValidationContext {
                    field: &instance.path,
                    value: field_value.unwrap_or(&path::NULL),
                    form_value: &self.value,
                    scope: instance.scope.as_ref(),
                    required: own.required,
                    functions: &self.deps.functions,
                    validators: &self.deps.validators,
                };
                let sync = validation::run_sync(&def.validators, &ctx);
                diagnostics.extend(sync.failures);
                errors = sync.errors;
                if errors.is_empty() {
                    if let Some(async_errors) = self.async_errors.get(&instance.path) {
                        for (index, error) in async_errors {
                            let active = def
                                .validators
                                .get(*index)
                                .is_some_and(|v| validation::is_active(v, &ctx, &mut diagnostics));
                            if active {
                                errors.push(error.clone());
                            }
                        }
                    }
                }
                if let Some(error) = self.derivation_errors.get(&instance.path) {
                    errors.push(error.clone());
                }
                if let Some(server) = self.server_errors.get(&instance.path) {
                    errors.extend(server.iter().cloned());
                }
            }

            let messages = errors
                .iter()
                .map(|error| {
                    let resolved = resolve_message(
                        error,
                        &def.config.validation_messages,
                        &self.config.default_validation_messages,
                        def.label(),
                    );
                    if let Some(problem) = resolved.template_error {
                        diagnostics.push(Diagnostic::warning(
                            DiagnosticCode::MessageTemplate,
                            Some(&instance.path),
                            format!("message for '{}' failed to render: {}", error.kind, problem),
                        ));
                    }
                    resolved.message
                })
                .collect();

            let touched = self.touched.contains(&instance.path);
            states.insert(
                instance.path.clone(),
                FieldState {
                    hidden: own.hidden,
                    disabled: own.disabled,
                    readonly: own.readonly,
                    required: own.required,
                    errors,
                    messages,
                    touched,
                    pending: self.validations.is_pending(&instance.path),
                    show_errors: touched || self.submitted,
                },
            );
        }

        self.states = states;
        for diagnostic in diagnostics {
            self.report(diagnostic);
        }
    }

    fn publish(&mut self) {
        self.value_cell.write(self.value.clone());
        self.states_cell.write(self.states.clone());
        self.submitting_cell.write(self.submitting);
    }

    /// Feed back a finished task; returns follow-up tasks
    pub fn apply(&mut self, completion: Completion) -> Vec<AsyncTask> {
        match completion {
            Completion::Validation(done) => {
                let Some(field) = self.validations.complete(&done.ticket) else {
                    tracing::debug!(generation = done.ticket.generation, "stale validation discarded");
                    return Vec::new();
                };
                for failure in &done.failures {
                    self.report(Diagnostic::warning(
                        DiagnosticCode::AsyncFailed,
                        Some(&field),
                        failure.clone(),
                    ));
                }
                if done.errors.is_empty() {
                    self.async_errors.remove(&field);
                } else {
                    self.async_errors.insert(field, done.errors);
                }
                self.refresh();
                self.publish();
                Vec::new()
            }
            Completion::Derivation(done) => {
                let Some(target) = self.derivations.complete(&done.ticket) else {
                    tracing::debug!(generation = done.ticket.generation, "stale derivation discarded");
                    return Vec::new();
                };
                let derived = match done.result {
                    Ok(derived) => derived,
                    Err(message) => {
                        self.report(Diagnostic::warning(
                            DiagnosticCode::AsyncFailed,
                            Some(&target),
                            format!("async derivation failed: {}", message),
                        ));
                        if let Some(error) = done.on_error.to_error(DERIVATION_ERROR_KIND, &message) {
                            self.derivation_errors.insert(target, error);
                            self.refresh();
                            self.publish();
                        }
                        return Vec::new();
                    }
                };
                let cleared = self.derivation_errors.remove(&target).is_some();
                let overridden = done.stop_on_user_override && self.tracker.is_modified(&target);
                let current = path::resolve(&self.value, &target).unwrap_or(&path::NULL);
                if overridden || strict_equals(current, &derived) {
                    if cleared {
                        self.refresh();
                        self.publish();
                    }
                    return Vec::new();
                }
                self.write(target, derived).tasks
            }
        }
    }

    /// Run tasks and their follow-ups until none are left
    pub async fn settle(&mut self, tasks: Vec<AsyncTask>) {
        let mut running: FuturesUnordered<_> = tasks.into_iter().map(AsyncTask::run).collect();
        while let Some(completion) = running.next().await {
            for task in self.apply(completion) {
                running.push(task.run());
            }
        }
    }

    /// The value to submit, without fields excluded by the value policy
    pub fn submission_value(&self) -> Value {
        let instances = self.tree.instances();
        self.tree.submission_value(&self.value, &self.options, |position| {
            self.states
                .get(&instances[position].path)
                .map(|s| (s.hidden, s.disabled, s.readonly))
                .unwrap_or_default()
        })
    }

    /// Validate everything and start submitting.
    ///
    /// Returns `Ok(None)` when the form is invalid and the submission
    /// requires a valid form.
    pub fn begin_submit(&mut self) -> Result<Option<SubmissionTask>> {
        if self.submitting {
            return Err(Error::SubmissionInFlight);
        }
        let submission = self.config.submission.clone().unwrap_or_default();
        let action = self
            .deps
            .submit_for(submission.action.as_deref())
            .ok_or(Error::NoSubmissionAction)?;

        self.submitted = true;
        let fields: Vec<FieldPath> = self
            .tree
            .instances()
            .iter()
            .filter(|i| i.def.holds_value())
            .map(|i| i.path.clone())
            .collect();
        self.touched.extend(fields);
        self.refresh();

        if submission.require_valid && !self.is_valid() {
            tracing::debug!("submission refused, form is invalid");
            self.publish();
            return Ok(None);
        }

        self.submitting = true;
        self.publish();
        let value = self.submission_value();
        let submitted = value.clone();
        let future = async move {
            SubmissionOutcome {
                result: action.submit(submitted).await,
            }
        }
        .boxed();
        Ok(Some(SubmissionTask { value, future }))
    }

    /// Apply the result of a submission; true on success
    pub fn finish_submit(&mut self, outcome: SubmissionOutcome) -> bool {
        self.submitting = false;
        let success = match outcome.result {
            Ok(None) => true,
            Ok(Some(errors)) => {
                self.apply_server_errors(errors);
                false
            }
            Err(message) => {
                self.report(Diagnostic::error(
                    DiagnosticCode::SubmissionFailed,
                    None,
                    format!("submission failed: {}", message),
                ));
                false
            }
        };
        self.refresh();
        self.publish();
        success
    }

    fn apply_server_errors(&mut self, errors: ServerErrors) {
        for (raw, message) in errors {
            let known = FieldPath::parse(&raw)
                .ok()
                .filter(|path| self.tree.get(path).is_some());
            let Some(path) = known else {
                self.report(Diagnostic::warning(
                    DiagnosticCode::SubmissionFailed,
                    None,
                    format!("server error for unknown field '{}': {}", raw, message),
                ));
                continue;
            };
            self.server_errors
                .entry(path)
                .or_default()
                .push(ValidationError::new("server").with_param("message", Value::String(message)));
        }
    }

    /// Validate, submit and apply the result
    pub async fn submit(&mut self) -> Result<bool> {
        let Some(task) = self.begin_submit()? else {
            return Ok(false);
        };
        let outcome = task.run().await;
        Ok(self.finish_submit(outcome))
    }

    pub fn page_count(&self) -> usize {
        self.tree.pages().len()
    }

    /// Index of the current page, `None` for forms without pages
    pub fn current_page(&self) -> Option<usize> {
        (self.page_count() > 0).then_some(self.current_page)
    }

    fn page_hidden(&self, page: usize) -> bool {
        let position = self.tree.pages()[page];
        let path = &self.tree.instances()[position].path;
        self.states.get(path).is_some_and(|s| s.hidden)
    }

    /// Advance to the next visible page; refused while the current page
    /// has errors, which are then shown
    pub fn next_page(&mut self) -> bool {
        if self.page_count() == 0 {
            return false;
        }
        let invalid: Vec<FieldPath> = self
            .tree
            .instances()
            .iter()
            .filter(|i| i.page == Some(self.current_page))
            .filter(|i| self.states.get(&i.path).is_some_and(|s| !s.is_valid()))
            .map(|i| i.path.clone())
            .collect();
        if !invalid.is_empty() {
            self.touched.extend(invalid);
            self.refresh();
            self.publish();
            return false;
        }
        match (self.current_page + 1..self.page_count()).find(|&p| !self.page_hidden(p)) {
            Some(next) => {
                self.current_page = next;
                true
            }
            None => false,
        }
    }

    /// Go back to the previous visible page
    pub fn previous_page(&mut self) -> bool {
        match (0..self.current_page).rev().find(|&p| !self.page_hidden(p)) {
            Some(previous) => {
                self.current_page = previous;
                true
            }
            None => false,
        }
    }

    /// Restore the initial value and forget all session state
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.touched.clear();
        self.submitted = false;
        self.validations.invalidate_all();
        self.derivations.invalidate_all();
        self.async_errors.clear();
        self.derivation_errors.clear();
        self.server_errors.clear();
        self.current_page = 0;
        self.queued.clear();
        self.restart();
    }

    /// Swap in a new config, keeping the current value. Session state (edit
    /// marks, touched fields, async and server results, page) starts over.
    /// Returns false when the config is unchanged.
    pub fn reconfigure(&mut self, config: FormConfig) -> bool {
        let hash = config.hash();
        if hash == self.hash {
            return false;
        }
        tracing::debug!(from = %self.hash, to = %hash, "form reconfigured");
        self.config = config;
        self.hash = hash;
        self.tracker.reset();
        self.touched.clear();
        self.submitted = false;
        self.validations.invalidate_all();
        self.derivations.invalidate_all();
        self.async_errors.clear();
        self.derivation_errors.clear();
        self.server_errors.clear();
        self.current_page = 0;
        self.queued.clear();
        self.compile();
        self.rebuild_tree();
        let report = self.derive(Trigger::All);
        let outcome = self.finish_change(report, Vec::new());
        self.queued.extend(outcome.tasks);
        true
    }
}

/// Whether an async validator's `when` on `instance` reads `changed`
fn async_gate_reads(instance: &FieldInstance, changed: &FieldPath) -> bool {
    instance
        .def
        .validators
        .iter()
        .filter(|v| v.is_async())
        .filter_map(|v| v.when.as_ref())
        .any(|when| {
            when.references()
                .0
                .iter()
                .filter_map(|p| p.resolve_against(instance.scope.as_ref()).ok())
                .any(|p| p.is_related(changed))
        })
}

fn renumber_map<V>(
    map: BTreeMap<FieldPath, V>,
    f: impl Fn(&FieldPath) -> Option<FieldPath>,
) -> BTreeMap<FieldPath, V> {
    map.into_iter()
        .filter_map(|(path, value)| f(&path).map(|next| (next, value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SIGNUP: &str = r#"
defaultValidationMessages:
  required: "{{fieldLabel}} is required"
  minLength: "{{fieldLabel}} needs {{requiredLength}} characters"
fields:
  - key: accountType
    type: select
    value: personal
  - key: name
    type: input
    label: Name
    required: true
    minLength: 2
  - key: company
    type: input
    label: Company
    logic:
      - type: hidden
        condition:
          type: fieldValue
          fieldPath: accountType
          operator: notEquals
          value: business
    validators:
      - type: required
  - key: greeting
    type: input
    derivation: "'Hello ' + (formValue.name ?? '')"
"#;

    fn form() -> Form {
        Form::from_yaml(SIGNUP, Dependencies::new(), json!({})).unwrap()
    }

    #[test]
    fn test_initial_state() {
        let form = form();
        assert_eq!(form.get("accountType"), Some(&json!("personal")));
        let name = form.field_state("name").unwrap();
        assert!(name.required);
        assert_eq!(name.messages, vec!["Name is required"]);
        assert!(!name.show_errors);
        assert!(form.field_state("company").unwrap().hidden);
        assert!(form.field_state("company").unwrap().errors.is_empty());
        assert!(form.diagnostics().is_empty());
    }

    #[test]
    fn test_set_value_revalidates_and_marks() {
        let mut form = form();
        form.set_value("name", json!("A")).unwrap();
        let name = form.field_state("name").unwrap();
        assert_eq!(name.messages, vec!["Name needs 2 characters"]);
        assert!(form.tracker().is_modified(&FieldPath::parse("name").unwrap()));

        form.patch("accountType", json!("business")).unwrap();
        assert!(!form.tracker().is_modified(&FieldPath::parse("accountType").unwrap()));
        let company = form.field_state("company").unwrap();
        assert!(!company.hidden);
        assert_eq!(company.messages, vec!["Company is required"]);
    }

    #[test]
    fn test_unknown_field() {
        let mut form = form();
        assert!(matches!(form.set_value("nope", json!(1)), Err(Error::UnknownField(_))));
        assert!(matches!(form.set_value("$.x", json!(1)), Err(Error::UnknownField(_))));
    }

    #[test]
    fn test_blur_shows_errors() {
        let mut form = form();
        form.blur("name").unwrap();
        assert!(form.field_state("name").unwrap().show_errors);
        assert!(!form.field_state("company").unwrap().show_errors);
    }

    #[test]
    fn test_observables_follow_changes() {
        let mut form = form();
        let value = form.value_cell();
        assert!(!form.valid_cell().read());
        form.set_value("name", json!("Ada")).unwrap();
        assert_eq!(value.read()["name"], json!("Ada"));
        assert!(form.valid_cell().read());
    }

    #[test]
    fn test_submission_value_excludes_hidden() {
        let mut form = form();
        form.set_value("name", json!("Ada")).unwrap();
        let submitted = form.submission_value();
        assert!(submitted.get("company").is_none());
        assert_eq!(submitted["name"], json!("Ada"));
    }

    #[test]
    fn test_reset_restores_initial() {
        let mut form = form();
        form.set_value("name", json!("Ada")).unwrap();
        form.blur("name").unwrap();
        form.reset();
        assert_eq!(form.get("name"), Some(&Value::Null));
        assert!(form.tracker().is_empty());
        assert!(!form.field_state("name").unwrap().touched);
    }

    #[test]
    fn test_reconfigure_only_on_change() {
        let mut form = form();
        let same = form.config().clone();
        assert!(!form.reconfigure(same));

        let mut changed = form.config().clone();
        changed.fields.push(crate::config::FieldConfig::new("extra", "input"));
        assert!(form.reconfigure(changed));
        assert_eq!(form.get("extra"), Some(&Value::Null));
    }

    #[test]
    fn test_begin_submit_without_action() {
        let mut form = form();
        assert!(matches!(form.begin_submit(), Err(Error::NoSubmissionAction)));
    }
}
