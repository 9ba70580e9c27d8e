//! Fixed-point propagation of derived values
//!
//! A propagation runs passes over the rule graph in topological order. A
//! rule is evaluated only while it is pending; when it writes a new value,
//! the rules reading that target become pending, in the same pass if they
//! come later in the order, otherwise in the next pass. Propagation stops
//! when nothing is pending (converged) or after `max_passes` passes, in
//! which case a [`DiagnosticCode::DerivationCapExceeded`] warning is
//! recorded and the value is left as the last pass wrote it.
//!
//! Writes only happen when the new value differs from the current one, so
//! an acyclic graph always converges and a second propagation with no
//! changes writes nothing.

use super::graph::{Rule, RuleGraph};
use super::rules::RuleSource;
use crate::condition::ConditionContext;
use crate::config::OnErrorConfig;
use crate::deps::{DerivationInput, Dependencies};
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::expression::interpreter::strict_equals;
use crate::interaction::UserInteractionTracker;
use crate::path::{self, FieldPath, Segment};
use serde_json::Value;

/// What starts a propagation
#[derive(Debug, Clone, Copy)]
pub enum Trigger<'a> {
    /// Every rule (form init, reset, array events)
    All,
    /// Rules reading any of these paths
    Changed(&'a [FieldPath]),
}

/// An async derivation the caller should start
#[derive(Debug, Clone)]
pub struct AsyncRequest {
    pub rule: usize,
    pub name: String,
    pub target: FieldPath,
    pub owner: FieldPath,
    pub scope: Option<FieldPath>,
    pub debounce_ms: u64,
    pub stop_on_user_override: bool,
    pub on_error: OnErrorConfig,
}

#[derive(Debug, Clone, Default)]
pub struct DerivationReport {
    pub passes: usize,
    pub converged: bool,
    /// Targets written, in write order, without duplicates
    pub changed: Vec<FieldPath>,
    pub async_requests: Vec<AsyncRequest>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Mutable state a propagation works on
pub struct Propagation<'a> {
    pub graph: &'a RuleGraph,
    pub deps: &'a Dependencies,
    pub tracker: &'a mut UserInteractionTracker,
    pub max_passes: usize,
}

impl Propagation<'_> {
    pub fn run(&mut self, value: &mut Value, trigger: Trigger<'_>) -> DerivationReport {
        let graph = self.graph;
        let n = graph.len();
        let mut report = DerivationReport::default();

        // by_dependency: dirtied by a dependency change rather than a full run
        let mut pending = vec![false; n];
        let mut by_dependency = vec![false; n];
        match trigger {
            Trigger::All => pending.iter_mut().for_each(|p| *p = true),
            Trigger::Changed(paths) => {
                // an edit of the rule's own target is not a dependency change
                for rule in graph.rules() {
                    if paths.iter().any(|p| rule.depends_on(p)) {
                        pending[rule.id] = true;
                        by_dependency[rule.id] = paths.iter().any(|p| *p != rule.target && rule.depends_on(p));
                    }
                }
            }
        }

        let mut requested = vec![false; n];
        while pending.iter().any(|p| *p) {
            if report.passes == self.max_passes {
                let stuck: Vec<String> = graph
                    .rules()
                    .iter()
                    .filter(|r| pending[r.id])
                    .map(|r| r.target.to_string())
                    .collect();
                report.diagnostics.push(Diagnostic::warning(
                    DiagnosticCode::DerivationCapExceeded,
                    None,
                    format!(
                        "derivations did not settle after {} passes; still pending: {}",
                        self.max_passes,
                        stuck.join(", ")
                    ),
                ));
                return report;
            }
            report.passes += 1;
            tracing::debug!(pass = report.passes, "derivation pass");

            let mut next = vec![false; n];
            for &id in graph.order() {
                if !std::mem::take(&mut pending[id]) {
                    continue;
                }
                let rule = graph.rule(id);
                let dirtied_by_dependency = std::mem::take(&mut by_dependency[id]);
                let Some(new_value) = self.evaluate(rule, value, dirtied_by_dependency, &mut report, &mut requested)
                else {
                    continue;
                };
                let current = path::resolve(value, &rule.target).unwrap_or(&path::NULL);
                if strict_equals(current, &new_value) {
                    continue;
                }
                tracing::trace!(target_path = %rule.target, "derived value written");
                path::write(value, &rule.target, new_value);
                if !report.changed.contains(&rule.target) {
                    report.changed.push(rule.target.clone());
                }
                for reader in graph.dependents(&rule.target) {
                    if reader.id != id && graph.rank(reader.id) > graph.rank(id) {
                        pending[reader.id] = true;
                    } else {
                        next[reader.id] = true;
                    }
                    by_dependency[reader.id] |= reader.id != id;
                }
            }
            pending = next;
        }

        report.converged = true;
        report
    }

    /// The value a rule would write, `None` to skip it
    fn evaluate(
        &mut self,
        rule: &Rule,
        value: &Value,
        dirtied_by_dependency: bool,
        report: &mut DerivationReport,
        requested: &mut [bool],
    ) -> Option<Value> {
        let spec = &rule.spec;
        let field_value = path::resolve(value, &rule.owner).unwrap_or(&path::NULL);
        let ctx = ConditionContext::new(value, &self.deps.functions)
            .with_field_value(Some(field_value))
            .with_scope(rule.scope.as_ref());

        if let Some(condition) = &spec.condition {
            match condition.evaluate(&ctx) {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => {
                    report.diagnostics.push(Diagnostic::warning(
                        DiagnosticCode::ExpressionFailed,
                        Some(&rule.owner),
                        format!("derivation condition failed: {}", e),
                    ));
                    return None;
                }
            }
        }

        if dirtied_by_dependency && spec.re_engage_on_dependency_change && self.tracker.clear(&rule.target) {
            tracing::debug!(target_path = %rule.target, "derivation re-engaged");
        }
        if spec.stop_on_user_override && self.tracker.is_modified(&rule.target) {
            return None;
        }

        match &spec.source {
            RuleSource::Value(v) => Some(v.clone()),
            RuleSource::Expression(expression) => match expression.evaluate(&ctx.eval_context()) {
                Ok(v) => Some(v),
                Err(e) => {
                    report.diagnostics.push(Diagnostic::warning(
                        DiagnosticCode::ExpressionFailed,
                        Some(&rule.owner),
                        format!("derivation '{}' failed: {}", expression.source(), e),
                    ));
                    None
                }
            },
            RuleSource::Function(name) => {
                let Some(function) = self.deps.derivations.get(name) else {
                    report.diagnostics.push(Diagnostic::warning(
                        DiagnosticCode::UnknownFunction,
                        Some(&rule.owner),
                        format!("derivation function '{}' is not registered", name),
                    ));
                    return None;
                };
                let (item, index) = item_of(value, rule.scope.as_ref());
                let input = DerivationInput {
                    target: &rule.target,
                    form_value: value,
                    field_value,
                    item,
                    index,
                };
                match function(&input) {
                    Ok(v) => Some(v),
                    Err(message) => {
                        report.diagnostics.push(Diagnostic::warning(
                            DiagnosticCode::ExpressionFailed,
                            Some(&rule.owner),
                            format!("derivation function '{}' failed: {}", name, message),
                        ));
                        None
                    }
                }
            }
            RuleSource::Async(name) => {
                if !std::mem::replace(&mut requested[rule.id], true) {
                    report.async_requests.push(AsyncRequest {
                        rule: rule.id,
                        name: name.clone(),
                        target: rule.target.clone(),
                        owner: rule.owner.clone(),
                        scope: rule.scope.clone(),
                        debounce_ms: spec.debounce_ms,
                        stop_on_user_override: spec.stop_on_user_override,
                        on_error: spec.on_error.clone(),
                    });
                }
                None
            }
        }
    }
}

/// The array item and index a scope points at
pub fn item_of<'v>(value: &'v Value, scope: Option<&FieldPath>) -> (Option<&'v Value>, Option<usize>) {
    let Some(scope) = scope else {
        return (None, None);
    };
    match scope.last() {
        Some(Segment::Index(index)) => (path::resolve(value, scope), Some(*index)),
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;
    use crate::field::{compile_fields, FieldTypes};
    use crate::tree::FieldTree;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixture {
        graph: RuleGraph,
        deps: Dependencies,
        tracker: UserInteractionTracker,
    }

    impl Fixture {
        fn new(fields: serde_json::Value, value: &Value) -> Self {
            let configs: Vec<FieldConfig> = serde_json::from_value(fields).unwrap();
            let defs = compile_fields(&configs, &FieldTypes::new(), &FieldPath::root(), &mut Vec::new());
            let mut tree = FieldTree::new(defs);
            tree.rebuild(value);
            let graph = RuleGraph::build(&tree, &mut Vec::new());
            Self {
                graph,
                deps: Dependencies::new(),
                tracker: UserInteractionTracker::new(),
            }
        }

        fn run(&mut self, value: &mut Value, trigger: Trigger<'_>, max_passes: usize) -> DerivationReport {
            Propagation {
                graph: &self.graph,
                deps: &self.deps,
                tracker: &mut self.tracker,
                max_passes,
            }
            .run(value, trigger)
        }
    }

    fn p(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn test_chain_settles_in_one_pass() {
        let fields = json!([
            {"key": "total", "type": "input", "derivation": "formValue.subtotal + formValue.tax"},
            {"key": "tax", "type": "input", "derivation": "formValue.subtotal * 0.5"},
            {"key": "subtotal", "type": "input", "derivation": "formValue.price * formValue.qty"}
        ]);
        let mut value = json!({"price": 2, "qty": 3});
        let mut fixture = Fixture::new(fields, &value);
        let report = fixture.run(&mut value, Trigger::All, 10);
        assert!(report.converged);
        assert_eq!(report.passes, 1);
        assert_eq!(value, json!({"price": 2, "qty": 3, "subtotal": 6, "tax": 3, "total": 9}));

        let again = fixture.run(&mut value, Trigger::All, 10);
        assert!(again.changed.is_empty());
    }

    #[test]
    fn test_changed_trigger_only_runs_readers() {
        let fields = json!([
            {"key": "double", "type": "input", "derivation": "formValue.a * 2"},
            {"key": "stamp", "type": "input", "derivation": "'static'"}
        ]);
        let mut value = json!({"a": 1});
        let mut fixture = Fixture::new(fields, &value);
        let changed = [p("a")];
        let report = fixture.run(&mut value, Trigger::Changed(&changed), 10);
        assert_eq!(report.changed, vec![p("double")]);
        assert!(value.get("stamp").is_none());
    }

    #[test]
    fn test_cycle_hits_cap() {
        let fields = json!([
            {"key": "a", "type": "input", "derivation": "formValue.b + 1"},
            {"key": "b", "type": "input", "derivation": "formValue.a + 1"}
        ]);
        let mut value = json!({"a": 0, "b": 0});
        let mut fixture = Fixture::new(fields, &value);
        let report = fixture.run(&mut value, Trigger::All, 5);
        assert!(!report.converged);
        assert_eq!(report.passes, 5);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].code, DiagnosticCode::DerivationCapExceeded);
    }

    #[test]
    fn test_user_override() {
        let fields = json!([
            {"key": "price", "type": "input"},
            {"key": "display", "type": "input", "derivations": [
                {"expression": "formValue.price * 10", "stopOnUserOverride": true}
            ]},
            {"key": "sticky", "type": "input", "derivations": [
                {"expression": "formValue.price * 10", "stopOnUserOverride": true, "reEngageOnDependencyChange": true}
            ]}
        ]);
        let mut value = json!({"price": 1, "display": 99, "sticky": 99});
        let mut fixture = Fixture::new(fields, &value);
        fixture.tracker.mark(&p("display"));
        fixture.tracker.mark(&p("sticky"));

        let changed = [p("price")];
        fixture.run(&mut value, Trigger::Changed(&changed), 10);
        assert_eq!(value["display"], json!(99));
        assert_eq!(value["sticky"], json!(10));
        assert!(!fixture.tracker.is_modified(&p("sticky")));
    }

    #[test]
    fn test_own_edit_keeps_override() {
        let fields = json!([
            {"key": "price", "type": "input"},
            {"key": "tax", "type": "input", "derivations": [{
                "expression": "(fieldValue ?? 0) * 0 + formValue.price * 10",
                "stopOnUserOverride": true,
                "reEngageOnDependencyChange": true
            }]}
        ]);
        let mut value = json!({"price": 1, "tax": 5});
        let mut fixture = Fixture::new(fields, &value);
        fixture.tracker.mark(&p("tax"));

        let edited = [p("tax")];
        let report = fixture.run(&mut value, Trigger::Changed(&edited), 10);
        assert!(report.changed.is_empty());
        assert_eq!(value["tax"], json!(5));
        assert!(fixture.tracker.is_modified(&p("tax")));

        let changed = [p("price")];
        fixture.run(&mut value, Trigger::Changed(&changed), 10);
        assert_eq!(value["tax"], json!(10));
        assert!(!fixture.tracker.is_modified(&p("tax")));
    }

    #[test]
    fn test_async_rule_requested_once() {
        let fields = json!([
            {"key": "city", "type": "input", "derivations": [
                {"asyncFunctionName": "lookupCity", "dependsOn": ["zip"]}
            ]}
        ]);
        let mut value = json!({"zip": "1000"});
        let mut fixture = Fixture::new(fields, &value);
        let report = fixture.run(&mut value, Trigger::All, 10);
        assert_eq!(report.async_requests.len(), 1);
        assert_eq!(report.async_requests[0].target, p("city"));
        assert!(report.changed.is_empty());
    }

    #[test]
    fn test_failing_rule_leaves_others() {
        let fields = json!([
            {"key": "bad", "type": "input", "derivation": "formValue.x.toFixed(2)"},
            {"key": "good", "type": "input", "derivation": "formValue.x + 1"}
        ]);
        let mut value = json!({"x": 1});
        let mut fixture = Fixture::new(fields, &value);
        let report = fixture.run(&mut value, Trigger::All, 10);
        assert_eq!(value["good"], json!(2));
        assert_eq!(report.diagnostics.len(), 1);
    }
}
