//! Placed derivation rules and their evaluation order
//!
//! Every rule of every field instance is placed: its target and
//! dependencies become absolute paths in the live value. Rule `b` depends on
//! rule `a` when one of `b`'s dependencies is related to (a prefix of, or
//! inside) `a`'s target. Rules are ordered topologically with declaration
//! order breaking ties; rules on a cycle keep their declaration order after
//! everything else.

use super::rules::RuleSpec;
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::path::FieldPath;
use crate::tree::FieldTree;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A rule placed on one field instance
#[derive(Debug, Clone)]
pub struct Rule {
    /// Declaration order
    pub id: usize,
    /// Field the rule is declared on
    pub owner: FieldPath,
    pub target: FieldPath,
    pub scope: Option<FieldPath>,
    pub deps: Vec<FieldPath>,
    pub spec: Arc<RuleSpec>,
}

impl Rule {
    /// Whether a change at `path` invalidates this rule
    pub fn depends_on(&self, path: &FieldPath) -> bool {
        self.deps.iter().any(|dep| dep.is_related(path))
    }
}

#[derive(Debug, Default)]
pub struct RuleGraph {
    rules: Vec<Rule>,
    order: Vec<usize>,
    /// Position of each rule in `order`
    rank: Vec<usize>,
    /// Rules that sit on a dependency cycle
    cyclic: BTreeSet<usize>,
}

impl RuleGraph {
    /// Place the rules of every instance of `tree`
    pub fn build(tree: &FieldTree, diagnostics: &mut Vec<Diagnostic>) -> Self {
        let mut rules = Vec::new();
        for instance in tree.instances() {
            for spec in &instance.def.derivations {
                match place(spec, &instance.path, instance.scope.as_ref()) {
                    Ok((target, deps)) => rules.push(Rule {
                        id: rules.len(),
                        owner: instance.path.clone(),
                        target,
                        scope: instance.scope.clone(),
                        deps,
                        spec: Arc::new(spec.clone()),
                    }),
                    Err(e) => diagnostics.push(Diagnostic::error(
                        DiagnosticCode::InvalidField,
                        Some(&instance.path),
                        format!("derivation skipped: {}", e),
                    )),
                }
            }
        }
        Self::from_rules(rules)
    }

    pub fn from_rules(rules: Vec<Rule>) -> Self {
        let n = rules.len();
        // edges[a] = rules that read what `a` writes
        let edges: Vec<Vec<usize>> = rules
            .iter()
            .map(|writer| {
                rules
                    .iter()
                    .filter(|reader| reader.id != writer.id && reader.depends_on(&writer.target))
                    .map(|reader| reader.id)
                    .collect()
            })
            .collect();

        let mut indegree = vec![0usize; n];
        for readers in &edges {
            for &reader in readers {
                indegree[reader] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &reader in &edges[next] {
                indegree[reader] -= 1;
                if indegree[reader] == 0 {
                    ready.insert(reader);
                }
            }
        }

        let cyclic: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] > 0).collect();
        if !cyclic.is_empty() {
            tracing::debug!(rules = cyclic.len(), "derivation rules on a cycle");
        }
        order.extend(cyclic.iter().copied());

        let mut rank = vec![0; n];
        for (position, &id) in order.iter().enumerate() {
            rank[id] = position;
        }

        Self {
            rules,
            order,
            rank,
            cyclic,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, id: usize) -> &Rule {
        &self.rules[id]
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule ids in evaluation order
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn rank(&self, id: usize) -> usize {
        self.rank[id]
    }

    pub fn is_cyclic(&self, id: usize) -> bool {
        self.cyclic.contains(&id)
    }

    /// Rules that read `path`
    pub fn dependents<'a>(&'a self, path: &'a FieldPath) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules.iter().filter(move |rule| rule.depends_on(path))
    }
}

/// Resolve a rule's target and dependencies for one instance
fn place(
    spec: &RuleSpec,
    owner: &FieldPath,
    scope: Option<&FieldPath>,
) -> crate::Result<(FieldPath, Vec<FieldPath>)> {
    let target = match &spec.target {
        Some(target) => target.resolve_against(scope)?,
        None => owner.clone(),
    };

    let (paths, reads_field) = spec.references();
    let mut deps = paths
        .iter()
        .map(|p| p.resolve_against(scope))
        .collect::<Result<Vec<_>, _>>()?;
    if reads_field || spec.is_fan_out() {
        deps.push(owner.clone());
    }
    deps.sort();
    deps.dedup();
    Ok((target, deps))
}
