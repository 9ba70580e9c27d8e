//! Field definitions
//!
//! A [`FieldConfig`] is compiled once into a [`FieldDef`]: its type is
//! classified through the [`FieldTypes`] registry, logic conditions,
//! validators and derivation rules are parsed, and children are compiled
//! recursively. Array item templates are compiled once and shared by every
//! item instance.
//!
//! Problems are field-scoped. A field with an unknown type is left out
//! (its siblings are unaffected); a broken logic, validator or derivation
//! entry is dropped from its field. Each is reported as a diagnostic.

use crate::condition::CompiledCondition;
use crate::config::{FieldConfig, LogicKind};
use crate::derivation::RuleSpec;
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::path::FieldPath;
use crate::validation::{self, CompiledValidator};
use std::collections::HashMap;
use std::sync::Arc;

/// Structural containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// Wizard step, layout only
    Page,
    /// Layout only
    Row,
    /// Nests an object under its key
    Group,
    /// Nests a list of items under its key
    Array,
}

impl ContainerKind {
    /// Whether children write under this container's key
    pub fn nests_value(&self) -> bool {
        matches!(self, ContainerKind::Group | ContainerKind::Array)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Container(ContainerKind),
    /// Value-bearing leaf
    Value,
    /// Display or button leaf, no value
    Display,
}

/// Registry of known field types
#[derive(Debug, Clone)]
pub struct FieldTypes {
    kinds: HashMap<String, FieldKind>,
}

impl Default for FieldTypes {
    fn default() -> Self {
        let mut kinds = HashMap::new();
        kinds.insert("page".to_string(), FieldKind::Container(ContainerKind::Page));
        kinds.insert("row".to_string(), FieldKind::Container(ContainerKind::Row));
        kinds.insert("group".to_string(), FieldKind::Container(ContainerKind::Group));
        kinds.insert("array".to_string(), FieldKind::Container(ContainerKind::Array));
        for name in [
            "input",
            "textarea",
            "select",
            "radio",
            "checkbox",
            "multi-checkbox",
            "toggle",
            "slider",
            "datepicker",
            "hidden",
        ] {
            kinds.insert(name.to_string(), FieldKind::Value);
        }
        for name in ["text", "button", "submit", "next", "previous"] {
            kinds.insert(name.to_string(), FieldKind::Display);
        }
        Self { kinds }
    }
}

impl FieldTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom leaf type
    pub fn register(&mut self, name: &str, kind: FieldKind) {
        self.kinds.insert(name.to_string(), kind);
    }

    pub fn kind(&self, name: &str) -> Option<FieldKind> {
        self.kinds.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }
}

/// A compiled field
#[derive(Debug)]
pub struct FieldDef {
    pub config: FieldConfig,
    pub kind: FieldKind,
    /// Static flags are folded in as constant conditions
    pub logic: Vec<(LogicKind, CompiledCondition)>,
    pub validators: Vec<CompiledValidator>,
    pub derivations: Vec<RuleSpec>,
    /// Children of a container; the item template of an array
    pub children: Vec<Arc<FieldDef>>,
    /// Explicit field sets for the first items of an array
    pub item_sets: Vec<Vec<Arc<FieldDef>>>,
}

impl FieldDef {
    pub fn key(&self) -> &str {
        &self.config.key
    }

    pub fn label(&self) -> &str {
        self.config.display_label()
    }

    pub fn is_array(&self) -> bool {
        self.kind == FieldKind::Container(ContainerKind::Array)
    }

    pub fn is_page(&self) -> bool {
        self.kind == FieldKind::Container(ContainerKind::Page)
    }

    /// Leaf with a value, or a group/array holding values
    pub fn holds_value(&self) -> bool {
        match self.kind {
            FieldKind::Value => true,
            FieldKind::Container(kind) => kind.nests_value(),
            FieldKind::Display => false,
        }
    }

    /// Field set for item `index` of an array
    pub fn item_fields(&self, index: usize) -> &[Arc<FieldDef>] {
        self.item_sets
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or(&self.children)
    }
}

/// Compile a list of sibling fields; `base` only labels diagnostics
pub fn compile_fields(
    configs: &[FieldConfig],
    types: &FieldTypes,
    base: &FieldPath,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<Arc<FieldDef>> {
    configs
        .iter()
        .filter_map(|config| compile_field(config, types, base, diagnostics))
        .collect()
}

pub fn compile_field(
    config: &FieldConfig,
    types: &FieldTypes,
    base: &FieldPath,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<Arc<FieldDef>> {
    let path = base.child(&config.key);
    let Some(kind) = types.kind(&config.field_type) else {
        diagnostics.push(Diagnostic::error(
            DiagnosticCode::InvalidField,
            Some(&path),
            crate::Error::UnknownFieldType {
                key: config.key.clone(),
                field_type: config.field_type.clone(),
            }
            .to_string(),
        ));
        return None;
    };

    let mut logic = Vec::new();
    for (kind, flag) in [
        (LogicKind::Hidden, config.hidden),
        (LogicKind::Disabled, config.disabled),
        (LogicKind::Readonly, config.readonly),
        (LogicKind::Required, config.required),
    ] {
        if flag == Some(true) {
            logic.push((kind, CompiledCondition::Always(true)));
        }
    }
    for entry in &config.logic {
        match CompiledCondition::from_spec(&entry.condition) {
            Ok(condition) => logic.push((entry.kind, condition)),
            Err(e) => diagnostics.push(Diagnostic::error(
                DiagnosticCode::InvalidField,
                Some(&path),
                format!("dropped {:?} logic: {}", entry.kind, e),
            )),
        }
    }

    let (validators, problems) = if kind == FieldKind::Value {
        validation::compile(config)
    } else {
        (Vec::new(), Vec::new())
    };
    for problem in problems {
        diagnostics.push(Diagnostic::error(
            DiagnosticCode::InvalidField,
            Some(&path),
            format!("dropped validator: {}", problem),
        ));
    }

    let mut derivations = Vec::new();
    if let Some(source) = &config.derivation {
        match RuleSpec::shorthand(source) {
            Ok(rule) => derivations.push(rule),
            Err(e) => diagnostics.push(Diagnostic::error(
                DiagnosticCode::InvalidField,
                Some(&path),
                format!("dropped derivation: {}", e),
            )),
        }
    }
    for entry in &config.derivations {
        match RuleSpec::compile(entry) {
            Ok(rule) => derivations.push(rule),
            Err(e) => diagnostics.push(Diagnostic::error(
                DiagnosticCode::InvalidField,
                Some(&path),
                format!("dropped derivation: {}", e),
            )),
        }
    }

    let (children, item_sets) = match kind {
        FieldKind::Container(ContainerKind::Array) => {
            let item_sets = config
                .items
                .iter()
                .map(|set| compile_fields(set, types, &path, diagnostics))
                .collect();
            (compile_fields(&config.fields, types, &path, diagnostics), item_sets)
        }
        FieldKind::Container(_) => (compile_fields(&config.fields, types, &path, diagnostics), Vec::new()),
        _ => (Vec::new(), Vec::new()),
    };

    let mut config = config.clone();
    config.fields.clear();
    config.items.clear();

    Some(Arc::new(FieldDef {
        config,
        kind,
        logic,
        validators,
        derivations,
        children,
        item_sets,
    }))
}
