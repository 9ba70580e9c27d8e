//! Field tree instances
//!
//! The compiled definitions are expanded against the form value into
//! addressable [`FieldInstance`]s. Each instance knows its value path, the
//! array item it lives in (its scope for `$.` paths) and its parent, so
//! container state can be inherited.
//!
//! Value composition:
//!
//! - `row` and `page` are layout only; their children write under the
//!   parent's path.
//! - `group` nests an object under its key.
//! - `array` nests a list under its key; item `i` is instantiated from the
//!   item's field set with scope `array[i]`.
//!
//! The array registry remembers which field set each item uses, since
//! `templateOverride` can give one item a different set than its
//! neighbours. It is the source of truth for item counts and is renumbered
//! when items are inserted or removed.

use crate::config::{ExclusionPolicy, MergedOptions};
use crate::field::{ContainerKind, FieldDef, FieldKind};
use crate::path::{self, FieldPath, Segment};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Field set of one array item
pub type ItemFields = Arc<[Arc<FieldDef>]>;

/// One placed field
#[derive(Debug, Clone)]
pub struct FieldInstance {
    pub def: Arc<FieldDef>,
    /// Value path for fields that hold a value; identity path otherwise
    pub path: FieldPath,
    /// Enclosing array item
    pub scope: Option<FieldPath>,
    /// Index of the parent instance
    pub parent: Option<usize>,
    /// Index of the top-level page this field belongs to
    pub page: Option<usize>,
}

impl FieldInstance {
    pub fn kind(&self) -> FieldKind {
        self.def.kind
    }
}

#[derive(Debug, Default)]
pub struct FieldTree {
    roots: Vec<Arc<FieldDef>>,
    arrays: BTreeMap<FieldPath, Vec<ItemFields>>,
    instances: Vec<FieldInstance>,
    index: HashMap<FieldPath, usize>,
    pages: Vec<usize>,
}

impl FieldTree {
    pub fn new(roots: Vec<Arc<FieldDef>>) -> Self {
        Self {
            roots,
            ..Self::default()
        }
    }

    pub fn roots(&self) -> &[Arc<FieldDef>] {
        &self.roots
    }

    pub fn instances(&self) -> &[FieldInstance] {
        &self.instances
    }

    pub fn get(&self, path: &FieldPath) -> Option<&FieldInstance> {
        self.index.get(path).map(|&i| &self.instances[i])
    }

    pub fn position(&self, path: &FieldPath) -> Option<usize> {
        self.index.get(path).copied()
    }

    /// Instance indices of the top-level pages, in order
    pub fn pages(&self) -> &[usize] {
        &self.pages
    }

    /// Instance indices from `index` up to the root
    pub fn ancestors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(Some(index), move |&i| self.instances[i].parent)
    }

    pub fn is_array(&self, path: &FieldPath) -> bool {
        self.arrays.contains_key(path)
    }

    pub fn item_count(&self, array: &FieldPath) -> Option<usize> {
        self.arrays.get(array).map(Vec::len)
    }

    pub fn array_paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.arrays.keys()
    }

    /// Forget every item registry; the next rebuild reads counts from the value
    pub fn reset_arrays(&mut self) {
        self.arrays.clear();
    }

    /// Forget the registries at or below `prefix` after it was overwritten
    pub fn forget_arrays_under(&mut self, prefix: &FieldPath) {
        self.arrays.retain(|path, _| !path.starts_with(prefix));
    }

    /// Re-expand the instances against `value`
    pub fn rebuild(&mut self, value: &Value) {
        self.instances.clear();
        self.index.clear();
        self.pages.clear();

        let roots = self.roots.clone();
        let mut live_arrays = Vec::new();
        for def in &roots {
            let page = def.is_page().then_some(self.pages.len());
            let position = self.place(def, &FieldPath::root(), None, None, page, value, &mut live_arrays);
            if let (Some(position), true) = (position, def.is_page()) {
                self.pages.push(position);
            }
        }
        // registries of arrays that disappeared with their items
        self.arrays.retain(|path, _| live_arrays.contains(path));
    }

    #[allow(clippy::too_many_arguments)]
    fn place(
        &mut self,
        def: &Arc<FieldDef>,
        base: &FieldPath,
        scope: Option<&FieldPath>,
        parent: Option<usize>,
        page: Option<usize>,
        value: &Value,
        live_arrays: &mut Vec<FieldPath>,
    ) -> Option<usize> {
        let path = base.child(def.key());
        if self.index.contains_key(&path) {
            tracing::warn!(path = %path, "duplicate field path, later field ignored");
            return None;
        }
        let position = self.instances.len();
        self.instances.push(FieldInstance {
            def: Arc::clone(def),
            path: path.clone(),
            scope: scope.cloned(),
            parent,
            page,
        });
        self.index.insert(path.clone(), position);

        match def.kind {
            FieldKind::Container(ContainerKind::Array) => {
                live_arrays.push(path.clone());
                let items = self.items_for(def, &path, value);
                for (i, fields) in items.iter().enumerate() {
                    let item = path.index(i);
                    for child in fields.iter() {
                        self.place(child, &item, Some(&item), Some(position), page, value, live_arrays);
                    }
                }
            }
            FieldKind::Container(kind) => {
                let child_base = if kind.nests_value() { path.clone() } else { base.clone() };
                for child in &def.children {
                    self.place(child, &child_base, scope, Some(position), page, value, live_arrays);
                }
            }
            _ => {}
        }
        Some(position)
    }

    fn items_for(&mut self, def: &FieldDef, path: &FieldPath, value: &Value) -> Vec<ItemFields> {
        if let Some(items) = self.arrays.get(path) {
            return items.clone();
        }
        let len = match path::resolve(value, path) {
            Some(Value::Array(items)) => items.len(),
            _ => 0,
        }
        .max(def.item_sets.len());
        let items: Vec<ItemFields> = (0..len).map(|i| ItemFields::from(def.item_fields(i))).collect();
        self.arrays.insert(path.clone(), items.clone());
        items
    }

    /// Field set a new item at `index` would get
    pub fn template_for(&self, array: &FieldPath, index: usize) -> Option<ItemFields> {
        let position = self.position(array)?;
        let def = &self.instances[position].def;
        def.is_array().then(|| ItemFields::from(def.item_fields(index)))
    }

    /// Register a new item and shift the registries of later items
    pub fn insert_item(&mut self, array: &FieldPath, index: usize, fields: ItemFields) {
        self.renumber_registries(|p| Some(p.after_insertion(array, index)));
        if let Some(items) = self.arrays.get_mut(array) {
            let at = index.min(items.len());
            items.insert(at, fields);
        }
    }

    /// Unregister an item, dropping registries nested in it
    pub fn remove_item(&mut self, array: &FieldPath, index: usize) {
        if let Some(items) = self.arrays.get_mut(array) {
            if index < items.len() {
                items.remove(index);
            }
        }
        self.renumber_registries(|p| p.after_removal(array, index));
    }

    fn renumber_registries(&mut self, f: impl Fn(&FieldPath) -> Option<FieldPath>) {
        let arrays = std::mem::take(&mut self.arrays);
        self.arrays = arrays
            .into_iter()
            .filter_map(|(path, items)| f(&path).map(|next| (next, items)))
            .collect();
    }

    /// Write config defaults for every value-holding field missing from `value`
    pub fn fill_defaults(&self, value: &mut Value) {
        if !value.is_object() {
            *value = Value::Object(Map::new());
        }
        for instance in &self.instances {
            let def = &instance.def;
            if !def.holds_value() || path::resolve(value, &instance.path).is_some() {
                continue;
            }
            let default = match def.kind {
                FieldKind::Value => def.config.value.clone().unwrap_or(Value::Null),
                _ if def.is_array() => def.config.value.clone().unwrap_or(Value::Array(Vec::new())),
                _ => def.config.value.clone().unwrap_or(Value::Object(Map::new())),
            };
            path::write(value, &instance.path, default);
        }
    }

    /// Assemble the submitted value: the live value minus excluded fields
    pub fn submission_value(
        &self,
        value: &Value,
        options: &MergedOptions,
        state: impl Fn(usize) -> (bool, bool, bool),
    ) -> Value {
        let mut submitted = value.clone();
        for (position, instance) in self.instances.iter().enumerate().rev() {
            if !instance.def.holds_value() {
                continue;
            }
            let policy = options.exclusion_for(&instance.def.config);
            if is_excluded(policy, state(position)) {
                path::remove(&mut submitted, &instance.path);
            }
        }
        submitted
    }
}

fn is_excluded(policy: ExclusionPolicy, (hidden, disabled, readonly): (bool, bool, bool)) -> bool {
    (policy.if_hidden && hidden) || (policy.if_disabled && disabled) || (policy.if_readonly && readonly)
}

/// Default value of a new array item built from `fields`
pub fn item_defaults(fields: &[Arc<FieldDef>]) -> Value {
    let mut item = Value::Object(Map::new());
    for def in fields {
        write_default(&mut item, &FieldPath::root(), def);
    }
    item
}

fn write_default(target: &mut Value, base: &FieldPath, def: &Arc<FieldDef>) {
    let path = base.child(def.key());
    match def.kind {
        FieldKind::Value => {
            path::write(target, &path, def.config.value.clone().unwrap_or(Value::Null));
        }
        FieldKind::Container(ContainerKind::Array) => {
            let items = match &def.config.value {
                Some(value) => value.clone(),
                None => Value::Array(
                    def.item_sets
                        .iter()
                        .map(|set| item_defaults(set))
                        .collect(),
                ),
            };
            path::write(target, &path, items);
        }
        FieldKind::Container(kind) => {
            let child_base = if kind.nests_value() { path } else { base.clone() };
            if kind.nests_value() {
                path::write(target, &child_base, Value::Object(Map::new()));
            }
            for child in &def.children {
                write_default(target, &child_base, child);
            }
        }
        FieldKind::Display => {}
    }
}

/// The enclosing array item of a path, if it is inside one
pub fn item_scope(tree: &FieldTree, path: &FieldPath) -> Option<FieldPath> {
    let mut prefix = FieldPath::root();
    let mut scope = None;
    for segment in path.segments() {
        prefix = match segment {
            Segment::Key(key) => prefix.child(key),
            Segment::Index(i) => {
                let item = prefix.index(*i);
                if tree.is_array(&prefix) {
                    scope = Some(item.clone());
                }
                item
            }
        };
    }
    scope
}
