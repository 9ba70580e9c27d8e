//! Array events
//!
//! External code changes the item list of an `array` field by dispatching
//! an [`ArrayEvent`]:
//!
//! ```json
//! {"arrayKey": "contacts", "operation": "append", "value": {"name": "Ada"}}
//! {"arrayKey": "contacts", "operation": "insert", "index": 0}
//! {"arrayKey": "contacts", "operation": "remove"}
//! ```
//!
//! `remove` without an index removes the last item; `insert` without one
//! appends. An event for a key that is not an array is an error, never a
//! silent no-op. Each event is applied exactly once; [`crate::Form::dispatch`]
//! then renumbers per-field session state with [`Applied::renumber`].

use crate::config::FieldConfig;
use crate::diagnostics::Diagnostic;
use crate::error::{Error, Result};
use crate::field::{compile_fields, FieldTypes};
use crate::path::{self, FieldPath};
use crate::tree::{item_defaults, FieldTree, ItemFields};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayOperation {
    Append,
    Insert,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayEvent {
    /// Path of the array field, e.g. `contacts` or `orders[0].lines`
    pub array_key: String,
    pub operation: ArrayOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Field set for the new item instead of the array's template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_override: Option<Vec<FieldConfig>>,
    /// Initial item value, merged over the template defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ArrayEvent {
    fn new(array_key: &str, operation: ArrayOperation, index: Option<usize>) -> Self {
        Self {
            array_key: array_key.to_string(),
            operation,
            index,
            template_override: None,
            value: None,
        }
    }

    pub fn append(array_key: &str) -> Self {
        Self::new(array_key, ArrayOperation::Append, None)
    }

    pub fn insert(array_key: &str, index: usize) -> Self {
        Self::new(array_key, ArrayOperation::Insert, Some(index))
    }

    pub fn remove(array_key: &str, index: Option<usize>) -> Self {
        Self::new(array_key, ArrayOperation::Remove, index)
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_template(mut self, fields: Vec<FieldConfig>) -> Self {
        self.template_override = Some(fields);
        self
    }
}

/// What an event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Inserted { array: FieldPath, index: usize },
    Removed { array: FieldPath, index: usize },
}

impl Applied {
    pub fn array(&self) -> &FieldPath {
        match self {
            Applied::Inserted { array, .. } | Applied::Removed { array, .. } => array,
        }
    }

    /// Path of the affected item
    pub fn item(&self) -> FieldPath {
        match self {
            Applied::Inserted { array, index } | Applied::Removed { array, index } => array.index(*index),
        }
    }

    /// Map a path from before the event to after it; `None` for paths
    /// inside a removed item
    pub fn renumber(&self, path: &FieldPath) -> Option<FieldPath> {
        match self {
            Applied::Inserted { array, index } => Some(path.after_insertion(array, *index)),
            Applied::Removed { array, index } => path.after_removal(array, *index),
        }
    }
}

/// Apply an event to the value and the array registry.
///
/// The tree's instances are stale afterwards; the caller rebuilds them.
pub fn apply(
    event: &ArrayEvent,
    tree: &mut FieldTree,
    value: &mut Value,
    types: &FieldTypes,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<Applied> {
    let array = FieldPath::parse(&event.array_key)
        .ok()
        .filter(|p| tree.is_array(p))
        .ok_or_else(|| Error::UnknownArray(event.array_key.clone()))?;
    let len = tree.item_count(&array).unwrap_or(0);

    match event.operation {
        ArrayOperation::Append | ArrayOperation::Insert => {
            let index = match event.operation {
                ArrayOperation::Insert => event.index.unwrap_or(len),
                _ => len,
            };
            if index > len {
                return Err(Error::ArrayIndexOutOfBounds {
                    array: array.to_string(),
                    index,
                    len,
                });
            }
            let fields: ItemFields = match &event.template_override {
                Some(configs) => compile_fields(configs, types, &array, diagnostics).into(),
                None => tree
                    .template_for(&array, index)
                    .ok_or_else(|| Error::UnknownArray(event.array_key.clone()))?,
            };
            let item = merge(item_defaults(&fields), event.value.clone());
            path::insert(value, &array, index, item);
            tree.insert_item(&array, index, fields);
            tracing::debug!(array = %array, index, "array item inserted");
            Ok(Applied::Inserted { array, index })
        }
        ArrayOperation::Remove => {
            let index = match event.index {
                Some(index) => index,
                None if len > 0 => len - 1,
                None => {
                    return Err(Error::ArrayIndexOutOfBounds {
                        array: array.to_string(),
                        index: 0,
                        len,
                    })
                }
            };
            if index >= len {
                return Err(Error::ArrayIndexOutOfBounds {
                    array: array.to_string(),
                    index,
                    len,
                });
            }
            path::remove(value, &array.index(index));
            tree.remove_item(&array, index);
            tracing::debug!(array = %array, index, "array item removed");
            Ok(Applied::Removed { array, index })
        }
    }
}

fn merge(defaults: Value, given: Option<Value>) -> Value {
    match (defaults, given) {
        (defaults, None) => defaults,
        (Value::Object(mut base), Some(Value::Object(over))) => {
            base.extend(over);
            Value::Object(base)
        }
        (_, Some(other)) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup(value: &Value) -> FieldTree {
        let configs: Vec<FieldConfig> = serde_json::from_value(json!([{
            "key": "contacts",
            "type": "array",
            "fields": [
                {"key": "name", "type": "input"},
                {"key": "phone", "type": "input", "value": ""}
            ]
        }]))
        .unwrap();
        let defs = compile_fields(&configs, &FieldTypes::new(), &FieldPath::root(), &mut Vec::new());
        let mut tree = FieldTree::new(defs);
        tree.rebuild(value);
        tree
    }

    fn run(event: ArrayEvent, tree: &mut FieldTree, value: &mut Value) -> Result<Applied> {
        let result = apply(&event, tree, value, &FieldTypes::new(), &mut Vec::new());
        tree.rebuild(value);
        result
    }

    #[test]
    fn test_append_uses_template_defaults() {
        let mut value = json!({"contacts": [{"name": "a", "phone": "1"}]});
        let mut tree = setup(&value);
        let applied = run(
            ArrayEvent::append("contacts").with_value(json!({"name": "b"})),
            &mut tree,
            &mut value,
        )
        .unwrap();
        assert_eq!(applied.item(), FieldPath::parse("contacts[1]").unwrap());
        assert_eq!(value["contacts"][1], json!({"name": "b", "phone": ""}));
        assert_eq!(tree.item_count(&FieldPath::parse("contacts").unwrap()), Some(2));
    }

    #[test]
    fn test_remove_defaults_to_last() {
        let mut value = json!({"contacts": [{"name": "a"}, {"name": "b"}, {"name": "c"}]});
        let mut tree = setup(&value);
        run(ArrayEvent::remove("contacts", None), &mut tree, &mut value).unwrap();
        run(ArrayEvent::remove("contacts", Some(0)), &mut tree, &mut value).unwrap();
        let names: Vec<&Value> = value["contacts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| &c["name"])
            .collect();
        assert_eq!(names, vec![&json!("b")]);
    }

    #[test]
    fn test_errors() {
        let mut value = json!({"contacts": []});
        let mut tree = setup(&value);
        assert!(matches!(
            run(ArrayEvent::append("nope"), &mut tree, &mut value),
            Err(Error::UnknownArray(_))
        ));
        assert!(matches!(
            run(ArrayEvent::remove("contacts", None), &mut tree, &mut value),
            Err(Error::ArrayIndexOutOfBounds { len: 0, .. })
        ));
        assert!(matches!(
            run(ArrayEvent::insert("contacts", 3), &mut tree, &mut value),
            Err(Error::ArrayIndexOutOfBounds { index: 3, .. })
        ));
    }

    #[test]
    fn test_template_override() {
        let mut value = json!({"contacts": []});
        let mut tree = setup(&value);
        let special = vec![FieldConfig::new("email", "input")];
        run(ArrayEvent::append("contacts").with_template(special), &mut tree, &mut value).unwrap();
        assert_eq!(value["contacts"][0], json!({"email": null}));
        assert!(tree.get(&FieldPath::parse("contacts[0].email").unwrap()).is_some());
        assert!(tree.get(&FieldPath::parse("contacts[0].name").unwrap()).is_none());
    }

    #[test]
    fn test_renumber() {
        let applied = Applied::Removed {
            array: FieldPath::parse("items").unwrap(),
            index: 1,
        };
        let p = |s: &str| FieldPath::parse(s).unwrap();
        assert_eq!(applied.renumber(&p("items[0].a")), Some(p("items[0].a")));
        assert_eq!(applied.renumber(&p("items[1].a")), None);
        assert_eq!(applied.renumber(&p("items[2].a")), Some(p("items[1].a")));
    }

    #[test]
    fn test_event_shape() {
        let event: ArrayEvent = serde_json::from_value(json!({
            "arrayKey": "contacts",
            "operation": "insert",
            "index": 0
        }))
        .unwrap();
        assert_eq!(event, ArrayEvent::insert("contacts", 0));
    }
}
