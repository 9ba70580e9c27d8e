//! Field paths: addressing locations in the form value tree
//!
//! A path is a sequence of object keys and array indices written in the
//! familiar dotted/bracket notation:
//!
//! ```text
//! user.email          → Key(user), Key(email)
//! items[2].price      → Key(items), Index(2), Key(price)
//! items.2.price       → same as above (numeric segments are indices)
//! $.phone             → relative: Key(phone) inside the enclosing array item
//! ```
//!
//! Relative paths only make sense inside an array item. They are turned into
//! absolute paths with [`FieldPath::resolve_against`], which fails with
//! [`PathError::NoEnclosingScope`] when there is no item to resolve against.
//!
//! The tree functions ([`resolve`], [`write`], [`remove`], [`insert`]) never
//! panic: missing intermediate nodes read as `None` and are created on write.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Shared `null` for reads of missing values
pub(crate) static NULL: Value = Value::Null;

/// Path errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidSyntax { path: String, reason: String },

    #[error("Relative path '{path}' used outside an array item (no enclosing scope)")]
    NoEnclosingScope { path: String },
}

/// One step of a path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed field path
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    relative: bool,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// The empty absolute path (the form value root)
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a path string
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let trimmed = input.trim();
        let (relative, rest) = if trimmed == "$" {
            (true, "")
        } else if let Some(rest) = trimmed.strip_prefix("$.") {
            (true, rest)
        } else if trimmed.starts_with("$[") {
            (true, &trimmed[1..])
        } else if trimmed.starts_with('$') {
            return Err(invalid(input, "'$' must be followed by '.' or '['"));
        } else {
            (false, trimmed)
        };

        let segments = parse_segments(input, rest)?;
        Ok(Self { relative, segments })
    }

    pub fn is_relative(&self) -> bool {
        self.relative
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Append an object key
    pub fn child(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.segments.push(Segment::Key(key.to_string()));
        next
    }

    /// Append an array index
    pub fn index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.segments.push(Segment::Index(index));
        next
    }

    /// Append all segments of `other` (its relative flag is ignored)
    pub fn join(&self, other: &FieldPath) -> Self {
        let mut next = self.clone();
        next.segments.extend(other.segments.iter().cloned());
        next
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        Some(parent)
    }

    /// Segment-wise prefix test
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.relative == prefix.relative && self.segments.starts_with(&prefix.segments)
    }

    /// True when one path contains the other (a change to either affects both)
    pub fn is_related(&self, other: &FieldPath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Turn a relative path into an absolute one using the enclosing array item.
    /// Absolute paths are returned unchanged.
    pub fn resolve_against(&self, scope: Option<&FieldPath>) -> Result<Self, PathError> {
        if !self.relative {
            return Ok(self.clone());
        }
        match scope {
            Some(item) => Ok(item.join(self)),
            None => Err(PathError::NoEnclosingScope {
                path: self.to_string(),
            }),
        }
    }

    /// The index directly under `array` if this path points into one of its items
    pub fn item_index(&self, array: &FieldPath) -> Option<usize> {
        if !self.starts_with(array) {
            return None;
        }
        match self.segments.get(array.segments.len()) {
            Some(Segment::Index(i)) => Some(*i),
            _ => None,
        }
    }

    /// Renumber this path after item `removed` was taken out of `array`.
    ///
    /// Returns `None` for paths inside the removed item, the shifted path for
    /// paths inside later items and an unchanged copy for everything else.
    pub fn after_removal(&self, array: &FieldPath, removed: usize) -> Option<Self> {
        match self.item_index(array) {
            Some(i) if i == removed => None,
            Some(i) if i > removed => Some(self.with_item_index(array, i - 1)),
            _ => Some(self.clone()),
        }
    }

    /// Renumber this path after an item was inserted into `array` at `inserted`
    pub fn after_insertion(&self, array: &FieldPath, inserted: usize) -> Self {
        match self.item_index(array) {
            Some(i) if i >= inserted => self.with_item_index(array, i + 1),
            _ => self.clone(),
        }
    }

    fn with_item_index(&self, array: &FieldPath, index: usize) -> Self {
        let mut next = self.clone();
        next.segments[array.segments.len()] = Segment::Index(index);
        next
    }
}

fn invalid(path: &str, reason: &str) -> PathError {
    PathError::InvalidSyntax {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_segments(original: &str, rest: &str) -> Result<Vec<Segment>, PathError> {
    let mut segments = Vec::new();
    let mut chars = rest.chars().peekable();
    let mut key = String::new();
    // true right after '.', where a key must follow
    let mut expect_key = false;

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if key.is_empty() && (segments.is_empty() || expect_key) {
                    return Err(invalid(original, "empty segment"));
                }
                push_key(&mut segments, &mut key);
                expect_key = true;
            }
            '[' => {
                if expect_key && key.is_empty() {
                    return Err(invalid(original, "'[' directly after '.'"));
                }
                push_key(&mut segments, &mut key);
                expect_key = false;
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed {
                    return Err(invalid(original, "unclosed '['"));
                }
                let inner = inner.trim();
                if let Some(quoted) = strip_quotes(inner) {
                    segments.push(Segment::Key(quoted.to_string()));
                } else {
                    let index = inner
                        .parse::<usize>()
                        .map_err(|_| invalid(original, "bracket index must be a number"))?;
                    segments.push(Segment::Index(index));
                }
                if let Some(&next) = chars.peek() {
                    if next != '.' && next != '[' {
                        return Err(invalid(original, "expected '.' or '[' after ']'"));
                    }
                }
            }
            ']' => return Err(invalid(original, "unexpected ']'")),
            c if c.is_whitespace() => return Err(invalid(original, "whitespace in path")),
            c => {
                key.push(c);
                expect_key = false;
            }
        }
    }

    if expect_key {
        return Err(invalid(original, "trailing '.'"));
    }
    push_key(&mut segments, &mut key);
    Ok(segments)
}

fn push_key(segments: &mut Vec<Segment>, key: &mut String) {
    if key.is_empty() {
        return;
    }
    let taken = std::mem::take(key);
    match taken.parse::<usize>() {
        Ok(index) => segments.push(Segment::Index(index)),
        Err(_) => segments.push(Segment::Key(taken)),
    }
}

fn strip_quotes(s: &str) -> Option<&str> {
    for quote in ['\'', '"'] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return Some(&s[1..s.len() - 1]);
        }
    }
    None
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.relative {
            write!(f, "$")?;
        }
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 && !self.relative => write!(f, "{}", key)?,
                Segment::Key(key) => write!(f, ".{}", key)?,
                Segment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        FieldPath::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Read the value at `path`; `None` when any step is missing
pub fn resolve<'a>(root: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    let mut current = root;
    for segment in &path.segments {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(i), Value::Array(items)) => items.get(*i)?,
            (Segment::Index(i), Value::Object(map)) => map.get(&i.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

/// Convenience: parse `path` and resolve it; unparsable paths read as `None`
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    FieldPath::parse(path).ok().and_then(|p| resolve(root, &p))
}

/// Write `value` at `path`, creating intermediate objects/arrays as needed.
///
/// Everything outside the written path is left untouched.
pub fn write(root: &mut Value, path: &FieldPath, value: Value) {
    write_segments(root, &path.segments, value);
}

fn write_segments(node: &mut Value, segments: &[Segment], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    match head {
        Segment::Key(key) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(map) = node {
                let child = map.entry(key.clone()).or_insert(Value::Null);
                write_segments(child, rest, value);
            }
        }
        Segment::Index(index) => match node {
            Value::Object(map) => {
                let child = map.entry(index.to_string()).or_insert(Value::Null);
                write_segments(child, rest, value);
            }
            _ => {
                if !node.is_array() {
                    *node = Value::Array(Vec::new());
                }
                if let Value::Array(items) = node {
                    if items.len() <= *index {
                        items.resize(*index + 1, Value::Null);
                    }
                    write_segments(&mut items[*index], rest, value);
                }
            }
        },
    }
}

/// Remove the value at `path`. Removing an array element shifts later elements.
pub fn remove(root: &mut Value, path: &FieldPath) -> Option<Value> {
    let (last, parent_segments) = path.segments.split_last()?;
    let parent = resolve_mut(root, parent_segments)?;
    match (last, parent) {
        (Segment::Key(key), Value::Object(map)) => map.remove(key),
        (Segment::Index(i), Value::Array(items)) if *i < items.len() => Some(items.remove(*i)),
        (Segment::Index(i), Value::Object(map)) => map.remove(&i.to_string()),
        _ => None,
    }
}

/// Insert `value` into the array at `array_path` at `index` (clamped to the length).
/// A missing or non-array target becomes a one-element array.
pub fn insert(root: &mut Value, array_path: &FieldPath, index: usize, value: Value) {
    match resolve_mut(root, &array_path.segments) {
        Some(Value::Array(items)) => {
            let at = index.min(items.len());
            items.insert(at, value);
        }
        _ => write(root, array_path, Value::Array(vec![value])),
    }
}

fn resolve_mut<'a>(root: &'a mut Value, segments: &[Segment]) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in segments {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get_mut(key)?,
            (Segment::Index(i), Value::Array(items)) => items.get_mut(*i)?,
            (Segment::Index(i), Value::Object(map)) => map.get_mut(&i.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn test_parse_dotted_and_bracket() {
        let path = p("items[2].price");
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("items".into()),
                Segment::Index(2),
                Segment::Key("price".into())
            ]
        );
        assert_eq!(p("items.2.price"), path);
        assert_eq!(path.to_string(), "items[2].price");
    }

    #[test]
    fn test_parse_relative() {
        let path = p("$.phone");
        assert!(path.is_relative());
        assert_eq!(path.to_string(), "$.phone");
        assert!(p("$").is_relative());
        assert_eq!(p("$[0].x").to_string(), "$[0].x");
    }

    #[test]
    fn test_parse_quoted_bracket_key() {
        let path = p("meta['a.b']");
        assert_eq!(path.segments()[1], Segment::Key("a.b".into()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse("a.").is_err());
        assert!(FieldPath::parse("a[x]").is_err());
        assert!(FieldPath::parse("a[1").is_err());
        assert!(FieldPath::parse("$foo").is_err());
        assert!(FieldPath::parse("a b").is_err());
    }

    #[test]
    fn test_resolve_missing_is_none() {
        let root = json!({"user": {"email": "a@b.c"}});
        assert_eq!(get(&root, "user.email"), Some(&json!("a@b.c")));
        assert_eq!(get(&root, "user.name"), None);
        assert_eq!(get(&root, "account.owner.name"), None);
        assert_eq!(get(&root, "user.email.domain"), None);
    }

    #[test]
    fn test_write_preserves_siblings() {
        let mut root = json!({"a": {"x": 1, "y": 2}, "list": [1, 2, 3]});
        write(&mut root, &p("a.x"), json!(10));
        assert_eq!(root, json!({"a": {"x": 10, "y": 2}, "list": [1, 2, 3]}));
    }

    #[test]
    fn test_write_creates_intermediates() {
        let mut root = json!({});
        write(&mut root, &p("items[1].name"), json!("b"));
        assert_eq!(root, json!({"items": [null, {"name": "b"}]}));
    }

    #[test]
    fn test_remove_shifts_array() {
        let mut root = json!({"items": [{"n": 0}, {"n": 1}, {"n": 2}]});
        let removed = remove(&mut root, &p("items[1]"));
        assert_eq!(removed, Some(json!({"n": 1})));
        assert_eq!(root, json!({"items": [{"n": 0}, {"n": 2}]}));
    }

    #[test]
    fn test_insert_clamps_index() {
        let mut root = json!({"items": [1]});
        insert(&mut root, &p("items"), 10, json!(2));
        insert(&mut root, &p("items"), 0, json!(0));
        assert_eq!(root, json!({"items": [0, 1, 2]}));

        let mut empty = json!({});
        insert(&mut empty, &p("tags"), 0, json!("x"));
        assert_eq!(empty, json!({"tags": ["x"]}));
    }

    #[test]
    fn test_resolve_against_scope() {
        let scope = p("contacts[1]");
        assert_eq!(
            p("$.phone").resolve_against(Some(&scope)).unwrap(),
            p("contacts[1].phone")
        );
        assert_eq!(
            p("$.phone").resolve_against(None),
            Err(PathError::NoEnclosingScope {
                path: "$.phone".into()
            })
        );
        assert_eq!(p("name").resolve_against(None).unwrap(), p("name"));
    }

    #[test]
    fn test_after_removal_renumbers() {
        let array = p("items");
        assert_eq!(p("items[3].name").after_removal(&array, 1), Some(p("items[2].name")));
        assert_eq!(p("items[1].name").after_removal(&array, 1), None);
        assert_eq!(p("items[0].name").after_removal(&array, 1), Some(p("items[0].name")));
        assert_eq!(p("other").after_removal(&array, 1), Some(p("other")));
    }

    #[test]
    fn test_after_insertion_renumbers() {
        let array = p("items");
        assert_eq!(p("items[1].name").after_insertion(&array, 1), p("items[2].name"));
        assert_eq!(p("items[0].name").after_insertion(&array, 1), p("items[0].name"));
    }

    #[test]
    fn test_is_related() {
        assert!(p("items").is_related(&p("items[0].price")));
        assert!(p("items[0].price").is_related(&p("items")));
        assert!(!p("items[0].price").is_related(&p("items[1].price")));
    }
}
