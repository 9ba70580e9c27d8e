//! Tracking of hand-edited fields
//!
//! Derivations declared with `stopOnUserOverride` must not overwrite a value
//! the user typed. The tracker remembers which field paths were edited by a
//! human; `reEngageOnDependencyChange` clears the flag again when a
//! dependency changes.

use crate::path::FieldPath;
use std::collections::BTreeSet;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserInteractionTracker {
    modified: BTreeSet<FieldPath>,
}

impl UserInteractionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a user edit
    pub fn mark(&mut self, path: &FieldPath) {
        self.modified.insert(path.clone());
    }

    /// Forget a user edit; returns whether the field was marked
    pub fn clear(&mut self, path: &FieldPath) -> bool {
        self.modified.remove(path)
    }

    pub fn is_modified(&self, path: &FieldPath) -> bool {
        self.modified.contains(path)
    }

    pub fn reset(&mut self) {
        self.modified.clear();
    }

    pub fn len(&self) -> usize {
        self.modified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modified.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldPath> {
        self.modified.iter()
    }

    /// Rewrite every tracked path; paths mapped to `None` are dropped
    pub fn renumber(&mut self, f: impl Fn(&FieldPath) -> Option<FieldPath>) {
        self.modified = self.modified.iter().filter_map(f).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn test_mark_and_clear() {
        let mut tracker = UserInteractionTracker::new();
        tracker.mark(&p("total"));
        assert!(tracker.is_modified(&p("total")));
        assert!(tracker.clear(&p("total")));
        assert!(!tracker.clear(&p("total")));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_renumber_after_removal() {
        let mut tracker = UserInteractionTracker::new();
        tracker.mark(&p("items[0].name"));
        tracker.mark(&p("items[1].name"));
        tracker.mark(&p("items[2].name"));
        let array = p("items");
        tracker.renumber(|path| path.after_removal(&array, 1));
        let paths: Vec<_> = tracker.iter().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["items[0].name", "items[1].name"]);
    }
}
