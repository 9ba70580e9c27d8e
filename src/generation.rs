//! Request generations for async work
//!
//! Every async validation or derivation is tagged with a [`Ticket`]. Issuing
//! a new ticket for a path supersedes the previous one, and a completion is
//! only applied while its ticket is still the latest for its path. The
//! underlying future is never assumed to stop; it is simply ignored.
//!
//! Generation numbers come from one counter and are never reused, so a
//! ticket can be looked up by number alone. That keeps in-flight requests
//! valid when array items are renumbered underneath them.

use crate::path::FieldPath;
use std::collections::{BTreeMap, HashMap};

/// Identity of one async request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ticket {
    /// Path at the time the request was issued
    pub path: FieldPath,
    pub generation: u64,
}

#[derive(Debug, Default, Clone)]
pub struct Generations {
    next: u64,
    current: BTreeMap<FieldPath, u64>,
    paths: HashMap<u64, FieldPath>,
}

impl Generations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request for `path`, superseding any outstanding one
    pub fn issue(&mut self, path: &FieldPath) -> Ticket {
        self.next += 1;
        if let Some(previous) = self.current.insert(path.clone(), self.next) {
            self.paths.remove(&previous);
        }
        self.paths.insert(self.next, path.clone());
        Ticket {
            path: path.clone(),
            generation: self.next,
        }
    }

    /// Current path of a still-live request, `None` when superseded
    pub fn resolve(&self, ticket: &Ticket) -> Option<&FieldPath> {
        self.paths.get(&ticket.generation)
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.paths.contains_key(&ticket.generation)
    }

    /// Retire a completed request
    pub fn complete(&mut self, ticket: &Ticket) -> Option<FieldPath> {
        let path = self.paths.remove(&ticket.generation)?;
        self.current.remove(&path);
        Some(path)
    }

    /// Drop the outstanding request for `path`, if any
    pub fn invalidate(&mut self, path: &FieldPath) -> bool {
        match self.current.remove(path) {
            Some(generation) => {
                self.paths.remove(&generation);
                true
            }
            None => false,
        }
    }

    /// Drop every outstanding request
    pub fn invalidate_all(&mut self) {
        self.current.clear();
        self.paths.clear();
    }

    pub fn is_pending(&self, path: &FieldPath) -> bool {
        self.current.contains_key(path)
    }

    pub fn pending(&self) -> impl Iterator<Item = &FieldPath> {
        self.current.keys()
    }

    /// Rewrite the paths of outstanding requests; `None` cancels the request
    pub fn renumber(&mut self, f: impl Fn(&FieldPath) -> Option<FieldPath>) {
        let current = std::mem::take(&mut self.current);
        self.paths.clear();
        for (path, generation) in current {
            if let Some(next) = f(&path) {
                self.paths.insert(generation, next.clone());
                self.current.insert(next, generation);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn test_later_ticket_supersedes() {
        let mut generations = Generations::new();
        let first = generations.issue(&p("username"));
        let second = generations.issue(&p("username"));
        assert!(!generations.is_current(&first));
        assert!(generations.is_current(&second));
        assert_eq!(generations.complete(&first), None);
        assert_eq!(generations.complete(&second), Some(p("username")));
        assert!(!generations.is_pending(&p("username")));
    }

    #[test]
    fn test_numbers_never_reused() {
        let mut generations = Generations::new();
        let first = generations.issue(&p("a"));
        generations.invalidate(&p("a"));
        let second = generations.issue(&p("a"));
        assert_ne!(first.generation, second.generation);
        assert!(!generations.is_current(&first));
    }

    #[test]
    fn test_renumber_keeps_requests_live() {
        let mut generations = Generations::new();
        let removed = generations.issue(&p("items[1].code"));
        let shifted = generations.issue(&p("items[2].code"));
        let array = p("items");
        generations.renumber(|path| path.after_removal(&array, 1));

        assert!(!generations.is_current(&removed));
        assert_eq!(generations.resolve(&shifted), Some(&p("items[1].code")));
    }
}
