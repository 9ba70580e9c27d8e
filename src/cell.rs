//! Observable cells
//!
//! The rendering layer watches form state through two small primitives:
//!
//! - [`Observable`]: a mutable value with `read`, `write` and `subscribe`.
//! - [`Computed`]: a read-only value derived from an observable, recomputed
//!   whenever its source changes.
//!
//! Cells are single-threaded (`Rc` + `RefCell`), like the form session that
//! owns them. Subscribers run synchronously inside `write`, after the new
//! value is stored, and only when the value actually changed.
//!
//! ```rust
//! use dynaform::cell::Observable;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let count = Observable::new(0);
//! let seen = Rc::new(Cell::new(0));
//! let seen_in = seen.clone();
//! let sub = count.subscribe(move |v| seen_in.set(*v));
//! count.write(3);
//! assert_eq!(seen.get(), 3);
//! sub.unsubscribe();
//! count.write(4);
//! assert_eq!(seen.get(), 3);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

type Listener<T> = Rc<dyn Fn(&T)>;

struct Inner<T> {
    value: T,
    listeners: Vec<(u64, Listener<T>)>,
    next_id: u64,
}

/// A mutable value that notifies subscribers on change
pub struct Observable<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Observable")
            .field(&self.inner.borrow().value)
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                value,
                listeners: Vec::new(),
                next_id: 0,
            })),
        }
    }

    pub fn read(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Borrow the current value without cloning it
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Store a new value and notify subscribers if it differs
    pub fn write(&self, value: T) {
        let listeners: Vec<Listener<T>> = {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value;
            inner.listeners.iter().map(|(_, l)| Rc::clone(l)).collect()
        };
        // listeners may read or subscribe, so the borrow is released first
        let current = self.read();
        for listener in listeners {
            listener(&current);
        }
    }

    /// Apply `f` to the value in place
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.read();
        f(&mut next);
        self.write(next);
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.push((id, Rc::new(listener)));
            id
        };

        let weak: Weak<RefCell<Inner<T>>> = Rc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .borrow_mut()
                        .listeners
                        .retain(|(listener_id, _)| *listener_id != id);
                }
            })),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    /// A computed cell over this one
    pub fn map<U, F>(&self, f: F) -> Computed<U>
    where
        U: Clone + PartialEq + 'static,
        F: Fn(&T) -> U + 'static,
    {
        Computed::new(self, f)
    }
}

/// Handle returned by `subscribe`; call [`Subscription::unsubscribe`] to stop
/// receiving updates. Dropping the handle keeps the subscription alive.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// A read-only cell derived from an [`Observable`]
pub struct Computed<U> {
    cell: Observable<U>,
    _source: Subscription,
}

impl<U: Clone + PartialEq + 'static> Computed<U> {
    pub fn new<T, F>(source: &Observable<T>, f: F) -> Self
    where
        T: Clone + PartialEq + 'static,
        F: Fn(&T) -> U + 'static,
    {
        let cell = Observable::new(source.with(&f));
        let target = cell.clone();
        let subscription = source.subscribe(move |value| target.write(f(value)));
        Self {
            cell,
            _source: subscription,
        }
    }

    pub fn read(&self) -> U {
        self.cell.read()
    }

    pub fn subscribe(&self, listener: impl Fn(&U) + 'static) -> Subscription {
        self.cell.subscribe(listener)
    }
}

impl<U: fmt::Debug> fmt::Debug for Computed<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Computed").field(&self.cell).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_write_notifies_only_on_change() {
        let cell = Observable::new(1);
        let calls = Rc::new(Cell::new(0));
        let calls_in = calls.clone();
        let _sub = cell.subscribe(move |_| calls_in.set(calls_in.get() + 1));

        cell.write(1);
        assert_eq!(calls.get(), 0);
        cell.write(2);
        cell.update(|v| *v += 1);
        assert_eq!(calls.get(), 2);
        assert_eq!(cell.read(), 3);
    }

    #[test]
    fn test_unsubscribe() {
        let cell = Observable::new("a".to_string());
        let sub = cell.subscribe(|_| {});
        assert_eq!(cell.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(cell.subscriber_count(), 0);
    }

    #[test]
    fn test_computed_follows_source() {
        let items = Observable::new(vec![1, 2, 3]);
        let total = items.map(|v| v.iter().sum::<i32>());
        assert_eq!(total.read(), 6);

        let seen = Rc::new(Cell::new(0));
        let seen_in = seen.clone();
        let _sub = total.subscribe(move |t| seen_in.set(*t));
        items.update(|v| v.push(4));
        assert_eq!(total.read(), 10);
        assert_eq!(seen.get(), 10);
    }

    #[test]
    fn test_listener_may_read_cell() {
        let cell = Observable::new(0);
        let reader = cell.clone();
        let seen = Rc::new(Cell::new(0));
        let seen_in = seen.clone();
        let _sub = cell.subscribe(move |_| seen_in.set(reader.read()));
        cell.write(5);
        assert_eq!(seen.get(), 5);
    }
}
