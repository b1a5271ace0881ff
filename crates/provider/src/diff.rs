//! Set reconciler
//!
//! One diff for every keyed collection. Both sides are indexed by natural
//! key before comparison, so the delta does not depend on the order items
//! arrive in, and each list in the delta is sorted by key.

use std::collections::BTreeMap;

use driftless_common::Keyed;

/// Structural difference between a desired and an observed collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<T> {
    pub to_add: Vec<T>,
    pub to_remove: Vec<T>,
    /// `(observed, desired)` pairs
    pub to_update: Vec<(T, T)>,
}

impl<T> Default for Delta<T> {
    fn default() -> Self {
        Self {
            to_add: Vec::new(),
            to_remove: Vec::new(),
            to_update: Vec::new(),
        }
    }
}

impl<T> Delta<T> {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_update.is_empty()
    }

    /// Number of remote operations the delta implies
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len() + self.to_update.len()
    }

    /// Only the removals
    pub fn removals(self) -> Self {
        Self {
            to_remove: self.to_remove,
            ..Self::default()
        }
    }

    /// Everything except the removals
    pub fn without_removals(self) -> Self {
        Self {
            to_remove: Vec::new(),
            ..self
        }
    }

    /// Only the updates
    pub fn updates(self) -> Self {
        Self {
            to_update: self.to_update,
            ..Self::default()
        }
    }

    /// Everything except the updates
    pub fn without_updates(self) -> Self {
        Self {
            to_update: Vec::new(),
            ..self
        }
    }
}

/// Compute the delta that turns `observed` into `desired`.
///
/// When a collection holds several items with the same key, the last one wins.
pub fn diff<T: Keyed>(desired: &[T], observed: &[T]) -> Delta<T> {
    let desired: BTreeMap<T::Key, &T> = desired.iter().map(|item| (item.key(), item)).collect();
    let observed: BTreeMap<T::Key, &T> = observed.iter().map(|item| (item.key(), item)).collect();

    let mut delta = Delta::default();

    for (key, current) in &observed {
        match desired.get(key) {
            None => delta.to_remove.push((*current).clone()),
            Some(wanted) if current.differs(wanted) => {
                delta.to_update.push(((*current).clone(), (*wanted).clone()))
            }
            Some(_) => {}
        }
    }

    for (key, wanted) in &desired {
        if !observed.contains_key(key) {
            delta.to_add.push((*wanted).clone());
        }
    }

    delta
}

/// Delta against an empty observed collection, used on the create path.
pub fn attach_only<T: Keyed>(desired: &[T]) -> Delta<T> {
    diff(desired, &[])
}
