//! Natural keys for collection items

use std::fmt;

/// An item of a keyed collection.
///
/// Two items with the same key describe the same remote object. Whether
/// that object needs an update is decided by [`Keyed::differs`], which
/// compares mutable fields only; server-assigned ids never take part.
pub trait Keyed: Clone + fmt::Debug {
    type Key: Ord + Clone + fmt::Debug;

    fn key(&self) -> Self::Key;

    /// Called on the observed item with the desired item of the same key.
    fn differs(&self, desired: &Self) -> bool;
}
