//! Item identity for the tree engine (spec §4.7).
//!
//! Unlike [`crate::ident::Id`], an item identifier is not content-addressed:
//! two items can have identical contents and location yet be distinct items
//! (and, symmetrically, an item keeps its identity across renames that
//! change its content and location both). It is allocated once, the first
//! time a path-analysis discovers the item has no prior identity to inherit.

use std::fmt;

use crate::path::PathComponent;

/// An allocated, non-content-addressed item identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(u64);

impl ItemId {
    /// The distinguished root directory. Never has a [`Location`] of its
    /// own; every top-level item's location names it as `parent`.
    pub const ROOT: Self = Self(0);

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

/// Hands out fresh [`ItemId`]s in increasing order, starting after
/// [`ItemId::ROOT`].
#[derive(Clone, Debug, Default)]
pub struct ItemIdAllocator {
    next: u64,
}

impl ItemIdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn alloc(&mut self) -> ItemId {
        let id = ItemId(self.next);
        self.next += 1;
        id
    }
}

/// An item's placement in the tree: which directory it lives in, and under
/// what name. The deleted state is represented, not absent: a deleted item's
/// location is [`Location::deleted`], parented at [`ItemId::ROOT`] with no
/// name (the tree engine's analogue of the path-analysis engine's null
/// component).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub parent: ItemId,
    pub name: Option<PathComponent>,
}

impl Location {
    #[must_use]
    pub fn deleted() -> Self {
        Self {
            parent: ItemId::ROOT,
            name: None,
        }
    }

    #[must_use]
    pub fn is_present(&self) -> bool {
        self.name.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_starts_after_root() {
        let mut alloc = ItemIdAllocator::new();
        assert_eq!(alloc.alloc(), ItemId(1));
        assert_eq!(alloc.alloc(), ItemId(2));
        assert_ne!(alloc.alloc(), ItemId::ROOT);
    }

    #[test]
    fn deleted_location_has_no_name() {
        assert!(!Location::deleted().is_present());
    }
}
