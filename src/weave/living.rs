//! A generic override-table CRDT, shared by the file weave's line-liveness
//! status and the tree engine's item-location status (spec §4.6/§4.7).
//!
//! A [`Living<V>`] tracks, for one entity, the history of revisions that set
//! or cleared its value. Its current state is a set of *leaf* revisions; the
//! entity is live iff at least one leaf still carries a value. Merging two
//! independently-evolved statuses unions their leaves, then collapses any
//! leaf that is itself an ancestor (via the override table) of another leaf
//! in the union, leaving only the newest state on each branch.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::ident::RevisionId;

/// See the module documentation. `V` is the payload recorded by a `set`: a
/// file weave uses `Living<()>` (liveness alone is the signal); the tree
/// engine uses `Living<(ItemId, PathComponent)>` (location is the payload).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Living<V> {
    overrides: BTreeMap<RevisionId, Vec<RevisionId>>,
    values: BTreeMap<RevisionId, V>,
    leaves: Vec<RevisionId>,
}

impl<V: Clone + PartialEq> Living<V> {
    /// A status that has never been set: dead, rooted at [`RevisionId::NULL`].
    #[must_use]
    pub fn new() -> Self {
        let mut overrides = BTreeMap::new();
        overrides.insert(RevisionId::NULL, Vec::new());
        Self {
            overrides,
            values: BTreeMap::new(),
            leaves: vec![RevisionId::NULL],
        }
    }

    /// Record `value` as of `rev`, superseding every current leaf.
    #[must_use]
    pub fn set(&self, rev: RevisionId, value: V) -> Self {
        let mut overrides = self.overrides.clone();
        overrides.insert(rev, self.leaves.clone());
        let mut values = self.values.clone();
        values.insert(rev, value);
        Self {
            overrides,
            values,
            leaves: vec![rev],
        }
    }

    /// Clear the value as of `rev`, superseding every current leaf.
    #[must_use]
    pub fn kill(&self, rev: RevisionId) -> Self {
        let mut overrides = self.overrides.clone();
        overrides.insert(rev, self.leaves.clone());
        let mut values = self.values.clone();
        values.remove(&rev);
        Self {
            overrides,
            values,
            leaves: vec![rev],
        }
    }

    /// True iff at least one current leaf carries a value.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.leaves.iter().any(|rev| self.values.contains_key(rev))
    }

    /// The current leaf revisions.
    #[must_use]
    pub fn leaves(&self) -> &[RevisionId] {
        &self.leaves
    }

    /// The value(s) visible at the current leaves: empty if dead, one value
    /// if the history has converged, more than one if two branches disagree.
    pub fn current_values(&self) -> Vec<&V> {
        self.leaves.iter().filter_map(|rev| self.values.get(rev)).collect()
    }

    /// The value recorded at `rev`, if `rev` ever had one set directly
    /// (not merely inherited through a leaf).
    #[must_use]
    pub fn recorded(&self, rev: RevisionId) -> Option<&V> {
        self.values.get(&rev)
    }

    /// Merge two statuses descended from the same override table.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let lookup = |rev: &RevisionId| self.overrides.get(rev).or_else(|| other.overrides.get(rev));

        let mut leaf_set: BTreeSet<RevisionId> =
            self.leaves.iter().chain(other.leaves.iter()).copied().collect();
        let mut done: BTreeSet<RevisionId> = BTreeSet::new();
        let mut todo: VecDeque<RevisionId> = leaf_set.iter().copied().collect();

        while let Some(rev) = todo.pop_front() {
            let Some(parents) = lookup(&rev) else { continue };
            for &parent in parents {
                if done.contains(&parent) {
                    continue;
                }
                if leaf_set.remove(&parent) {
                    continue;
                }
                done.insert(parent);
                todo.push_back(parent);
            }
        }

        let mut leaves: Vec<RevisionId> = leaf_set.into_iter().collect();
        leaves.sort_unstable();

        if leaves == self.leaves {
            return self.clone();
        }
        if leaves == other.leaves {
            return other.clone();
        }

        let mut overrides = self.overrides.clone();
        overrides.extend(other.overrides.clone());
        let mut values = self.values.clone();
        values.extend(other.values.clone());
        Self {
            overrides,
            values,
            leaves,
        }
    }

    /// Declare `self` and `other` to be the same entity under different
    /// histories, failing if they disagree on the value recorded at any
    /// revision both track (spec §4.7's item-identity suture).
    ///
    /// # Errors
    /// [`crate::error::PcdvError::InvariantViolation`] if a revision present
    /// in both histories recorded a different value in each.
    pub fn suture(&self, other: &Self) -> Result<Self, crate::error::PcdvError> {
        for (rev, value) in &self.values {
            if let Some(other_value) = other.values.get(rev) {
                if other_value != value {
                    return Err(crate::error::PcdvError::invariant(format!(
                        "suture conflict: revision {rev} disagrees on the value recorded for this entity"
                    )));
                }
            }
        }
        Ok(self.merge(other))
    }
}

impl<V: Clone + PartialEq> Default for Living<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::hash;

    fn rev(label: &str) -> RevisionId {
        hash(label.as_bytes())
    }

    #[test]
    fn fresh_status_is_dead() {
        assert!(!Living::<()>::new().is_live());
    }

    #[test]
    fn set_then_query_is_live() {
        let s = Living::new().set(rev("r1"), ());
        assert!(s.is_live());
    }

    #[test]
    fn kill_after_set_is_dead() {
        let s = Living::new().set(rev("r1"), ()).kill(rev("r2"));
        assert!(!s.is_live());
    }

    #[test]
    fn merge_of_identical_histories_is_unchanged() {
        let a = Living::new().set(rev("r1"), ());
        let b = a.clone();
        let merged = a.merge(&b);
        assert_eq!(merged, a);
    }

    #[test]
    fn merge_collapses_ancestor_leaf() {
        let base = Living::new().set(rev("r1"), "v1");
        let advanced = base.set(rev("r2"), "v2");
        // base's leaf (r1) is an ancestor of advanced's leaf (r2); the merge
        // should keep only r2.
        let merged = base.merge(&advanced);
        assert_eq!(merged.leaves(), &[rev("r2")]);
        assert_eq!(merged.current_values(), vec![&"v2"]);
    }

    #[test]
    fn merge_of_independent_branches_keeps_both_leaves() {
        let base = Living::new().set(rev("base"), "shared");
        let left = base.set(rev("left"), "left-value");
        let right = base.set(rev("right"), "right-value");
        let merged = left.merge(&right);
        assert_eq!(merged.leaves().len(), 2);
        assert_eq!(merged.current_values().len(), 2);
    }

    #[test]
    fn merge_one_sided_kill_yields_conflict_between_live_and_dead() {
        let base = Living::new().set(rev("base"), ());
        let left = base.set(rev("left"), ());
        let right = base.kill(rev("right"));
        let merged = left.merge(&right);
        assert_eq!(merged.leaves().len(), 2);
        assert!(merged.is_live());
        assert_eq!(merged.current_values().len(), 1);
    }

    #[test]
    fn suture_merges_agreeing_histories() {
        let base = Living::new().set(rev("base"), "loc-a");
        let left = base.set(rev("left"), "loc-b");
        let right = base.clone();
        let sutured = left.suture(&right).unwrap();
        assert_eq!(sutured.current_values(), vec![&"loc-b"]);
    }

    #[test]
    fn suture_rejects_disagreeing_histories() {
        let a = Living::new().set(rev("shared"), "loc-a");
        let b = Living::new().set(rev("shared"), "loc-b");
        assert!(a.suture(&b).is_err());
    }
}
