//! Ancestry graph operations over a revision DAG (spec §4.5).
//!
//! Every algorithm here takes a `&dyn AncestryLookup` rather than a concrete
//! store type, so it has no dependency on how (or whether) revisions are
//! persisted; callers typically hand in their [`crate::store::RevisionStore`]
//! wrapped behind the trait, or a fixture in tests.

pub mod height;

pub use height::RevHeight;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::PcdvError;
use crate::ident::RevisionId;

/// Read-only access to a revision DAG, as much as the graph algorithms in
/// this module need: parent edges and heights. Implemented by the revision
/// store in production and by small fixtures in tests.
pub trait AncestryLookup {
    /// The immediate parents of `rev`. The root revision has none.
    ///
    /// # Errors
    /// If `rev` is unknown to the backing store.
    fn parents_of(&self, rev: RevisionId) -> Result<BTreeSet<RevisionId>, PcdvError>;

    /// The height of `rev` (spec §4.5's ordering).
    ///
    /// # Errors
    /// If `rev` is unknown to the backing store.
    fn height_of(&self, rev: RevisionId) -> Result<RevHeight, PcdvError>;
}

/// The strict ancestors of `start`: every revision reachable by repeatedly
/// following parent edges, not including `start` itself. Iterative (a queue,
/// not a native call stack) so history depth cannot overflow the stack.
///
/// # Errors
/// Propagates any [`AncestryLookup`] lookup failure.
pub fn ancestors_of(
    lookup: &dyn AncestryLookup,
    start: RevisionId,
) -> Result<BTreeSet<RevisionId>, PcdvError> {
    let mut seen = BTreeSet::new();
    let mut frontier = VecDeque::new();
    frontier.push_back(start);
    while let Some(rev) = frontier.pop_front() {
        for parent in lookup.parents_of(rev)? {
            if seen.insert(parent) {
                frontier.push_back(parent);
            }
        }
    }
    Ok(seen)
}

fn inclusive_ancestors(
    lookup: &dyn AncestryLookup,
    start: RevisionId,
) -> Result<BTreeSet<RevisionId>, PcdvError> {
    let mut set = ancestors_of(lookup, start)?;
    set.insert(start);
    Ok(set)
}

/// Fetch `rev`'s parents through `cache`, populating it on first access.
fn cached_parents(
    lookup: &dyn AncestryLookup,
    cache: &mut BTreeMap<RevisionId, BTreeSet<RevisionId>>,
    rev: RevisionId,
) -> Result<BTreeSet<RevisionId>, PcdvError> {
    if let Some(parents) = cache.get(&rev) {
        return Ok(parents.clone());
    }
    let parents = lookup.parents_of(rev)?;
    cache.insert(rev, parents.clone());
    Ok(parents)
}

/// One round of `ensure_parents_loaded` + `expand_ancestors`: for every node
/// currently tracked in `ancestors`, union in its own id and its parents'
/// ancestor sets (discovering parents lazily, and seeding a fresh entry for
/// any parent not yet tracked). Returns whether anything changed, so the
/// caller can iterate to a fixed point.
fn expand_ancestors(
    lookup: &dyn AncestryLookup,
    parents_cache: &mut BTreeMap<RevisionId, BTreeSet<RevisionId>>,
    ancestors: &mut BTreeMap<RevisionId, BTreeSet<RevisionId>>,
) -> Result<bool, PcdvError> {
    let mut changed = false;
    let nodes: Vec<RevisionId> = ancestors.keys().copied().collect();
    for n in nodes {
        let before = ancestors[&n].clone();
        let mut bits = before.clone();
        bits.insert(n);
        for p in cached_parents(lookup, parents_cache, n)? {
            bits.insert(p);
            let pbits = ancestors.entry(p).or_default().clone();
            bits.extend(pbits);
        }
        if bits != before {
            changed = true;
        }
        ancestors.insert(n, bits);
    }
    Ok(changed)
}

/// One round of `expand_dominators`: for every node currently tracked in
/// `dominators`, intersect its parents' dominator sets (a node with no
/// parents keeps only itself; a node with one parent inherits that
/// parent's dominators verbatim; a node with several parents keeps only
/// what all of them agree dominates it). This is the dataflow meet that
/// makes `dominators(n)` shrink to the true dominator set as the fixed
/// point is reached, as opposed to `ancestors(n)`, which only ever grows.
fn expand_dominators(
    lookup: &dyn AncestryLookup,
    parents_cache: &mut BTreeMap<RevisionId, BTreeSet<RevisionId>>,
    dominators: &mut BTreeMap<RevisionId, BTreeSet<RevisionId>>,
) -> Result<bool, PcdvError> {
    let mut changed = false;
    let nodes: Vec<RevisionId> = dominators.keys().copied().collect();
    for n in nodes {
        let before = dominators[&n].clone();
        let mut bits = before.clone();
        bits.insert(n);
        let parents = cached_parents(lookup, parents_cache, n)?;
        let mut intersection: Option<BTreeSet<RevisionId>> = None;
        for p in parents {
            let pbits = dominators.entry(p).or_default().clone();
            intersection = Some(match intersection {
                None => pbits,
                Some(acc) => acc.intersection(&pbits).copied().collect(),
            });
        }
        if let Some(inter) = intersection {
            bits.extend(inter);
        }
        if bits != before {
            changed = true;
        }
        dominators.insert(n, bits);
    }
    Ok(changed)
}

/// The nearest node that dominates one input and is an ancestor of the
/// other (spec §4.5): a lazy, bitset-style fixed-point computation over two
/// interned maps, `ancestors` (grows by union over parent edges) and
/// `dominators` (shrinks by intersection over parent edges), expanded round
/// by round until neither changes. A criss-cross graph — two independent
/// merges of the same parent pair, each with its own child — has no node
/// that dominates one side while being an ancestor of the other except
/// their shared root, even though one parent of the shared pair may have
/// greater height than the other; this is exactly the "silent propagate
/// elision" case a plain highest-height-in-the-intersection shortcut gets
/// wrong, which is why this function computes real dominance rather than
/// approximating it by height.
///
/// When more than one node satisfies the dominates-one/ancestor-of-other
/// criterion once the computation has converged (possible along a single
/// unbranched dominator chain), the one with the greatest height is
/// returned, matching the "nearest" wording above.
///
/// Returns `None` if `left` and `right` have no common ancestor at all
/// (disjoint histories).
///
/// # Errors
/// Propagates any [`AncestryLookup`] lookup failure.
pub fn common_merge_ancestor(
    lookup: &dyn AncestryLookup,
    left: RevisionId,
    right: RevisionId,
) -> Result<Option<RevisionId>, PcdvError> {
    if left == right {
        return Ok(Some(left));
    }

    let mut parents_cache: BTreeMap<RevisionId, BTreeSet<RevisionId>> = BTreeMap::new();
    let mut ancestors: BTreeMap<RevisionId, BTreeSet<RevisionId>> = BTreeMap::new();
    let mut dominators: BTreeMap<RevisionId, BTreeSet<RevisionId>> = BTreeMap::new();
    ancestors.insert(left, BTreeSet::new());
    ancestors.insert(right, BTreeSet::new());
    dominators.insert(left, BTreeSet::new());
    dominators.insert(right, BTreeSet::new());

    loop {
        let ancestors_changed = expand_ancestors(lookup, &mut parents_cache, &mut ancestors)?;
        let dominators_changed = expand_dominators(lookup, &mut parents_cache, &mut dominators)?;
        if !ancestors_changed && !dominators_changed {
            break;
        }
    }

    let mut candidates: BTreeSet<RevisionId> = ancestors[&left]
        .intersection(&dominators[&right])
        .copied()
        .collect();
    candidates.extend(ancestors[&right].intersection(&dominators[&left]).copied());

    let mut best: Option<(RevHeight, RevisionId)> = None;
    for rev in candidates {
        let height = lookup.height_of(rev)?;
        let better = match &best {
            Some((best_height, _)) => height > *best_height,
            None => true,
        };
        if better {
            best = Some((height, rev));
        }
    }
    Ok(best.map(|(_, rev)| rev))
}

/// Topologically order `subset`: repeatedly emit the members with no
/// remaining parent inside `subset`, then remove them, until the set is
/// empty (spec §4.5).
///
/// # Errors
/// [`PcdvError::InvariantViolation`] if `subset`'s induced parent relation
/// contains a cycle (never true of a real revision DAG).
pub fn toposort(
    lookup: &dyn AncestryLookup,
    subset: &BTreeSet<RevisionId>,
) -> Result<Vec<RevisionId>, PcdvError> {
    let mut remaining_parents: BTreeMap<RevisionId, BTreeSet<RevisionId>> = BTreeMap::new();
    for &rev in subset {
        let parents = lookup
            .parents_of(rev)?
            .into_iter()
            .filter(|p| subset.contains(p))
            .collect();
        remaining_parents.insert(rev, parents);
    }

    let mut order = Vec::with_capacity(subset.len());
    while !remaining_parents.is_empty() {
        let roots: Vec<RevisionId> = remaining_parents
            .iter()
            .filter(|(_, parents)| parents.is_empty())
            .map(|(rev, _)| *rev)
            .collect();
        if roots.is_empty() {
            return Err(PcdvError::invariant("ancestry graph contains a cycle"));
        }
        for rev in &roots {
            remaining_parents.remove(rev);
        }
        for parents in remaining_parents.values_mut() {
            for rev in &roots {
                parents.remove(rev);
            }
        }
        order.extend(roots);
    }
    Ok(order)
}

/// `(ancestors(a) \ ancestors(b), ancestors(b) \ ancestors(a))`, each
/// closure including the revision itself (spec §4.5).
///
/// # Errors
/// Propagates any [`AncestryLookup`] lookup failure.
pub fn uncommon_ancestors(
    lookup: &dyn AncestryLookup,
    a: RevisionId,
    b: RevisionId,
) -> Result<(BTreeSet<RevisionId>, BTreeSet<RevisionId>), PcdvError> {
    let closure_a = inclusive_ancestors(lookup, a)?;
    let closure_b = inclusive_ancestors(lookup, b)?;
    let only_a = closure_a.difference(&closure_b).copied().collect();
    let only_b = closure_b.difference(&closure_a).copied().collect();
    Ok((only_a, only_b))
}

/// Remove from `revs` every member that is a (strict) ancestor of another
/// member, leaving only the heads (spec §4.5).
///
/// # Errors
/// Propagates any [`AncestryLookup`] lookup failure.
pub fn erase_ancestors(
    lookup: &dyn AncestryLookup,
    revs: &BTreeSet<RevisionId>,
) -> Result<BTreeSet<RevisionId>, PcdvError> {
    let mut excluded = BTreeSet::new();
    for &rev in revs {
        excluded.extend(ancestors_of(lookup, rev)?);
    }
    Ok(revs.difference(&excluded).copied().collect())
}

/// The inclusive ancestors of `revs` that are not also inclusive ancestors
/// of `exclude` (spec §4.5's multi-source ancestry-difference).
///
/// # Errors
/// Propagates any [`AncestryLookup`] lookup failure.
pub fn ancestry_difference(
    lookup: &dyn AncestryLookup,
    revs: &BTreeSet<RevisionId>,
    exclude: &BTreeSet<RevisionId>,
) -> Result<BTreeSet<RevisionId>, PcdvError> {
    let mut included = BTreeSet::new();
    for &rev in revs {
        included.extend(inclusive_ancestors(lookup, rev)?);
    }
    let mut excluded = BTreeSet::new();
    for &rev in exclude {
        excluded.extend(inclusive_ancestors(lookup, rev)?);
    }
    Ok(included.difference(&excluded).copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::hash;
    use std::collections::BTreeMap as Map;

    /// A fixed in-memory graph used to exercise the algorithms above.
    struct FakeGraph {
        parents: Map<RevisionId, BTreeSet<RevisionId>>,
        heights: Map<RevisionId, RevHeight>,
    }

    impl AncestryLookup for FakeGraph {
        fn parents_of(&self, rev: RevisionId) -> Result<BTreeSet<RevisionId>, PcdvError> {
            Ok(self.parents.get(&rev).cloned().unwrap_or_default())
        }

        fn height_of(&self, rev: RevisionId) -> Result<RevHeight, PcdvError> {
            self.heights
                .get(&rev)
                .cloned()
                .ok_or_else(|| PcdvError::invariant("unknown revision in fixture"))
        }
    }

    fn rev(label: &str) -> RevisionId {
        hash(label.as_bytes())
    }

    /// root -> a -> b
    ///      -> c -> d
    /// with a merge node `m` whose parents are `b` and `d`.
    fn diamond() -> FakeGraph {
        let root = rev("root");
        let a = rev("a");
        let b = rev("b");
        let c = rev("c");
        let d = rev("d");
        let m = rev("m");

        let mut parents = Map::new();
        parents.insert(a, BTreeSet::from([root]));
        parents.insert(c, BTreeSet::from([root]));
        parents.insert(b, BTreeSet::from([a]));
        parents.insert(d, BTreeSet::from([c]));
        parents.insert(m, BTreeSet::from([b, d]));

        let root_h = RevHeight::root();
        let a_h = root_h.child(0);
        let b_h = a_h.child(0);
        let c_h = root_h.child(1);
        let d_h = c_h.child(0);
        let m_h = b_h.child(1);

        let mut heights = Map::new();
        heights.insert(root, root_h);
        heights.insert(a, a_h);
        heights.insert(b, b_h);
        heights.insert(c, c_h);
        heights.insert(d, d_h);
        heights.insert(m, m_h);

        FakeGraph { parents, heights }
    }

    #[test]
    fn ancestors_of_reaches_the_whole_chain() {
        let g = diamond();
        let anc = ancestors_of(&g, rev("b")).unwrap();
        assert_eq!(anc, BTreeSet::from([rev("a"), rev("root")]));
    }

    #[test]
    fn common_merge_ancestor_of_siblings_is_their_root() {
        let g = diamond();
        let lca = common_merge_ancestor(&g, rev("b"), rev("d")).unwrap();
        assert_eq!(lca, Some(rev("root")));
    }

    #[test]
    fn common_merge_ancestor_of_a_node_and_itself_is_itself() {
        let g = diamond();
        let lca = common_merge_ancestor(&g, rev("b"), rev("b")).unwrap();
        assert_eq!(lca, Some(rev("b")));
    }

    #[test]
    fn common_merge_ancestor_prefers_descendant_over_root_when_nested() {
        let g = diamond();
        // b is an ancestor of m, so the common ancestor of {b, m} is b, not root.
        let lca = common_merge_ancestor(&g, rev("b"), rev("m")).unwrap();
        assert_eq!(lca, Some(rev("b")));
    }

    /// root -> a, root -> b; two independent merges `x` and `y` of the same
    /// pair `(a, b)`; `p = child(x)`, `q = child(y)`. Neither `a` nor `b`
    /// dominates `p` or `q` (every path to either one can route through
    /// either parent), so the true common-merge-ancestor is `root`, not
    /// whichever of `a`/`b` happens to have the greater height.
    fn criss_cross() -> FakeGraph {
        let root = rev("root");
        let a = rev("a");
        let b = rev("b");
        let x = rev("x");
        let y = rev("y");
        let p = rev("p");
        let q = rev("q");

        let mut parents = Map::new();
        parents.insert(a, BTreeSet::from([root]));
        parents.insert(b, BTreeSet::from([root]));
        parents.insert(x, BTreeSet::from([a, b]));
        parents.insert(y, BTreeSet::from([a, b]));
        parents.insert(p, BTreeSet::from([x]));
        parents.insert(q, BTreeSet::from([y]));

        let root_h = RevHeight::root();
        let a_h = root_h.child(0);
        let b_h = root_h.child(1);
        // Give `b` strictly greater height than `a` so a height-only
        // shortcut would (wrongly) prefer it as the merge base.
        let x_h = a_h.child(0);
        let y_h = b_h.child(0);
        let p_h = x_h.child(0);
        let q_h = y_h.child(0);

        let mut heights = Map::new();
        heights.insert(root, root_h);
        heights.insert(a, a_h);
        heights.insert(b, b_h);
        heights.insert(x, x_h);
        heights.insert(y, y_h);
        heights.insert(p, p_h);
        heights.insert(q, q_h);

        FakeGraph { parents, heights }
    }

    #[test]
    fn common_merge_ancestor_of_a_criss_cross_is_the_shared_root_not_a_parent() {
        let g = criss_cross();
        let lca = common_merge_ancestor(&g, rev("p"), rev("q")).unwrap();
        assert_eq!(lca, Some(rev("root")));
    }

    #[test]
    fn toposort_respects_parent_before_child() {
        let g = diamond();
        let subset = BTreeSet::from([rev("root"), rev("a"), rev("b"), rev("c"), rev("d")]);
        let order = toposort(&g, &subset).unwrap();
        let pos = |r: RevisionId| order.iter().position(|x| *x == r).unwrap();
        assert!(pos(rev("root")) < pos(rev("a")));
        assert!(pos(rev("a")) < pos(rev("b")));
        assert!(pos(rev("root")) < pos(rev("c")));
        assert!(pos(rev("c")) < pos(rev("d")));
    }

    #[test]
    fn uncommon_ancestors_splits_the_diamond() {
        let g = diamond();
        let (only_b, only_d) = uncommon_ancestors(&g, rev("b"), rev("d")).unwrap();
        assert!(only_b.contains(&rev("a")));
        assert!(only_b.contains(&rev("b")));
        assert!(!only_b.contains(&rev("root")));
        assert!(only_d.contains(&rev("c")));
        assert!(only_d.contains(&rev("d")));
    }

    #[test]
    fn erase_ancestors_keeps_only_heads() {
        let g = diamond();
        let revs = BTreeSet::from([rev("root"), rev("a"), rev("b")]);
        let heads = erase_ancestors(&g, &revs).unwrap();
        assert_eq!(heads, BTreeSet::from([rev("b")]));
    }

    #[test]
    fn ancestry_difference_excludes_shared_history() {
        let g = diamond();
        let revs = BTreeSet::from([rev("b")]);
        let exclude = BTreeSet::from([rev("a")]);
        let diff = ancestry_difference(&g, &revs, &exclude).unwrap();
        assert_eq!(diff, BTreeSet::from([rev("b")]));
    }
}
