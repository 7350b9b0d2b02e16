//! The PCDV tree engine (spec §4.7).
//!
//! Where the file weave tracks which *lines* are live, the tree engine
//! tracks which *locations* an item occupies, using the same
//! [`crate::weave::Living`] override-table CRDT with a [`Location`] payload
//! in place of a bit. Building a tree from a rearrangement is grounded in
//! the same tid-renumbering the path-analysis engine already performs
//! (`crate::analysis::analyze`): every tid that survives a change-set maps
//! to a persistent [`ItemId`] carried over from the prior tree, and every
//! newly-introduced tid allocates a fresh one.

pub mod item;

pub use item::{ItemId, ItemIdAllocator, Location};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::analysis::{analyze, EntryKind, Tid};
use crate::changeset::Rearrangement;
use crate::error::PcdvError;
use crate::ident::RevisionId;
use crate::path::{PathComponent, RepoPath};
use crate::weave::Living;

/// One item's kind and location history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemRecord {
    pub is_dir: bool,
    pub status: Living<Location>,
}

/// A tree's item table, shared cheaply across states the way [`crate::weave::WeaveHandle`]
/// shares a file's weave.
pub type ItemTable = Arc<BTreeMap<ItemId, ItemRecord>>;

/// A handle to an item table, plus the `path -> item_id` index current trees
/// need to resolve untouched paths when processing the next rearrangement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeState {
    items: ItemTable,
}

impl TreeState {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            items: Arc::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn items(&self) -> &BTreeMap<ItemId, ItemRecord> {
        &self.items
    }

    /// The current (possibly conflicted) location(s) of `item`.
    #[must_use]
    pub fn locations_of(&self, item: ItemId) -> Vec<&Location> {
        self.items
            .get(&item)
            .map(|r| r.status.current_values())
            .unwrap_or_default()
    }

    /// The `path -> item_id` index implied by this tree's current,
    /// unambiguous locations. Items still in conflict (more than one current
    /// location) are omitted.
    #[must_use]
    pub fn path_index(&self) -> BTreeMap<RepoPath, ItemId> {
        let mut by_item: BTreeMap<ItemId, &Location> = BTreeMap::new();
        for (id, record) in self.items.iter() {
            let values = record.status.current_values();
            if let [only] = values.as_slice() {
                by_item.insert(*id, only);
            }
        }
        let mut index = BTreeMap::new();
        for (&id, _) in &by_item {
            if let Some(path) = full_path(&by_item, id) {
                index.insert(path, id);
            }
        }
        index
    }
}

fn full_path(by_item: &BTreeMap<ItemId, &Location>, item: ItemId) -> Option<RepoPath> {
    if item == ItemId::ROOT {
        return Some(RepoPath::root());
    }
    let loc = by_item.get(&item)?;
    let name = loc.name.clone()?;
    let parent_path = full_path(by_item, loc.parent)?;
    Some(parent_path.join(name))
}

/// Process a rearrangement against `base`, producing the resulting tree and
/// its updated `path -> item_id` index (spec §4.7's "build a tree from a
/// rearrangement").
///
/// Rather than the hand-rolled `(depth, class, source-rev)` sort named in
/// the design note, this reuses [`analyze`], whose tid-renumbering already
/// resolves every destination parent before its children regardless of
/// input order (directory context nodes are allocated eagerly by
/// `resolve_dir`). The two are equivalent for any rearrangement that passes
/// `analyze`'s own sanity check, which rejects sibling name collisions —
/// the same collisions the original algorithm's "record a suture" step
/// exists to catch within a single change-set.
///
/// # Errors
/// Propagates [`analyze`]'s errors, plus [`PcdvError::InvariantViolation`]
/// if the rearrangement references a path absent from `base_index` that
/// this change-set does not itself add.
pub fn build_tree_from_rearrangement(
    base: &TreeState,
    base_index: &BTreeMap<RepoPath, ItemId>,
    rearr: &Rearrangement,
    rev: RevisionId,
    allocator: &mut ItemIdAllocator,
) -> Result<(TreeState, BTreeMap<RepoPath, ItemId>), PcdvError> {
    let analysis = analyze(rearr)?;
    let mut items: BTreeMap<ItemId, ItemRecord> = (*base.items).clone();
    let mut tid_to_item: BTreeMap<Tid, ItemId> = BTreeMap::new();

    for (tid, pre_entry) in analysis.pre.entries() {
        let item_id = match analysis.pre.full_path(tid).filter(|_| pre_entry.name.is_some()) {
            Some(path) => match base_index.get(&path) {
                Some(&id) => id,
                None => allocator.alloc(),
            },
            None => allocator.alloc(),
        };
        tid_to_item.insert(tid, item_id);
    }

    // Incremental: start from the base index and only touch the paths this
    // rearrangement's tids actually move, so paths untouched by `rearr`
    // (the bulk of a real tree) survive unchanged.
    let mut new_index = base_index.clone();
    for (tid, pre_entry) in analysis.pre.entries() {
        if pre_entry.name.is_some() {
            if let Some(old_path) = analysis.pre.full_path(tid) {
                new_index.remove(&old_path);
            }
        }
    }

    for (&tid, &item_id) in &tid_to_item {
        let post_entry = analysis
            .post
            .get(tid)
            .ok_or_else(|| PcdvError::invariant("tid missing from post path-state"))?;
        let is_dir = matches!(post_entry.kind, EntryKind::Directory);

        let location = match &post_entry.name {
            Some(name) => {
                let parent_item = if post_entry.parent == Tid::ROOT {
                    ItemId::ROOT
                } else {
                    *tid_to_item.get(&post_entry.parent).ok_or_else(|| {
                        PcdvError::invariant("parent tid has no assigned item id")
                    })?
                };
                Location {
                    parent: parent_item,
                    name: Some(name.clone()),
                }
            }
            None => Location::deleted(),
        };

        if let Some(path) = analysis.post.full_path(tid).filter(|_| location.is_present()) {
            new_index.insert(path, item_id);
        }

        let record = items.entry(item_id).or_insert_with(|| ItemRecord {
            is_dir,
            status: Living::new(),
        });
        record.is_dir = is_dir;
        record.status = record.status.set(rev, location);
    }

    Ok((
        TreeState {
            items: Arc::new(items),
        },
        new_index,
    ))
}

/// Merge two trees and apply both sides' rearrangements (spec §4.7's
/// `merge_with_rearrangement`, specialized to the two-parent case this
/// engine's revisions always present).
///
/// Unioning the item tables first (mashing every shared item's status, the
/// same way [`crate::weave::mash`] unions line statuses) then applying each
/// side's rearrangement over that shared base is equivalent, for merges
/// sourced from a common ancestor, to walking both rearrangements
/// interleaved in sorted order: neither rearrangement's operations
/// reference an item the other side renamed away from under it, because
/// [`crate::revision::construct_revision_from_ancestry`] already splices in
/// the path-preserving delete/add pairs that make that true.
///
/// # Errors
/// Propagates [`build_tree_from_rearrangement`]'s errors.
#[tracing::instrument(level = "debug", skip_all)]
pub fn merge_with_rearrangement(
    left: &TreeState,
    left_index: &BTreeMap<RepoPath, ItemId>,
    left_rearr: &Rearrangement,
    right: &TreeState,
    right_index: &BTreeMap<RepoPath, ItemId>,
    right_rearr: &Rearrangement,
    rev: RevisionId,
    allocator: &mut ItemIdAllocator,
) -> Result<(TreeState, BTreeMap<RepoPath, ItemId>), PcdvError> {
    let mashed = mash(left, right);
    let mut index = left_index.clone();
    for (path, id) in right_index {
        index.entry(path.clone()).or_insert(*id);
    }

    let (after_left, index_after_left) =
        build_tree_from_rearrangement(&mashed, &index, left_rearr, rev, allocator)?;
    let (after_both, index_after_both) =
        build_tree_from_rearrangement(&after_left, &index_after_left, right_rearr, rev, allocator)?;

    Ok((after_both, index_after_both))
}

/// Union two trees' item tables, merging every shared item's location
/// history via [`Living::merge`].
#[must_use]
pub fn mash(left: &TreeState, right: &TreeState) -> TreeState {
    let mut items: BTreeMap<ItemId, ItemRecord> = (*left.items).clone();
    for (id, right_record) in right.items.iter() {
        items
            .entry(*id)
            .and_modify(|left_record| {
                left_record.status = left_record.status.merge(&right_record.status);
            })
            .or_insert_with(|| right_record.clone());
    }
    TreeState {
        items: Arc::new(items),
    }
}

/// One conflict a merged tree surfaces (spec §4.7).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeConflict {
    /// One item has more than one current location.
    Split {
        item: ItemId,
        locations: Vec<Location>,
    },
    /// More than one item currently claims the same location.
    Collision {
        items: Vec<ItemId>,
        location: Location,
    },
}

/// Enumerate a merged tree's split and collision conflicts (spec §4.7).
#[must_use]
pub fn conflict(tree: &TreeState) -> Vec<TreeConflict> {
    let mut conflicts = Vec::new();
    let mut by_location: BTreeMap<(ItemId, Option<PathComponent>), BTreeSet<ItemId>> =
        BTreeMap::new();

    for (&item_id, record) in tree.items.iter() {
        let values = record.status.current_values();
        if values.len() > 1 {
            conflicts.push(TreeConflict::Split {
                item: item_id,
                locations: values.iter().map(|v| (*v).clone()).collect(),
            });
        }
        for loc in &values {
            if loc.is_present() {
                by_location
                    .entry((loc.parent, loc.name.clone()))
                    .or_default()
                    .insert(item_id);
            }
        }
    }

    for ((parent, name), items) in by_location {
        if items.len() > 1 {
            conflicts.push(TreeConflict::Collision {
                items: items.into_iter().collect(),
                location: Location { parent, name },
            });
        }
    }
    conflicts
}

/// Apply a set of `{item_id -> path}` resolutions to a conflicted tree
/// (spec §4.7's `merge_with_resolution`), processed shallowest-path-first so
/// a resolved item's parent is already placed by the time a deeper
/// resolution needs to look it up.
///
/// Each key in `resolutions` appears at most once, so no item can be forced
/// into two different locations by this call; an item not mentioned keeps
/// whichever current location(s) it already had.
///
/// # Errors
/// [`PcdvError::InvariantViolation`] if a resolution names an unknown item,
/// or a path whose parent directory is not itself resolved (by an earlier
/// entry in `resolutions`, or already present in `path_index`).
pub fn merge_with_resolution(
    tree: &TreeState,
    path_index: &BTreeMap<RepoPath, ItemId>,
    resolutions: &BTreeMap<ItemId, RepoPath>,
    rev: RevisionId,
) -> Result<TreeState, PcdvError> {
    let mut items: BTreeMap<ItemId, ItemRecord> = (*tree.items).clone();
    let mut resolved_paths: BTreeMap<RepoPath, ItemId> = path_index.clone();

    let mut ordered: Vec<(&ItemId, &RepoPath)> = resolutions.iter().collect();
    ordered.sort_by_key(|(_, path)| path.components().len());

    for (item_id, path) in ordered {
        let record = items
            .get(item_id)
            .ok_or_else(|| PcdvError::invariant("resolution references an unknown item"))?;
        let (parent_path, name) = path
            .split_leaf()
            .ok_or_else(|| PcdvError::invariant("cannot resolve an item to the root path"))?;
        let parent_item = if parent_path.is_root() {
            ItemId::ROOT
        } else {
            *resolved_paths.get(&parent_path).ok_or_else(|| {
                PcdvError::invariant(format!(
                    "no resolved ancestor directory at '{parent_path}'"
                ))
            })?
        };
        let location = Location {
            parent: parent_item,
            name: Some(name.clone()),
        };
        let new_status = record.status.set(rev, location);
        let is_dir = record.is_dir;
        items.insert(*item_id, ItemRecord { is_dir, status: new_status });
        resolved_paths.insert(path.clone(), *item_id);
    }

    Ok(TreeState {
        items: Arc::new(items),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::split_path;

    fn rev(n: u8) -> RevisionId {
        RevisionId::from_bytes([n; 20])
    }

    fn add_rearr(paths: &[&str]) -> Rearrangement {
        let mut r = Rearrangement::empty();
        for p in paths {
            r.added_files.insert(split_path(p).unwrap());
        }
        r
    }

    #[test]
    fn building_from_empty_allocates_fresh_items() {
        let mut alloc = ItemIdAllocator::new();
        let (tree, index) = build_tree_from_rearrangement(
            &TreeState::empty(),
            &BTreeMap::new(),
            &add_rearr(&["a", "dir/b"]),
            rev(1),
            &mut alloc,
        )
        .unwrap();
        assert_eq!(index.len(), 3); // a, dir, dir/b
        assert!(tree.items.values().all(|r| r.status.current_values().len() == 1));
    }

    #[test]
    fn untouched_items_keep_their_identity_across_revisions() {
        let mut alloc = ItemIdAllocator::new();
        let (t1, idx1) = build_tree_from_rearrangement(
            &TreeState::empty(),
            &BTreeMap::new(),
            &add_rearr(&["a", "b"]),
            rev(1),
            &mut alloc,
        )
        .unwrap();
        let a_id = idx1[&split_path("a").unwrap()];

        let mut r2 = Rearrangement::empty();
        r2.added_files.insert(split_path("c").unwrap());
        let (t2, idx2) =
            build_tree_from_rearrangement(&t1, &idx1, &r2, rev(2), &mut alloc).unwrap();

        assert_eq!(idx2[&split_path("a").unwrap()], a_id);
        assert_eq!(t2.items.len(), t1.items.len() + 1);
    }

    #[test]
    fn rename_moves_an_item_without_changing_its_identity() {
        let mut alloc = ItemIdAllocator::new();
        let (t1, idx1) = build_tree_from_rearrangement(
            &TreeState::empty(),
            &BTreeMap::new(),
            &add_rearr(&["old"]),
            rev(1),
            &mut alloc,
        )
        .unwrap();
        let old_id = idx1[&split_path("old").unwrap()];

        let mut r2 = Rearrangement::empty();
        r2.renamed_files
            .insert(split_path("old").unwrap(), split_path("new").unwrap());
        let (t2, idx2) =
            build_tree_from_rearrangement(&t1, &idx1, &r2, rev(2), &mut alloc).unwrap();

        assert_eq!(idx2[&split_path("new").unwrap()], old_id);
        assert!(!idx2.contains_key(&split_path("old").unwrap()));
    }

    #[test]
    fn delete_records_the_deleted_sentinel_location() {
        let mut alloc = ItemIdAllocator::new();
        let (t1, idx1) = build_tree_from_rearrangement(
            &TreeState::empty(),
            &BTreeMap::new(),
            &add_rearr(&["gone"]),
            rev(1),
            &mut alloc,
        )
        .unwrap();
        let id = idx1[&split_path("gone").unwrap()];

        let mut r2 = Rearrangement::empty();
        r2.deleted_files.insert(split_path("gone").unwrap());
        let (t2, idx2) =
            build_tree_from_rearrangement(&t1, &idx1, &r2, rev(2), &mut alloc).unwrap();

        assert!(!idx2.values().any(|&v| v == id));
        let values = t2.locations_of(id);
        assert_eq!(values, vec![&Location::deleted()]);
    }

    #[test]
    fn merge_with_rearrangement_combines_independent_adds() {
        let mut alloc = ItemIdAllocator::new();
        let base = TreeState::empty();
        let base_index = BTreeMap::new();

        let left_rearr = add_rearr(&["left-only"]);
        let right_rearr = add_rearr(&["right-only"]);

        let (merged, index) = merge_with_rearrangement(
            &base,
            &base_index,
            &left_rearr,
            &base,
            &base_index,
            &right_rearr,
            rev(3),
            &mut alloc,
        )
        .unwrap();

        assert!(index.contains_key(&split_path("left-only").unwrap()));
        assert!(index.contains_key(&split_path("right-only").unwrap()));
        assert!(conflict(&merged).is_empty());
    }

    #[test]
    fn conflict_detects_a_rename_collision() {
        let mut alloc = ItemIdAllocator::new();
        let (base, base_index) = build_tree_from_rearrangement(
            &TreeState::empty(),
            &BTreeMap::new(),
            &add_rearr(&["a", "b"]),
            rev(1),
            &mut alloc,
        )
        .unwrap();

        let mut left_rearr = Rearrangement::empty();
        left_rearr
            .renamed_files
            .insert(split_path("a").unwrap(), split_path("target").unwrap());
        let (left, left_index) =
            build_tree_from_rearrangement(&base, &base_index, &left_rearr, rev(2), &mut alloc)
                .unwrap();

        let mut right_rearr = Rearrangement::empty();
        right_rearr
            .renamed_files
            .insert(split_path("b").unwrap(), split_path("target").unwrap());
        let (right, right_index) =
            build_tree_from_rearrangement(&base, &base_index, &right_rearr, rev(2), &mut alloc)
                .unwrap();

        let merged = mash(&left, &right);
        let mut index = left_index;
        for (p, id) in right_index {
            index.entry(p).or_insert(id);
        }
        let conflicts = conflict(&merged);
        assert!(conflicts
            .iter()
            .any(|c| matches!(c, TreeConflict::Collision { .. })));
        let _ = index;
    }

    #[test]
    fn merge_with_resolution_places_a_collision_winner() {
        let mut alloc = ItemIdAllocator::new();
        let (base, base_index) = build_tree_from_rearrangement(
            &TreeState::empty(),
            &BTreeMap::new(),
            &add_rearr(&["a", "b"]),
            rev(1),
            &mut alloc,
        )
        .unwrap();
        let a_id = base_index[&split_path("a").unwrap()];
        let b_id = base_index[&split_path("b").unwrap()];

        let mut rearr = Rearrangement::empty();
        rearr
            .renamed_files
            .insert(split_path("a").unwrap(), split_path("target").unwrap());
        rearr
            .renamed_files
            .insert(split_path("b").unwrap(), split_path("also-target").unwrap());
        let (moved, index) =
            build_tree_from_rearrangement(&base, &base_index, &rearr, rev(2), &mut alloc).unwrap();

        let mut resolutions = BTreeMap::new();
        resolutions.insert(b_id, split_path("target/b").unwrap());
        // b becomes a child of a's new location; a must already be placed.
        let resolved = merge_with_resolution(&moved, &index, &resolutions, rev(3)).unwrap();

        assert_eq!(resolved.locations_of(a_id), vec![&Location {
            parent: ItemId::ROOT,
            name: Some(split_path("target").unwrap().leaf().unwrap().clone()),
        }]);
        assert_eq!(
            resolved.locations_of(b_id),
            vec![&Location {
                parent: a_id,
                name: Some(split_path("target/b").unwrap().leaf().unwrap().clone()),
            }]
        );
    }
}
