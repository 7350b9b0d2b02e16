//! Revision composition (spec §4.8).
//!
//! A [`Revision`] names the manifest it produces and, per parent, the
//! change-set that reaches it from that parent's manifest. Its identifier is
//! the hash of a canonical serialization of that structure, so two callers
//! who build the same revision from the same inputs always agree on its id
//! without negotiating.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ancestry::{common_merge_ancestor, AncestryLookup};
use crate::changeset::{serialize, ChangeSet, Rearrangement};
use crate::error::PcdvError;
use crate::ident::{hash, FileId, ManifestId, RevisionId};
use crate::manifest::{self, Manifest};
use crate::store::RevisionStore;

/// One parent edge: the manifest it started from, and the change-set that
/// reaches this revision's manifest from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionEdge {
    pub old_manifest: ManifestId,
    pub changes: ChangeSet,
}

/// A revision record: the manifest it produces, plus one edge per parent.
/// The root revision has exactly one edge, keyed by [`RevisionId::NULL`];
/// an ordinary revision has one edge; a merge has two.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub new_manifest: ManifestId,
    pub edges: BTreeMap<RevisionId, RevisionEdge>,
}

impl Revision {
    /// Canonical textual form (spec §6): per parent, sorted by parent
    /// identifier (the `BTreeMap` iteration order already matches), a
    /// `new_manifest`/`old_revision`/`old_manifest` stanza followed by the
    /// edge's printed change-set.
    #[must_use]
    pub fn canonical_bytes(&self) -> String {
        let mut out = String::new();
        out.push_str("new_manifest [");
        out.push_str(&self.new_manifest.to_hex());
        out.push_str("]\n");
        for (parent, edge) in &self.edges {
            out.push_str("old_revision [");
            out.push_str(&parent.to_hex());
            out.push_str("]\n");
            out.push_str("old_manifest [");
            out.push_str(&edge.old_manifest.to_hex());
            out.push_str("]\n");
            out.push_str(&serialize::print(&edge.changes));
        }
        out
    }

    /// This revision's content-addressed identifier.
    #[must_use]
    pub fn id(&self) -> RevisionId {
        hash(self.canonical_bytes().as_bytes())
    }
}

/// Describes the one piece of context [`construct_revision_from_ancestry`]
/// cannot get from the store alone: which parent(s) a new revision has, the
/// manifest it should produce, and (for non-root nodes) the rearrangement
/// connecting each parent's manifest to it.
pub enum AncestryNode {
    /// A revision with no parents: a pure-addition change-set from the empty
    /// manifest.
    Root { manifest: Manifest },
    /// A revision with one parent.
    Child {
        parent: RevisionId,
        manifest: Manifest,
        rearrangement: Rearrangement,
    },
    /// A revision merging two parents.
    Merge {
        left: RevisionId,
        right: RevisionId,
        manifest: Manifest,
        left_rearrangement: Rearrangement,
        right_rearrangement: Rearrangement,
    },
}

/// Build a [`Revision`] from a description of its parentage (spec §4.8).
///
/// For a merge, in addition to each parent's own change-set, this splices a
/// delete-then-add pair into the edge whose parent *didn't* kill a path that
/// the common ancestor had and the *other* parent did kill, so that a file
/// resurrected across a merge boundary keeps a visible identity event rather
/// than silently reappearing. This is a same-path reduction of the full
/// rename-aware algorithm: a path resurrected under a different name than it
/// was killed under is not detected.
///
/// # Errors
/// Propagates [`RevisionStore`] and [`manifest::complete_change_set`] errors,
/// or [`PcdvError::InvariantViolation`] if a merge's parents share no common
/// ancestor.
#[tracing::instrument(level = "debug", skip_all)]
pub fn construct_revision_from_ancestry(
    store: &dyn RevisionStore,
    ancestry: &dyn AncestryLookup,
    node: &AncestryNode,
) -> Result<Revision, PcdvError> {
    match node {
        AncestryNode::Root { manifest } => {
            let empty = Manifest::empty();
            let old_manifest = empty.manifest_id();
            let changes = crate::manifest::build_pure_addition_change_set(manifest);
            let mut edges = BTreeMap::new();
            edges.insert(RevisionId::NULL, RevisionEdge { old_manifest, changes });
            Ok(Revision {
                new_manifest: manifest.manifest_id(),
                edges,
            })
        }
        AncestryNode::Child {
            parent,
            manifest: new_manifest,
            rearrangement,
        } => {
            let old_manifest_id = store.get_revision_manifest(*parent)?;
            let old_manifest = store.get_manifest(old_manifest_id)?;
            let changes = manifest::complete_change_set(&old_manifest, new_manifest, rearrangement)?;
            let mut edges = BTreeMap::new();
            edges.insert(
                *parent,
                RevisionEdge {
                    old_manifest: old_manifest_id,
                    changes,
                },
            );
            Ok(Revision {
                new_manifest: new_manifest.manifest_id(),
                edges,
            })
        }
        AncestryNode::Merge {
            left,
            right,
            manifest: new_manifest,
            left_rearrangement,
            right_rearrangement,
        } => {
            let common = common_merge_ancestor(ancestry, *left, *right)?
                .ok_or_else(|| PcdvError::invariant("merge parents share no common ancestor"))?;
            let common_manifest_id = store.get_revision_manifest(common)?;
            let common_manifest = store.get_manifest(common_manifest_id)?;

            let left_manifest_id = store.get_revision_manifest(*left)?;
            let left_manifest = store.get_manifest(left_manifest_id)?;
            let right_manifest_id = store.get_revision_manifest(*right)?;
            let right_manifest = store.get_manifest(right_manifest_id)?;

            let mut left_changes =
                manifest::complete_change_set(&left_manifest, new_manifest, left_rearrangement)?;
            let mut right_changes =
                manifest::complete_change_set(&right_manifest, new_manifest, right_rearrangement)?;

            splice_resurrection_pairs(&common_manifest, &right_manifest, &mut left_changes, new_manifest);
            splice_resurrection_pairs(&common_manifest, &left_manifest, &mut right_changes, new_manifest);

            let mut edges = BTreeMap::new();
            edges.insert(
                *left,
                RevisionEdge {
                    old_manifest: left_manifest_id,
                    changes: left_changes,
                },
            );
            edges.insert(
                *right,
                RevisionEdge {
                    old_manifest: right_manifest_id,
                    changes: right_changes,
                },
            );
            Ok(Revision {
                new_manifest: new_manifest.manifest_id(),
                edges,
            })
        }
    }
}

/// For every path the common ancestor had that `other_manifest` (the other
/// parent, as of its own edge) no longer has, but that the merge's final
/// manifest still does, record an explicit delete-then-add in `own_changes`
/// so the merge visibly re-asserts the path instead of silently carrying it
/// through.
fn splice_resurrection_pairs(
    common_manifest: &Manifest,
    other_manifest: &Manifest,
    own_changes: &mut ChangeSet,
    final_manifest: &Manifest,
) {
    for (path, _common_id) in common_manifest.entries() {
        if other_manifest.get(path).is_some() {
            continue; // the other parent did not kill this path
        }
        let Some(final_id) = final_manifest.get(path) else {
            continue; // also gone in the merge result, nothing to preserve
        };
        if own_changes.rearrangement.deleted_files.contains(path) {
            continue; // this edge already has its own explicit event here
        }
        own_changes.rearrangement.deleted_files.insert(path.clone());
        own_changes.rearrangement.added_files.insert(path.clone());
        own_changes.deltas.insert(
            path.clone(),
            crate::changeset::Delta {
                src: FileId::NULL,
                dst: *final_id,
            },
        );
    }
}

/// Check a revision's internal consistency against the store: every edge's
/// change-set must apply to its stated parent manifest and produce the
/// stated new manifest (spec §4.8).
///
/// A merge additionally requires each edge's change-set to pass its own
/// `check_sanity` — a reduced proxy for recomputing both edges from their
/// common ancestor and comparing, since that recomputation needs the full
/// chain of intervening revisions rather than the two direct edges this
/// record carries.
///
/// # Errors
/// Propagates [`RevisionStore`]/[`AncestryLookup`] errors, or
/// [`PcdvError::InvariantViolation`] if an edge does not apply cleanly.
pub fn verify_sanity(
    store: &dyn RevisionStore,
    _ancestry: &dyn AncestryLookup,
    revision: &Revision,
) -> Result<(), PcdvError> {
    let new_manifest = store.get_manifest(revision.new_manifest)?;
    for (parent, edge) in &revision.edges {
        let old_manifest = store.get_manifest(edge.old_manifest)?;
        let applied = manifest::apply_change_set(&old_manifest, &edge.changes)?;
        if applied != new_manifest {
            return Err(PcdvError::invariant(format!(
                "edge from {parent} does not apply to the stated new manifest"
            )));
        }
        if revision.edges.len() == 2 {
            edge.changes.check_sanity()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ancestry::RevHeight;
    use crate::ident::hash as ident_hash;
    use crate::path::split_path;
    use crate::store::tests::MemoryStore;
    use std::collections::BTreeSet;

    struct FixtureAncestry {
        parents: BTreeMap<RevisionId, BTreeSet<RevisionId>>,
        heights: BTreeMap<RevisionId, RevHeight>,
    }

    impl AncestryLookup for FixtureAncestry {
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

    #[test]
    fn root_revision_is_a_pure_addition() {
        let mut manifest = Manifest::empty();
        manifest.insert(split_path("a").unwrap(), ident_hash(b"content-a"));
        let store = MemoryStore::default();
        let ancestry = FixtureAncestry {
            parents: BTreeMap::new(),
            heights: BTreeMap::new(),
        };
        let revision = construct_revision_from_ancestry(
            &store,
            &ancestry,
            &AncestryNode::Root { manifest: manifest.clone() },
        )
        .unwrap();
        assert_eq!(revision.edges.len(), 1);
        assert!(revision.edges.contains_key(&RevisionId::NULL));
        assert_eq!(revision.new_manifest, manifest.manifest_id());
    }

    #[test]
    fn revision_ids_are_deterministic() {
        let mut manifest = Manifest::empty();
        manifest.insert(split_path("a").unwrap(), ident_hash(b"x"));
        let r1 = Revision {
            new_manifest: manifest.manifest_id(),
            edges: BTreeMap::new(),
        };
        let r2 = r1.clone();
        assert_eq!(r1.id(), r2.id());
    }

    #[test]
    fn child_revision_round_trips_through_verify_sanity() {
        let mut store = MemoryStore::default();
        let mut root_manifest = Manifest::empty();
        root_manifest.insert(split_path("a").unwrap(), ident_hash(b"v1"));
        store.put_manifest(root_manifest.clone());

        let ancestry = FixtureAncestry {
            parents: BTreeMap::new(),
            heights: BTreeMap::new(),
        };
        let root_revision = construct_revision_from_ancestry(
            &store,
            &ancestry,
            &AncestryNode::Root { manifest: root_manifest },
        )
        .unwrap();
        store.put_revision(&root_revision).unwrap();
        let root_id = root_revision.id();

        let mut child_manifest = Manifest::empty();
        child_manifest.insert(split_path("a").unwrap(), ident_hash(b"v2"));
        store.put_manifest(child_manifest.clone());
        let child_revision = construct_revision_from_ancestry(
            &store,
            &ancestry,
            &AncestryNode::Child {
                parent: root_id,
                manifest: child_manifest.clone(),
                rearrangement: Rearrangement::empty(),
            },
        )
        .unwrap();
        store.put_revision(&child_revision).unwrap();

        verify_sanity(&store, &ancestry, &child_revision).unwrap();
    }

    #[test]
    fn merge_resurrects_a_path_the_other_side_deleted() {
        crate::test_support::init_tracing();

        let mut store = MemoryStore::default();
        let id_a = ident_hash(b"a-content");
        let id_r = ident_hash(b"r-content");
        let a_path = split_path("a").unwrap();
        let r_path = split_path("r").unwrap();

        let mut root_manifest = Manifest::empty();
        root_manifest.insert(a_path.clone(), id_a);
        root_manifest.insert(r_path.clone(), id_r);
        store.put_manifest(root_manifest.clone());

        let root_height = RevHeight::root();
        let mut ancestry = FixtureAncestry {
            parents: BTreeMap::new(),
            heights: BTreeMap::new(),
        };
        let root_revision = construct_revision_from_ancestry(
            &store,
            &ancestry,
            &AncestryNode::Root { manifest: root_manifest },
        )
        .unwrap();
        store.put_revision(&root_revision).unwrap();
        let root_id = root_revision.id();
        ancestry.heights.insert(root_id, root_height.clone());

        // Left leaves both paths untouched.
        let mut left_manifest = Manifest::empty();
        left_manifest.insert(a_path.clone(), id_a);
        left_manifest.insert(r_path.clone(), id_r);
        store.put_manifest(left_manifest.clone());
        let left_revision = construct_revision_from_ancestry(
            &store,
            &ancestry,
            &AncestryNode::Child {
                parent: root_id,
                manifest: left_manifest.clone(),
                rearrangement: Rearrangement::empty(),
            },
        )
        .unwrap();
        store.put_revision(&left_revision).unwrap();
        let left_id = left_revision.id();
        ancestry.parents.insert(left_id, BTreeSet::from([root_id]));
        ancestry.heights.insert(left_id, root_height.child(0));

        // Right deletes "r", keeping only "a".
        let mut right_manifest = Manifest::empty();
        right_manifest.insert(a_path.clone(), id_a);
        store.put_manifest(right_manifest.clone());
        let mut right_rearrangement = Rearrangement::empty();
        right_rearrangement.deleted_files.insert(r_path.clone());
        let right_revision = construct_revision_from_ancestry(
            &store,
            &ancestry,
            &AncestryNode::Child {
                parent: root_id,
                manifest: right_manifest.clone(),
                rearrangement: right_rearrangement,
            },
        )
        .unwrap();
        store.put_revision(&right_revision).unwrap();
        let right_id = right_revision.id();
        ancestry.parents.insert(right_id, BTreeSet::from([root_id]));
        ancestry.heights.insert(right_id, root_height.child(1));

        // The merge's final manifest resurrects "r": present again, with the
        // same content it had at the common ancestor since left never
        // touched it.
        let mut merge_manifest = Manifest::empty();
        merge_manifest.insert(a_path.clone(), id_a);
        merge_manifest.insert(r_path.clone(), id_r);
        store.put_manifest(merge_manifest.clone());

        // From the merge's own change to each parent: left's manifest
        // already had "r" and keeps it unchanged, so no operation is needed
        // on that side; right's manifest lacked "r", so from right's own
        // edge it is a plain add.
        let mut merge_right_rearrangement = Rearrangement::empty();
        merge_right_rearrangement.added_files.insert(r_path.clone());
        let merge_revision = construct_revision_from_ancestry(
            &store,
            &ancestry,
            &AncestryNode::Merge {
                left: left_id,
                right: right_id,
                manifest: merge_manifest.clone(),
                left_rearrangement: Rearrangement::empty(),
                right_rearrangement: merge_right_rearrangement,
            },
        )
        .unwrap();

        assert_eq!(merge_revision.edges.len(), 2);
        let left_edge = &merge_revision.edges[&left_id];
        let right_edge = &merge_revision.edges[&right_id];

        // Left never killed "r", so the resurrection splice fires on its
        // edge: an explicit delete-then-add pair re-asserts the path rather
        // than letting it carry through silently.
        assert!(left_edge.changes.rearrangement.deleted_files.contains(&r_path));
        assert!(left_edge.changes.rearrangement.added_files.contains(&r_path));
        assert_eq!(left_edge.changes.deltas[&r_path].dst, id_r);

        // Right's own edge sees "r" appear for the first time; this is a
        // plain add from its own manifest's perspective, not a resurrection
        // splice (right never had a live copy to preserve identity with).
        assert!(right_edge.changes.rearrangement.added_files.contains(&r_path));
        assert!(!right_edge.changes.rearrangement.deleted_files.contains(&r_path));
        assert_eq!(right_edge.changes.deltas[&r_path].dst, id_r);

        store.put_revision(&merge_revision).unwrap();
        ancestry
            .parents
            .insert(merge_revision.id(), BTreeSet::from([left_id, right_id]));
        verify_sanity(&store, &ancestry, &merge_revision).unwrap();

        let common = common_merge_ancestor(&ancestry, left_id, right_id).unwrap();
        assert_eq!(common, Some(root_id));
    }
}
