//! External storage interfaces (spec §6).
//!
//! Everything above this module — the algebra, the weave, the tree engine,
//! revision composition — is pure and takes its history as explicit
//! arguments or through the narrow [`crate::ancestry::AncestryLookup`] seam.
//! These traits are the only place persistence is assumed at all, and a
//! production binary is free to back them with whatever it likes (a
//! database, a content-addressed blob store, flat files); this crate ships
//! no implementation of its own.

use std::collections::BTreeSet;

use crate::changeset::ChangeSet;
use crate::ident::{FileId, ManifestId, RevisionId};
use crate::manifest::Manifest;
use crate::revision::Revision;
use crate::error::PcdvError;

/// Durable storage and lookup of revisions and the manifests they name.
pub trait RevisionStore {
    /// Fetch a revision's full record.
    ///
    /// # Errors
    /// [`PcdvError::StoreUnavailable`] if `id` is unknown or unreachable.
    fn get_revision(&self, id: RevisionId) -> Result<Revision, PcdvError>;

    /// The manifest identifier a revision names, without materializing the
    /// whole manifest.
    ///
    /// # Errors
    /// [`PcdvError::StoreUnavailable`] if `id` is unknown or unreachable.
    fn get_revision_manifest(&self, id: RevisionId) -> Result<ManifestId, PcdvError>;

    /// Fetch a manifest by identifier.
    ///
    /// # Errors
    /// [`PcdvError::StoreUnavailable`] if `id` is unknown or unreachable.
    fn get_manifest(&self, id: ManifestId) -> Result<Manifest, PcdvError>;

    /// A revision's immediate parents (spec §4.5's `AncestryLookup` source).
    ///
    /// # Errors
    /// [`PcdvError::StoreUnavailable`] if `id` is unknown or unreachable.
    fn get_revision_parents(&self, id: RevisionId) -> Result<BTreeSet<RevisionId>, PcdvError>;

    /// Every ancestor of `id`, inclusive, as a convenience over repeated
    /// [`Self::get_revision_parents`] calls. A store backed by a materialized
    /// closure table may answer this directly instead of walking edges.
    ///
    /// # Errors
    /// [`PcdvError::StoreUnavailable`] if `id` is unknown or unreachable.
    fn get_revision_ancestry(&self, id: RevisionId) -> Result<BTreeSet<RevisionId>, PcdvError>;

    /// Durably record a new revision, keyed by its own computed identifier.
    ///
    /// # Errors
    /// [`PcdvError::StoreUnavailable`] on a write failure.
    fn put_revision(&mut self, revision: &Revision) -> Result<(), PcdvError>;

    /// True iff `id` is already stored.
    ///
    /// # Errors
    /// [`PcdvError::StoreUnavailable`] if the check itself fails.
    fn revision_exists(&self, id: RevisionId) -> Result<bool, PcdvError>;
}

/// Durable, content-addressed storage of file contents, optionally delta-
/// compressed against a related version (spec §6).
pub trait ContentStore {
    /// Store `content` verbatim, returning its content-address.
    ///
    /// # Errors
    /// [`PcdvError::StoreUnavailable`] on a write failure.
    fn store(&mut self, content: &[u8]) -> Result<FileId, PcdvError>;

    /// Load previously stored content by its content-address.
    ///
    /// # Errors
    /// [`PcdvError::StoreUnavailable`] if `id` is unknown or unreachable.
    fn load(&self, id: FileId) -> Result<Vec<u8>, PcdvError>;

    /// Store `content`, instructing the backend to prefer encoding it as a
    /// delta against `base` if that is cheaper; the returned identifier is
    /// still `content`'s own content-address regardless of how it is
    /// physically encoded.
    ///
    /// # Errors
    /// [`PcdvError::StoreUnavailable`] on a write failure.
    fn store_delta(&mut self, base: FileId, content: &[u8]) -> Result<FileId, PcdvError>;
}

/// An external decision-maker for merges the automatic algebra cannot
/// resolve on its own — a three-way file merge tool, or a human prompted
/// interactively (spec §6).
pub trait MergeOracle {
    /// Attempt a three-way merge of a file's content, given its ancestor and
    /// the two divergent versions. Returns `None` if the oracle cannot
    /// produce a result (e.g. a human operator declined), leaving the
    /// conflict for the caller to surface some other way.
    ///
    /// # Errors
    /// [`PcdvError::StoreUnavailable`] if invoking the oracle itself fails
    /// (e.g. a subprocess could not be spawned).
    fn try_three_way(
        &self,
        ancestor: &[u8],
        left: &[u8],
        right: &[u8],
    ) -> Result<Option<ChangeSet>, PcdvError>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// A minimal in-memory store, used only to exercise the trait object
    /// boundary in tests elsewhere in this crate.
    #[derive(Default)]
    pub struct MemoryStore {
        revisions: BTreeMap<RevisionId, Revision>,
        manifests: BTreeMap<ManifestId, Manifest>,
    }

    impl MemoryStore {
        pub fn put_manifest(&mut self, m: Manifest) -> ManifestId {
            let id = m.manifest_id();
            self.manifests.insert(id, m);
            id
        }
    }

    impl RevisionStore for MemoryStore {
        fn get_revision(&self, id: RevisionId) -> Result<Revision, PcdvError> {
            self.revisions
                .get(&id)
                .cloned()
                .ok_or_else(|| PcdvError::store("get_revision", id.to_string()))
        }

        fn get_revision_manifest(&self, id: RevisionId) -> Result<ManifestId, PcdvError> {
            Ok(self.get_revision(id)?.new_manifest)
        }

        fn get_manifest(&self, id: ManifestId) -> Result<Manifest, PcdvError> {
            self.manifests
                .get(&id)
                .cloned()
                .ok_or_else(|| PcdvError::store("get_manifest", id.to_string()))
        }

        fn get_revision_parents(&self, id: RevisionId) -> Result<BTreeSet<RevisionId>, PcdvError> {
            Ok(self.get_revision(id)?.edges.keys().copied().collect())
        }

        fn get_revision_ancestry(&self, id: RevisionId) -> Result<BTreeSet<RevisionId>, PcdvError> {
            let mut seen = BTreeSet::new();
            let mut frontier = vec![id];
            while let Some(rev) = frontier.pop() {
                for parent in self.get_revision_parents(rev)? {
                    if seen.insert(parent) {
                        frontier.push(parent);
                    }
                }
            }
            Ok(seen)
        }

        fn put_revision(&mut self, revision: &Revision) -> Result<(), PcdvError> {
            self.revisions.insert(revision.id(), revision.clone());
            Ok(())
        }

        fn revision_exists(&self, id: RevisionId) -> Result<bool, PcdvError> {
            Ok(self.revisions.contains_key(&id))
        }
    }

    #[test]
    fn memory_store_round_trips_a_revision() {
        let mut store = MemoryStore::default();
        let manifest = Manifest::empty();
        let manifest_id = store.put_manifest(manifest);
        let revision = Revision {
            new_manifest: manifest_id,
            edges: BTreeMap::new(),
        };
        store.put_revision(&revision).unwrap();
        assert!(store.revision_exists(revision.id()).unwrap());
        let fetched = store.get_revision(revision.id()).unwrap();
        assert_eq!(fetched.new_manifest, manifest_id);
    }
}
