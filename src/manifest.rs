//! The manifest layer (spec §4.4).
//!
//! A [`Manifest`] maps file-paths to file-identifiers. This module builds
//! pure-addition change-sets from a manifest, completes a bare rearrangement
//! into a full change-set by reconstructing deltas, applies a change-set to
//! a manifest, and applies a rearrangement to a real filesystem via the
//! two-phase bottom-up/top-down algorithm.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis::{analyze, reconstruct_path, Direction};
use crate::changeset::{algebra, ChangeSet, Delta};
use crate::error::PcdvError;
use crate::ident::{hash, FileId, ManifestId};
use crate::path::RepoPath;

/// A mapping from file-path to file-identifier, with all entries unique by
/// path (spec §3's "Manifest").
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest(BTreeMap<RepoPath, FileId>);

impl Manifest {
    /// The empty manifest.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `path`.
    pub fn insert(&mut self, path: RepoPath, id: FileId) {
        self.0.insert(path, id);
    }

    /// Remove the entry for `path`, if any.
    pub fn remove(&mut self, path: &RepoPath) -> Option<FileId> {
        self.0.remove(path)
    }

    /// Look up the file identifier at `path`.
    #[must_use]
    pub fn get(&self, path: &RepoPath) -> Option<&FileId> {
        self.0.get(path)
    }

    /// Iterate all (path, id) entries in path order.
    pub fn entries(&self) -> impl Iterator<Item = (&RepoPath, &FileId)> {
        self.0.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True iff the manifest has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The canonical digest of this manifest's serialization.
    #[must_use]
    pub fn manifest_id(&self) -> ManifestId {
        hash(self.canonical_bytes().as_bytes())
    }

    /// Canonical textual form: one line per entry, sorted by path, of the
    /// form `<40-hex-id>  <path>`.
    #[must_use]
    pub fn canonical_bytes(&self) -> String {
        let mut out = String::new();
        for (path, id) in &self.0 {
            out.push_str(&id.to_hex());
            out.push_str("  ");
            out.push_str(&path.to_string());
            out.push('\n');
        }
        out
    }
}

/// Build the pure-addition change-set that, applied to the empty manifest,
/// produces `m`.
#[must_use]
pub fn build_pure_addition_change_set(m: &Manifest) -> ChangeSet {
    let mut cs = ChangeSet::empty();
    for (path, id) in m.entries() {
        cs.rearrangement.added_files.insert(path.clone());
        cs.deltas.insert(
            path.clone(),
            Delta {
                src: FileId::NULL,
                dst: *id,
            },
        );
    }
    cs
}

/// Given only a rearrangement plus the manifests it connects, fill in the
/// deltas by reconstructing each `m_new` path's pre-image through the
/// rearrangement and comparing content identifiers.
///
/// # Errors
/// [`PcdvError::InvariantViolation`] if a post-state path cannot be traced
/// back to a pre-state entry for a non-added file.
pub fn complete_change_set(
    m_old: &Manifest,
    m_new: &Manifest,
    rearrangement: &crate::changeset::Rearrangement,
) -> Result<ChangeSet, PcdvError> {
    let analysis = analyze(rearrangement)?;
    let mut deltas = BTreeMap::new();
    for (path, new_id) in m_new.entries() {
        let is_add = rearrangement.added_files.contains(path);
        if is_add {
            deltas.insert(
                path.clone(),
                Delta {
                    src: FileId::NULL,
                    dst: *new_id,
                },
            );
            continue;
        }
        let pre_path = reconstruct_path(&analysis, path, Direction::PostToPre).ok_or_else(|| {
            PcdvError::invariant(format!("'{path}' has no pre-image under the rearrangement"))
        })?;
        let old_id = m_old.get(&pre_path).ok_or_else(|| {
            PcdvError::invariant(format!("old manifest has no entry for '{pre_path}'"))
        })?;
        if old_id != new_id {
            deltas.insert(
                path.clone(),
                Delta {
                    src: *old_id,
                    dst: *new_id,
                },
            );
        }
    }
    Ok(ChangeSet {
        rearrangement: rearrangement.clone(),
        deltas,
    })
}

/// Apply `cs` to `m_old`, producing `m_new`.
///
/// Expressed as the concatenation `pure_addition_of(m_old) . cs`, which by
/// invariant contains only adds and delta-to-adds, read out as the new
/// manifest. When `cs` has no renames and no directory deletions, a fast
/// path mutates a clone of `m_old` in place instead.
///
/// # Errors
/// [`PcdvError::IncompatibleConcatenation`] if `cs` cannot be concatenated
/// after `m_old`'s pure-addition change-set; [`PcdvError::InvariantViolation`]
/// if the result is inconsistent.
pub fn apply_change_set(m_old: &Manifest, cs: &ChangeSet) -> Result<Manifest, PcdvError> {
    if cs.rearrangement.renamed_files.is_empty()
        && cs.rearrangement.renamed_dirs.is_empty()
        && cs.rearrangement.deleted_dirs.is_empty()
    {
        let mut out = m_old.clone();
        for path in &cs.rearrangement.deleted_files {
            out.remove(path);
        }
        for (path, delta) in &cs.deltas {
            out.insert(path.clone(), delta.dst);
        }
        return Ok(out);
    }

    let base = build_pure_addition_change_set(m_old);
    let combined = algebra::concat(&base, cs)?;
    let mut out = Manifest::empty();
    for (path, delta) in &combined.deltas {
        out.insert(path.clone(), delta.dst);
    }
    Ok(out)
}

/// Abstraction over filesystem mutation, so [`apply_rearrangement_to_filesystem`]
/// can be exercised against an in-memory fake in tests.
pub trait FilesystemOps {
    /// Rename/move `from` to `to`, creating `to`'s parent directories if
    /// `create_parents` is set.
    ///
    /// # Errors
    /// Implementations return [`PcdvError::Io`] on failure.
    fn rename(&mut self, from: &str, to: &str, create_parents: bool) -> Result<(), PcdvError>;

    /// Ensure `path` exists as a directory, creating parents as needed.
    ///
    /// # Errors
    /// Implementations return [`PcdvError::Io`] on failure.
    fn create_dir_all(&mut self, path: &str) -> Result<(), PcdvError>;
}

/// Apply `rearr` to the real filesystem rooted at the caller's working
/// copy, via `ops`, using a temporary staging root named by tid.
///
/// Two-phase: phase 1 (bottom-up) moves every entity that has a pre-state
/// name to `tmp_root/<tid>`; phase 2 (top-down) walks the post-state and
/// moves each tid from `tmp_root/<tid>` to its final path. Entities with a
/// null pre- or post-name (pure deletes or adds) are skipped; entities that
/// never move are left alone.
///
/// # Errors
/// Propagates any [`PcdvError`] from `ops`, or [`PcdvError::InvariantViolation`]
/// if `rearr` is not realizable.
pub fn apply_rearrangement_to_filesystem(
    rearr: &crate::changeset::Rearrangement,
    tmp_root: &str,
    ops: &mut dyn FilesystemOps,
) -> Result<(), PcdvError> {
    let analysis = analyze(rearr)?;
    ops.create_dir_all(tmp_root)?;

    let mut moving: Vec<(crate::analysis::Tid, RepoPath, RepoPath)> = Vec::new();
    for (tid, pre_entry) in analysis.pre.entries() {
        let post_entry = analysis
            .post
            .get(tid)
            .expect("analyze() guarantees symmetric totality");
        if pre_entry.name.is_none() || post_entry.name.is_none() {
            continue;
        }
        let pre_path = analysis.pre.full_path(tid).expect("named entry has a path");
        let post_path = analysis
            .post
            .full_path(tid)
            .expect("named entry has a path");
        if pre_path == post_path {
            continue;
        }
        moving.push((tid, pre_path, post_path));
    }

    // Phase 1: bottom-up, deepest entities first, so a parent directory is
    // not moved out from under a child still pending its own move.
    let mut by_depth_desc = moving.clone();
    by_depth_desc.sort_by_key(|(_, pre, _)| std::cmp::Reverse(pre.components().len()));
    for (tid, pre_path, _) in &by_depth_desc {
        let staged = format!("{tmp_root}/{}", tid.value());
        ops.rename(&pre_path.to_string(), &staged, false)?;
    }

    // Phase 2: top-down, shallowest destinations first, so parent
    // directories exist before their children land.
    let mut by_depth_asc = moving;
    by_depth_asc.sort_by_key(|(_, _, post)| post.components().len());
    for (tid, _, post_path) in &by_depth_asc {
        let staged = format!("{tmp_root}/{}", tid.value());
        ops.rename(&staged, &post_path.to_string(), true)?;
    }

    Ok(())
}
