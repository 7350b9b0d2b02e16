//! Concatenation and inversion (spec §4.2).
//!
//! Both operations are expressed in terms of the path-analysis engine:
//! concatenation tracks each entity's identity across the `R0 -> R1 -> R2`
//! boundary by following its path through both analyses; inversion swaps an
//! analysis's two halves and recomposes.

use std::collections::BTreeMap;

use super::{ChangeSet, Delta, Rearrangement};
use crate::analysis::{analyze, reconstruct_path, Direction, EntryKind, PathAnalysis, Tid};
use crate::error::PcdvError;
use crate::ident::FileId;
use crate::path::RepoPath;
use crate::manifest::Manifest;

struct ConcatBuilder {
    rearr: Rearrangement,
    claimed_src: std::collections::BTreeSet<RepoPath>,
    claimed_dst: std::collections::BTreeSet<RepoPath>,
}

impl ConcatBuilder {
    fn new() -> Self {
        Self {
            rearr: Rearrangement::empty(),
            claimed_src: std::collections::BTreeSet::new(),
            claimed_dst: std::collections::BTreeSet::new(),
        }
    }

    fn emit_add(&mut self, path: RepoPath) -> Result<(), PcdvError> {
        if !self.claimed_dst.insert(path.clone()) {
            return Err(PcdvError::incompatible(format!(
                "two different entities both resolve to destination '{path}'"
            )));
        }
        self.rearr.added_files.insert(path);
        Ok(())
    }

    fn emit_delete(&mut self, path: RepoPath, kind: EntryKind) {
        match kind {
            EntryKind::File => {
                self.rearr.deleted_files.insert(path);
            }
            EntryKind::Directory => {
                self.rearr.deleted_dirs.insert(path);
            }
        }
    }

    fn emit_rename(&mut self, src: RepoPath, dst: RepoPath, kind: EntryKind) -> Result<(), PcdvError> {
        if !self.claimed_src.insert(src.clone()) {
            return Err(PcdvError::incompatible(format!(
                "two different entities both claim source '{src}'"
            )));
        }
        if !self.claimed_dst.insert(dst.clone()) {
            return Err(PcdvError::incompatible(format!(
                "two different entities both resolve to destination '{dst}'"
            )));
        }
        match kind {
            EntryKind::File => {
                self.rearr.renamed_files.insert(src, dst);
            }
            EntryKind::Directory => {
                self.rearr.renamed_dirs.insert(src, dst);
            }
        }
        Ok(())
    }
}

/// Index of one side of a [`PathAnalysis`] by the literal path it occupies
/// on that side, used to look up "does this path correspond to a tracked
/// entity" in O(log n).
struct PathIndex {
    by_path: BTreeMap<RepoPath, (Tid, EntryKind)>,
}

impl PathIndex {
    fn build_pre(analysis: &PathAnalysis) -> Self {
        let mut by_path = BTreeMap::new();
        for (tid, entry) in analysis.pre.entries() {
            if entry.name.is_some() {
                let path = analysis.pre.full_path(tid).expect("named entry has a path");
                by_path.insert(path, (tid, entry.kind));
            }
        }
        Self { by_path }
    }

    fn build_post(analysis: &PathAnalysis) -> Self {
        let mut by_path = BTreeMap::new();
        for (tid, entry) in analysis.post.entries() {
            if entry.name.is_some() {
                let path = analysis.post.full_path(tid).expect("named entry has a path");
                by_path.insert(path, (tid, entry.kind));
            }
        }
        Self { by_path }
    }
}

/// Concatenate `a: R0 -> R1` with `b: R1 -> R2`, producing `a . b: R0 -> R2`.
///
/// # Errors
/// [`PcdvError::IncompatibleConcatenation`] on a type mismatch across the
/// `a.post = b.pre` boundary, a reference by `b` to a path `a` has killed,
/// or a delta chain break.
#[tracing::instrument(level = "debug", skip_all)]
pub fn concat(a: &ChangeSet, b: &ChangeSet) -> Result<ChangeSet, PcdvError> {
    let analysis_a = analyze(&a.rearrangement)?;
    let analysis_b = analyze(&b.rearrangement)?;

    let b_pre_index = PathIndex::build_pre(&analysis_b);
    let mut consumed_b: std::collections::BTreeSet<RepoPath> = std::collections::BTreeSet::new();

    let killed_by_a: std::collections::BTreeSet<RepoPath> = a
        .rearrangement
        .deleted_files
        .iter()
        .chain(a.rearrangement.deleted_dirs.iter())
        .cloned()
        .collect();

    let mut builder = ConcatBuilder::new();

    // Walk every entity A knows about.
    for (tid, pre_entry) in analysis_a.pre.entries() {
        let post_entry = analysis_a
            .post
            .get(tid)
            .expect("analyze() guarantees symmetric totality");
        let r0 = if pre_entry.name.is_some() {
            Some(
                analysis_a
                    .pre
                    .full_path(tid)
                    .expect("named entry has a path"),
            )
        } else {
            None
        };
        let kind = pre_entry.kind;

        let Some(r1) = (if post_entry.name.is_some() {
            Some(
                analysis_a
                    .post
                    .full_path(tid)
                    .expect("named entry has a path"),
            )
        } else {
            None
        }) else {
            // Deleted by A; done regardless of B.
            if let Some(p0) = r0 {
                builder.emit_delete(p0, kind);
            }
            continue;
        };

        if let Some(&(b_tid, b_kind)) = b_pre_index.by_path.get(&r1) {
            if b_kind != kind {
                return Err(PcdvError::incompatible(format!(
                    "'{r1}' is a file on one side of the concatenation boundary and a directory on the other"
                )));
            }
            consumed_b.insert(r1.clone());
            let b_post_entry = analysis_b.post.get(b_tid).expect("tid exists in post state");
            let r2 = if b_post_entry.name.is_some() {
                Some(
                    analysis_b
                        .post
                        .full_path(b_tid)
                        .expect("named entry has a path"),
                )
            } else {
                None
            };
            match (r0, r2) {
                (None, None) => {}
                (None, Some(p2)) => {
                    if matches!(kind, EntryKind::File) {
                        builder.emit_add(p2)?;
                    }
                }
                (Some(p0), None) => builder.emit_delete(p0, kind),
                (Some(p0), Some(p2)) => {
                    if p0 != p2 {
                        builder.emit_rename(p0, p2, kind)?;
                    }
                }
            }
        } else {
            // B does not touch this entity; it passes through unchanged.
            match r0 {
                None => {
                    if matches!(kind, EntryKind::File) {
                        builder.emit_add(r1)?;
                    }
                }
                Some(p0) => {
                    if p0 != r1 {
                        builder.emit_rename(p0, r1, kind)?;
                    }
                }
            }
        }
    }

    // Entities B introduces that A never touched.
    for (tid, pre_entry) in analysis_b.pre.entries() {
        let r1 = if pre_entry.name.is_some() {
            Some(
                analysis_b
                    .pre
                    .full_path(tid)
                    .expect("named entry has a path"),
            )
        } else {
            None
        };
        if let Some(p1) = &r1 {
            if consumed_b.contains(p1) {
                continue;
            }
            if killed_by_a.contains(p1) {
                return Err(PcdvError::incompatible(format!(
                    "second change-set references '{p1}', which the first deletes"
                )));
            }
        }
        let post_entry = analysis_b.post.get(tid).expect("symmetric totality");
        let kind = pre_entry.kind;
        let r2 = if post_entry.name.is_some() {
            Some(
                analysis_b
                    .post
                    .full_path(tid)
                    .expect("named entry has a path"),
            )
        } else {
            None
        };
        match (r1, r2) {
            (None, None) => {}
            (None, Some(p2)) => {
                if matches!(kind, EntryKind::File) {
                    builder.emit_add(p2)?;
                }
            }
            (Some(p1), None) => builder.emit_delete(p1, kind),
            (Some(p1), Some(p2)) => {
                if p1 != p2 {
                    builder.emit_rename(p1, p2, kind)?;
                }
            }
        }
    }

    let deltas = concat_deltas(a, b, &analysis_a, &analysis_b)?;

    let result = ChangeSet {
        rearrangement: builder.rearr,
        deltas,
    };
    result.normalize()
}

fn concat_deltas(
    a: &ChangeSet,
    b: &ChangeSet,
    analysis_a: &PathAnalysis,
    analysis_b: &PathAnalysis,
) -> Result<BTreeMap<RepoPath, Delta>, PcdvError> {
    let b_post_paths: std::collections::BTreeSet<RepoPath> =
        PathIndex::build_post(analysis_b).by_path.into_keys().collect();

    let mut deltas: BTreeMap<RepoPath, Delta> = BTreeMap::new();

    for (p1, delta) in &a.deltas {
        let mapped = match reconstruct_path(analysis_b, p1, Direction::PreToPost) {
            Some(p2) => Some(p2),
            None => {
                // `b` kills this path outright; keep it only if something
                // else re-occupies the exact same literal path.
                if b_post_paths.contains(p1) {
                    Some(p1.clone())
                } else {
                    None
                }
            }
        };
        if let Some(p2) = mapped {
            deltas.insert(p2, *delta);
        }
    }

    for (p2, delta) in &b.deltas {
        match deltas.get(p2) {
            Some(prev) => {
                if prev.dst != delta.src {
                    return Err(PcdvError::incompatible(format!(
                        "delta chain broken at '{p2}': first change-set ends at {}, second starts at {}",
                        prev.dst, delta.src
                    )));
                }
                deltas.insert(
                    p2.clone(),
                    Delta {
                        src: prev.src,
                        dst: delta.dst,
                    },
                );
            }
            None => {
                deltas.insert(p2.clone(), *delta);
            }
        }
    }

    Ok(deltas)
}

/// Invert `cs: R0 -> R1`, given the manifest at `R0`, producing `R1 -> R0`.
///
/// # Errors
/// [`PcdvError::InvariantViolation`] if a deleted path has no entry in
/// `manifest_pre`, or a delta's path cannot be mapped back through the
/// rearrangement.
pub fn invert(cs: &ChangeSet, manifest_pre: &Manifest) -> Result<ChangeSet, PcdvError> {
    let analysis = analyze(&cs.rearrangement)?;
    let swapped = PathAnalysis {
        pre: analysis.post.clone(),
        post: analysis.pre.clone(),
    };
    let rearrangement = crate::analysis::compose(&swapped)?;

    let mut deltas = BTreeMap::new();
    for (path, delta) in &cs.deltas {
        if delta.src.is_null() {
            // Was an add; the inverse is a plain delete with no delta.
            continue;
        }
        let pre_path = reconstruct_path(&analysis, path, Direction::PostToPre).ok_or_else(|| {
            PcdvError::invariant(format!("delta path '{path}' has no pre-image for inversion"))
        })?;
        deltas.insert(
            pre_path,
            Delta {
                src: delta.dst,
                dst: delta.src,
            },
        );
    }

    for path in &cs.rearrangement.deleted_files {
        let dst_id: FileId = *manifest_pre
            .get(path)
            .ok_or_else(|| PcdvError::invariant(format!("manifest has no entry for deleted path '{path}'")))?;
        deltas.insert(
            path.clone(),
            Delta {
                src: FileId::NULL,
                dst: dst_id,
            },
        );
    }

    Ok(ChangeSet {
        rearrangement,
        deltas,
    })
}
