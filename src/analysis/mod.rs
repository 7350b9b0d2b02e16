//! The path-analysis engine (spec §4.3).
//!
//! A [`PathAnalysis`] mirrors a [`crate::changeset::Rearrangement`] as a pair
//! of *path-states*: a tree of transient identifiers (`tid`s) before and
//! after the rearrangement. Every tid is present in both halves —
//! "symmetric totality" — with a null name on whichever side the entity is
//! not actually present, which is how adds and deletes are represented
//! uniformly alongside renames.
//!
//! This representation exists to let the algebra (concatenation, inversion,
//! normalization) and the manifest/filesystem appliers reason about a
//! rearrangement as a renumbering of stable entities rather than as a bag of
//! string-keyed operations.

mod tid;

pub use tid::TidAllocator;

use std::collections::{BTreeMap, BTreeSet};

use crate::changeset::Rearrangement;
use crate::error::PcdvError;
use crate::path::{PathComponent, RepoPath};

/// A transient identifier, unique within one [`PathAnalysis`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(u64);

impl Tid {
    /// The reserved root tid. Never stored explicitly in a [`PathState`];
    /// every top-level entry's parent is `Tid::ROOT`.
    pub const ROOT: Self = Self(0);

    #[must_use]
    pub(crate) const fn new(n: u64) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Whether a path-analysis entry denotes a file or a directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// One entity's record on one side (pre or post) of a path-analysis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub parent: Tid,
    pub kind: EntryKind,
    /// `None` means the entity is not present on this side (the null path
    /// component of §3).
    pub name: Option<PathComponent>,
}

/// One half (pre or post) of a path-analysis: a tree of tids.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathState(BTreeMap<Tid, Entry>);

impl PathState {
    #[must_use]
    pub fn get(&self, tid: Tid) -> Option<&Entry> {
        self.0.get(&tid)
    }

    pub(crate) fn insert(&mut self, tid: Tid, entry: Entry) {
        self.0.insert(tid, entry);
    }

    /// Iterate all (tid, entry) pairs. Does not include the implicit root.
    pub fn entries(&self) -> impl Iterator<Item = (Tid, &Entry)> {
        self.0.iter().map(|(&t, e)| (t, e))
    }

    /// Reconstruct the full path of `tid` on this side by walking parents up
    /// to the root. Returns `None` if any ancestor (or `tid` itself) has a
    /// null name on this side.
    #[must_use]
    pub fn full_path(&self, tid: Tid) -> Option<RepoPath> {
        if tid == Tid::ROOT {
            return Some(RepoPath::root());
        }
        let entry = self.0.get(&tid)?;
        let name = entry.name.clone()?;
        let parent_path = self.full_path(entry.parent)?;
        Some(parent_path.join(name))
    }

    /// Find the child of `parent` named `name`, if any.
    #[must_use]
    pub fn find_child(&self, parent: Tid, name: &PathComponent) -> Option<Tid> {
        self.0
            .iter()
            .find(|(_, e)| e.parent == parent && e.name.as_ref() == Some(name))
            .map(|(&t, _)| t)
    }

    fn check_sibling_uniqueness(&self) -> Result<(), PcdvError> {
        let mut seen: BTreeSet<(Tid, PathComponent)> = BTreeSet::new();
        for entry in self.0.values() {
            if let Some(name) = &entry.name {
                if !seen.insert((entry.parent, name.clone())) {
                    return Err(PcdvError::invariant(format!(
                        "name collision: two entries named '{name}' under the same parent"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A pair of path-states representing a rearrangement as a renumbering of
/// entities (spec §3, §4.3).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathAnalysis {
    pub pre: PathState,
    pub post: PathState,
}

impl PathAnalysis {
    fn sanity_check(&self) -> Result<(), PcdvError> {
        self.pre.check_sibling_uniqueness()?;
        self.post.check_sibling_uniqueness()?;
        for (tid, pre_entry) in self.pre.entries() {
            let Some(post_entry) = self.post.get(tid) else {
                return Err(PcdvError::invariant(format!(
                    "tid {} missing from post state (broken symmetric totality)",
                    tid.value()
                )));
            };
            if std::mem::discriminant(&pre_entry.kind) != std::mem::discriminant(&post_entry.kind) {
                return Err(PcdvError::invariant(format!(
                    "tid {} is a file on one side and a directory on the other",
                    tid.value()
                )));
            }
        }
        Ok(())
    }
}

struct Builder {
    pre: PathState,
    post: PathState,
    pre_touched: BTreeMap<RepoPath, Tid>,
    post_touched: BTreeMap<RepoPath, Tid>,
    context: BTreeMap<RepoPath, Tid>,
    alloc: TidAllocator,
}

impl Builder {
    fn new() -> Self {
        Self {
            pre: PathState::default(),
            post: PathState::default(),
            pre_touched: BTreeMap::new(),
            post_touched: BTreeMap::new(),
            context: BTreeMap::new(),
            alloc: TidAllocator::new(),
        }
    }

    /// Resolve the tid that represents the directory at `path`, allocating
    /// an identity/context node for untouched ancestor directories as
    /// needed.
    fn resolve_dir(&mut self, path: &RepoPath) -> Result<Tid, PcdvError> {
        if path.is_root() {
            return Ok(Tid::ROOT);
        }
        if let Some(&t) = self.pre_touched.get(path) {
            return Ok(t);
        }
        if let Some(&t) = self.post_touched.get(path) {
            return Ok(t);
        }
        if let Some(&t) = self.context.get(path) {
            return Ok(t);
        }
        let (parent_path, leaf) = path
            .split_leaf()
            .expect("non-root path has at least one component");
        let parent_tid = self.resolve_dir(&parent_path)?;
        let tid = self.alloc.next();
        self.context.insert(path.clone(), tid);
        let entry = Entry {
            parent: parent_tid,
            kind: EntryKind::Directory,
            name: Some(leaf.clone()),
        };
        self.pre.insert(tid, entry.clone());
        self.post.insert(tid, entry);
        Ok(tid)
    }
}

/// Convert a rearrangement to a path-analysis.
///
/// # Errors
/// Returns [`PcdvError::InvariantViolation`] on a name collision among
/// siblings, or if the resulting analysis is not symmetrically total.
pub fn analyze(rearr: &Rearrangement) -> Result<PathAnalysis, PcdvError> {
    let mut b = Builder::new();

    for path in &rearr.deleted_files {
        let tid = b.alloc.next();
        b.pre_touched.insert(path.clone(), tid);
    }
    for path in &rearr.deleted_dirs {
        let tid = b.alloc.next();
        b.pre_touched.insert(path.clone(), tid);
    }
    for path in rearr.added_files.iter() {
        let tid = b.alloc.next();
        b.post_touched.insert(path.clone(), tid);
    }
    let mut rename_tids: Vec<(RepoPath, RepoPath, EntryKind, Tid)> = Vec::new();
    for (src, dst) in &rearr.renamed_files {
        let tid = b.alloc.next();
        b.pre_touched.insert(src.clone(), tid);
        b.post_touched.insert(dst.clone(), tid);
        rename_tids.push((src.clone(), dst.clone(), EntryKind::File, tid));
    }
    for (src, dst) in &rearr.renamed_dirs {
        let tid = b.alloc.next();
        b.pre_touched.insert(src.clone(), tid);
        b.post_touched.insert(dst.clone(), tid);
        rename_tids.push((src.clone(), dst.clone(), EntryKind::Directory, tid));
    }

    for path in &rearr.deleted_files {
        insert_delete(&mut b, path, EntryKind::File)?;
    }
    for path in &rearr.deleted_dirs {
        insert_delete(&mut b, path, EntryKind::Directory)?;
    }
    for path in rearr.added_files.iter() {
        insert_add(&mut b, path, EntryKind::File)?;
    }
    for (src, dst, kind, tid) in rename_tids {
        let pre_parent = b.resolve_dir(&parent_of(&src))?;
        let post_parent = b.resolve_dir(&parent_of(&dst))?;
        let src_leaf = src
            .leaf()
            .cloned()
            .ok_or_else(|| PcdvError::invariant("rename source must not be the root"))?;
        let dst_leaf = dst
            .leaf()
            .cloned()
            .ok_or_else(|| PcdvError::invariant("rename destination must not be the root"))?;
        b.pre.insert(
            tid,
            Entry {
                parent: pre_parent,
                kind,
                name: Some(src_leaf),
            },
        );
        b.post.insert(
            tid,
            Entry {
                parent: post_parent,
                kind,
                name: Some(dst_leaf),
            },
        );
    }

    let analysis = PathAnalysis {
        pre: b.pre,
        post: b.post,
    };
    analysis.sanity_check()?;
    Ok(analysis)
}

fn parent_of(path: &RepoPath) -> RepoPath {
    path.split_leaf().map_or_else(RepoPath::root, |(p, _)| p)
}

fn insert_delete(b: &mut Builder, path: &RepoPath, kind: EntryKind) -> Result<(), PcdvError> {
    let tid = *b
        .pre_touched
        .get(path)
        .expect("delete path registered in pre_touched");
    let parent = b.resolve_dir(&parent_of(path))?;
    let leaf = path
        .leaf()
        .cloned()
        .ok_or_else(|| PcdvError::invariant("cannot delete the root"))?;
    b.pre.insert(
        tid,
        Entry {
            parent,
            kind,
            name: Some(leaf),
        },
    );
    b.post.insert(
        tid,
        Entry {
            parent,
            kind,
            name: None,
        },
    );
    Ok(())
}

fn insert_add(b: &mut Builder, path: &RepoPath, kind: EntryKind) -> Result<(), PcdvError> {
    let tid = *b
        .post_touched
        .get(path)
        .expect("add path registered in post_touched");
    let parent = b.resolve_dir(&parent_of(path))?;
    let leaf = path
        .leaf()
        .cloned()
        .ok_or_else(|| PcdvError::invariant("cannot add the root"))?;
    b.post.insert(
        tid,
        Entry {
            parent,
            kind,
            name: Some(leaf),
        },
    );
    b.pre.insert(
        tid,
        Entry {
            parent,
            kind,
            name: None,
        },
    );
    Ok(())
}

/// Reverse of [`analyze`]: walk a path-analysis and emit the minimal
/// rearrangement it represents. Tids whose pre-path equals their post-path
/// are unchanged and are skipped.
///
/// # Errors
/// Returns [`PcdvError::InvariantViolation`] if the analysis is not
/// symmetrically total.
pub fn compose(analysis: &PathAnalysis) -> Result<Rearrangement, PcdvError> {
    let mut out = Rearrangement::empty();
    for (tid, pre_entry) in analysis.pre.entries() {
        let post_entry = analysis.post.get(tid).ok_or_else(|| {
            PcdvError::invariant(format!(
                "tid {} missing from post state (broken symmetric totality)",
                tid.value()
            ))
        })?;
        match (&pre_entry.name, &post_entry.name) {
            (Some(_), Some(_)) => {
                let pre_path = analysis
                    .pre
                    .full_path(tid)
                    .expect("named entry has a full path");
                let post_path = analysis
                    .post
                    .full_path(tid)
                    .expect("named entry has a full path");
                if pre_path == post_path {
                    continue;
                }
                match pre_entry.kind {
                    EntryKind::File => {
                        out.renamed_files.insert(pre_path, post_path);
                    }
                    EntryKind::Directory => {
                        out.renamed_dirs.insert(pre_path, post_path);
                    }
                }
            }
            (Some(_), None) => {
                let pre_path = analysis
                    .pre
                    .full_path(tid)
                    .expect("named entry has a full path");
                match pre_entry.kind {
                    EntryKind::File => {
                        out.deleted_files.insert(pre_path);
                    }
                    EntryKind::Directory => {
                        out.deleted_dirs.insert(pre_path);
                    }
                }
            }
            (None, Some(_)) => {
                if matches!(post_entry.kind, EntryKind::File) {
                    let post_path = analysis
                        .post
                        .full_path(tid)
                        .expect("named entry has a full path");
                    out.added_files.insert(post_path);
                }
            }
            (None, None) => {}
        }
    }
    Ok(out)
}

/// Direction of a [`reconstruct_path`] query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    PreToPost,
    PostToPre,
}

/// Map `path` in one state to its image in the other, by walking components
/// through the tids the analysis tracks and copying any residual
/// components verbatim once the tracked prefix is exhausted.
///
/// Returns `None` if `path` names an entity that does not exist on the
/// target side (it lies inside, or is, a deleted/not-yet-added entity).
#[must_use]
pub fn reconstruct_path(
    analysis: &PathAnalysis,
    path: &RepoPath,
    direction: Direction,
) -> Option<RepoPath> {
    let (from, to) = match direction {
        Direction::PreToPost => (&analysis.pre, &analysis.post),
        Direction::PostToPre => (&analysis.post, &analysis.pre),
    };

    let mut current = Tid::ROOT;
    let mut matched_depth = 0usize;
    for component in path.components() {
        match from.find_child(current, component) {
            Some(child) => {
                current = child;
                matched_depth += 1;
            }
            None => break,
        }
    }

    if current == Tid::ROOT {
        return Some(path.clone());
    }

    let to_entry = to.get(current)?;
    let residual = &path.components()[matched_depth..];
    if to_entry.name.is_none() {
        return None;
    }
    let base = to.full_path(current)?;
    let mut result = base;
    for c in residual {
        result = result.join(c.clone());
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::split_path;

    fn rearr_with_delete(path: &str) -> Rearrangement {
        let mut r = Rearrangement::empty();
        r.deleted_files.insert(split_path(path).unwrap());
        r
    }

    #[test]
    fn analyze_delete_is_symmetric() {
        let r = rearr_with_delete("usr/bin/cat");
        let a = analyze(&r).unwrap();
        assert_eq!(a.pre.entries().count(), a.post.entries().count());
    }

    #[test]
    fn compose_analyze_round_trips_delete() {
        let r = rearr_with_delete("usr/bin/cat");
        let a = analyze(&r).unwrap();
        let back = compose(&a).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn analyze_rename_links_src_and_dst() {
        let mut r = Rearrangement::empty();
        r.renamed_files
            .insert(split_path("usr/foo").unwrap(), split_path("usr/bar").unwrap());
        let a = analyze(&r).unwrap();
        let back = compose(&a).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn analyze_add_and_delete_together() {
        let mut r = Rearrangement::empty();
        r.added_files.insert(split_path("usr/lib/zombie").unwrap());
        r.deleted_files.insert(split_path("usr/bin/cat").unwrap());
        let a = analyze(&r).unwrap();
        let back = compose(&a).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn neutralizing_rearrangement_has_no_real_changes() {
        let mut r = Rearrangement::empty();
        r.added_files.insert(split_path("usr/lib/zombie").unwrap());
        let a = analyze(&r).unwrap();
        // Every non-root tid must differ pre vs post by construction of a
        // pure add; there is no tid that round-trips to "unchanged" here.
        assert!(a.pre.entries().count() > 0);
    }

    #[test]
    fn name_collision_is_rejected() {
        let mut r = Rearrangement::empty();
        r.renamed_files.insert(
            split_path("a").unwrap(),
            split_path("target").unwrap(),
        );
        r.renamed_files.insert(
            split_path("b").unwrap(),
            split_path("target").unwrap(),
        );
        assert!(analyze(&r).is_err());
    }

    #[test]
    fn rename_within_renamed_directory_links_parent() {
        let mut r = Rearrangement::empty();
        r.renamed_dirs
            .insert(split_path("lib").unwrap(), split_path("library").unwrap());
        r.renamed_files.insert(
            split_path("lib/foo").unwrap(),
            split_path("library/bar").unwrap(),
        );
        let a = analyze(&r).unwrap();
        let back = compose(&a).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn reconstruct_path_for_untouched_descendant_of_renamed_dir() {
        let mut r = Rearrangement::empty();
        r.renamed_dirs
            .insert(split_path("lib").unwrap(), split_path("library").unwrap());
        let a = analyze(&r).unwrap();
        let image = reconstruct_path(
            &a,
            &split_path("lib/unrelated/deep/file.txt").unwrap(),
            Direction::PreToPost,
        )
        .unwrap();
        assert_eq!(image.to_string(), "library/unrelated/deep/file.txt");
    }

    #[test]
    fn reconstruct_path_returns_none_inside_deleted_dir() {
        let mut r = Rearrangement::empty();
        r.deleted_dirs.insert(split_path("gone").unwrap());
        let a = analyze(&r).unwrap();
        let image = reconstruct_path(
            &a,
            &split_path("gone").unwrap(),
            Direction::PreToPost,
        );
        assert!(image.is_none());
    }

    #[test]
    fn reconstruct_path_identity_for_untouched_path() {
        let r = Rearrangement::empty();
        let a = analyze(&r).unwrap();
        let image = reconstruct_path(&a, &split_path("anything/here").unwrap(), Direction::PreToPost);
        assert_eq!(image.unwrap().to_string(), "anything/here");
    }
}
