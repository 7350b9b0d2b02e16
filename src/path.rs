//! Internal path vocabulary (spec §3, §4.1).
//!
//! A [`RepoPath`] is an ordered sequence of [`PathComponent`]s. Components
//! are validated once at construction; everything downstream works with
//! already-valid paths, so the rest of the engine never has to re-check
//! separators or reserved names.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PcdvError;

/// Reserved top-level directory name. A file-path whose first component
/// equals this name (case-insensitively) is a bookkeeping path and is
/// rejected wherever a user-facing path is expected.
pub const BOOKKEEPING_DIR: &str = "_MTN";

/// A single validated path component.
///
/// Non-empty, contains no path separator, is not `.` or `..`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathComponent(String);

impl PathComponent {
    /// Validate and wrap a single path component.
    ///
    /// # Errors
    /// Returns [`PcdvError::InvalidPath`] if `s` is empty, contains `/` or
    /// `\`, or is exactly `.` or `..`.
    pub fn new(s: impl Into<String>) -> Result<Self, PcdvError> {
        let s = s.into();
        Self::validate(&s)?;
        Ok(Self(s))
    }

    fn validate(s: &str) -> Result<(), PcdvError> {
        if s.is_empty() {
            return Err(PcdvError::invalid_path(s, "path component must not be empty"));
        }
        if s.contains('/') || s.contains('\\') {
            return Err(PcdvError::invalid_path(
                s,
                "path component must not contain a path separator",
            ));
        }
        if s == "." || s == ".." {
            return Err(PcdvError::invalid_path(
                s,
                "path component must not be '.' or '..'",
            ));
        }
        Ok(())
    }

    /// Borrow the component as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True iff this component is, case-insensitively, the bookkeeping
    /// directory name.
    #[must_use]
    pub fn is_bookkeeping(&self) -> bool {
        self.0.eq_ignore_ascii_case(BOOKKEEPING_DIR)
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PathComponent {
    type Error = PcdvError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<PathComponent> for String {
    fn from(c: PathComponent) -> Self {
        c.0
    }
}

/// An internal, normalized, repository-relative path: an ordered sequence
/// of [`PathComponent`]s. An empty sequence denotes the root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoPath(Vec<PathComponent>);

impl RepoPath {
    /// The root path (empty component sequence).
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path directly from already-validated components.
    #[must_use]
    pub fn from_components(components: Vec<PathComponent>) -> Self {
        Self(components)
    }

    /// Borrow the component sequence.
    #[must_use]
    pub fn components(&self) -> &[PathComponent] {
        &self.0
    }

    /// True iff this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The final component, if any.
    #[must_use]
    pub fn leaf(&self) -> Option<&PathComponent> {
        self.0.last()
    }

    /// The path with its final component removed, and the removed
    /// component itself, if this path is not the root.
    #[must_use]
    pub fn split_leaf(&self) -> Option<(RepoPath, &PathComponent)> {
        let (last, rest) = self.0.split_last()?;
        Some((RepoPath(rest.to_vec()), last))
    }

    /// Build a child path by appending one component.
    #[must_use]
    pub fn join(&self, component: PathComponent) -> Self {
        let mut v = self.0.clone();
        v.push(component);
        Self(v)
    }

    /// True iff `self` is a strict or non-strict ancestor directory of
    /// `other` (i.e. `other`'s components begin with `self`'s).
    #[must_use]
    pub fn is_prefix_of(&self, other: &RepoPath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// True iff the first component names the bookkeeping directory.
    #[must_use]
    pub fn is_bookkeeping(&self) -> bool {
        self.0.first().is_some_and(PathComponent::is_bookkeeping)
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for c in &self.0 {
            if !first {
                write!(f, "/")?;
            }
            first = false;
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Split a slash-separated file-path string into its components.
///
/// `split_path` and [`compose_path`] are total inverses on well-formed
/// input: `split_path(compose_path(xs)) == xs`.
///
/// # Errors
/// Returns [`PcdvError::InvalidPath`] if any component is illegal.
pub fn split_path(fp: &str) -> Result<RepoPath, PcdvError> {
    if fp.is_empty() {
        return Ok(RepoPath::root());
    }
    let mut components = Vec::new();
    for part in fp.split('/') {
        components.push(PathComponent::new(part)?);
    }
    Ok(RepoPath::from_components(components))
}

/// Join a path's components back into a slash-separated string.
#[must_use]
pub fn compose_path(path: &RepoPath) -> String {
    path.to_string()
}

/// True iff `id` is the distinguished null identifier.
#[must_use]
pub fn null_id<K>(id: &crate::ident::Id<K>) -> bool {
    id.is_null()
}

/// True iff `component` is absent (the distinguished null path component
/// used inside the path-analysis engine).
#[must_use]
pub fn null_name(component: &Option<PathComponent>) -> bool {
    component.is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_compose_round_trip() {
        let p = split_path("usr/bin/cat").unwrap();
        assert_eq!(compose_path(&p), "usr/bin/cat");
    }

    #[test]
    fn split_empty_is_root() {
        let p = split_path("").unwrap();
        assert!(p.is_root());
        assert_eq!(compose_path(&p), "");
    }

    #[test]
    fn rejects_dot_and_dotdot() {
        assert!(split_path("a/./b").is_err());
        assert!(split_path("a/../b").is_err());
    }

    #[test]
    fn rejects_empty_component() {
        assert!(split_path("a//b").is_err());
    }

    #[test]
    fn bookkeeping_is_case_insensitive() {
        let p = split_path("_MTN/options").unwrap();
        assert!(p.is_bookkeeping());
        let p2 = split_path("_mtn/options").unwrap();
        assert!(p2.is_bookkeeping());
        let p3 = split_path("usr/_MTN").unwrap();
        assert!(!p3.is_bookkeeping());
    }

    #[test]
    fn is_prefix_of() {
        let a = split_path("usr/lib").unwrap();
        let b = split_path("usr/lib/zombie").unwrap();
        assert!(a.is_prefix_of(&b));
        assert!(!b.is_prefix_of(&a));
        assert!(a.is_prefix_of(&a));
    }

    #[test]
    fn split_leaf() {
        let p = split_path("usr/bin/cat").unwrap();
        let (parent, leaf) = p.split_leaf().unwrap();
        assert_eq!(compose_path(&parent), "usr/bin");
        assert_eq!(leaf.as_str(), "cat");
    }

    #[test]
    fn root_has_no_leaf() {
        assert!(RepoPath::root().split_leaf().is_none());
    }
}
