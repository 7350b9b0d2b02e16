//! Change-set algebra, path-analysis, and history-aware tree-merge engine
//! for a content-addressed version control system.
//!
//! The crate is layered bottom-up: [`ident`] and [`path`] give the
//! content-addressed vocabulary everything else builds on; [`analysis`]
//! turns a bare rearrangement into a renumbering of stable entities;
//! [`changeset`] is the algebra (composition, inversion, normalization)
//! over that representation; [`manifest`] connects change-sets to concrete
//! file trees; [`ancestry`] reasons about the revision DAG; [`weave`] and
//! [`tree`] are the two history-aware merge engines (lines, and item
//! locations); [`revision`] composes them into revision records; [`store`]
//! is the narrow seam to external persistence.

pub mod analysis;
pub mod ancestry;
pub mod changeset;
pub mod error;
pub mod ident;
pub mod manifest;
pub mod path;
pub mod revision;
pub mod store;
#[cfg(test)]
pub(crate) mod test_support;
pub mod tree;
pub mod weave;
