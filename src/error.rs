//! Error taxonomy for the change-set algebra and merge engine.
//!
//! A single hand-rolled [`PcdvError`] enum covers every failure kind named by
//! the engine's contract: invalid paths, invariant violations, incompatible
//! concatenations, malformed serialized forms, and external-store failures.
//! Conflicts produced by the merge engine are *not* represented here — they
//! are returned as data from the merge entry points themselves (see
//! [`crate::weave`] and [`crate::tree`]), never raised as an error.

use std::fmt;

/// Unified error type for the change-set algebra and merge engine.
///
/// Every variant carries enough context for a caller to understand what was
/// violated and, where one exists, what to check next.
#[derive(Debug)]
pub enum PcdvError {
    /// A supplied byte sequence is not a legal path or path component.
    InvalidPath {
        /// The offending path or component, as received.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An operation's inputs or intermediate state violates a data-model
    /// invariant. Fatal to the operation; never silently relaxed except via
    /// the explicit `relaxed-sanity` ingest path named in the operation's
    /// own documentation.
    InvariantViolation {
        /// Which invariant was violated and why.
        detail: String,
    },

    /// Two change-sets cannot be composed: a type mismatch across the
    /// boundary, a kill-vs-use conflict, or a broken delta chain.
    IncompatibleConcatenation {
        /// Description of the specific incompatibility found.
        detail: String,
    },

    /// A serialized change-set, revision, or identifier is malformed.
    Decoding {
        /// What was being decoded.
        what: String,
        /// Why parsing failed.
        detail: String,
    },

    /// The external revision store, content store, or merge oracle returned
    /// an error.
    StoreUnavailable {
        /// The operation that was attempted (e.g. `"get_revision"`).
        operation: String,
        /// The identifier involved, if any.
        detail: String,
    },

    /// An I/O error occurred while applying a rearrangement to the
    /// filesystem.
    Io(std::io::Error),
}

impl fmt::Display for PcdvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPath { value, reason } => {
                write!(
                    f,
                    "invalid path '{value}': {reason}\n  To fix: paths must be non-empty, must not contain the path separator, '.', or '..', and must not use the bookkeeping directory name as a first component."
                )
            }
            Self::InvariantViolation { detail } => {
                write!(
                    f,
                    "invariant violation: {detail}\n  To fix: the operation's inputs do not form a well-formed change-set or path-analysis; inspect the rearrangement and delta map that produced this state."
                )
            }
            Self::IncompatibleConcatenation { detail } => {
                write!(
                    f,
                    "incompatible concatenation: {detail}\n  To fix: the two change-sets do not share a consistent boundary state; verify that the first change-set's post-state matches the second's pre-state."
                )
            }
            Self::Decoding { what, detail } => {
                write!(
                    f,
                    "failed to decode {what}: {detail}\n  To fix: check that the serialized form was produced by this engine's own canonical serializer and has not been truncated or hand-edited."
                )
            }
            Self::StoreUnavailable { operation, detail } => {
                write!(
                    f,
                    "store operation '{operation}' failed: {detail}\n  To fix: check the backing revision/content store's health and retry."
                )
            }
            Self::Io(err) => {
                write!(
                    f,
                    "I/O error during filesystem rearrangement: {err}\n  To fix: check file permissions and that the working copy is not held open by another process."
                )
            }
        }
    }
}

impl std::error::Error for PcdvError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PcdvError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl PcdvError {
    /// Build an [`PcdvError::InvalidPath`] for the given value and reason.
    #[must_use]
    pub fn invalid_path(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Build an [`PcdvError::InvariantViolation`] with the given detail.
    #[must_use]
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            detail: detail.into(),
        }
    }

    /// Build an [`PcdvError::IncompatibleConcatenation`] with the given detail.
    #[must_use]
    pub fn incompatible(detail: impl Into<String>) -> Self {
        Self::IncompatibleConcatenation {
            detail: detail.into(),
        }
    }

    /// Build a [`PcdvError::Decoding`] for the given subject and detail.
    #[must_use]
    pub fn decoding(what: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Decoding {
            what: what.into(),
            detail: detail.into(),
        }
    }

    /// Build a [`PcdvError::StoreUnavailable`] for the given operation and detail.
    #[must_use]
    pub fn store(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_path_is_actionable() {
        let err = PcdvError::invalid_path("a/../b", "contains '..'");
        let msg = err.to_string();
        assert!(msg.contains("a/../b"));
        assert!(msg.contains("contains '..'"));
        assert!(msg.contains("To fix"));
    }

    #[test]
    fn display_invariant_violation() {
        let err = PcdvError::invariant("rename source also deleted");
        let msg = err.to_string();
        assert!(msg.contains("rename source also deleted"));
    }

    #[test]
    fn io_error_has_source() {
        let io_err = std::io::Error::other("disk full");
        let err: PcdvError = io_err.into();
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn decoding_error_names_subject() {
        let err = PcdvError::decoding("change-set", "unexpected token at byte 12");
        let msg = err.to_string();
        assert!(msg.contains("change-set"));
        assert!(msg.contains("byte 12"));
    }
}
