//! Content-addressed identifiers and the canonical hash function (spec §3, §4.1).
//!
//! An [`Id<K>`] is a fixed-width digest tagged at the type level by a marker
//! kind (`FileKind`, `ManifestKind`, `RevisionKind`) so that file, manifest,
//! and revision identifiers cannot be substituted for one another by
//! accident — the same "distinct semantic kinds are not interchangeable"
//! rule the data model calls for, enforced by the compiler instead of a
//! runtime tag check.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

use sha1::{Digest, Sha1};

use crate::error::PcdvError;

/// Width in bytes of a digest (SHA-1, matching the original system and the
/// 40-hex-character wire format named in §6).
pub const DIGEST_LEN: usize = 20;

/// Marker type for file identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileKind;

/// Marker type for manifest identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManifestKind;

/// Marker type for revision identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevisionKind;

/// A content-addressed identifier of a particular kind.
///
/// `K` is a zero-sized marker (see [`FileKind`], [`ManifestKind`],
/// [`RevisionKind`]) and never appears in the value; it exists purely to
/// keep, say, a [`FileId`] from being passed where a [`RevisionId`] is
/// expected.
pub struct Id<K> {
    bytes: [u8; DIGEST_LEN],
    _kind: PhantomData<fn() -> K>,
}

/// A content-addressed file identifier.
pub type FileId = Id<FileKind>;
/// A content-addressed manifest identifier.
pub type ManifestId = Id<ManifestKind>;
/// A content-addressed revision identifier.
pub type RevisionId = Id<RevisionKind>;

impl<K> Id<K> {
    /// The distinguished null identifier: "no such object yet".
    pub const NULL: Self = Self {
        bytes: [0u8; DIGEST_LEN],
        _kind: PhantomData,
    };

    /// Wrap a raw digest. Does not hash; `bytes` must already be a digest
    /// (or the null value) of the appropriate kind.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self {
            bytes,
            _kind: PhantomData,
        }
    }

    /// Borrow the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.bytes
    }

    /// True iff this is the distinguished null identifier.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.bytes == [0u8; DIGEST_LEN]
    }

    /// Render as 40 lowercase hex characters.
    #[must_use]
    pub fn to_hex(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::with_capacity(DIGEST_LEN * 2);
        for b in &self.bytes {
            write!(out, "{b:02x}").expect("writing to a String cannot fail");
        }
        out
    }

    /// Parse from 40 lowercase hex characters.
    ///
    /// # Errors
    /// Returns [`PcdvError::Decoding`] if `s` is not exactly 40 lowercase
    /// hex digits.
    pub fn from_hex(s: &str) -> Result<Self, PcdvError> {
        if s.len() != DIGEST_LEN * 2 {
            return Err(PcdvError::decoding(
                "identifier",
                format!("expected {} hex characters, got {}", DIGEST_LEN * 2, s.len()),
            ));
        }
        if !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(PcdvError::decoding(
                "identifier",
                "must contain only lowercase hex characters (0-9, a-f)",
            ));
        }
        let mut bytes = [0u8; DIGEST_LEN];
        for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
            let hi = hex_val(chunk[0]);
            let lo = hex_val(chunk[1]);
            bytes[i] = (hi << 4) | lo;
        }
        Ok(Self::from_bytes(bytes))
    }
}

fn hex_val(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => 0,
    }
}

/// Compute the canonical digest over `bytes`.
///
/// Deterministic, collision-resistant, and infallible; performs no I/O.
#[must_use]
pub fn hash<K>(bytes: &[u8]) -> Id<K> {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&digest);
    Id::from_bytes(out)
}

// Manual trait impls: derive would impose `K: Trait` bounds that the marker
// type never needs to satisfy.

impl<K> Clone for Id<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Id<K> {}

impl<K> PartialEq for Id<K> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl<K> Eq for Id<K> {}

impl<K> PartialOrd for Id<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Id<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl<K> Hash for Id<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl<K> fmt::Debug for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.to_hex())
    }
}

impl<K> fmt::Display for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl<K> FromStr for Id<K> {
    type Err = PcdvError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl<K> serde::Serialize for Id<K> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de, K> serde::Deserialize<'de> for Id<K> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
