#![forbid(unsafe_code)]

//! Identifiers, locations and the recoverable error type shared by every
//! slot store component.

use std::fmt;
use std::time::Duration;

mod error;

/// Checksum helpers for slots and bucket summaries.
pub mod checksum;

pub use error::{ConfigError, Result, StoreError};

/// Logical write time of a slot, in microseconds.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The zero timestamp; iterator windows treat it as "unbounded".
    pub const ZERO: Timestamp = Timestamp(0);

    /// Returns the timestamp `period` earlier, clamped at zero.
    pub fn saturating_sub(self, period: Duration) -> Timestamp {
        let micros = u64::try_from(period.as_micros()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_sub(micros))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Length of a [`GlobalId`] in bytes.
pub const GLOBAL_ID_LEN: usize = 12;

/// Compact content-derived document identity.
///
/// Bytes `0..4` hold the document location, bytes `4..12` a hash of the full
/// identifier. Distinct documents may share a global id.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, serde::Serialize, serde::Deserialize,
)]
pub struct GlobalId(pub [u8; GLOBAL_ID_LEN]);

impl GlobalId {
    /// Builds a global id from a location and an identifier hash.
    pub fn from_parts(location: u32, hash: u64) -> Self {
        let mut raw = [0u8; GLOBAL_ID_LEN];
        raw[0..4].copy_from_slice(&location.to_le_bytes());
        raw[4..12].copy_from_slice(&hash.to_le_bytes());
        Self(raw)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; GLOBAL_ID_LEN] {
        &self.0
    }

    /// Returns the 32-bit location stored in the id.
    pub fn location(&self) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.0[0..4]);
        u32::from_le_bytes(buf)
    }

    /// Returns the key used for bucket containment checks.
    pub fn bucket_key(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[0..8]);
        u64::from_le_bytes(buf)
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Full document identifier, `id:<namespace>:<type>:<modifiers>:<user>`.
#[derive(
    Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, serde::Serialize, serde::Deserialize,
)]
pub struct DocumentId(String);

impl DocumentId {
    /// Wraps an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Location of the document: `n=` pins it to a number, `g=` to a group
    /// hash, otherwise the whole identifier is hashed.
    pub fn location(&self) -> u32 {
        let modifiers = self.0.split(':').nth(3).unwrap_or("");
        for modifier in modifiers.split(',') {
            if let Some(number) = modifier.strip_prefix("n=") {
                if let Ok(n) = number.parse::<u64>() {
                    return n as u32;
                }
            }
            if let Some(group) = modifier.strip_prefix("g=") {
                return crc32fast::hash(group.as_bytes());
            }
        }
        crc32fast::hash(self.0.as_bytes())
    }

    /// Derives the global id for this identifier.
    pub fn global_id(&self) -> GlobalId {
        let hash = xxhash_rust::xxh64::xxh64(self.0.as_bytes(), 0);
        GlobalId::from_parts(self.location(), hash)
    }

    /// Recomputes the bucket key from the identifier itself, keeping the hash
    /// bits of `gid`. Used when a document type rewrites its global id.
    pub fn bucket_key(&self, gid: &GlobalId) -> u64 {
        (gid.bucket_key() & !u64::from(u32::MAX)) | u64::from(self.location())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Largest number of significant bits a bucket may use.
pub const MAX_BUCKET_BITS: u8 = 58;

/// A partition of the document space.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct BucketId {
    used_bits: u8,
    key: u64,
}

impl BucketId {
    /// Creates a bucket using the low `used_bits` bits of `key`.
    pub fn new(used_bits: u8, key: u64) -> Self {
        let used_bits = used_bits.min(MAX_BUCKET_BITS);
        Self {
            used_bits,
            key: key & Self::mask(used_bits),
        }
    }

    /// Returns the bucket a global id belongs to at the given split level.
    pub fn for_global_id(used_bits: u8, gid: &GlobalId) -> Self {
        Self::new(used_bits, gid.bucket_key())
    }

    /// Number of significant key bits.
    pub fn used_bits(&self) -> u8 {
        self.used_bits
    }

    /// Masked bucket key.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Returns `true` when `key` falls inside this bucket.
    pub fn contains_key(&self, key: u64) -> bool {
        key & Self::mask(self.used_bits) == self.key
    }

    fn mask(used_bits: u8) -> u64 {
        if used_bits == 0 {
            0
        } else {
            u64::MAX >> (64 - u32::from(used_bits))
        }
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketId({}:0x{:x})", self.used_bits, self.key)
    }
}

/// Position and size of a serialized document part inside a block store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct DataLocation {
    /// Offset of the block.
    pub pos: u32,
    /// Size of the block in bytes; zero means "no content".
    pub size: u32,
}

impl DataLocation {
    /// Creates a location.
    pub const fn new(pos: u32, size: u32) -> Self {
        Self { pos, size }
    }

    /// Location of a part that has no content (tombstone bodies).
    pub const fn empty() -> Self {
        Self { pos: 0, size: 0 }
    }

    /// Degenerate location that never references a block.
    pub const fn invalid() -> Self {
        Self {
            pos: u32::MAX,
            size: 0,
        }
    }

    /// Returns `false` for the degenerate sentinel.
    pub fn is_valid(&self) -> bool {
        self.pos != u32::MAX
    }

    /// Returns `true` when the location carries no content.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// End offset (`pos + size`).
    pub fn end(&self) -> u64 {
        u64::from(self.pos) + u64::from(self.size)
    }
}

impl fmt::Display for DataLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.pos, self.size)
    }
}

/// Independently cached portion of a serialized document.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum DocumentPart {
    /// Identifier, type and header fields.
    Header,
    /// Body fields.
    Body,
}

impl DocumentPart {
    /// Both parts, header first.
    pub const ALL: [DocumentPart; 2] = [DocumentPart::Header, DocumentPart::Body];
}

impl fmt::Display for DocumentPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentPart::Header => f.write_str("header"),
            DocumentPart::Body => f.write_str("body"),
        }
    }
}
