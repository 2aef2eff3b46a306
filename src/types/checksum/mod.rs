#![forbid(unsafe_code)]

use super::{DataLocation, GlobalId, Timestamp};

/// Bucket checksum reserved for "no documents".
pub const EMPTY_BUCKET_CHECKSUM: u32 = 0;
/// Bucket checksum reserved for "checksum not computed".
pub const UNSET_BUCKET_CHECKSUM: u32 = 1;

/// Hash of one unique document version, xor-folded into the bucket checksum.
pub fn bucket_entry_hash(gid: &GlobalId, timestamp: Timestamp) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(gid.as_bytes());
    hasher.update(&timestamp.0.to_le_bytes());
    hasher.finalize()
}

/// Moves a non-empty bucket checksum off the reserved sentinel values.
pub fn avoid_reserved(checksum: u32, unique_count: u32) -> u32 {
    if unique_count > 0 && checksum <= UNSET_BUCKET_CHECKSUM {
        checksum + 2
    } else {
        checksum
    }
}

/// 16-bit checksum over the persisted fields of a slot.
///
/// Block positions are left out so a slot copied into another store keeps
/// its checksum.
pub fn slot_checksum(
    timestamp: Timestamp,
    gid: &GlobalId,
    header: DataLocation,
    body: DataLocation,
    persisted_flags: u16,
) -> u16 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&timestamp.0.to_le_bytes());
    hasher.update(gid.as_bytes());
    for loc in [header, body] {
        hasher.update(&loc.size.to_le_bytes());
    }
    hasher.update(&persisted_flags.to_le_bytes());
    fold16(hasher.finalize())
}

fn fold16(crc: u32) -> u16 {
    ((crc >> 16) as u16) ^ (crc as u16)
}
