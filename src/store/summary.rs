use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::slot::SlotEntry;
use crate::types::checksum::{avoid_reserved, bucket_entry_hash};

/// Fixed metadata cost charged per slot in the used-size estimate.
pub const SLOT_METADATA_SIZE: u64 = 40;

/// Aggregate state of a bucket, compared across replicas.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct BucketSummary {
    /// Xor of the entry hashes of the newest version of every live document.
    pub checksum: u32,
    /// Number of unique documents that are not removed.
    pub unique_count: u32,
    /// Combined header and body size of those documents.
    pub unique_size: u64,
    /// All slots, history and tombstones included.
    pub entry_count: u32,
    /// Estimated storage footprint of the bucket.
    pub used_size: u64,
    /// Bucket is ready for serving.
    pub ready: bool,
    /// Bucket is the active replica.
    pub active: bool,
}

/// Computes the summary of an ascending slot sequence.
pub(crate) fn compute(slots: &[SlotEntry], ready: bool, active: bool) -> BucketSummary {
    let mut seen = FxHashSet::default();
    let mut checksum = 0u32;
    let mut unique_count = 0u32;
    let mut unique_size = 0u64;
    let mut header_extent = 0u64;
    let mut body_extent = 0u64;
    for slot in slots.iter().rev() {
        header_extent = header_extent.max(slot.header_location().end());
        body_extent = body_extent.max(slot.body_location().end());
        if !seen.insert(slot.global_id()) {
            continue;
        }
        if slot.is_deleted() {
            continue;
        }
        unique_count += 1;
        unique_size +=
            u64::from(slot.header_location().size) + u64::from(slot.body_location().size);
        checksum ^= bucket_entry_hash(&slot.global_id(), slot.timestamp());
    }
    let entry_count = slots.len() as u32;
    let used_size = if slots.is_empty() {
        0
    } else {
        SLOT_METADATA_SIZE * u64::from(entry_count) + header_extent + body_extent
    };
    BucketSummary {
        checksum: avoid_reserved(checksum, unique_count),
        unique_count,
        unique_size,
        entry_count,
        used_size,
        ready,
        active,
    }
}
