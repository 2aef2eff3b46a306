use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

use super::{DocumentSlotStore, IterOptions};
use crate::env::CompactionCfg;
use crate::slot::SlotEntry;
use crate::types::{DocumentId, GlobalId, Result, Timestamp};

/// Versions seen so far for one document identifier.
struct VersionTrack {
    id: DocumentId,
    versions: u32,
    removed: bool,
}

/// Retention policy evaluated against a store at a fixed point in time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Compactor {
    revert_point: Timestamp,
    keep_remove_point: Timestamp,
    max_versions: u32,
}

impl Compactor {
    /// Derives the retention points from `now`, clamping at zero.
    pub fn new(now: Timestamp, cfg: &CompactionCfg) -> Self {
        Self {
            revert_point: now.saturating_sub(cfg.revert_time_period),
            keep_remove_point: now.saturating_sub(cfg.keep_remove_time_period),
            max_versions: cfg.max_document_versions.max(1),
        }
    }

    /// Versions older than this may no longer be reverted to.
    pub fn revert_point(&self) -> Timestamp {
        self.revert_point
    }

    /// Tombstones older than this have been kept long enough.
    pub fn keep_remove_point(&self) -> Timestamp {
        self.keep_remove_point
    }

    /// Slots of `store` the policy allows dropping, in ascending order.
    ///
    /// Global ids may collide, so versions are counted per document
    /// identifier read from each slot's header.
    pub fn find_removable(&self, store: &mut DocumentSlotStore) -> Result<Vec<SlotEntry>> {
        store.ensure_header_block_cached()?;
        let mut tracked: FxHashMap<GlobalId, SmallVec<[VersionTrack; 1]>> =
            FxHashMap::default();
        let mut removable = Vec::new();
        for slot in store.iter(IterOptions::everything()) {
            let id = store.read_document_id(slot)?;
            let tracks = tracked.entry(slot.global_id()).or_default();
            let idx = match tracks.iter().position(|track| track.id == id) {
                Some(idx) => idx,
                None => {
                    tracks.push(VersionTrack {
                        id,
                        versions: 0,
                        removed: false,
                    });
                    tracks.len() - 1
                }
            };
            let track = &mut tracks[idx];
            let newer_seen = track.versions > 0;
            track.versions += 1;
            track.removed |= slot.is_deleted();

            let remove = if track.versions > self.max_versions {
                true
            } else if newer_seen {
                slot.timestamp() < self.revert_point
            } else if slot.is_deleted() && slot.timestamp() < self.keep_remove_point {
                slot.timestamp() < self.revert_point
            } else {
                false
            };
            if remove {
                trace!(
                    %slot,
                    versions = track.versions,
                    removed = track.removed,
                    "slotstore.compact.removable"
                );
                removable.push(*slot);
            }
        }
        removable.reverse();
        Ok(removable)
    }
}
