use rustc_hash::FxHashSet;

use crate::slot::SlotEntry;
use crate::types::{GlobalId, Timestamp};

/// Filters applied by slot iterators.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IterOptions {
    /// Yield tombstones as well as puts and updates.
    pub include_removes: bool,
    /// Oldest timestamp to yield; zero means unbounded.
    pub from: Timestamp,
    /// Newest timestamp to yield; zero means unbounded.
    pub to: Timestamp,
}

impl IterOptions {
    /// Options yielding every slot, tombstones included.
    pub fn everything() -> Self {
        Self {
            include_removes: true,
            ..Self::default()
        }
    }

    /// Includes or excludes tombstones.
    pub fn include_removes(mut self, include: bool) -> Self {
        self.include_removes = include;
        self
    }

    /// Sets the lower timestamp bound.
    pub fn from(mut self, from: Timestamp) -> Self {
        self.from = from;
        self
    }

    /// Sets the upper timestamp bound.
    pub fn to(mut self, to: Timestamp) -> Self {
        self.to = to;
        self
    }

    fn accepts(&self, slot: &SlotEntry) -> bool {
        if self.to != Timestamp::ZERO && slot.timestamp() > self.to {
            return false;
        }
        if self.from != Timestamp::ZERO && slot.timestamp() < self.from {
            return false;
        }
        self.include_removes || !slot.is_deleted()
    }
}

#[derive(Clone, Debug)]
enum Strategy {
    AllSlots,
    LatestPerIdentity { seen: FxHashSet<GlobalId> },
}

/// Detached iteration progress over one store.
///
/// A cursor outlives the borrow of the store it came from and may be resumed
/// with [`super::DocumentSlotStore::resume`] as long as the store has not been
/// mutated in between.
#[derive(Clone, Debug)]
pub struct SlotCursor {
    strategy: Strategy,
    opts: IterOptions,
    // Slots at indexes below `remaining` have not been visited.
    remaining: usize,
    generation: u64,
}

impl SlotCursor {
    pub(super) fn all(opts: IterOptions, len: usize, generation: u64) -> Self {
        Self {
            strategy: Strategy::AllSlots,
            opts,
            remaining: len,
            generation,
        }
    }

    pub(super) fn latest(opts: IterOptions, len: usize, generation: u64) -> Self {
        Self {
            strategy: Strategy::LatestPerIdentity {
                seen: FxHashSet::default(),
            },
            opts,
            remaining: len,
            generation,
        }
    }

    /// Store generation the cursor was created against.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` once every slot has been visited.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Filters in effect.
    pub fn options(&self) -> IterOptions {
        self.opts
    }

    pub(super) fn clamped(mut self, len: usize) -> Self {
        self.remaining = self.remaining.min(len);
        self
    }

    fn advance<'a>(&mut self, slots: &'a [SlotEntry]) -> Option<&'a SlotEntry> {
        while self.remaining > 0 {
            self.remaining -= 1;
            let slot = &slots[self.remaining];
            if !self.opts.accepts(slot) {
                continue;
            }
            if let Strategy::LatestPerIdentity { seen } = &mut self.strategy {
                if !seen.insert(slot.global_id()) {
                    continue;
                }
            }
            return Some(slot);
        }
        None
    }
}

/// Lazy, newest-first traversal of a store's slots.
#[derive(Clone, Debug)]
pub struct SlotIter<'a> {
    slots: &'a [SlotEntry],
    cursor: SlotCursor,
}

impl<'a> SlotIter<'a> {
    pub(super) fn new(slots: &'a [SlotEntry], cursor: SlotCursor) -> Self {
        Self { slots, cursor }
    }

    /// Snapshot of the current progress.
    pub fn cursor(&self) -> SlotCursor {
        self.cursor.clone()
    }

    /// Consumes the iterator, keeping its progress.
    pub fn into_cursor(self) -> SlotCursor {
        self.cursor
    }
}

impl<'a> Iterator for SlotIter<'a> {
    type Item = &'a SlotEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(self.slots)
    }
}
