#![forbid(unsafe_code)]

//! The per-bucket document slot store.
//!
//! A [`DocumentSlotStore`] owns the ascending sequence of [`SlotEntry`]
//! records for one bucket. Content lives in a [`BlockStore`] and is pulled
//! into its cache lazily, in one batched request per document part.
//!
//! The store is not synchronized. Callers serialize access per bucket,
//! typically by holding the store behind their own lock for the duration of
//! an operation batch. Iterators borrow the slot sequence and therefore can
//! not overlap a mutation; detached [`SlotCursor`]s record the store
//! generation and are checked on [`DocumentSlotStore::resume`] in debug
//! builds.
//!
//! Structural corruption (duplicate timestamps, unknown removal targets,
//! slots outside their bucket, illegal flags) is never reported as an error.
//! It is logged and the process halts, since continuing would operate on an
//! inconsistent bucket.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::block::BlockStore;
use crate::document::{Document, GetFlag};
use crate::env::{CompactionCfg, StoreEnv};
use crate::slot::{flags, legal_flags_violation, DataLocationMap, SlotEntry};
use crate::types::{
    BucketId, DataLocation, DocumentId, DocumentPart, Result, StoreError, Timestamp,
};

/// Logs a structural corruption of the store and halts.
macro_rules! fatal {
    ($bucket:expr, $($arg:tt)+) => {{
        let reason = format!($($arg)+);
        tracing::error!(bucket = %$bucket, %reason, "slotstore.fatal");
        panic!("fatal slot store corruption: {} in {}", reason, $bucket)
    }};
}

mod compactor;
mod dump;
mod iter;
mod summary;

pub use compactor::Compactor;
pub use dump::SlotFinding;
pub use iter::{IterOptions, SlotCursor, SlotIter};
pub use summary::{BucketSummary, SLOT_METADATA_SIZE};

/// Store-level status bits.
pub mod store_flags {
    /// Cached [`super::BucketSummary`] must be recomputed.
    pub const BUCKET_INFO_OUTDATED: u8 = 0x01;
    /// Slots changed since the last flush.
    pub const SLOTS_ALTERED: u8 = 0x02;
    /// The block store has a physical file.
    pub const FILE_EXISTS: u8 = 0x04;
    /// Every header block referenced by a slot is cached.
    pub const HEADER_BLOCK_CACHED: u8 = 0x08;
    /// Every body block referenced by a slot is cached.
    pub const BODY_BLOCK_CACHED: u8 = 0x10;
}

/// Kind of remove requested for a document without a prior slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RemoveKind {
    /// Ordinary tombstone; a later revert may bring the document back.
    Revertable,
    /// Tombstone marked deleted-in-place.
    Unrevertable,
}

/// Whether [`DocumentSlotStore::flush`] persists unchanged slots.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlushMode {
    /// Persist only if slots were altered since the last flush.
    IfAltered,
    /// Persist unconditionally.
    Always,
}

/// All document versions held for one bucket.
pub struct DocumentSlotStore {
    bucket: BucketId,
    block_store: Arc<dyn BlockStore>,
    env: Arc<StoreEnv>,
    slots: Vec<SlotEntry>,
    flags: u8,
    summary: BucketSummary,
    ready: bool,
    active: bool,
    generation: u64,
}

impl DocumentSlotStore {
    /// Creates an empty store bound to `bucket` and `block_store`.
    pub fn new(bucket: BucketId, block_store: Arc<dyn BlockStore>, env: Arc<StoreEnv>) -> Self {
        let mut flags = store_flags::BUCKET_INFO_OUTDATED;
        if block_store.file_exists() {
            flags |= store_flags::FILE_EXISTS;
        }
        Self {
            bucket,
            block_store,
            env,
            slots: Vec::new(),
            flags,
            summary: BucketSummary::default(),
            ready: false,
            active: false,
            generation: 0,
        }
    }

    /// Creates a store and loads the persisted slots if the file exists.
    ///
    /// Out-of-order or illegally flagged slot tables are reported as
    /// [`StoreError::Corruption`]; slots outside the bucket halt the process.
    pub fn open(
        bucket: BucketId,
        block_store: Arc<dyn BlockStore>,
        env: Arc<StoreEnv>,
    ) -> Result<Self> {
        let mut store = Self::new(bucket, block_store, env);
        if !store.has_flags(store_flags::FILE_EXISTS) {
            return Ok(store);
        }
        let slots = store.block_store.load_slots()?;
        if slots
            .windows(2)
            .any(|pair| pair[0].timestamp() >= pair[1].timestamp())
        {
            return Err(StoreError::Corruption(
                "persisted slots are not in ascending timestamp order",
            ));
        }
        if slots.iter().any(|slot| legal_flags_violation(slot).is_some()) {
            return Err(StoreError::Corruption("persisted slot carries illegal flags"));
        }
        store.slots = slots;
        for slot in &store.slots {
            store.assert_contained_in_bucket(slot)?;
        }
        debug!(bucket = %bucket, slots = store.slots.len(), "slotstore.open");
        Ok(store)
    }

    /// Bucket this store represents.
    pub fn bucket(&self) -> BucketId {
        self.bucket
    }

    /// Backing block store.
    pub fn block_store(&self) -> &Arc<dyn BlockStore> {
        &self.block_store
    }

    /// Shared environment.
    pub fn env(&self) -> &Arc<StoreEnv> {
        &self.env
    }

    /// Returns `true` if every bit in `mask` (from [`store_flags`]) is set.
    pub fn has_flags(&self, mask: u8) -> bool {
        self.flags & mask == mask
    }

    /// Slots in ascending timestamp order.
    pub fn slots(&self) -> &[SlotEntry] {
        &self.slots
    }

    /// Number of slots, history and tombstones included.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the store holds no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Counter bumped by every mutation of the slot sequence.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Copy of the slot written at `timestamp`.
    pub fn get_slot_at_time(&self, timestamp: Timestamp) -> Option<SlotEntry> {
        self.position_of(timestamp).ok().map(|idx| self.slots[idx])
    }

    /// Copy of the newest slot for `id` at or before `max_timestamp`.
    ///
    /// A zero `max_timestamp` means no bound. Candidates are narrowed by
    /// global id and confirmed against the identifier in their header.
    pub fn get_slot_with_id(
        &self,
        id: &DocumentId,
        max_timestamp: Timestamp,
    ) -> Result<Option<SlotEntry>> {
        let gid = id.global_id();
        let candidates: Vec<SlotEntry> = self
            .slots
            .iter()
            .rev()
            .filter(|slot| slot.global_id() == gid)
            .filter(|slot| max_timestamp == Timestamp::ZERO || slot.timestamp() <= max_timestamp)
            .copied()
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }
        let headers = uncached_locations(
            self.block_store.as_ref(),
            &candidates,
            DocumentPart::Header,
        );
        self.load_blocks(DocumentPart::Header, &headers)?;
        for slot in candidates {
            if self.read_document_id(&slot)? == *id {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// Stores a full document written at `timestamp`.
    pub fn add_put(&mut self, doc: &Document, timestamp: Timestamp) -> Result<SlotEntry> {
        self.check_disk_space()?;
        let header = self
            .block_store
            .add_header(doc)
            .map_err(self.block_err("add_header", DocumentPart::Header))?;
        let body = self
            .block_store
            .add_body(doc)
            .map_err(self.block_err("add_body", DocumentPart::Body))?;
        let slot = SlotEntry::new(
            timestamp,
            doc.gid,
            header,
            body,
            flags::IN_USE | flags::CHECKSUM_OUTDATED,
            0,
        );
        self.insert(slot)?;
        Ok(slot)
    }

    /// Stores a new header version sharing the body of `body_source`.
    pub fn add_update(
        &mut self,
        header: &Document,
        body_source: &SlotEntry,
        timestamp: Timestamp,
    ) -> Result<SlotEntry> {
        let body = body_source.body_location();
        if !body.is_valid() || body.is_empty() {
            fatal!(
                self.bucket,
                "update at {} reuses body {} of {} which holds no block",
                timestamp,
                body,
                body_source
            );
        }
        self.check_disk_space()?;
        let header_loc = self
            .block_store
            .add_header(header)
            .map_err(self.block_err("add_header", DocumentPart::Header))?;
        let slot = SlotEntry::new(
            timestamp,
            header.gid,
            header_loc,
            body,
            flags::IN_USE | flags::CHECKSUM_OUTDATED,
            0,
        );
        self.insert(slot)?;
        Ok(slot)
    }

    /// Stores a tombstone that keeps the header of `prior`.
    pub fn add_remove(&mut self, prior: &SlotEntry, timestamp: Timestamp) -> Result<SlotEntry> {
        let slot = SlotEntry::new(
            timestamp,
            prior.global_id(),
            prior.header_location(),
            DataLocation::empty(),
            flags::IN_USE | flags::DELETED | flags::CHECKSUM_OUTDATED,
            0,
        );
        self.add(slot)?;
        Ok(slot)
    }

    /// Stores a tombstone for a document this store has never seen.
    pub fn add_remove_for_unknown(
        &mut self,
        id: &DocumentId,
        timestamp: Timestamp,
        kind: RemoveKind,
    ) -> Result<SlotEntry> {
        let header = self
            .block_store
            .add_identifier_only_header(id, self.env.type_repo())
            .map_err(self.block_err("add_identifier_only_header", DocumentPart::Header))?;
        let mut slot_flags = flags::IN_USE | flags::DELETED | flags::CHECKSUM_OUTDATED;
        if kind == RemoveKind::Unrevertable {
            slot_flags |= flags::DELETED_IN_PLACE;
        }
        let slot = SlotEntry::new(
            timestamp,
            id.global_id(),
            header,
            DataLocation::empty(),
            slot_flags,
            0,
        );
        self.add(slot)?;
        Ok(slot)
    }

    /// Inserts `slot` in timestamp order.
    ///
    /// Writes that are neither tombstones nor fully persisted pass the disk
    /// admission check first and fail with [`StoreError::NoSpace`] when the
    /// volume is at or above `disk_full_factor`. A timestamp already present
    /// is fatal; use [`Self::modify`] to replace an entry.
    pub fn add(&mut self, slot: SlotEntry) -> Result<()> {
        if !slot.is_deleted() && !self.fully_persisted(&slot) {
            self.check_disk_space()?;
        }
        self.insert(slot)
    }

    /// Validates and inserts a slot whose write has already been admitted.
    fn insert(&mut self, slot: SlotEntry) -> Result<()> {
        if let Some(reason) = legal_flags_violation(&slot) {
            fatal!(self.bucket, "add of {}: {}", slot, reason);
        }
        if !slot.header_location().is_valid() || !slot.body_location().is_valid() {
            fatal!(self.bucket, "add of {}: invalid data location", slot);
        }
        self.assert_contained_in_bucket(&slot)?;
        let timestamp = slot.timestamp();
        let append = self
            .slots
            .last()
            .map_or(true, |last| last.timestamp() < timestamp);
        if append {
            self.slots.push(slot);
        } else {
            match self.position_of(timestamp) {
                Ok(idx) => fatal!(
                    self.bucket,
                    "add of {}: timestamp already used by {}",
                    slot,
                    self.slots[idx]
                ),
                Err(idx) => self.slots.insert(idx, slot),
            }
        }
        self.mark_mutated();
        trace!(bucket = %self.bucket, %slot, "slotstore.add");
        Ok(())
    }

    /// Removes one slot; it must be present and equal to `slot`.
    pub fn remove(&mut self, slot: &SlotEntry) {
        match self.position_of(slot.timestamp()) {
            Ok(idx) if self.slots[idx] == *slot => {
                self.slots.remove(idx);
            }
            _ => fatal!(self.bucket, "remove of {}: slot not present", slot),
        }
        self.mark_mutated();
        trace!(bucket = %self.bucket, %slot, "slotstore.remove");
    }

    /// Removes a set of slots given in strictly ascending timestamp order.
    ///
    /// Every target must be present and equal to the stored slot; otherwise
    /// the store halts before anything is removed.
    pub fn remove_many(&mut self, targets: &[SlotEntry]) {
        if targets.is_empty() {
            return;
        }
        if let Some(pair) = targets
            .windows(2)
            .find(|pair| pair[0].timestamp() >= pair[1].timestamp())
        {
            fatal!(
                self.bucket,
                "remove of {} listed after {}: targets not in ascending order",
                pair[1],
                pair[0]
            );
        }
        let mut idx = 0;
        for target in targets {
            while idx < self.slots.len() && self.slots[idx].timestamp() < target.timestamp() {
                idx += 1;
            }
            if idx == self.slots.len() || self.slots[idx] != *target {
                fatal!(self.bucket, "remove of {}: slot not present", target);
            }
            idx += 1;
        }
        let mut next = 0;
        self.slots.retain(|slot| {
            if next < targets.len() && slot.timestamp() == targets[next].timestamp() {
                next += 1;
                false
            } else {
                true
            }
        });
        self.mark_mutated();
        debug!(
            bucket = %self.bucket,
            removed = targets.len(),
            remaining = self.slots.len(),
            "slotstore.remove_many"
        );
    }

    /// Replaces the slot with the same timestamp.
    ///
    /// The replacement keeps its global id; the stored entry is marked
    /// altered in memory with an outdated checksum.
    pub fn modify(&mut self, slot: SlotEntry) {
        let idx = match self.position_of(slot.timestamp()) {
            Ok(idx) => idx,
            Err(_) => fatal!(self.bucket, "modify of {}: no slot at timestamp", slot),
        };
        let existing = self.slots[idx];
        if existing.global_id() != slot.global_id() {
            fatal!(self.bucket, "modify of {}: replaces {}", slot, existing);
        }
        if let Some(reason) = legal_flags_violation(&slot) {
            fatal!(self.bucket, "modify of {}: {}", slot, reason);
        }
        if !slot.header_location().is_valid() || !slot.body_location().is_valid() {
            fatal!(self.bucket, "modify of {}: invalid data location", slot);
        }
        if existing == slot {
            return;
        }
        let mut updated = slot;
        updated.set_flags(flags::ALTERED_IN_MEMORY | flags::CHECKSUM_OUTDATED);
        self.slots[idx] = updated;
        self.mark_mutated();
        trace!(bucket = %self.bucket, slot = %updated, "slotstore.modify");
    }

    /// Copies one slot and its content from `source` into fresh locations.
    pub fn copy_slot(&mut self, source: &DocumentSlotStore, slot: &SlotEntry) -> Result<SlotEntry> {
        if !slot.is_deleted() {
            self.check_disk_space()?;
        }
        source.ensure_document_cached(slot, GetFlag::All)?;
        let mut copy = *slot;
        for part in DocumentPart::ALL {
            let loc = self
                .block_store
                .copy_cache(source.block_store.as_ref(), part, slot.location(part))
                .map_err(self.block_err("copy_cache", part))?;
            copy.set_location(part, loc);
        }
        self.insert(copy)?;
        Ok(copy)
    }

    /// Copies a set of slots from `source`.
    ///
    /// Source slots sharing a block keep sharing a single block here. The
    /// batch is admitted as a whole; if any copy fails, the copies already
    /// inserted are removed again before the error is returned.
    pub fn copy_slots(
        &mut self,
        source: &DocumentSlotStore,
        slots: &[SlotEntry],
    ) -> Result<Vec<SlotEntry>> {
        if slots.iter().any(|slot| !slot.is_deleted()) {
            self.check_disk_space()?;
        }
        for part in DocumentPart::ALL {
            let locs = uncached_locations(source.block_store.as_ref(), slots, part);
            source.load_blocks(part, &locs)?;
        }
        let mut maps = DocumentPart::ALL.map(DataLocationMap::new);
        let mut copies = Vec::with_capacity(slots.len());
        for slot in slots {
            match self.copy_mapped(source, slot, &mut maps) {
                Ok(copy) => copies.push(copy),
                Err(err) => {
                    let mut inserted = copies;
                    inserted.sort_unstable_by_key(SlotEntry::timestamp);
                    self.remove_many(&inserted);
                    warn!(
                        bucket = %self.bucket,
                        from = %source.bucket,
                        rolled_back = inserted.len(),
                        error = %err,
                        "slotstore.copy_slots_failed"
                    );
                    return Err(err);
                }
            }
        }
        debug!(
            bucket = %self.bucket,
            from = %source.bucket,
            slots = copies.len(),
            header_blocks = maps[0].len(),
            body_blocks = maps[1].len(),
            "slotstore.copy_slots"
        );
        Ok(copies)
    }

    fn copy_mapped(
        &mut self,
        source: &DocumentSlotStore,
        slot: &SlotEntry,
        maps: &mut [DataLocationMap; 2],
    ) -> Result<SlotEntry> {
        let mut copy = *slot;
        for map in maps.iter_mut() {
            let part = map.part();
            let loc = map
                .get_or_create(
                    self.block_store.as_ref(),
                    source.block_store.as_ref(),
                    slot.location(part),
                )
                .map_err(self.block_err("copy_cache", part))?;
            copy.set_location(part, loc);
        }
        self.insert(copy)?;
        Ok(copy)
    }

    /// Aggregate bucket state, recomputed only after a mutation.
    pub fn bucket_summary(&mut self) -> BucketSummary {
        if self.has_flags(store_flags::BUCKET_INFO_OUTDATED) {
            self.summary = summary::compute(&self.slots, self.ready, self.active);
            self.flags &= !store_flags::BUCKET_INFO_OUTDATED;
            trace!(
                bucket = %self.bucket,
                checksum = self.summary.checksum,
                unique_count = self.summary.unique_count,
                "slotstore.bucket_summary"
            );
        }
        self.summary
    }

    /// Sets the readiness and activity carried in the summary.
    pub fn set_bucket_state(&mut self, ready: bool, active: bool) {
        self.ready = ready;
        self.active = active;
        self.summary.ready = ready;
        self.summary.active = active;
    }

    /// Materializes the document stored in `slot`.
    pub fn get_document(&self, slot: &SlotEntry, flag: GetFlag) -> Result<Document> {
        self.ensure_document_cached(slot, flag)?;
        let repo = self.env.type_repo();
        let mut doc = self
            .block_store
            .read_header(repo, slot.header_location())
            .map_err(self.block_err("read_header", DocumentPart::Header))?;
        if flag == GetFlag::All && slot.has_body() {
            self.block_store
                .read_body(repo, slot.body_location(), &mut doc)
                .map_err(self.block_err("read_body", DocumentPart::Body))?;
        }
        Ok(doc)
    }

    /// Identifier of the document stored in `slot`.
    pub fn get_document_id(&self, slot: &SlotEntry) -> Result<DocumentId> {
        self.ensure_document_cached(slot, GetFlag::HeaderOnly)?;
        self.read_document_id(slot)
    }

    /// Halts unless `slot` belongs to this store's bucket.
    ///
    /// The global id decides in the common case. Documents that rewrite
    /// their global id fall back to the identifier in the header.
    pub fn assert_contained_in_bucket(&self, slot: &SlotEntry) -> Result<()> {
        let gid = slot.global_id();
        if self.bucket.contains_key(gid.bucket_key()) {
            return Ok(());
        }
        let id = self.get_document_id(slot)?;
        if self.bucket.contains_key(id.bucket_key(&gid)) {
            return Ok(());
        }
        fatal!(self.bucket, "{} for document {} does not belong in bucket", slot, id)
    }

    /// Loads the parts of `slot` that `flag` asks for.
    pub fn ensure_document_cached(&self, slot: &SlotEntry, flag: GetFlag) -> Result<()> {
        if !self.has_flags(store_flags::FILE_EXISTS) {
            return Ok(());
        }
        let mut parts = vec![DocumentPart::Header];
        if flag == GetFlag::All {
            parts.push(DocumentPart::Body);
        }
        for part in parts {
            let locs = uncached_locations(self.block_store.as_ref(), std::slice::from_ref(slot), part);
            self.load_blocks(part, &locs)?;
        }
        Ok(())
    }

    /// Loads every header block, and every body block if `include_body`.
    pub fn ensure_entries_cached(&mut self, include_body: bool) -> Result<()> {
        self.ensure_header_block_cached()?;
        if include_body {
            self.ensure_body_block_cached()?;
        }
        Ok(())
    }

    /// Loads every header block referenced by a slot.
    pub fn ensure_header_block_cached(&mut self) -> Result<()> {
        self.ensure_part_cached(DocumentPart::Header, store_flags::HEADER_BLOCK_CACHED)
    }

    /// Loads every body block referenced by a slot.
    pub fn ensure_body_block_cached(&mut self) -> Result<()> {
        self.ensure_part_cached(DocumentPart::Body, store_flags::BODY_BLOCK_CACHED)
    }

    /// Returns `true` if the given part of `slot` is available without I/O.
    pub fn part_cached(&self, slot: &SlotEntry, part: DocumentPart) -> bool {
        self.block_store.is_cached(slot.location(part), part)
    }

    /// Serialized size of the given part of `slot`.
    pub fn serialized_size(&self, slot: &SlotEntry, part: DocumentPart) -> u32 {
        self.block_store.serialized_size(part, slot.location(part))
    }

    /// Drops cached content of persisted blocks for `part`.
    pub fn clear_cache(&mut self, part: DocumentPart) {
        self.block_store.clear(part);
        self.flags &= !match part {
            DocumentPart::Header => store_flags::HEADER_BLOCK_CACHED,
            DocumentPart::Body => store_flags::BODY_BLOCK_CACHED,
        };
        trace!(bucket = %self.bucket, %part, "slotstore.clear_cache");
    }

    /// Removes history the retention policy no longer requires.
    ///
    /// Returns `true` if any slot was removed.
    pub fn compact(&mut self, cfg: &CompactionCfg, now: Timestamp) -> Result<bool> {
        let compactor = Compactor::new(now, cfg);
        let removable = compactor.find_removable(self)?;
        if removable.is_empty() {
            return Ok(false);
        }
        self.remove_many(&removable);
        info!(
            bucket = %self.bucket,
            removed = removable.len(),
            remaining = self.slots.len(),
            revert_point = %compactor.revert_point(),
            keep_remove_point = %compactor.keep_remove_point(),
            "slotstore.compact"
        );
        Ok(true)
    }

    /// Compacts using the environment's clock and retention policy.
    pub fn compact_now(&mut self) -> Result<bool> {
        let cfg = self.env.options().compaction.clone();
        let now = self.env.now();
        self.compact(&cfg, now)
    }

    /// Persists the slots through the block store.
    ///
    /// Outdated checksums are refreshed and in-memory alteration marks are
    /// cleared first. The block store is closed afterwards in every case.
    /// Returns `true` if anything was written.
    pub fn flush(&mut self, mode: FlushMode) -> Result<bool> {
        let result = self.persist(mode);
        self.block_store.close();
        result
    }

    fn persist(&mut self, mode: FlushMode) -> Result<bool> {
        if mode == FlushMode::IfAltered && !self.has_flags(store_flags::SLOTS_ALTERED) {
            return Ok(false);
        }
        let mut refreshed = self.slots.clone();
        let mut checksums = 0usize;
        for slot in &mut refreshed {
            if slot.refresh_checksum() {
                checksums += 1;
            }
            slot.clear_flags(flags::ALTERED_IN_MEMORY);
        }
        if let Err(err) = self.block_store.flush(self.bucket, &refreshed) {
            warn!(bucket = %self.bucket, error = %err, "slotstore.flush_failed");
            return Err(err);
        }
        self.slots = refreshed;
        self.flags |= store_flags::FILE_EXISTS;
        self.flags &= !store_flags::SLOTS_ALTERED;
        debug!(
            bucket = %self.bucket,
            slots = self.slots.len(),
            checksums,
            "slotstore.flush"
        );
        Ok(true)
    }

    /// Rebinds the store to another block store holding the same blocks.
    pub fn move_to(&mut self, block_store: Arc<dyn BlockStore>) {
        self.block_store = block_store;
        self.flags &= !(store_flags::FILE_EXISTS
            | store_flags::HEADER_BLOCK_CACHED
            | store_flags::BODY_BLOCK_CACHED);
        if self.block_store.file_exists() {
            self.flags |= store_flags::FILE_EXISTS;
        }
        debug!(bucket = %self.bucket, slots = self.slots.len(), "slotstore.move");
    }

    /// Every slot passing `opts`, newest first.
    pub fn iter(&self, opts: IterOptions) -> SlotIter<'_> {
        SlotIter::new(
            &self.slots,
            SlotCursor::all(opts, self.slots.len(), self.generation),
        )
    }

    /// The newest slot per global id, newest first.
    ///
    /// Slots are deduplicated after filtering, so with tombstones excluded
    /// a removed document still yields its newest put. This is not a
    /// listing of live documents.
    pub fn iter_latest(&self, opts: IterOptions) -> SlotIter<'_> {
        SlotIter::new(
            &self.slots,
            SlotCursor::latest(opts, self.slots.len(), self.generation),
        )
    }

    /// Continues an iteration from a detached cursor.
    ///
    /// The store must not have been mutated since the cursor was taken.
    pub fn resume(&self, cursor: SlotCursor) -> SlotIter<'_> {
        debug_assert_eq!(
            cursor.generation(),
            self.generation,
            "slot cursor resumed after the store was mutated"
        );
        SlotIter::new(&self.slots, cursor.clamped(self.slots.len()))
    }

    pub(crate) fn read_document_id(&self, slot: &SlotEntry) -> Result<DocumentId> {
        self.block_store
            .read_identifier(slot.header_location())
            .map_err(self.block_err("read_identifier", DocumentPart::Header))
    }

    fn ensure_part_cached(&mut self, part: DocumentPart, flag: u8) -> Result<()> {
        if self.has_flags(flag) || !self.has_flags(store_flags::FILE_EXISTS) {
            return Ok(());
        }
        let locs = uncached_locations(self.block_store.as_ref(), &self.slots, part);
        self.load_blocks(part, &locs)?;
        self.flags |= flag;
        Ok(())
    }

    fn load_blocks(&self, part: DocumentPart, locs: &[DataLocation]) -> Result<()> {
        if locs.is_empty() || !self.has_flags(store_flags::FILE_EXISTS) {
            return Ok(());
        }
        self.block_store
            .ensure_cached(&self.env, part, locs)
            .map_err(self.block_err("ensure_cached", part))?;
        trace!(bucket = %self.bucket, %part, blocks = locs.len(), "slotstore.cache_load");
        Ok(())
    }

    fn fully_persisted(&self, slot: &SlotEntry) -> bool {
        DocumentPart::ALL
            .iter()
            .all(|part| self.block_store.is_persisted(slot.location(*part), *part))
    }

    fn check_disk_space(&self) -> Result<()> {
        let limit = self.env.options().disk_full_factor;
        let fill_ratio = self.env.disk_fill_ratio()?;
        if fill_ratio >= limit {
            warn!(bucket = %self.bucket, fill_ratio, limit, "slotstore.disk_full");
            return Err(StoreError::NoSpace { fill_ratio, limit });
        }
        Ok(())
    }

    fn position_of(&self, timestamp: Timestamp) -> std::result::Result<usize, usize> {
        self.slots
            .binary_search_by_key(&timestamp, SlotEntry::timestamp)
    }

    fn mark_mutated(&mut self) {
        self.flags |= store_flags::BUCKET_INFO_OUTDATED | store_flags::SLOTS_ALTERED;
        self.generation = self.generation.wrapping_add(1);
    }

    fn block_err(
        &self,
        op: &'static str,
        part: DocumentPart,
    ) -> impl FnOnce(StoreError) -> StoreError {
        let bucket = self.bucket;
        move |source| StoreError::block_store(op, bucket, part, source)
    }
}

impl PartialEq for DocumentSlotStore {
    fn eq(&self, other: &Self) -> bool {
        self.bucket == other.bucket && self.slots == other.slots
    }
}

impl fmt::Debug for DocumentSlotStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSlotStore")
            .field("bucket", &self.bucket)
            .field("slots", &self.slots.len())
            .field("flags", &format_args!("0x{:02x}", self.flags))
            .field("generation", &self.generation)
            .finish()
    }
}

/// Distinct, non-empty locations of `part` that `block_store` has not cached.
fn uncached_locations(
    block_store: &dyn BlockStore,
    slots: &[SlotEntry],
    part: DocumentPart,
) -> Vec<DataLocation> {
    let mut locs: Vec<DataLocation> = slots
        .iter()
        .map(|slot| slot.location(part))
        .filter(|loc| !loc.is_empty() && !block_store.is_cached(*loc, part))
        .collect();
    locs.sort_unstable();
    locs.dedup();
    locs
}
