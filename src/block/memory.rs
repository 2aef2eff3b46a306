use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::BlockStore;
use crate::document::{Document, DocumentTypeRepo};
use crate::env::StoreEnv;
use crate::slot::SlotEntry;
use crate::types::{
    BucketId, DataLocation, DocumentId, DocumentPart, GlobalId, Result, StoreError,
};

/// I/O counters for a [`MemoryBlockStore`].
#[derive(Default)]
pub struct BlockStoreMetrics {
    blocks_read: AtomicU64,
    bytes_read: AtomicU64,
    blocks_written: AtomicU64,
    bytes_written: AtomicU64,
    cache_load_calls: AtomicU64,
    closes: AtomicU64,
}

/// Snapshot of block store counters at a point in time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BlockStoreMetricsSnapshot {
    /// Blocks read from the file into the cache.
    pub blocks_read: u64,
    /// Bytes read from the file.
    pub bytes_read: u64,
    /// Blocks written to the file.
    pub blocks_written: u64,
    /// Bytes written to the file.
    pub bytes_written: u64,
    /// `ensure_cached` calls that had to read at least one block.
    pub cache_load_calls: u64,
    /// Number of `close` calls.
    pub closes: u64,
}

impl BlockStoreMetrics {
    /// Creates a snapshot of the current counters.
    pub fn snapshot(&self) -> BlockStoreMetricsSnapshot {
        BlockStoreMetricsSnapshot {
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            blocks_written: self.blocks_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            cache_load_calls: self.cache_load_calls.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
        }
    }

    fn add_read(&self, bytes: u64) {
        self.blocks_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    fn add_written(&self, bytes: u64) {
        self.blocks_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }
}

#[derive(Serialize, Deserialize)]
struct HeaderRecord {
    id: DocumentId,
    doc_type: String,
    gid: GlobalId,
    fields: BTreeMap<String, String>,
}

#[derive(Default)]
struct SimulatedFile {
    exists: bool,
    parts: [Vec<u8>; 2],
    slots: Vec<SlotEntry>,
}

#[derive(Default)]
struct CacheState {
    blocks: [FxHashMap<DataLocation, Vec<u8>>; 2],
    next_pos: [u32; 2],
}

fn part_index(part: DocumentPart) -> usize {
    match part {
        DocumentPart::Header => 0,
        DocumentPart::Body => 1,
    }
}

/// In-process block store over a simulated bucket file.
///
/// Blocks are appended to a per-part address space and cached until
/// [`BlockStore::flush`] writes them to the file. [`MemoryBlockStore::reopen`]
/// yields a handle over the same file with a cold cache.
pub struct MemoryBlockStore {
    file: Arc<Mutex<SimulatedFile>>,
    cache: Mutex<CacheState>,
    fail_next_read: AtomicBool,
    metrics: Arc<BlockStoreMetrics>,
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlockStore {
    /// Creates a store whose file does not exist yet.
    pub fn new() -> Self {
        Self::over(Arc::new(Mutex::new(SimulatedFile::default())))
    }

    fn over(file: Arc<Mutex<SimulatedFile>>) -> Self {
        let next_pos = {
            let guard = file.lock();
            [guard.parts[0].len() as u32, guard.parts[1].len() as u32]
        };
        Self {
            file,
            cache: Mutex::new(CacheState {
                next_pos,
                ..CacheState::default()
            }),
            fail_next_read: AtomicBool::new(false),
            metrics: Arc::new(BlockStoreMetrics::default()),
        }
    }

    /// Opens a second handle on the same file with an empty cache.
    pub fn reopen(&self) -> Self {
        Self::over(Arc::clone(&self.file))
    }

    /// Makes the next file read fail with an I/O error.
    pub fn fail_next_read(&self) {
        self.fail_next_read.store(true, Ordering::Relaxed);
    }

    /// Returns the I/O counters.
    pub fn metrics(&self) -> Arc<BlockStoreMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Number of cached blocks for `part`.
    pub fn cached_block_count(&self, part: DocumentPart) -> usize {
        self.cache.lock().blocks[part_index(part)].len()
    }

    fn append(&self, part: DocumentPart, bytes: Vec<u8>) -> Result<DataLocation> {
        let size =
            u32::try_from(bytes.len()).map_err(|_| StoreError::Invalid("block larger than 4GB"))?;
        let mut cache = self.cache.lock();
        let idx = part_index(part);
        let pos = cache.next_pos[idx];
        let next = pos
            .checked_add(size)
            .filter(|end| *end != u32::MAX)
            .ok_or(StoreError::Invalid("block store address space exhausted"))?;
        cache.next_pos[idx] = next;
        let loc = DataLocation::new(pos, size);
        cache.blocks[idx].insert(loc, bytes);
        trace!(%part, pos, size, "blockstore.append");
        Ok(loc)
    }

    fn cached(&self, part: DocumentPart, loc: DataLocation) -> Result<Vec<u8>> {
        self.cache.lock().blocks[part_index(part)]
            .get(&loc)
            .cloned()
            .ok_or(StoreError::Corruption("block not cached"))
    }

    fn decode_header(&self, loc: DataLocation) -> Result<HeaderRecord> {
        let bytes = self.cached(DocumentPart::Header, loc)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl BlockStore for MemoryBlockStore {
    fn file_exists(&self) -> bool {
        self.file.lock().exists
    }

    fn add_header(&self, doc: &Document) -> Result<DataLocation> {
        let record = HeaderRecord {
            id: doc.id.clone(),
            doc_type: doc.doc_type.clone(),
            gid: doc.gid,
            fields: doc.header.clone(),
        };
        self.append(DocumentPart::Header, serde_json::to_vec(&record)?)
    }

    fn add_body(&self, doc: &Document) -> Result<DataLocation> {
        if !doc.has_body() {
            return Ok(DataLocation::empty());
        }
        self.append(DocumentPart::Body, serde_json::to_vec(&doc.body)?)
    }

    fn add_identifier_only_header(
        &self,
        id: &DocumentId,
        _repo: &DocumentTypeRepo,
    ) -> Result<DataLocation> {
        self.add_header(&Document::identifier_only(id.clone()))
    }

    fn read_header(&self, repo: &DocumentTypeRepo, loc: DataLocation) -> Result<Document> {
        let record = self.decode_header(loc)?;
        let doc = Document {
            id: record.id,
            doc_type: record.doc_type,
            gid: record.gid,
            header: record.fields,
            body: BTreeMap::new(),
        };
        repo.check(&doc)?;
        Ok(doc)
    }

    fn read_body(
        &self,
        _repo: &DocumentTypeRepo,
        loc: DataLocation,
        doc: &mut Document,
    ) -> Result<()> {
        if loc.is_empty() {
            return Ok(());
        }
        let bytes = self.cached(DocumentPart::Body, loc)?;
        doc.body = serde_json::from_slice(&bytes)?;
        Ok(())
    }

    fn read_identifier(&self, loc: DataLocation) -> Result<DocumentId> {
        Ok(self.decode_header(loc)?.id)
    }

    fn ensure_cached(
        &self,
        _env: &StoreEnv,
        part: DocumentPart,
        locs: &[DataLocation],
    ) -> Result<()> {
        let idx = part_index(part);
        let missing: Vec<DataLocation> = {
            let cache = self.cache.lock();
            locs.iter()
                .copied()
                .filter(|loc| !loc.is_empty() && !cache.blocks[idx].contains_key(loc))
                .collect()
        };
        if missing.is_empty() {
            return Ok(());
        }
        if self.fail_next_read.swap(false, Ordering::Relaxed) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "simulated read failure",
            )));
        }
        let file = self.file.lock();
        let mut loaded = Vec::with_capacity(missing.len());
        for loc in missing {
            let start = loc.pos as usize;
            let end = loc.end() as usize;
            let bytes = file.parts[idx]
                .get(start..end)
                .ok_or(StoreError::Corruption("block beyond end of file"))?;
            self.metrics.add_read(u64::from(loc.size));
            loaded.push((loc, bytes.to_vec()));
        }
        drop(file);
        self.metrics.cache_load_calls.fetch_add(1, Ordering::Relaxed);
        let mut cache = self.cache.lock();
        trace!(%part, blocks = loaded.len(), "blockstore.ensure_cached");
        cache.blocks[idx].extend(loaded);
        Ok(())
    }

    fn is_cached(&self, loc: DataLocation, part: DocumentPart) -> bool {
        loc.is_empty() || self.cache.lock().blocks[part_index(part)].contains_key(&loc)
    }

    fn is_persisted(&self, loc: DataLocation, part: DocumentPart) -> bool {
        if loc.is_empty() {
            return true;
        }
        let file = self.file.lock();
        file.exists && loc.end() <= file.parts[part_index(part)].len() as u64
    }

    fn serialized_size(&self, _part: DocumentPart, loc: DataLocation) -> u32 {
        loc.size
    }

    fn cached_bytes(&self, part: DocumentPart, loc: DataLocation) -> Result<Vec<u8>> {
        if loc.is_empty() {
            return Ok(Vec::new());
        }
        self.cached(part, loc)
    }

    fn copy_cache(
        &self,
        source: &dyn BlockStore,
        part: DocumentPart,
        loc: DataLocation,
    ) -> Result<DataLocation> {
        if loc.is_empty() {
            return Ok(DataLocation::empty());
        }
        let bytes = source.cached_bytes(part, loc)?;
        self.append(part, bytes)
    }

    fn load_slots(&self) -> Result<Vec<SlotEntry>> {
        let file = self.file.lock();
        if !file.exists {
            return Err(StoreError::NotFound);
        }
        Ok(file.slots.clone())
    }

    fn flush(&self, bucket: BucketId, slots: &[SlotEntry]) -> Result<()> {
        let cache = self.cache.lock();
        let mut file = self.file.lock();
        for slot in slots {
            for part in DocumentPart::ALL {
                let loc = slot.location(part);
                let idx = part_index(part);
                if loc.is_empty() || loc.end() <= file.parts[idx].len() as u64 && file.exists {
                    continue;
                }
                let bytes = cache.blocks[idx]
                    .get(&loc)
                    .ok_or(StoreError::Corruption("unpersisted block missing from cache"))?;
                let data = &mut file.parts[idx];
                let end = loc.end() as usize;
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[loc.pos as usize..end].copy_from_slice(bytes);
                self.metrics.add_written(u64::from(loc.size));
            }
        }
        file.slots = slots.to_vec();
        file.exists = true;
        trace!(%bucket, slots = slots.len(), "blockstore.flush");
        Ok(())
    }

    fn clear(&self, part: DocumentPart) {
        let idx = part_index(part);
        let file = self.file.lock();
        let persisted_len = if file.exists {
            file.parts[idx].len() as u64
        } else {
            0
        };
        drop(file);
        self.cache.lock().blocks[idx].retain(|loc, _| loc.end() > persisted_len);
    }

    fn close(&self) {
        self.metrics.closes.fetch_add(1, Ordering::Relaxed);
    }
}
