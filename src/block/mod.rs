#![forbid(unsafe_code)]

//! Block store collaborator: serializes document parts, caches them in
//! memory and persists them for one bucket.

use crate::document::{Document, DocumentTypeRepo};
use crate::env::StoreEnv;
use crate::slot::SlotEntry;
use crate::types::{BucketId, DataLocation, DocumentId, DocumentPart, Result};

mod memory;

pub use memory::{BlockStoreMetrics, BlockStoreMetricsSnapshot, MemoryBlockStore};

/// Storage backend for the serialized header and body blocks of one bucket.
///
/// Implementations synchronize internally; every method takes `&self` so a
/// handle can be shared as `Arc<dyn BlockStore>`.
pub trait BlockStore: Send + Sync {
    /// Returns `true` once the bucket has a physical file.
    fn file_exists(&self) -> bool;

    /// Serializes and caches the header of `doc`.
    fn add_header(&self, doc: &Document) -> Result<DataLocation>;

    /// Serializes and caches the body of `doc`; empty when it has no body.
    fn add_body(&self, doc: &Document) -> Result<DataLocation>;

    /// Caches a header holding nothing but `id`.
    fn add_identifier_only_header(
        &self,
        id: &DocumentId,
        repo: &DocumentTypeRepo,
    ) -> Result<DataLocation>;

    /// Decodes a cached header into a header-only document.
    fn read_header(&self, repo: &DocumentTypeRepo, loc: DataLocation) -> Result<Document>;

    /// Decodes a cached body into `doc`.
    fn read_body(&self, repo: &DocumentTypeRepo, loc: DataLocation, doc: &mut Document)
        -> Result<()>;

    /// Extracts the document identifier from a cached header.
    fn read_identifier(&self, loc: DataLocation) -> Result<DocumentId>;

    /// Loads the given blocks into the cache; already cached blocks are skipped.
    fn ensure_cached(&self, env: &StoreEnv, part: DocumentPart, locs: &[DataLocation])
        -> Result<()>;

    /// Returns `true` when the block is available without I/O.
    fn is_cached(&self, loc: DataLocation, part: DocumentPart) -> bool;

    /// Returns `true` when the block has been written to the file.
    fn is_persisted(&self, loc: DataLocation, part: DocumentPart) -> bool;

    /// Size of the serialized block.
    fn serialized_size(&self, part: DocumentPart, loc: DataLocation) -> u32;

    /// Raw bytes of a cached block.
    fn cached_bytes(&self, part: DocumentPart, loc: DataLocation) -> Result<Vec<u8>>;

    /// Copies a cached block from `source` into this store's cache.
    fn copy_cache(
        &self,
        source: &dyn BlockStore,
        part: DocumentPart,
        loc: DataLocation,
    ) -> Result<DataLocation>;

    /// Reads the persisted slot table.
    fn load_slots(&self) -> Result<Vec<SlotEntry>>;

    /// Persists every unpersisted block referenced by `slots` and the slot table.
    fn flush(&self, bucket: BucketId, slots: &[SlotEntry]) -> Result<()>;

    /// Drops cached copies of persisted blocks for `part`.
    fn clear(&self, part: DocumentPart);

    /// Releases file handles; the cache is kept.
    fn close(&self);
}
