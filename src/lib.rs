//! Versioned document slot store for a single storage bucket.
//!
//! A [`DocumentSlotStore`] keeps every put, update and remove of a bucket as
//! a timestamp-ordered [`SlotEntry`] and reads document content through a
//! [`BlockStore`]. History is pruned by the [`Compactor`].

#![warn(missing_docs)]

pub mod block;
pub mod document;
pub mod env;
pub mod slot;
pub mod store;
pub mod types;

pub use block::{BlockStore, MemoryBlockStore};
pub use document::{Document, DocumentTypeRepo, GetFlag};
pub use env::{CompactionCfg, StoreEnv, StoreOptions};
pub use slot::{DataLocationMap, SlotEntry};
pub use store::{
    BucketSummary, Compactor, DocumentSlotStore, FlushMode, IterOptions, RemoveKind, SlotCursor,
    SlotIter,
};
pub use types::{BucketId, DataLocation, DocumentId, GlobalId, Result, StoreError, Timestamp};
