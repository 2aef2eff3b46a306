#![allow(missing_docs)]

use std::sync::{Arc, Once};
use std::thread;

use docslot::{
    block::{BlockStore, MemoryBlockStore},
    document::{Document, DocumentTypeRepo, GetFlag},
    env::{StoreEnv, StoreOptions},
    slot::flags,
    store::{store_flags, DocumentSlotStore, FlushMode, IterOptions, RemoveKind},
    types::{BucketId, DataLocation, DocumentId, DocumentPart, GlobalId, Result, StoreError, Timestamp},
};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docslot=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn env() -> Arc<StoreEnv> {
    Arc::new(StoreEnv::new(
        StoreOptions::default(),
        DocumentTypeRepo::with_types(["music"]),
    ))
}

fn id(user: &str) -> DocumentId {
    DocumentId::new(format!("id:ns:music:n=1:{user}"))
}

fn doc(user: &str, version: &str) -> Document {
    Document::new(id(user), "music")
        .with_header_field("title", format!("{user}-{version}"))
        .with_body_field("lyrics", format!("verse {version}"))
}

fn bucket() -> BucketId {
    BucketId::new(8, 1)
}

fn new_store(blocks: &Arc<MemoryBlockStore>) -> DocumentSlotStore {
    let handle: Arc<dyn BlockStore> = blocks.clone();
    DocumentSlotStore::new(bucket(), handle, env())
}

#[test]
fn put_update_remove_scenario() -> Result<()> {
    init_tracing();
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);

    store.add_put(&doc("a", "v1"), Timestamp(10))?;
    let v2 = store.add_put(&doc("a", "v2"), Timestamp(20))?;
    store.add_remove(&v2, Timestamp(30))?;

    assert_eq!(store.slot_count(), 3);
    let at_20 = store.get_slot_at_time(Timestamp(20)).expect("slot at 20");
    assert_eq!(at_20.header_location(), v2.header_location());
    assert_eq!(
        store.get_slot_with_id(&id("a"), Timestamp(25))?,
        Some(v2),
        "newest version not after 25"
    );
    let latest = store.get_slot_with_id(&id("a"), Timestamp::ZERO)?.expect("latest");
    assert_eq!(latest.timestamp(), Timestamp(30));
    assert!(store.get_slot_with_id(&id("b"), Timestamp::ZERO)?.is_none());

    let summary = store.bucket_summary();
    assert_eq!(summary.unique_count, 0, "document is removed");
    assert_eq!(summary.unique_size, 0);
    assert_eq!(summary.entry_count, 3);
    assert!(store.verify_consistency().is_empty());
    Ok(())
}

#[test]
fn update_shares_body_and_documents_read_back() -> Result<()> {
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);
    let put = store.add_put(&doc("a", "v1"), Timestamp(10))?;
    let header = doc("a", "v2").header_only();
    let update = store.add_update(&header, &put, Timestamp(20))?;
    assert_eq!(update.body_location(), put.body_location());
    assert_ne!(update.header_location(), put.header_location());

    let full = store.get_document(&update, GetFlag::All)?;
    assert_eq!(full.header.get("title").map(String::as_str), Some("a-v2"));
    assert_eq!(full.body.get("lyrics").map(String::as_str), Some("verse v1"));

    let header_only = store.get_document(&update, GetFlag::HeaderOnly)?;
    assert!(header_only.body.is_empty());
    assert_eq!(store.get_document_id(&update)?, id("a"));
    Ok(())
}

#[test]
fn unrevertable_remove_for_unknown_document() -> Result<()> {
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);
    let revertable = store.add_remove_for_unknown(&id("x"), Timestamp(5), RemoveKind::Revertable)?;
    let unrevertable =
        store.add_remove_for_unknown(&id("y"), Timestamp(6), RemoveKind::Unrevertable)?;

    assert!(revertable.is_deleted() && !revertable.is_deleted_in_place());
    assert!(unrevertable.has_flags(flags::DELETED | flags::DELETED_IN_PLACE));
    for slot in [revertable, unrevertable] {
        assert!(slot.body_location().is_empty(), "tombstones carry no body");
        assert!(!slot.header_location().is_empty());
    }
    assert_eq!(store.get_document_id(&unrevertable)?, id("y"));
    let summary = store.bucket_summary();
    assert_eq!(summary.unique_count, 0);
    assert_eq!(summary.entry_count, 2);
    Ok(())
}

#[test]
fn flush_persists_and_reopen_loads_lazily() -> Result<()> {
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);
    let a = store.add_put(&doc("a", "v1"), Timestamp(10))?;
    store.add_put(&doc("b", "v1"), Timestamp(20))?;
    store.add_remove(&a, Timestamp(30))?;
    let before = store.bucket_summary();

    assert!(store.flush(FlushMode::IfAltered)?);
    assert!(store.has_flags(store_flags::FILE_EXISTS));
    assert!(!store.has_flags(store_flags::SLOTS_ALTERED));
    for slot in store.slots() {
        assert!(!slot.has_flags(flags::CHECKSUM_OUTDATED | flags::ALTERED_IN_MEMORY));
        assert_eq!(slot.checksum(), slot.calculate_checksum());
    }
    assert!(!store.flush(FlushMode::IfAltered)?, "nothing altered");
    assert!(store.flush(FlushMode::Always)?);
    assert_eq!(blocks.metrics().snapshot().closes, 3, "every flush closes");

    let cold = Arc::new(blocks.reopen());
    let handle: Arc<dyn BlockStore> = cold.clone();
    let mut reopened = DocumentSlotStore::open(bucket(), handle, env())?;
    assert_eq!(reopened.slots(), store.slots());
    assert_eq!(reopened.bucket_summary(), before);
    assert_eq!(cold.metrics().snapshot().blocks_read, 0, "content loads lazily");

    let slot = reopened.get_slot_at_time(Timestamp(20)).expect("slot");
    assert!(!reopened.part_cached(&slot, DocumentPart::Header));
    reopened.ensure_entries_cached(true)?;
    assert!(reopened.has_flags(store_flags::HEADER_BLOCK_CACHED | store_flags::BODY_BLOCK_CACHED));
    assert!(reopened.part_cached(&slot, DocumentPart::Body));
    let loads = cold.metrics().snapshot().cache_load_calls;
    assert_eq!(loads, 2, "one batched load per part");
    reopened.ensure_entries_cached(true)?;
    assert_eq!(cold.metrics().snapshot().cache_load_calls, loads);

    reopened.clear_cache(DocumentPart::Body);
    assert!(!reopened.has_flags(store_flags::BODY_BLOCK_CACHED));
    assert!(!reopened.part_cached(&slot, DocumentPart::Body));
    let doc = reopened.get_document(&slot, GetFlag::All)?;
    assert_eq!(doc.id, id("b"));
    Ok(())
}

#[test]
fn block_store_read_failure_is_recoverable() -> Result<()> {
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);
    let put = store.add_put(&doc("a", "v1"), Timestamp(10))?;
    store.flush(FlushMode::IfAltered)?;

    let cold = Arc::new(blocks.reopen());
    let handle: Arc<dyn BlockStore> = cold.clone();
    let reopened = DocumentSlotStore::open(bucket(), handle, env())?;
    cold.fail_next_read();
    match reopened.get_document(&put, GetFlag::All) {
        Err(StoreError::BlockStore { op, part, source, .. }) => {
            assert_eq!(op, "ensure_cached");
            assert_eq!(part, DocumentPart::Header);
            assert!(matches!(*source, StoreError::Io(_)));
        }
        other => panic!("expected wrapped block store error, got {other:?}"),
    }
    assert_eq!(reopened.get_document(&put, GetFlag::All)?.id, id("a"));
    Ok(())
}

#[test]
fn rewritten_global_id_passes_expensive_containment() -> Result<()> {
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);
    let rewritten = doc("r", "v1").with_global_id(GlobalId::from_parts(2, 42));
    let slot = store.add_put(&rewritten, Timestamp(10))?;
    assert!(!bucket().contains_key(slot.global_id().bucket_key()));
    store.assert_contained_in_bucket(&slot)?;
    Ok(())
}

#[test]
fn move_rebinds_without_touching_slots() -> Result<()> {
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);
    store.add_put(&doc("a", "v1"), Timestamp(10))?;
    store.flush(FlushMode::IfAltered)?;
    store.ensure_entries_cached(false)?;
    let slots = store.slots().to_vec();

    let moved: Arc<dyn BlockStore> = Arc::new(blocks.reopen());
    store.move_to(moved);
    assert_eq!(store.slots(), slots.as_slice());
    assert!(store.has_flags(store_flags::FILE_EXISTS));
    assert!(!store.has_flags(store_flags::HEADER_BLOCK_CACHED));
    assert_eq!(store.get_document_id(&slots[0])?, id("a"));
    Ok(())
}

#[test]
fn cursor_resumes_between_borrows() -> Result<()> {
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);
    for (ts, user) in [(10, "a"), (20, "b"), (30, "c")] {
        store.add_put(&doc(user, "v1"), Timestamp(ts))?;
    }
    let mut iter = store.iter(IterOptions::default());
    assert_eq!(iter.next().map(|s| s.timestamp()), Some(Timestamp(30)));
    let cursor = iter.into_cursor();
    assert_eq!(cursor.generation(), store.generation());

    let rest: Vec<Timestamp> = store.resume(cursor).map(|s| s.timestamp()).collect();
    assert_eq!(rest, vec![Timestamp(20), Timestamp(10)]);
    Ok(())
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "slot cursor resumed after the store was mutated")]
fn resuming_across_mutation_is_detected() {
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);
    let _ = store.add_put(&doc("a", "v1"), Timestamp(10));
    let cursor = store.iter(IterOptions::default()).into_cursor();
    let _ = store.add_put(&doc("b", "v1"), Timestamp(20));
    let _ = store.resume(cursor).count();
}

#[test]
fn store_moves_between_threads_under_caller_lock() -> Result<()> {
    let blocks = Arc::new(MemoryBlockStore::new());
    let shared = Arc::new(Mutex::new(new_store(&blocks)));
    let workers: Vec<_> = (0..4u64)
        .map(|worker| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || -> Result<()> {
                for i in 0..25u64 {
                    let ts = Timestamp(1 + worker + i * 4);
                    let mut store = shared.lock();
                    store.add_put(&doc(&format!("w{worker}-{i}"), "v1"), ts)?;
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked")?;
    }
    let mut store = shared.lock();
    assert_eq!(store.slot_count(), 100);
    assert!(store
        .slots()
        .windows(2)
        .all(|pair| pair[0].timestamp() < pair[1].timestamp()));
    assert_eq!(store.bucket_summary().unique_count, 100);
    Ok(())
}

#[test]
#[should_panic(expected = "fatal slot store corruption")]
fn slot_outside_bucket_is_fatal() {
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);
    let stranger = Document::new(DocumentId::new("id:ns:music:n=2:z"), "music");
    let _ = store.add_put(&stranger, Timestamp(10));
}

#[test]
#[should_panic(expected = "fatal slot store corruption")]
fn removing_unknown_slot_is_fatal() {
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);
    let put = store.add_put(&doc("a", "v1"), Timestamp(10)).expect("put");
    let mut copy = put;
    copy.set_checksum(put.checksum().wrapping_add(1));
    store.remove(&copy);
}

#[test]
#[should_panic(expected = "fatal slot store corruption")]
fn remove_many_out_of_order_is_fatal() {
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);
    let a = store.add_put(&doc("a", "v1"), Timestamp(10)).expect("put");
    let b = store.add_put(&doc("b", "v1"), Timestamp(20)).expect("put");
    store.remove_many(&[b, a]);
}

#[test]
fn remove_many_failure_leaves_store_untouched() {
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);
    let a = store.add_put(&doc("a", "v1"), Timestamp(10)).expect("put");
    let b = store.add_put(&doc("b", "v1"), Timestamp(20)).expect("put");
    let mut missing = b;
    missing.set_location(DocumentPart::Header, DataLocation::new(9_999, 1));
    let shared = Arc::new(Mutex::new(store));
    let worker = {
        let shared = Arc::clone(&shared);
        thread::spawn(move || shared.lock().remove_many(&[a, missing]))
    };
    assert!(worker.join().is_err(), "missing target halts");
    assert_eq!(shared.lock().slot_count(), 2);
}

#[test]
#[should_panic(expected = "fatal slot store corruption")]
fn modify_without_slot_is_fatal() {
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);
    let put = store.add_put(&doc("a", "v1"), Timestamp(10)).expect("put");
    store.remove(&put);
    store.modify(put);
}

#[test]
#[should_panic(expected = "fatal slot store corruption")]
fn update_reusing_missing_body_is_fatal() {
    let blocks = Arc::new(MemoryBlockStore::new());
    let mut store = new_store(&blocks);
    let put = store.add_put(&doc("a", "v1"), Timestamp(10)).expect("put");
    let tombstone = store.add_remove(&put, Timestamp(20)).expect("remove");
    let _ = store.add_update(&doc("a", "v2").header_only(), &tombstone, Timestamp(30));
}
