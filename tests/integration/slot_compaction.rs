#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use docslot::{
    block::{BlockStore, MemoryBlockStore},
    document::{Document, DocumentTypeRepo},
    env::{CompactionCfg, ManualClock, StoreEnv, StoreOptions},
    store::{DocumentSlotStore, FlushMode},
    types::{BucketId, DocumentId, GlobalId, Result, Timestamp},
};

fn doc(user: &str) -> Document {
    Document::new(DocumentId::new(format!("id:ns:music::{user}")), "music")
        .with_header_field("title", user)
        .with_body_field("lyrics", "tra la")
}

fn env_with_clock(clock: Arc<ManualClock>, cfg: CompactionCfg) -> Arc<StoreEnv> {
    Arc::new(
        StoreEnv::new(
            StoreOptions::default().compaction(cfg),
            DocumentTypeRepo::with_types(["music"]),
        )
        .with_clock(clock),
    )
}

fn store_with(blocks: Arc<dyn BlockStore>, env: Arc<StoreEnv>) -> DocumentSlotStore {
    DocumentSlotStore::new(BucketId::new(0, 0), blocks, env)
}

fn timestamps(store: &DocumentSlotStore) -> Vec<u64> {
    store.slots().iter().map(|s| s.timestamp().0).collect()
}

fn micros(n: u64) -> Duration {
    Duration::from_micros(n)
}

#[test]
fn strict_policy_empties_removed_document() -> Result<()> {
    let clock = Arc::new(ManualClock::new(Timestamp(100)));
    let cfg = CompactionCfg::default()
        .max_document_versions(1)
        .revert_time_period(Duration::ZERO)
        .keep_remove_time_period(Duration::ZERO);
    let mut store = store_with(Arc::new(MemoryBlockStore::new()), env_with_clock(clock, cfg.clone()));

    store.add_put(&doc("a"), Timestamp(10))?;
    let v2 = store.add_put(&doc("a"), Timestamp(20))?;
    store.add_remove(&v2, Timestamp(30))?;

    assert!(store.compact(&cfg, Timestamp(100))?);
    assert!(store.is_empty());
    let summary = store.bucket_summary();
    assert_eq!(summary.entry_count, 0);
    assert_eq!(summary.used_size, 0);
    assert!(!store.compact(&cfg, Timestamp(100))?, "nothing left to remove");
    Ok(())
}

#[test]
fn compact_now_uses_environment_clock_and_policy() -> Result<()> {
    let clock = Arc::new(ManualClock::new(Timestamp(1_000)));
    let cfg = CompactionCfg::default()
        .max_document_versions(10)
        .revert_time_period(micros(100))
        .keep_remove_time_period(micros(800));
    let env = env_with_clock(clock.clone(), cfg);
    let mut store = store_with(Arc::new(MemoryBlockStore::new()), env.clone());

    store.add_put(&doc("a"), Timestamp(920))?;
    store.add_put(&doc("a"), Timestamp(950))?;
    let b = store.add_put(&doc("b"), Timestamp(300))?;
    store.add_remove(&b, Timestamp(400))?;

    assert!(store.compact_now()?);
    assert_eq!(timestamps(&store), vec![400, 920, 950], "superseded put of b dropped");

    clock.set(Timestamp(1_000_000));
    assert!(store.compact_now()?);
    assert_eq!(timestamps(&store), vec![950], "old tombstone and history dropped");

    env.update_options(|opts| opts.compaction = opts.compaction.clone().max_document_versions(1));
    assert!(!store.compact_now()?);
    Ok(())
}

#[test]
fn recent_history_survives_revert_window() -> Result<()> {
    let cfg = CompactionCfg::default()
        .max_document_versions(3)
        .revert_time_period(micros(1_000));
    let clock = Arc::new(ManualClock::new(Timestamp(2_000)));
    let mut store = store_with(Arc::new(MemoryBlockStore::new()), env_with_clock(clock, cfg.clone()));
    for ts in [1_100, 1_200, 1_300, 1_400] {
        store.add_put(&doc("a"), Timestamp(ts))?;
    }
    assert!(store.compact(&cfg, Timestamp(2_000))?);
    assert_eq!(timestamps(&store), vec![1_200, 1_300, 1_400], "only the version cap applies");
    Ok(())
}

#[test]
fn compaction_loads_headers_of_a_cold_store() -> Result<()> {
    let blocks = Arc::new(MemoryBlockStore::new());
    let cfg = CompactionCfg::default()
        .max_document_versions(1)
        .revert_time_period(Duration::ZERO);
    let clock = Arc::new(ManualClock::new(Timestamp(100)));
    let env = env_with_clock(clock, cfg.clone());
    {
        let mut store = store_with(blocks.clone(), env.clone());
        for ts in [10, 20, 30] {
            store.add_put(&doc("a"), Timestamp(ts))?;
        }
        store.add_put(&doc("b"), Timestamp(40))?;
        store.flush(FlushMode::IfAltered)?;
    }

    let cold = Arc::new(blocks.reopen());
    let handle: Arc<dyn BlockStore> = cold.clone();
    let mut store = DocumentSlotStore::open(BucketId::new(0, 0), handle, env)?;
    assert!(store.compact(&cfg, Timestamp(100))?);
    assert_eq!(timestamps(&store), vec![30, 40]);
    let metrics = cold.metrics().snapshot();
    assert_eq!(metrics.cache_load_calls, 1, "headers loaded in one batch");
    assert_eq!(metrics.blocks_read, 4);
    Ok(())
}

#[test]
fn colliding_global_ids_keep_each_document() -> Result<()> {
    let cfg = CompactionCfg::default()
        .max_document_versions(1)
        .revert_time_period(Duration::ZERO);
    let clock = Arc::new(ManualClock::new(Timestamp(100)));
    let mut store = store_with(Arc::new(MemoryBlockStore::new()), env_with_clock(clock, cfg.clone()));
    let shared = GlobalId::from_parts(9, 9);
    store.add_put(&doc("x").with_global_id(shared), Timestamp(10))?;
    store.add_put(&doc("y").with_global_id(shared), Timestamp(20))?;
    store.add_put(&doc("x").with_global_id(shared), Timestamp(30))?;

    assert!(store.compact(&cfg, Timestamp(100))?);
    assert_eq!(timestamps(&store), vec![20, 30]);
    Ok(())
}
