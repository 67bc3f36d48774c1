//! Allocators on separate handles of one file store.

use std::collections::HashSet;
use std::sync::Arc;

use rangelink_core::{DiscardAuditSink, TokioTimeProvider};
use rangelink_range::{
    CounterConfig, ExtensionRetry, FileRangeRepository, NEXT_RANGE_ATTRIBUTE, RangeAllocator,
    RangeRepository, RecordDn,
};

fn record() -> RecordDn {
    RecordDn::compose("ou=certificateRepository,ou=ca", "o=pki-tomcat-CA")
}

fn member(path: &std::path::Path) -> RangeAllocator<TokioTimeProvider, FileRangeRepository> {
    let repository = FileRangeRepository::open(path, None).expect("open store");
    RangeAllocator::new(
        vec![CounterConfig::new("serial", record(), 16).with_low_water_mark(2)],
        repository,
        TokioTimeProvider::new(),
        ExtensionRetry::default(),
        Arc::new(DiscardAuditSink),
    )
    .expect("allocator")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_members_never_share_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ranges.json");
    FileRangeRepository::create(&path, None).expect("create store");

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let allocator = member(&path);
        tasks.push(tokio::spawn(async move {
            let mut values = Vec::new();
            for _ in 0..40 {
                values.push(allocator.allocate("serial").await.expect("allocate"));
            }
            values
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for value in task.await.expect("task") {
            assert!(seen.insert(value), "value {value} issued by two members");
        }
    }
    assert_eq!(seen.len(), 120);

    let store = FileRangeRepository::open(&path, None).expect("reopen");
    let pointer = store
        .read(&record(), NEXT_RANGE_ATTRIBUTE)
        .await
        .expect("read")
        .expect("pointer set");
    let pointer: u128 = pointer.parse().expect("numeric pointer");
    assert!(seen.iter().all(|value| *value < pointer));
}
