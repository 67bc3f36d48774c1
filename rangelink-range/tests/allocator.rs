//! Range allocation against a shared in-memory repository.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rangelink_core::{AuditEventKind, TokioTimeProvider};
use rangelink_range::{
    CounterConfig, ExtensionRetry, InMemoryRangeRepository, NEXT_RANGE_ATTRIBUTE, Range,
    RangeAllocator, RangeError, RangeRepository, RecordDn, ReplaceOutcome, RepositoryError,
};
use rangelink_sim::CapturingAuditSink;

type Allocator<R = InMemoryRangeRepository> = RangeAllocator<TokioTimeProvider, R>;

fn serial_record() -> RecordDn {
    RecordDn::compose("ou=certificateRepository,ou=ca", "o=pki-tomcat-CA")
}

fn serial(width: u128) -> CounterConfig {
    CounterConfig::new("serial", serial_record(), width)
}

fn fast_retry() -> ExtensionRetry {
    ExtensionRetry::default()
        .with_max_attempts(3)
        .with_backoff(Duration::from_millis(100), Duration::from_secs(1))
}

fn allocator<R: RangeRepository>(
    counters: Vec<CounterConfig>,
    repository: R,
    audit: Arc<CapturingAuditSink>,
) -> Allocator<R> {
    RangeAllocator::new(
        counters,
        repository,
        TokioTimeProvider::new(),
        fast_retry(),
        audit,
    )
    .expect("allocator")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocations_are_distinct() {
    let repo = InMemoryRangeRepository::new();
    let audit = Arc::new(CapturingAuditSink::new());
    let alloc = Arc::new(allocator(
        vec![serial(25).with_low_water_mark(5)],
        repo.clone(),
        audit,
    ));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let alloc = Arc::clone(&alloc);
        tasks.push(tokio::spawn(async move {
            let mut values = Vec::new();
            for _ in 0..50 {
                values.push(alloc.allocate("serial").await.expect("allocate"));
            }
            values
        }));
    }

    let mut all = HashSet::new();
    for task in tasks {
        let values = task.await.expect("task");
        // Each caller sees its own values in increasing order.
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        for value in values {
            assert!(all.insert(value), "value {value} issued twice");
        }
    }
    assert_eq!(all.len(), 400);
}

#[tokio::test]
async fn test_sequential_allocations_strictly_increase_across_extensions() {
    let audit = Arc::new(CapturingAuditSink::new());
    let alloc = allocator(
        vec![serial(10).with_low_water_mark(2)],
        InMemoryRangeRepository::new(),
        audit,
    );

    let mut previous = 0;
    for _ in 0..100 {
        let value = alloc.allocate("serial").await.expect("allocate");
        assert!(value > previous);
        previous = value;
    }
}

#[tokio::test]
async fn test_instances_sharing_repository_never_overlap() {
    let repo = InMemoryRangeRepository::new();
    let first = allocator(
        vec![serial(7).with_low_water_mark(1)],
        repo.clone(),
        Arc::new(CapturingAuditSink::new()),
    );
    let second = allocator(
        vec![serial(7).with_low_water_mark(1)],
        repo.clone(),
        Arc::new(CapturingAuditSink::new()),
    );

    let mut from_first = HashSet::new();
    let mut from_second = HashSet::new();
    for round in 0..60 {
        from_first.insert(first.allocate("serial").await.expect("first"));
        if round % 3 != 0 {
            from_second.insert(second.allocate("serial").await.expect("second"));
        }
    }
    second.force_extend("serial").await.expect("manual bump");
    for _ in 0..10 {
        from_second.insert(second.allocate("serial").await.expect("second"));
    }

    assert!(from_first.is_disjoint(&from_second));
    assert_eq!(from_first.len(), 60);
    assert_eq!(from_second.len(), 50);
}

#[tokio::test]
async fn test_low_water_mark_triggers_exactly_one_extension() {
    let repo = InMemoryRangeRepository::new();
    let audit = Arc::new(CapturingAuditSink::new());
    let alloc = allocator(
        vec![
            serial(100)
                .with_initial_range(1, 10)
                .with_origin(11)
                .with_low_water_mark(3),
        ],
        repo.clone(),
        audit.clone(),
    );

    for expected in 1..=7 {
        assert_eq!(alloc.allocate("serial").await.expect("allocate"), expected);
    }
    assert_eq!(repo.replace_count(), 0);

    // Three values left: the next call extends once before answering.
    assert_eq!(alloc.allocate("serial").await.expect("allocate"), 8);
    assert_eq!(repo.replace_count(), 1);
    assert_eq!(
        repo.get(&serial_record(), NEXT_RANGE_ATTRIBUTE).as_deref(),
        Some("111")
    );

    for expected in 9..=30 {
        assert_eq!(alloc.allocate("serial").await.expect("allocate"), expected);
    }
    assert_eq!(repo.replace_count(), 1);
    assert_eq!(audit.count(AuditEventKind::RangeExtended), 1);

    let local = alloc.local_counter("serial").await.expect("counter");
    assert_eq!(local.owned().count(), 1);
    assert_eq!(local.next_value(), Some(31));
}

#[tokio::test]
async fn test_ensure_capacity_is_idempotent() {
    let repo = InMemoryRangeRepository::new();
    let alloc = allocator(
        vec![serial(100).with_low_water_mark(10)],
        repo.clone(),
        Arc::new(CapturingAuditSink::new()),
    );

    let claimed = alloc.ensure_capacity("serial").await.expect("extend");
    assert_eq!(claimed.map(|r| (r.start, r.end)), Some((1, 100)));
    assert_eq!(alloc.ensure_capacity("serial").await.expect("no-op"), None);
    assert_eq!(repo.replace_count(), 1);
    assert_eq!(alloc.try_allocate("serial").await.expect("local"), 1);
}

#[tokio::test]
async fn test_try_allocate_never_extends() {
    let repo = InMemoryRangeRepository::new();
    let alloc = allocator(
        vec![serial(100).with_initial_range(1, 2).with_origin(3)],
        repo.clone(),
        Arc::new(CapturingAuditSink::new()),
    );

    assert_eq!(alloc.try_allocate("serial").await.expect("1"), 1);
    assert_eq!(alloc.try_allocate("serial").await.expect("2"), 2);
    let err = alloc.try_allocate("serial").await.expect_err("exhausted");
    assert!(matches!(err, RangeError::RangeExhausted { ref counter } if counter == "serial"));
    assert_eq!(repo.read_count(), 0);
}

#[tokio::test]
async fn test_force_extend_twice_advances_two_widths() {
    let repo = InMemoryRangeRepository::new();
    let audit = Arc::new(CapturingAuditSink::new());
    let alloc = allocator(vec![serial(1000)], repo.clone(), audit.clone());

    let first = alloc.force_extend("serial").await.expect("first bump");
    let second = alloc.force_extend("serial").await.expect("second bump");

    assert_eq!((first.start, first.end), (1, 1000));
    assert_eq!((second.start, second.end), (1001, 2000));
    assert!(!first.overlaps(&second));
    assert_eq!(
        repo.get(&serial_record(), NEXT_RANGE_ATTRIBUTE).as_deref(),
        Some("2001")
    );
    assert_eq!(audit.count(AuditEventKind::RangeExtended), 2);
}

#[tokio::test]
async fn test_manual_increment_of_one() {
    let repo = InMemoryRangeRepository::new();
    repo.set(&serial_record(), NEXT_RANGE_ATTRIBUTE, "5000");
    let alloc = allocator(
        vec![serial(1000).with_manual_increment(1)],
        repo.clone(),
        Arc::new(CapturingAuditSink::new()),
    );

    let claimed = alloc.force_extend("serial").await.expect("bump");
    assert_eq!((claimed.start, claimed.end), (5000, 5000));
    assert_eq!(
        repo.get(&serial_record(), NEXT_RANGE_ATTRIBUTE).as_deref(),
        Some("5001")
    );
}

#[tokio::test(start_paused = true)]
async fn test_outage_is_retried_with_backoff() {
    let repo = InMemoryRangeRepository::new();
    repo.fail_next(2);
    let audit = Arc::new(CapturingAuditSink::new());
    let alloc = allocator(vec![serial(10)], repo.clone(), audit.clone());

    let started = tokio::time::Instant::now();
    assert_eq!(alloc.allocate("serial").await.expect("allocate"), 1);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(repo.read_count(), 3);
    assert_eq!(audit.count(AuditEventKind::RangeExtended), 1);
    assert_eq!(audit.count(AuditEventKind::RangeExtensionFailed), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_fails_the_allocation() {
    let repo = InMemoryRangeRepository::new();
    repo.fail_next(100);
    let audit = Arc::new(CapturingAuditSink::new());
    let alloc = allocator(vec![serial(10)], repo.clone(), audit.clone());

    let err = alloc.allocate("serial").await.expect_err("repository down");
    match err {
        RangeError::RangeExtensionFailed {
            counter, attempts, ..
        } => {
            assert_eq!(counter, "serial");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected RangeExtensionFailed, got {other:?}"),
    }
    assert_eq!(audit.count(AuditEventKind::RangeExtensionFailed), 1);
    let failed = &audit.events_of(AuditEventKind::RangeExtensionFailed)[0];
    assert_eq!(failed.peer_address.as_deref(), Some(serial_record().as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_failed_top_up_fails_allocation() {
    let repo = InMemoryRangeRepository::new();
    repo.fail_next(100);
    let audit = Arc::new(CapturingAuditSink::new());
    let alloc = allocator(
        vec![
            serial(10)
                .with_initial_range(1, 5)
                .with_origin(6)
                .with_low_water_mark(10),
        ],
        repo.clone(),
        audit.clone(),
    );

    let err = alloc.allocate("serial").await.expect_err("top-up failed");
    assert!(matches!(err, RangeError::RangeExtensionFailed { attempts: 3, .. }));
    assert_eq!(audit.count(AuditEventKind::RangeExtensionFailed), 1);

    // The local range is untouched and still drains without the repository.
    let reads = repo.read_count();
    assert_eq!(alloc.try_allocate("serial").await.expect("local"), 1);
    assert_eq!(alloc.try_allocate("serial").await.expect("local"), 2);
    assert_eq!(repo.read_count(), reads);
}

#[tokio::test]
async fn test_corrupt_pointer_is_not_retried() {
    let repo = InMemoryRangeRepository::new();
    repo.set(&serial_record(), NEXT_RANGE_ATTRIBUTE, "0x1f");
    let alloc = allocator(
        vec![serial(10)],
        repo.clone(),
        Arc::new(CapturingAuditSink::new()),
    );

    let err = alloc.allocate("serial").await.expect_err("corrupt");
    assert!(matches!(
        err,
        RangeError::Repository(RepositoryError::InvalidValue { .. })
    ));
    assert_eq!(repo.read_count(), 1);
}

#[tokio::test]
async fn test_unknown_counter() {
    let alloc = allocator(
        vec![serial(10)],
        InMemoryRangeRepository::new(),
        Arc::new(CapturingAuditSink::new()),
    );
    let err = alloc.allocate("request").await.expect_err("unknown");
    assert!(matches!(err, RangeError::UnknownCounter(ref name) if name == "request"));
}

#[test]
fn test_rejects_zero_width_and_duplicates() {
    let audit = Arc::new(CapturingAuditSink::new());
    let zero = RangeAllocator::new(
        vec![serial(0)],
        InMemoryRangeRepository::new(),
        TokioTimeProvider::new(),
        ExtensionRetry::default(),
        audit.clone(),
    );
    assert!(matches!(zero, Err(RangeError::InvalidConfig(_))));

    let twice = RangeAllocator::new(
        vec![serial(10), serial(20)],
        InMemoryRangeRepository::new(),
        TokioTimeProvider::new(),
        ExtensionRetry::default(),
        audit,
    );
    assert!(matches!(twice, Err(RangeError::InvalidConfig(_))));

    let no_races = RangeAllocator::new(
        vec![serial(10)],
        InMemoryRangeRepository::new(),
        TokioTimeProvider::new(),
        ExtensionRetry::default().with_max_conflicts(0),
        Arc::new(CapturingAuditSink::new()),
    );
    assert!(matches!(no_races, Err(RangeError::InvalidConfig(_))));
}

#[test]
fn test_rejects_initial_range_reaching_origin() {
    let build = |counter: CounterConfig| {
        RangeAllocator::new(
            vec![counter],
            InMemoryRangeRepository::new(),
            TokioTimeProvider::new(),
            ExtensionRetry::default(),
            Arc::new(CapturingAuditSink::new()),
        )
    };

    // The origin defaults to 1, inside [1, 100].
    let overlapping = build(serial(10).with_initial_range(1, 100));
    assert!(matches!(overlapping, Err(RangeError::InvalidConfig(_))));

    let at_origin = build(serial(10).with_initial_range(1, 100).with_origin(100));
    assert!(matches!(at_origin, Err(RangeError::InvalidConfig(_))));

    let top = build(serial(10).with_initial_range(u128::MAX - 1, u128::MAX));
    assert!(matches!(top, Err(RangeError::InvalidConfig(_))));

    assert!(build(serial(10).with_initial_range(1, 100).with_origin(101)).is_ok());
}

#[tokio::test]
async fn test_members_with_distinct_initial_ranges_share_one_origin() {
    let repo = InMemoryRangeRepository::new();
    let first = allocator(
        vec![serial(100).with_initial_range(1, 100).with_origin(201)],
        repo.clone(),
        Arc::new(CapturingAuditSink::new()),
    );
    let second = allocator(
        vec![serial(100).with_initial_range(101, 200).with_origin(201)],
        repo.clone(),
        Arc::new(CapturingAuditSink::new()),
    );

    let claimed = first.force_extend("serial").await.expect("first claims");
    assert_eq!((claimed.start, claimed.end), (201, 300));
    assert!(!claimed.overlaps(&Range::new("serial", 1, 100)));
    let second_local = second.local_counter("serial").await.expect("counter");
    assert!(second_local.owned().all(|range| !range.overlaps(&claimed)));

    let next = second.force_extend("serial").await.expect("second claims");
    assert_eq!((next.start, next.end), (301, 400));
    assert_eq!(
        repo.get(&serial_record(), NEXT_RANGE_ATTRIBUTE).as_deref(),
        Some("401")
    );
}

/// Lets another writer win the race between the first read and replace.
struct RacingRepository {
    inner: InMemoryRangeRepository,
    raced: AtomicBool,
}

#[async_trait]
impl RangeRepository for RacingRepository {
    async fn read(
        &self,
        record: &RecordDn,
        attribute: &str,
    ) -> Result<Option<String>, RepositoryError> {
        let seen = self.inner.read(record, attribute).await?;
        if !self.raced.swap(true, Ordering::SeqCst) {
            let theirs = seen.as_deref().map_or(1, |v| v.parse::<u128>().unwrap_or(1)) + 50;
            self.inner
                .atomic_replace(record, attribute, seen.as_deref(), &theirs.to_string())
                .await?;
        }
        Ok(seen)
    }

    async fn atomic_replace(
        &self,
        record: &RecordDn,
        attribute: &str,
        expected: Option<&str>,
        new_value: &str,
    ) -> Result<ReplaceOutcome, RepositoryError> {
        self.inner
            .atomic_replace(record, attribute, expected, new_value)
            .await
    }
}

#[tokio::test]
async fn test_lost_race_rereads_winner_value() {
    let inner = InMemoryRangeRepository::new();
    let racing = RacingRepository {
        inner: inner.clone(),
        raced: AtomicBool::new(false),
    };
    let alloc = allocator(
        vec![serial(100)],
        racing,
        Arc::new(CapturingAuditSink::new()),
    );

    // The other writer claimed [1, 50]; this instance must start after it.
    let claimed = alloc.force_extend("serial").await.expect("bump");
    assert_eq!((claimed.start, claimed.end), (51, 150));
    assert_eq!(inner.conflict_count(), 1);
    assert_eq!(
        inner.get(&serial_record(), NEXT_RANGE_ATTRIBUTE).as_deref(),
        Some("151")
    );
}

/// Every conditional replace loses to some other writer.
struct AlwaysLosingRepository {
    inner: InMemoryRangeRepository,
}

#[async_trait]
impl RangeRepository for AlwaysLosingRepository {
    async fn read(
        &self,
        record: &RecordDn,
        attribute: &str,
    ) -> Result<Option<String>, RepositoryError> {
        self.inner.read(record, attribute).await
    }

    async fn atomic_replace(
        &self,
        record: &RecordDn,
        attribute: &str,
        _expected: Option<&str>,
        _new_value: &str,
    ) -> Result<ReplaceOutcome, RepositoryError> {
        Ok(ReplaceOutcome::Conflict {
            current: self.inner.read(record, attribute).await?,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_endless_conflicts_give_up_after_budget() {
    let audit = Arc::new(CapturingAuditSink::new());
    let alloc = RangeAllocator::new(
        vec![serial(10)],
        AlwaysLosingRepository {
            inner: InMemoryRangeRepository::new(),
        },
        TokioTimeProvider::new(),
        fast_retry().with_max_conflicts(3),
        audit.clone(),
    )
    .expect("allocator");

    let started = tokio::time::Instant::now();
    let err = tokio::time::timeout(Duration::from_secs(3600), alloc.allocate("serial"))
        .await
        .expect("gives up instead of spinning")
        .expect_err("never wins");
    match err {
        RangeError::RangeExtensionFailed {
            counter, attempts, ..
        } => {
            assert_eq!(counter, "serial");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected RangeExtensionFailed, got {other:?}"),
    }
    // Backed off between the lost races.
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(audit.count(AuditEventKind::RangeExtensionFailed), 1);
}
