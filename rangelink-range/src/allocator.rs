//! Range allocator.
//!
//! Each instance hands out values from ranges it owns exclusively. Ranges
//! are claimed by advancing a counter's global pointer in the shared
//! repository with a conditional replace:
//!
//! 1. read `nextRange` (absent means the configured origin)
//! 2. replace it with `old + increment`, conditional on it still being `old`
//! 3. on success own `[old, old + increment - 1]`; on conflict go to 1 with
//!    the winner's value
//!
//! Lost races and repository outages are both retried with doubling backoff,
//! each against its own budget. Losing a race means another instance made
//! progress, so races get the larger budget; running out of either fails the
//! extension.
//!
//! All state of one counter sits behind one async mutex, held across an
//! extension. Concurrent callers therefore queue behind an extension
//! instead of starting their own, and values leave the allocator in
//! strictly increasing order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use rangelink_core::{AuditEvent, AuditEventKind, AuditSink, TimeProvider};
use tokio::sync::Mutex;

use crate::error::{RangeError, RepositoryError};
use crate::range::{CounterConfig, ExtensionRetry, NEXT_RANGE_ATTRIBUTE, Range};
use crate::repository::{RangeRepository, ReplaceOutcome};

/// Cursor over the ranges an instance owns for one counter.
///
/// Ranges are kept in ascending order; `next` always points into the front
/// one, or one past its end when everything is used up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalCounter {
    owned: VecDeque<Range>,
    next: u128,
}

impl LocalCounter {
    fn starting_with(range: Option<Range>) -> Self {
        let mut counter = Self::default();
        if let Some(range) = range {
            counter.push(range);
        }
        counter
    }

    /// Ranges still holding unallocated values, current range first.
    pub fn owned(&self) -> impl Iterator<Item = &Range> {
        self.owned.iter()
    }

    /// Next value to hand out, if any is left.
    pub fn next_value(&self) -> Option<u128> {
        (self.remaining() > 0).then_some(self.next)
    }

    /// Unallocated values across all owned ranges.
    pub fn remaining(&self) -> u128 {
        self.owned
            .iter()
            .enumerate()
            .map(|(i, range)| {
                if i == 0 {
                    range.end.saturating_add(1).saturating_sub(self.next)
                } else {
                    range.len()
                }
            })
            .fold(0u128, u128::saturating_add)
    }

    /// True once nothing is left to hand out.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Whether remaining capacity is at or below `low_water_mark`.
    fn below_low_water_mark(&self, low_water_mark: u128) -> bool {
        self.remaining() <= low_water_mark
    }

    fn push(&mut self, range: Range) {
        if range.is_empty() {
            return;
        }
        if self.is_exhausted() {
            self.owned.clear();
            self.next = range.start;
            self.owned.push_back(range);
            return;
        }
        match self.owned.back_mut() {
            Some(last) if last.end.checked_add(1) == Some(range.start) => last.end = range.end,
            _ => self.owned.push_back(range),
        }
    }

    fn take(&mut self) -> Option<u128> {
        loop {
            let front = self.owned.front()?;
            if self.next <= front.end {
                let value = self.next;
                self.next += 1;
                return Some(value);
            }
            self.owned.pop_front();
            self.next = self.owned.front()?.start;
        }
    }
}

struct Counter {
    config: CounterConfig,
    local: Mutex<LocalCounter>,
}

/// Why an extension is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    LowWaterMark,
    Manual,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Trigger::LowWaterMark => "low-water-mark",
            Trigger::Manual => "manual",
        }
    }
}

/// One pass of the read-replace loop.
enum Attempt {
    Claimed(Range),
    Conflict,
    Failed(RepositoryError),
}

/// Hands out cluster-unique values for a fixed set of counters.
pub struct RangeAllocator<T: TimeProvider, R: RangeRepository> {
    counters: HashMap<String, Counter>,
    repository: R,
    time: T,
    retry: ExtensionRetry,
    audit: Arc<dyn AuditSink>,
    local_address: String,
}

impl<T: TimeProvider, R: RangeRepository> RangeAllocator<T, R> {
    /// Create an allocator for `counters`.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::InvalidConfig`] for a duplicate counter name, a
    /// zero range width or increment, or an inverted initial range.
    pub fn new(
        counters: Vec<CounterConfig>,
        repository: R,
        time: T,
        retry: ExtensionRetry,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, RangeError> {
        if retry.max_attempts == 0 || retry.max_conflicts == 0 {
            return Err(RangeError::InvalidConfig(
                "max_attempts and max_conflicts must be at least 1".to_string(),
            ));
        }

        let mut map = HashMap::with_capacity(counters.len());
        for config in counters {
            if config.range_width == 0 || config.manual_increment() == 0 {
                return Err(RangeError::InvalidConfig(format!(
                    "counter '{}' needs a non-zero range width and increment",
                    config.name
                )));
            }
            let initial = match config.initial_range {
                Some((begin, end)) if end < begin => {
                    return Err(RangeError::InvalidConfig(format!(
                        "counter '{}' initial range ends before it begins",
                        config.name
                    )));
                }
                // Also rules out an initial range ending at u128::MAX.
                Some((_, end)) if end >= config.origin => {
                    return Err(RangeError::InvalidConfig(format!(
                        "counter '{}' initial range must end before origin {}",
                        config.name, config.origin
                    )));
                }
                Some((begin, end)) => Some(Range::new(config.name.clone(), begin, end)),
                None => None,
            };
            let name = config.name.clone();
            let counter = Counter {
                config,
                local: Mutex::new(LocalCounter::starting_with(initial)),
            };
            if map.insert(name.clone(), counter).is_some() {
                return Err(RangeError::InvalidConfig(format!(
                    "counter '{name}' configured twice"
                )));
            }
        }

        Ok(Self {
            counters: map,
            repository,
            time,
            retry,
            audit,
            local_address: "localhost".to_string(),
        })
    }

    /// Set the address reported in audit events.
    pub fn with_local_address(mut self, local_address: impl Into<String>) -> Self {
        self.local_address = local_address.into();
        self
    }

    /// The repository this allocator extends against.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Hand out the next value of `counter`.
    ///
    /// Tops up the owned ranges first when at or below the low-water mark.
    /// A failed top-up fails the call, even with values left; use
    /// [`try_allocate`](RangeAllocator::try_allocate) to drain them without
    /// the repository.
    ///
    /// # Errors
    ///
    /// - [`RangeError::UnknownCounter`] for an unconfigured counter
    /// - [`RangeError::RangeExtensionFailed`] if the extension gave up
    /// - [`RangeError::Repository`] for a non-transient repository failure
    pub async fn allocate(&self, counter: &str) -> Result<u128, RangeError> {
        let entry = self.counter(counter)?;
        let mut local = entry.local.lock().await;

        if local.below_low_water_mark(entry.config.low_water_mark) {
            let increment = entry.config.range_width;
            self.extend(&entry.config, &mut local, increment, Trigger::LowWaterMark)
                .await?;
        }

        local.take().ok_or_else(|| RangeError::RangeExhausted {
            counter: counter.to_string(),
        })
    }

    /// Hand out the next value without touching the repository.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::RangeExhausted`] once the owned ranges are used
    /// up; call [`ensure_capacity`](RangeAllocator::ensure_capacity) first.
    pub async fn try_allocate(&self, counter: &str) -> Result<u128, RangeError> {
        let entry = self.counter(counter)?;
        entry
            .local
            .lock()
            .await
            .take()
            .ok_or_else(|| RangeError::RangeExhausted {
                counter: counter.to_string(),
            })
    }

    /// Extend `counter` if it is at or below its low-water mark.
    ///
    /// Returns the claimed range, or `None` if there was enough capacity.
    /// Safe to call before every allocation.
    ///
    /// # Errors
    ///
    /// Returns the extension failure, whether or not values remain.
    pub async fn ensure_capacity(&self, counter: &str) -> Result<Option<Range>, RangeError> {
        let entry = self.counter(counter)?;
        let mut local = entry.local.lock().await;
        if !local.below_low_water_mark(entry.config.low_water_mark) {
            return Ok(None);
        }
        let increment = entry.config.range_width;
        self.extend(&entry.config, &mut local, increment, Trigger::LowWaterMark)
            .await
            .map(Some)
    }

    /// Advance the global pointer of `counter` by its manual increment now,
    /// regardless of local capacity, and take ownership of the claimed range.
    ///
    /// # Errors
    ///
    /// As for the extension in [`allocate`](RangeAllocator::allocate).
    pub async fn force_extend(&self, counter: &str) -> Result<Range, RangeError> {
        let entry = self.counter(counter)?;
        let mut local = entry.local.lock().await;
        let increment = entry.config.manual_increment();
        self.extend(&entry.config, &mut local, increment, Trigger::Manual)
            .await
    }

    /// Copy of the local state of `counter`.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::UnknownCounter`] for an unconfigured counter.
    pub async fn local_counter(&self, counter: &str) -> Result<LocalCounter, RangeError> {
        Ok(self.counter(counter)?.local.lock().await.clone())
    }

    fn counter(&self, name: &str) -> Result<&Counter, RangeError> {
        self.counters
            .get(name)
            .ok_or_else(|| RangeError::UnknownCounter(name.to_string()))
    }

    async fn extend(
        &self,
        config: &CounterConfig,
        local: &mut LocalCounter,
        increment: u128,
        trigger: Trigger,
    ) -> Result<Range, RangeError> {
        let mut failures = 0u32;
        let mut conflicts = 0u32;
        loop {
            let error = match self.attempt(config, increment).await {
                Attempt::Claimed(range) => {
                    tracing::info!(
                        counter = %config.name,
                        record = %config.record,
                        trigger = trigger.as_str(),
                        start = %range.start,
                        end = %range.end,
                        "claimed range"
                    );
                    self.emit(
                        AuditEventKind::RangeExtended,
                        config,
                        format!("{} extension claimed {range}", trigger.as_str()),
                    );
                    local.push(range.clone());
                    return Ok(range);
                }
                Attempt::Conflict => {
                    conflicts += 1;
                    if conflicts >= self.retry.max_conflicts {
                        return Err(self.give_up(
                            config,
                            trigger,
                            failures + conflicts,
                            format!("lost {conflicts} consecutive races for the pointer"),
                        ));
                    }
                    let delay = self.retry.backoff(conflicts);
                    tracing::debug!(
                        counter = %config.name,
                        conflicts,
                        ?delay,
                        "lost range race, rereading pointer"
                    );
                    self.time.sleep(delay).await;
                    continue;
                }
                Attempt::Failed(e) => e,
            };

            failures += 1;
            if !error.is_transient() {
                self.emit(
                    AuditEventKind::RangeExtensionFailed,
                    config,
                    format!("{} extension failed: {error}", trigger.as_str()),
                );
                return Err(RangeError::Repository(error));
            }
            if failures >= self.retry.max_attempts {
                return Err(self.give_up(config, trigger, failures, error.to_string()));
            }

            let delay = self.retry.backoff(failures);
            tracing::warn!(
                counter = %config.name,
                attempt = failures,
                ?delay,
                error = %error,
                "range extension failed, backing off"
            );
            self.time.sleep(delay).await;
        }
    }

    fn give_up(
        &self,
        config: &CounterConfig,
        trigger: Trigger,
        attempts: u32,
        reason: String,
    ) -> RangeError {
        tracing::error!(
            counter = %config.name,
            attempts,
            reason = %reason,
            "giving up on range extension"
        );
        self.emit(
            AuditEventKind::RangeExtensionFailed,
            config,
            format!(
                "{} extension failed after {attempts} attempt(s): {reason}",
                trigger.as_str()
            ),
        );
        RangeError::RangeExtensionFailed {
            counter: config.name.clone(),
            attempts,
            reason,
        }
    }

    async fn attempt(&self, config: &CounterConfig, increment: u128) -> Attempt {
        let timeout = self.retry.operation_timeout;
        let read = self
            .time
            .timeout(timeout, self.repository.read(&config.record, NEXT_RANGE_ATTRIBUTE))
            .await;
        let current = match read {
            Ok(Ok(current)) => current,
            Ok(Err(e)) => return Attempt::Failed(e),
            Err(_) => return Attempt::Failed(timed_out("read", timeout)),
        };

        let old_next = match current.as_deref() {
            None => config.origin,
            Some(value) => match value.trim().parse::<u128>() {
                Ok(next) => next,
                Err(_) => {
                    return Attempt::Failed(RepositoryError::InvalidValue {
                        record: config.record.to_string(),
                        attribute: NEXT_RANGE_ATTRIBUTE.to_string(),
                        value: value.to_string(),
                    });
                }
            },
        };
        let Some(new_next) = old_next.checked_add(increment) else {
            return Attempt::Failed(RepositoryError::InvalidValue {
                record: config.record.to_string(),
                attribute: NEXT_RANGE_ATTRIBUTE.to_string(),
                value: format!("{old_next} + {increment} overflows"),
            });
        };

        let new_value = new_next.to_string();
        let replace = self
            .time
            .timeout(
                timeout,
                self.repository.atomic_replace(
                    &config.record,
                    NEXT_RANGE_ATTRIBUTE,
                    current.as_deref(),
                    &new_value,
                ),
            )
            .await;
        match replace {
            Ok(Ok(ReplaceOutcome::Replaced)) => {
                Attempt::Claimed(Range::new(config.name.clone(), old_next, new_next - 1))
            }
            Ok(Ok(ReplaceOutcome::Conflict { .. })) => Attempt::Conflict,
            Ok(Err(e)) => Attempt::Failed(e),
            Err(_) => Attempt::Failed(timed_out("replace", timeout)),
        }
    }

    fn emit(&self, kind: AuditEventKind, config: &CounterConfig, detail: String) {
        self.audit.emit(
            AuditEvent::system(kind, self.local_address.clone(), detail)
                .with_peer(config.record.to_string(), None),
        );
    }
}

fn timed_out(operation: &str, after: std::time::Duration) -> RepositoryError {
    RepositoryError::Unavailable(format!("{operation} timed out after {after:?}"))
}
