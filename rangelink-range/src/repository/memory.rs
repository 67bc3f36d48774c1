//! In-process repository.
//!
//! Used by tests and single-node deployments. Clones share one store, so
//! several allocators built on clones behave like cluster members sharing
//! a directory. Outages can be injected to exercise the retry path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{RangeRepository, ReplaceOutcome};
use crate::error::RepositoryError;
use crate::range::RecordDn;

#[derive(Debug, Default)]
struct Store {
    values: HashMap<(RecordDn, String), String>,
    failures_left: u32,
    reads: usize,
    replaces: usize,
    conflicts: usize,
}

/// Repository kept in memory behind a mutex.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRangeRepository {
    store: Arc<Mutex<Store>>,
}

impl InMemoryRangeRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a value.
    pub fn set(&self, record: &RecordDn, attribute: &str, value: impl Into<String>) {
        self.store
            .lock()
            .values
            .insert((record.clone(), attribute.to_string()), value.into());
    }

    /// Current value of an attribute.
    pub fn get(&self, record: &RecordDn, attribute: &str) -> Option<String> {
        self.store
            .lock()
            .values
            .get(&(record.clone(), attribute.to_string()))
            .cloned()
    }

    /// Make the next `count` operations fail as unavailable.
    pub fn fail_next(&self, count: u32) {
        self.store.lock().failures_left = count;
    }

    /// Successful replaces so far.
    pub fn replace_count(&self) -> usize {
        self.store.lock().replaces
    }

    /// Reads so far, including failed ones.
    pub fn read_count(&self) -> usize {
        self.store.lock().reads
    }

    /// Replaces that lost a race.
    pub fn conflict_count(&self) -> usize {
        self.store.lock().conflicts
    }
}

impl Store {
    fn injected_failure(&mut self) -> Result<(), RepositoryError> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(RepositoryError::Unavailable(
                "injected outage".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RangeRepository for InMemoryRangeRepository {
    async fn read(
        &self,
        record: &RecordDn,
        attribute: &str,
    ) -> Result<Option<String>, RepositoryError> {
        let mut store = self.store.lock();
        store.reads += 1;
        store.injected_failure()?;
        Ok(store
            .values
            .get(&(record.clone(), attribute.to_string()))
            .cloned())
    }

    async fn atomic_replace(
        &self,
        record: &RecordDn,
        attribute: &str,
        expected: Option<&str>,
        new_value: &str,
    ) -> Result<ReplaceOutcome, RepositoryError> {
        let mut store = self.store.lock();
        store.injected_failure()?;

        let key = (record.clone(), attribute.to_string());
        let current = store.values.get(&key).cloned();
        if current.as_deref() != expected {
            store.conflicts += 1;
            return Ok(ReplaceOutcome::Conflict { current });
        }
        store.values.insert(key, new_value.to_string());
        store.replaces += 1;
        Ok(ReplaceOutcome::Replaced)
    }
}
