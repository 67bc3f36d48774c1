//! The shared store holding each counter's global pointer.
//!
//! The allocator needs exactly one primitive from the store: replace an
//! attribute value atomically, and only if it still holds the value the
//! caller last read. This is the directory modify that deletes the old
//! value and adds the new one in a single operation; if another instance
//! got there first the delete misses and the whole modify fails. Exactly
//! one of any set of racing writers wins, and the losers see the winner's
//! value on their next read.
//!
//! The read-modify-retry loop lives in the allocator. The store never
//! promises anything across two separate calls.

mod file;
mod memory;

pub use file::FileRangeRepository;
pub use memory::InMemoryRangeRepository;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RepositoryError;
use crate::range::RecordDn;

/// Result of a conditional replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The new value is stored.
    Replaced,
    /// The attribute no longer held the expected value.
    Conflict {
        /// What it holds now.
        current: Option<String>,
    },
}

/// Linearizable attribute store.
#[async_trait]
pub trait RangeRepository: Send + Sync {
    /// Read one attribute. `None` if the record or attribute is absent.
    async fn read(&self, record: &RecordDn, attribute: &str)
    -> Result<Option<String>, RepositoryError>;

    /// Replace `attribute` with `new_value` if it currently holds
    /// `expected` (`None` meaning absent).
    async fn atomic_replace(
        &self,
        record: &RecordDn,
        attribute: &str,
        expected: Option<&str>,
        new_value: &str,
    ) -> Result<ReplaceOutcome, RepositoryError>;
}

#[async_trait]
impl<R: RangeRepository + ?Sized> RangeRepository for Arc<R> {
    async fn read(
        &self,
        record: &RecordDn,
        attribute: &str,
    ) -> Result<Option<String>, RepositoryError> {
        (**self).read(record, attribute).await
    }

    async fn atomic_replace(
        &self,
        record: &RecordDn,
        attribute: &str,
        expected: Option<&str>,
        new_value: &str,
    ) -> Result<ReplaceOutcome, RepositoryError> {
        (**self)
            .atomic_replace(record, attribute, expected, new_value)
            .await
    }
}
