//! # rangelink-range
//!
//! Cluster-unique serial and request numbers.
//!
//! Every instance of a clustered authority draws numbers from ranges it owns
//! exclusively. Ranges are claimed from a shared [`RangeRepository`] by
//! atomically advancing a per-counter pointer, so two instances never own
//! overlapping ranges and no number is ever issued twice.
//!
//! ```rust,ignore
//! use rangelink_range::{CounterConfig, ExtensionRetry, InMemoryRangeRepository, RangeAllocator, RecordDn};
//!
//! let serial = CounterConfig::new("serial", RecordDn::compose("ou=ranges", "o=ca"), 1000);
//! let allocator = RangeAllocator::new(
//!     vec![serial],
//!     InMemoryRangeRepository::new(),
//!     TokioTimeProvider::new(),
//!     ExtensionRetry::default(),
//!     Arc::new(TracingAuditSink),
//! )?;
//! let next = allocator.allocate("serial").await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod allocator;
mod error;
mod range;
mod repository;

pub use allocator::{LocalCounter, RangeAllocator};
pub use error::{RangeError, RepositoryError};
pub use range::{CounterConfig, ExtensionRetry, NEXT_RANGE_ATTRIBUTE, Range, RecordDn};
pub use repository::{FileRangeRepository, InMemoryRangeRepository, RangeRepository, ReplaceOutcome};
