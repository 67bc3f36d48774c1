//! Range model and counter configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Directory attribute holding a counter's global pointer.
pub const NEXT_RANGE_ATTRIBUTE: &str = "nextRange";

/// A closed interval `[start, end]` of one counter, owned by one instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    /// Counter the range belongs to.
    pub counter: String,
    /// First value.
    pub start: u128,
    /// Last value, inclusive.
    pub end: u128,
}

impl Range {
    /// Create a range. `end < start` yields an empty range.
    pub fn new(counter: impl Into<String>, start: u128, end: u128) -> Self {
        Self {
            counter: counter.into(),
            start,
            end,
        }
    }

    /// Number of values in the range.
    pub fn len(&self) -> u128 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// True if the range holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `value` lies inside the range.
    pub fn contains(&self, value: u128) -> bool {
        self.start <= value && value <= self.end
    }

    /// True if the two ranges share any value.
    pub fn overlaps(&self, other: &Range) -> bool {
        !self.is_empty() && !other.is_empty() && self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}, {}]", self.counter, self.start, self.end)
    }
}

/// Distinguished name of a directory record, `<rdn>,<base_dn>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordDn(String);

impl RecordDn {
    /// Compose a record name from a relative name and the base suffix.
    pub fn compose(rdn: &str, base_dn: &str) -> Self {
        let rdn = rdn.trim().trim_end_matches(',');
        let base_dn = base_dn.trim().trim_start_matches(',');
        if base_dn.is_empty() {
            Self(rdn.to_string())
        } else {
            Self(format!("{rdn},{base_dn}"))
        }
    }

    /// The name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordDn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration of one counter (serial numbers, request ids).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterConfig {
    /// Counter name used by callers, e.g. `serial`.
    pub name: String,
    /// Record holding the global pointer.
    pub record: RecordDn,
    /// Values claimed by one automatic extension.
    pub range_width: u128,
    /// Remaining-capacity threshold that triggers an extension.
    pub low_water_mark: u128,
    /// Range owned at startup, from local configuration.
    pub initial_range: Option<(u128, u128)>,
    /// Pointer value assumed when the record has no `nextRange` yet.
    ///
    /// Must be the same on every member sharing the record, and lie past
    /// every member's initial range.
    pub origin: u128,
    /// Advance applied by a manual bump. Defaults to `range_width`.
    pub manual_increment: Option<u128>,
}

impl CounterConfig {
    /// A counter with the low-water mark at a fifth of the width and an
    /// origin of 1.
    pub fn new(name: impl Into<String>, record: RecordDn, range_width: u128) -> Self {
        Self {
            name: name.into(),
            record,
            range_width,
            low_water_mark: range_width / 5,
            initial_range: None,
            origin: 1,
            manual_increment: None,
        }
    }

    /// Set the low-water mark.
    pub fn with_low_water_mark(mut self, low_water_mark: u128) -> Self {
        self.low_water_mark = low_water_mark;
        self
    }

    /// Start out owning `[begin, end]`.
    ///
    /// The origin is left alone; it has to be set past `end` with
    /// [`with_origin`](CounterConfig::with_origin).
    pub fn with_initial_range(mut self, begin: u128, end: u128) -> Self {
        self.initial_range = Some((begin, end));
        self
    }

    /// Set the pointer value used for a fresh record.
    pub fn with_origin(mut self, origin: u128) -> Self {
        self.origin = origin;
        self
    }

    /// Set the manual bump increment.
    pub fn with_manual_increment(mut self, increment: u128) -> Self {
        self.manual_increment = Some(increment);
        self
    }

    /// Increment used by `force_extend`.
    pub fn manual_increment(&self) -> u128 {
        self.manual_increment.unwrap_or(self.range_width)
    }
}

/// Retry policy for range extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRetry {
    /// Failed attempts tolerated before giving up.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Cap on the doubled delay.
    pub max_backoff: Duration,
    /// Consecutive lost races tolerated before giving up.
    pub max_conflicts: u32,
    /// Limit on each repository call.
    pub operation_timeout: Duration,
}

impl Default for ExtensionRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            max_conflicts: 16,
            operation_timeout: Duration::from_secs(10),
        }
    }
}

impl ExtensionRetry {
    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the lost-race budget.
    pub fn with_max_conflicts(mut self, max_conflicts: u32) -> Self {
        self.max_conflicts = max_conflicts;
        self
    }

    /// Set the backoff bounds.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Delay before retry number `failures` (1-based), doubling up to the cap.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}
