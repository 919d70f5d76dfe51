//! Lamport-style logical clock carried by every entry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A logical clock value.
///
/// A valid entry's clock is strictly greater than the clock of every
/// predecessor, so sorting by `(clock, hash)` is always a topological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct LogicalClock(pub u64);

impl LogicalClock {
    /// Clock of a genesis entry.
    pub const GENESIS: Self = Self(1);

    /// Largest clock a valid entry may carry. Fits a signed 64-bit column.
    pub const MAX: Self = Self(i64::MAX as u64);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// The next tick after this one.
    pub fn tick(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Whether an entry may carry this clock.
    pub fn in_range(self) -> bool {
        self.0 >= 1 && self <= Self::MAX
    }

    /// The smallest clock that is valid for an entry with the given
    /// predecessor clocks, or `None` once the range is exhausted.
    pub fn checked_next_after(predecessors: impl IntoIterator<Item = LogicalClock>) -> Option<Self> {
        Some(Self::next_after(predecessors)).filter(|c| c.in_range())
    }

    /// The smallest clock that is valid for an entry with the given
    /// predecessor clocks.
    pub fn next_after(predecessors: impl IntoIterator<Item = LogicalClock>) -> Self {
        predecessors
            .into_iter()
            .max()
            .map(LogicalClock::tick)
            .unwrap_or(Self::GENESIS)
    }
}

impl fmt::Display for LogicalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
