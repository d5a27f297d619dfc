//! Free-path results and construction errors.

use std::error::Error;
use std::fmt;

/// Outcome of [`deallocate`](crate::BuddyArena::deallocate) and
/// [`tombstone`](crate::BuddyArena::tombstone).
#[must_use]
#[repr(i8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreeStatus {
  /// The block went back to a free list (or was tombstoned, for `tombstone`).
  Freed = 0,
  /// The block was already tombstoned; nothing changed.
  Tombstoned = 1,
  /// Null, out-of-region, or a header order outside `[0, max_order)`.
  Invalid = -1,
  /// Precondition violated, e.g. an order-0 free under `OrderZeroFree::Reject`.
  Failure = -2,
  /// Coalescing ran out of orders and was clamped at the top order.
  OutOfSpace = -3,
}

impl FreeStatus {
  /// `Freed` and `Tombstoned` are both non-failures.
  #[inline]
  pub fn is_ok(self) -> bool {
    matches!(self, Self::Freed | Self::Tombstoned)
  }
}

/// Errors that make an arena impossible to build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
  /// The backing span has a null pointer.
  NullRegion,
  /// The operating system refused to map the backing region.
  MapFailed {
    /// Bytes requested.
    len: usize,
  },
  /// After alignment the span holds less than one minimum block.
  RegionTooSmall {
    /// Length of the span as supplied.
    len: usize,
    /// Minimum block size.
    min: usize,
  },
}

impl fmt::Display for ArenaError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NullRegion => write!(f, "backing region is null"),
      Self::MapFailed { len } => write!(f, "failed to map {len} bytes of backing memory"),
      Self::RegionTooSmall { len, min } => {
        write!(
          f,
          "backing region of {len} bytes cannot hold one {min}-byte block after alignment"
        )
      }
    }
  }
}

impl Error for ArenaError {}
