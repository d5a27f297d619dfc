//! Run-time arena behaviour switches.

/// What tombstoning does with the block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TombstoneMode {
  /// Drop the block's bytes from `used()` but never hand the block out again.
  #[default]
  Leak,
  /// Return the block to its free list, coalescing as a normal free would.
  Reclaim,
}

/// What a free of an order-0 block does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderZeroFree {
  /// Account the bytes as released, keep the block off the free lists and
  /// report [`FreeStatus::Failure`](crate::FreeStatus::Failure).
  #[default]
  Reject,
  /// Free and coalesce like any other order.
  Reclaim,
}

/// Configuration for a [`BuddyArena`](crate::BuddyArena).
///
/// Fixed at construction.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArenaConfig {
  pub tombstone: TombstoneMode,
  pub order_zero: OrderZeroFree,
  /// Zero the data region of every block handed out.
  pub zero_on_alloc: bool,
  /// Fill the data region of freed blocks with this byte. Headers and
  /// free-list links are never overwritten.
  pub poison_on_free: Option<u8>,
}

impl ArenaConfig {
  /// Fill byte used by [`ArenaConfig::hardened`].
  pub const POISON_BYTE: u8 = 0xCC;

  /// Freed and tombstoned memory goes back to the free lists, freed data is
  /// poisoned, fresh blocks are zeroed.
  pub fn hardened() -> Self {
    Self {
      tombstone: TombstoneMode::Reclaim,
      order_zero: OrderZeroFree::Reclaim,
      zero_on_alloc: true,
      poison_on_free: Some(Self::POISON_BYTE),
    }
  }

  pub fn with_tombstone(mut self, mode: TombstoneMode) -> Self {
    self.tombstone = mode;
    self
  }

  pub fn with_order_zero(mut self, mode: OrderZeroFree) -> Self {
    self.order_zero = mode;
    self
  }
}
