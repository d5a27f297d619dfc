//! In-band block headers.
//!
//! Every handed-out block starts with a fixed [`HEADER_OFFSET`]-byte prefix.
//! The prefix carries the block's order (so a free can recover the block size
//! without a side table) and an independent state byte holding the tombstone
//! flag. User data starts exactly one header past the block base.
//!
//! ```text
//! block base                                   base + HEADER_OFFSET
//! |  order: i32  | pad |  state: u8  | ...      |  user data ...
//! 0              4     8             9          64
//! ```
//!
//! While a block is free its first word is overwritten by the intrusive
//! free-list link, which is why the state byte lives past offset 8. Free
//! blocks get a distinct state so a second free of the same pointer is caught.

use core::mem::{offset_of, size_of};

/// Header width: the widest SIMD register we must keep data aligned for (AVX-512).
pub const HEADER_OFFSET: usize = 64;

/// Bytes reserved for the order field on top of the header in general requests.
pub const ORDER_FIELD: usize = size_of::<i32>();

/// Order value that never names a size class.
pub const ORDER_INVALID: i32 = -1;

/// Offset of the state byte from the block base.
pub const STATE_OFFSET: usize = offset_of!(BlockHeader, state);

const STATE_LIVE: u8 = 0;
const STATE_TOMBSTONED: u8 = 0xDE;
const STATE_FREE: u8 = 0xFE;

#[repr(C)]
pub struct BlockHeader {
  order: i32,
  _pad: u32,
  state: u8,
  _reserved: [u8; HEADER_OFFSET - 9],
}

const _: () = assert!(HEADER_OFFSET.is_power_of_two());
const _: () = assert!(HEADER_OFFSET >= size_of::<*mut u8>());
const _: () = assert!(size_of::<BlockHeader>() == HEADER_OFFSET);
// The free-list link occupies the first pointer-width bytes of a free block.
const _: () = assert!(STATE_OFFSET >= size_of::<*mut u8>());

/// Smallest `k` with `2^k >= v`; 0 for `v <= 1`.
#[inline(always)]
pub const fn ceil_log2(v: usize) -> usize {
  if v <= 1 {
    0
  } else {
    (usize::BITS - (v - 1).leading_zeros()) as usize
  }
}

/// Order whose block holds `n` bytes, counted in `MIN`-sized units.
#[inline(always)]
pub const fn order_for_size<const MIN: usize>(n: usize) -> usize {
  ceil_log2(n.div_ceil(MIN))
}

#[inline(always)]
pub const fn order_size<const MIN: usize>(order: usize) -> usize {
  MIN << order
}

/// Writes a fresh header for a block entering the allocated state.
/// Clears any tombstone left from an earlier life of the block.
///
/// # Safety
/// `base` must point to at least `HEADER_OFFSET` writable bytes.
#[inline]
pub unsafe fn write(base: *mut u8, order: usize) {
  unsafe {
    base.cast::<i32>().write_unaligned(order as i32);
    base.add(STATE_OFFSET).write(STATE_LIVE);
  }
}

/// # Safety
/// `base` must point to at least `HEADER_OFFSET` readable bytes.
#[inline]
pub unsafe fn order(base: *const u8) -> i32 {
  unsafe { base.cast::<i32>().read_unaligned() }
}

/// # Safety
/// `base` must point to at least `HEADER_OFFSET` readable bytes.
#[inline]
pub unsafe fn is_tombstoned(base: *const u8) -> bool {
  unsafe { base.add(STATE_OFFSET).read() == STATE_TOMBSTONED }
}

/// Marks the block as tombstoned. Leaves the order field untouched.
///
/// # Safety
/// `base` must point to at least `HEADER_OFFSET` writable bytes.
#[inline]
pub unsafe fn set_tombstone(base: *mut u8) {
  unsafe { base.add(STATE_OFFSET).write(STATE_TOMBSTONED) };
}

/// Poisons the order field so the block is never accepted by a free again.
///
/// # Safety
/// `base` must point to at least `HEADER_OFFSET` writable bytes.
#[inline]
pub unsafe fn retire(base: *mut u8) {
  unsafe { base.cast::<i32>().write_unaligned(ORDER_INVALID) };
}

/// Marks a block as sitting on a free list.
///
/// # Safety
/// `base` must point to at least `STATE_OFFSET + 1` writable bytes.
#[inline]
pub unsafe fn mark_free(base: *mut u8) {
  unsafe { base.add(STATE_OFFSET).write(STATE_FREE) };
}

/// # Safety
/// `base` must point to at least `STATE_OFFSET + 1` readable bytes.
#[inline]
pub unsafe fn is_free(base: *const u8) -> bool {
  unsafe { base.add(STATE_OFFSET).read() == STATE_FREE }
}

/// User pointer for a block base.
#[inline(always)]
pub fn data(base: *mut u8) -> *mut u8 {
  base.wrapping_add(HEADER_OFFSET)
}

/// Block base for a user pointer.
#[inline(always)]
pub fn base_of(data: *mut u8) -> *mut u8 {
  data.wrapping_sub(HEADER_OFFSET)
}
