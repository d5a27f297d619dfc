use core::{
  fmt,
  marker::PhantomData,
  mem::size_of,
  ptr::{self, null_mut},
};

use crate::{
  ArenaConfig, ArenaError, Chunk, FreeStatus, OrderZeroFree, TombstoneMode,
  header::{self, HEADER_OFFSET, ORDER_FIELD, order_for_size, order_size},
};

// =============================================================================
// Free lists
// =============================================================================

#[repr(C)]
struct FreeBlock {
  next: *mut FreeBlock,
}

/// Intrusive free list for one order. Nodes live in the free blocks.
struct FreeList {
  head: *mut FreeBlock,
  count: usize,
}

impl FreeList {
  const fn new() -> Self {
    Self {
      head: null_mut(),
      count: 0,
    }
  }
}

// =============================================================================
// Stats
// =============================================================================

/// Activity counters. Only collected with the `stats` feature.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
  pub allocations: u64,
  pub deallocations: u64,
  pub tombstones: u64,
  pub splits: u64,
  pub merges: u64,
  /// Allocation requests that returned [`Chunk::NULL`].
  pub failed_allocations: u64,
}

#[derive(Clone, Copy)]
enum Event {
  Alloc,
  AllocFailed,
  Free,
  Tombstone,
  Split,
  Merge,
}

// =============================================================================
// Arena
// =============================================================================

/// A buddy allocator over one fixed region.
///
/// `MIN` is the order-0 block size and must be a power of two. `ORDERS` caps
/// the number of size classes. Block `o` is `MIN << o` bytes; every handed-out
/// block starts with a [`HEADER_OFFSET`]-byte header and the caller gets the
/// rest.
///
/// Not synchronized. Wrap it in [`LockedArena`](crate::LockedArena) or keep it
/// on one thread.
pub struct BuddyArena<'a, const MIN: usize, const ORDERS: usize = 64> {
  base: *mut u8,
  total: usize,
  max_order: usize,
  free_lists: [FreeList; ORDERS],
  /// Memoized block per order for `temporal_allocate`.
  active: [Chunk; ORDERS],
  allocated: usize,
  config: ArenaConfig,
  #[cfg(feature = "stats")]
  stats: ArenaStats,
  _region: PhantomData<&'a mut [u8]>,
}

// The arena is the only user of its region.
unsafe impl<const MIN: usize, const ORDERS: usize> Send for BuddyArena<'_, MIN, ORDERS> {}

impl<'a, const MIN: usize, const ORDERS: usize> BuddyArena<'a, MIN, ORDERS> {
  const PARAMS_OK: () = {
    assert!(MIN.is_power_of_two(), "MIN must be a power of two");
    // Room for the free-list link and the state byte of a free block.
    assert!(MIN > header::STATE_OFFSET, "MIN too small for a free block");
    assert!(ORDERS > 0 && ORDERS <= usize::BITS as usize);
  };

  /// Builds an arena over `mem`.
  ///
  /// # Panics
  /// If `mem` cannot hold a single `MIN` block once aligned. That is a
  /// configuration bug, not an allocation failure.
  pub fn new(mem: &'a mut [u8]) -> Self {
    match Self::try_new(mem, ArenaConfig::default()) {
      Ok(arena) => arena,
      Err(e) => panic!("buddy arena: {e}"),
    }
  }

  pub fn try_new(mem: &'a mut [u8], config: ArenaConfig) -> Result<Self, ArenaError> {
    unsafe { Self::from_raw_parts(Chunk::from_slice(mem), config) }
  }

  /// Builds an arena over raw memory.
  ///
  /// # Safety
  /// `mem` must be valid for reads and writes for `'a` and used by nothing
  /// but this arena while it lives.
  pub unsafe fn from_raw_parts(mem: Chunk, config: ArenaConfig) -> Result<Self, ArenaError> {
    #[allow(clippy::let_unit_value)]
    let () = Self::PARAMS_OK;

    if mem.ptr.is_null() {
      return Err(ArenaError::NullRegion);
    }
    let too_small = ArenaError::RegionTooSmall {
      len: mem.len,
      min: MIN,
    };
    if mem.len < MIN {
      return Err(too_small);
    }

    // Aligning to the header width keeps every data pointer header-aligned.
    let start = mem.ptr as usize;
    let aligned = align_up(start, HEADER_OFFSET);
    let adjust = aligned - start;
    if mem.len <= adjust {
      return Err(too_small);
    }
    let total = (mem.len - adjust) / MIN * MIN;
    if total < MIN {
      return Err(too_small);
    }

    let mut max_order = 0;
    let mut blk = MIN;
    while blk <= total && max_order < ORDERS {
      max_order += 1;
      match blk.checked_mul(2) {
        Some(next) => blk = next,
        None => break,
      }
    }

    let mut arena = Self {
      base: mem.ptr.wrapping_add(adjust),
      total,
      max_order,
      free_lists: [const { FreeList::new() }; ORDERS],
      active: [Chunk::NULL; ORDERS],
      allocated: 0,
      config,
      #[cfg(feature = "stats")]
      stats: ArenaStats::default(),
      _region: PhantomData,
    };
    unsafe { arena.seed() };
    Ok(arena)
  }

  /// Carves the region into free blocks: as many top-order blocks as fit,
  /// then at most one block per lower order for the tail.
  unsafe fn seed(&mut self) {
    let top = self.max_order - 1;
    let mut offset = 0;
    while offset + order_size::<MIN>(top) <= self.total {
      unsafe { self.push(top, offset) };
      offset += order_size::<MIN>(top);
    }
    for order in (0..top).rev() {
      if offset + order_size::<MIN>(order) <= self.total {
        unsafe { self.push(order, offset) };
        offset += order_size::<MIN>(order);
      }
    }
    debug_assert_eq!(offset, self.total, "seed left bytes uncovered");
  }

  // ---------------------------------------------------------------------------
  // Free-list primitives. Blocks are addressed by offset from `base`.
  // ---------------------------------------------------------------------------

  #[inline]
  fn block_at(&self, offset: usize) -> *mut u8 {
    self.base.wrapping_add(offset)
  }

  #[inline]
  fn offset_of(&self, block: *mut u8) -> usize {
    block as usize - self.base as usize
  }

  #[inline]
  #[cfg(debug_assertions)]
  fn is_valid_block_ptr(&self, ptr: *mut FreeBlock) -> bool {
    if ptr.is_null() {
      return true;
    }
    let base = self.base as usize;
    let addr = ptr as usize;
    ptr.is_aligned() && addr >= base && addr < base + self.total && (addr - base) % MIN == 0
  }

  /// Pushes the block at `offset` onto the list for `order`.
  #[inline]
  unsafe fn push(&mut self, order: usize, offset: usize) {
    debug_assert!(
      offset % order_size::<MIN>(order) == 0 && offset + order_size::<MIN>(order) <= self.total,
      "push: block at offset {offset} does not fit order {order}"
    );
    let block = self.block_at(offset);
    let list = &mut self.free_lists[order];
    unsafe {
      header::mark_free(block);
      let node = block as *mut FreeBlock;
      (*node).next = list.head;
      list.head = node;
    }
    list.count += 1;
  }

  /// Pops a block from the list for `order`, returning its offset.
  #[inline]
  unsafe fn pop(&mut self, order: usize) -> Option<usize> {
    let list = &mut self.free_lists[order];
    let node = list.head;
    if node.is_null() {
      return None;
    }
    list.head = unsafe { (*node).next };
    list.count -= 1;
    #[cfg(debug_assertions)]
    {
      debug_assert!(
        self.is_valid_block_ptr(self.free_lists[order].head),
        "pop: order {order} next link {:p} is invalid",
        self.free_lists[order].head
      );
    }
    Some(self.offset_of(node as *mut u8))
  }

  /// Unlinks the block at `offset` from the list for `order`.
  /// Returns true if it was there.
  unsafe fn try_remove_buddy(&mut self, order: usize, offset: usize) -> bool {
    let target = self.block_at(offset) as *mut FreeBlock;
    let list = &mut self.free_lists[order];

    if list.head == target {
      list.head = unsafe { (*target).next };
      list.count -= 1;
      return true;
    }

    // Walk the list to find buddy
    let mut prev = list.head;
    while !prev.is_null() {
      let next = unsafe { (*prev).next };
      if next == target {
        unsafe { (*prev).next = (*target).next };
        list.count -= 1;
        return true;
      }
      prev = next;
    }

    false
  }

  fn list_contains(&self, order: usize, offset: usize) -> bool {
    self.free_iter(order).any(|o| o == offset)
  }

  fn free_iter(&self, order: usize) -> FreeIter<'_> {
    FreeIter {
      cur: self.free_lists[order].head,
      base: self.base as usize,
      _arena: PhantomData,
    }
  }

  #[inline(always)]
  fn record(&mut self, event: Event) {
    #[cfg(feature = "stats")]
    {
      let s = &mut self.stats;
      match event {
        Event::Alloc => s.allocations += 1,
        Event::AllocFailed => s.failed_allocations += 1,
        Event::Free => s.deallocations += 1,
        Event::Tombstone => s.tombstones += 1,
        Event::Split => s.splits += 1,
        Event::Merge => s.merges += 1,
      }
    }
    #[cfg(not(feature = "stats"))]
    let _ = event;
  }

  // ---------------------------------------------------------------------------
  // Allocation
  // ---------------------------------------------------------------------------

  /// Order serving a general request of `n` bytes, or `None` if no order can.
  fn request_order(&self, n: usize) -> Option<usize> {
    let needed = n
      .max(1)
      .checked_add(HEADER_OFFSET + ORDER_FIELD)?
      .checked_next_multiple_of(MIN)?;
    let order = order_for_size::<MIN>(needed);
    (order < self.max_order).then_some(order)
  }

  /// Finds a free block of `order`, splitting the smallest larger one if needed.
  fn take_block(&mut self, order: usize) -> Option<usize> {
    let mut i = order;
    while i < self.max_order && self.free_lists[i].head.is_null() {
      i += 1;
    }
    // Every order up to the top is empty.
    if i == self.max_order {
      return None;
    }

    let offset = unsafe { self.pop(i)? };
    while i > order {
      i -= 1;
      unsafe { self.push(i, offset + order_size::<MIN>(i)) };
      self.record(Event::Split);
    }
    Some(offset)
  }

  fn hand_out(&mut self, offset: usize, order: usize) -> Chunk {
    let block = self.block_at(offset);
    let size = order_size::<MIN>(order);
    unsafe { header::write(block, order) };
    self.allocated += size;
    debug_assert!(self.allocated <= self.total, "hand_out: allocated exceeds total");

    let data = header::data(block);
    let len = size - HEADER_OFFSET;
    if self.config.zero_on_alloc {
      unsafe { ptr::write_bytes(data, 0, len) };
    }
    self.record(Event::Alloc);
    Chunk::new(data, len)
  }

  fn failed(&mut self) -> Chunk {
    self.record(Event::AllocFailed);
    Chunk::NULL
  }

  /// Allocates at least `n` bytes.
  ///
  /// Returns [`Chunk::NULL`] when no block of the needed order can be found
  /// or made. The returned pointer is aligned to [`HEADER_OFFSET`].
  pub fn allocate(&mut self, n: usize) -> Chunk {
    let Some(order) = self.request_order(n) else {
      return self.failed();
    };
    match self.take_block(order) {
      Some(offset) => self.hand_out(offset, order),
      None => self.failed(),
    }
  }

  /// Allocates a block of exactly `n` bytes, header included, without
  /// splitting.
  ///
  /// `n` must be a power of two, at least `MIN`, and larger than the header.
  /// Fails if the free list for that order is empty, even when a larger free
  /// block exists.
  pub fn allocate_exact(&mut self, n: usize) -> Chunk {
    if n < MIN || !n.is_power_of_two() || n <= HEADER_OFFSET + ORDER_FIELD {
      return self.failed();
    }
    let order = order_for_size::<MIN>(n);
    if order >= self.max_order {
      return self.failed();
    }
    match unsafe { self.pop(order) } {
      Some(offset) => self.hand_out(offset, order),
      None => self.failed(),
    }
  }

  /// Like [`allocate`](Self::allocate), but repeated requests for the same
  /// order return the same block until a block of that order is freed.
  ///
  /// Results of the same order alias each other: do not use two of them as
  /// independent buffers.
  pub fn temporal_allocate(&mut self, n: usize) -> Chunk {
    let Some(order) = self.request_order(n) else {
      return self.failed();
    };

    let cached = self.active[order];
    if !cached.is_null() {
      if !unsafe { header::is_tombstoned(header::base_of(cached.ptr)) } {
        return cached;
      }
      self.active[order] = Chunk::NULL;
    }

    let chunk = match self.take_block(order) {
      Some(offset) => self.hand_out(offset, order),
      None => return self.failed(),
    };
    self.active[order] = chunk;
    chunk
  }

  // ---------------------------------------------------------------------------
  // Free
  // ---------------------------------------------------------------------------

  /// Block offset for a data pointer, if it can name a block in this region.
  fn block_offset(&self, ptr: *mut u8) -> Option<usize> {
    let addr = ptr as usize;
    let base = self.base as usize;
    if ptr.is_null() || addr < base + HEADER_OFFSET || addr >= base + self.total {
      return None;
    }
    let offset = addr - HEADER_OFFSET - base;
    (offset % MIN == 0).then_some(offset)
  }

  /// Reads and checks the order in the header of the block at `offset`.
  fn live_order(&self, offset: usize) -> Option<usize> {
    let block = self.block_at(offset);
    let order = unsafe { header::order(block) };
    if order < 0 || order as usize >= self.max_order {
      return None;
    }
    let order = order as usize;
    let size = order_size::<MIN>(order);
    if offset % size != 0 || offset + size > self.total {
      return None;
    }
    if unsafe { header::is_free(block) } {
      return None;
    }
    Some(order)
  }

  /// Returns a block to the arena, merging it with free buddies.
  ///
  /// Returns [`FreeStatus::Invalid`] for pointers that do not name a live
  /// block and [`FreeStatus::Tombstoned`] (changing nothing) for tombstoned
  /// blocks. [`FreeStatus::OutOfSpace`] means the block is back on a free
  /// list but a merge was refused because the top order was reached.
  ///
  /// # Safety
  /// `ptr` must have been returned by this arena and not freed since.
  pub unsafe fn deallocate(&mut self, ptr: *mut u8) -> FreeStatus {
    let Some(offset) = self.block_offset(ptr) else {
      return FreeStatus::Invalid;
    };
    let Some(order) = self.live_order(offset) else {
      return FreeStatus::Invalid;
    };
    if unsafe { header::is_tombstoned(self.block_at(offset)) } {
      return FreeStatus::Tombstoned;
    }
    unsafe { self.release(offset, order) }
  }

  /// Accounting and free-list insertion shared by free and reclaiming
  /// tombstone.
  unsafe fn release(&mut self, offset: usize, order: usize) -> FreeStatus {
    let size = order_size::<MIN>(order);
    debug_assert!(
      self.allocated >= size,
      "release: allocated {} < block size {size}",
      self.allocated
    );
    self.allocated -= size;
    self.active[order] = Chunk::NULL;
    self.record(Event::Free);

    if order == 0 && self.config.order_zero == OrderZeroFree::Reject {
      // Off the free lists for good; a second free must not count it again.
      unsafe { header::retire(self.block_at(offset)) };
      return FreeStatus::Failure;
    }

    if let Some(fill) = self.config.poison_on_free {
      let data = header::data(self.block_at(offset));
      unsafe { ptr::write_bytes(data, fill, size - HEADER_OFFSET) };
    }

    unsafe { self.coalesce(offset, order) }
  }

  /// Merges upward while the buddy is free, then inserts the result.
  unsafe fn coalesce(&mut self, mut offset: usize, mut order: usize) -> FreeStatus {
    let mut status = FreeStatus::Freed;
    loop {
      let size = order_size::<MIN>(order);
      let buddy = offset ^ size;
      if buddy + size > self.total {
        break;
      }
      // Merging here would create an order past the cap.
      if order + 1 >= self.max_order {
        if self.list_contains(order, buddy) {
          status = FreeStatus::OutOfSpace;
        }
        break;
      }
      if !unsafe { self.try_remove_buddy(order, buddy) } {
        break;
      }
      offset = offset.min(buddy);
      order += 1;
      self.record(Event::Merge);
    }
    unsafe { self.push(order, offset) };
    status
  }

  /// Marks a live block as tombstoned.
  ///
  /// Under [`TombstoneMode::Leak`] the block's bytes leave `used()` but the
  /// block is never handed out again. Under [`TombstoneMode::Reclaim`] it is
  /// freed like [`deallocate`](Self::deallocate) would.
  ///
  /// # Safety
  /// Same contract as [`deallocate`](Self::deallocate).
  pub unsafe fn tombstone(&mut self, ptr: *mut u8) -> FreeStatus {
    let Some(offset) = self.block_offset(ptr) else {
      return FreeStatus::Invalid;
    };
    let Some(order) = self.live_order(offset) else {
      return FreeStatus::Invalid;
    };
    let block = self.block_at(offset);
    if unsafe { header::is_tombstoned(block) } {
      return FreeStatus::Tombstoned;
    }
    unsafe { header::set_tombstone(block) };
    self.record(Event::Tombstone);

    match self.config.tombstone {
      TombstoneMode::Leak => {
        // The block stays off the free lists for good.
        self.allocated -= order_size::<MIN>(order);
        if self.active[order].ptr == ptr {
          self.active[order] = Chunk::NULL;
        }
        FreeStatus::Freed
      }
      TombstoneMode::Reclaim => unsafe { self.release(offset, order) },
    }
  }

  /// Resizes an allocation by copy-and-free.
  ///
  /// Keeps `node` when its block already fits `new_size` and is less than
  /// twice what is needed. A null `node` allocates; a zero `new_size` frees
  /// and returns [`Chunk::NULL`]. On failure `node` is left untouched.
  ///
  /// # Safety
  /// `node` must be null or a live allocation from this arena.
  pub unsafe fn reallocate(&mut self, node: Chunk, new_size: usize) -> Chunk {
    if node.ptr.is_null() {
      return self.allocate(new_size);
    }
    if new_size == 0 {
      let _ = unsafe { self.deallocate(node.ptr) };
      return Chunk::NULL;
    }
    let Some(cur) = self.data_len(node.ptr) else {
      return self.failed();
    };
    if cur >= new_size && new_size > (cur >> 1) {
      return Chunk::new(node.ptr, cur);
    }

    let Some(fresh) = self.allocate(new_size).ok() else {
      return Chunk::NULL;
    };
    unsafe { ptr::copy_nonoverlapping(node.ptr, fresh.ptr, cur.min(fresh.len)) };
    let _ = unsafe { self.deallocate(node.ptr) };
    fresh
  }

  // ---------------------------------------------------------------------------
  // Introspection
  // ---------------------------------------------------------------------------

  /// `total() - used()`. Leaked tombstones count as available.
  #[inline]
  pub fn available(&self) -> usize {
    self.total - self.allocated
  }

  /// Bytes in allocated blocks, counted by block size.
  #[inline]
  pub fn used(&self) -> usize {
    self.allocated
  }

  /// Managed bytes after alignment.
  #[inline]
  pub fn total(&self) -> usize {
    self.total
  }

  /// Number of orders; the largest block is `MIN << (max_order() - 1)`.
  #[inline]
  pub fn max_order(&self) -> usize {
    self.max_order
  }

  #[inline]
  pub fn base(&self) -> *mut u8 {
    self.base
  }

  #[inline]
  pub fn config(&self) -> &ArenaConfig {
    &self.config
  }

  /// Usable bytes of a live allocation, read from its header.
  pub fn data_len(&self, ptr: *mut u8) -> Option<usize> {
    let offset = self.block_offset(ptr)?;
    let order = self.live_order(offset)?;
    Some(order_size::<MIN>(order) - HEADER_OFFSET)
  }

  /// Best-effort size guess: the smallest order whose size divides the
  /// pointer's offset from `base`. Does not read headers, so it is wrong for
  /// any block bigger than that order. 0 outside the region.
  pub fn block_size(&self, ptr: *mut u8) -> usize {
    let addr = ptr as usize;
    let base = self.base as usize;
    if ptr.is_null() || addr < base || addr >= base + self.total {
      return 0;
    }
    let off = addr - base;
    (0..self.max_order)
      .map(order_size::<MIN>)
      .find(|len| off & (len - 1) == 0)
      .unwrap_or(0)
  }

  /// True unless the block behind `ptr` lies inside a free block.
  ///
  /// Walks every free list, so keep it off hot paths.
  pub fn is_allocated(&self, ptr: *mut u8) -> bool {
    let Some(offset) = self.block_offset(ptr) else {
      return false;
    };
    !(0..self.max_order).any(|order| {
      let size = order_size::<MIN>(order);
      self
        .free_iter(order)
        .any(|free| offset >= free && offset < free + size)
    })
  }

  /// Block size of a live allocation, 0 if `ptr` is free or foreign.
  pub fn allocated_size(&self, ptr: *mut u8) -> usize {
    if !self.is_allocated(ptr) {
      return 0;
    }
    self
      .data_len(ptr)
      .map_or(0, |len| len + HEADER_OFFSET)
  }

  /// Sum of the sizes of all free-list blocks.
  pub fn free_bytes(&self) -> usize {
    (0..self.max_order)
      .map(|order| self.free_lists[order].count * order_size::<MIN>(order))
      .sum()
  }

  /// Number of free blocks of `order`.
  pub fn free_blocks(&self, order: usize) -> usize {
    if order >= self.max_order {
      return 0;
    }
    self.free_lists[order].count
  }

  /// Sorted offsets of the free blocks of `order`.
  pub fn free_offsets(&self, order: usize) -> Vec<usize> {
    if order >= self.max_order {
      return Vec::new();
    }
    let mut offsets: Vec<usize> = self.free_iter(order).collect();
    offsets.sort_unstable();
    offsets
  }

  #[cfg(feature = "stats")]
  pub fn stats(&self) -> ArenaStats {
    self.stats
  }
}

impl<const MIN: usize, const ORDERS: usize> fmt::Debug for BuddyArena<'_, MIN, ORDERS> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BuddyArena")
      .field("base", &self.base)
      .field("min", &MIN)
      .field("total", &self.total)
      .field("max_order", &self.max_order)
      .field("used", &self.allocated)
      .finish()
  }
}

/// Offsets of the blocks on one free list.
struct FreeIter<'a> {
  cur: *mut FreeBlock,
  base: usize,
  _arena: PhantomData<&'a ()>,
}

impl Iterator for FreeIter<'_> {
  type Item = usize;

  fn next(&mut self) -> Option<usize> {
    if self.cur.is_null() {
      return None;
    }
    let offset = self.cur as usize - self.base;
    self.cur = unsafe { (*self.cur).next };
    Some(offset)
  }
}

/// Rounds `x` up to the next multiple of alignment `align`. Alignment must be a power of 2.
#[inline(always)]
const fn align_up(x: usize, align: usize) -> usize {
  let mask = align - 1;
  (x + mask) & !mask
}

const _: () = assert!(size_of::<FreeBlock>() == size_of::<*mut u8>());

#[cfg(test)]
mod tests {
  use super::*;

  #[repr(C, align(64))]
  struct Backing<const N: usize>([u8; N]);

  impl<const N: usize> Backing<N> {
    fn new() -> Box<Self> {
      Box::new(Self([0; N]))
    }
  }

  type Arena64<'a> = BuddyArena<'a, 64>;

  #[test]
  fn construction_derives_orders() {
    let mut mem = Backing::<4096>::new();
    let arena = Arena64::new(&mut mem.0);
    assert_eq!(arena.total(), 4096);
    assert_eq!(arena.max_order(), 7);
    assert_eq!(arena.free_offsets(6), vec![0]);
    assert_eq!(arena.available(), 4096);
    assert_eq!(arena.used(), 0);
  }

  #[test]
  fn unaligned_backing_is_realigned() {
    let mut mem = Backing::<8192>::new();
    let arena = Arena64::new(&mut mem.0[3..]);
    assert_eq!(arena.base() as usize % HEADER_OFFSET, 0);
    // 8189 bytes minus 61 bytes of alignment, truncated to 64.
    assert_eq!(arena.total(), 8128);
    assert_eq!(arena.free_bytes(), arena.total());
  }

  #[test]
  fn tail_is_seeded_in_smaller_blocks() {
    let mut mem = Backing::<{ 4096 + 2048 + 64 }>::new();
    let arena = Arena64::new(&mut mem.0);
    assert_eq!(arena.free_offsets(6), vec![0]);
    assert_eq!(arena.free_offsets(5), vec![4096]);
    assert_eq!(arena.free_offsets(0), vec![6144]);
    assert_eq!(arena.free_bytes(), arena.total());
  }

  #[test]
  fn order_cap_seeds_many_top_blocks() {
    let mut mem = Backing::<4096>::new();
    let arena = BuddyArena::<64, 3>::new(&mut mem.0);
    assert_eq!(arena.max_order(), 3);
    assert_eq!(arena.free_blocks(2), 16);
    assert_eq!(arena.free_bytes(), 4096);
  }

  #[test]
  fn too_small_region_is_an_error() {
    let mut mem = Backing::<64>::new();
    let err = Arena64::try_new(&mut mem.0[1..], ArenaConfig::default()).unwrap_err();
    assert!(matches!(err, ArenaError::RegionTooSmall { min: 64, .. }));
  }

  #[test]
  fn null_region_is_an_error() {
    let err = unsafe { Arena64::from_raw_parts(Chunk::NULL, ArenaConfig::default()) }.unwrap_err();
    assert_eq!(err, ArenaError::NullRegion);
  }

  #[test]
  #[should_panic(expected = "buddy arena")]
  fn new_panics_on_tiny_region() {
    let mut mem = [0u8; 16];
    let _ = Arena64::new(&mut mem);
  }

  #[test]
  fn allocate_splits_down_to_order() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let c = arena.allocate(100);
    assert!(!c.is_null());
    // 100 + 64 + 4 rounds to 192, which needs a 256-byte block.
    assert_eq!(c.len, 256 - HEADER_OFFSET);
    assert_eq!(c.ptr as usize % HEADER_OFFSET, 0);
    assert_eq!(arena.used(), 256);
    assert_eq!(arena.free_offsets(2), vec![256]);
    assert_eq!(arena.free_offsets(3), vec![512]);
    assert_eq!(arena.free_offsets(4), vec![1024]);
    assert_eq!(arena.free_offsets(5), vec![2048]);
    assert!(arena.free_offsets(6).is_empty());
  }

  #[test]
  fn zero_byte_request_still_gets_a_block() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let c = arena.allocate(0);
    assert!(!c.is_null());
    assert_eq!(c.len, 128 - HEADER_OFFSET);
  }

  #[test]
  fn oversized_request_fails() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    assert_eq!(arena.allocate(4096), Chunk::NULL);
    assert_eq!(arena.allocate(usize::MAX), Chunk::NULL);
    assert_eq!(arena.used(), 0);
  }

  #[test]
  fn exhaustion_returns_null() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let mut got = Vec::new();
    loop {
      let c = arena.allocate(1);
      if c.is_null() {
        break;
      }
      got.push(c);
    }
    assert_eq!(got.len(), 4096 / 128);
    assert_eq!(arena.available(), 0);
  }

  #[test]
  fn free_coalesces_back_to_one_block() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let a = arena.allocate(100);
    let b = arena.allocate(100);
    unsafe {
      assert_eq!(arena.deallocate(b.ptr), FreeStatus::Freed);
      assert_eq!(arena.deallocate(a.ptr), FreeStatus::Freed);
    }
    assert_eq!(arena.free_offsets(6), vec![0]);
    assert_eq!(arena.free_bytes(), 4096);
    assert_eq!(arena.used(), 0);
  }

  #[test]
  fn foreign_pointers_are_invalid() {
    let mut mem = Backing::<4096>::new();
    let mut other = [0u8; 256];
    let mut arena = Arena64::new(&mut mem.0);
    unsafe {
      assert_eq!(arena.deallocate(null_mut()), FreeStatus::Invalid);
      assert_eq!(arena.deallocate(other.as_mut_ptr()), FreeStatus::Invalid);
      assert_eq!(arena.deallocate(arena.base()), FreeStatus::Invalid);
    }
  }

  #[test]
  fn double_free_is_caught() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let keep = arena.allocate(100);
    let c = arena.allocate(100);
    unsafe {
      assert_eq!(arena.deallocate(c.ptr), FreeStatus::Freed);
      assert_eq!(arena.deallocate(c.ptr), FreeStatus::Invalid);
    }
    assert_eq!(arena.used(), 256);
    assert!(!keep.is_null());
  }

  #[test]
  fn corrupted_order_is_invalid() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let c = arena.allocate(100);
    unsafe {
      header::base_of(c.ptr).cast::<i32>().write_unaligned(42);
      assert_eq!(arena.deallocate(c.ptr), FreeStatus::Invalid);
      header::base_of(c.ptr).cast::<i32>().write_unaligned(header::ORDER_INVALID);
      assert_eq!(arena.deallocate(c.ptr), FreeStatus::Invalid);
    }
  }

  #[test]
  fn order_zero_free_is_rejected_by_default() {
    let mut mem = Backing::<4096>::new();
    let mut arena = BuddyArena::<128>::new(&mut mem.0);
    let c = arena.allocate(8);
    assert_eq!(c.len, 128 - HEADER_OFFSET);
    assert_eq!(arena.used(), 128);
    unsafe { assert_eq!(arena.deallocate(c.ptr), FreeStatus::Failure) };
    assert_eq!(arena.used(), 0);
    // The block never returned to a free list.
    assert_eq!(arena.free_bytes(), 4096 - 128);
  }

  #[test]
  fn rejected_order_zero_block_cannot_be_freed_twice() {
    let mut mem = Backing::<4096>::new();
    let mut arena = BuddyArena::<128>::new(&mut mem.0);
    let a = arena.allocate(8);
    let b = arena.allocate(8);
    unsafe {
      assert_eq!(arena.deallocate(a.ptr), FreeStatus::Failure);
      assert_eq!(arena.used(), 128);
      assert_eq!(arena.deallocate(a.ptr), FreeStatus::Invalid);
      assert_eq!(arena.tombstone(a.ptr), FreeStatus::Invalid);
    }
    assert_eq!(arena.used(), 128);
    assert_eq!(arena.allocated_size(a.ptr), 0);
    assert_eq!(arena.allocated_size(b.ptr), 128);
  }

  #[test]
  fn order_zero_free_can_reclaim() {
    let mut mem = Backing::<4096>::new();
    let config = ArenaConfig::default().with_order_zero(OrderZeroFree::Reclaim);
    let mut arena = BuddyArena::<128>::try_new(&mut mem.0, config).unwrap();
    let c = arena.allocate(8);
    unsafe { assert_eq!(arena.deallocate(c.ptr), FreeStatus::Freed) };
    assert_eq!(arena.free_offsets(5), vec![0]);
  }

  #[test]
  fn allocate_exact_never_splits() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    assert!(arena.allocate_exact(256).is_null());
    let whole = arena.allocate_exact(4096);
    assert_eq!(whole.len, 4096 - HEADER_OFFSET);
    assert_eq!(arena.used(), 4096);
  }

  #[test]
  fn allocate_exact_rejects_bad_sizes() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    assert!(arena.allocate_exact(32).is_null());
    assert!(arena.allocate_exact(64).is_null());
    assert!(arena.allocate_exact(300).is_null());
    assert!(arena.allocate_exact(8192).is_null());
  }

  #[test]
  fn allocate_exact_takes_existing_split_block() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let _a = arena.allocate(100);
    let c = arena.allocate_exact(256);
    assert_eq!(c.len, 256 - HEADER_OFFSET);
    assert_eq!(arena.offset_of(header::base_of(c.ptr)), 256);
  }

  #[test]
  fn temporal_allocate_memoizes_per_order() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let a = arena.temporal_allocate(100);
    let b = arena.temporal_allocate(120);
    assert_eq!(a, b);
    assert_eq!(arena.used(), 256);
    let other = arena.temporal_allocate(1000);
    assert_ne!(other.ptr, a.ptr);
  }

  #[test]
  fn temporal_cache_clears_on_free() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let a = arena.temporal_allocate(100);
    unsafe { assert_eq!(arena.deallocate(a.ptr), FreeStatus::Freed) };
    let b = arena.temporal_allocate(100);
    assert!(!b.is_null());
    assert_eq!(arena.used(), 256);
  }

  #[test]
  fn tombstone_leaks_by_default() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let c = arena.allocate(100);
    unsafe {
      assert_eq!(arena.tombstone(c.ptr), FreeStatus::Freed);
      assert_eq!(arena.tombstone(c.ptr), FreeStatus::Tombstoned);
      assert_eq!(arena.deallocate(c.ptr), FreeStatus::Tombstoned);
    }
    assert_eq!(arena.used(), 0);
    assert_eq!(arena.available(), 4096);
    assert_eq!(arena.free_bytes(), 4096 - 256);
    assert!(arena.is_allocated(c.ptr));
  }

  #[test]
  fn tombstone_reclaim_returns_block() {
    let mut mem = Backing::<4096>::new();
    let config = ArenaConfig::default().with_tombstone(TombstoneMode::Reclaim);
    let mut arena = Arena64::try_new(&mut mem.0, config).unwrap();
    let c = arena.allocate(100);
    unsafe { assert_eq!(arena.tombstone(c.ptr), FreeStatus::Freed) };
    assert_eq!(arena.free_offsets(6), vec![0]);
    assert_eq!(arena.used(), 0);
  }

  #[test]
  fn temporal_skips_tombstoned_cache() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let a = arena.temporal_allocate(100);
    unsafe { assert_eq!(arena.tombstone(a.ptr), FreeStatus::Freed) };
    let b = arena.temporal_allocate(100);
    assert_ne!(a.ptr, b.ptr);
  }

  #[test]
  fn reallocate_keeps_block_that_fits() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let c = arena.allocate(100);
    let same = unsafe { arena.reallocate(c, 150) };
    assert_eq!(same.ptr, c.ptr);
    assert_eq!(same.len, 192);
  }

  #[test]
  fn reallocate_grows_and_copies() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let c = arena.allocate(100);
    unsafe { ptr::write_bytes(c.ptr, 0x5A, c.len) };
    let grown = unsafe { arena.reallocate(c, 600) };
    assert!(!grown.is_null());
    assert_ne!(grown.ptr, c.ptr);
    let copied = unsafe { core::slice::from_raw_parts(grown.ptr, c.len) };
    assert!(copied.iter().all(|&b| b == 0x5A));
    assert_eq!(arena.used(), 1024);
  }

  #[test]
  fn reallocate_shrinks_when_far_too_big() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let c = arena.allocate(900);
    let shrunk = unsafe { arena.reallocate(c, 10) };
    assert_eq!(shrunk.len, 128 - HEADER_OFFSET);
    assert_eq!(arena.used(), 128);
  }

  #[test]
  fn reallocate_null_and_zero() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let c = unsafe { arena.reallocate(Chunk::NULL, 100) };
    assert!(!c.is_null());
    let gone = unsafe { arena.reallocate(c, 0) };
    assert!(gone.is_null());
    assert_eq!(arena.used(), 0);
  }

  #[test]
  fn introspection_queries() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let c = arena.allocate(100);
    assert!(arena.is_allocated(c.ptr));
    assert_eq!(arena.allocated_size(c.ptr), 256);
    assert_eq!(arena.data_len(c.ptr), Some(192));
    assert_eq!(arena.block_size(c.ptr), 64);
    assert_eq!(arena.block_size(null_mut()), 0);

    // Inside the free 256-byte buddy.
    let free_data = header::data(arena.block_at(256));
    assert!(!arena.is_allocated(free_data));
    assert_eq!(arena.allocated_size(free_data), 0);

    unsafe { assert_eq!(arena.deallocate(c.ptr), FreeStatus::Freed) };
    assert!(!arena.is_allocated(c.ptr));
    assert_eq!(arena.data_len(c.ptr), None);
  }

  #[test]
  fn zero_on_alloc_and_poison_on_free() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::try_new(&mut mem.0, ArenaConfig::hardened()).unwrap();
    let c = arena.allocate(100);
    unsafe { ptr::write_bytes(c.ptr, 0x11, c.len) };
    unsafe { assert_eq!(arena.deallocate(c.ptr), FreeStatus::Freed) };
    let data = unsafe { core::slice::from_raw_parts(c.ptr, c.len) };
    assert!(data.iter().all(|&b| b == ArenaConfig::POISON_BYTE));

    let again = arena.allocate(100);
    assert_eq!(again.ptr, c.ptr);
    let data = unsafe { core::slice::from_raw_parts(again.ptr, again.len) };
    assert!(data.iter().all(|&b| b == 0));
  }

  #[test]
  fn capped_orders_report_out_of_space() {
    let mut mem = Backing::<1024>::new();
    let mut arena = BuddyArena::<64, 3>::new(&mut mem.0);
    // Top order is 256 bytes: four of them cover the region.
    let blocks: Vec<Chunk> = (0..4).map(|_| arena.allocate(150)).collect();
    assert!(blocks.iter().all(|c| !c.is_null()));
    unsafe {
      assert_eq!(arena.deallocate(blocks[0].ptr), FreeStatus::Freed);
      assert_eq!(arena.deallocate(blocks[1].ptr), FreeStatus::OutOfSpace);
    }
    assert_eq!(arena.free_blocks(2), 2);
    assert_eq!(arena.free_bytes(), 512);
  }

  #[cfg(feature = "stats")]
  #[test]
  fn stats_count_events() {
    let mut mem = Backing::<4096>::new();
    let mut arena = Arena64::new(&mut mem.0);
    let a = arena.allocate(100);
    let _ = arena.allocate(1 << 20);
    unsafe { assert_eq!(arena.deallocate(a.ptr), FreeStatus::Freed) };
    let s = arena.stats();
    assert_eq!(s.allocations, 1);
    assert_eq!(s.failed_allocations, 1);
    assert_eq!(s.deallocations, 1);
    assert_eq!(s.splits, 4);
    assert_eq!(s.merges, 4);
  }
}
