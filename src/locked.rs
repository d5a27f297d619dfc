//! Serialized access to an arena, and a `GlobalAlloc` front end.

use core::{
  alloc::{GlobalAlloc, Layout},
  cell::UnsafeCell,
  hint,
  ptr::null_mut,
  sync::atomic::{AtomicBool, Ordering},
};
use std::sync::OnceLock;

use crate::{
  ArenaConfig, ArenaError, BuddyArena, Chunk, FreeStatus, MappedRegion, header::HEADER_OFFSET,
};

// =============================================================================
// Spin lock
// =============================================================================

pub struct SpinLock {
  locked: AtomicBool,
}

impl SpinLock {
  pub const fn new() -> Self {
    Self {
      locked: AtomicBool::new(false),
    }
  }

  #[inline]
  pub fn lock(&self) -> SpinGuard<'_> {
    while self
      .locked
      .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
      .is_err()
    {
      while self.locked.load(Ordering::Relaxed) {
        hint::spin_loop();
      }
    }
    SpinGuard { lock: self }
  }

  #[inline]
  fn unlock(&self) {
    self.locked.store(false, Ordering::Release);
  }
}

impl Default for SpinLock {
  fn default() -> Self {
    Self::new()
  }
}

/// Releases the lock on drop, including during unwinding.
pub struct SpinGuard<'a> {
  lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
  fn drop(&mut self) {
    self.lock.unlock();
  }
}

// =============================================================================
// Locked arena
// =============================================================================

/// A [`BuddyArena`] over its own mapping, with every call serialized by a
/// spin lock.
pub struct LockedArena<const MIN: usize, const ORDERS: usize = 64> {
  lock: SpinLock,
  // Declared before `region` so it is dropped first.
  arena: UnsafeCell<BuddyArena<'static, MIN, ORDERS>>,
  region: MappedRegion,
}

unsafe impl<const MIN: usize, const ORDERS: usize> Sync for LockedArena<MIN, ORDERS> {}

impl<const MIN: usize, const ORDERS: usize> LockedArena<MIN, ORDERS> {
  /// Maps `len` bytes and builds an arena over them. With the `huge-pages`
  /// feature the mapping tries huge pages first.
  pub fn map(len: usize, config: ArenaConfig) -> Result<Self, ArenaError> {
    let region = if cfg!(feature = "huge-pages") {
      MappedRegion::map_huge(len)
    } else {
      MappedRegion::map(len)
    };
    let region = region.ok_or(ArenaError::MapFailed { len })?;
    // The mapping lives exactly as long as the arena: both are owned here
    // and the arena is dropped first.
    let arena = unsafe { BuddyArena::from_raw_parts(region.chunk(), config)? };
    Ok(Self {
      lock: SpinLock::new(),
      arena: UnsafeCell::new(arena),
      region,
    })
  }

  /// Runs `f` with exclusive access to the arena.
  pub fn with<R>(&self, f: impl FnOnce(&mut BuddyArena<'static, MIN, ORDERS>) -> R) -> R {
    let _guard = self.lock.lock();
    f(unsafe { &mut *self.arena.get() })
  }

  pub fn allocate(&self, n: usize) -> Chunk {
    self.with(|arena| arena.allocate(n))
  }

  pub fn used(&self) -> usize {
    self.with(|arena| arena.used())
  }

  pub fn available(&self) -> usize {
    self.with(|arena| arena.available())
  }

  /// Bytes mapped for this arena, before alignment.
  pub fn mapped_len(&self) -> usize {
    self.region.len()
  }
}

unsafe impl<const MIN: usize, const ORDERS: usize> GlobalAlloc for LockedArena<MIN, ORDERS> {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    // Data pointers are only guaranteed header-aligned.
    if layout.align() > HEADER_OFFSET {
      return null_mut();
    }
    self.with(|arena| arena.allocate(layout.size()).ptr)
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
    if ptr.is_null() {
      return;
    }
    let status = self.with(|arena| unsafe { arena.deallocate(ptr) });
    // Anything but `Invalid` means the bytes were released.
    debug_assert!(status != FreeStatus::Invalid, "dealloc: {ptr:p} -> {status:?}");
  }

  unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
    if layout.align() > HEADER_OFFSET {
      return null_mut();
    }
    self.with(|arena| unsafe { arena.reallocate(Chunk::new(ptr, layout.size()), new_size).ptr })
  }
}

// =============================================================================
// Lazily mapped global arena
// =============================================================================

/// A `#[global_allocator]`-ready arena of `SIZE` bytes, mapped on first use.
///
/// ```ignore
/// #[global_allocator]
/// static ALLOC: cleave::GlobalBuddy<{ 1 << 30 }> = cleave::GlobalBuddy::new();
/// ```
pub struct GlobalBuddy<const SIZE: usize, const MIN: usize = 64, const ORDERS: usize = 64> {
  arena: OnceLock<LockedArena<MIN, ORDERS>>,
}

impl<const SIZE: usize, const MIN: usize, const ORDERS: usize> GlobalBuddy<SIZE, MIN, ORDERS> {
  pub const fn new() -> Self {
    Self {
      arena: OnceLock::new(),
    }
  }

  pub fn get(&self) -> &LockedArena<MIN, ORDERS> {
    self.arena.get_or_init(|| match LockedArena::map(SIZE, ArenaConfig::default()) {
      Ok(arena) => arena,
      Err(e) => panic!("global buddy arena: {e}"),
    })
  }
}

impl<const SIZE: usize, const MIN: usize, const ORDERS: usize> Default
  for GlobalBuddy<SIZE, MIN, ORDERS>
{
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl<const SIZE: usize, const MIN: usize, const ORDERS: usize> GlobalAlloc
  for GlobalBuddy<SIZE, MIN, ORDERS>
{
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    unsafe { self.get().alloc(layout) }
  }

  unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
    unsafe { self.get().dealloc(ptr, layout) }
  }

  unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
    unsafe { self.get().realloc(ptr, layout, new_size) }
  }
}
