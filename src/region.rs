//! Anonymous mappings used as arena backing memory.

use core::ptr::null_mut;

use crate::Chunk;

/// Page size assumed when rounding mapping lengths.
pub const PAGE_SIZE: usize = 4096;

/// Huge page size tried by [`MappedRegion::map_huge`].
pub const HUGE_PAGE_SIZE: usize = 2 << 20;

unsafe fn os_mmap(size: usize, flags: libc::c_int) -> *mut u8 {
  let ptr = unsafe {
    libc::mmap(
      null_mut(),
      size,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | flags,
      -1,
      0,
    )
  };

  if ptr == libc::MAP_FAILED {
    null_mut()
  } else {
    ptr as *mut u8
  }
}

unsafe fn os_munmap(ptr: *mut u8, size: usize) {
  unsafe { libc::munmap(ptr.cast(), size) };
}

/// A private anonymous mapping, unmapped on drop.
///
/// Arenas never unmap the memory they manage; whoever owns the
/// `MappedRegion` does.
pub struct MappedRegion {
  ptr: *mut u8,
  len: usize,
}

// The mapping is owned exclusively.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
  /// Maps `len` bytes rounded up to [`PAGE_SIZE`].
  pub fn map(len: usize) -> Option<Self> {
    Self::map_pages(len)
  }

  /// Maps `len` bytes on huge pages, falling back to normal pages when the
  /// kernel has none to give.
  pub fn map_huge(len: usize) -> Option<Self> {
    #[cfg(target_os = "linux")]
    {
      let size = len.checked_next_multiple_of(HUGE_PAGE_SIZE)?;
      if size != 0 {
        let ptr = unsafe { os_mmap(size, libc::MAP_HUGETLB) };
        if !ptr.is_null() {
          return Some(Self { ptr, len: size });
        }
      }
    }
    Self::map_pages(len)
  }

  fn map_pages(len: usize) -> Option<Self> {
    let size = len.checked_next_multiple_of(PAGE_SIZE)?;
    if size == 0 {
      return None;
    }
    let ptr = unsafe { os_mmap(size, 0) };
    if ptr.is_null() {
      return None;
    }
    Some(Self { ptr, len: size })
  }

  #[inline]
  pub fn chunk(&self) -> Chunk {
    Chunk::new(self.ptr, self.len)
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.len
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn as_mut_slice(&mut self) -> &mut [u8] {
    unsafe { core::slice::from_raw_parts_mut(self.ptr, self.len) }
  }
}

impl Drop for MappedRegion {
  fn drop(&mut self) {
    if !self.ptr.is_null() && !self.is_empty() {
      unsafe { os_munmap(self.ptr, self.len) };
    }
  }
}
