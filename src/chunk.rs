use core::ptr::null_mut;

/// A `{pointer, length}` span of raw memory.
///
/// Used both as the input handed to an arena at construction and as the
/// result of every allocation. A null pointer together with a zero length is
/// the only failure signal an allocation ever produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
  pub ptr: *mut u8,
  pub len: usize,
}

impl Chunk {
  /// The failed allocation.
  pub const NULL: Chunk = Chunk {
    ptr: null_mut(),
    len: 0,
  };

  #[inline]
  pub const fn new(ptr: *mut u8, len: usize) -> Self {
    Self { ptr, len }
  }

  #[inline]
  pub fn from_slice(mem: &mut [u8]) -> Self {
    Self {
      ptr: mem.as_mut_ptr(),
      len: mem.len(),
    }
  }

  #[inline]
  pub fn is_null(&self) -> bool {
    self.ptr.is_null() || self.len == 0
  }

  /// `Some(self)` unless this is the failure value.
  #[inline]
  pub fn ok(self) -> Option<Chunk> {
    if self.is_null() { None } else { Some(self) }
  }
}

impl Default for Chunk {
  fn default() -> Self {
    Self::NULL
  }
}
