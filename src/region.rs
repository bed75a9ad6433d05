//! Backing storage for the heap.
//!
//! A [`Region`] is a contiguous range of bytes with a movable break, in the
//! spirit of `sbrk(2)`: it can only grow, and growing returns the old break,
//! which is where the newly added bytes begin.
//!
//! ```text
//!   0                                 len()              limit()
//!   ├─────────────── managed heap ──────┼──── reserve ──────┤
//!                                       ▲
//!                                     break
//! ```

use crate::error::{HeapError, HeapResult};

/// Upper bound on the managed heap unless configured otherwise.
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

pub trait Region {
  /// Moves the break `increment` bytes up and returns its previous position.
  /// Fails without side effects if the region cannot grow that far.
  fn extend(
    &mut self,
    increment: usize,
  ) -> HeapResult<usize>;

  /// Current break.
  fn len(&self) -> usize;

  /// Largest break the region will ever accept.
  fn limit(&self) -> usize;

  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

fn refuse(
  increment: usize,
  len: usize,
  limit: usize,
) -> HeapError {
  HeapError::OutOfMemory {
    requested: increment,
    heap_size: len,
    limit,
  }
}

/// Region backed by a zero-filled `Vec<u8>`, bounded by a fixed limit.
#[derive(Debug, Clone)]
pub struct VecRegion {
  buf: Vec<u8>,
  limit: usize,
}

impl VecRegion {
  pub fn new(limit: usize) -> Self {
    Self {
      buf: Vec::new(),
      limit,
    }
  }

  /// Bytes still available below the limit.
  pub fn remaining(&self) -> usize {
    self.limit - self.buf.len()
  }
}

impl Default for VecRegion {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_HEAP)
  }
}

impl Region for VecRegion {
  fn extend(
    &mut self,
    increment: usize,
  ) -> HeapResult<usize> {
    let old = self.buf.len();

    if increment > self.limit - old {
      return Err(refuse(increment, old, self.limit));
    }

    self.buf.resize(old + increment, 0);
    Ok(old)
  }

  fn len(&self) -> usize {
    self.buf.len()
  }

  fn limit(&self) -> usize {
    self.limit
  }

  fn bytes(&self) -> &[u8] {
    &self.buf
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    &mut self.buf
  }
}

#[cfg(unix)]
pub use mmap::MmapRegion;

#[cfg(unix)]
mod mmap {
  use std::{ptr::NonNull, slice};

  use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void, mmap, munmap};
  use log::debug;

  use super::{Region, refuse};
  use crate::error::{HeapError, HeapResult};

  /// Region carved out of one anonymous mapping reserved up front. The break
  /// only moves inside the mapping, so memory already handed out never moves.
  #[derive(Debug)]
  pub struct MmapRegion {
    base: NonNull<u8>,
    brk: usize,
    limit: usize,
  }

  impl MmapRegion {
    pub fn new(limit: usize) -> HeapResult<Self> {
      if limit == 0 {
        return Err(HeapError::InvalidConfig("mapping limit must be non-zero".into()));
      }

      let addr = unsafe {
        mmap(
          std::ptr::null_mut(),
          limit,
          PROT_READ | PROT_WRITE,
          MAP_PRIVATE | MAP_ANONYMOUS,
          -1,
          0,
        )
      };

      if addr == MAP_FAILED {
        return Err(refuse(limit, 0, 0));
      }

      let base = NonNull::new(addr as *mut u8).ok_or_else(|| refuse(limit, 0, 0))?;
      debug!("reserved {} bytes at {:p}", limit, base);

      Ok(Self { base, brk: 0, limit })
    }

    /// Start of the mapping, for display purposes.
    pub fn base(&self) -> *const u8 {
      self.base.as_ptr()
    }
  }

  impl Region for MmapRegion {
    fn extend(
      &mut self,
      increment: usize,
    ) -> HeapResult<usize> {
      let old = self.brk;

      if increment > self.limit - old {
        return Err(refuse(increment, old, self.limit));
      }

      self.brk += increment;
      debug!(
        "break moved by {} bytes, break = {:p}",
        increment,
        unsafe { self.base.as_ptr().add(self.brk) }
      );
      Ok(old)
    }

    fn len(&self) -> usize {
      self.brk
    }

    fn limit(&self) -> usize {
      self.limit
    }

    fn bytes(&self) -> &[u8] {
      unsafe { slice::from_raw_parts(self.base.as_ptr(), self.brk) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
      unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.brk) }
    }
  }

  impl Drop for MmapRegion {
    fn drop(&mut self) {
      unsafe {
        munmap(self.base.as_ptr() as *mut c_void, self.limit);
      }
    }
  }
}
