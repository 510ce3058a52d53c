//! Where the arena's bytes come from.
//!
//! The heap only ever asks its source for more memory at the high end, the
//! way a program asks `sbrk(2)` to move its break:
//!
//! ```text
//!   0                                   brk              max_heap
//!   ├───────────────────────────────────┼───────────────────┤
//!   │ arena (owned by the heap)         │ not yet handed out│
//!   └───────────────────────────────────┴───────────────────┘
//!                                       ▲
//!                       sbrk(n) returns this, then moves it by n
//! ```
//!
//! Memory is never given back while the source is alive.

use log::debug;

/// Default upper bound on the arena, 20 MiB.
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

/// A contiguous region that can only grow at its high end.
pub trait MemorySource {
  /// Grows the region by `incr` bytes and returns the old break, or `None`
  /// when the request cannot be satisfied. A refused request changes nothing.
  fn sbrk(
    &mut self,
    incr: usize,
  ) -> Option<usize>;

  /// The bytes below the current break.
  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];

  /// Current break, i.e. the length of the region.
  fn brk(&self) -> usize {
    self.bytes().len()
  }
}

/// Arena backed by a `Vec<u8>` that refuses to grow past `max_heap`.
#[derive(Debug)]
pub struct VecMemory {
  buf: Vec<u8>,
  max_heap: usize,
}

impl VecMemory {
  pub fn new(max_heap: usize) -> Self {
    Self {
      buf: Vec::new(),
      max_heap,
    }
  }

  pub fn max_heap(&self) -> usize {
    self.max_heap
  }
}

impl Default for VecMemory {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_HEAP)
  }
}

impl MemorySource for VecMemory {
  fn sbrk(
    &mut self,
    incr: usize,
  ) -> Option<usize> {
    let old_brk = self.buf.len();
    let new_brk = old_brk.checked_add(incr)?;
    if new_brk > self.max_heap {
      debug!("sbrk({}) refused: break {} limit {}", incr, old_brk, self.max_heap);
      return None;
    }
    self.buf.resize(new_brk, 0);
    Some(old_brk)
  }

  fn bytes(&self) -> &[u8] {
    &self.buf
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    &mut self.buf
  }
}

#[cfg(unix)]
pub use self::mmap::MmapMemory;

#[cfg(unix)]
mod mmap {
  use std::{ptr, slice};

  use libc::{
    MAP_ANONYMOUS, MAP_FAILED, MAP_NORESERVE, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void, mmap,
    munmap,
  };
  use log::debug;

  use super::MemorySource;

  /// Arena carved out of one anonymous mapping reserved up front.
  ///
  /// The whole `max_heap` range is mapped once, so the bytes never move and
  /// offsets keep the alignment of the page-aligned base. Pages are only
  /// touched as the break advances over them.
  pub struct MmapMemory {
    base: *mut u8,
    brk: usize,
    max_heap: usize,
  }

  impl MmapMemory {
    /// Reserves `max_heap` bytes of address space. Returns `None` if the
    /// mapping fails or `max_heap` is zero.
    pub fn new(max_heap: usize) -> Option<Self> {
      if max_heap == 0 {
        return None;
      }

      let base = unsafe {
        mmap(
          ptr::null_mut(),
          max_heap,
          PROT_READ | PROT_WRITE,
          MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
          -1,
          0,
        )
      };

      if base == MAP_FAILED {
        debug!("mmap of {} bytes failed", max_heap);
        return None;
      }

      Some(Self {
        base: base as *mut u8,
        brk: 0,
        max_heap,
      })
    }

    pub fn max_heap(&self) -> usize {
      self.max_heap
    }

    /// Absolute address of the start of the region.
    pub fn base(&self) -> *const u8 {
      self.base
    }
  }

  impl MemorySource for MmapMemory {
    fn sbrk(
      &mut self,
      incr: usize,
    ) -> Option<usize> {
      let new_brk = self.brk.checked_add(incr)?;
      if new_brk > self.max_heap {
        debug!("sbrk({}) refused: break {} limit {}", incr, self.brk, self.max_heap);
        return None;
      }
      let old_brk = self.brk;
      self.brk = new_brk;
      Some(old_brk)
    }

    fn bytes(&self) -> &[u8] {
      // [base, base + brk) lies inside the live mapping and is only reachable
      // through `self`.
      unsafe { slice::from_raw_parts(self.base, self.brk) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
      unsafe { slice::from_raw_parts_mut(self.base, self.brk) }
    }

    fn brk(&self) -> usize {
      self.brk
    }
  }

  impl Drop for MmapMemory {
    fn drop(&mut self) {
      unsafe {
        munmap(self.base as *mut c_void, self.max_heap);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_vec_sbrk() {
    let mut mem = VecMemory::new(64);

    assert_eq!(mem.max_heap(), 64);
    assert_eq!(mem.sbrk(16), Some(0));
    assert_eq!(mem.sbrk(32), Some(16));
    assert_eq!(mem.brk(), 48);

    mem.bytes_mut()[47] = 0xAB;
    assert_eq!(mem.bytes()[47], 0xAB);

    assert_eq!(mem.sbrk(32), None);
    assert_eq!(mem.brk(), 48);
    assert_eq!(mem.sbrk(16), Some(48));
    assert_eq!(mem.sbrk(1), None);
  }

  #[test]
  fn test_vec_sbrk_overflow() {
    let mut mem = VecMemory::new(usize::MAX);
    assert_eq!(mem.sbrk(8), Some(0));
    assert_eq!(mem.sbrk(usize::MAX), None);
    assert_eq!(mem.brk(), 8);
  }

  #[cfg(unix)]
  #[test]
  fn test_mmap_sbrk() {
    let mut mem = MmapMemory::new(1 << 16).expect("mmap");

    assert_eq!(mem.base() as usize % 4096, 0);
    assert_eq!(mem.sbrk(4096), Some(0));
    assert!(mem.bytes().iter().all(|&b| b == 0));

    mem.bytes_mut()[100] = 7;
    assert_eq!(mem.sbrk(4096), Some(4096));
    assert_eq!(mem.bytes()[100], 7);
    assert_eq!(mem.bytes().len(), 8192);

    assert_eq!(mem.sbrk(mem.max_heap()), None);
    assert_eq!(mem.brk(), 8192);
    assert_eq!(mem.sbrk(mem.max_heap() - 8192), Some(8192));
  }

  #[cfg(unix)]
  #[test]
  fn test_mmap_zero_size() {
    assert!(MmapMemory::new(0).is_none());
  }
}
