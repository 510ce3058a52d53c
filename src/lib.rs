//! # tagalloc - A Boundary-Tag Heap Allocator
//!
//! This crate provides an **implicit free list allocator** with boundary tags,
//! immediate coalescing and first-fit placement, managing a single arena that
//! only ever grows at its high end.
//!
//! ## Overview
//!
//! Every block carries its size and allocation bit twice, at both ends:
//!
//! ```text
//!   Arena Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                              ARENA                                   │
//!   │                                                                      │
//!   │   ┌─────┬─────┬───────────┬───────────┬───────────┬────────────┬───┐ │
//!   │   │ pad │ pro │ A (alloc) │ free      │ B (alloc) │ free       │epi│ │
//!   │   └─────┴─────┴───────────┴───────────┴───────────┴────────────┴───┘ │
//!   │            ▲                                                     ▲   │
//!   │            │                                                     │   │
//!   │        Prologue                                             Epilogue │
//!   │      (scan start)                                    (moves on grow) │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Next block:     bp + size(bp)
//!   Previous block: bp - size(footer just below bp's header)
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macro (align!) and checked variant
//!   ├── block      - Boundary-tag codec and block addresses
//!   ├── memory     - Arena sources (Vec-backed, mmap-backed)
//!   ├── heap       - Heap: init, allocate, deallocate, placement, coalescing
//!   ├── resize     - Heap::resize and its in-place paths
//!   ├── check      - Consistency checker and statistics
//!   ├── config     - HeapConfig, CheckLevel
//!   └── error      - Error types
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::Heap;
//!
//! let mut heap = Heap::new().unwrap();
//!
//! let addr = heap.allocate(64).unwrap();
//! heap.payload_mut(addr).unwrap()[..5].copy_from_slice(b"hello");
//!
//! let addr = heap.resize(Some(addr), 256).unwrap().unwrap();
//! assert_eq!(&heap.payload(addr).unwrap()[..5], b"hello");
//!
//! heap.deallocate(addr).unwrap();
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: wrap the heap in a mutex to share it
//! - **No shrinking**: memory obtained from the source is never returned
//! - **8-byte alignment only**
//! - **Linear time**: allocation and free walk every block

pub mod align;
pub mod block;
mod check;
pub mod config;
pub mod error;
mod heap;
pub mod memory;
mod resize;

pub use block::{Addr, Block};
pub use check::HeapStats;
pub use config::{CheckLevel, HeapConfig};
pub use error::{AllocError, Error, InitError, InvariantViolation, UsageError, Violation};
pub use heap::{Heap, format_alloc, print_alloc};
#[cfg(unix)]
pub use memory::MmapMemory;
pub use memory::{MemorySource, VecMemory};

#[cfg(test)]
mod tests {
  use super::*;

  fn run_scenarios<M: MemorySource>(memory: M) {
    let config = HeapConfig::default().with_check(CheckLevel::Full);
    let mut heap = Heap::init(memory, config).unwrap();

    // Allocate(100), Allocate(200), free the first, Allocate(90) reuses it.
    let a = heap.allocate(100).unwrap();
    let b = heap.allocate(200).unwrap();
    heap.deallocate(a).unwrap();
    assert_eq!(heap.allocate(90).unwrap(), a);
    heap.deallocate(a).unwrap();
    heap.deallocate(b).unwrap();

    // Allocate(64), free, Allocate(64) lands on the same address.
    let a = heap.allocate(64).unwrap();
    heap.deallocate(a).unwrap();
    assert_eq!(heap.allocate(64).unwrap(), a);
    heap.deallocate(a).unwrap();

    // Allocate(100), shrink to 50 in place, Allocate(40) takes the remainder.
    let a = heap.allocate(100).unwrap();
    assert_eq!(heap.resize(Some(a), 50).unwrap(), Some(a));
    let c = heap.allocate(40).unwrap();
    assert_eq!(c.offset(), a.offset() + 64);

    heap.check_heap().unwrap();
  }

  #[test]
  fn test_scenarios_vec() {
    run_scenarios(VecMemory::default());
  }

  #[cfg(unix)]
  #[test]
  fn test_scenarios_mmap() {
    run_scenarios(MmapMemory::new(1 << 20).unwrap());
  }

  #[cfg(unix)]
  #[test]
  fn test_mmap_payload_absolute_alignment() {
    let memory = MmapMemory::new(1 << 20).unwrap();
    let mut heap = Heap::init(memory, HeapConfig::default()).unwrap();

    for size in [1, 7, 24, 333, 4096] {
      let addr = heap.allocate(size).unwrap();
      let absolute = heap.memory().base() as usize + addr.offset();
      assert_eq!(absolute % align::ALIGNMENT, 0);
    }
  }

  #[test]
  fn test_errors_display() {
    assert_eq!(
      Error::from(UsageError::DoubleFree(Addr::new(16))).to_string(),
      "0x10 is already freed"
    );
    assert_eq!(
      Error::from(AllocError::OutOfMemory { requested: 4096 }).to_string(),
      "out of memory: failed to extend the arena by 4096 bytes"
    );
    assert_eq!(
      InvariantViolation::new(12, Violation::TagMismatch).to_string(),
      "heap invariant violated at offset 12: TagMismatch"
    );
  }
}
