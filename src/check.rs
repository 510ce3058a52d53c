//! Heap consistency checking and statistics.

use std::fmt;

use log::error;

use crate::align::ALIGNMENT;
use crate::block::{self, DSIZE, MIN_BLOCK, WSIZE};
use crate::config::CheckLevel;
use crate::error::{InvariantViolation, Violation};
use crate::heap::Heap;
use crate::memory::MemorySource;

/// Logs and panics. Corrupt metadata is never recovered from.
#[cold]
pub(crate) fn fatal(violation: InvariantViolation) -> ! {
  error!("{}", violation);
  panic!("{}", violation);
}

/// Totals gathered by walking the block chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub arena_size: usize,
  pub allocated_blocks: usize,
  pub free_blocks: usize,
  /// Bytes spanned by allocated blocks, tags included.
  pub allocated_bytes: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

impl HeapStats {
  /// Share of the arena held by allocated blocks.
  pub fn utilization(&self) -> f64 {
    if self.arena_size == 0 {
      return 0.0;
    }
    self.allocated_bytes as f64 / self.arena_size as f64
  }
}

impl fmt::Display for HeapStats {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "arena {} bytes, {} allocated ({} bytes), {} free ({} bytes, largest {}), utilization {:.1}%",
      self.arena_size,
      self.allocated_blocks,
      self.allocated_bytes,
      self.free_blocks,
      self.free_bytes,
      self.largest_free,
      self.utilization() * 100.0
    )
  }
}

impl<M: MemorySource> Heap<M> {
  pub fn stats(&self) -> HeapStats {
    self.blocks().fold(
      HeapStats {
        arena_size: self.arena_size(),
        ..HeapStats::default()
      },
      |mut stats, block| {
        if block.allocated {
          stats.allocated_blocks += 1;
          stats.allocated_bytes += block.size;
        } else {
          stats.free_blocks += 1;
          stats.free_bytes += block.size;
          stats.largest_free = stats.largest_free.max(block.size);
        }
        stats
      },
    )
  }

  /// Verifies the sentinels and every block between them.
  pub fn check_heap(&self) -> Result<(), InvariantViolation> {
    self.check_sentinels()?;
    self.check_blocks()
  }

  /// Runs the configured level of checking after `op`, panicking on failure.
  pub(crate) fn verify(
    &self,
    op: &str,
  ) {
    let result = match self.config.check {
      CheckLevel::Off => Ok(()),
      CheckLevel::Sentinels => self.check_sentinels(),
      CheckLevel::Full => self.check_heap(),
    };
    if let Err(violation) = result {
      error!("consistency check failed after {}", op);
      fatal(violation);
    }
  }

  fn check_sentinels(&self) -> Result<(), InvariantViolation> {
    let mem = self.memory.bytes();
    let prologue = block::pack(DSIZE, true);

    if self.heap_list >= mem.len()
      || block::get(mem, block::header(self.heap_list)) != prologue
      || block::get(mem, self.heap_list) != prologue
    {
      return Err(InvariantViolation::new(
        block::header(self.heap_list),
        Violation::PrologueTag,
      ));
    }

    if self.epilogue <= self.heap_list || self.epilogue + WSIZE != mem.len() {
      return Err(InvariantViolation::new(
        self.epilogue,
        Violation::EpilogueOutOfBounds,
      ));
    }
    if block::get(mem, self.epilogue) != block::pack(0, true) {
      return Err(InvariantViolation::new(self.epilogue, Violation::EpilogueTag));
    }

    Ok(())
  }

  fn check_blocks(&self) -> Result<(), InvariantViolation> {
    let mem = self.memory.bytes();
    let end = self.epilogue + WSIZE;
    let mut bp = self.heap_list + DSIZE;
    let mut prev_free = false;

    while bp < end {
      let tag = block::get(mem, block::header(bp));
      let size = block::tag_size(tag);
      let violation = |kind| Err(InvariantViolation::new(block::header(bp), kind));

      if bp % ALIGNMENT != 0 {
        return violation(Violation::Misaligned);
      }
      if size < MIN_BLOCK {
        return violation(Violation::Undersized);
      }
      if bp + size > end {
        return violation(Violation::CrossesEpilogue);
      }
      if block::get(mem, bp + size - DSIZE) != tag {
        return violation(Violation::TagMismatch);
      }

      let free = !block::tag_allocated(tag);
      if free && prev_free {
        return violation(Violation::AdjacentFree);
      }
      prev_free = free;
      bp += size;
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::HeapConfig;
  use crate::memory::VecMemory;

  fn unchecked_heap() -> Heap {
    heap_at(CheckLevel::Off)
  }

  fn heap_at(check: CheckLevel) -> Heap {
    Heap::init(VecMemory::default(), HeapConfig::default().with_check(check)).unwrap()
  }

  #[test]
  fn test_fresh_heap_is_consistent() {
    let heap = unchecked_heap();
    assert_eq!(heap.check_heap(), Ok(()));
    assert_eq!(
      heap.stats(),
      HeapStats {
        arena_size: 16,
        ..HeapStats::default()
      }
    );
  }

  #[test]
  fn test_stats() {
    let mut heap = unchecked_heap();

    let a = heap.allocate(100).unwrap();
    heap.allocate(200).unwrap();
    heap.deallocate(a).unwrap();

    let stats = heap.stats();
    assert_eq!(stats.arena_size, 16 + 4096);
    assert_eq!(stats.allocated_blocks, 1);
    assert_eq!(stats.allocated_bytes, 208);
    assert_eq!(stats.free_blocks, 2);
    assert_eq!(stats.free_bytes, 4096 - 208);
    assert_eq!(stats.largest_free, 4096 - 208 - 112);
    assert!(stats.utilization() > 0.05 && stats.utilization() < 0.06);
    assert!(stats.to_string().starts_with("arena 4112 bytes, 1 allocated"));
  }

  #[test]
  fn test_detects_tag_mismatch() {
    let mut heap = unchecked_heap();
    let a = heap.allocate(40).unwrap();

    let footer = block::footer(heap.memory.bytes(), a.offset());
    block::put(heap.memory.bytes_mut(), footer, block::pack(40, true));

    let err = heap.check_heap().unwrap_err();
    assert_eq!(err.kind, Violation::TagMismatch);
    assert_eq!(err.offset, block::header(a.offset()));
  }

  #[test]
  fn test_detects_adjacent_free() {
    let mut heap = unchecked_heap();
    let a = heap.allocate(40).unwrap();
    heap.allocate(40).unwrap();

    // Clear both bits by hand, skipping the coalescer.
    let mem = heap.memory.bytes_mut();
    let a_size = block::size(mem, a.offset());
    block::set(mem, a.offset(), a_size, false);
    let b = block::next(mem, a.offset());
    let b_size = block::size(mem, b);
    block::set(mem, b, b_size, false);

    let err = heap.check_heap().unwrap_err();
    assert_eq!(err.kind, Violation::AdjacentFree);
    assert_eq!(err.offset, block::header(b));
  }

  #[test]
  fn test_detects_bad_sentinels() {
    let mut heap = unchecked_heap();
    let epilogue = heap.epilogue;
    block::put(heap.memory.bytes_mut(), epilogue, block::pack(8, true));
    assert_eq!(heap.check_heap().unwrap_err().kind, Violation::EpilogueTag);

    let mut heap = unchecked_heap();
    let prologue = block::header(heap.heap_list);
    block::put(heap.memory.bytes_mut(), prologue, block::pack(8, false));
    assert_eq!(heap.check_heap().unwrap_err().kind, Violation::PrologueTag);
  }

  #[test]
  fn test_detects_undersized_block() {
    let mut heap = unchecked_heap();
    let a = heap.allocate(40).unwrap();
    // A zero size would stall any walk; the checker reports it instead.
    block::put(heap.memory.bytes_mut(), block::header(a.offset()), block::pack(0, true));
    assert_eq!(heap.check_heap().unwrap_err().kind, Violation::Undersized);
  }

  #[test]
  #[should_panic(expected = "TagMismatch")]
  fn test_verify_panics() {
    let mut heap = heap_at(CheckLevel::Full);
    let a = heap.allocate(40).unwrap();
    let footer = block::footer(heap.memory.bytes(), a.offset());
    block::put(heap.memory.bytes_mut(), footer, block::pack(40, true));
    heap.allocate(8).unwrap();
  }

  #[test]
  #[should_panic(expected = "EpilogueTag")]
  fn test_sentinel_level_catches_epilogue() {
    let mut heap = heap_at(CheckLevel::Sentinels);
    heap.allocate(40).unwrap();

    let epilogue = heap.epilogue;
    block::put(heap.memory.bytes_mut(), epilogue, block::pack(8, true));
    // Fits in the free tail, so the arena is not extended over the epilogue.
    heap.allocate(8).unwrap();
  }

  #[test]
  fn test_sentinel_level_skips_block_walk() {
    let mut heap = heap_at(CheckLevel::Sentinels);
    let a = heap.allocate(40).unwrap();

    let footer = block::footer(heap.memory.bytes(), a.offset());
    block::put(heap.memory.bytes_mut(), footer, block::pack(40, true));
    heap.allocate(8).unwrap();

    assert_eq!(heap.check_heap().unwrap_err().kind, Violation::TagMismatch);
  }
}
