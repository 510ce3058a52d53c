//! In-place and relocating resize.
//!
//! ```text
//!   shrink          [ A | A | A ]      ->  [ A ][ free ]
//!   grow, next      [ A ][ free   ]    ->  [ A  A  A ][free]
//!   grow, previous  [ free   ][ A ]    ->  [ A  A  A ][free]   (payload moved down)
//!   otherwise       allocate elsewhere, copy, free the old block
//! ```

use log::{trace, warn};

use crate::block::{self, Addr, Block, MIN_BLOCK, OVERHEAD};
use crate::error::{Error, UsageError};
use crate::heap::{Heap, adjusted_size};
use crate::memory::MemorySource;

impl<M: MemorySource> Heap<M> {
  /// Changes the size of the block at `addr`.
  ///
  /// `None` behaves as [`allocate`](Heap::allocate). A `size` of zero frees
  /// the block and returns `None`. On error the original block is untouched.
  pub fn resize(
    &mut self,
    addr: Option<Addr>,
    size: usize,
  ) -> Result<Option<Addr>, Error> {
    let Some(addr) = addr else {
      return self.allocate(size).map(Some);
    };
    if size == 0 {
      self.deallocate(addr)?;
      return Ok(None);
    }

    let block = match self.lookup(addr) {
      Some(block) if block.allocated => block,
      Some(_) => {
        warn!("resize({}, {}): block is free", addr, size);
        return Err(UsageError::AlreadyFree(addr).into());
      }
      None => {
        warn!("resize({}, {}): invalid pointer", addr, size);
        return Err(UsageError::InvalidPointer(addr).into());
      }
    };
    let asize = adjusted_size(size)?;

    let new_addr = self.resize_block(block, asize, size)?;
    self.verify("resize");
    Ok(Some(new_addr))
  }

  fn resize_block(
    &mut self,
    block: Block,
    asize: usize,
    size: usize,
  ) -> Result<Addr, Error> {
    let bp = block.addr.offset();
    let old = block.size;

    if asize == old {
      trace!("resize({}, {}) unchanged", block.addr, size);
      return Ok(block.addr);
    }

    if asize < old {
      self.shrink(bp, old, asize);
      trace!("resize({}, {}) shrank in place", block.addr, size);
      return Ok(block.addr);
    }

    let need = asize - old;
    let mem = self.memory.bytes();

    let next = block::next(mem, bp);
    let next_size = block::size(mem, next);
    if !block::is_allocated(mem, next) && next_size >= need {
      self.grow_into_next(bp, asize, old + next_size);
      trace!("resize({}, {}) grew into next block", block.addr, size);
      return Ok(block.addr);
    }

    let prev = block::prev(mem, bp);
    let prev_size = block::size(mem, prev);
    if !block::is_allocated(mem, prev) && prev_size >= need {
      self.grow_into_prev(bp, prev, old, asize, prev_size + old);
      trace!("resize({}, {}) moved down to {}", block.addr, size, Addr::new(prev));
      return Ok(Addr::new(prev));
    }

    let new_addr = self.allocate(size)?;
    let mem = self.memory.bytes_mut();
    let len = block.payload_size().min(block::size(mem, new_addr.offset()) - OVERHEAD);
    mem.copy_within(bp..bp + len, new_addr.offset());
    self.deallocate(block.addr)?;

    trace!("resize({}, {}) relocated to {}", block.addr, size, new_addr);
    Ok(new_addr)
  }

  /// Truncates the block to `asize`. A tail too small to be a block stays
  /// attached.
  fn shrink(
    &mut self,
    bp: usize,
    old: usize,
    asize: usize,
  ) {
    let remainder = old - asize;
    if remainder < MIN_BLOCK {
      return;
    }

    let mem = self.memory.bytes_mut();
    block::set(mem, bp, asize, true);
    block::set(mem, bp + asize, remainder, false);
    self.coalesce(bp + asize);
  }

  /// Extends the block over its free successor, `total` bytes in all.
  fn grow_into_next(
    &mut self,
    bp: usize,
    asize: usize,
    total: usize,
  ) {
    let mem = self.memory.bytes_mut();
    let remainder = total - asize;
    if remainder >= MIN_BLOCK {
      block::set(mem, bp, asize, true);
      block::set(mem, bp + asize, remainder, false);
    } else {
      block::set(mem, bp, total, true);
    }
  }

  /// Merges the block into its free predecessor at `prev`, moving the
  /// payload down before any tag inside the old payload is rewritten.
  fn grow_into_prev(
    &mut self,
    bp: usize,
    prev: usize,
    old: usize,
    asize: usize,
    total: usize,
  ) {
    let mem = self.memory.bytes_mut();
    mem.copy_within(bp..bp + old - OVERHEAD, prev);

    let remainder = total - asize;
    if remainder >= MIN_BLOCK {
      block::set(mem, prev, asize, true);
      block::set(mem, prev + asize, remainder, false);
      // The block after the old one may be free.
      self.coalesce(prev + asize);
    } else {
      block::set(mem, prev, total, true);
    }
  }
}
