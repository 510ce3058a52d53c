use log::{debug, trace, warn};

use crate::align::{ALIGNMENT, checked_align};
use crate::block::{self, Addr, Block, DSIZE, MAX_BLOCK, MIN_BLOCK, OVERHEAD, WSIZE};
use crate::check::fatal;
use crate::config::HeapConfig;
use crate::error::{AllocError, Error, InitError, InvariantViolation, UsageError, Violation};
use crate::memory::{MemorySource, VecMemory};

/// Describes a freshly allocated block together with the current arena top.
pub fn format_alloc<M: MemorySource>(
  heap: &Heap<M>,
  size: usize,
  addr: Addr,
) -> String {
  format!(
    "Allocated {} bytes, address = {}, arena top = {:#x}",
    size,
    addr,
    heap.arena_size()
  )
}

pub fn print_alloc<M: MemorySource>(
  heap: &Heap<M>,
  size: usize,
  addr: Addr,
) {
  println!("{}", format_alloc(heap, size, addr));
}

/// Implicit-list allocator with boundary tags over a single growing arena.
///
/// ```text
///   0    4         8         12        16
///   ┌────┬─────────┬─────────┬─────────┬───────────────────┬─────────┐
///   │pad │ 8 | 1   │ 8 | 1   │ hdr     │ blocks ...        │ 0 | 1   │
///   └────┴─────────┴─────────┴─────────┴───────────────────┴─────────┘
///         prologue  ▲                                        epilogue
///                   heap_list
/// ```
pub struct Heap<M: MemorySource = VecMemory> {
  pub(crate) memory: M,
  pub(crate) config: HeapConfig,
  /// Payload offset of the prologue; scans start at the block after it.
  pub(crate) heap_list: usize,
  /// Header offset of the epilogue, always the last word of the arena.
  pub(crate) epilogue: usize,
}

impl Heap<VecMemory> {
  /// A heap over a default-sized [`VecMemory`] with the default config.
  pub fn new() -> Result<Self, InitError> {
    Self::init(VecMemory::default(), HeapConfig::default())
  }
}

impl<M: MemorySource> Heap<M> {
  /// Lays down the prologue and epilogue in `memory`.
  pub fn init(
    mut memory: M,
    config: HeapConfig,
  ) -> Result<Self, InitError> {
    let requested = 4 * WSIZE;
    let p = memory
      .sbrk(requested)
      .ok_or(InitError::Extend { requested })?;
    if p % ALIGNMENT != 0 {
      return Err(InitError::Misaligned { brk: p });
    }

    let mem = memory.bytes_mut();
    block::put(mem, p, 0);
    block::put(mem, p + WSIZE, block::pack(DSIZE, true));
    block::put(mem, p + 2 * WSIZE, block::pack(DSIZE, true));
    block::put(mem, p + 3 * WSIZE, block::pack(0, true));

    let heap = Self {
      memory,
      config: config.with_chunk_size(config.chunk_size),
      heap_list: p + 2 * WSIZE,
      epilogue: p + 3 * WSIZE,
    };
    heap.verify("init");
    debug!("heap initialized, prologue at {:#x}", heap.heap_list);
    Ok(heap)
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn memory(&self) -> &M {
    &self.memory
  }

  /// Current length of the arena in bytes.
  pub fn arena_size(&self) -> usize {
    self.memory.brk()
  }

  /// All blocks between the prologue and the epilogue, in address order.
  pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
    Walk {
      mem: self.memory.bytes(),
      bp: self.heap_list + DSIZE,
      end: self.epilogue + WSIZE,
    }
  }

  /// Allocates at least `size` bytes and returns the payload offset.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<Addr, Error> {
    if size == 0 {
      warn!("allocate(0) rejected");
      return Err(UsageError::ZeroSize.into());
    }
    let asize = adjusted_size(size)?;

    let bp = match self.find_fit(asize) {
      Some(bp) => bp,
      None => self.extend_heap(asize.max(self.config.chunk_size))?,
    };
    self.place(bp, asize);
    self.verify("allocate");

    trace!("allocate({}) -> {}", size, Addr::new(bp));
    Ok(Addr::new(bp))
  }

  /// Returns a block to the free pool, merging it with free neighbours.
  pub fn deallocate(
    &mut self,
    addr: Addr,
  ) -> Result<(), UsageError> {
    let block = match self.lookup(addr) {
      Some(block) if block.allocated => block,
      Some(_) => {
        warn!("deallocate({}): already freed", addr);
        return Err(UsageError::DoubleFree(addr));
      }
      None => {
        warn!("deallocate({}): invalid pointer", addr);
        return Err(UsageError::InvalidPointer(addr));
      }
    };

    let bp = addr.offset();
    block::set(self.memory.bytes_mut(), bp, block.size, false);
    self.coalesce(bp);
    self.verify("deallocate");

    trace!("deallocate({}) freed {} bytes", addr, block.size);
    Ok(())
  }

  /// Payload capacity of a live block, which may exceed what was requested.
  pub fn usable_size(
    &self,
    addr: Addr,
  ) -> Result<usize, UsageError> {
    self.live_block(addr).map(|block| block.payload_size())
  }

  pub fn payload(
    &self,
    addr: Addr,
  ) -> Result<&[u8], UsageError> {
    let block = self.live_block(addr)?;
    let bp = addr.offset();
    Ok(&self.memory.bytes()[bp..bp + block.payload_size()])
  }

  pub fn payload_mut(
    &mut self,
    addr: Addr,
  ) -> Result<&mut [u8], UsageError> {
    let block = self.live_block(addr)?;
    let bp = addr.offset();
    Ok(&mut self.memory.bytes_mut()[bp..bp + block.payload_size()])
  }

  /// Finds the block whose payload starts at `addr` by walking the chain.
  pub(crate) fn lookup(
    &self,
    addr: Addr,
  ) -> Option<Block> {
    self
      .blocks()
      .take_while(|block| block.addr <= addr)
      .find(|block| block.addr == addr)
  }

  fn live_block(
    &self,
    addr: Addr,
  ) -> Result<Block, UsageError> {
    match self.lookup(addr) {
      Some(block) if block.allocated => Ok(block),
      Some(_) => Err(UsageError::DoubleFree(addr)),
      None => Err(UsageError::InvalidPointer(addr)),
    }
  }

  /// First free block of at least `asize` bytes, in address order.
  fn find_fit(
    &self,
    asize: usize,
  ) -> Option<usize> {
    self
      .blocks()
      .find(|block| !block.allocated && block.size >= asize)
      .map(|block| block.addr.offset())
  }

  /// Carves `asize` bytes out of the free block at `bp`. The tail becomes a
  /// new free block only if it can stand on its own.
  pub(crate) fn place(
    &mut self,
    bp: usize,
    asize: usize,
  ) {
    let mem = self.memory.bytes_mut();
    let size = block::size(mem, bp);
    debug_assert!(size >= asize);

    let remainder = size - asize;
    if remainder >= MIN_BLOCK {
      block::set(mem, bp, asize, true);
      block::set(mem, bp + asize, remainder, false);
    } else {
      block::set(mem, bp, size, true);
    }
  }

  /// Grows the arena by `bytes` and returns the resulting free block, already
  /// merged with a free predecessor.
  fn extend_heap(
    &mut self,
    bytes: usize,
  ) -> Result<usize, AllocError> {
    debug_assert!(bytes % ALIGNMENT == 0);

    let Some(bp) = self.memory.sbrk(bytes) else {
      warn!("arena extension by {} bytes refused", bytes);
      return Err(AllocError::OutOfMemory { requested: bytes });
    };
    debug_assert_eq!(bp, self.epilogue + WSIZE);

    // The old epilogue header becomes the new block's header.
    let mem = self.memory.bytes_mut();
    block::set(mem, bp, bytes, false);
    self.epilogue = bp + bytes - WSIZE;
    block::put(mem, self.epilogue, block::pack(0, true));

    debug!("extended arena by {} bytes, top now {:#x}", bytes, self.arena_size());
    Ok(self.coalesce(bp))
  }

  /// Merges the free block at `bp` with whichever neighbours are free and
  /// returns the payload offset of the merged block.
  pub(crate) fn coalesce(
    &mut self,
    bp: usize,
  ) -> usize {
    let mem = self.memory.bytes_mut();
    let prev = block::prev(mem, bp);
    let next = block::next(mem, bp);
    let size = block::size(mem, bp);

    let (start, total) = match (block::is_allocated(mem, prev), block::is_allocated(mem, next)) {
      (true, true) => return bp,
      (false, true) => (prev, merged_size(bp, &[block::size(mem, prev), size])),
      (true, false) => (bp, merged_size(bp, &[size, block::size(mem, next)])),
      (false, false) => (
        prev,
        merged_size(bp, &[block::size(mem, prev), size, block::size(mem, next)]),
      ),
    };

    block::set(mem, start, total, false);
    start
  }
}

/// Block size for a request of `size` payload bytes.
pub(crate) fn adjusted_size(size: usize) -> Result<usize, AllocError> {
  size
    .checked_add(OVERHEAD)
    .and_then(checked_align)
    .filter(|&asize| asize <= MAX_BLOCK)
    .ok_or(AllocError::TooLarge { size })
}

fn merged_size(
  bp: usize,
  sizes: &[usize],
) -> usize {
  sizes
    .iter()
    .try_fold(0usize, |acc, &size| acc.checked_add(size))
    .filter(|&total| total <= MAX_BLOCK)
    .unwrap_or_else(|| fatal(InvariantViolation::new(block::header(bp), Violation::SizeOverflow)))
}

struct Walk<'a> {
  mem: &'a [u8],
  bp: usize,
  end: usize,
}

impl Iterator for Walk<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    if self.bp >= self.end {
      return None;
    }
    let block = Block::read(self.mem, self.bp);
    if block.size == 0 {
      fatal(InvariantViolation::new(block::header(self.bp), Violation::Undersized));
    }
    self.bp += block.size;
    Some(block)
  }
}
