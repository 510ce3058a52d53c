//! Boundary-tag codec.
//!
//! ```text
//!            bp - 4        bp                        bp + size - 8
//!   ┌──────────────┬──────────────────────────────┬──────────────┐
//!   │ header (u32) │ payload                      │ footer (u32) │
//!   └──────────────┴──────────────────────────────┴──────────────┘
//!                  ▲
//!                  └── payload offset handed to callers
//! ```
//!
//! A tag is `size | allocated`. Sizes are multiples of 8, so bit 0 is free to
//! carry the allocation flag. Every function here is a pure function of the
//! arena bytes and a payload offset.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::align::ALIGNMENT;

/// Width of one boundary tag.
pub const WSIZE: usize = 4;
/// Header plus footer.
pub const DSIZE: usize = 2 * WSIZE;
/// Bytes of bookkeeping carried by every block.
pub const OVERHEAD: usize = DSIZE;
/// Smallest legal block: both tags and one alignment unit of payload.
pub const MIN_BLOCK: usize = OVERHEAD + ALIGNMENT;
/// Largest size a 32-bit tag can describe.
pub const MAX_BLOCK: usize = u32::MAX as usize & !(ALIGNMENT - 1);

const SIZE_MASK: u32 = !0x7;

/// Payload offset of a block inside the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(usize);

impl Addr {
  pub const fn new(offset: usize) -> Self {
    Self(offset)
  }

  pub const fn offset(self) -> usize {
    self.0
  }
}

impl fmt::Display for Addr {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "{:#x}", self.0)
  }
}

/// Decoded view of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
  pub addr: Addr,
  pub size: usize,
  pub allocated: bool,
}

impl Block {
  pub fn read(
    mem: &[u8],
    bp: usize,
  ) -> Self {
    Self {
      addr: Addr(bp),
      size: size(mem, bp),
      allocated: is_allocated(mem, bp),
    }
  }

  /// Bytes the owner of this block may use.
  pub fn payload_size(&self) -> usize {
    self.size - OVERHEAD
  }
}

pub fn pack(
  size: usize,
  allocated: bool,
) -> u32 {
  debug_assert!(size % ALIGNMENT == 0 && size <= MAX_BLOCK);
  size as u32 | allocated as u32
}

pub fn tag_size(tag: u32) -> usize {
  (tag & SIZE_MASK) as usize
}

pub fn tag_allocated(tag: u32) -> bool {
  tag & 1 == 1
}

pub fn get(
  mem: &[u8],
  at: usize,
) -> u32 {
  LittleEndian::read_u32(&mem[at..at + WSIZE])
}

pub fn put(
  mem: &mut [u8],
  at: usize,
  tag: u32,
) {
  LittleEndian::write_u32(&mut mem[at..at + WSIZE], tag);
}

pub fn header(bp: usize) -> usize {
  bp - WSIZE
}

pub fn footer(
  mem: &[u8],
  bp: usize,
) -> usize {
  bp + size(mem, bp) - DSIZE
}

pub fn size(
  mem: &[u8],
  bp: usize,
) -> usize {
  tag_size(get(mem, header(bp)))
}

pub fn is_allocated(
  mem: &[u8],
  bp: usize,
) -> bool {
  tag_allocated(get(mem, header(bp)))
}

pub fn next(
  mem: &[u8],
  bp: usize,
) -> usize {
  bp + size(mem, bp)
}

/// Reads the previous block's footer, which sits just below our header.
pub fn prev(
  mem: &[u8],
  bp: usize,
) -> usize {
  bp - tag_size(get(mem, bp - DSIZE))
}

/// Writes matching header and footer tags for a block of `size` at `bp`.
pub fn set(
  mem: &mut [u8],
  bp: usize,
  size: usize,
  allocated: bool,
) {
  let tag = pack(size, allocated);
  put(mem, header(bp), tag);
  put(mem, bp + size - DSIZE, tag);
}
