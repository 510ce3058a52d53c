//! Error types for the allocator.
//!
//! Caller mistakes ([`UsageError`]) and a refused arena extension
//! ([`AllocError`]) are ordinary values. [`InvariantViolation`] describes
//! corrupted metadata and is only ever raised as a panic by the heap itself.

use thiserror::Error;

use crate::block::Addr;

/// The arena could not be set up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
  /// The memory source refused the initial extension.
  #[error("failed to extend the arena by {requested} bytes during initialization")]
  Extend {
    /// Number of bytes requested.
    requested: usize,
  },

  /// The memory source handed back a break that is not word aligned.
  #[error("memory source break {brk:#x} is not aligned to the block word")]
  Misaligned {
    brk: usize,
  },
}

/// A request could not be satisfied with the memory available.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
  /// The memory source refused to grow the arena.
  #[error("out of memory: failed to extend the arena by {requested} bytes")]
  OutOfMemory {
    /// Number of bytes the extension asked for.
    requested: usize,
  },

  /// The request cannot be described by a block tag.
  #[error("requested size {size} exceeds the largest representable block")]
  TooLarge {
    /// Payload size that was requested.
    size: usize,
  },
}

/// The caller broke the contract of an operation. The heap is left untouched.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
  /// A zero-byte allocation was requested.
  #[error("requested size must be greater than zero")]
  ZeroSize,

  /// The address does not name any block in the arena.
  #[error("{0} is not a block handed out by this heap")]
  InvalidPointer(Addr),

  /// The block at this address was already freed.
  #[error("{0} is already freed")]
  DoubleFree(Addr),

  /// A resize named a block that is currently free.
  #[error("cannot resize {0}: block is free")]
  AlreadyFree(Addr),
}

/// Errors reported by [`Heap::allocate`](crate::Heap::allocate) and
/// [`Heap::resize`](crate::Heap::resize).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
  #[error(transparent)]
  Alloc(#[from] AllocError),

  #[error(transparent)]
  Usage(#[from] UsageError),
}

/// What the consistency checker found wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
  PrologueTag,
  EpilogueTag,
  EpilogueOutOfBounds,
  TagMismatch,
  Undersized,
  Misaligned,
  AdjacentFree,
  CrossesEpilogue,
  SizeOverflow,
}

/// Block metadata is corrupt. Continuing would spread the damage.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("heap invariant violated at offset {offset}: {kind:?}")]
pub struct InvariantViolation {
  pub offset: usize,
  pub kind: Violation,
}

impl InvariantViolation {
  pub fn new(
    offset: usize,
    kind: Violation,
  ) -> Self {
    Self { offset, kind }
  }
}
