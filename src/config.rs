use crate::align::checked_align;
use crate::block::{MAX_BLOCK, MIN_BLOCK};

/// Minimum number of bytes requested from the memory source per extension.
pub const CHUNK_SIZE: usize = 1 << 12;

/// How much verification runs after each mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckLevel {
  Off,
  /// Prologue and epilogue tags only.
  Sentinels,
  /// Sentinels plus a walk over every block.
  Full,
}

impl Default for CheckLevel {
  fn default() -> Self {
    if cfg!(debug_assertions) {
      CheckLevel::Full
    } else {
      CheckLevel::Off
    }
  }
}

/// Heap tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Extensions are at least this large, amortizing calls into the source.
  pub chunk_size: usize,
  pub check: CheckLevel,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      chunk_size: CHUNK_SIZE,
      check: CheckLevel::default(),
    }
  }
}

impl HeapConfig {
  /// Sets the extension chunk, rounded up to the alignment unit and clamped
  /// to what a single block can describe.
  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = checked_align(chunk_size)
      .unwrap_or(MAX_BLOCK)
      .clamp(MIN_BLOCK, MAX_BLOCK);
    self
  }

  pub fn with_check(
    mut self,
    check: CheckLevel,
  ) -> Self {
    self.check = check;
    self
  }
}
