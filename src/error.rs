use thiserror::Error;

use crate::block::Address;

/// Result type used by every fallible heap operation.
pub type HeapResult<T> = Result<T, HeapError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
  #[error("out of memory: requested {requested} more bytes, heap is {heap_size} bytes (limit {limit})")]
  OutOfMemory {
    requested: usize,
    heap_size: usize,
    limit: usize,
  },

  /// Metadata no longer describes a valid heap. Unrecoverable.
  #[error("heap corruption at offset 0x{offset:x}: {reason}")]
  Corruption { offset: usize, reason: &'static str },

  #[error("invalid free of {0}: not a live allocation")]
  InvalidFree(Address),

  #[error("double free of {0}")]
  DoubleFree(Address),

  #[error("invalid address {0}: not a live allocation")]
  InvalidAddress(Address),

  #[error("invalid allocator configuration: {0}")]
  InvalidConfig(String),
}

impl HeapError {
  pub(crate) fn corruption(
    offset: usize,
    reason: &'static str,
  ) -> Self {
    HeapError::Corruption { offset, reason }
  }

  /// Whether the error leaves the heap unusable.
  pub fn is_fatal(&self) -> bool {
    matches!(self, HeapError::Corruption { .. })
  }
}
