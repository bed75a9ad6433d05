use serde::{Deserialize, Serialize};

use crate::{
  align::ALIGNMENT,
  block::{DSIZE, FRAME_SIZE},
  error::{HeapError, HeapResult},
  region::DEFAULT_MAX_HEAP,
};

/// Tunables of an [`Allocator`](crate::Allocator).
///
/// The defaults were tuned empirically against allocation traces; nothing
/// about them is load-bearing for correctness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
  /// Size of the free block created when the heap is initialized.
  pub initial_chunk_size: usize,
  /// Minimum growth whenever no free block fits.
  pub chunk_size: usize,
  /// Blocks of at least this size are placed at the back of a split block.
  pub split_threshold: usize,
  /// Largest heap the default region accepts.
  pub max_heap_size: usize,
  /// Runs the consistency checker after every mutating operation.
  pub check_each_operation: bool,
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self {
      initial_chunk_size: 1 << 6,
      chunk_size: 1 << 12,
      split_threshold: 100,
      max_heap_size: DEFAULT_MAX_HEAP,
      check_each_operation: false,
    }
  }
}

impl AllocatorConfig {
  pub fn with_initial_chunk_size(
    mut self,
    bytes: usize,
  ) -> Self {
    self.initial_chunk_size = bytes;
    self
  }

  pub fn with_chunk_size(
    mut self,
    bytes: usize,
  ) -> Self {
    self.chunk_size = bytes;
    self
  }

  pub fn with_split_threshold(
    mut self,
    bytes: usize,
  ) -> Self {
    self.split_threshold = bytes;
    self
  }

  pub fn with_max_heap_size(
    mut self,
    bytes: usize,
  ) -> Self {
    self.max_heap_size = bytes;
    self
  }

  pub fn with_checks(
    mut self,
    enabled: bool,
  ) -> Self {
    self.check_each_operation = enabled;
    self
  }

  pub fn validate(&self) -> HeapResult<()> {
    if self.max_heap_size > u32::MAX as usize {
      return Err(HeapError::InvalidConfig(format!(
        "max_heap_size {} does not fit 32-bit block tags",
        self.max_heap_size
      )));
    }

    for (name, bytes) in [
      ("initial_chunk_size", self.initial_chunk_size),
      ("chunk_size", self.chunk_size),
    ] {
      if bytes < 2 * DSIZE {
        return Err(HeapError::InvalidConfig(format!(
          "{} must be at least {} bytes, got {}",
          name,
          2 * DSIZE,
          bytes
        )));
      }
      if bytes > u32::MAX as usize {
        return Err(HeapError::InvalidConfig(format!(
          "{} of {} bytes does not fit 32-bit block tags",
          name, bytes
        )));
      }
    }

    let initial_heap = self
      .initial_chunk_size
      .checked_next_multiple_of(ALIGNMENT)
      .and_then(|chunk| chunk.checked_add(FRAME_SIZE));
    if initial_heap.is_none_or(|bytes| bytes > self.max_heap_size) {
      return Err(HeapError::InvalidConfig(format!(
        "max_heap_size {} cannot hold the initial chunk of {} bytes",
        self.max_heap_size, self.initial_chunk_size
      )));
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_valid() {
    let config = AllocatorConfig::default();

    assert_eq!(config.initial_chunk_size, 64);
    assert_eq!(config.chunk_size, 4096);
    assert_eq!(config.split_threshold, 100);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_rejects_tiny_chunks() {
    assert!(AllocatorConfig::default().with_chunk_size(8).validate().is_err());
    assert!(AllocatorConfig::default().with_initial_chunk_size(0).validate().is_err());
  }

  #[test]
  fn test_rejects_chunks_beyond_tag_range() {
    let huge_initial = AllocatorConfig::default().with_initial_chunk_size(usize::MAX);
    assert!(matches!(huge_initial.validate(), Err(HeapError::InvalidConfig(_))));

    let huge_chunk = AllocatorConfig::default().with_chunk_size(usize::MAX);
    assert!(matches!(huge_chunk.validate(), Err(HeapError::InvalidConfig(_))));

    // Growth falls back to the exact deficit, so a chunk may exceed the heap.
    let config = AllocatorConfig::default().with_max_heap_size(1024);
    assert!(config.clone().with_chunk_size(u32::MAX as usize).validate().is_ok());
    assert!(config.with_chunk_size(u32::MAX as usize + 1).validate().is_err());
  }

  #[test]
  fn test_rejects_heap_too_small_or_too_large() {
    assert!(AllocatorConfig::default().with_max_heap_size(32).validate().is_err());
    assert!(
      AllocatorConfig::default()
        .with_max_heap_size(u32::MAX as usize + 1)
        .validate()
        .is_err()
    );
    assert!(AllocatorConfig::default().with_max_heap_size(80).validate().is_ok());
  }

  #[test]
  fn test_deserialize_fills_missing_fields() {
    let config: AllocatorConfig =
      serde_json::from_str(r#"{ "chunk_size": 256, "check_each_operation": true }"#).unwrap();

    assert_eq!(config.chunk_size, 256);
    assert!(config.check_each_operation);
    assert_eq!(config.split_threshold, 100);
    assert_eq!(config.max_heap_size, DEFAULT_MAX_HEAP);
  }
}
