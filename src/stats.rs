//! Read-only views of a heap: block walk, statistics and a printable dump.

use std::fmt;

use serde::Serialize;

use crate::{
  allocator::Allocator,
  block::{Block, FIRST_BLOCK, WSIZE},
  region::Region,
};

/// Point-in-time summary of a heap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
  /// Bytes obtained from the region, sentinels included.
  pub heap_size: usize,
  /// Total size of free blocks, tags included.
  pub free_bytes: usize,
  pub free_blocks: usize,
  pub allocated_blocks: usize,
  /// Sum of the sizes callers asked for.
  pub requested_bytes: usize,
  pub largest_free_block: usize,
}

impl HeapStats {
  /// Share of free memory that sits outside the largest free block, in
  /// percent. Zero when there is no free memory.
  pub fn fragmentation(&self) -> f64 {
    if self.free_bytes == 0 {
      return 0.0;
    }
    (self.free_bytes - self.largest_free_block) as f64 * 100.0 / self.free_bytes as f64
  }
}

impl<R: Region> Allocator<R> {
  /// Every block from the first one after the prologue up to the epilogue.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      heap: self.region.bytes(),
      current: FIRST_BLOCK,
    }
  }

  /// Free blocks in ascending size order.
  pub fn free_blocks(&self) -> impl Iterator<Item = Block> + '_ {
    let heap = self.region.bytes();
    self.free_list.iter(heap).map(move |payload| Block::decode(heap, payload))
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      heap_size: self.region.len(),
      requested_bytes: self.live.values().sum(),
      ..HeapStats::default()
    };

    for block in self.blocks() {
      if block.is_free() {
        stats.free_blocks += 1;
        stats.free_bytes += block.size();
        stats.largest_free_block = stats.largest_free_block.max(block.size());
      } else {
        stats.allocated_blocks += 1;
      }
    }

    stats
  }
}

/// Address-ordered walk over the heap.
pub struct Blocks<'h> {
  heap: &'h [u8],
  current: usize,
}

impl Iterator for Blocks<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    if self.current + WSIZE > self.heap.len() {
      return None;
    }

    let block = Block::decode(self.heap, self.current);
    if block.size() == 0 {
      return None;
    }

    self.current += block.size();
    Some(block)
  }
}

impl<R: Region> fmt::Display for Allocator<R> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f, "heap: {} bytes, {} free blocks", self.region.len(), self.free_list.len())?;

    for block in self.blocks() {
      let state = if block.is_free() { "free" } else { "allocated" };
      writeln!(f, "  0x{:06x}  {:>8}  {}", block.payload(), block.size(), state)?;
    }

    write!(f, "  0x{:06x}  {:>8}  epilogue", self.region.len(), 0)
  }
}
