//! Heap consistency checker.
//!
//! Walks the heap by address and the free list by link, independently, and
//! cross-checks the two views.

use crate::{
  allocator::Allocator,
  block::{
    DSIZE, FIRST_BLOCK, FRAME_SIZE, MIN_BLOCK_SIZE, PROLOGUE, WSIZE, allocated_at, block_size,
    footer, header, pack, read_link, read_word, size_at,
  },
  error::{HeapError, HeapResult},
  region::Region,
};

struct Walk {
  free_blocks: usize,
  allocated_blocks: usize,
}

impl<R: Region> Allocator<R> {
  /// Validates every invariant of the heap without modifying it.
  /// See [`check`](Self::check) for the poisoning variant.
  pub fn verify(&self) -> HeapResult<()> {
    let walk = self.verify_blocks()?;
    self.verify_free_list(&walk)?;
    self.verify_registry(&walk)
  }

  fn verify_blocks(&self) -> HeapResult<Walk> {
    let heap = self.region.bytes();
    let len = heap.len();

    if len < FRAME_SIZE {
      return Err(HeapError::corruption(0, "heap is smaller than its sentinels"));
    }
    let prologue = pack(DSIZE, true);
    let prologue_header = header(PROLOGUE);
    if read_word(heap, prologue_header) != prologue
      || read_word(heap, footer(heap, PROLOGUE)) != prologue
    {
      return Err(HeapError::corruption(prologue_header, "prologue overwritten"));
    }

    let mut walk = Walk {
      free_blocks: 0,
      allocated_blocks: 0,
    };
    let mut prev_free = false;
    let mut payload = FIRST_BLOCK;

    loop {
      let hdr = header(payload);
      if hdr + WSIZE > len {
        return Err(HeapError::corruption(hdr, "block runs past the end of the heap"));
      }

      let size = size_at(heap, hdr);
      if size == 0 {
        break;
      }
      if size % DSIZE != 0 || size < MIN_BLOCK_SIZE {
        return Err(HeapError::corruption(hdr, "malformed block size"));
      }
      if payload + size > len {
        return Err(HeapError::corruption(hdr, "block runs past the end of the heap"));
      }
      if read_word(heap, hdr) != read_word(heap, footer(heap, payload)) {
        return Err(HeapError::corruption(hdr, "header and footer disagree"));
      }

      let free = !allocated_at(heap, hdr);
      if free && prev_free {
        return Err(HeapError::corruption(hdr, "adjacent free blocks escaped coalescing"));
      }
      if free {
        walk.free_blocks += 1;
      } else {
        walk.allocated_blocks += 1;
      }

      prev_free = free;
      payload += size;
    }

    let epilogue = header(payload);
    if epilogue != len - WSIZE || !allocated_at(heap, epilogue) {
      return Err(HeapError::corruption(epilogue, "epilogue is not at the end of the heap"));
    }

    Ok(walk)
  }

  fn verify_free_list(
    &self,
    walk: &Walk,
  ) -> HeapResult<()> {
    let heap = self.region.bytes();
    let len = heap.len();

    let mut seen = 0;
    let mut prev = None;
    let mut last_size = 0;
    let mut cursor = self.free_list.head();

    while let Some(node) = cursor {
      if seen >= walk.free_blocks {
        return Err(HeapError::corruption(
          node,
          "free list is longer than the number of free blocks",
        ));
      }
      if node < FIRST_BLOCK || node % DSIZE != 0 || node + MIN_BLOCK_SIZE > len {
        return Err(HeapError::corruption(node, "free-list link outside the heap"));
      }
      if allocated_at(heap, header(node)) {
        return Err(HeapError::corruption(node, "allocated block on the free list"));
      }

      let size = block_size(heap, node);
      if size < last_size {
        return Err(HeapError::corruption(node, "free list out of size order"));
      }
      if read_link(heap, node) != prev {
        return Err(HeapError::corruption(node, "free-list prev link is not reciprocated"));
      }

      last_size = size;
      prev = Some(node);
      seen += 1;
      cursor = read_link(heap, node + WSIZE);
    }

    if self.free_list.tail() != prev {
      return Err(HeapError::corruption(
        prev.unwrap_or(0),
        "free-list tail does not match its last member",
      ));
    }
    if seen != walk.free_blocks || self.free_list.len() != seen {
      return Err(HeapError::corruption(
        0,
        "free-list membership differs from the free blocks in the heap",
      ));
    }

    Ok(())
  }

  fn verify_registry(
    &self,
    walk: &Walk,
  ) -> HeapResult<()> {
    let heap = self.region.bytes();

    if self.live.len() != walk.allocated_blocks {
      return Err(HeapError::corruption(
        0,
        "live allocations out of sync with allocated blocks",
      ));
    }

    for &payload in self.live.keys() {
      if payload < FIRST_BLOCK || payload >= heap.len() || !allocated_at(heap, header(payload)) {
        return Err(HeapError::corruption(payload, "live allocation is not an allocated block"));
      }
    }

    Ok(())
  }
}
