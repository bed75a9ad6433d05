//! Explicit free list kept in ascending size order.
//!
//! The list lives inside the heap: every free block stores the offsets of its
//! neighbours in its first two payload words. Only the two ends are held
//! outside the heap.
//!
//! ```text
//!   head                                             tail
//!    │                                                 │
//!    ▼                                                 ▼
//!   ┌────┐ next ┌────┐ next ┌────┐        next ┌──────────┐
//!   │ 16 │─────►│ 24 │─────►│ 24 │─── ... ────►│   4096   │
//!   │    │◄─────│    │◄─────│    │◄─── ... ────│          │
//!   └────┘ prev └────┘ prev └────┘        prev └──────────┘
//! ```
//!
//! Because the walk starts at the smallest block, the first block that fits
//! is also the best fit.

use crate::{
  block::{WSIZE, block_size, header, is_allocated, read_link, write_link},
  error::{HeapError, HeapResult},
};

#[derive(Debug, Default)]
pub struct FreeList {
  head: Option<usize>,
  tail: Option<usize>,
  len: usize,
}

impl FreeList {
  pub fn new() -> Self {
    Self::default()
  }

  /// Smallest free block.
  pub fn head(&self) -> Option<usize> {
    self.head
  }

  /// Largest free block.
  pub fn tail(&self) -> Option<usize> {
    self.tail
  }

  pub fn len(&self) -> usize {
    self.len
  }

  /// Links a free-tagged block in front of the first larger entry. O(n).
  pub fn insert(
    &mut self,
    heap: &mut [u8],
    payload: usize,
  ) {
    let size = block_size(heap, payload);

    let mut prev = None;
    let mut next = self.head;
    while let Some(current) = next {
      if size <= block_size(heap, current) {
        break;
      }
      prev = Some(current);
      next = read_link(heap, current + WSIZE);
    }

    write_link(heap, payload, prev);
    write_link(heap, payload + WSIZE, next);

    match prev {
      Some(prev) => write_link(heap, prev + WSIZE, Some(payload)),
      None => self.head = Some(payload),
    }
    match next {
      Some(next) => write_link(heap, next, Some(payload)),
      None => self.tail = Some(payload),
    }

    self.len += 1;
  }

  /// Unlinks a block. The block must currently be a member: anything else
  /// means the metadata is already inconsistent.
  pub fn remove(
    &mut self,
    heap: &mut [u8],
    payload: usize,
  ) -> HeapResult<()> {
    if self.len == 0 {
      return Err(HeapError::corruption(payload, "removal from an empty free list"));
    }
    if is_allocated(heap, payload) {
      return Err(HeapError::corruption(
        header(payload),
        "free-list removal of an allocated block",
      ));
    }

    let prev = read_link(heap, payload);
    let next = read_link(heap, payload + WSIZE);

    for link in [prev, next].into_iter().flatten() {
      if link + 2 * WSIZE > heap.len() {
        return Err(HeapError::corruption(payload, "free-list link outside the heap"));
      }
    }

    match prev {
      Some(prev) if read_link(heap, prev + WSIZE) != Some(payload) => {
        return Err(HeapError::corruption(payload, "free-list prev link is not reciprocated"));
      }
      None if self.head != Some(payload) => {
        return Err(HeapError::corruption(payload, "block is not a free-list member"));
      }
      _ => {}
    }
    match next {
      Some(next) if read_link(heap, next) != Some(payload) => {
        return Err(HeapError::corruption(payload, "free-list next link is not reciprocated"));
      }
      None if self.tail != Some(payload) => {
        return Err(HeapError::corruption(payload, "block is not a free-list member"));
      }
      _ => {}
    }

    match prev {
      Some(prev) => write_link(heap, prev + WSIZE, next),
      None => self.head = next,
    }
    match next {
      Some(next) => write_link(heap, next, prev),
      None => self.tail = prev,
    }

    self.len -= 1;
    Ok(())
  }

  /// Smallest free block of at least `min_size` bytes.
  pub fn find_first_fit(
    &self,
    heap: &[u8],
    min_size: usize,
  ) -> Option<usize> {
    self.iter(heap).find(|&payload| block_size(heap, payload) >= min_size)
  }

  /// Walks the list from the smallest block up.
  pub fn iter<'h>(
    &self,
    heap: &'h [u8],
  ) -> Iter<'h> {
    Iter {
      heap,
      current: self.head,
    }
  }
}

pub struct Iter<'h> {
  heap: &'h [u8],
  current: Option<usize>,
}

impl Iterator for Iter<'_> {
  type Item = usize;

  fn next(&mut self) -> Option<usize> {
    let payload = self.current?;
    self.current = read_link(self.heap, payload + WSIZE);
    Some(payload)
  }
}
