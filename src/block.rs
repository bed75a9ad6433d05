//! Boundary-tag block layout.
//!
//! ```text
//!   Allocated block:                    Free block:
//!   ┌──────────┐ ◄ payload - 4          ┌──────────┐
//!   │ size | 1 │   header               │ size | 0 │   header
//!   ├──────────┤ ◄ payload              ├──────────┤
//!   │          │                        │   prev   │   link offsets,
//!   │  user    │                        │   next   │   0 = none
//!   │  bytes   │                        │  (slack) │
//!   ├──────────┤ ◄ payload + size - 8   ├──────────┤
//!   │ size | 1 │   footer               │ size | 0 │   footer
//!   └──────────┘                        └──────────┘
//! ```
//!
//! Sizes are multiples of 8, so the low three bits of a tag are free to hold
//! the allocated flag. Every block carries a footer; that is what lets
//! [`prev_block`] step backwards from any payload.

use std::fmt;

use crate::align;

/// Tag and link word size.
pub const WSIZE: usize = 4;
/// Header plus footer overhead of every block.
pub const DSIZE: usize = 8;
/// Header, footer and the two free-list links.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

/// Padding word, prologue header/footer and the initial epilogue header.
pub(crate) const FRAME_SIZE: usize = 4 * WSIZE;
/// Payload offset of the prologue sentinel.
pub(crate) const PROLOGUE: usize = 2 * WSIZE;
/// Payload offset of the first regular block.
pub(crate) const FIRST_BLOCK: usize = 4 * WSIZE;

const SIZE_MASK: u32 = !0x7;
const ALLOC_BIT: u32 = 0x1;

/// Payload offset of a block handed out to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(usize);

impl Address {
  /// Wraps a raw payload offset. Offsets that were not returned by the
  /// allocator are rejected by every operation that takes an address.
  pub const fn from_offset(offset: usize) -> Self {
    Self(offset)
  }

  pub const fn offset(self) -> usize {
    self.0
  }
}

impl fmt::Display for Address {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "0x{:x}", self.0)
  }
}

/// Decoded view of a block. Only the variant matching the allocated bit
/// exists, so the link words of a free block can never be read off an
/// allocated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
  Allocated {
    payload: usize,
    size: usize,
  },
  Free {
    payload: usize,
    size: usize,
    prev: Option<usize>,
    next: Option<usize>,
  },
}

impl Block {
  pub fn decode(
    heap: &[u8],
    payload: usize,
  ) -> Self {
    let size = block_size(heap, payload);

    if is_allocated(heap, payload) {
      Block::Allocated { payload, size }
    } else {
      Block::Free {
        payload,
        size,
        prev: read_link(heap, payload),
        next: read_link(heap, payload + WSIZE),
      }
    }
  }

  pub fn payload(&self) -> usize {
    match *self {
      Block::Allocated { payload, .. } | Block::Free { payload, .. } => payload,
    }
  }

  pub fn size(&self) -> usize {
    match *self {
      Block::Allocated { size, .. } | Block::Free { size, .. } => size,
    }
  }

  pub fn is_free(&self) -> bool {
    matches!(self, Block::Free { .. })
  }

  /// Bytes between header and footer.
  pub fn usable(&self) -> usize {
    self.size() - DSIZE
  }
}

/// Smallest block that can carry `requested` payload bytes, or `None` when
/// the size cannot be represented in a tag word.
pub fn block_size_for(requested: usize) -> Option<usize> {
  if requested <= DSIZE {
    return Some(MIN_BLOCK_SIZE);
  }

  let size = requested.checked_add(2 * DSIZE - 1)? & !(DSIZE - 1);

  if size > SIZE_MASK as usize {
    return None;
  }

  debug_assert_eq!(size, align!(requested + DSIZE));
  Some(size)
}

pub fn pack(
  size: usize,
  allocated: bool,
) -> u32 {
  debug_assert_eq!(size % DSIZE, 0);
  size as u32 | if allocated { ALLOC_BIT } else { 0 }
}

pub fn read_word(
  heap: &[u8],
  offset: usize,
) -> u32 {
  let mut word = [0u8; WSIZE];
  word.copy_from_slice(&heap[offset..offset + WSIZE]);
  u32::from_ne_bytes(word)
}

pub fn write_word(
  heap: &mut [u8],
  offset: usize,
  value: u32,
) {
  heap[offset..offset + WSIZE].copy_from_slice(&value.to_ne_bytes());
}

/// Size field of the tag stored at `offset`.
pub fn size_at(
  heap: &[u8],
  offset: usize,
) -> usize {
  (read_word(heap, offset) & SIZE_MASK) as usize
}

/// Allocated bit of the tag stored at `offset`.
pub fn allocated_at(
  heap: &[u8],
  offset: usize,
) -> bool {
  read_word(heap, offset) & ALLOC_BIT != 0
}

pub fn header(payload: usize) -> usize {
  payload - WSIZE
}

pub fn footer(
  heap: &[u8],
  payload: usize,
) -> usize {
  payload + block_size(heap, payload) - DSIZE
}

pub fn block_size(
  heap: &[u8],
  payload: usize,
) -> usize {
  size_at(heap, header(payload))
}

pub fn is_allocated(
  heap: &[u8],
  payload: usize,
) -> bool {
  allocated_at(heap, header(payload))
}

pub fn next_block(
  heap: &[u8],
  payload: usize,
) -> usize {
  payload + block_size(heap, payload)
}

pub fn prev_block(
  heap: &[u8],
  payload: usize,
) -> usize {
  payload - size_at(heap, payload - DSIZE)
}

/// Writes matching header and footer tags.
pub fn write_tags(
  heap: &mut [u8],
  payload: usize,
  size: usize,
  allocated: bool,
) {
  let tag = pack(size, allocated);
  write_word(heap, header(payload), tag);
  write_word(heap, payload + size - DSIZE, tag);
}

pub(crate) fn read_link(
  heap: &[u8],
  offset: usize,
) -> Option<usize> {
  match read_word(heap, offset) {
    0 => None,
    link => Some(link as usize),
  }
}

pub(crate) fn write_link(
  heap: &mut [u8],
  offset: usize,
  link: Option<usize>,
) {
  write_word(heap, offset, link.map_or(0, |l| l as u32));
}
