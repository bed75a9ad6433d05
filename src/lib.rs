//! # tagalloc - A Boundary-Tag Heap Allocator
//!
//! This crate implements a classic **explicit free list** allocator over a
//! single contiguous region that grows like a program break.
//!
//! ## Overview
//!
//! Every block, allocated or free, carries a size/allocated tag at both ends.
//! The footer lets the allocator find the previous block without any extra
//! bookkeeping, so a freed block is merged with free neighbours on both sides
//! immediately:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────┬──────────┬───────────┬────────────┬───────────┬──────────┐
//!   │ pad  │ prologue │  block A  │  block B   │  block C  │ epilogue │
//!   │      │  8 | 1   │  24 | 1   │  40 | 0    │  24 | 1   │  0 | 1   │
//!   └──────┴──────────┴───────────┴────────────┴───────────┴──────────┘
//!                                       ▲
//!                          freeing A or C merges it into B
//! ```
//!
//! Free blocks are threaded onto one doubly linked list kept in ascending
//! size order. Walking it from the small end and taking the first block that
//! fits yields the best fit.
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - align! macro (8-byte alignment)
//!   ├── block      - boundary tags, block navigation, Address
//!   ├── free_list  - size-ordered explicit free list
//!   ├── allocator  - Allocator: allocate / free / reallocate
//!   ├── check      - heap consistency checker
//!   ├── region     - Region trait, VecRegion, MmapRegion
//!   ├── config     - AllocatorConfig
//!   ├── stats      - HeapStats, block walk, heap dump
//!   └── error      - HeapError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::Allocator;
//!
//! let mut heap = Allocator::new()?;
//!
//! let a = heap.allocate(5)?.expect("non-zero request");
//! heap.payload_mut(a)?.copy_from_slice(b"hello");
//!
//! let a = heap.reallocate(Some(a), 64)?.expect("non-zero request");
//! assert_eq!(&heap.payload(a)?[..5], b"hello");
//!
//! heap.free(a)?;
//! heap.check()?;
//! # Ok::<(), tagalloc::HeapError>(())
//! ```
//!
//! ## Placement
//!
//! When a free block is larger than needed by more than 16 bytes it is
//! split. Requests at or above the split threshold (100 bytes by default)
//! take the back of the block, smaller ones the front:
//!
//! ```text
//!   small request:  ┌──────────┬─────────────────────────┐
//!                   │ alloc'd  │        free rest        │
//!                   └──────────┴─────────────────────────┘
//!   large request:  ┌─────────────────────────┬──────────┐
//!                   │        free rest        │ alloc'd  │
//!                   └─────────────────────────┴──────────┘
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Never shrinks**: Memory obtained from the region is kept for reuse
//! - **O(n) free list**: Insertion and search are linear in the number of
//!   free blocks
//! - **32-bit tags**: A heap is limited to 4 GiB

pub mod align;
mod allocator;
pub mod block;
mod check;
mod config;
mod error;
mod free_list;
pub mod region;
mod stats;

pub use allocator::Allocator;
pub use block::{Address, Block};
pub use config::AllocatorConfig;
pub use error::{HeapError, HeapResult};
#[cfg(unix)]
pub use region::MmapRegion;
pub use region::{Region, VecRegion};
pub use stats::{Blocks, HeapStats};
