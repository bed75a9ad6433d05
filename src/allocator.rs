use std::collections::{HashMap, HashSet};

use log::{debug, error, trace, warn};

use crate::{
  align,
  align::ALIGNMENT,
  block::{
    Address, Block, DSIZE, FRAME_SIZE, MIN_BLOCK_SIZE, WSIZE, allocated_at, block_size,
    block_size_for, header, is_allocated, next_block, pack, prev_block, size_at, write_tags,
    write_word,
  },
  config::AllocatorConfig,
  error::{HeapError, HeapResult},
  free_list::FreeList,
  region::{Region, VecRegion},
};

/// Boundary-tag allocator over a single growable region.
///
/// Not thread-safe: every operation takes `&mut self`, and sharing one heap
/// between threads needs an outer lock.
pub struct Allocator<R: Region = VecRegion> {
  pub(crate) region: R,
  pub(crate) free_list: FreeList,
  pub(crate) config: AllocatorConfig,
  /// Live payload offset -> requested size.
  pub(crate) live: HashMap<usize, usize>,
  /// Payloads freed and not handed out since, to tell double frees apart.
  recently_freed: HashSet<usize>,
  poisoned: bool,
}

impl Allocator<VecRegion> {
  pub fn new() -> HeapResult<Self> {
    Self::with_config(AllocatorConfig::default())
  }

  pub fn with_config(config: AllocatorConfig) -> HeapResult<Self> {
    let region = VecRegion::new(config.max_heap_size);
    Self::with_region(region, config)
  }
}

impl<R: Region> Allocator<R> {
  /// Lays the prologue and epilogue into an empty region and seeds the heap
  /// with one free block of `initial_chunk_size` bytes.
  pub fn with_region(
    mut region: R,
    config: AllocatorConfig,
  ) -> HeapResult<Self> {
    config.validate()?;

    if !region.is_empty() {
      return Err(HeapError::InvalidConfig("region must start empty".into()));
    }
    if region.limit() > u32::MAX as usize {
      return Err(HeapError::InvalidConfig(format!(
        "region limit {} does not fit 32-bit block tags",
        region.limit()
      )));
    }

    let base = region.extend(FRAME_SIZE)?;
    let heap = region.bytes_mut();
    write_word(heap, base, 0);
    write_word(heap, base + WSIZE, pack(DSIZE, true));
    write_word(heap, base + 2 * WSIZE, pack(DSIZE, true));
    write_word(heap, base + 3 * WSIZE, pack(0, true));

    let mut allocator = Self {
      region,
      free_list: FreeList::new(),
      config,
      live: HashMap::new(),
      recently_freed: HashSet::new(),
      poisoned: false,
    };

    allocator.extend_heap(allocator.config.initial_chunk_size)?;
    allocator.after_mutation()?;

    debug!("heap initialized, {} bytes", allocator.region.len());
    Ok(allocator)
  }

  /// Returns a payload of at least `size` bytes, or `None` for a zero-sized
  /// request.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> HeapResult<Option<Address>> {
    self.ensure_usable()?;
    let result = self.allocate_inner(size);
    self.guard(result)
  }

  /// Returns a live allocation to the heap, merging it with free neighbours.
  pub fn free(
    &mut self,
    address: Address,
  ) -> HeapResult<()> {
    self.ensure_usable()?;
    let result = self.free_inner(address);
    self.guard(result)
  }

  /// Resizes an allocation, preserving the common prefix of its contents.
  ///
  /// `None` behaves like [`allocate`](Self::allocate) and a zero size like
  /// [`free`](Self::free). The block grows in place when it is followed by a
  /// free block or by the end of the heap; otherwise the contents move and
  /// the returned address replaces `address`. If the call fails with
  /// `OutOfMemory` the original allocation is left untouched.
  pub fn reallocate(
    &mut self,
    address: Option<Address>,
    size: usize,
  ) -> HeapResult<Option<Address>> {
    self.ensure_usable()?;
    let result = self.reallocate_inner(address, size);
    self.guard(result)
  }

  /// Runs the consistency checker. A failure poisons the allocator.
  pub fn check(&mut self) -> HeapResult<()> {
    let result = self.verify();
    self.guard(result)
  }

  /// The bytes the caller asked for at `address`.
  pub fn payload(
    &self,
    address: Address,
  ) -> HeapResult<&[u8]> {
    let offset = address.offset();
    let len = *self.live.get(&offset).ok_or(HeapError::InvalidAddress(address))?;
    Ok(&self.region.bytes()[offset..offset + len])
  }

  pub fn payload_mut(
    &mut self,
    address: Address,
  ) -> HeapResult<&mut [u8]> {
    let offset = address.offset();
    let len = *self.live.get(&offset).ok_or(HeapError::InvalidAddress(address))?;
    Ok(&mut self.region.bytes_mut()[offset..offset + len])
  }

  /// Capacity of the block behind `address`; never less than requested.
  pub fn usable_size(
    &self,
    address: Address,
  ) -> HeapResult<usize> {
    if !self.is_live(address) {
      return Err(HeapError::InvalidAddress(address));
    }
    Ok(Block::decode(self.region.bytes(), address.offset()).usable())
  }

  pub fn is_live(
    &self,
    address: Address,
  ) -> bool {
    self.live.contains_key(&address.offset())
  }

  pub fn config(&self) -> &AllocatorConfig {
    &self.config
  }

  pub fn region(&self) -> &R {
    &self.region
  }

  pub fn heap_size(&self) -> usize {
    self.region.len()
  }

  fn allocate_inner(
    &mut self,
    size: usize,
  ) -> HeapResult<Option<Address>> {
    if size == 0 {
      return Ok(None);
    }

    let asize = block_size_for(size).ok_or_else(|| self.refused(size))?;

    let block = match self.free_list.find_first_fit(self.region.bytes(), asize) {
      Some(block) => block,
      None => {
        let minimum = asize - self.trailing_free().min(asize);
        self.grow(asize.max(self.config.chunk_size), minimum)?
      }
    };

    let payload = self.place(block, asize)?;
    self.live.insert(payload, size);
    self.recently_freed.remove(&payload);

    trace!("allocated {} bytes at 0x{:x} (block of {} bytes)", size, payload, asize);
    self.after_mutation()?;
    Ok(Some(Address::from_offset(payload)))
  }

  fn free_inner(
    &mut self,
    address: Address,
  ) -> HeapResult<()> {
    let payload = address.offset();
    if self.live.remove(&payload).is_none() {
      return Err(self.rejected(address));
    }

    let heap = self.region.bytes_mut();
    let size = block_size(heap, payload);
    write_tags(heap, payload, size, false);
    self.free_list.insert(heap, payload);
    self.coalesce(payload)?;
    self.recently_freed.insert(payload);

    trace!("freed block of {} bytes at 0x{:x}", size, payload);
    self.after_mutation()
  }

  fn reallocate_inner(
    &mut self,
    address: Option<Address>,
    size: usize,
  ) -> HeapResult<Option<Address>> {
    let Some(address) = address else {
      return self.allocate_inner(size);
    };

    if size == 0 {
      self.free_inner(address)?;
      return Ok(None);
    }

    let payload = address.offset();
    if !self.live.contains_key(&payload) {
      return Err(self.rejected(address));
    }

    let asize = block_size_for(size).ok_or_else(|| self.refused(size))?;
    let current = block_size(self.region.bytes(), payload);

    if current >= asize || self.grow_in_place(payload, current, asize)? {
      self.live.insert(payload, size);
      trace!("resized 0x{:x} in place to {} bytes", payload, size);
      self.after_mutation()?;
      return Ok(Some(address));
    }

    let Some(moved) = self.allocate_inner(size)? else {
      return Ok(None);
    };

    let count = (current - DSIZE).min(size);
    self
      .region
      .bytes_mut()
      .copy_within(payload..payload + count, moved.offset());
    self.free_inner(address)?;

    trace!("moved 0x{:x} to {} ({} bytes copied)", payload, moved, count);
    Ok(Some(moved))
  }

  /// Absorbs the following block when it is free or is the epilogue,
  /// growing the heap first if the pair still falls short. Returns `false`
  /// when the block has to move instead.
  fn grow_in_place(
    &mut self,
    payload: usize,
    current: usize,
    asize: usize,
  ) -> HeapResult<bool> {
    let heap = self.region.bytes();
    let next = next_block(heap, payload);
    let next_size = block_size(heap, next);
    let at_end = next_size == 0;

    if is_allocated(heap, next) && !at_end {
      return Ok(false);
    }

    let available = current + next_size;
    if available < asize {
      // New space only lands next to us if nothing sits between us and the
      // epilogue.
      if !at_end && next_block(heap, next) != self.region.len() {
        return Ok(false);
      }

      let deficit = asize - available;
      match self.grow(deficit.max(self.config.chunk_size), deficit) {
        Ok(_) => {}
        Err(HeapError::OutOfMemory { .. }) => return Ok(false),
        Err(err) => return Err(err),
      }
    }

    let heap = self.region.bytes_mut();
    let next = next_block(heap, payload);
    let next_size = block_size(heap, next);
    self.free_list.remove(heap, next)?;
    write_tags(heap, payload, current + next_size, true);

    Ok(true)
  }

  /// Grows the heap by `preferred` bytes, falling back to `minimum` if the
  /// region refuses. Returns the coalesced free block at the end of the heap.
  fn grow(
    &mut self,
    preferred: usize,
    minimum: usize,
  ) -> HeapResult<usize> {
    match self.extend_heap(preferred) {
      Err(HeapError::OutOfMemory { .. }) if align!(minimum).max(MIN_BLOCK_SIZE) < preferred => {
        warn!(
          "region refused {} bytes, retrying with {} (heap is {} of {} bytes)",
          preferred,
          minimum,
          self.region.len(),
          self.region.limit()
        );
        self.extend_heap(minimum).inspect_err(|err| warn!("{}", err))
      }
      Err(err) => {
        warn!("{}", err);
        Err(err)
      }
      ok => ok,
    }
  }

  /// Appends a free block of at least `bytes` bytes and coalesces it with a
  /// trailing free block.
  fn extend_heap(
    &mut self,
    bytes: usize,
  ) -> HeapResult<usize> {
    let size = bytes
      .checked_next_multiple_of(ALIGNMENT)
      .ok_or_else(|| self.refused(bytes))?
      .max(MIN_BLOCK_SIZE);
    let payload = self.region.extend(size)?;

    let heap = self.region.bytes_mut();
    write_tags(heap, payload, size, false);
    write_word(heap, header(payload + size), pack(0, true));
    self.free_list.insert(heap, payload);

    debug!("heap extended by {} bytes to {}", size, self.region.len());
    self.coalesce(payload)
  }

  /// Merges a free, listed block with its free neighbours and returns the
  /// payload of the merged block.
  fn coalesce(
    &mut self,
    payload: usize,
  ) -> HeapResult<usize> {
    let heap = self.region.bytes_mut();
    let prev_free = !allocated_at(heap, payload - DSIZE);
    let next = next_block(heap, payload);
    let next_free = !is_allocated(heap, next);
    let mut size = block_size(heap, payload);

    let merged = match (prev_free, next_free) {
      (false, false) => return Ok(payload),
      (false, true) => {
        self.free_list.remove(heap, payload)?;
        self.free_list.remove(heap, next)?;
        size += block_size(heap, next);
        write_tags(heap, payload, size, false);
        payload
      }
      (true, false) => {
        let prev = prev_block(heap, payload);
        self.free_list.remove(heap, payload)?;
        self.free_list.remove(heap, prev)?;
        size += block_size(heap, prev);
        write_tags(heap, prev, size, false);
        prev
      }
      (true, true) => {
        let prev = prev_block(heap, payload);
        self.free_list.remove(heap, payload)?;
        self.free_list.remove(heap, prev)?;
        self.free_list.remove(heap, next)?;
        size += block_size(heap, prev) + block_size(heap, next);
        write_tags(heap, prev, size, false);
        prev
      }
    };

    self.free_list.insert(heap, merged);
    trace!("coalesced 0x{:x} into block of {} bytes at 0x{:x}", payload, size, merged);
    Ok(merged)
  }

  /// Allocates `asize` bytes out of a free block, splitting off the rest when
  /// it is worth keeping. Large requests take the back of the block so the
  /// small remainders stay together at the front.
  fn place(
    &mut self,
    payload: usize,
    asize: usize,
  ) -> HeapResult<usize> {
    let heap = self.region.bytes_mut();
    let csize = block_size(heap, payload);
    self.free_list.remove(heap, payload)?;

    let remainder = csize - asize;
    if remainder <= 2 * DSIZE {
      write_tags(heap, payload, csize, true);
      return Ok(payload);
    }

    if asize >= self.config.split_threshold {
      write_tags(heap, payload, remainder, false);
      self.free_list.insert(heap, payload);
      let tail = payload + remainder;
      write_tags(heap, tail, asize, true);
      Ok(tail)
    } else {
      write_tags(heap, payload, asize, true);
      let tail = payload + asize;
      write_tags(heap, tail, remainder, false);
      self.free_list.insert(heap, tail);
      Ok(payload)
    }
  }

  /// Size of the free block right before the epilogue, if any.
  fn trailing_free(&self) -> usize {
    let heap = self.region.bytes();
    let last_footer = self.region.len() - DSIZE;

    if allocated_at(heap, last_footer) {
      0
    } else {
      size_at(heap, last_footer)
    }
  }

  fn refused(
    &self,
    requested: usize,
  ) -> HeapError {
    HeapError::OutOfMemory {
      requested,
      heap_size: self.region.len(),
      limit: self.region.limit(),
    }
  }

  fn rejected(
    &self,
    address: Address,
  ) -> HeapError {
    if self.recently_freed.contains(&address.offset()) {
      warn!("double free of {}", address);
      HeapError::DoubleFree(address)
    } else {
      warn!("free of unknown address {}", address);
      HeapError::InvalidFree(address)
    }
  }

  fn after_mutation(&self) -> HeapResult<()> {
    if self.config.check_each_operation {
      self.verify()?;
    }
    Ok(())
  }

  fn ensure_usable(&self) -> HeapResult<()> {
    if self.poisoned {
      return Err(HeapError::corruption(0, "allocator poisoned by an earlier corruption"));
    }
    Ok(())
  }

  fn guard<T>(
    &mut self,
    result: HeapResult<T>,
  ) -> HeapResult<T> {
    if let Err(err) = &result {
      if err.is_fatal() {
        error!("{}; refusing further operations", err);
        self.poisoned = true;
      }
    }
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::FIRST_BLOCK;

  fn checked() -> Allocator {
    Allocator::with_config(AllocatorConfig::default().with_checks(true)).unwrap()
  }

  fn alloc(
    heap: &mut Allocator,
    size: usize,
  ) -> Address {
    heap.allocate(size).unwrap().unwrap()
  }

  #[test]
  fn test_initial_layout() {
    let heap = checked();

    assert_eq!(heap.heap_size(), FRAME_SIZE + 64);
    let blocks: Vec<Block> = heap.blocks().collect();
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].is_free());
    assert_eq!(blocks[0].payload(), FIRST_BLOCK);
    assert_eq!(blocks[0].size(), 64);
  }

  #[test]
  fn test_small_request_takes_front_of_block() {
    let mut heap = checked();

    let a = alloc(&mut heap, 8);
    assert_eq!(a.offset(), FIRST_BLOCK);

    let blocks: Vec<Block> = heap.blocks().collect();
    assert_eq!(blocks[0].size(), 16);
    assert!(!blocks[0].is_free());
    assert_eq!(blocks[1].size(), 48);
    assert!(blocks[1].is_free());
  }

  #[test]
  fn test_large_request_takes_back_of_block() {
    let mut heap = checked();

    // Nothing fits in the initial 64 bytes, so the heap grows to 64 + 4096
    // merged bytes and the 120-byte block is carved from its tail.
    let a = alloc(&mut heap, 112);
    let blocks: Vec<Block> = heap.blocks().collect();

    assert_eq!(blocks.len(), 2);
    assert!(blocks[0].is_free());
    assert_eq!(blocks[0].size(), 64 + 4096 - 120);
    assert_eq!(blocks[1].payload(), a.offset());
    assert_eq!(blocks[1].size(), 120);
  }

  #[test]
  fn test_split_threshold_is_configurable() {
    let config = AllocatorConfig::default()
      .with_checks(true)
      .with_split_threshold(usize::MAX);
    let mut heap = Allocator::with_config(config).unwrap();

    let a = alloc(&mut heap, 112);
    assert_eq!(a.offset(), FIRST_BLOCK);
  }

  #[test]
  fn test_tiny_remainder_is_not_split() {
    let mut heap = checked();

    // 64-byte block, 48-byte request: a 16-byte remainder stays attached.
    let a = alloc(&mut heap, 40);
    assert_eq!(heap.usable_size(a).unwrap(), 56);
    assert_eq!(heap.free_list.len(), 0);
  }

  #[test]
  fn test_zero_size_is_a_no_op() {
    let mut heap = checked();
    let before = heap.stats();

    assert_eq!(heap.allocate(0).unwrap(), None);
    assert_eq!(heap.reallocate(None, 0).unwrap(), None);
    assert_eq!(heap.stats(), before);
  }

  #[test]
  fn test_free_coalesces_all_four_cases() {
    let mut heap = checked();
    let a = alloc(&mut heap, 16);
    let b = alloc(&mut heap, 16);
    let c = alloc(&mut heap, 16);
    let d = alloc(&mut heap, 16);
    let e = alloc(&mut heap, 16);
    let free_before = heap.stats().free_blocks;

    // Both neighbours allocated.
    heap.free(b).unwrap();
    assert_eq!(heap.stats().free_blocks, free_before + 1);

    // Previous free.
    heap.free(c).unwrap();
    assert_eq!(heap.stats().free_blocks, free_before + 1);

    // Next free.
    heap.free(a).unwrap();
    assert_eq!(heap.stats().free_blocks, free_before + 1);
    assert_eq!(heap.free_blocks().next().map(|b| b.payload()), Some(a.offset()));

    // Both free.
    heap.free(e).unwrap();
    heap.free(d).unwrap();
    assert_eq!(heap.stats().free_blocks, 1);
    heap.check().unwrap();
  }

  #[test]
  fn test_double_and_invalid_free_are_rejected() {
    let mut heap = checked();
    let a = alloc(&mut heap, 24);

    heap.free(a).unwrap();
    assert_eq!(heap.free(a), Err(HeapError::DoubleFree(a)));

    let bogus = Address::from_offset(a.offset() + 8);
    assert_eq!(heap.free(bogus), Err(HeapError::InvalidFree(bogus)));
    heap.check().unwrap();
  }

  #[test]
  fn test_readdressed_block_can_be_freed_again() {
    let mut heap = checked();
    let a = alloc(&mut heap, 24);
    heap.free(a).unwrap();

    let b = alloc(&mut heap, 24);
    assert_eq!(a, b);
    heap.free(b).unwrap();
  }

  #[test]
  fn test_realloc_grows_into_free_successor() {
    let mut heap = checked();
    let a = alloc(&mut heap, 8);
    heap.payload_mut(a).unwrap().copy_from_slice(b"abcdefgh");

    let b = heap.reallocate(Some(a), 40).unwrap().unwrap();
    assert_eq!(a, b);
    assert_eq!(&heap.payload(b).unwrap()[..8], b"abcdefgh");
    assert_eq!(heap.usable_size(b).unwrap(), 56);
  }

  #[test]
  fn test_realloc_grows_at_end_of_heap() {
    let mut heap = checked();
    let a = alloc(&mut heap, 48);
    assert_eq!(heap.free_list.len(), 0);
    heap.payload_mut(a).unwrap().fill(7);

    let b = heap.reallocate(Some(a), 1000).unwrap().unwrap();
    assert_eq!(a, b);
    assert!(heap.payload(b).unwrap()[..48].iter().all(|&x| x == 7));
    assert_eq!(heap.heap_size(), FRAME_SIZE + 64 + 4096);
  }

  #[test]
  fn test_realloc_moves_when_blocked() {
    let mut heap = checked();
    let a = alloc(&mut heap, 8);
    let _b = alloc(&mut heap, 8);
    heap.payload_mut(a).unwrap().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

    let moved = heap.reallocate(Some(a), 64).unwrap().unwrap();
    assert_ne!(a, moved);
    assert!(!heap.is_live(a));
    assert_eq!(&heap.payload(moved).unwrap()[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
  }

  #[test]
  fn test_realloc_does_not_reach_past_a_middle_free_block() {
    let mut heap = checked();
    let a = alloc(&mut heap, 8);
    let b = alloc(&mut heap, 8);
    let _c = alloc(&mut heap, 8);
    heap.free(b).unwrap();

    // The free successor is too small and not at the end of the heap.
    let moved = heap.reallocate(Some(a), 200).unwrap().unwrap();
    assert_ne!(moved, a);
    heap.check().unwrap();
  }

  #[test]
  fn test_shrinking_realloc_keeps_block() {
    let mut heap = checked();
    let a = alloc(&mut heap, 40);

    let b = heap.reallocate(Some(a), 4).unwrap().unwrap();
    assert_eq!(a, b);
    assert_eq!(heap.payload(b).unwrap().len(), 4);
  }

  #[test]
  fn test_out_of_memory_leaves_heap_usable() {
    let config = AllocatorConfig::default()
      .with_checks(true)
      .with_max_heap_size(1024);
    let mut heap = Allocator::with_config(config).unwrap();

    let err = heap.allocate(2048).unwrap_err();
    assert!(matches!(err, HeapError::OutOfMemory { .. }));

    // The chunk-sized growth fails, the exact-fit fallback succeeds.
    let a = alloc(&mut heap, 512);
    heap.free(a).unwrap();
    heap.check().unwrap();
  }

  #[test]
  fn test_unrepresentable_growth_is_out_of_memory() {
    let mut heap = checked();
    let before = heap.heap_size();

    assert!(matches!(heap.extend_heap(usize::MAX), Err(HeapError::OutOfMemory { .. })));
    assert_eq!(heap.heap_size(), before);
    heap.check().unwrap();
  }

  #[test]
  fn test_oversized_chunk_falls_back_to_deficit() {
    let config = AllocatorConfig::default()
      .with_checks(true)
      .with_chunk_size(u32::MAX as usize)
      .with_max_heap_size(1024);
    let mut heap = Allocator::with_config(config).unwrap();

    let a = alloc(&mut heap, 100);
    assert!(heap.usable_size(a).unwrap() >= 100);
    assert!(heap.heap_size() <= 1024);
  }

  #[test]
  fn test_payload_of_freed_block_is_rejected() {
    let mut heap = checked();
    let a = alloc(&mut heap, 8);
    heap.free(a).unwrap();

    assert_eq!(heap.payload(a), Err(HeapError::InvalidAddress(a)));
    assert_eq!(heap.usable_size(a), Err(HeapError::InvalidAddress(a)));
  }
}
