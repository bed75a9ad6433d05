use std::io::Read;

use tagalloc::{Allocator, AllocatorConfig, HeapResult, Region};

/// Waits until the user presses ENTER when `TAGALLOC_STEP` is set, so each
/// heap dump can be read before the next operation changes it.
fn block_until_enter_pressed() {
  if std::env::var_os("TAGALLOC_STEP").is_some() {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

/// Prints the break (bytes handed out by the region) followed by every block.
fn print_heap<R: Region>(
  label: &str,
  heap: &Allocator<R>,
) {
  println!(
    "\n[{}] PID = {}, break = {} of {} bytes\n{}",
    label,
    std::process::id(),
    heap.heap_size(),
    heap.region().limit(),
    heap
  );
  block_until_enter_pressed();
}

fn run() -> HeapResult<()> {
  // Every step below is followed by a full consistency check.
  let config = AllocatorConfig::default().with_checks(true);

  #[cfg(unix)]
  let mut heap = Allocator::with_region(tagalloc::MmapRegion::new(config.max_heap_size)?, config)?;
  #[cfg(not(unix))]
  let mut heap = Allocator::with_config(config)?;

  #[cfg(unix)]
  println!("heap mapped at {:p}", heap.region().base());

  print_heap("start", &heap);

  // --------------------------------------------------------------------
  // 1) A small request is carved from the front of the initial block.
  // --------------------------------------------------------------------
  let first = heap.allocate(4)?.expect("non-zero request");
  heap.payload_mut(first)?.copy_from_slice(&0xDEADBEEFu32.to_ne_bytes());
  println!("\n[1] value written at {} = {:02X?}", first, heap.payload(first)?);
  print_heap("1: allocate 4 bytes", &heap);

  // --------------------------------------------------------------------
  // 2) Allocate 12 bytes. The remainder of the initial block still fits,
  //    so the heap does not grow.
  // --------------------------------------------------------------------
  let second = heap.allocate(12)?.expect("non-zero request");
  heap.payload_mut(second)?.fill(0xAB);
  print_heap("2: allocate 12 bytes", &heap);

  // --------------------------------------------------------------------
  // 3) A large request grows the heap and is placed at the back of the
  //    new block.
  // --------------------------------------------------------------------
  let third = heap.allocate(512)?.expect("non-zero request");
  print_heap("3: allocate 512 bytes", &heap);

  // --------------------------------------------------------------------
  // 4) Freeing the first block leaves it on the free list, unmerged, as
  //    both neighbours are still allocated.
  // --------------------------------------------------------------------
  heap.free(first)?;
  print_heap("4: free the first block", &heap);

  // --------------------------------------------------------------------
  // 5) A 2-byte request reuses the freed block: it is the best fit.
  // --------------------------------------------------------------------
  let fifth = heap.allocate(2)?.expect("non-zero request");
  println!(
    "\n[5] fifth == first? {}",
    if fifth == first {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );
  print_heap("5: allocate 2 bytes", &heap);

  // --------------------------------------------------------------------
  // 6) Growing the 512-byte block: it sits at the end of the heap, so it
  //    grows in place.
  // --------------------------------------------------------------------
  let grown = heap.reallocate(Some(third), 64 * 1024)?.expect("non-zero request");
  println!("\n[6] grown in place? {}", grown == third);
  print_heap("6: reallocate to 64 KiB", &heap);

  // --------------------------------------------------------------------
  // 7) Free everything: the heap collapses into a single free block.
  // --------------------------------------------------------------------
  heap.free(second)?;
  heap.free(fifth)?;
  heap.free(grown)?;
  print_heap("7: free everything", &heap);

  println!("\n{:#?}", heap.stats());
  Ok(())
}

fn main() {
  env_logger::init();

  if let Err(err) = run() {
    eprintln!("walkthrough failed: {}", err);
    std::process::exit(1);
  }
}
