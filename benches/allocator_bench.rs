//! Allocator benchmarks.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tagalloc::{Address, Allocator};

fn bench_alloc_free_cycle(c: &mut Criterion) {
  let sizes: &[usize] = &[16, 64, 256, 1024, 4096, 32768];
  let mut group = c.benchmark_group("alloc_free_cycle");

  for &size in sizes {
    group.bench_with_input(BenchmarkId::new("tagalloc", size), &size, |b, &sz| {
      let mut heap = Allocator::new().unwrap();
      b.iter(|| {
        let address = heap.allocate(black_box(sz)).unwrap().unwrap();
        heap.free(address).unwrap();
      });
    });
  }
  group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
  let mut group = c.benchmark_group("alloc_burst");

  group.bench_function("1000x64B", |b| {
    b.iter(|| {
      let mut heap = Allocator::new().unwrap();
      let addresses: Vec<Address> = (0..1000)
        .map(|_| heap.allocate(64).unwrap().unwrap())
        .collect();
      for address in addresses {
        heap.free(address).unwrap();
      }
      black_box(heap.stats());
    });
  });

  // Every other block stays live, so the free list holds 500 entries.
  group.bench_function("fragmented_first_fit", |b| {
    let mut heap = Allocator::new().unwrap();
    let addresses: Vec<Address> = (0..1000)
      .map(|i| heap.allocate(16 + (i % 50) * 8).unwrap().unwrap())
      .collect();
    for address in addresses.iter().step_by(2) {
      heap.free(*address).unwrap();
    }

    b.iter(|| {
      let address = heap.allocate(black_box(200)).unwrap().unwrap();
      heap.free(address).unwrap();
    });
  });

  group.finish();
}

fn bench_realloc_growth(c: &mut Criterion) {
  c.bench_function("realloc_growth_to_64KiB", |b| {
    b.iter(|| {
      let mut heap = Allocator::new().unwrap();
      let mut address = heap.allocate(8).unwrap();
      let mut size = 8;
      while size < 64 * 1024 {
        size *= 2;
        address = heap.reallocate(address, size).unwrap();
      }
      black_box(address);
    });
  });
}

criterion_group!(benches, bench_alloc_free_cycle, bench_alloc_burst, bench_realloc_growth);
criterion_main!(benches);
