use cleave::{ArenaConfig, BuddyArena, MappedRegion};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

const OPS: u64 = 100_000;
const REGION: usize = 64 << 20;

/// Arena allocate/deallocate throughput.
fn arena_alloc_free(arena: &mut BuddyArena<'_, 64>, size: usize) {
  for _ in 0..OPS {
    let c = arena.allocate(size);
    black_box(c);
    let _ = unsafe { arena.deallocate(c.ptr) };
  }
}

/// Memoized path: one split, then cache hits.
fn arena_temporal(arena: &mut BuddyArena<'_, 64>, size: usize) {
  for _ in 0..OPS {
    black_box(arena.temporal_allocate(size));
  }
}

/// libc alloc/free throughput.
fn libc_malloc_free(size: usize) {
  for _ in 0..OPS {
    unsafe {
      let ptr = libc::malloc(size);
      black_box(ptr);
      libc::free(ptr);
    }
  }
}

fn benchmark_arena_throughput(c: &mut Criterion) {
  let mut region = MappedRegion::map(REGION).expect("mmap");
  let mut arena = BuddyArena::<64>::try_new(region.as_mut_slice(), ArenaConfig::default())
    .expect("arena");

  let mut group = c.benchmark_group("arena_throughput");

  for size in [16, 64, 256, 1024, 4096] {
    group.throughput(Throughput::Elements(OPS));

    group.bench_with_input(BenchmarkId::new("buddy", size), &size, |b, &size| {
      b.iter(|| arena_alloc_free(&mut arena, size))
    });

    group.bench_with_input(BenchmarkId::new("temporal", size), &size, |b, &size| {
      b.iter(|| arena_temporal(&mut arena, size))
    });

    group.bench_with_input(BenchmarkId::new("libc", size), &size, |b, &size| {
      b.iter(|| libc_malloc_free(size))
    });
  }

  group.finish();
}

/// Many live blocks of mixed sizes, freed in reverse: exercises coalescing.
fn benchmark_fragmentation(c: &mut Criterion) {
  let mut region = MappedRegion::map(REGION).expect("mmap");
  let mut arena = BuddyArena::<64>::try_new(region.as_mut_slice(), ArenaConfig::default())
    .expect("arena");
  let sizes = [24usize, 200, 900, 3000, 60, 500];

  c.bench_function("fill_then_drain", |b| {
    b.iter(|| {
      let mut live = Vec::with_capacity(4096);
      for i in 0..4096 {
        let c = arena.allocate(sizes[i % sizes.len()]);
        if c.is_null() {
          break;
        }
        live.push(c);
      }
      while let Some(c) = live.pop() {
        let _ = unsafe { arena.deallocate(c.ptr) };
      }
      black_box(arena.available())
    })
  });
}

criterion_group!(benches, benchmark_arena_throughput, benchmark_fragmentation);
criterion_main!(benches);
