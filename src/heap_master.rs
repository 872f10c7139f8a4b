//! The heap-master singleton: owns the region provider, global
//! configuration, the pool of heap-manager slots (allocated in superblocks),
//! the free-stack of heaps released by terminated threads, and (optionally)
//! aggregated statistics.
//!
//! Grounded on `examples/original_source/llheap.cc`'s `HeapMaster` struct,
//! `HeapMaster::heapMasterCtor`, and `HeapMaster::getHeap`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use libc::{mmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};

use crate::bucket::{self, Lookup, BUCKET_COUNT};
use crate::config;
use crate::error::abort_with;
use crate::heap_manager::Heap;
use crate::region::Region;
use crate::spinlock::Spinlock;
use crate::stats::GlobalStats;

/// Number of `Heap`s carved out of one mmap'd superblock. Sized to the
/// number of online cores (`get_nprocs` in the original), with a floor so
/// single-core builds still batch allocations sensibly.
fn superblock_heap_count() -> usize {
  let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
  if n > 0 { n as usize } else { 1 }
}

struct Superblock {
  next: *mut Heap,
  end: *mut Heap,
}

unsafe impl Send for Superblock {}

/// The process-wide allocator singleton.
///
/// `region`, `free_heap_list`, and `current_superblock` are each mutated
/// only while holding the matching spinlock (`region`'s own internal
/// extension lock; `mgr_lock` for the other two) — exactly the discipline
/// `examples/original_source/llheap.cc` uses for its global `HeapMaster`.
/// They live behind [`UnsafeCell`] rather than `std::sync::Mutex` so that
/// critical sections are plain spins, never OS blocking.
pub struct HeapMaster {
  mgr_lock: Spinlock,
  region: UnsafeCell<Region>,
  lookup: Lookup,

  extend_amount: AtomicUsize,
  mmap_start: AtomicUsize,
  max_bucket_used: AtomicUsize,

  free_heap_list: UnsafeCell<*mut Heap>,
  current_superblock: UnsafeCell<Option<Superblock>>,
  /// Head of the intrusive list of every heap ever minted (linked through
  /// `Heap::next_all_heap`), for the `LLHEAP_MALLOC_STATS` leak report only;
  /// never touched on the allocate/free hot path. An intrusive list rather
  /// than a `Vec` so that minting a heap never itself calls into the
  /// allocator it is bootstrapping.
  all_heaps_head: UnsafeCell<*mut Heap>,

  pub stats: GlobalStats,
}

// `OnceLock<HeapMaster>: Sync` requires `HeapMaster: Send + Sync` — the raw
// pointers inside (`free_heap_list`, `current_superblock`, `all_heaps_head`)
// are never aliased without holding `mgr_lock` first, so both are sound here.
unsafe impl Send for HeapMaster {}
unsafe impl Sync for HeapMaster {}

static MASTER: OnceLock<HeapMaster> = OnceLock::new();

/// Runs at process exit via `libc::atexit`. Only reads `LLHEAP_MALLOC_STATS`
/// and, if set, reports statistics and a leak warning — never touches
/// `MASTER` before the process is actually tearing down, since registering
/// this during `HeapMaster::new()` must not risk re-entering
/// `OnceLock::get_or_init`.
extern "C" fn shutdown_hook() {
  if std::env::var_os("LLHEAP_MALLOC_STATS").is_none() {
    return;
  }
  let m = master();
  let fd = crate::error::STATS_FD.load(Ordering::Relaxed);
  crate::stats::print_stats(&m.stats, fd);
  if let Some(excess) = crate::stats::check_leaks(&m.stats) {
    let mut msg = format!("rallocator: {excess} bytes unfreed at program exit\n");
    for heap in m.all_heaps() {
      let per_heap = unsafe { (*heap).unfreed.load(Ordering::Relaxed) };
      if per_heap != 0 {
        msg.push_str(&format!("  heap {heap:p}: {per_heap} bytes unfreed\n"));
      }
    }
    unsafe {
      libc::write(libc::STDERR_FILENO, msg.as_ptr() as *const libc::c_void, msg.len());
    }
  }
}

impl HeapMaster {
  fn new() -> Self {
    let region = Region::new();
    let lookup = Lookup::build();
    let extend_amount = config::default_extend_amount();
    let mmap_start = config::default_mmap_start();
    let max_bucket_used = bucket::bsearchl(mmap_start, BUCKET_COUNT - 1);

    unsafe {
      libc::atexit(shutdown_hook);
    }

    HeapMaster {
      mgr_lock: Spinlock::new(),
      region: UnsafeCell::new(region),
      lookup,
      extend_amount: AtomicUsize::new(extend_amount),
      mmap_start: AtomicUsize::new(mmap_start),
      max_bucket_used: AtomicUsize::new(max_bucket_used),
      free_heap_list: UnsafeCell::new(std::ptr::null_mut()),
      current_superblock: UnsafeCell::new(None),
      all_heaps_head: UnsafeCell::new(std::ptr::null_mut()),
      stats: GlobalStats::new(),
    }
  }

  pub fn lookup(&self) -> &Lookup {
    &self.lookup
  }

  pub fn extend_amount(&self) -> usize {
    self.extend_amount.load(Ordering::Relaxed)
  }

  pub fn set_extend_amount(&self, value: usize) {
    self.extend_amount.store(value, Ordering::Relaxed);
  }

  pub fn mmap_start(&self) -> usize {
    self.mmap_start.load(Ordering::Relaxed)
  }

  pub fn max_bucket_used(&self) -> usize {
    self.max_bucket_used.load(Ordering::Relaxed)
  }

  /// Sets a new mmap crossover, clipped to `[page_size, largest_bucket]`.
  /// Returns `false` if `value` is below one page.
  pub fn set_mmap_start(&self, value: usize) -> bool {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    if value < page_size {
      return false;
    }
    let clipped = value.min(crate::bucket::BUCKET_SIZES[BUCKET_COUNT - 1]);
    self.mmap_start.store(clipped, Ordering::Relaxed);
    self.max_bucket_used.store(bucket::bsearchl(clipped, BUCKET_COUNT - 1), Ordering::Relaxed);
    true
  }

  /// Runs `f` with exclusive access to the region provider. `Region::carve`
  /// serializes the actual break extension internally; callers never see a
  /// torn state because the only mutation path is `carve`.
  pub fn with_region<T>(&self, f: impl FnOnce(&mut Region) -> T) -> T {
    let region = unsafe { &mut *self.region.get() };
    f(region)
  }

  /// Pops a heap from the free-heap stack, or allocates a fresh one from
  /// the current heap-manager superblock (mapping a new superblock if the
  /// current one is exhausted). Mirrors `HeapMaster::getHeap`.
  pub fn get_heap(&self) -> *mut Heap {
    self.mgr_lock.acquire();
    let heap = unsafe { self.get_heap_locked() };
    self.mgr_lock.release();
    heap
  }

  /// # Safety
  /// Caller must hold `mgr_lock`.
  unsafe fn get_heap_locked(&self) -> *mut Heap {
    let free_list = unsafe { &mut *self.free_heap_list.get() };
    if !free_list.is_null() {
      let heap = *free_list;
      unsafe {
        *free_list = (*heap).next_free_heap;
        (*heap).next_free_heap = std::ptr::null_mut();
      }
      self.stats.reused_heap.fetch_add(1, Ordering::Relaxed);
      return heap;
    }

    let superblock = unsafe { &mut *self.current_superblock.get() };
    let need_new_superblock = match superblock {
      Some(sb) => sb.next >= sb.end,
      None => true,
    };

    if need_new_superblock {
      let count = superblock_heap_count();
      let bytes = count * std::mem::size_of::<Heap>();
      let addr = unsafe {
        mmap(std::ptr::null_mut(), bytes, PROT_READ | PROT_WRITE, MAP_PRIVATE | MAP_ANONYMOUS, -1, 0)
      };
      if addr == MAP_FAILED {
        abort_with("insufficient memory to allocate a block of heap managers");
      }
      let base = addr as *mut Heap;
      for i in 0..count {
        unsafe { std::ptr::write(base.add(i), Heap::new()); }
      }
      *superblock = Some(Superblock { next: base, end: unsafe { base.add(count) } });
    }

    let sb = superblock.as_mut().unwrap();
    let heap = sb.next;
    sb.next = unsafe { sb.next.add(1) };

    unsafe {
      (*heap).fixup_home(heap);
      (*heap).next_free_heap = std::ptr::null_mut();
      let head = &mut *self.all_heaps_head.get();
      (*heap).next_all_heap = *head;
      *head = heap;
    }
    self.stats.new_heap.fetch_add(1, Ordering::Relaxed);
    heap
  }

  /// Returns `heap` to the free-heap stack for reuse by a later thread.
  pub fn release_heap(&self, heap: *mut Heap) {
    self.mgr_lock.acquire();
    unsafe {
      let free_list = &mut *self.free_heap_list.get();
      (*heap).next_free_heap = *free_list;
      *free_list = heap;
    }
    self.mgr_lock.release();
  }

  /// Walks the all-heaps list, for the `LLHEAP_MALLOC_STATS` shutdown report
  /// only. Builds an owned `Vec` since this runs once at process exit, well
  /// outside the bootstrap path the list itself exists to keep allocation-free.
  pub fn all_heaps(&self) -> Vec<*mut Heap> {
    let mut heaps = Vec::new();
    let mut cur = unsafe { *self.all_heaps_head.get() };
    while !cur.is_null() {
      heaps.push(cur);
      cur = unsafe { (*cur).next_all_heap };
    }
    heaps
  }
}

/// Runs the heap-master singleton initializer exactly once — the first
/// caller completes initialization before any other caller proceeds — and
/// returns a reference to it.
pub fn master() -> &'static HeapMaster {
  MASTER.get_or_init(HeapMaster::new)
}

/// The heap-master and per-thread heap bindings are process-wide singletons,
/// so tests across this module and `thread_heap` that mutate them must run
/// serialized against each other even though `cargo test` runs tests on
/// separate threads in the same process.
#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use std::sync::Mutex;

  pub(crate) static TEST_SERIAL: Mutex<()> = Mutex::new(());

  #[test]
  fn master_initializes_once() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let m1 = master();
    let m2 = master();
    assert_eq!(m1 as *const _, m2 as *const _);
  }

  #[test]
  fn get_heap_returns_distinct_heaps_until_reuse() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let m = master();
    let h1 = m.get_heap();
    let h2 = m.get_heap();
    assert_ne!(h1, h2);
    m.release_heap(h1);
    let h3 = m.get_heap();
    assert_eq!(h1, h3, "released heap should be reused before minting a new one");
  }
}
