//! Thread-local heap binding and cleanup.
//!
//! Grounded on `examples/original_source/llheap.cc`'s pthread-destructor
//! trick (`ThreadManager`): the idiomatic Rust replacement is a
//! `thread_local!` value whose `Drop` impl runs on thread exit and returns
//! the heap to the heap-master's free-heap stack.

use std::cell::Cell;

use crate::heap_manager::Heap;
use crate::heap_master;

struct HeapSlot(Cell<*mut Heap>);

impl Drop for HeapSlot {
  fn drop(&mut self) {
    let heap = self.0.replace(std::ptr::null_mut());
    if !heap.is_null() {
      heap_master::master().release_heap(heap);
    }
  }
}

thread_local! {
  static SLOT: HeapSlot = HeapSlot(Cell::new(std::ptr::null_mut()));
}

/// Returns this thread's heap manager, binding lazily on first call. Binding
/// runs the heap-master initializer as a side effect of `heap_master::
/// master()`, then calls `get_heap()` under the manager lock.
///
/// Once this thread's `SLOT` destructor has run, `LocalKey::with` would
/// panic on any later access — which can happen if some other
/// thread-local's `Drop` frees memory during the same teardown sequence,
/// routine once `Rallocator` is the global allocator. `try_with` reports
/// that case instead of panicking; callers that only need an owner to
/// route a free to (not necessarily *this* thread's heap) fall back to
/// `current_heap_if_bound`.
pub fn current_heap() -> *mut Heap {
  SLOT.with(|slot| {
    let existing = slot.0.get();
    if !existing.is_null() {
      return existing;
    }
    let heap = heap_master::master().get_heap();
    slot.0.set(heap);
    heap
  })
}

/// Like [`current_heap`], but returns `None` instead of panicking if this
/// thread's slot has already been torn down, and never binds a fresh heap.
/// Safe to call from within another thread-local's `Drop`.
pub fn current_heap_if_bound() -> Option<*mut Heap> {
  SLOT.try_with(|slot| slot.0.get()).ok().filter(|p| !p.is_null())
}
