//! Public C-style entry points, POSIX-style out-parameter combinators, and
//! the `GlobalAlloc` packaging (`original_source/llheap.h`).
//!
//! Every function here is a thin adapter over `core_alloc` — no policy
//! decisions live in this module.

use std::alloc::{GlobalAlloc, Layout};

use crate::config::ConfigOption;
use crate::core_alloc;
use crate::error::AllocError;
use crate::heap_master;
use crate::stats;

pub fn allocate(size: usize) -> Option<*mut u8> {
  core_alloc::do_allocate(size, false)
}

pub fn allocate_array(dim: usize, elem_size: usize) -> Option<*mut u8> {
  let total = dim.checked_mul(elem_size)?;
  core_alloc::do_allocate(total, false)
}

pub fn allocate_zeroed(dim: usize, elem_size: usize) -> Option<*mut u8> {
  let total = dim.checked_mul(elem_size)?;
  core_alloc::do_allocate(total, true)
}

pub fn resize(ptr: *mut u8, size: usize) -> Option<*mut u8> {
  core_alloc::do_reallocate(ptr, size, false, None)
}

pub fn resize_array(ptr: *mut u8, dim: usize, elem_size: usize) -> Option<*mut u8> {
  let total = dim.checked_mul(elem_size)?;
  core_alloc::do_reallocate(ptr, total, false, None)
}

pub fn reallocate(ptr: *mut u8, size: usize) -> Option<*mut u8> {
  core_alloc::do_reallocate(ptr, size, true, None)
}

pub fn reallocate_array(ptr: *mut u8, dim: usize, elem_size: usize) -> Option<*mut u8> {
  let total = dim.checked_mul(elem_size)?;
  core_alloc::do_reallocate(ptr, total, true, None)
}

pub fn aligned_allocate(alignment: usize, size: usize) -> Option<*mut u8> {
  core_alloc::do_aligned_allocate(alignment, size, false)
}

pub fn aligned_allocate_array(alignment: usize, dim: usize, elem_size: usize) -> Option<*mut u8> {
  let total = dim.checked_mul(elem_size)?;
  core_alloc::do_aligned_allocate(alignment, total, false)
}

pub fn aligned_allocate_zeroed(alignment: usize, dim: usize, elem_size: usize) -> Option<*mut u8> {
  let total = dim.checked_mul(elem_size)?;
  core_alloc::do_aligned_allocate(alignment, total, true)
}

pub fn aligned_resize(ptr: *mut u8, alignment: usize, size: usize) -> Option<*mut u8> {
  core_alloc::do_reallocate(ptr, size, false, Some(alignment))
}

pub fn aligned_reallocate(ptr: *mut u8, alignment: usize, size: usize) -> Option<*mut u8> {
  core_alloc::do_reallocate(ptr, size, true, Some(alignment))
}

pub fn free(ptr: *mut u8) {
  core_alloc::do_free(ptr)
}

pub fn query_size(ptr: *mut u8) -> usize {
  core_alloc::query_size(ptr)
}

pub fn query_usable_size(ptr: *mut u8) -> usize {
  core_alloc::query_usable_size(ptr)
}

pub fn query_alignment(ptr: *mut u8) -> usize {
  core_alloc::query_alignment(ptr)
}

pub fn query_zero_filled(ptr: *mut u8) -> bool {
  core_alloc::query_zero_filled(ptr)
}

pub fn query_remote(ptr: *mut u8) -> bool {
  core_alloc::query_remote(ptr)
}

/// Applies a configuration option. `ExtendAmount` always succeeds;
/// `MmapStart` returns `Err(AllocError::UnknownOption)` if the requested
/// crossover is below one page (see `HeapMaster::set_mmap_start`).
pub fn configure(option: ConfigOption) -> Result<(), AllocError> {
  let master = heap_master::master();
  match option {
    ConfigOption::ExtendAmount(value) => {
      let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
      master.set_extend_amount(crate::align_to!(value.max(page), page));
      Ok(())
    }
    ConfigOption::MmapStart(value) => {
      if master.set_mmap_start(value) {
        Ok(())
      } else {
        Err(AllocError::UnknownOption)
      }
    }
  }
}

pub fn print_stats() {
  let master = heap_master::master();
  stats::print_stats(&master.stats, stats::stats_fd());
}

pub fn print_stats_xml() {
  let master = heap_master::master();
  stats::print_stats_xml(&master.stats, stats::stats_fd());
}

pub fn clear_stats() {
  heap_master::master().stats.clear();
}

pub fn set_stats_fd(fd: i32) {
  stats::set_stats_fd(fd);
}

// ---- POSIX-style out-parameter combinators --------------------------------
//
// `original_source/llheap.h` also exposes out-parameter variants that mirror
// `posix_memalign`'s calling convention: write the new pointer through
// `*new_ptr` and return a status code rather than returning the pointer
// directly.

/// Mirrors `posix_realloc`: writes the new pointer through `*new_ptr` and
/// returns `true` on success.
pub fn posix_realloc(old_ptr: *mut u8, size: usize, new_ptr: &mut *mut u8) -> bool {
  match reallocate(old_ptr, size) {
    Some(p) => {
      *new_ptr = p;
      true
    }
    None => false,
  }
}

pub fn posix_reallocarray(old_ptr: *mut u8, dim: usize, elem_size: usize, new_ptr: &mut *mut u8) -> bool {
  match reallocate_array(old_ptr, dim, elem_size) {
    Some(p) => {
      *new_ptr = p;
      true
    }
    None => false,
  }
}

pub fn posix_aligned_realloc(old_ptr: *mut u8, alignment: usize, size: usize, new_ptr: &mut *mut u8) -> bool {
  match aligned_reallocate(old_ptr, alignment, size) {
    Some(p) => {
      *new_ptr = p;
      true
    }
    None => false,
  }
}

pub fn posix_aligned_reallocarray(old_ptr: *mut u8, alignment: usize, dim: usize, elem_size: usize, new_ptr: &mut *mut u8) -> bool {
  let total = match dim.checked_mul(elem_size) {
    Some(t) => t,
    None => return false,
  };
  posix_aligned_realloc(old_ptr, alignment, total, new_ptr)
}

// ---- GlobalAlloc packaging -------------------------------------------------

/// A `#[global_allocator]`-compatible wrapper over the functions above.
///
/// ```ignore
/// #[global_allocator]
/// static ALLOCATOR: rallocator::Rallocator = rallocator::Rallocator;
/// ```
pub struct Rallocator;

unsafe impl GlobalAlloc for Rallocator {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    match aligned_allocate(layout.align().max(crate::header::ALIGN), layout.size()) {
      Some(p) => p,
      None => std::ptr::null_mut(),
    }
  }

  unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
    match aligned_allocate_zeroed(layout.align().max(crate::header::ALIGN), 1, layout.size()) {
      Some(p) => p,
      None => std::ptr::null_mut(),
    }
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
    free(ptr);
  }

  unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
    match aligned_reallocate(ptr, layout.align().max(crate::header::ALIGN), new_size) {
      Some(p) => p,
      None => std::ptr::null_mut(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::heap_master::tests::TEST_SERIAL;

  #[test]
  fn allocate_array_detects_overflow() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    assert!(allocate_array(usize::MAX, 2).is_none());
  }

  #[test]
  fn configure_extend_amount_rounds_to_page_size() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    configure(ConfigOption::ExtendAmount(page + 1)).unwrap();
    assert_eq!(heap_master::master().extend_amount() % page, 0);
  }

  #[test]
  fn configure_mmap_start_below_page_size_fails() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    assert!(configure(ConfigOption::MmapStart(1)).is_err());
  }

  #[test]
  fn global_alloc_round_trips_through_layout() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let alloc = Rallocator;
    let layout = Layout::from_size_align(128, 32).unwrap();
    unsafe {
      let p = alloc.alloc(layout);
      assert!(!p.is_null());
      assert_eq!(p as usize % 32, 0);
      alloc.dealloc(p, layout);
    }
  }
}
