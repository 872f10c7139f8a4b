//! The five core algorithms: allocate, free, resize/realloc, and aligned
//! allocation. Everything in `api.rs` is a thin wrapper over the functions
//! in this module.

use std::sync::atomic::Ordering;

use libc::{mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};

use crate::bucket::{self, BUCKET_SIZES};
use crate::error::abort_with;
use crate::header::{self, Header};
use crate::heap_manager::FreeListHeader;
use crate::heap_master;
use crate::thread_heap;

fn page_size() -> usize {
  unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Real block size backing `header`: the bucket size for a small block, or
/// the mapped length for a large block.
unsafe fn block_size_of(header: *const Header) -> usize {
  unsafe {
    if Header::is_mapped(header) {
      Header::mapped_size(header)
    } else {
      let home = Header::link(header) as *const FreeListHeader;
      (*home).block_size
    }
  }
}

/// Allocates `n` user bytes, optionally zero-filling them. A request of
/// `n == 0` still returns a unique, freeable pointer, since it simply lands
/// in the smallest bucket.
pub fn do_allocate(n: usize, zero: bool) -> Option<*mut u8> {
  let t = n.checked_add(header::HEADER_SIZE)?;
  let master = heap_master::master();

  if t < master.mmap_start() {
    let max_bucket = master.max_bucket_used();
    let k = bucket::classify(master.lookup(), t, max_bucket);
    let bs = BUCKET_SIZES[k];
    let heap = thread_heap::current_heap();

    let block = unsafe {
      let fl = &mut (*heap).free_lists[k];
      let mut block = fl.pop_local();
      if block.is_null() {
        block = fl.take_from_return();
      }
      if block.is_null() {
        let extend_amount = master.extend_amount();
        let lookup = master.lookup();
        let addr = master.with_region(|region| (*heap).extend(bs, region, lookup, max_bucket, extend_amount));
        match addr {
          Ok(addr) => block = addr as *mut Header,
          Err(_) => abort_with("rallocator: out of memory extending heap region"),
        }
      }
      Header::set_link_clear_sticky(block, fl as *const FreeListHeader as usize);
      Header::set_size(block, n);
      Header::set_zero_filled(block, zero);
      (*heap).unfreed.fetch_add(n as isize, Ordering::Relaxed);
      block
    };

    let user = Header::user_ptr(block);
    if zero {
      unsafe { std::ptr::write_bytes(user, 0, n) };
    }
    master.stats.allocate_calls.fetch_add(1, Ordering::Relaxed);
    master.stats.bytes_requested.fetch_add(n, Ordering::Relaxed);
    master.stats.unfreed.fetch_add(n as isize, Ordering::Relaxed);
    Some(user)
  } else {
    let page = page_size();
    let total = crate::align_to!(t, page);
    let addr = unsafe { mmap(std::ptr::null_mut(), total, PROT_READ | PROT_WRITE, MAP_PRIVATE | MAP_ANONYMOUS, -1, 0) };
    if addr == MAP_FAILED {
      abort_with("rallocator: insufficient memory to map a large block");
    }
    let header = addr as *mut Header;
    unsafe {
      Header::set_mapped(header, total);
      Header::set_zero_filled(header, zero);
      Header::set_size(header, n);
    }
    master.stats.allocate_calls.fetch_add(1, Ordering::Relaxed);
    master.stats.mmap_allocations.fetch_add(1, Ordering::Relaxed);
    master.stats.bytes_requested.fetch_add(n, Ordering::Relaxed);
    master.stats.unfreed.fetch_add(n as isize, Ordering::Relaxed);
    Some(Header::user_ptr(header))
  }
}

/// Frees a block previously returned by this module. No-op on null.
pub fn do_free(p: *mut u8) {
  if p.is_null() {
    return;
  }
  let master = heap_master::master();
  unsafe {
    let real_header = Header::real_header_for(p);
    let freed_size = Header::size(real_header) as isize;
    if Header::is_mapped(real_header) {
      let size = Header::mapped_size(real_header);
      munmap(real_header as *mut libc::c_void, size);
      master.stats.mmap_frees.fetch_add(1, Ordering::Relaxed);
    } else {
      let home = Header::link(real_header) as *mut FreeListHeader;
      let owning_heap = (*home).home;
      (*owning_heap).unfreed.fetch_sub(freed_size, Ordering::Relaxed);
      // `current_heap_if_bound` returns `None` once this thread's own slot
      // has already been torn down (e.g. freeing from within another
      // thread-local's `Drop` during the same teardown sequence) — in that
      // case we can no longer claim ownership of any heap, so route to the
      // block's own owner's return list rather than risk a local push from
      // a thread whose slot is gone.
      if thread_heap::current_heap_if_bound() == Some(owning_heap) {
        (*home).push_local(real_header);
      } else {
        (*home).push_return(real_header);
      }
    }
    master.stats.unfreed.fetch_sub(freed_size, Ordering::Relaxed);
  }
  master.stats.free_calls.fetch_add(1, Ordering::Relaxed);
}

/// Shared implementation of `resize`/`reallocate`/`aligned_resize`/
/// `aligned_reallocate`. `preserve_content` distinguishes realloc from
/// resize; `requested_alignment` is `Some` only for the aligned variants.
pub fn do_reallocate(old_ptr: *mut u8, new_size: usize, preserve_content: bool, requested_alignment: Option<usize>) -> Option<*mut u8> {
  if old_ptr.is_null() {
    return match requested_alignment {
      Some(a) => do_aligned_allocate(a, new_size, false),
      None => do_allocate(new_size, false),
    };
  }
  if new_size == 0 {
    do_free(old_ptr);
    return do_allocate(0, false);
  }

  let master = heap_master::master();
  unsafe {
    let real_header = Header::real_header_for(old_ptr);
    let bs = block_size_of(real_header);
    let osz = Header::size(real_header);
    let ozf = Header::is_zero_filled(real_header);
    let avail = bs - (old_ptr as usize - real_header as usize);

    if new_size <= avail && avail <= 2 * new_size {
      if preserve_content {
        if ozf && new_size > osz {
          std::ptr::write_bytes(old_ptr.add(osz), 0, new_size - osz);
        }
        master.stats.reallocate_calls.fetch_add(1, Ordering::Relaxed);
      } else {
        Header::set_zero_filled(real_header, false);
        master.stats.resize_calls.fetch_add(1, Ordering::Relaxed);
      }
      let delta = new_size as isize - osz as isize;
      master.stats.unfreed.fetch_add(delta, Ordering::Relaxed);
      if !Header::is_mapped(real_header) {
        let home = Header::link(real_header) as *mut FreeListHeader;
        (*(*home).home).unfreed.fetch_add(delta, Ordering::Relaxed);
      }
      Header::set_size(real_header, new_size);
      return Some(old_ptr);
    }

    // Move case: preserve the old alignment unless the caller's explicit
    // request (aligned variants) overrides it.
    let maybe_fake = Header::from_user_ptr(old_ptr);
    let old_alignment = if Header::is_fake(maybe_fake) { Some(Header::fake_alignment(maybe_fake)) } else { None };

    let effective_alignment = match (requested_alignment, old_alignment) {
      (Some(requested), Some(old_a)) if old_a >= requested && old_a <= 256 => Some(old_a),
      (Some(requested), _) => Some(requested),
      (None, Some(old_a)) => Some(old_a),
      (None, None) => None,
    };

    let new_ptr = match effective_alignment {
      Some(a) => do_aligned_allocate(a, new_size, false)?,
      None => do_allocate(new_size, false)?,
    };

    if preserve_content {
      let copy_len = osz.min(new_size);
      std::ptr::copy_nonoverlapping(old_ptr, new_ptr, copy_len);
      if ozf {
        let real_new = Header::real_header_for(new_ptr);
        Header::set_zero_filled(real_new, true);
        if new_size > osz {
          std::ptr::write_bytes(new_ptr.add(osz), 0, new_size - osz);
        }
      }
      master.stats.reallocate_calls.fetch_add(1, Ordering::Relaxed);
    } else {
      master.stats.resize_calls.fetch_add(1, Ordering::Relaxed);
    }

    do_free(old_ptr);
    Some(new_ptr)
  }
}

/// Allocates `n` bytes aligned to `alignment` (a power of two). Delegates
/// to plain allocate when `alignment <= ALIGN` or `n == 0`.
pub fn do_aligned_allocate(alignment: usize, n: usize, zero: bool) -> Option<*mut u8> {
  if alignment <= header::ALIGN || n == 0 {
    return do_allocate(n, zero);
  }
  debug_assert!(alignment.is_power_of_two(), "alignment must be a power of two");

  let slack = alignment - header::ALIGN + header::HEADER_SIZE;
  let raw_size = n.checked_add(slack)?;
  let raw = do_allocate(raw_size, false)?;

  unsafe {
    let real_header = Header::from_user_ptr(raw);
    let user = crate::align_to!(raw as usize + header::HEADER_SIZE, alignment);
    let fake = (user - header::HEADER_SIZE) as *mut Header;
    let offset = fake as usize - real_header as usize;

    Header::write_fake(fake, alignment, offset);
    Header::set_size(real_header, n);

    let user_ptr = user as *mut u8;
    if zero {
      std::ptr::write_bytes(user_ptr, 0, n);
      Header::set_zero_filled(real_header, true);
    }
    Some(user_ptr)
  }
}

pub fn query_size(p: *mut u8) -> usize {
  if p.is_null() {
    return 0;
  }
  unsafe { Header::size(Header::real_header_for(p)) }
}

pub fn query_usable_size(p: *mut u8) -> usize {
  if p.is_null() {
    return 0;
  }
  unsafe {
    let real_header = Header::real_header_for(p);
    block_size_of(real_header) - (p as usize - real_header as usize)
  }
}

pub fn query_alignment(p: *mut u8) -> usize {
  if p.is_null() {
    return header::ALIGN;
  }
  unsafe {
    let maybe_fake = Header::from_user_ptr(p);
    if Header::is_fake(maybe_fake) { Header::fake_alignment(maybe_fake) } else { header::ALIGN }
  }
}

pub fn query_zero_filled(p: *mut u8) -> bool {
  if p.is_null() {
    return false;
  }
  unsafe { Header::is_zero_filled(Header::real_header_for(p)) }
}

pub fn query_remote(p: *mut u8) -> bool {
  if p.is_null() {
    return false;
  }
  unsafe {
    let real_header = Header::real_header_for(p);
    if Header::is_mapped(real_header) {
      return false;
    }
    let home = Header::link(real_header) as *const FreeListHeader;
    (*home).home != thread_heap::current_heap()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::heap_master::tests::TEST_SERIAL;

  #[test]
  fn allocate_then_free_round_trips() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let p = do_allocate(42, false).unwrap();
    assert_eq!(p as usize % header::ALIGN, 0);
    assert_eq!(query_size(p), 42);
    assert!(query_usable_size(p) >= 42);
    do_free(p);
  }

  #[test]
  fn zero_size_allocation_returns_unique_pointer() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let a = do_allocate(0, false).unwrap();
    let b = do_allocate(0, false).unwrap();
    assert_ne!(a, b);
    do_free(a);
    do_free(b);
  }

  #[test]
  fn allocate_zeroed_is_all_zero_and_marked() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let p = do_allocate(256, true).unwrap();
    assert!(query_zero_filled(p));
    unsafe {
      for i in 0..256 {
        assert_eq!(*p.add(i), 0);
      }
    }
    do_free(p);
  }

  #[test]
  fn bucket_free_list_is_reused_lifo() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let a = do_allocate(42, false).unwrap();
    do_free(a);
    let b = do_allocate(42, false).unwrap();
    assert_eq!(a, b, "freeing then reallocating the same size should reuse the block");
  }

  #[test]
  fn aligned_allocate_honors_alignment_and_query() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let p = do_aligned_allocate(4096, 100, false).unwrap();
    assert_eq!(p as usize % 4096, 0);
    assert_eq!(query_alignment(p), 4096);
    do_free(p);
  }

  #[test]
  fn aligned_allocate_at_or_below_align_skips_fake_header() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let p = do_aligned_allocate(header::ALIGN, 64, false).unwrap();
    assert_eq!(query_alignment(p), header::ALIGN);
    do_free(p);
  }

  #[test]
  fn reallocate_chain_preserves_alignment_and_zero_fill() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let mut p = do_aligned_allocate(4096, 100, true).unwrap();
    assert!(query_zero_filled(p));
    for size in [200usize, 5_000, 1_000_000] {
      p = do_reallocate(p, size, true, None).unwrap();
      assert_eq!(p as usize % 4096, 0, "alignment must survive every reallocate");
      assert!(query_zero_filled(p));
    }
    do_free(p);
  }

  #[test]
  fn resize_in_place_clears_zero_fill_bit() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let p = do_allocate(64, true).unwrap();
    assert!(query_zero_filled(p));
    let p = do_reallocate(p, 70, false, None).unwrap();
    assert!(!query_zero_filled(p));
    do_free(p);
  }

  #[test]
  fn large_block_round_trips_through_mmap() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let n = 10 * 1024 * 1024;
    let p = do_allocate(n, false).unwrap();
    unsafe { std::ptr::write_bytes(p, 0xAB, n) };
    assert_eq!(query_size(p), n);
    do_free(p);
  }

  #[test]
  fn bucket_boundary_uses_exact_bucket() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let n = BUCKET_SIZES[10] - header::HEADER_SIZE;
    let p = do_allocate(n, false).unwrap();
    assert_eq!(query_usable_size(p), BUCKET_SIZES[10] - header::HEADER_SIZE);
    do_free(p);
  }

  #[test]
  fn unfreed_totals_balance_across_allocate_resize_and_free() {
    let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let master = heap_master::master();
    let before = master.stats.unfreed.load(Ordering::Relaxed);

    let p = do_allocate(100, false).unwrap();
    assert_eq!(master.stats.unfreed.load(Ordering::Relaxed), before + 100);

    let p = do_reallocate(p, 70, false, None).unwrap();
    assert_eq!(master.stats.unfreed.load(Ordering::Relaxed), before + 70);

    do_free(p);
    assert_eq!(master.stats.unfreed.load(Ordering::Relaxed), before);
  }
}
