//! End-to-end scenarios exercising the allocator the way a real multi-
//! threaded consumer would.
//!
//! Each test touches the process-wide heap-master singleton, so they are
//! serialized against each other with `TEST_SERIAL` even though `cargo
//! test` runs them on separate threads within the same process.

use std::sync::Mutex;
use std::thread;

use rallocator::{allocate, allocate_zeroed, aligned_allocate, free, query_size, query_zero_filled, reallocate};

static TEST_SERIAL: Mutex<()> = Mutex::new(());

#[test]
fn bucket_free_list_round_trips_with_no_fresh_carve() {
  let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());

  let n = 100_000;
  let mut first_pass = Vec::with_capacity(n);
  for _ in 0..n {
    first_pass.push(allocate(42).unwrap());
  }
  // Free in the reverse of allocation order (LIFO relative to allocation),
  // leaving the owner free list as: head == first_pass[0] -> ... -> last.
  for &p in first_pass.iter().rev() {
    free(p);
  }

  let mut second_pass = Vec::with_capacity(n);
  for _ in 0..n {
    second_pass.push(allocate(42).unwrap());
  }

  // If the second pass had to carve any fresh memory from the region
  // provider, it would not retrace exactly the addresses just freed.
  assert_eq!(second_pass, first_pass, "replay must be served entirely from the bucket free list");

  for p in second_pass {
    free(p);
  }
}

#[test]
fn producer_consumer_leaves_no_leak() {
  let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());

  let (tx, rx) = std::sync::mpsc::sync_channel::<usize>(1024);
  let producer = thread::spawn(move || {
    let mut allocated_bytes = 0usize;
    for _ in 0..1_000_000 {
      let p = allocate(64).unwrap();
      allocated_bytes += query_size(p);
      tx.send(p as usize).expect("consumer should still be receiving");
    }
    allocated_bytes
  });

  let consumer = thread::spawn(move || {
    let mut freed_bytes = 0usize;
    while let Ok(addr) = rx.recv() {
      let p = addr as *mut u8;
      freed_bytes += query_size(p);
      free(p);
    }
    freed_bytes
  });

  let allocated_bytes = producer.join().unwrap();
  let freed_bytes = consumer.join().unwrap();
  assert_eq!(allocated_bytes, freed_bytes, "every allocated byte must be accounted for by a free");
}

#[test]
fn aligned_realloc_chain_preserves_alignment_and_zero_fill() {
  let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());

  let mut p = aligned_allocate(4096, 100).unwrap();
  for size in [200usize, 1_000, 50_000, 1_000_000] {
    p = reallocate(p, size).unwrap();
    assert_eq!(p as usize % 4096, 0, "every link in the chain must stay 4096-aligned");
  }
  free(p);
}

#[test]
fn large_block_round_trip_via_mmap() {
  let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());

  let size = 10 * 1024 * 1024;
  let p = allocate(size).unwrap();
  unsafe {
    std::ptr::write_bytes(p, 0xAB, size);
    for i in 0..size {
      assert_eq!(*p.add(i), 0xAB);
    }
  }
  free(p);
}

#[test]
fn calloc_round_trip_is_always_zero() {
  let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());

  for &size in &[1usize, 63, 65, 1024, 8 * 1024 * 1024] {
    for _ in 0..100 {
      let p = allocate_zeroed(1, size).unwrap();
      assert!(query_zero_filled(p));
      unsafe {
        for i in 0..size {
          assert_eq!(*p.add(i), 0, "byte {i} of a {size}-byte calloc must be zero");
        }
      }
      free(p);
    }
  }
}

#[test]
fn thread_reuse_adopts_retired_heap_free_list() {
  let _guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());

  let t1 = thread::spawn(|| {
    let mut ptrs = Vec::with_capacity(10_000);
    for _ in 0..10_000 {
      ptrs.push(allocate(200).unwrap() as usize);
    }
    for &addr in ptrs.iter().rev() {
      free(addr as *mut u8);
    }
    ptrs
  });
  let freed = t1.join().unwrap();

  let t2 = thread::spawn(|| allocate(200).unwrap() as usize);
  let reused = t2.join().unwrap();

  assert_eq!(reused, freed[0], "the next thread's first allocation should pop the head T1 left behind");
  free(reused as *mut u8);
}
