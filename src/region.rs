//! The region provider: a single shared region grown by extending the
//! program break upward in aligned increments.
//!
//! Exposes one operation, [`Region::carve`], which atomically carves and
//! returns `n` aligned bytes from the region's high end, extending the
//! region first if necessary. Grounded on `examples/original_source/
//! llheap.cc`'s `HeapMaster` fields (`heapBegin`, `heapEnd`,
//! `heapRemaining`) and on the same `sbrk`-growth idiom this crate used for
//! its earlier single-threaded bump allocator.

use libc::{intptr_t, sbrk};

use crate::align_to;
use crate::header::ALIGN;
use crate::spinlock::Spinlock;

/// Thrown when the operating system refuses to extend the program break.
#[derive(Debug)]
pub struct OutOfMemory {
  pub requested: usize,
}

pub struct Region {
  ext_lock: Spinlock,
  begin: usize,
  high_water: usize,
  remaining: usize,
}

impl Region {
  /// Creates a region starting at the current program break, rounded up to
  /// `ALIGN`.
  pub fn new() -> Self {
    unsafe {
      let end = sbrk(0) as usize;
      let aligned = align_to!(end, ALIGN);
      let delta = aligned - end;
      let base = if delta != 0 {
        sbrk(delta as intptr_t) as usize;
        aligned
      } else {
        end
      };
      Region {
        ext_lock: Spinlock::new(),
        begin: base,
        high_water: base,
        remaining: 0,
      }
    }
  }

  #[inline]
  pub fn begin(&self) -> usize {
    self.begin
  }

  #[inline]
  pub fn high_water(&self) -> usize {
    self.high_water
  }

  /// Carves `size` aligned bytes from the high end of the region, extending
  /// the program break by `max(size, extend_amount)` (rounded up to `ALIGN`)
  /// first if the current slab does not have enough room left.
  ///
  /// `size` must already be a multiple of `ALIGN`.
  pub fn carve(&mut self, size: usize, extend_amount: usize) -> Result<usize, OutOfMemory> {
    debug_assert_eq!(size % ALIGN, 0);

    self.ext_lock.acquire();
    let result = self.carve_locked(size, extend_amount);
    self.ext_lock.release();
    result
  }

  fn carve_locked(&mut self, size: usize, extend_amount: usize) -> Result<usize, OutOfMemory> {
    if self.remaining < size {
      let grow = align_to!(size.max(extend_amount), ALIGN);
      let raw = unsafe { sbrk(grow as intptr_t) };
      if raw as usize == usize::MAX {
        return Err(OutOfMemory { requested: grow });
      }
      // sbrk returns the old break; our high_water should already track it,
      // but resynchronize defensively in case something outside this region
      // moved the break (it should not, in a well-behaved process).
      self.high_water = raw as usize;
      self.remaining = grow;
    }

    let block = self.high_water;
    self.high_water += size;
    self.remaining -= size;
    Ok(block)
  }
}

impl Default for Region {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn carve_returns_aligned_monotonic_addresses() {
    let mut region = Region::new();
    let a = region.carve(64, 4096).unwrap();
    let b = region.carve(64, 4096).unwrap();
    assert_eq!(a % ALIGN, 0);
    assert_eq!(b % ALIGN, 0);
    assert!(b >= a + 64);
  }

  #[test]
  fn carve_extends_when_remaining_insufficient() {
    let mut region = Region::new();
    let extend = 128;
    let a = region.carve(100, extend).unwrap();
    // Remaining after first carve is extend-100 == 28, next carve of 100
    // must trigger another extension rather than underflow.
    let b = region.carve(100, extend).unwrap();
    assert!(b >= a);
  }
}
