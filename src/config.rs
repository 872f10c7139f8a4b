//! Weak override points and the two `configure()` knobs.
//!
//! These are plain `pub fn` defaults rather than trait methods: a host crate
//! wanting different policy simply calls `heap_master::master().set_*` after
//! boot, the same way `original_source/llheap.cc` treats `__DEFAULT_HEAP_
//! EXPANSION__`/`__DEFAULT_MMAP_START__` as overridable-by-environment
//! constants rather than compiled-in literals.

use crate::header::HEADER_SIZE;

/// Default amount (bytes) by which the shared region is extended when a
/// heap manager's private reserve runs dry. A rounder figure than
/// `original_source`'s literal `10*1024*1024`.
pub const DEFAULT_EXTEND_AMOUNT: usize = 8 * 1024 * 1024;

/// Default mmap crossover: requests at or above this size bypass the bucket
/// machinery entirely and go straight to `mmap`/`munmap`.
pub const DEFAULT_MMAP_START: usize = 8 * 1024 * 1024 + HEADER_SIZE;

/// Expected steady-state unfreed byte count, used only to size the initial
/// statistics display; has no effect on allocation behavior.
pub const DEFAULT_EXPECTED_UNFREED: usize = 0;

pub fn default_extend_amount() -> usize {
  DEFAULT_EXTEND_AMOUNT
}

pub fn default_mmap_start() -> usize {
  DEFAULT_MMAP_START
}

pub fn expected_unfreed() -> usize {
  DEFAULT_EXPECTED_UNFREED
}

/// Policy for a zero-byte allocation request: returns a unique, non-null
/// pointer to a minimum-size block rather than `None`. This keeps `free`
/// branch-free on the null check and keeps the unfreed-byte counters
/// consistent, at the cost of one wasted minimum block per zero-size
/// request.
pub const ZERO_SIZE_RETURNS_MINIMUM_BLOCK: bool = true;

/// The knobs exposed through `api::configure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOption {
  /// Set the heap-extension amount, rounded up to a whole page.
  ExtendAmount(usize),
  /// Set the mmap crossover, clipped to `[page_size, largest_bucket]`.
  MmapStart(usize),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn header_and_align_agree() {
    assert_eq!(HEADER_SIZE, crate::header::ALIGN);
  }

  #[test]
  fn mmap_start_exceeds_extend_floor() {
    assert!(DEFAULT_MMAP_START > HEADER_SIZE);
  }
}
