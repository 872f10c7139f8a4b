//! Block header encoding.
//!
//! Every `sbrk`-backed allocation is prefixed by a header of exactly `A`
//! bytes, where `A` is the minimum alignment. On a 64-bit target that is two
//! `usize` words, so the header needs no extra padding (`H == A`).
//!
//! The header is a tagged union of two shapes, discriminated by the low bits
//! of the first word:
//!
//! - *Real header*: `link` doubles as a home free-list pointer, a munmap
//!   size, or a next-free link (mutually exclusive by block state); `size`
//!   records the user's requested size.
//! - *Fake header*: used only when the user requested an alignment greater
//!   than `A`. `alignment` carries the requested alignment with bit 0 set;
//!   `offset` is the byte distance back to the real header.
//!
//! Rather than model this as a C-style union, the header is kept as a plain
//! two-word struct with accessor methods that interpret the bits — the
//! sticky bits are the tag for what would otherwise be an enum, avoiding a
//! discriminant word this layout has no room for.

use std::mem;
use std::ptr;

/// Minimum (and header) alignment in bytes. The strictest common scalar
/// alignment on all supported targets.
pub const ALIGN: usize = 16;

/// Header size in bytes. Always equal to [`ALIGN`] by construction.
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

// Sticky bits, packed into the low bits of the real header's `link` word
// (bits 1, 2) and the fake header's `alignment` word (bit 0).
const FAKE_BIT: usize = 1 << 0;
const ZERO_FILLED_BIT: usize = 1 << 1;
const MAPPED_BIT: usize = 1 << 2;
const STICKY_MASK: usize = FAKE_BIT | ZERO_FILLED_BIT | MAPPED_BIT;

/// Two-word block header, exactly [`ALIGN`] bytes.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Header {
  word0: usize,
  word1: usize,
}

const _: () = assert!(mem::size_of::<Header>() == ALIGN, "header size must equal minimum alignment");

impl Header {
  /// Returns the header immediately preceding the user address `user`.
  ///
  /// # Safety
  /// `user` must point `HEADER_SIZE` bytes past a valid header.
  #[inline]
  pub unsafe fn from_user_ptr(user: *mut u8) -> *mut Header {
    unsafe { user.sub(HEADER_SIZE) as *mut Header }
  }

  /// Returns the user address for a header at `header`.
  #[inline]
  pub fn user_ptr(header: *mut Header) -> *mut u8 {
    (header as usize + HEADER_SIZE) as *mut u8
  }

  // ---- real header view --------------------------------------------------

  #[inline]
  pub unsafe fn is_fake(header: *const Header) -> bool {
    unsafe { (*header).word0 & FAKE_BIT != 0 }
  }

  #[inline]
  pub unsafe fn is_zero_filled(header: *const Header) -> bool {
    unsafe { (*header).word0 & ZERO_FILLED_BIT != 0 }
  }

  #[inline]
  pub unsafe fn is_mapped(header: *const Header) -> bool {
    unsafe { (*header).word0 & MAPPED_BIT != 0 }
  }

  #[inline]
  pub unsafe fn set_zero_filled(header: *mut Header, value: bool) {
    unsafe {
      if value {
        (*header).word0 |= ZERO_FILLED_BIT;
      } else {
        (*header).word0 &= !ZERO_FILLED_BIT;
      }
    }
  }

  /// Reads the real header's `link` word with sticky bits cleared. Valid
  /// when the block is not a fake header (i.e. used as home pointer, mmap
  /// size, or next-free link, depending on block state).
  #[inline]
  pub unsafe fn link(header: *const Header) -> usize {
    unsafe { (*header).word0 & !STICKY_MASK }
  }

  #[inline]
  pub unsafe fn set_link(header: *mut Header, link: usize) {
    unsafe {
      let sticky = (*header).word0 & STICKY_MASK;
      (*header).word0 = (link & !STICKY_MASK) | sticky;
    }
  }

  /// Sets the real header's `link` word to `link`, clearing all sticky bits.
  #[inline]
  pub unsafe fn set_link_clear_sticky(header: *mut Header, link: usize) {
    unsafe { (*header).word0 = link & !STICKY_MASK; }
  }

  #[inline]
  pub unsafe fn set_mapped(header: *mut Header, mapped_size: usize) {
    unsafe { (*header).word0 = (mapped_size & !STICKY_MASK) | MAPPED_BIT; }
  }

  /// The recorded mmap size (only valid when [`Header::is_mapped`]).
  #[inline]
  pub unsafe fn mapped_size(header: *const Header) -> usize {
    unsafe { (*header).word0 & !STICKY_MASK }
  }

  #[inline]
  pub unsafe fn size(header: *const Header) -> usize {
    unsafe { (*header).word1 }
  }

  #[inline]
  pub unsafe fn set_size(header: *mut Header, size: usize) {
    unsafe { (*header).word1 = size; }
  }

  // ---- fake header view ---------------------------------------------------

  /// Writes a fake header at `fake`, pointing `offset` bytes back to the
  /// real header, recording `alignment` (must be a power of two > [`ALIGN`]).
  #[inline]
  pub unsafe fn write_fake(fake: *mut Header, alignment: usize, offset: usize) {
    unsafe {
      (*fake).word0 = alignment | FAKE_BIT;
      (*fake).word1 = offset;
    }
  }

  #[inline]
  pub unsafe fn fake_alignment(fake: *const Header) -> usize {
    unsafe { (*fake).word0 & !FAKE_BIT }
  }

  #[inline]
  pub unsafe fn fake_offset(fake: *const Header) -> usize {
    unsafe { (*fake).word1 }
  }

  /// Given a user pointer, walks back through an optional fake header to
  /// find the real header.
  ///
  /// # Safety
  /// `user` must be a pointer previously returned by this allocator.
  pub unsafe fn real_header_for(user: *mut u8) -> *mut Header {
    unsafe {
      let maybe_fake = Self::from_user_ptr(user);
      if Self::is_fake(maybe_fake) {
        let offset = Self::fake_offset(maybe_fake);
        (maybe_fake as usize - offset) as *mut Header
      } else {
        maybe_fake
      }
    }
  }
}

/// Interprets `header`'s `link` word as the next pointer in a free-list
/// chain (valid only while the block is on a free list).
#[inline]
pub unsafe fn next_free(header: *const Header) -> *mut Header {
  unsafe { Header::link(header) as *mut Header }
}

#[inline]
pub unsafe fn set_next_free(header: *mut Header, next: *mut Header) {
  unsafe { Header::set_link_clear_sticky(header, next as usize); }
}

#[inline]
pub fn null_header() -> *mut Header {
  ptr::null_mut()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn make_header() -> Header {
    Header { word0: 0, word1: 0 }
  }

  #[test]
  fn header_is_minimum_alignment_sized() {
    assert_eq!(mem::size_of::<Header>(), ALIGN);
  }

  #[test]
  fn sticky_bits_are_independent() {
    let mut h = make_header();
    let hp = &mut h as *mut Header;
    unsafe {
      assert!(!Header::is_zero_filled(hp));
      assert!(!Header::is_mapped(hp));
      assert!(!Header::is_fake(hp));

      Header::set_zero_filled(hp, true);
      assert!(Header::is_zero_filled(hp));
      assert!(!Header::is_mapped(hp));

      Header::set_mapped(hp, 4096);
      assert!(Header::is_mapped(hp));
      assert_eq!(Header::mapped_size(hp), 4096);
    }
  }

  #[test]
  fn link_round_trips_through_sticky_bits() {
    let mut h = make_header();
    let hp = &mut h as *mut Header;
    unsafe {
      Header::set_zero_filled(hp, true);
      Header::set_link(hp, 0xdead_0000);
      assert_eq!(Header::link(hp), 0xdead_0000);
      assert!(Header::is_zero_filled(hp));
    }
  }

  #[test]
  fn fake_header_round_trip() {
    let mut h = make_header();
    let hp = &mut h as *mut Header;
    unsafe {
      Header::write_fake(hp, 4096 | 1, 32);
      assert!(Header::is_fake(hp));
      assert_eq!(Header::fake_alignment(hp), 4096);
      assert_eq!(Header::fake_offset(hp), 32);
    }
  }
}
