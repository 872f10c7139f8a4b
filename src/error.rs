//! Fatal diagnostics and the recoverable error taxonomy.
//!
//! Grounded on `examples/original_source/llheap.cc`'s `noMemory()`: a fixed
//! diagnostic written with the raw `write(2)` syscall (never `println!`/
//! `format!`, which could themselves allocate and recurse into a heap that
//! is already known to be broken), followed by `abort()`.

use std::sync::atomic::{AtomicI32, Ordering};

/// Recoverable error conditions surfaced from fallible entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  /// A size/alignment computation would overflow `usize`.
  Overflow,
  /// `configure()` was passed an option it does not recognize.
  UnknownOption,
}

impl std::fmt::Display for AllocError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      AllocError::Overflow => write!(f, "size computation overflowed"),
      AllocError::UnknownOption => write!(f, "unknown configure() option"),
    }
  }
}

impl std::error::Error for AllocError {}

/// File descriptor fatal diagnostics and `print_stats` are written to.
/// Defaults to `STDERR_FILENO`, overridable via `api::set_stats_fd`.
pub static STATS_FD: AtomicI32 = AtomicI32::new(libc::STDERR_FILENO);

/// Writes `msg` to [`STATS_FD`] with the raw `write(2)` syscall and aborts
/// the process. Never returns. Must not allocate.
pub fn abort_with(msg: &str) -> ! {
  let fd = STATS_FD.load(Ordering::Relaxed);
  unsafe {
    libc::write(fd, msg.as_ptr() as *const libc::c_void, msg.len());
    libc::write(fd, b"\n".as_ptr() as *const libc::c_void, 1);
  }
  std::process::abort();
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_messages_are_nonempty() {
    assert!(!AllocError::Overflow.to_string().is_empty());
    assert!(!AllocError::UnknownOption.to_string().is_empty());
  }
}
