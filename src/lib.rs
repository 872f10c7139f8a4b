//! # rallocator - A Multi-Threaded Bucketed Memory Allocator
//!
//! This crate provides a general-purpose, high-performance, multi-threaded
//! memory allocator that can stand in for the system `malloc`/`free` family,
//! either through its own entry points or through [`Rallocator`], a
//! `#[global_allocator]`-compatible implementation of [`std::alloc::
//! GlobalAlloc`].
//!
//! ## Overview
//!
//! The allocator is organized as three layers, leaves first:
//!
//! ```text
//!   Layered design:
//!
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                      Heap Manager (per thread)                    │
//!   │   B free lists (one per bucket) + private bump reserve             │
//!   └───────────────────────────┬────────────────────────────────────────┘
//!                               │ manager_extend() tops up from
//!                               ▼
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                      Heap Master (singleton)                      │
//!   │   pool of heap managers, free-heap stack, configuration            │
//!   └───────────────────────────┬────────────────────────────────────────┘
//!                               │ carve() extends the program break
//!                               ▼
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                         Region Provider                           │
//!   │                      one growing sbrk-backed slab                 │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A request is classified into one of ~91 size buckets via an `O(1)`
//! lookup table, served from the owning thread's free list, its return list
//! (frees that arrived from other threads), or freshly carved from the
//! bump reserve. Requests at or above the mmap crossover bypass bucketing
//! entirely and are served by `mmap`/`munmap` directly.
//!
//! ## Crate Structure
//!
//! ```text
//!   rallocator
//!   ├── align         - Alignment macros (align!, align_to!)
//!   ├── header        - Two-word block header, sticky bits
//!   ├── bucket        - Bucket size table + fast-lookup table
//!   ├── spinlock      - Exponential back-off spinlock
//!   ├── region        - Program-break region provider
//!   ├── heap_manager  - Per-thread free lists + bump reserve
//!   ├── heap_master   - Process-wide singleton
//!   ├── thread_heap   - Thread-local binding and cleanup
//!   ├── core_alloc    - allocate/free/resize/realloc/aligned_allocate
//!   ├── config        - Weak override points, configure() knobs
//!   ├── error         - Fatal diagnostics, AllocError
//!   ├── stats         - Counters, print_stats/print_stats_xml
//!   └── api           - Public entry points + GlobalAlloc
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rallocator::Rallocator;
//!
//! #[global_allocator]
//! static ALLOCATOR: Rallocator = Rallocator;
//!
//! fn main() {
//!     let mut v = Vec::with_capacity(1024);
//!     v.push(42u64);
//! }
//! ```
//!
//! Or drive the entry points directly:
//!
//! ```rust
//! let p = rallocator::allocate(128).unwrap();
//! assert_eq!(rallocator::query_size(p), 128);
//! rallocator::free(p);
//! ```
//!
//! ## Concurrency
//!
//! Each OS thread binds lazily to its own heap manager on first use. When a
//! thread exits, its heap is returned to a process-wide free stack and may
//! be adopted by a later thread, free blocks intact. A block freed by a
//! thread other than its owner is pushed onto that bucket's return list
//! under a short spinlock rather than the owner's local free list — the
//! owner drains the return list the next time its own free list runs dry.
//! No lock is ever held across a blocking syscall; the only syscalls made
//! under a lock are `sbrk` (region extension, under the extension lock) and
//! a handful of bookkeeping calls at heap-manager creation.
//!
//! ## Safety
//!
//! This crate is inherently unsafe: it manages raw memory and hand-rolled
//! synchronization below the level the borrow checker can reason about.
//! Unsafety is confined to `header`, `heap_manager`, and `core_alloc`;
//! `api` and `config` are safe wrappers.

pub mod align;
pub mod api;
pub mod bucket;
pub mod config;
pub mod core_alloc;
pub mod error;
pub mod header;
pub mod heap_manager;
pub mod heap_master;
pub mod region;
pub mod spinlock;
pub mod stats;
pub mod thread_heap;

pub use api::{
  aligned_allocate, aligned_allocate_array, aligned_allocate_zeroed, aligned_reallocate, aligned_resize, allocate, allocate_array,
  allocate_zeroed, clear_stats, configure, free, posix_aligned_realloc, posix_aligned_reallocarray, posix_realloc, posix_reallocarray,
  print_stats, print_stats_xml, query_alignment, query_remote, query_size, query_usable_size, query_zero_filled, reallocate,
  reallocate_array, resize, resize_array, set_stats_fd, Rallocator,
};
pub use config::ConfigOption;
pub use error::AllocError;
