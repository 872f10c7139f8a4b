use std::io::Read;

use libc::sbrk;
use rallocator::{aligned_allocate, allocate, allocate_zeroed, free, query_size, reallocate};

/// Waits until the user presses ENTER. Useful when you want to inspect
/// memory state with tools like `pmap`, `htop`, or `gdb` between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

unsafe fn print_program_break(label: &str) {
  println!("[{}] PID = {}, program break (sbrk(0)) = {:?}", label, std::process::id(), unsafe { sbrk(0) });
}

fn main() {
  unsafe {
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) A small bucketed allocation.
    // --------------------------------------------------------------------
    let small = allocate(42).unwrap();
    println!("\n[1] Allocated 42 bytes at {small:?}, recorded size = {}", query_size(small));
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Free it, then allocate the same size again: the free list should
    //    hand back the exact same address.
    // --------------------------------------------------------------------
    free(small);
    let reused = allocate(42).unwrap();
    println!("\n[2] reused == small? {}", if reused == small { "yes, served from the free list" } else { "no" });
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) An over-aligned allocation, using a fake header.
    // --------------------------------------------------------------------
    let aligned = aligned_allocate(4096, 100).unwrap();
    println!("\n[3] Allocated 100 bytes aligned to 4096 at {aligned:?} (addr % 4096 = {})", aligned as usize % 4096);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Grow it with reallocate, alignment must survive the move.
    // --------------------------------------------------------------------
    let grown = reallocate(aligned, 1_000_000).unwrap();
    println!("\n[4] Reallocated to 1,000,000 bytes at {grown:?} (addr % 4096 = {})", grown as usize % 4096);
    free(grown);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) A large allocation crosses the mmap threshold and changes the
    //    program break not at all (it bypasses sbrk entirely).
    // --------------------------------------------------------------------
    print_program_break("before large alloc");
    let big = allocate_zeroed(1, 10 * 1024 * 1024).unwrap();
    println!("\n[5] Allocated a zeroed 10 MiB block at {big:?}");
    print_program_break("after large alloc (unchanged: mmap, not sbrk)");
    free(big);

    println!("\n[6] End of tour. Process will exit and the OS will reclaim everything.");
  }
}
