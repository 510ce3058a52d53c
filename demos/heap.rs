use std::io::Read;

use tagalloc::{Heap, HeapConfig, VecMemory, print_alloc};

/// Waits until the user presses ENTER.
/// Useful when you want to follow how each step changes the block layout.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints every block between the prologue and the epilogue.
fn print_blocks(
  heap: &Heap,
  label: &str,
) {
  println!("[{}] {}", label, heap.stats());
  for block in heap.blocks() {
    println!(
      "    {} size = {:5} {}",
      block.addr,
      block.size,
      if block.allocated { "allocated" } else { "free" }
    );
  }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let mut heap = Heap::init(VecMemory::default(), HeapConfig::default())?;

  // Prologue and epilogue only.
  print_blocks(&heap, "start");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate 100 bytes. The arena grows by one chunk and the block is
  //    split off its front.
  // --------------------------------------------------------------------
  let first = heap.allocate(100)?;
  println!("\n[1] Allocate 100 bytes");
  print_alloc(&heap, 100, first);
  heap.payload_mut(first)?[..4].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());
  print_blocks(&heap, "1");

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate 200 bytes right behind it.
  // --------------------------------------------------------------------
  let second = heap.allocate(200)?;
  println!("\n[2] Allocate 200 bytes");
  print_alloc(&heap, 200, second);
  print_blocks(&heap, "2");

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Free the first block and allocate 90 bytes. First fit finds the
  //    hole left by the first block.
  // --------------------------------------------------------------------
  heap.deallocate(first)?;
  let third = heap.allocate(90)?;
  println!("\n[3] Free first block, allocate 90 bytes");
  print_alloc(&heap, 90, third);
  println!(
    "[3] third == first? {}",
    if third == first {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Grow the second block. The free tail after it absorbs the growth,
  //    so the address does not change.
  // --------------------------------------------------------------------
  let grown = heap.resize(Some(second), 1000)?;
  println!("\n[4] Resize second block to 1000 bytes -> {:?}", grown);
  print_blocks(&heap, "4");

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Allocate a large block to observe arena growth.
  // --------------------------------------------------------------------
  let before = heap.arena_size();
  let big = heap.allocate(64 * 1024)?;
  println!("\n[5] Allocate large 64 KiB block");
  print_alloc(&heap, 64 * 1024, big);
  println!("[5] arena grew from {:#x} to {:#x}", before, heap.arena_size());

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) Free everything. Coalescing leaves a single free block.
  // --------------------------------------------------------------------
  heap.deallocate(third)?;
  if let Some(grown) = grown {
    heap.deallocate(grown)?;
  }
  heap.deallocate(big)?;
  print_blocks(&heap, "6");

  println!("\n[7] End of example. The arena is never shrunk; it is dropped with the heap.");
  Ok(())
}
