//! Drives a [`Heap`] by hand over memory mapped from the host and prints
//! what happens to its blocks.

use kmemalloc::{Heap, HostArena};

fn log_alloc(heap: &Heap, size: usize, addr: *mut u8) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
    println!("Heap top is now {:#x}", heap.top());
}

fn print_regions(heap: &Heap) {
    for region in heap.regions() {
        println!(
            "  [{:#x}] {:>5} bytes {}",
            region.addr,
            region.limit,
            if region.used { "used" } else { "free" }
        );
    }
}

fn main() {
    let arena = HostArena::new(0x1000).expect("host mapping");
    let mut heap = unsafe { Heap::create(arena.as_ptr(), arena.len()) }.expect("heap");
    println!("{heap:?}");

    let addr1 = heap.alloc(size_of::<u64>()).expect("alloc");
    log_alloc(&heap, size_of::<u64>(), addr1.as_ptr());

    let addr2 = heap.alloc(8).expect("alloc");
    log_alloc(&heap, 8, addr2.as_ptr());

    let addr3 = heap.alloc(100).expect("alloc");
    log_alloc(&heap, 100, addr3.as_ptr());

    println!("Blocks:");
    print_regions(&heap);

    heap.free(addr2).expect("free");
    println!("After freeing the second block:");
    print_regions(&heap);

    // Freeing the same pointer twice is reported, not fatal.
    if let Err(err) = heap.free(addr2) {
        println!("Second free refused: {err}");
    }

    heap.free(addr1).expect("free");
    heap.free(addr3).expect("free");
    println!("After freeing everything: {:?}", heap.stats());
}
