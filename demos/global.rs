//! Uses [`LockedHeap`] as the global allocator of this program, backed by
//! a static arena.

use std::{
    alloc::{GlobalAlloc, Layout},
    sync::Once,
    thread,
};

use kmemalloc::LockedHeap;

const ARENA_SIZE: usize = 1 << 20;

#[repr(align(16))]
struct Arena([u8; ARENA_SIZE]);

static mut ARENA: Arena = Arena([0; ARENA_SIZE]);

static HEAP: LockedHeap = LockedHeap::empty();
static INIT: Once = Once::new();

/// Creates the heap on first use: the runtime allocates before `main`.
struct OnDemand;

impl OnDemand {
    fn heap(&self) -> &LockedHeap {
        INIT.call_once(|| unsafe {
            let arena = &raw mut ARENA;
            if HEAP.init(arena.cast(), ARENA_SIZE).is_err() {
                std::process::abort();
            }
        });
        &HEAP
    }
}

unsafe impl GlobalAlloc for OnDemand {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        unsafe { GlobalAlloc::alloc(self.heap(), layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { GlobalAlloc::dealloc(self.heap(), ptr, layout) }
    }
}

#[global_allocator]
static ALLOCATOR: OnDemand = OnDemand;

fn main() {

    // Box example
    let val_box = Box::new(22);
    println!("Box Value: {}, At: {:p}", val_box, val_box);

    // Vec example
    let mut v = Vec::new();
    for i in 0..5 {
        v.push(i * 10);
        println!("Added {}; Capacity: {}; At: {:p}", v[i], v.capacity(), v.as_ptr());
    }

    // String example
    let msg = String::from("Heap Testing");
    println!("\nString '{}' - At: {:p}", msg, msg.as_ptr());

    // Merge example
    let a = Box::new([0u8; 64]);
    let b = Box::new([0u8; 64]);
    let ptr_a = a.as_ptr();

    drop(a);
    drop(b);

    let c = Box::new([0u8; 128]);
    let ptr_c = c.as_ptr();

    if ptr_a == ptr_c {
        println!("Correctly reused at {:p}", ptr_c);
    } else {
        println!("Not reused. A was at {:p} and C is at {:p}", ptr_a, ptr_c);
    }

    // Thread example test
    let t1 = thread::spawn(|| {
        let _ = Box::new(222);
    });

    let t2 = thread::spawn(|| {
        let _ = Box::new(222);
    });

    t1.join().unwrap();
    t2.join().unwrap();

    if let Ok(stats) = ALLOCATOR.heap().with_heap(|heap| heap.stats()) {
        println!("{stats:?}");
    }
}
