//! Boots the whole memory core on a host mapping and walks through unit
//! allocation, partial frees and coalescing.

use kmemalloc::{HostArena, Kernel, MemoryConfig, UNIT_SIZE};

fn print_extents(kernel: &Kernel) {
    let physmem = kernel.physmem();
    for extent in physmem.extents() {
        let range = physmem.extent_range(&extent);
        println!(
            "  {:#x}..{:#x} {:?} ({} units)",
            range.start, range.end, extent.state, extent.length
        );
    }
}

fn main() {
    let arena = HostArena::new(4 << 20).expect("host mapping");
    let config = MemoryConfig::new().with_heap_size(512 << 10);
    let mut kernel = unsafe { Kernel::boot(arena.extent(), config) }.expect("boot");

    println!(
        "{} units of {} bytes at {:#x}",
        kernel.physmem().total_units(),
        UNIT_SIZE,
        kernel.physmem().base()
    );

    let region = kernel.allocate_region(5).expect("region");
    let unit = kernel.allocate_unit().expect("unit");
    println!("Region at {region:#x}, unit at {unit:#x}");

    let big = kernel.allocate_region(10).expect("region");
    kernel.free_unit(big + 5 * UNIT_SIZE).expect("free");
    println!("After freeing the 6th unit of a 10 unit region:");
    print_extents(&kernel);

    let released = kernel.free_region(big, 10).expect("free");
    println!("Released {released} more units:");
    print_extents(&kernel);

    if let Err(err) = kernel.free_unit(big) {
        println!("Second free refused: {err}");
    }

    kernel.free_region(region, 5).expect("free");
    kernel.free_unit(unit).expect("free");
    println!("All free again:");
    print_extents(&kernel);
    println!("{:?}", kernel.heap().stats());
}
