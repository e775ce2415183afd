use segalloc::{BlockPtr, MemRegion, SegregatedAllocator};

fn print_alloc(ptr: BlockPtr, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this block: {}", ptr.offset());
}

fn main() {
    env_logger::init();

    let mut allocator = SegregatedAllocator::new(MemRegion::new());

    let sizes = [1, 1024, 4096];
    let mut blocks = Vec::new();

    for size in sizes {
        let ptr = allocator.allocate(size).unwrap();
        print_alloc(ptr, size);
        blocks.push(ptr);
    }

    println!("{:?}", allocator.check_heap().unwrap());

    println!("Deallocating everything...");
    for ptr in blocks {
        allocator.free(ptr);
    }

    println!("{:?}", allocator.check_heap().unwrap());

    println!("\nNow let's try some reallocs");
    let mut ptr = allocator.allocate(10).unwrap();
    for (i, byte) in allocator.payload_mut(ptr)[..10].iter_mut().enumerate() {
        *byte = i as u8;
    }

    for size in [16, 100, 1000, 10_000, 40] {
        ptr = allocator.realloc(ptr, size).unwrap();
        println!(
            "Reallocated to {size} bytes at {}, first 10 bytes = {:?}",
            ptr.offset(),
            &allocator.payload(ptr)[..10]
        );
    }

    allocator.free(ptr);
    println!("Heap size: {} bytes", allocator.heap_size());
    println!("{:?}", allocator.check_heap().unwrap());
}
