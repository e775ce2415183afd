use std::{collections::HashMap, thread};

use segalloc::Segalloc;

// No logger here, records are emitted while the allocator lock is held.
#[global_allocator]
static ALLOCATOR: Segalloc = Segalloc::new();

fn main() {
    let boxed = Box::new([7u64; 4]);
    println!("Boxed array {boxed:?} at {:p}", boxed.as_ptr());

    // Pushing one byte at a time goes through realloc over and over.
    let mut text = String::new();
    for word in ["segregated", "free", "lists", "with", "boundary", "tags"] {
        text.push_str(word);
        text.push(' ');
        println!("{:>3} bytes at {:p}", text.capacity(), text.as_ptr());
    }

    let handles: Vec<_> = (0..4)
        .map(|id| {
            thread::spawn(move || {
                let squares: HashMap<u32, u32> = (0..1000).map(|n| (n, n * n)).collect();
                println!("Thread {id} built {} entries", squares.len());
                squares[&(id * 10)]
            })
        })
        .collect();

    for handle in handles {
        println!("Joined with {}", handle.join().unwrap());
    }

    let large: Vec<u8> = vec![1; 1 << 20];
    println!("Large allocation of {} bytes at {:p}", large.len(), large.as_ptr());
}
