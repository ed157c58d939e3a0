//! Installs `LockedAlloc` as the global allocator, so every `Box`, `Vec` and
//! `String` below lives in a segregated-fit heap.

use segalloc::LockedAlloc;
use std::thread;

#[global_allocator]
static ALLOCATOR: LockedAlloc = LockedAlloc::new();

fn report(label: &str) {
    match ALLOCATOR.check() {
        Some(Ok(stats)) => println!(
            "[{label}] heap={} bytes, blocks={}, free blocks={}, largest free={}",
            stats.heap_size, stats.blocks, stats.free_blocks, stats.largest_free
        ),
        Some(Err(err)) => println!("[{label}] heap is corrupted: {err}"),
        None => println!("[{label}] heap not created yet"),
    }
}

fn main() {
    let boxed = Box::new(22u64);
    println!("Box {} at {:p}", boxed, boxed);
    report("after box");

    // Growing a vector exercises resize: in place while the next block is free.
    let mut numbers = Vec::new();
    let mut last = numbers.as_ptr();
    for i in 0..64u32 {
        numbers.push(i);
        if numbers.as_ptr() != last {
            println!("capacity {:>3} at {:p}", numbers.capacity(), numbers.as_ptr());
            last = numbers.as_ptr();
        }
    }
    report("after vec");

    // Two neighbours freed one after the other merge into one block that a
    // request for both of them together can reuse.
    let a = Box::new([0u8; 64]);
    let b = Box::new([0u8; 64]);
    let ptr_a = a.as_ptr();
    drop(a);
    drop(b);

    let c = Box::new([0u8; 128]);
    println!("a was at {:p}, c is at {:p}, reused: {}", ptr_a, c.as_ptr(), ptr_a == c.as_ptr());
    report("after merge");

    // Every call goes through the lock, so threads can share the heap.
    let workers: Vec<_> = (0..4)
        .map(|id| thread::spawn(move || (0..100).map(|i| format!("{id}-{i}")).collect::<Vec<_>>()))
        .collect();
    for worker in workers {
        let strings = worker.join().unwrap();
        println!("worker produced {} strings, last {:?}", strings.len(), strings.last());
    }
    report("after threads");
}
