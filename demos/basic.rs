use segalloc::MemAlloc;

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {} bytes of memory", size);
    println!("Received this address: {addr:?}");
}

fn main() {
    let mut heap = MemAlloc::new().expect("could not set up the heap");

    unsafe {
        let addr1 = heap.allocate(8).unwrap();
        log_alloc(addr1.as_ptr(), 8);

        let addr2 = heap.allocate(8).unwrap();
        log_alloc(addr2.as_ptr(), 8);

        let addr3 = heap.allocate(16).unwrap();
        log_alloc(addr3.as_ptr(), 16);

        heap.free(addr1);
        heap.free(addr2);

        // addr1 and addr2 were merged, so this fits where they were.
        let addr4 = heap.allocate(32).unwrap();
        log_alloc(addr4.as_ptr(), 32);
        println!("Reused freed space: {}", addr4 == addr1);

        // Grows in place when the next block is free.
        addr3.as_ptr().write_bytes(0xAB, 16);
        let addr5 = heap.resize(addr3, 256).unwrap();
        println!("Resized {:?} -> {:?}, first byte {:#x}", addr3, addr5, *addr5.as_ptr());

        heap.free(addr4);
        heap.free(addr5);
    }

    println!("{:?}", heap.check().expect("heap is corrupted"));
}
