use std::cell::Cell;

use tenure::{Generation, Heap, HeapConfig};

fn main() {
    let config = HeapConfig {
        verbose: true,
        ..Default::default()
    };
    let mut heap = Heap::with_config(config).unwrap();
    // value in word 1, next in word 2
    let node = heap.descriptor(3, &[0b100]);

    let head = Cell::new(None);
    heap.rooted(&[&head], |heap| {
        for value in 0..10_000 {
            let cell = heap.allocate(node);
            heap.write_word(cell, 1, value);
            heap.write_ref(cell, 2, head.get());
            head.set(Some(cell));
        }
        heap.collect_minor();
        heap.collect_minor();
        assert_eq!(heap.generation_of(head.get().unwrap()), Generation::Old);

        let young = heap.allocate(node);
        heap.write_word(young, 1, 42);
        heap.write_ref(head.get().unwrap(), 2, Some(young));
        heap.collect_major();

        let next = heap.read_ref(head.get().unwrap(), 2).unwrap();
        assert_eq!(heap.read_word(next, 1), 42);
        println!("{}", heap.statistics());
    });

    heap.collect_major();
    println!("{}", heap.statistics());
}
