// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::buffer::EventBuffer;
use crate::tests::sample_event;
use std::sync::Arc;
use std::thread;

#[test]
fn test_append_returns_size() {
    let buffer = EventBuffer::new(3);
    assert_eq!(buffer.append(sample_event("a")), 1);
    assert_eq!(buffer.append(sample_event("b")), 2);
    assert_eq!(buffer.len(), 2);
    assert!(!buffer.is_full(2));
    assert!(buffer.is_full(3));
}

#[test]
fn test_flush_and_clear_preserves_order() {
    let buffer = EventBuffer::new(10);
    for id in ["a", "b", "c"] {
        buffer.append(sample_event(id));
    }

    let batch = buffer.flush_and_clear();
    let ids: Vec<_> = batch.iter().map(|e| e.event_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(buffer.is_empty());

    // Second flush on an empty buffer yields nothing
    assert!(buffer.flush_and_clear().is_empty());
}

#[test]
fn test_append_past_capacity_is_advisory() {
    let buffer = EventBuffer::new(2);
    buffer.append(sample_event("a"));
    buffer.append(sample_event("b"));
    // Burst before the triggered flush runs
    assert_eq!(buffer.append(sample_event("c")), 3);
    assert_eq!(buffer.flush_and_clear().len(), 3);
}

#[test]
fn test_zero_capacity_is_clamped() {
    let buffer = EventBuffer::new(0);
    assert_eq!(buffer.capacity(), 1);
    let size = buffer.append(sample_event("a"));
    assert!(buffer.is_full(size));
}

#[test]
fn test_concurrent_appends_keep_exact_count() {
    let buffer = Arc::new(EventBuffer::new(usize::MAX));
    let per_worker = 500;

    let workers: Vec<_> = (0..2)
        .map(|w| {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for i in 0..per_worker {
                    buffer.append(sample_event(&format!("w{}-{}", w, i)));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(buffer.len(), 2 * per_worker);
    assert_eq!(buffer.flush_and_clear().len(), 2 * per_worker);
}

#[test]
fn test_concurrent_append_and_flush_never_loses_events() {
    let buffer = Arc::new(EventBuffer::new(usize::MAX));
    let total = 2000;

    let producer = {
        let buffer = buffer.clone();
        thread::spawn(move || {
            for i in 0..total {
                buffer.append(sample_event(&i.to_string()));
            }
        })
    };

    let mut flushed = 0;
    while !producer.is_finished() {
        flushed += buffer.flush_and_clear().len();
    }
    producer.join().unwrap();
    flushed += buffer.flush_and_clear().len();

    assert_eq!(flushed, total);
    assert!(buffer.is_empty());
}
