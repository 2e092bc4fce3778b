#![cfg(all(test, feature = "loom"))]

use crate::config::QueueConfig;
use crate::frame;
use crate::gate::{Admission, BackpressureGate};
use crate::region::HeapRegion;
use crate::ring::SlotRing;
use crate::sync::thread;
use loom::sync::Arc;

fn ring(slot_size: u64, capacity: u64) -> (Arc<HeapRegion>, Arc<SlotRing>) {
    let config = QueueConfig::new(slot_size, capacity);
    let owner = Arc::new(HeapRegion::new_zeroed(
        config.required_region_size().unwrap(),
    ));
    let ring = unsafe { SlotRing::init(owner.region(), &config) }.unwrap();
    (owner, Arc::new(ring))
}

fn push(ring: &SlotRing, payload: &[u8]) -> Option<bool> {
    let pos = ring.try_reserve_write()?;
    unsafe { frame::encode(ring.slot_mut(pos), payload) };
    Some(ring.publish(pos))
}

fn pop(ring: &SlotRing) -> Option<u8> {
    if !ring.has_readable() {
        return None;
    }
    let mut buf = [0u8; 1];
    let decoded = unsafe { frame::decode(ring.slot(ring.read_pos()), &mut buf) };
    ring.advance_read();
    assert_eq!(decoded.len, 1);
    Some(buf[0])
}

#[test]
fn loom_spsc_fifo() {
    loom::model(|| {
        let (owner, ring) = ring(8, 2);

        let producer = {
            let ring = ring.clone();
            let owner = owner.clone();
            thread::spawn(move || {
                let _keep = owner;
                for i in 0..3u8 {
                    while push(&ring, &[i]).is_none() {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut received = Vec::new();
        while received.len() < 3 {
            match pop(&ring) {
                Some(v) => received.push(v),
                None => thread::yield_now(),
            }
        }

        producer.join().unwrap();
        assert_eq!(received, [0, 1, 2]);
    });
}

#[test]
fn loom_producers_never_share_a_position() {
    loom::model(|| {
        let (owner, ring) = ring(8, 2);

        let spawn = |value: u8| {
            let ring = ring.clone();
            let owner = owner.clone();
            thread::spawn(move || {
                let _keep = owner;
                push(&ring, &[value]).is_some()
            })
        };
        let t1 = spawn(1);
        let t2 = spawn(2);
        assert!(t1.join().unwrap());
        assert!(t2.join().unwrap());

        let mut got = [pop(&ring).unwrap(), pop(&ring).unwrap()];
        got.sort();
        assert_eq!(got, [1, 2]);
        assert!(pop(&ring).is_none());
    });
}

#[test]
fn loom_full_ring_rejects_and_counts() {
    loom::model(|| {
        let (owner, ring) = ring(8, 1);
        let gate = Arc::new(BackpressureGate::new());

        let spawn = || {
            let ring = ring.clone();
            let gate = gate.clone();
            let owner = owner.clone();
            thread::spawn(move || {
                let _keep = owner;
                match gate.admit(&ring) {
                    Admission::Admitted(pos) => {
                        ring.publish(pos);
                        true
                    }
                    Admission::Rejected => false,
                }
            })
        };
        let t1 = spawn();
        let t2 = spawn();
        let admitted = [t1.join().unwrap(), t2.join().unwrap()];

        assert_eq!(admitted.iter().filter(|a| **a).count(), 1);
        assert_eq!(ring.drop_count(), 1);
        assert_eq!(ring.len(), 1);
    });
}

#[test]
fn loom_empty_edge_is_never_missed() {
    loom::model(|| {
        let (owner, ring) = ring(8, 2);
        assert_eq!(push(&ring, &[7]), Some(true));

        let consumer = {
            let ring = ring.clone();
            let owner = owner.clone();
            thread::spawn(move || {
                let _keep = owner;
                let first = pop(&ring);
                // Would the consumer go to sleep now?
                (first, ring.has_readable())
            })
        };

        let signaled = push(&ring, &[8]).unwrap();
        let (first, readable_after) = consumer.join().unwrap();
        assert_eq!(first, Some(7));
        // Either the producer saw the ring empty and signaled, or the consumer
        // saw the new message before deciding to block.
        assert!(signaled || readable_after);
    });
}
