//! Model-based checking of `ShmQueue` against a `VecDeque`.

use std::collections::VecDeque;

use shm_queue::{QueueError, ShmQueue};

/// Minimum slot size (length prefix plus one payload byte).
pub const MIN_SLOT_SIZE: u64 = 5;
/// Maximum slot size for fuzzing (keep small to hit truncation often).
pub const MAX_SLOT_SIZE: u64 = 40;
/// Maximum ring capacity for fuzzing (keep small to find edge cases faster).
pub const MAX_CAPACITY: u64 = 16;

/// Operations that can be performed on the queue.
#[derive(Clone, Debug)]
pub enum QueueOp {
    Push(Vec<u8>),
    /// Pop into a buffer of the given size.
    Pop(u8),
}

/// Execute a sequence of operations and verify invariants.
pub fn execute_and_verify(
    slot_size: u64,
    capacity: u64,
    ops: &[QueueOp],
) -> Result<(), String> {
    let queue = ShmQueue::open(slot_size, capacity).map_err(|e| e.to_string())?;
    let payload_capacity = (slot_size - 4) as usize;
    let mut expected: VecDeque<Vec<u8>> = VecDeque::new();
    let mut expected_drops = 0u64;

    for (i, op) in ops.iter().enumerate() {
        let before = queue.status();
        match op {
            QueueOp::Push(payload) => match queue.push(payload) {
                Ok(()) => {
                    if expected.len() as u64 >= capacity {
                        return Err(format!("op {}: push accepted on a full ring", i));
                    }
                    expected.push_back(payload[..payload.len().min(payload_capacity)].to_vec());
                }
                Err(QueueError::WouldBlockWrite) => {
                    if (expected.len() as u64) < capacity {
                        return Err(format!(
                            "op {}: push rejected with only {} of {} slots used",
                            i,
                            expected.len(),
                            capacity
                        ));
                    }
                    expected_drops += 1;
                    let after = queue.status();
                    if (after.reserved, after.written, after.read)
                        != (before.reserved, before.written, before.read)
                    {
                        return Err(format!("op {}: rejected push moved positions", i));
                    }
                }
                Err(e) => return Err(format!("op {}: unexpected push error {}", i, e)),
            },
            QueueOp::Pop(buf_len) => {
                let mut buf = vec![0u8; *buf_len as usize];
                match (queue.pop_nonblocking(&mut buf), expected.pop_front()) {
                    (Ok(popped), Some(message)) => {
                        let want = message.len().min(buf.len());
                        if popped.len != want {
                            return Err(format!(
                                "op {}: popped {} bytes, expected {}",
                                i, popped.len, want
                            ));
                        }
                        if buf[..want] != message[..want] {
                            return Err(format!("op {}: payload mismatch", i));
                        }
                        if popped.truncated != (buf.len() < message.len()) {
                            return Err(format!("op {}: wrong truncation flag", i));
                        }
                    }
                    (Err(QueueError::WouldBlockRead), None) => {
                        if queue.status() != before {
                            return Err(format!("op {}: empty pop mutated state", i));
                        }
                    }
                    (Ok(_), None) => return Err(format!("op {}: popped from empty queue", i)),
                    (Err(e), Some(_)) => {
                        return Err(format!("op {}: pop failed with data queued: {}", i, e));
                    }
                    (Err(e), None) => return Err(format!("op {}: unexpected pop error {}", i, e)),
                }
            }
        }

        let status = queue.status();
        if status.read > status.written || status.written > status.reserved {
            return Err(format!("op {}: positions out of order: {}", i, status));
        }
        if status.reserved - status.read > capacity {
            return Err(format!("op {}: occupancy above capacity: {}", i, status));
        }
        if status.len != expected.len() as u64 {
            return Err(format!(
                "op {}: len {} but model has {}",
                i,
                status.len,
                expected.len()
            ));
        }
        if queue.drop_count() != expected_drops {
            return Err(format!(
                "op {}: drop count {} but model has {}",
                i,
                queue.drop_count(),
                expected_drops
            ));
        }
    }

    Ok(())
}
