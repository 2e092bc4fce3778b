use std::sync::atomic::{AtomicBool, Ordering};

use crate::ring::SlotRing;

/// Result of asking the gate to admit a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The producer owns this position until it publishes it.
    Admitted(u64),
    /// The ring was full; the message is dropped and counted.
    Rejected,
}

impl Admission {
    #[inline]
    pub fn is_rejected(self) -> bool {
        matches!(self, Admission::Rejected)
    }
}

/// Producer-side drop-on-full policy.
///
/// Never blocks and never retries: a full ring means the message is dropped,
/// the ring's drop counter is bumped, and the caller decides what to do.
#[derive(Debug, Default)]
pub struct BackpressureGate {
    /// Whether we've already warned about drops (to avoid spam).
    drop_logged: AtomicBool,
}

impl BackpressureGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, ring: &SlotRing) -> Admission {
        match ring.try_reserve_write() {
            Some(pos) => Admission::Admitted(pos),
            None => {
                let dropped = ring.record_drop();
                if !self.drop_logged.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        capacity = ring.capacity(),
                        "queue full, dropping messages"
                    );
                } else {
                    tracing::trace!(dropped, "queue full, message dropped");
                }
                Admission::Rejected
            }
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::region::HeapRegion;

    #[test]
    fn rejects_only_when_full_and_counts() {
        let config = QueueConfig::new(16, 2);
        let owner = HeapRegion::new_zeroed(config.required_region_size().unwrap());
        let ring = unsafe { SlotRing::init(owner.region(), &config) }.unwrap();
        let gate = BackpressureGate::new();

        assert_eq!(gate.admit(&ring), Admission::Admitted(0));
        assert_eq!(gate.admit(&ring), Admission::Admitted(1));
        let before = ring.status();

        assert!(gate.admit(&ring).is_rejected());
        assert_eq!(ring.drop_count(), 1);
        assert!(gate.admit(&ring).is_rejected());
        assert_eq!(ring.drop_count(), 2);

        let after = ring.status();
        assert_eq!(before.reserved, after.reserved);
        assert_eq!(before.written, after.written);
        assert_eq!(before.read, after.read);
    }
}
