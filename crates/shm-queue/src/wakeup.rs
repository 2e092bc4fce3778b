use std::time::{Duration, Instant};

use crate::error::QueueError;
use crate::ring::SlotRing;
use crate::semaphore::{BinarySemaphore, TakeResult};

/// Couples ring transitions to the wakeup primitive.
///
/// Producers signal only on the empty→non-empty edge. The consumer re-checks
/// occupancy after every wake, so a stale or extra signal only costs a loop.
pub struct WakeupBridge<S> {
    semaphore: S,
}

impl<S: BinarySemaphore> WakeupBridge<S> {
    pub fn new(semaphore: S) -> Self {
        Self { semaphore }
    }

    #[inline]
    pub fn semaphore(&self) -> &S {
        &self.semaphore
    }

    /// Called after a publish; `was_empty` comes from [`SlotRing::publish`].
    #[inline]
    pub fn notify(&self, was_empty: bool) {
        if was_empty {
            tracing::trace!("queue became non-empty, waking consumer");
            self.semaphore.give(false);
        }
    }

    /// Block until the ring has a readable slot.
    ///
    /// Fails with `EndOfStream` once the ring is closed or the semaphore is
    /// destroyed, even if unread messages remain.
    pub fn wait_readable(&self, ring: &SlotRing) -> Result<(), QueueError> {
        loop {
            if ring.is_closed() {
                return Err(QueueError::EndOfStream);
            }
            if ring.has_readable() {
                return Ok(());
            }
            if !self.semaphore.take() {
                return Err(QueueError::EndOfStream);
            }
        }
    }

    /// Like [`wait_readable`](Self::wait_readable) with a deadline.
    ///
    /// Running out of time yields `WouldBlockRead`, which the caller may retry.
    pub fn wait_readable_timeout(
        &self,
        ring: &SlotRing,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if ring.is_closed() {
                return Err(QueueError::EndOfStream);
            }
            if ring.has_readable() {
                return Ok(());
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                return Err(QueueError::WouldBlockRead);
            }
            match self.semaphore.take_timeout(remaining) {
                TakeResult::Destroyed => return Err(QueueError::EndOfStream),
                TakeResult::Signaled | TakeResult::TimedOut => {}
            }
        }
    }

    /// Destroy the semaphore, failing every pending and future wait.
    pub fn close(&self) {
        self.semaphore.destroy();
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::region::HeapRegion;
    use crate::semaphore::CondvarSemaphore;

    fn setup() -> (HeapRegion, SlotRing, WakeupBridge<CondvarSemaphore>) {
        let config = QueueConfig::new(16, 4);
        let owner = HeapRegion::new_zeroed(config.required_region_size().unwrap());
        let ring = unsafe { SlotRing::init(owner.region(), &config) }.unwrap();
        (owner, ring, WakeupBridge::new(CondvarSemaphore::new()))
    }

    #[test]
    fn notify_only_on_edge() {
        let (_owner, _ring, bridge) = setup();
        bridge.notify(false);
        assert_eq!(
            bridge.semaphore().take_timeout(Duration::ZERO),
            TakeResult::TimedOut
        );
        bridge.notify(true);
        assert!(bridge.semaphore().take());
    }

    #[test]
    fn stale_signal_does_not_fake_readability() {
        let (_owner, ring, bridge) = setup();
        bridge.semaphore().give(false);
        assert_eq!(
            bridge.wait_readable_timeout(&ring, Duration::from_millis(20)),
            Err(QueueError::WouldBlockRead)
        );
    }

    #[test]
    fn readable_ring_returns_immediately() {
        let (_owner, ring, bridge) = setup();
        let pos = ring.try_reserve_write().unwrap();
        ring.publish(pos);
        assert_eq!(bridge.wait_readable(&ring), Ok(()));
    }

    #[test]
    fn close_ends_the_stream() {
        let (_owner, ring, bridge) = setup();
        bridge.close();
        assert_eq!(bridge.wait_readable(&ring), Err(QueueError::EndOfStream));
        assert_eq!(
            bridge.wait_readable_timeout(&ring, Duration::from_secs(1)),
            Err(QueueError::EndOfStream)
        );
    }
}
