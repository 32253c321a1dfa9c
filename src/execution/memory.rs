//! Memory accounting for sinks.
//!
//! A sink reserves its output buffer against a [`MemoryTracker`] before
//! evaluating anything, so an over-large request fails up front with
//! `OutOfMemory` instead of part way through.

use crate::core::error::{PipelineError, PipelineResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Memory tracker shared by the sinks of one engine.
#[derive(Debug)]
pub struct MemoryTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
    limit: usize,
}

impl MemoryTracker {
    /// A tracker refusing anything past `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            limit,
        }
    }

    /// Account for `bytes` if they fit under the limit.
    pub fn try_allocate(&self, bytes: usize) -> bool {
        let mut current = self.current.load(Ordering::Relaxed);
        loop {
            let next = match current.checked_add(bytes) {
                Some(next) if next <= self.limit => next,
                _ => return false,
            };
            match self.current.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(next, Ordering::SeqCst);
                    return true;
                }
                Err(c) => current = c,
            }
        }
    }

    /// Reserve `bytes`, releasing them when the guard drops.
    pub fn reserve(self: &Arc<Self>, bytes: usize) -> PipelineResult<Reservation> {
        if !self.try_allocate(bytes) {
            return Err(PipelineError::OutOfMemory {
                required: bytes,
                available: self.available(),
            });
        }
        Ok(Reservation {
            tracker: self.clone(),
            bytes,
        })
    }

    /// Give back `bytes`.
    pub fn release(&self, bytes: usize) {
        self.current.fetch_sub(bytes, Ordering::SeqCst);
    }

    /// Bytes held now.
    pub fn current_usage(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Most bytes ever held at once.
    pub fn peak_usage(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Bytes that can still be reserved.
    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.current.load(Ordering::Relaxed))
    }

    /// The limit in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Bytes held against a tracker.
#[derive(Debug)]
pub struct Reservation {
    tracker: Arc<MemoryTracker>,
    bytes: usize,
}

impl Reservation {
    /// Size of the reservation.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_within_limit() {
        let tracker = MemoryTracker::new(100);
        assert!(tracker.try_allocate(60));
        assert!(!tracker.try_allocate(50));
        assert_eq!(tracker.available(), 40);
        tracker.release(60);
        assert!(tracker.try_allocate(100));
        assert_eq!(tracker.peak_usage(), 100);
    }

    #[test]
    fn test_reservation_releases_on_drop() {
        let tracker = Arc::new(MemoryTracker::new(1000));
        {
            let held = tracker.reserve(700).unwrap();
            assert_eq!(held.bytes(), 700);
            assert_eq!(tracker.current_usage(), 700);

            let error = tracker.reserve(400).unwrap_err();
            assert_eq!(
                error,
                PipelineError::OutOfMemory {
                    required: 400,
                    available: 300
                }
            );
        }
        assert_eq!(tracker.current_usage(), 0);
        assert_eq!(tracker.peak_usage(), 700);
    }

    #[test]
    fn test_overflow_is_refused() {
        let tracker = MemoryTracker::new(usize::MAX);
        assert!(tracker.try_allocate(usize::MAX - 1));
        assert!(!tracker.try_allocate(2));
    }
}
