//! Monotonic millisecond clock with a fixed process epoch.
//!
//! All engine timestamps are milliseconds since `initial_timestamp()`, which is latched the first
//! time any clock function runs. The raw source is CLOCK_MONOTONIC, so wall-clock adjustments
//! never move the emulation backwards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::OnceLock;

static EPOCH_MS: OnceLock<u64> = OnceLock::new();

/// Raw CLOCK_MONOTONIC reading in milliseconds.
fn raw_ms() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // CLOCK_MONOTONIC cannot fail with a valid timespec pointer.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u64 * 1000 + ts.tv_nsec as u64 / 1_000_000
}

/// The raw clock value captured the first time the process consulted the clock.
///
/// Echoed into the event-log header so separate runs can be aligned.
pub fn initial_timestamp() -> u64 {
    *EPOCH_MS.get_or_init(raw_ms)
}

/// Milliseconds elapsed since [`initial_timestamp`].
pub fn timestamp() -> u64 {
    raw_ms() - initial_timestamp()
}

/// Time-source boundary for the shaping queues.
///
/// Production code uses [`MonotonicClock`]; tests drive [`ManualClock`] so scenarios can assert
/// exact release times without sleeping.
pub trait Clock: Send + Sync {
    /// Monotonic milliseconds since the process epoch.
    fn now(&self) -> u64;
}

/// The process clock: [`timestamp`] behind the [`Clock`] trait.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        timestamp()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Arc<Self> {
        Arc::new(ManualClock {
            now_ms: AtomicU64::new(start_ms),
        })
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_monotonic() {
        let a = timestamp();
        let b = timestamp();
        assert!(b >= a);
    }

    #[test]
    fn epoch_is_stable() {
        assert_eq!(initial_timestamp(), initial_timestamp());
    }

    #[test]
    fn manual_clock_moves_only_on_demand() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.now(), 10);
        assert_eq!(clock.now(), 10);
        clock.advance(5);
        assert_eq!(clock.now(), 15);
        clock.set(100);
        assert_eq!(clock.now(), 100);
    }
}
