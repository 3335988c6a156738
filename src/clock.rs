//! Time sources.
//!
//! Routines receive the current time as an argument, in whole unix seconds, so every caller
//! of one store must agree on a clock. [`SystemClock`] is the default; [`ManualClock`] lets
//! tests and simulations drive time explicitly.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

/// Source of the timestamp passed to the store-side routine.
pub trait Clock: Send + Sync {
    /// Current unix time in whole seconds.
    fn now_seconds(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time value, so advancing one clone advances all of them.
///
/// # Examples
///
/// ```
/// use tierlimit::{Clock, ManualClock};
///
/// let clock = ManualClock::new(100);
/// let shared = clock.clone();
///
/// shared.advance(5);
/// assert_eq!(clock.now_seconds(), 105);
///
/// clock.set(10);
/// assert_eq!(shared.now_seconds(), 10);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_seconds: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock starting at `now_seconds`.
    pub fn new(now_seconds: u64) -> Self {
        Self {
            now_seconds: Arc::new(AtomicU64::new(now_seconds)),
        }
    }

    /// Move the clock forward by `seconds`.
    pub fn advance(&self, seconds: u64) {
        self.now_seconds.fetch_add(seconds, Ordering::Relaxed);
    }

    /// Set the clock to `now_seconds`.
    pub fn set(&self, now_seconds: u64) {
        self.now_seconds.store(now_seconds, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_seconds(&self) -> u64 {
        self.now_seconds.load(Ordering::Relaxed)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_seconds(&self) -> u64 {
        (**self).now_seconds()
    }
}
