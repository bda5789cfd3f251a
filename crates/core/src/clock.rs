// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monotonic clock abstraction.
//!
//! All scheduler timers are absolute deadlines in whole seconds; the loop
//! converts them to a relative wait at the last moment. Tests substitute
//! [`FakeClock`] so timer behaviour is deterministic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Smallest relative wait the scheduler will ask the multiplexer for.
pub const MIN_TIMEOUT: u64 = 1;

/// Largest relative wait, one day. Sidesteps platform timeout limits and
/// guarantees at least one periodic check per day even in total idleness.
pub const MAX_TIMEOUT: u64 = 86_400;

/// Monotonic time source in whole seconds.
pub trait Clock {
    /// Seconds since an arbitrary fixed origin. Never goes backwards.
    fn now(&self) -> u64;
}

/// Absolute deadline `delta` seconds from now.
pub fn deadline_in(clock: &impl Clock, delta: u64) -> u64 {
    clock.now().saturating_add(delta)
}

/// Production clock, monotonic since process start.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_secs()
    }
}

/// Settable clock for tests.
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    now: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at an explicit point in time.
    pub fn at(secs: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(secs)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, secs: u64) {
        self.now.store(secs, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
