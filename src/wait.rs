//! Wait strategies: how a thread yields the CPU while it waits for a
//! sequence to be published.
//!
//! A strategy blocks until a supplied cursor reaches a target sequence,
//! periodically running a `waiter` probe that may abort the wait with an
//! [`Alert`]. The cursor is a closure rather than a concrete cell so the same
//! strategies serve both consumer barriers (gated on the publish cursor) and
//! the upstream request task (gated on the minimum consumed position).
//!
//! The strategies trade CPU for wake-up latency:
//!
//! * [`BusySpin`] burns a core for the lowest possible latency.
//! * [`Yielding`] spins briefly, then yields to the scheduler.
//! * [`Parking`] ramps down from spinning through yielding to nanosecond
//!   parks.
//! * [`LiteBlocking`] sleeps on a condition variable; producers only pay for
//!   a wake-up when a waiter announced itself.
//! * [`PhasedOff`] spins for a bounded time, yields for a bounded time, then
//!   hands off to a fallback strategy.

use crate::error::Alert;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Policy for blocking until a cursor reaches a target sequence.
///
/// Implementations must call `waiter` often enough that a pending alert is
/// observed promptly, and must never abandon the wait on their own.
pub trait WaitStrategy: Send + Sync + std::fmt::Debug {
    /// Block until `cursor()` is at least `target`, returning the observed
    /// cursor value. `waiter` is invoked periodically; an `Err(Alert)` from
    /// it aborts the wait.
    fn wait_for(
        &self,
        target: i64,
        cursor: &dyn Fn() -> i64,
        waiter: &dyn Fn() -> Result<(), Alert>,
    ) -> Result<i64, Alert>;

    /// Wake every thread parked inside [`WaitStrategy::wait_for`]. No-op for
    /// strategies that never park.
    fn signal_all_when_blocking(&self) {}
}

/// Spin without ever yielding the core.
#[derive(Debug, Default)]
pub struct BusySpin;

impl WaitStrategy for BusySpin {
    fn wait_for(
        &self,
        target: i64,
        cursor: &dyn Fn() -> i64,
        waiter: &dyn Fn() -> Result<(), Alert>,
    ) -> Result<i64, Alert> {
        loop {
            let available = cursor();
            if available >= target {
                return Ok(available);
            }
            waiter()?;
            std::hint::spin_loop();
        }
    }
}

/// Spin a bounded number of times, then yield to the OS scheduler between
/// probes.
#[derive(Debug, Default)]
pub struct Yielding;

const YIELD_SPIN_TRIES: u32 = 100;

impl WaitStrategy for Yielding {
    fn wait_for(
        &self,
        target: i64,
        cursor: &dyn Fn() -> i64,
        waiter: &dyn Fn() -> Result<(), Alert>,
    ) -> Result<i64, Alert> {
        let mut counter = YIELD_SPIN_TRIES;
        loop {
            let available = cursor();
            if available >= target {
                return Ok(available);
            }
            waiter()?;
            if counter == 0 {
                std::thread::yield_now();
            } else {
                counter -= 1;
                std::hint::spin_loop();
            }
        }
    }
}

/// Ramp down from spinning through yielding to short timed parks.
///
/// The park has no dedicated waker; the timeout itself paces the probes, so
/// this strategy is blind to [`WaitStrategy::signal_all_when_blocking`].
#[derive(Debug)]
pub struct Parking {
    retries: u32,
}

impl Default for Parking {
    fn default() -> Self {
        Self { retries: 200 }
    }
}

impl WaitStrategy for Parking {
    fn wait_for(
        &self,
        target: i64,
        cursor: &dyn Fn() -> i64,
        waiter: &dyn Fn() -> Result<(), Alert>,
    ) -> Result<i64, Alert> {
        let mut counter = self.retries;
        loop {
            let available = cursor();
            if available >= target {
                return Ok(available);
            }
            waiter()?;
            if counter > self.retries / 2 {
                counter -= 1;
                std::hint::spin_loop();
            } else if counter > 0 {
                counter -= 1;
                std::thread::yield_now();
            } else {
                std::thread::park_timeout(Duration::from_nanos(1));
            }
        }
    }
}

/// Condition-variable wait with a "signal needed" flag.
///
/// A waiter raises the flag before sleeping; a publisher only takes the lock
/// and notifies when the flag was raised, so the uncontended publish path
/// stays lock-free.
#[derive(Debug, Default)]
pub struct LiteBlocking {
    lock: Mutex<()>,
    condvar: Condvar,
    signal_needed: AtomicBool,
}

impl WaitStrategy for LiteBlocking {
    fn wait_for(
        &self,
        target: i64,
        cursor: &dyn Fn() -> i64,
        waiter: &dyn Fn() -> Result<(), Alert>,
    ) -> Result<i64, Alert> {
        let mut available = cursor();
        if available >= target {
            return Ok(available);
        }
        let mut guard = self.lock.lock();
        loop {
            self.signal_needed.store(true, Ordering::Release);
            available = cursor();
            if available >= target {
                return Ok(available);
            }
            waiter()?;
            self.condvar.wait(&mut guard);
        }
    }

    fn signal_all_when_blocking(&self) {
        if self.signal_needed.swap(false, Ordering::AcqRel) {
            let _guard = self.lock.lock();
            self.condvar.notify_all();
        }
    }
}

const PHASED_SPIN_TRIES: u32 = 10_000;

/// Spin for `spin_timeout`, yield until `spin_timeout + yield_timeout`, then
/// delegate to the fallback strategy for the remainder of the wait.
#[derive(Debug)]
pub struct PhasedOff {
    spin_timeout: Duration,
    /// Cumulative deadline: spin timeout plus the yield phase.
    yield_deadline: Duration,
    fallback: Box<dyn WaitStrategy>,
}

impl PhasedOff {
    pub fn new(
        spin_timeout: Duration,
        yield_timeout: Duration,
        fallback: Box<dyn WaitStrategy>,
    ) -> Self {
        Self {
            spin_timeout,
            yield_deadline: spin_timeout + yield_timeout,
            fallback,
        }
    }

    /// Phased backoff ending in a [`LiteBlocking`] sleep; the default
    /// strategy of the processor.
    pub fn with_lite_lock(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self::new(spin_timeout, yield_timeout, Box::new(LiteBlocking::default()))
    }

    /// Phased backoff ending in timed parks.
    pub fn with_parking(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self::new(spin_timeout, yield_timeout, Box::new(Parking::default()))
    }
}

impl WaitStrategy for PhasedOff {
    fn wait_for(
        &self,
        target: i64,
        cursor: &dyn Fn() -> i64,
        waiter: &dyn Fn() -> Result<(), Alert>,
    ) -> Result<i64, Alert> {
        let mut counter = PHASED_SPIN_TRIES;
        let mut start: Option<Instant> = None;
        loop {
            let available = cursor();
            if available >= target {
                return Ok(available);
            }
            waiter()?;
            counter -= 1;
            if counter == 0 {
                counter = PHASED_SPIN_TRIES;
                match start {
                    None => start = Some(Instant::now()),
                    Some(begin) => {
                        let elapsed = begin.elapsed();
                        if elapsed > self.yield_deadline {
                            return self.fallback.wait_for(target, cursor, waiter);
                        }
                        if elapsed > self.spin_timeout {
                            std::thread::yield_now();
                        }
                    }
                }
            }
        }
    }

    fn signal_all_when_blocking(&self) {
        self.fallback.signal_all_when_blocking();
    }
}
