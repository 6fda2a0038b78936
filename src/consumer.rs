//! Per-subscriber consumer loop.
//!
//! Every subscriber gets one `ConsumerLoop` running on a dedicated worker.
//! The loop waits on its barrier for published sequences, spends one unit of
//! demand per delivery, and advances its gating cursor batch by batch. It is
//! also the subscriber's `Subscription`: `request` feeds the demand counter,
//! `cancel` halts the loop through a barrier alert.
//!
//! The loop exits through exactly one of: cancel (silent), invalid demand
//! (`on_error`), a failing `on_next` (`on_error`), or processor termination
//! (drain then `on_complete`, or the stored error). The teardown block runs
//! unconditionally and unregisters the gating cursor, so a stuck or dead
//! subscriber can never gate producers forever.

use crate::barrier::Barrier;
use crate::cursor::Cursor;
use crate::error::{Alert, EddyError, Error};
use crate::reactive::{self, Subscriber, Subscription, UNBOUNDED};
use crate::topic::Inner;
use crate::wait::WaitStrategy;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Add demand, saturating at [`UNBOUNDED`]. Unbounded demand stays put.
pub(crate) fn add_demand(demand: &Cursor, n: i64) {
    loop {
        let current = demand.get();
        if current == UNBOUNDED {
            return;
        }
        let next = current.saturating_add(n);
        if demand.compare_exchange(current, next).is_ok() {
            return;
        }
    }
}

/// Take one unit of demand unless none is left; returns the value observed
/// before the decrement. [`UNBOUNDED`] is never decremented, 0 is never
/// undershot.
pub(crate) fn take_demand(demand: &Cursor) -> i64 {
    loop {
        let current = demand.get();
        if current == 0 || current == UNBOUNDED {
            return current;
        }
        if demand.compare_exchange(current, current - 1).is_ok() {
            return current;
        }
    }
}

/// What to do after an alert has been examined.
enum AfterAlert {
    Exit,
    Resume,
}

pub(crate) struct ConsumerLoop<T> {
    processor: Arc<Inner<T>>,
    running: CachePadded<AtomicBool>,

    /// Consumption cursor; registered as a gating sequence while the loop
    /// lives.
    sequence: Arc<Cursor>,

    /// Registry id of `sequence`.
    id: u64,

    demand: Cursor,
    barrier: Barrier,

    /// Raised by `request(n <= 0)`; the loop delivers the recorded error.
    failed: AtomicBool,
    failure: Mutex<Option<Error>>,

    /// Taken by the first `run`; `None` afterwards.
    subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
}

impl<T: Send + Sync + 'static> ConsumerLoop<T> {
    pub(crate) fn new(
        processor: Arc<Inner<T>>,
        id: u64,
        sequence: Arc<Cursor>,
        subscriber: Box<dyn Subscriber<T>>,
    ) -> Arc<Self> {
        let barrier = Barrier::new(processor.bus.sequencer(), processor.bus.wait_strategy());
        Arc::new(Self {
            processor,
            running: CachePadded::new(AtomicBool::new(false)),
            sequence,
            id,
            demand: Cursor::new(0),
            barrier,
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
            subscriber: Mutex::new(Some(subscriber)),
        })
    }

    /// Reclaim the subscriber after a failed executor submission.
    pub(crate) fn take_subscriber(&self) -> Option<Box<dyn Subscriber<T>>> {
        self.subscriber.lock().take()
    }

    /// The worker entry point.
    pub(crate) fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            // 同一个循环被提交了两次：拒绝后来者。
            if let Some(mut subscriber) = self.subscriber.lock().take() {
                reactive::error_to(subscriber.as_mut(), Arc::new(EddyError::AlreadyRunning));
            }
            return;
        }

        let Some(mut subscriber) = self.subscriber.lock().take() else {
            self.teardown();
            return;
        };

        log::debug!(
            "consumer {} of '{}' starting at sequence {}",
            self.id,
            self.processor.name(),
            self.sequence.relaxed()
        );

        let subscription = Arc::clone(&self) as Arc<dyn Subscription>;
        if subscriber.on_subscribe(subscription).is_err() {
            self.teardown();
            return;
        }

        self.process(subscriber.as_mut());
        self.teardown();
    }

    fn process(&self, subscriber: &mut dyn Subscriber<T>) {
        let processor = &self.processor;
        let waiter = || {
            if !self.running.load(Ordering::Acquire)
                || processor.is_terminated()
                || self.failed.load(Ordering::Acquire)
            {
                Err(Alert)
            } else {
                Ok(())
            }
        };

        let mut next_sequence = self.sequence.get() + 1;
        let unbounded = self.demand.get() == UNBOUNDED;

        loop {
            let available = match self.barrier.wait_for(next_sequence, &waiter) {
                Ok(available) => available,
                Err(Alert) => match self.on_alert(subscriber, next_sequence) {
                    AfterAlert::Exit => return,
                    AfterAlert::Resume => continue,
                },
            };

            while next_sequence <= available {
                if !unbounded {
                    // 没有剩余配额时停下来等 request。
                    loop {
                        if take_demand(&self.demand) != 0 {
                            break;
                        }
                        if waiter().is_err() {
                            if let AfterAlert::Exit = self.on_alert(subscriber, next_sequence) {
                                return;
                            }
                        }
                        std::thread::park_timeout(Duration::from_nanos(1));
                    }
                }

                // SAFETY: `next_sequence <= available` means the slot is
                // published, and our gating cursor still trails it.
                let value = unsafe { processor.bus.read(next_sequence) };
                if let Err(error) = subscriber.on_next(value) {
                    // Advance past the offending slot so teardown leaves a
                    // consistent gate behind.
                    self.sequence.set(next_sequence);
                    subscriber.on_error(error);
                    return;
                }
                next_sequence += 1;
            }

            self.sequence.set(available);

            if processor.has_upstream() {
                processor.read_wait.signal_all_when_blocking();
            }
        }
    }

    /// Decide what an alert means right now. Precedence: cancel is silent,
    /// invalid demand errors, termination drains or finishes; anything else
    /// was spurious.
    fn on_alert(&self, subscriber: &mut dyn Subscriber<T>, next_sequence: i64) -> AfterAlert {
        if !self.running.load(Ordering::Acquire) {
            return AfterAlert::Exit;
        }
        if let Some(error) = self.take_failure() {
            subscriber.on_error(error);
            return AfterAlert::Exit;
        }
        if self.processor.is_terminated() {
            if let Some(error) = self.processor.error() {
                subscriber.on_error(error);
                return AfterAlert::Exit;
            }
            if next_sequence > self.processor.bus.cursor() {
                subscriber.on_complete();
                return AfterAlert::Exit;
            }
            // Terminated but not yet drained: keep reading to the final
            // cursor before completing.
        }
        self.barrier.clear_alert();
        AfterAlert::Resume
    }

    fn take_failure(&self) -> Option<Error> {
        if self.failed.load(Ordering::Acquire) {
            self.failure.lock().take()
        } else {
            None
        }
    }

    /// Stop the loop; idempotent.
    pub(crate) fn halt(&self) {
        self.running.store(false, Ordering::Release);
        self.barrier.alert();
    }

    fn fail(&self, error: Error) {
        {
            let mut slot = self.failure.lock();
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.failed.store(true, Ordering::Release);
        self.barrier.alert();
    }

    /// Runs on every exit path: unregister the gate, hand the subscriber
    /// slot back to the processor's accounting, wake the request task.
    fn teardown(&self) {
        self.processor.bus.remove_gating(self.id);
        self.running.store(false, Ordering::Release);
        self.processor.subscriber_left();
        log::debug!(
            "consumer {} of '{}' stopped at sequence {}",
            self.id,
            self.processor.name(),
            self.sequence.relaxed()
        );
    }
}

impl<T: Send + Sync + 'static> Subscription for ConsumerLoop<T> {
    fn request(&self, n: i64) {
        if n <= 0 {
            self.fail(Arc::new(EddyError::InvalidRequest(n)));
            return;
        }
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        add_demand(&self.demand, n);
    }

    fn cancel(&self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_demand_accumulates_and_saturates() {
        let demand = Cursor::new(0);

        add_demand(&demand, 3);
        add_demand(&demand, 4);
        assert_eq!(demand.get(), 7);

        add_demand(&demand, i64::MAX);
        assert_eq!(demand.get(), UNBOUNDED);

        // Unbounded demand stays unbounded.
        add_demand(&demand, 5);
        assert_eq!(demand.get(), UNBOUNDED);
    }

    #[test]
    fn test_take_demand_is_bounded_below() {
        let demand = Cursor::new(2);

        assert_eq!(take_demand(&demand), 2);
        assert_eq!(take_demand(&demand), 1);
        // Exhausted: observed zero, nothing to take.
        assert_eq!(take_demand(&demand), 0);
        assert_eq!(demand.get(), 0);
    }

    #[test]
    fn test_take_demand_never_decrements_unbounded() {
        let demand = Cursor::new(UNBOUNDED);

        assert_eq!(take_demand(&demand), UNBOUNDED);
        assert_eq!(demand.get(), UNBOUNDED);
    }
}
