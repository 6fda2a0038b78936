//! Cold replay for subscribers that arrive after termination.
//!
//! A terminated topic refuses no one: the residual ring contents plus the
//! stored terminal signal are wrapped into a one-shot pull publisher. There
//! is no worker thread; deliveries run on whichever thread calls `request`,
//! serialized by a work-in-progress counter so reentrant requests (issued
//! from inside `on_next`) queue up instead of recursing.
//!
//! The replay window is `(start, cursor]` with
//! `start = max(anchor, cursor - capacity)`: the anchor marks what was ever
//! handed to consumers, and the clamp keeps a wrapped ring from serving
//! overwritten slots.

use crate::consumer::{add_demand, take_demand};
use crate::cursor::Cursor;
use crate::error::{EddyError, Error};
use crate::reactive::{Subscriber, Subscription};
use crate::topic::Inner;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) struct ColdReplay<T> {
    inner: Arc<Inner<T>>,
    error: Option<Error>,
    rejection: Option<Error>,
}

impl<T: Send + Sync + 'static> ColdReplay<T> {
    pub(crate) fn new(
        inner: Arc<Inner<T>>,
        error: Option<Error>,
        rejection: Option<Error>,
    ) -> Self {
        Self {
            inner,
            error,
            rejection,
        }
    }

    pub(crate) fn subscribe(self, mut subscriber: Box<dyn Subscriber<T>>) {
        let end = self.inner.bus.cursor();
        let start = self
            .inner
            .bus
            .anchor()
            .get()
            .max(end - self.inner.bus.capacity() as i64);

        if let Some(rejection) = &self.rejection {
            // No suppression chain to attach it to; the stored terminal
            // signal wins and the rejection is only recorded.
            log::debug!(
                "replay on '{}' absorbs executor rejection: {rejection}",
                self.inner.name()
            );
        }

        let subscription = Arc::new(ReplaySubscription {
            inner: self.inner,
            error: self.error,
            subscriber: Mutex::new(None),
            next: AtomicI64::new(start + 1),
            end,
            requested: Cursor::new(0),
            wip: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
        });

        let handle = Arc::clone(&subscription) as Arc<dyn Subscription>;
        if subscriber.on_subscribe(handle).is_err() {
            return;
        }
        *subscription.subscriber.lock() = Some(subscriber);
        // Deliver anything requested during on_subscribe, or the immediate
        // terminal signal when the window is empty.
        subscription.drain();
    }
}

struct ReplaySubscription<T> {
    inner: Arc<Inner<T>>,
    error: Option<Error>,
    subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
    next: AtomicI64,
    end: i64,
    requested: Cursor,
    wip: AtomicUsize,
    done: AtomicBool,
    cancelled: AtomicBool,
    failed: AtomicBool,
    failure: Mutex<Option<Error>>,
}

impl<T: Send + Sync + 'static> ReplaySubscription<T> {
    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut guard = self.subscriber.lock();
        let Some(subscriber) = guard.as_mut() else {
            self.wip.store(0, Ordering::Release);
            return;
        };

        let mut missed = 1;
        loop {
            self.deliver(subscriber.as_mut());
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                return;
            }
        }
    }

    fn deliver(&self, subscriber: &mut dyn Subscriber<T>) {
        loop {
            if self.done.load(Ordering::Relaxed) || self.cancelled.load(Ordering::Acquire) {
                return;
            }
            if self.failed.load(Ordering::Acquire) {
                if let Some(error) = self.failure.lock().take() {
                    self.done.store(true, Ordering::Relaxed);
                    subscriber.on_error(error);
                }
                return;
            }

            let next = self.next.load(Ordering::Relaxed);
            if next > self.end {
                self.done.store(true, Ordering::Relaxed);
                match &self.error {
                    Some(error) => subscriber.on_error(Arc::clone(error)),
                    None => subscriber.on_complete(),
                }
                return;
            }
            if take_demand(&self.requested) == 0 {
                return;
            }

            // SAFETY: `next <= end` was published before termination and the
            // ring is immutable afterwards.
            let value = unsafe { self.inner.bus.read(next) };
            self.next.store(next + 1, Ordering::Relaxed);
            if let Err(error) = subscriber.on_next(value) {
                self.done.store(true, Ordering::Relaxed);
                subscriber.on_error(error);
                return;
            }
        }
    }
}

impl<T: Send + Sync + 'static> Subscription for ReplaySubscription<T> {
    fn request(&self, n: i64) {
        if n <= 0 {
            {
                let mut slot = self.failure.lock();
                if slot.is_none() {
                    *slot = Some(Arc::new(EddyError::InvalidRequest(n)));
                }
            }
            self.failed.store(true, Ordering::Release);
            self.drain();
            return;
        }
        add_demand(&self.requested, n);
        self.drain();
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}
