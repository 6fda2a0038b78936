//! Consumer-side view over the publish cursor.
//!
//! Each consumer owns one `Barrier`: the publish cursor, the topic's shared
//! wait strategy and a private alert flag. Waiting delegates to the strategy;
//! the alert flag turns the next (or current) wait into an `Alert` so the
//! consumer can re-check its lifecycle. Because every barrier shares the one
//! strategy instance, a single `signal_all_when_blocking` wakes all
//! consumers, but only the alerted barrier's owner sees its flag.

use crate::cursor::Cursor;
use crate::error::Alert;
use crate::sequencer::{Observer, Sequencer};
use crate::wait::WaitStrategy;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct Barrier {
    sequencer: Arc<dyn Sequencer>,
    wait: Arc<dyn WaitStrategy>,
    alerted: CachePadded<AtomicBool>,
}

impl Barrier {
    pub(crate) fn new(sequencer: Arc<dyn Sequencer>, wait: Arc<dyn WaitStrategy>) -> Self {
        Self {
            sequencer,
            wait,
            alerted: CachePadded::new(AtomicBool::new(false)),
        }
    }

    /// Wait until `sequence` is published, returning the highest sequence
    /// readable contiguously from it. `waiter` is probed throughout the wait
    /// in addition to the alert flag.
    pub(crate) fn wait_for(&self, sequence: i64, waiter: Observer<'_>) -> Result<i64, Alert> {
        self.check_alert()?;
        let cursor: &Cursor = self.sequencer.cursor();
        let guarded = || {
            self.check_alert()?;
            waiter()
        };
        let available = self.wait.wait_for(sequence, &|| cursor.get(), &guarded)?;
        Ok(self.sequencer.highest_published(sequence, available))
    }

    /// Raise the alert flag and wake all waiters.
    pub(crate) fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        self.wait.signal_all_when_blocking();
    }

    /// Reset after the owner has observed and handled the alert.
    pub(crate) fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    /// Wake waiters without alerting; used when only a terminal flag was
    /// raised elsewhere and the waiter probes will notice it.
    pub(crate) fn signal(&self) {
        self.wait.signal_all_when_blocking();
    }

    pub(crate) fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    fn check_alert(&self) -> Result<(), Alert> {
        if self.is_alerted() {
            Err(Alert)
        } else {
            Ok(())
        }
    }
}
