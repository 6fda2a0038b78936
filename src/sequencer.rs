//! Producer-side slot reservation and publication.
//!
//! A sequencer hands out slot sequences to producers and makes them visible
//! to consumers. The single-producer variant keeps a private claim counter
//! and publishes by advancing the shared cursor; the multi-producer variant
//! claims through a CAS loop on the cursor itself and records publication
//! per slot in an availability buffer, since slots claimed by different
//! producers may be written out of order.

use crate::cursor::Cursor;
use crate::error::Alert;
use crate::sequence::Sequence;
use crate::wait::WaitStrategy;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Minimum gating sequence, given the value to fall back to when no consumer
/// is registered.
pub(crate) type MinGating<'a> = &'a dyn Fn(i64) -> i64;

/// Lifecycle probe run while a producer waits for capacity; `Err(Alert)`
/// abandons the claim.
pub(crate) type Observer<'a> = &'a dyn Fn() -> Result<(), Alert>;

pub(crate) trait Sequencer: Send + Sync + std::fmt::Debug {
    /// Reserve the next `n` slot sequences, waiting while the ring is full;
    /// returns the highest reserved sequence.
    ///
    /// The capacity wait is a poll loop (observer probe + yield) rather than
    /// a wait-strategy sleep: consumers advance their gating cursors without
    /// signalling, so a sleeping producer would never be woken.
    fn claim(&self, n: i64, min_gating: MinGating<'_>, observer: Observer<'_>)
        -> Result<i64, Alert>;

    /// Make a claimed sequence visible to consumers and wake any waiters.
    fn publish(&self, sequence: i64);

    /// Publish a reserved range `[low, high]` in one go.
    fn publish_range(&self, low: i64, high: i64);

    /// The cursor consumers gate on.
    fn cursor(&self) -> &Cursor;

    /// Largest sequence in `[low, high]` that is published contiguously from
    /// `low`; `low - 1` when the slot at `low` is still pending.
    fn highest_published(&self, low: i64, high: i64) -> i64;
}

/// Sequencer for a processor with a single (or externally serialized)
/// producer. The cursor always trails the claim counter by the unpublished
/// reservations, so consumers never observe a gap.
#[derive(Debug)]
pub(crate) struct SingleProducer {
    buffer_size: usize,
    claimed: Cursor,
    cursor: Cursor,
    wait: Arc<dyn WaitStrategy>,
}

impl SingleProducer {
    pub(crate) fn new(buffer_size: usize, wait: Arc<dyn WaitStrategy>) -> Self {
        assert!(buffer_size.is_power_of_two(), "capacity must be a power of 2");
        Self {
            buffer_size,
            claimed: Cursor::default(),
            cursor: Cursor::default(),
            wait,
        }
    }
}

impl Sequencer for SingleProducer {
    fn claim(
        &self,
        n: i64,
        min_gating: MinGating<'_>,
        observer: Observer<'_>,
    ) -> Result<i64, Alert> {
        let claim = self.claimed.fetch_add(n) + n;
        let wrap_point = claim - self.buffer_size as i64;
        while wrap_point > min_gating(claim - n) {
            observer()?;
            std::thread::yield_now();
        }
        Ok(claim)
    }

    fn publish(&self, sequence: i64) {
        self.cursor.set(sequence);
        self.wait.signal_all_when_blocking();
    }

    fn publish_range(&self, _low: i64, high: i64) {
        // The cursor is contiguous; publishing the top covers the range.
        self.publish(high);
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn highest_published(&self, _low: i64, high: i64) -> i64 {
        // Publication is in claim order; the cursor is always contiguous.
        high
    }
}

/// Sequencer for concurrent producers.
///
/// The cursor doubles as the claim counter, so it can run ahead of what has
/// actually been written. `available[i]` records the epoch of the last
/// published wrap at slot `i`, letting consumers distinguish "claimed" from
/// "published" without any shared ordering between producers.
#[derive(Debug)]
pub(crate) struct MultiProducer {
    buffer_size: usize,
    cursor: Cursor,
    available: Box<[AtomicI32]>,
    index_mask: usize,
    shift: u32,
    wait: Arc<dyn WaitStrategy>,
}

impl MultiProducer {
    pub(crate) fn new(buffer_size: usize, wait: Arc<dyn WaitStrategy>) -> Self {
        assert!(buffer_size.is_power_of_two(), "capacity must be a power of 2");
        let available = (0..buffer_size)
            .map(|_| AtomicI32::new(-1))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buffer_size,
            cursor: Cursor::default(),
            available,
            index_mask: buffer_size - 1,
            shift: buffer_size.trailing_zeros(),
            wait,
        }
    }

    #[inline]
    fn is_published(&self, sequence: i64) -> bool {
        let cell = &self.available[sequence.index(self.index_mask)];
        cell.load(Ordering::Acquire) == sequence.epoch(self.shift)
    }
}

impl Sequencer for MultiProducer {
    fn claim(
        &self,
        n: i64,
        min_gating: MinGating<'_>,
        observer: Observer<'_>,
    ) -> Result<i64, Alert> {
        loop {
            let current = self.cursor.get();
            let next = current + n;
            let wrap_point = next - self.buffer_size as i64;
            if wrap_point > min_gating(current) {
                observer()?;
                std::thread::yield_now();
                continue;
            }
            if self.cursor.compare_exchange(current, next).is_ok() {
                return Ok(next);
            }
        }
    }

    fn publish(&self, sequence: i64) {
        let cell = &self.available[sequence.index(self.index_mask)];
        cell.store(sequence.epoch(self.shift), Ordering::Release);
        self.wait.signal_all_when_blocking();
    }

    fn publish_range(&self, low: i64, high: i64) {
        for sequence in low..=high {
            let cell = &self.available[sequence.index(self.index_mask)];
            cell.store(sequence.epoch(self.shift), Ordering::Release);
        }
        self.wait.signal_all_when_blocking();
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn highest_published(&self, low: i64, high: i64) -> i64 {
        let mut sequence = low;
        while sequence <= high {
            if !self.is_published(sequence) {
                return sequence - 1;
            }
            sequence += 1;
        }
        high
    }
}
