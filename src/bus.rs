//! Central shared state of a broadcast topic.
//!
//! `Bus` owns the slot storage, the sequencer and the gating registry: a
//! concurrent map from consumer id to that consumer's consumption cursor.
//! Producers fold the registry to find the slowest consumer before claiming
//! a slot, which is how backpressure reaches them; consumers insert
//! themselves on subscribe and remove themselves in their teardown.
//!
//! The bus also carries the replay anchor: the floor the processor's replay
//! paths may hand out. It only means something once the processor subscribes
//! to an upstream — the anchor is then pinned to the cursor and joins the
//! gating fold so the ring cannot outrun the request-replenishment
//! accounting. Without an upstream it never moves and never gates.

use crate::cursor::Cursor;
use crate::ring_buffer::RingBuffer;
use crate::sequencer::{MultiProducer, Observer, Sequencer, SingleProducer};
use crate::wait::WaitStrategy;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Allocates registry ids for consumer cursors.
#[derive(Debug, Default)]
struct ConsumerIds {
    id: CachePadded<AtomicU64>,
}

impl ConsumerIds {
    fn next_id(&self) -> u64 {
        self.id.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub(crate) struct Bus<T> {
    ids: ConsumerIds,
    buffer: RingBuffer<T>,
    sequencer: Arc<dyn Sequencer>,
    wait: Arc<dyn WaitStrategy>,

    /// Gating registry: consumer id -> consumption cursor.
    consumers: papaya::HashMap<u64, Arc<Cursor>>,

    /// Lowest sequence a fresh first subscriber may replay from.
    anchor: Arc<Cursor>,

    /// Whether the anchor participates in the gating fold; raised when an
    /// upstream subscription is attached.
    anchor_gates: AtomicBool,
}

impl<T> Bus<T> {
    pub(crate) fn new(
        capacity: usize,
        shared: bool,
        wait: Arc<dyn WaitStrategy>,
        supplier: Option<&dyn Fn() -> T>,
    ) -> Self {
        let buffer = match supplier {
            Some(supplier) => RingBuffer::prefilled(capacity, supplier),
            None => RingBuffer::new(capacity),
        };
        let sequencer: Arc<dyn Sequencer> = if shared {
            Arc::new(MultiProducer::new(capacity, Arc::clone(&wait)))
        } else {
            Arc::new(SingleProducer::new(capacity, Arc::clone(&wait)))
        };
        Self {
            ids: ConsumerIds::default(),
            buffer,
            sequencer,
            wait,
            consumers: Default::default(),
            anchor: Arc::new(Cursor::default()),
            anchor_gates: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn cursor(&self) -> i64 {
        self.sequencer.cursor().get()
    }

    pub(crate) fn sequencer(&self) -> Arc<dyn Sequencer> {
        Arc::clone(&self.sequencer)
    }

    pub(crate) fn wait_strategy(&self) -> Arc<dyn WaitStrategy> {
        Arc::clone(&self.wait)
    }

    pub(crate) fn anchor(&self) -> &Arc<Cursor> {
        &self.anchor
    }

    pub(crate) fn gate_anchor(&self) {
        self.anchor_gates.store(true, Ordering::Release);
    }

    /// Register a new gating cursor starting at `start`; returns the
    /// registry id and the cursor itself.
    pub(crate) fn add_gating(&self, start: i64) -> (u64, Arc<Cursor>) {
        let id = self.ids.next_id();
        let cursor = Arc::new(Cursor::new(start));
        self.consumers.pin().insert(id, Arc::clone(&cursor));
        (id, cursor)
    }

    /// Removal is idempotent; removing an unknown id is a silent no-op.
    pub(crate) fn remove_gating(&self, id: u64) {
        self.consumers.pin().remove(&id);
    }

    /// Minimum sequence producers must not overtake by more than the buffer
    /// size. Falls back to `fallback` when nothing gates.
    pub(crate) fn min_gating(&self, fallback: i64) -> i64 {
        let consumers = self.consumers.pin();
        let min = consumers
            .values()
            .map(|cursor| cursor.get())
            .min()
            .unwrap_or(fallback);
        if self.anchor_gates.load(Ordering::Acquire) {
            min.min(self.anchor.get())
        } else {
            min
        }
    }

    /// Minimum over the consumer cursors only, ignoring the anchor; used by
    /// the request task to observe consumption progress.
    pub(crate) fn min_consumed(&self, fallback: i64) -> i64 {
        self.consumers
            .pin()
            .values()
            .map(|cursor| cursor.get())
            .min()
            .unwrap_or(fallback)
    }

    /// Claim a slot, move `value` into it and publish it.
    ///
    /// Returns the value when the claim is abandoned (processor terminated
    /// with nobody left to drain the ring).
    pub(crate) fn publish_with(&self, value: T, observer: Observer<'_>) -> Result<(), T> {
        let claim = self
            .sequencer
            .claim(1, &|fallback| self.min_gating(fallback), observer);
        let sequence = match claim {
            Ok(sequence) => sequence,
            Err(_alert) => return Err(value),
        };
        // SAFETY: the claim grants exclusive write access to this slot until
        // it is published, and gating keeps readers away from it.
        unsafe {
            *self.buffer.get(sequence) = Some(value);
        }
        self.sequencer.publish(sequence);
        Ok(())
    }

    /// Read the slot at a published sequence.
    ///
    /// # Safety
    ///
    /// `sequence` must be at or below the published cursor, and the caller's
    /// gating cursor must still trail it so the slot cannot be overwritten
    /// while the reference is alive.
    pub(crate) unsafe fn read(&self, sequence: i64) -> &T {
        unsafe {
            (*self.buffer.get(sequence))
                .as_ref()
                .expect("slot must be published before it is read")
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub(crate) fn remaining_capacity(&self) -> i64 {
        self.capacity() as i64 - self.pending()
    }

    /// Published but not yet consumed by the slowest gate. Advisory.
    pub(crate) fn pending(&self) -> i64 {
        let cursor = self.cursor();
        cursor - self.min_gating(cursor)
    }

    pub(crate) fn downstream_count(&self) -> usize {
        self.consumers.pin().len()
    }

    /// Snapshot of per-consumer positions; stale the moment it returns.
    pub(crate) fn downstreams(&self) -> Vec<i64> {
        self.consumers
            .pin()
            .values()
            .map(|cursor| cursor.relaxed())
            .collect()
    }

    pub(crate) fn signal_all(&self) {
        self.wait.signal_all_when_blocking();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Alert;
    use crate::wait::BusySpin;

    fn bus(capacity: usize, shared: bool) -> Bus<u32> {
        Bus::new(capacity, shared, Arc::new(BusySpin), None)
    }

    fn ok() -> Result<(), Alert> {
        Ok(())
    }

    #[test]
    fn test_gating_registration_and_min_fold() {
        let bus = bus(8, false);
        assert_eq!(bus.min_gating(5), 5);

        let (a, cursor_a) = bus.add_gating(2);
        let (_b, cursor_b) = bus.add_gating(7);
        assert_eq!(bus.min_gating(0), 2);

        cursor_a.set(9);
        assert_eq!(bus.min_gating(0), 7);
        cursor_b.set(11);
        assert_eq!(bus.min_gating(0), 9);

        bus.remove_gating(a);
        assert_eq!(bus.min_gating(0), 11);
        // Removing twice is a no-op.
        bus.remove_gating(a);
        assert_eq!(bus.downstream_count(), 1);
    }

    #[test]
    fn test_anchor_joins_fold_only_when_gated() {
        let bus = bus(8, false);
        let (_id, _cursor) = bus.add_gating(4);

        assert_eq!(bus.min_gating(0), 4);
        bus.gate_anchor();
        // Anchor still at -1 now drags the minimum down.
        assert_eq!(bus.min_gating(0), -1);
    }

    #[test]
    fn test_publish_and_read_round() {
        let bus = bus(4, false);
        let (_id, _cursor) = bus.add_gating(-1);

        bus.publish_with(10, &ok).unwrap();
        bus.publish_with(20, &ok).unwrap();

        assert_eq!(bus.cursor(), 1);
        unsafe {
            assert_eq!(*bus.read(0), 10);
            assert_eq!(*bus.read(1), 20);
        }
    }

    #[test]
    fn test_full_ring_claim_returns_the_value() {
        let bus = bus(2, false);
        // A consumer that never advances.
        let (_id, _cursor) = bus.add_gating(-1);

        bus.publish_with(1, &ok).unwrap();
        bus.publish_with(2, &ok).unwrap();

        // Ring is full; an alerting observer hands the value back.
        let stuck = bus.publish_with(3, &|| Err(Alert));
        assert_eq!(stuck, Err(3));
    }

    #[test]
    fn test_capacity_accounting() {
        let bus = bus(4, true);
        let (_id, _cursor) = bus.add_gating(-1);

        assert_eq!(bus.pending(), 0);
        assert_eq!(bus.remaining_capacity(), 4);

        bus.publish_with(1, &ok).unwrap();
        bus.publish_with(2, &ok).unwrap();
        assert_eq!(bus.pending(), 2);
        assert_eq!(bus.remaining_capacity(), 2);
    }
}
