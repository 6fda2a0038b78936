//! Fixed slot storage for the broadcast ring.
//!
//! `RingBuffer` is a pre-allocated, power-of-two array of
//! `UnsafeCell<Option<E>>` slots indexed by `sequence & mask`. It never
//! reallocates and carries no synchronization of its own: all coordination
//! lives in the atomic cursors around it. A producer claims a sequence before
//! writing its slot; consumers read a slot only after the corresponding
//! sequence has been published.
//!
//! # Safety
//!
//! The `unsafe` `Send`/`Sync` implementations rest on three conventions:
//!
//! 1. **External coordination.** Every access is ordered by the sequencer's
//!    publish/consume protocol; the buffer itself never checks anything.
//! 2. **Single writer per sequence.** Only the producer that claimed a
//!    sequence may write the slot it maps to, and only before publishing it.
//! 3. **Gated reads.** A consumer dereferences a slot only for sequences at
//!    or below the published cursor, and producers never reclaim a slot that
//!    a registered gating cursor still trails.

use crate::sequence::Sequence;
use std::cell::UnsafeCell;

#[derive(Debug)]
pub(crate) struct RingBuffer<E> {
    slots: Box<[UnsafeCell<Option<E>>]>,

    /// `capacity - 1`; maps a sequence to its slot index.
    index_mask: usize,
}

// SAFETY: coordination is external (see the module docs). With `E: Send` a
// value may be moved into a slot on one thread and dropped or read on
// another; with `E: Sync` many consumers may hold `&E` concurrently. The
// sequencing protocol guarantees no slot is written while readable.
unsafe impl<E: Send + Sync> Send for RingBuffer<E> {}
unsafe impl<E: Send + Sync> Sync for RingBuffer<E> {}

impl<E> RingBuffer<E> {
    /// Creates a buffer of empty slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is less than 2 or not a power of two.
    pub(crate) fn new(capacity: usize) -> Self {
        Self::with_slots(capacity, |_| None)
    }

    /// Creates a buffer with every slot eagerly filled from `supplier`, so
    /// that steady-state publishing only overwrites in place.
    pub(crate) fn prefilled(capacity: usize, supplier: &dyn Fn() -> E) -> Self {
        Self::with_slots(capacity, |_| Some(supplier()))
    }

    fn with_slots(capacity: usize, mut fill: impl FnMut(usize) -> Option<E>) -> Self {
        assert!(capacity >= 2, "capacity must be at least 2");
        assert!(capacity.is_power_of_two(), "capacity must be a power of 2");

        let slots = (0..capacity)
            .map(|i| UnsafeCell::new(fill(i)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            index_mask: capacity - 1,
        }
    }

    /// Raw pointer to the slot a sequence maps to.
    ///
    /// Calling this is safe; dereferencing the pointer is not. Writers must
    /// hold the claim for `sequence`; readers must have observed its
    /// publication (an acquire load of the cursor that covers it). The
    /// `get_unchecked` is in bounds because `index_mask` confines the index.
    #[inline]
    pub(crate) fn get(&self, sequence: i64) -> *mut Option<E> {
        let index = sequence.index(self.index_mask);
        // SAFETY: `index` is always within `slots` thanks to the mask.
        unsafe { self.slots.get_unchecked(index).get() }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }
}
