use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicI64, Ordering};

/// Starting value of every cursor: nothing published, nothing consumed.
pub(crate) const INITIAL_CURSOR: i64 = -1;

/// A cache-padded atomic sequence counter.
///
/// Both the publish cursor and each consumer's consumption position are
/// `Cursor`s. The padding keeps two cursors owned by different threads from
/// sharing a cache line.
#[derive(Debug)]
pub(crate) struct Cursor {
    value: CachePadded<AtomicI64>,
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new(INITIAL_CURSOR)
    }
}

impl Cursor {
    pub(crate) fn new(val: i64) -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(val)),
        }
    }

    /// Acquire load; pairs with the release in [`Cursor::set`].
    #[inline]
    pub(crate) fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Relaxed load for advisory reads (introspection, progress snapshots).
    #[inline]
    pub(crate) fn relaxed(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Release store; publishes every preceding write to acquire readers.
    #[inline]
    pub(crate) fn set(&self, val: i64) {
        self.value.store(val, Ordering::Release);
    }

    /// Sequentially consistent store, for the rare cross-cursor handshakes
    /// where release alone is not enough.
    #[inline]
    pub(crate) fn set_volatile(&self, val: i64) {
        self.value.store(val, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn fetch_add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::AcqRel)
    }

    #[inline]
    pub(crate) fn increment_and_get(&self) -> i64 {
        self.fetch_add(1) + 1
    }

    #[inline]
    pub(crate) fn compare_exchange(&self, current: i64, next: i64) -> Result<i64, i64> {
        self.value
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
    }
}
