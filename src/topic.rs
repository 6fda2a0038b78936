//! The broadcast topic: public façade over the ring, the consumers and the
//! lifecycle state.
//!
//! A `Topic` fans every published value out to all active subscribers in one
//! total order. Each subscriber gets a dedicated worker from the executor
//! and its own demand accounting; a slow subscriber throttles producers only
//! through the ring running full. Terminal signals (`complete`/`fail`) are
//! latched once and drained by every consumer; subscribers arriving after
//! termination are served the residual ring tail by the cold replay source.
//!
//! The topic is itself a [`Subscriber`], so it can sit behind an upstream
//! publisher as a processor: the upstream subscription is pulled from by a
//! dedicated request task, and with `auto_cancel` the upstream is cancelled
//! exactly once when the last subscriber leaves.

use crate::bus::Bus;
use crate::consumer::ConsumerLoop;
use crate::cursor::INITIAL_CURSOR;
use crate::error::{Alert, Error};
use crate::executor::{DedicatedThreads, Executor};
use crate::reactive::{self, Publisher, Subscriber, Subscription};
use crate::replay::ColdReplay;
use crate::request;
use crate::wait::{LiteBlocking, PhasedOff, WaitStrategy};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Default backlog for topics built without an explicit `buffer_size`.
pub const SMALL_BUFFER_SIZE: usize = 256;

pub(crate) struct Inner<T> {
    name: String,
    pub(crate) bus: Bus<T>,

    /// Wait strategy for the request task's "consumers have drained" wait;
    /// always lite-blocking, independent of the ring's strategy.
    pub(crate) read_wait: LiteBlocking,

    executor: Arc<dyn Executor>,
    subscribers: AtomicUsize,
    terminated: AtomicBool,
    error: OnceLock<Error>,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
    has_upstream: AtomicBool,
    cancelled: AtomicBool,
    auto_cancel: bool,
}

impl<T> Inner<T> {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.error.get().cloned()
    }

    pub(crate) fn has_upstream(&self) -> bool {
        self.has_upstream.load(Ordering::Acquire)
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Acquire)
    }

    /// Latch the terminal state and wake everything that might be waiting.
    /// Late terminal signals are dropped.
    pub(crate) fn terminate(&self, error: Option<Error>) {
        if self
            .terminated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("'{}' dropped a terminal signal: already terminated", self.name);
            return;
        }
        if let Some(error) = error {
            let _ = self.error.set(error);
        }
        log::debug!("'{}' terminated", self.name);
        self.read_wait.signal_all_when_blocking();
        self.bus.signal_all();
    }

    /// Consumer teardown accounting; cancels the upstream when the last
    /// subscriber leaves and auto-cancel is on.
    pub(crate) fn subscriber_left(&self) {
        let remaining = self.subscribers.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && self.auto_cancel {
            self.cancel_upstream();
        }
        self.read_wait.signal_all_when_blocking();
    }

    fn cancel_upstream(&self) {
        let upstream = self.upstream.lock();
        let Some(subscription) = upstream.as_ref() else {
            return;
        };
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("'{}' cancels its upstream: no subscribers left", self.name);
        subscription.cancel();
    }
}

/// Configuration for a [`Topic`]; obtained from [`Topic::builder`].
pub struct TopicBuilder<T> {
    name: String,
    executor: Option<Arc<dyn Executor>>,
    buffer_size: usize,
    wait_strategy: Option<Arc<dyn WaitStrategy>>,
    shared: bool,
    auto_cancel: bool,
    signal_supplier: Option<Box<dyn Fn() -> T>>,
}

impl<T: Send + Sync + 'static> TopicBuilder<T> {
    fn new() -> Self {
        Self {
            name: "eddy".into(),
            executor: None,
            buffer_size: SMALL_BUFFER_SIZE,
            wait_strategy: None,
            shared: false,
            auto_cancel: true,
            signal_supplier: None,
        }
    }

    /// Label for worker threads; ignored when an explicit executor is set.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Run consumer loops on a caller-supplied executor.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Backlog size; must be a power of two.
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn wait_strategy(mut self, wait_strategy: Arc<dyn WaitStrategy>) -> Self {
        self.wait_strategy = Some(wait_strategy);
        self
    }

    /// Allow concurrent producers (multi-producer sequencer).
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Propagate `cancel` upstream when the last subscriber leaves.
    pub fn auto_cancel(mut self, auto_cancel: bool) -> Self {
        self.auto_cancel = auto_cancel;
        self
    }

    /// Pre-fill every slot at construction so steady-state publishing only
    /// overwrites in place.
    pub fn signal_supplier(mut self, supplier: impl Fn() -> T + 'static) -> Self {
        self.signal_supplier = Some(Box::new(supplier));
        self
    }

    /// # Panics
    ///
    /// Panics if the buffer size is not a power of two.
    pub fn build(self) -> Topic<T> {
        let wait = self.wait_strategy.unwrap_or_else(|| {
            Arc::new(PhasedOff::with_lite_lock(
                Duration::from_millis(200),
                Duration::from_millis(100),
            ))
        });
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(DedicatedThreads::new(self.name.clone())));
        let bus = Bus::new(
            self.buffer_size,
            self.shared,
            wait,
            self.signal_supplier.as_deref(),
        );
        Topic {
            inner: Arc::new(Inner {
                name: self.name,
                bus,
                read_wait: LiteBlocking::default(),
                executor,
                subscribers: AtomicUsize::new(0),
                terminated: AtomicBool::new(false),
                error: OnceLock::new(),
                upstream: Mutex::new(None),
                has_upstream: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                auto_cancel: self.auto_cancel,
            }),
        }
    }
}

/// A multi-producer / multi-subscriber broadcast processor.
///
/// Cloning yields another handle to the same topic.
pub struct Topic<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Topic<T> {
    /// Default single-producer topic.
    pub fn create() -> Self {
        Self::builder().build()
    }

    /// Topic accepting concurrent `publish` calls.
    pub fn share() -> Self {
        Self::builder().shared(true).build()
    }

    pub fn builder() -> TopicBuilder<T> {
        TopicBuilder::new()
    }

    pub fn subscribe<S: Subscriber<T> + 'static>(&self, subscriber: S) {
        self.subscribe_boxed(Box::new(subscriber));
    }

    fn subscribe_boxed(&self, subscriber: Box<dyn Subscriber<T>>) {
        let inner = &self.inner;

        if inner.is_terminated() {
            ColdReplay::new(Arc::clone(inner), inner.error(), None).subscribe(subscriber);
            return;
        }

        // 有上游时，第一个活跃订阅者从回放锚点开始；没有上游的话锚点
        // 从未初始化过，和后来者一样只跟新数据。
        let was_first = inner.subscribers.fetch_add(1, Ordering::AcqRel) == 0;
        let start = if was_first && inner.has_upstream() {
            inner.bus.anchor().get()
        } else {
            inner.bus.cursor()
        };
        let (id, sequence) = inner.bus.add_gating(start);
        let consumer = ConsumerLoop::new(Arc::clone(inner), id, sequence, subscriber);

        let task = Arc::clone(&consumer);
        match inner.executor.execute(Box::new(move || task.run())) {
            Ok(()) => {}
            Err(rejection) => {
                inner.bus.remove_gating(id);
                inner.subscribers.fetch_sub(1, Ordering::AcqRel);
                log::debug!("'{}' subscribe rejected: {rejection}", inner.name);
                let Some(mut subscriber) = consumer.take_subscriber() else {
                    return;
                };
                if inner.is_terminated() && rejection.shutdown {
                    ColdReplay::new(
                        Arc::clone(inner),
                        inner.error(),
                        Some(Arc::new(rejection) as Error),
                    )
                    .subscribe(subscriber);
                } else {
                    reactive::error_to(subscriber.as_mut(), Arc::new(rejection));
                }
            }
        }
    }

    /// Reserve a slot, write `value`, publish it. Blocks while the ring is
    /// full. Returns the value when the topic has already terminated, or
    /// terminates while waiting with no subscribers left to drain it.
    pub fn publish(&self, value: T) -> Result<(), T> {
        let inner = &self.inner;
        if inner.is_terminated() {
            return Err(value);
        }
        let observer = || {
            if inner.is_terminated() && inner.subscriber_count() == 0 {
                Err(Alert)
            } else {
                Ok(())
            }
        };
        inner.bus.publish_with(value, &observer)
    }

    /// Complete the stream; consumers drain to the final cursor first.
    pub fn complete(&self) {
        self.inner.terminate(None);
    }

    /// Terminate the stream with an error, delivered to every subscriber.
    pub fn fail(&self, error: Error) {
        self.inner.terminate(Some(error));
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn capacity(&self) -> usize {
        self.inner.bus.capacity()
    }

    /// Free slots before producers stall. Advisory under concurrency.
    pub fn remaining_capacity(&self) -> i64 {
        self.inner.bus.remaining_capacity()
    }

    /// Alias of [`Topic::remaining_capacity`].
    pub fn available_capacity(&self) -> i64 {
        self.remaining_capacity()
    }

    /// Published but not yet consumed by the slowest subscriber. Advisory.
    pub fn pending(&self) -> i64 {
        self.inner.bus.pending()
    }

    pub fn is_started(&self) -> bool {
        self.inner.has_upstream() || self.inner.bus.cursor() != INITIAL_CURSOR
    }

    pub fn downstream_count(&self) -> usize {
        self.inner.bus.downstream_count()
    }

    /// Snapshot of per-subscriber positions; stale the moment it returns.
    pub fn downstreams(&self) -> Vec<i64> {
        self.inner.bus.downstreams()
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.inner.name)
            .field("pending", &self.inner.bus.pending())
            .field("remaining", &self.inner.bus.remaining_capacity())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Publisher<T> for Topic<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        self.subscribe_boxed(subscriber);
    }
}

/// Processor mode: the topic subscribes to an upstream publisher and
/// re-broadcasts what it receives, pulling through the request task.
impl<T: Clone + Send + Sync + 'static> Subscriber<T> for Topic<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) -> Result<(), Error> {
        let inner = &self.inner;
        if inner.is_terminated() {
            subscription.cancel();
            return Ok(());
        }
        {
            let mut slot = inner.upstream.lock();
            if slot.is_some() {
                // 已经有上游了，按契约取消后来者。
                subscription.cancel();
                return Ok(());
            }
            *slot = Some(Arc::clone(&subscription));
        }
        inner.has_upstream.store(true, Ordering::Release);

        // The anchor pins the replay window to what the request accounting
        // has seen, and starts gating producers from here on.
        inner.bus.anchor().set_volatile(inner.bus.cursor());
        inner.bus.gate_anchor();

        request::spawn(Arc::clone(inner), subscription);
        Ok(())
    }

    fn on_next(&mut self, value: &T) -> Result<(), Error> {
        let _ = self.publish(value.clone());
        Ok(())
    }

    fn on_error(&mut self, error: Error) {
        self.fail(error);
    }

    fn on_complete(&mut self) {
        self.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EddyError;
    use crate::reactive::UNBOUNDED;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
    use std::thread;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    enum Signal {
        Subscribed(Arc<dyn Subscription>),
        Next(i32),
        Error(String),
        Complete,
    }

    impl fmt::Debug for Signal {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Signal::Subscribed(_) => write!(f, "Subscribed"),
                Signal::Next(v) => write!(f, "Next({v})"),
                Signal::Error(e) => write!(f, "Error({e})"),
                Signal::Complete => write!(f, "Complete"),
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("rejected value {0}")]
    struct Rejects(i32);

    struct TestSubscriber {
        tx: Sender<Signal>,
        initial_demand: i64,
        fail_at: Option<i32>,
    }

    impl TestSubscriber {
        fn unbounded() -> (Self, Receiver<Signal>) {
            Self::with_demand(UNBOUNDED)
        }

        fn with_demand(n: i64) -> (Self, Receiver<Signal>) {
            let (tx, rx) = mpsc::channel();
            (
                Self {
                    tx,
                    initial_demand: n,
                    fail_at: None,
                },
                rx,
            )
        }

        fn failing_at(value: i32) -> (Self, Receiver<Signal>) {
            let (mut subscriber, rx) = Self::unbounded();
            subscriber.fail_at = Some(value);
            (subscriber, rx)
        }
    }

    impl Subscriber<i32> for TestSubscriber {
        fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) -> Result<(), Error> {
            if self.initial_demand > 0 {
                subscription.request(self.initial_demand);
            }
            self.tx.send(Signal::Subscribed(subscription)).ok();
            Ok(())
        }

        fn on_next(&mut self, value: &i32) -> Result<(), Error> {
            if self.fail_at == Some(*value) {
                return Err(Arc::new(Rejects(*value)));
            }
            self.tx.send(Signal::Next(*value)).ok();
            Ok(())
        }

        fn on_error(&mut self, error: Error) {
            self.tx.send(Signal::Error(error.to_string())).ok();
        }

        fn on_complete(&mut self) {
            self.tx.send(Signal::Complete).ok();
        }
    }

    fn expect_subscribed(rx: &Receiver<Signal>) -> Arc<dyn Subscription> {
        match rx.recv_timeout(WAIT).expect("expected on_subscribe") {
            Signal::Subscribed(subscription) => subscription,
            other => panic!("expected on_subscribe, got {other:?}"),
        }
    }

    fn next_values(rx: &Receiver<Signal>, n: usize) -> Vec<i32> {
        (0..n)
            .map(|_| match rx.recv_timeout(WAIT).expect("expected a value") {
                Signal::Next(value) => value,
                other => panic!("expected a value, got {other:?}"),
            })
            .collect()
    }

    fn expect_complete(rx: &Receiver<Signal>) {
        match rx.recv_timeout(WAIT).expect("expected on_complete") {
            Signal::Complete => {}
            other => panic!("expected on_complete, got {other:?}"),
        }
    }

    fn expect_error(rx: &Receiver<Signal>) -> String {
        match rx.recv_timeout(WAIT).expect("expected on_error") {
            Signal::Error(message) => message,
            other => panic!("expected on_error, got {other:?}"),
        }
    }

    /// 单生产者、两个订阅者：后来者只看到订阅之后的数据。
    #[test]
    fn test_tail_follow_two_subscribers() {
        let topic: Topic<i32> = Topic::builder().name("tail").buffer_size(8).build();

        let (a, ra) = TestSubscriber::unbounded();
        topic.subscribe(a);
        expect_subscribed(&ra);

        for value in [1, 2, 3] {
            topic.publish(value).unwrap();
        }
        assert_eq!(next_values(&ra, 3), vec![1, 2, 3]);

        let (b, rb) = TestSubscriber::unbounded();
        topic.subscribe(b);
        expect_subscribed(&rb);

        for value in [4, 5] {
            topic.publish(value).unwrap();
        }

        assert_eq!(next_values(&ra, 2), vec![4, 5]);
        assert_eq!(next_values(&rb, 2), vec![4, 5]);

        topic.complete();
        expect_complete(&ra);
        expect_complete(&rb);
    }

    #[test]
    fn test_plain_publish_first_subscriber_tail_follows() {
        let topic: Topic<i32> = Topic::builder().name("tailing").buffer_size(8).build();

        // Without an upstream the anchor is never initialized, so even the
        // first subscriber starts at the cursor and misses history.
        for value in [1, 2, 3] {
            topic.publish(value).unwrap();
        }

        let (a, ra) = TestSubscriber::unbounded();
        topic.subscribe(a);
        expect_subscribed(&ra);

        topic.publish(4).unwrap();
        assert_eq!(next_values(&ra, 1), vec![4]);
    }

    #[test]
    fn test_backpressure_pauses_producer() {
        let topic: Topic<i32> = Topic::builder().name("pressure").buffer_size(4).build();
        let requests = Arc::new(AtomicUsize::new(0));
        let cancels = Arc::new(AtomicUsize::new(0));

        // Anchor the topic to an upstream so the pre-subscriber data stays
        // replayable and the anchor gates the ring until it is consumed.
        let mut processor_side = topic.clone();
        processor_side
            .on_subscribe(Arc::new(FakeUpstream {
                requests: Arc::clone(&requests),
                cancels: Arc::clone(&cancels),
            }))
            .unwrap();

        for value in [1, 2, 3, 4] {
            topic.publish(value).unwrap();
        }

        let (a, ra) = TestSubscriber::with_demand(2);
        topic.subscribe(a);
        let subscription = expect_subscribed(&ra);

        assert_eq!(next_values(&ra, 2), vec![1, 2]);

        // The subscriber is parked mid-batch with its gate still at the
        // start, so a fifth publish has nowhere to go.
        let blocked = {
            let topic = topic.clone();
            thread::spawn(move || topic.publish(5).unwrap())
        };
        thread::sleep(Duration::from_millis(100));
        assert!(!blocked.is_finished(), "producer should stall on a full ring");

        // Fresh demand drains the batch, the request task advances the
        // anchor, and the producer gets its slot.
        subscription.request(3);
        blocked.join().unwrap();
        assert_eq!(next_values(&ra, 3), vec![3, 4, 5]);
    }

    /// 一个订阅者的回调失败不能影响其他订阅者。
    #[test]
    fn test_subscriber_failure_is_isolated() {
        let topic: Topic<i32> = Topic::builder().name("isolated").buffer_size(8).build();

        let (a, ra) = TestSubscriber::failing_at(3);
        topic.subscribe(a);
        expect_subscribed(&ra);

        let (b, rb) = TestSubscriber::unbounded();
        topic.subscribe(b);
        expect_subscribed(&rb);

        for value in [1, 2, 3, 4, 5] {
            topic.publish(value).unwrap();
        }
        topic.complete();

        assert_eq!(next_values(&ra, 2), vec![1, 2]);
        assert_eq!(expect_error(&ra), "rejected value 3");

        assert_eq!(next_values(&rb, 5), vec![1, 2, 3, 4, 5]);
        expect_complete(&rb);
    }

    #[test]
    fn test_late_subscriber_replays_after_completion() {
        let topic: Topic<i32> = Topic::builder().name("late").buffer_size(8).build();

        for value in [1, 2, 3] {
            topic.publish(value).unwrap();
        }
        topic.complete();

        let (c, rc) = TestSubscriber::unbounded();
        topic.subscribe(c);
        expect_subscribed(&rc);

        assert_eq!(next_values(&rc, 3), vec![1, 2, 3]);
        expect_complete(&rc);
    }

    #[test]
    fn test_late_subscriber_receives_stored_error() {
        let topic: Topic<i32> = Topic::builder().name("late-err").buffer_size(8).build();

        topic.publish(1).unwrap();
        topic.fail(Arc::new(Rejects(99)));

        let (c, rc) = TestSubscriber::unbounded();
        topic.subscribe(c);
        expect_subscribed(&rc);

        assert_eq!(next_values(&rc, 1), vec![1]);
        assert_eq!(expect_error(&rc), "rejected value 99");
    }

    struct FakeUpstream {
        requests: Arc<AtomicUsize>,
        cancels: Arc<AtomicUsize>,
    }

    impl Subscription for FakeUpstream {
        fn request(&self, _n: i64) {
            self.requests.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_first_subscriber_replays_from_upstream_anchor() {
        let topic: Topic<i32> = Topic::builder().name("anchored").buffer_size(8).build();
        let requests = Arc::new(AtomicUsize::new(0));
        let cancels = Arc::new(AtomicUsize::new(0));

        // Attaching an upstream pins the anchor at the current cursor; from
        // here on pre-subscriber data stays replayable.
        let mut processor_side = topic.clone();
        processor_side
            .on_subscribe(Arc::new(FakeUpstream {
                requests: Arc::clone(&requests),
                cancels: Arc::clone(&cancels),
            }))
            .unwrap();

        for value in [1, 2, 3] {
            topic.publish(value).unwrap();
        }

        let (a, ra) = TestSubscriber::unbounded();
        topic.subscribe(a);
        expect_subscribed(&ra);

        assert_eq!(next_values(&ra, 3), vec![1, 2, 3]);
    }

    #[test]
    fn test_auto_cancel_fires_exactly_once() {
        let topic: Topic<i32> = Topic::builder().name("auto").buffer_size(8).build();
        let requests = Arc::new(AtomicUsize::new(0));
        let cancels = Arc::new(AtomicUsize::new(0));

        let mut processor_side = topic.clone();
        processor_side
            .on_subscribe(Arc::new(FakeUpstream {
                requests: Arc::clone(&requests),
                cancels: Arc::clone(&cancels),
            }))
            .unwrap();

        let (a, ra) = TestSubscriber::unbounded();
        topic.subscribe(a);
        let subscription = expect_subscribed(&ra);

        subscription.cancel();

        // The teardown of A's loop is what propagates the cancel.
        let deadline = std::time::Instant::now() + WAIT;
        while cancels.load(Ordering::SeqCst) == 0 {
            assert!(std::time::Instant::now() < deadline, "upstream never cancelled");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(cancels.load(Ordering::SeqCst), 1);

        // The topic itself is still alive: a new subscriber works and no
        // second cancel is issued.
        let (b, rb) = TestSubscriber::unbounded();
        topic.subscribe(b);
        expect_subscribed(&rb);

        topic.publish(7).unwrap();
        assert_eq!(next_values(&rb, 1), vec![7]);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
        assert!(requests.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    #[should_panic(expected = "capacity must be a power of 2")]
    fn test_rejects_non_power_of_two() {
        let _topic: Topic<i32> = Topic::builder().buffer_size(3).build();
    }

    #[test]
    fn test_invalid_request_errors_only_offender() {
        let topic: Topic<i32> = Topic::builder().name("invalid").buffer_size(8).build();

        let (a, ra) = TestSubscriber::unbounded();
        topic.subscribe(a);
        expect_subscribed(&ra);

        // B never requests on subscribe; its only request is invalid.
        let (b, rb) = TestSubscriber::with_demand(0);
        topic.subscribe(b);
        let subscription_b = expect_subscribed(&rb);

        subscription_b.request(0);
        assert_eq!(
            expect_error(&rb),
            EddyError::InvalidRequest(0).to_string()
        );

        // A is unaffected.
        topic.publish(1).unwrap();
        assert_eq!(next_values(&ra, 1), vec![1]);
    }

    #[test]
    fn test_cancel_stops_delivery_silently() {
        let topic: Topic<i32> = Topic::builder().name("cancel").buffer_size(8).build();

        let (a, ra) = TestSubscriber::unbounded();
        topic.subscribe(a);
        let subscription_a = expect_subscribed(&ra);

        let (b, rb) = TestSubscriber::unbounded();
        topic.subscribe(b);
        expect_subscribed(&rb);

        topic.publish(1).unwrap();
        assert_eq!(next_values(&ra, 1), vec![1]);
        assert_eq!(next_values(&rb, 1), vec![1]);

        subscription_a.cancel();
        subscription_a.cancel(); // idempotent
        thread::sleep(Duration::from_millis(50));

        topic.publish(2).unwrap();
        assert_eq!(next_values(&rb, 1), vec![2]);

        // A sees nothing further, not even a terminal signal.
        topic.complete();
        expect_complete(&rb);
        assert!(matches!(
            ra.recv_timeout(Duration::from_millis(200)),
            Err(RecvTimeoutError::Timeout)
        ));
    }

    #[test]
    fn test_terminal_error_reaches_active_subscribers() {
        let topic: Topic<i32> = Topic::builder().name("fails").buffer_size(8).build();

        let (a, ra) = TestSubscriber::unbounded();
        topic.subscribe(a);
        expect_subscribed(&ra);

        for value in [1, 2] {
            topic.publish(value).unwrap();
        }
        assert_eq!(next_values(&ra, 2), vec![1, 2]);

        topic.fail(Arc::new(Rejects(0)));
        assert_eq!(expect_error(&ra), "rejected value 0");
    }

    #[test]
    fn test_shared_topic_keeps_one_total_order() {
        let topic: Topic<i32> = Topic::builder()
            .name("shared")
            .buffer_size(64)
            .shared(true)
            .build();

        let (a, ra) = TestSubscriber::unbounded();
        topic.subscribe(a);
        expect_subscribed(&ra);

        let (b, rb) = TestSubscriber::unbounded();
        topic.subscribe(b);
        expect_subscribed(&rb);

        let mut producers = Vec::new();
        for base in [0, 100] {
            let topic = topic.clone();
            producers.push(thread::spawn(move || {
                for i in 0..50 {
                    topic.publish(base + i).unwrap();
                }
            }));
        }
        for producer in producers {
            producer.join().unwrap();
        }

        let seen_a = next_values(&ra, 100);
        let seen_b = next_values(&rb, 100);

        // Same total order for everyone, and nothing lost.
        assert_eq!(seen_a, seen_b);
        let mut sorted = seen_a.clone();
        sorted.sort_unstable();
        let expected: Vec<i32> = (0..50).chain(100..150).collect();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn test_executor_rejection_surfaces_error() {
        let executor = Arc::new(DedicatedThreads::new("rejected"));
        executor.shutdown();

        let topic: Topic<i32> = Topic::builder()
            .name("rejected")
            .buffer_size(8)
            .executor(executor)
            .build();

        let (a, ra) = TestSubscriber::unbounded();
        topic.subscribe(a);

        expect_subscribed(&ra);
        let message = expect_error(&ra);
        assert!(message.contains("executor rejected"), "got: {message}");
        assert_eq!(topic.downstream_count(), 0);
    }

    #[test]
    fn test_introspection_counters() {
        let topic: Topic<i32> = Topic::builder().name("stats").buffer_size(8).build();

        assert_eq!(topic.capacity(), 8);
        assert_eq!(topic.pending(), 0);
        assert_eq!(topic.remaining_capacity(), 8);
        assert!(!topic.is_started());
        assert_eq!(topic.downstream_count(), 0);

        let (a, ra) = TestSubscriber::with_demand(0);
        topic.subscribe(a);
        let subscription = expect_subscribed(&ra);
        assert_eq!(topic.downstream_count(), 1);

        topic.publish(1).unwrap();
        topic.publish(2).unwrap();
        assert!(topic.is_started());
        assert_eq!(topic.pending(), 2);
        assert_eq!(topic.remaining_capacity(), 6);
        assert_eq!(topic.available_capacity(), 6);

        subscription.cancel();
    }

    #[test]
    fn test_replay_rejects_invalid_demand() {
        let topic: Topic<i32> = Topic::builder().name("cold").buffer_size(8).build();
        topic.publish(1).unwrap();
        topic.complete();

        let (c, rc) = TestSubscriber::with_demand(0);
        topic.subscribe(c);
        let subscription = expect_subscribed(&rc);

        subscription.request(-1);
        assert_eq!(
            expect_error(&rc),
            EddyError::InvalidRequest(-1).to_string()
        );
    }
}
