//! Upstream demand replenishment.
//!
//! When the topic subscribes to an upstream publisher it must keep pulling:
//! the ring can only absorb `buffer_size` elements ahead of the slowest
//! consumer, so a dedicated daemon thread watches the minimum consumed
//! position and requests more from the upstream in chunks, advancing the
//! replay anchor as it goes. The chunk size leaves a quarter of the ring as
//! slack so requests and deliveries overlap.

use crate::cursor::INITIAL_CURSOR;
use crate::error::Alert;
use crate::reactive::Subscription;
use crate::topic::Inner;
use crate::wait::WaitStrategy;
use std::sync::Arc;

pub(crate) fn spawn<T: Send + Sync + 'static>(
    inner: Arc<Inner<T>>,
    upstream: Arc<dyn Subscription>,
) {
    let name = format!("{}[request-task]", inner.name());
    let spawned = std::thread::Builder::new()
        .name(name)
        .spawn(move || run(inner, upstream));
    if let Err(error) = spawned {
        log::debug!("failed to spawn request task: {error}");
    }
}

fn run<T>(inner: Arc<Inner<T>>, upstream: Arc<dyn Subscription>) {
    let buffer_size = inner.bus.capacity() as i64;
    let limit = if buffer_size == 1 {
        1
    } else {
        buffer_size - (buffer_size >> 2).max(1)
    };

    let observer = || {
        if inner.is_terminated() || inner.is_cancelled() {
            Err(Alert)
        } else {
            Ok(())
        }
    };
    // Consumption progress: the slowest consumer, or our own anchor while
    // nobody is subscribed (progress then stalls until someone drains).
    let consumed = || {
        if inner.subscriber_count() == 0 {
            inner.bus.anchor().get()
        } else {
            inner.bus.min_consumed(inner.bus.anchor().get())
        }
    };

    log::debug!("request task for '{}' started", inner.name());
    upstream.request(buffer_size);

    let mut position = INITIAL_CURSOR;
    loop {
        let target = position + limit;
        position = match inner.read_wait.wait_for(target, &consumed, &observer) {
            Ok(reached) => reached,
            Err(Alert) => break,
        };
        inner.bus.anchor().set(position);
        upstream.request(limit);
    }

    log::debug!("request task for '{}' stopped", inner.name());
}
