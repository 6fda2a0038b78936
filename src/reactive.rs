//! The reactive-streams contract the processor speaks.
//!
//! Values are delivered by reference out of the shared ring: a broadcast
//! hands every subscriber a view of the same slot, and subscribers that need
//! ownership clone at the edge. Callbacks report failure by returning `Err`;
//! a failing `on_next` terminates only that subscriber.

use crate::error::Error;
use std::sync::Arc;

/// Demand value meaning "unbounded"; never decremented by deliveries.
pub const UNBOUNDED: i64 = i64::MAX;

/// The link handed to a subscriber in `on_subscribe`.
pub trait Subscription: Send + Sync {
    /// Ask for `n` more `on_next` deliveries. Demand accumulates and
    /// saturates at [`UNBOUNDED`]. `n <= 0` is a contract violation answered
    /// with `on_error` to this subscriber only.
    fn request(&self, n: i64);

    /// Stop the flow. Idempotent; after the cancel takes effect no further
    /// signals are delivered, not even a terminal one.
    fn cancel(&self);
}

pub trait Subscriber<T>: Send {
    /// Called exactly once before any other signal. Returning `Err` refuses
    /// the subscription; no data or terminal signal follows.
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) -> Result<(), Error>;

    /// One value. Returning `Err` ends this subscriber with `on_error`.
    fn on_next(&mut self, value: &T) -> Result<(), Error>;

    fn on_error(&mut self, error: Error);

    fn on_complete(&mut self);
}

pub trait Publisher<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>);
}

/// A subscription that will never produce anything; used to satisfy the
/// "on_subscribe before on_error" rule when a subscriber is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
    fn request(&self, _n: i64) {}

    fn cancel(&self) {}
}

/// Deliver a terminal error through a subscription that never produces.
pub(crate) fn error_to<T>(subscriber: &mut dyn Subscriber<T>, error: Error) {
    let _ = subscriber.on_subscribe(Arc::new(EmptySubscription));
    subscriber.on_error(error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EddyError;

    struct Recording {
        subscribed: bool,
        errors: Vec<String>,
    }

    impl Subscriber<i32> for Recording {
        fn on_subscribe(&mut self, _subscription: Arc<dyn Subscription>) -> Result<(), Error> {
            self.subscribed = true;
            Ok(())
        }

        fn on_next(&mut self, _value: &i32) -> Result<(), Error> {
            Ok(())
        }

        fn on_error(&mut self, error: Error) {
            self.errors.push(error.to_string());
        }

        fn on_complete(&mut self) {}
    }

    #[test]
    fn test_error_to_subscribes_then_errors() {
        let mut subscriber = Recording {
            subscribed: false,
            errors: Vec::new(),
        };
        error_to(&mut subscriber, Arc::new(EddyError::AlreadyRunning));

        assert!(subscriber.subscribed);
        assert_eq!(subscriber.errors, vec!["consumer loop is already running"]);
    }
}
