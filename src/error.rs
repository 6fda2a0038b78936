use std::sync::Arc;

/// Shared error payload carried by `on_error`.
///
/// A single terminal error is stored once on the processor and delivered to
/// every subscriber, so the payload must be cheaply cloneable and sharable
/// across the consumer threads.
pub type Error = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Failures raised by the processor itself, as opposed to errors pushed in
/// from the producer side.
#[derive(Debug, thiserror::Error)]
pub enum EddyError {
    /// Demand must be strictly positive; anything else is a contract
    /// violation reported to the offending subscriber only.
    #[error("non-positive request: {0}")]
    InvalidRequest(i64),

    /// A consumer loop was started twice.
    #[error("consumer loop is already running")]
    AlreadyRunning,
}

/// Recoverable control signal raised out of a wait loop.
///
/// An alert is not a failure: it wakes a waiter so it can re-check lifecycle
/// state (cancelled, terminated, invalid demand) and either resume waiting or
/// exit. It never reaches user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("alerted while waiting")]
pub struct Alert;
