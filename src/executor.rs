//! Worker provisioning for consumer loops.
//!
//! The processor only needs one thing from its executor: run a submitted
//! task on a dedicated worker that may live for the whole subscription. The
//! default implementation spawns one named thread per task; callers with
//! their own threading infrastructure can plug in anything that satisfies
//! the trait.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Rejection returned when an executor will not take a task.
#[derive(Debug, thiserror::Error)]
#[error("executor rejected the task: {reason}")]
pub struct RejectedExecution {
    pub reason: String,

    /// True when the executor was shut down, as opposed to failing to
    /// provision a worker. Shut-down rejections on a terminated processor
    /// are routed to the cold replay source instead of an error.
    pub shutdown: bool,
}

pub trait Executor: Send + Sync {
    /// Run `task` on a dedicated worker.
    fn execute(&self, task: Task) -> Result<(), RejectedExecution>;
}

/// One named thread per task: `"{name}-{n}"`.
#[derive(Debug)]
pub struct DedicatedThreads {
    name: String,
    counter: AtomicUsize,
    closed: AtomicBool,
}

impl DedicatedThreads {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counter: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Stop accepting tasks. Threads already running are unaffected.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Executor for DedicatedThreads {
    fn execute(&self, task: Task) -> Result<(), RejectedExecution> {
        if self.is_shut_down() {
            return Err(RejectedExecution {
                reason: "executor is shut down".into(),
                shutdown: true,
            });
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        std::thread::Builder::new()
            .name(format!("{}-{}", self.name, n))
            .spawn(task)
            .map(|_handle| ())
            .map_err(|error| RejectedExecution {
                reason: error.to_string(),
                shutdown: false,
            })
    }
}
