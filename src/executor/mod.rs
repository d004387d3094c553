//! Execution contexts: ordered single-threaded work-item runners.
//!
//! An execution context runs submitted work items strictly in submission
//! order, one at a time, on exactly one thread for its entire lifetime. An
//! endpoint, once registered, is permanently bound to one context; the rest of
//! the crate relies on that affinity guarantee to keep handler code
//! single-threaded without locks.
//!
//! - [`EventExecutor`] is the contract the completion and bootstrap layers
//!   consume: non-blocking `execute`, delayed `schedule`, and the
//!   `in_event_loop` affinity probe used to fail fast on self-deadlocking
//!   waits.
//! - [`SingleThreadExecutor`] is the concrete loop: FIFO queue plus a timer
//!   heap on one named OS thread.
//! - [`ExecutorPool`] owns a fixed set of executors and deterministically
//!   distributes endpoints over them via an [`ExecutorChooser`].

mod chooser;
mod pool;
mod single_thread;

pub use chooser::{chooser_for, ExecutorChooser, PowerOfTwoChooser, RoundRobinChooser};
pub use pool::ExecutorPool;
pub use single_thread::SingleThreadExecutor;

use crate::error::Error;

/// A work item submitted to an execution context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The execution-context contract.
///
/// Implementations must run work items strictly in submission order on one
/// thread, and must never execute a submitted item inline in `execute`.
/// Rejection is observable: a submitter holding a completion token must turn
/// a rejection into a failed token rather than letting it hang.
pub trait EventExecutor: Send + Sync {
    /// Enqueues a work item. Never blocks and never runs the item inline.
    ///
    /// # Errors
    ///
    /// Returns a rejected-kind error when the context is shut down; the item
    /// is dropped.
    fn execute(&self, task: Task) -> Result<(), Error>;

    /// Enqueues a work item to run after `delay`.
    ///
    /// # Errors
    ///
    /// Returns a rejected-kind error when the context is shut down; the item
    /// is dropped.
    fn schedule(&self, delay: std::time::Duration, task: Task) -> Result<(), Error>;

    /// Returns true when the calling thread is this context's loop thread.
    fn in_event_loop(&self) -> bool;
}

/// Closure-friendly helpers over [`EventExecutor`] trait objects.
pub trait EventExecutorExt: EventExecutor {
    /// Enqueues a closure.
    ///
    /// # Errors
    ///
    /// Same conditions as [`EventExecutor::execute`].
    fn submit<F>(&self, task: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute(Box::new(task))
    }

    /// Enqueues a closure to run after `delay`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`EventExecutor::schedule`].
    fn submit_after<F>(&self, delay: std::time::Duration, task: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(delay, Box::new(task))
    }
}

impl<E: EventExecutor + ?Sized> EventExecutorExt for E {}
