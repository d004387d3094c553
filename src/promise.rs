//! Single-assignment completion tokens with listener notification.
//!
//! A completion token is the pair of a writable [`Promise`] and any number of
//! readable [`CompletionFuture`] handles over the same result cell:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    COMPLETION TOKEN LIFECYCLE                    │
//! │                                                                  │
//! │   Promise                               CompletionFuture         │
//! │     │                                        │                   │
//! │     │── set_success(v) ──► SUCCESS(v) ──────►├─ listeners fire   │
//! │     │── set_failure(e) ──► FAILURE(e) ──────►├─ wait() unblocks  │
//! │     │── cancel() ────────► CANCELLED ───────►├─ sync() re-raises │
//! │     │                                        │                   │
//! │   (second completion) ──► panic / false      │                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - Exactly one of success, failure, or cancellation ever takes effect; the
//!   stored result never changes afterwards.
//! - Every listener fires exactly once, in registration order. Listeners added
//!   after completion fire immediately; listeners added during notification are
//!   picked up by the running notification pass, still in order.
//! - When the token has an owning executor, notification runs as a work item on
//!   that executor so handler code keeps its single-thread affinity. Without
//!   one, notification runs inline on the completing thread.
//! - A panicking listener is caught and logged; remaining listeners still fire.
//!
//! # Blocking waits
//!
//! Only the `wait*` family blocks. Calling it from the token's own executor
//! thread would deadlock that single thread, so it fails fast with a
//! deadlock-kind error instead.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

use crate::error::Error;
use crate::executor::EventExecutor;

/// Identifier returned by [`Promise::add_listener`], usable for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The terminal state of a completion token, as seen by listeners.
///
/// Listeners receive a borrowed `&Completion<T>`, never the promise itself, so
/// a callback cannot re-complete the token it is observing.
#[derive(Debug)]
pub enum Completion<T> {
    /// The operation succeeded with a value.
    Success(T),
    /// The operation failed.
    Failure(Error),
    /// The operation was cancelled before it completed.
    Cancelled(Error),
}

impl<T> Completion<T> {
    /// Returns true if this is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true if the token was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns the success value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the stored failure (including the cancellation failure), if any.
    #[must_use]
    pub const fn cause(&self) -> Option<&Error> {
        match self {
            Self::Success(_) => None,
            Self::Failure(cause) | Self::Cancelled(cause) => Some(cause),
        }
    }
}

type ListenerFn<T> = Box<dyn FnOnce(&Completion<T>) + Send>;

struct ListenerEntry<T> {
    id: ListenerId,
    callback: ListenerFn<T>,
}

struct Inner<T> {
    /// `None` while pending; set exactly once.
    state: Option<Arc<Completion<T>>>,
    /// Listeners queued before completion, in registration order.
    listeners: SmallVec<[ListenerEntry<T>; 2]>,
    /// The executor that owns notification ordering, once known.
    executor: Option<Arc<dyn EventExecutor>>,
    /// Set by `set_uncancellable`; blocks later `cancel` calls.
    uncancellable: bool,
    /// True while a notification pass is draining the listener list.
    notifying: bool,
    next_listener_id: u64,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    completed: Condvar,
}

impl<T: Send + Sync + 'static> Shared<T> {
    fn new(executor: Option<Arc<dyn EventExecutor>>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: None,
                listeners: SmallVec::new(),
                executor,
                uncancellable: false,
                notifying: false,
                next_listener_id: 0,
            }),
            completed: Condvar::new(),
        })
    }

    /// Attempts the single terminal transition. Returns false if already done.
    fn finish(self: &Arc<Self>, outcome: Completion<T>, cancellation: bool) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_some() || (cancellation && inner.uncancellable) {
            return false;
        }
        inner.state = Some(Arc::new(outcome));
        self.completed.notify_all();
        let has_listeners = !inner.listeners.is_empty();
        let executor = inner.executor.clone();
        drop(inner);
        if has_listeners {
            self.dispatch_notification(executor);
        }
        true
    }

    /// Routes a notification pass to the owning executor when one is known and
    /// the caller is not already on it; otherwise runs inline. A shut-down
    /// executor cannot take the pass, so listeners still fire inline rather
    /// than never.
    fn dispatch_notification(self: &Arc<Self>, executor: Option<Arc<dyn EventExecutor>>) {
        match executor {
            Some(executor) if !executor.in_event_loop() => {
                let shared = Arc::clone(self);
                if let Err(cause) = executor.execute(Box::new(move || shared.notify_now())) {
                    tracing::warn!(
                        error = %cause,
                        "owning executor rejected notification; notifying inline"
                    );
                    self.notify_now();
                }
            }
            _ => self.notify_now(),
        }
    }

    /// Drains and fires queued listeners. Listeners added while this pass runs
    /// are drained by the same pass, preserving registration order.
    fn notify_now(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if inner.notifying {
            // Another pass is draining; it will pick up anything we queued.
            return;
        }
        let Some(completion) = inner.state.clone() else {
            return;
        };
        inner.notifying = true;
        loop {
            if inner.listeners.is_empty() {
                inner.notifying = false;
                return;
            }
            let batch: SmallVec<[ListenerEntry<T>; 2]> = inner.listeners.drain(..).collect();
            drop(inner);
            for entry in batch {
                invoke_listener(entry.callback, &completion);
            }
            inner = self.inner.lock();
        }
    }

    fn add_listener(self: &Arc<Self>, callback: ListenerFn<T>) -> ListenerId {
        let mut inner = self.inner.lock();
        let id = ListenerId(inner.next_listener_id);
        inner.next_listener_id += 1;
        inner.listeners.push(ListenerEntry { id, callback });
        if inner.state.is_some() && !inner.notifying {
            let executor = inner.executor.clone();
            drop(inner);
            self.dispatch_notification(executor);
        }
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        match inner.listeners.iter().position(|entry| entry.id == id) {
            Some(index) => {
                inner.listeners.remove(index);
                true
            }
            None => false,
        }
    }

    fn assign_executor(&self, executor: Arc<dyn EventExecutor>) {
        let mut inner = self.inner.lock();
        if inner.executor.is_none() {
            inner.executor = Some(executor);
        }
    }

    fn wait(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.state.is_some() {
            return Ok(());
        }
        if inner
            .executor
            .as_ref()
            .is_some_and(|executor| executor.in_event_loop())
        {
            return Err(Error::deadlock_wait());
        }
        while inner.state.is_none() {
            self.completed.wait(&mut inner);
        }
        Ok(())
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<bool, Error> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        if inner.state.is_some() {
            return Ok(true);
        }
        if inner
            .executor
            .as_ref()
            .is_some_and(|executor| executor.in_event_loop())
        {
            return Err(Error::deadlock_wait());
        }
        while inner.state.is_none() {
            if self.completed.wait_until(&mut inner, deadline).timed_out() {
                return Ok(inner.state.is_some());
            }
        }
        Ok(true)
    }

    fn completion(&self) -> Option<Arc<Completion<T>>> {
        self.inner.lock().state.clone()
    }
}

fn invoke_listener<T>(callback: ListenerFn<T>, completion: &Completion<T>) {
    if catch_unwind(AssertUnwindSafe(|| callback(completion))).is_err() {
        // One misbehaving listener must not abort notification of the rest.
        tracing::warn!("completion listener panicked; continuing with remaining listeners");
    }
}

/// The writable half of a completion token.
///
/// Cloning yields another writable handle over the same cell; the first
/// terminal transition wins regardless of which handle performs it.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// Creates a pending promise with no owning executor.
    ///
    /// Listeners will be notified inline on the completing thread until an
    /// executor is assigned via [`Promise::assign_executor`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Shared::new(None),
        }
    }

    /// Creates a pending promise whose listeners are notified on `executor`.
    #[must_use]
    pub fn with_executor(executor: Arc<dyn EventExecutor>) -> Self {
        Self {
            shared: Shared::new(Some(executor)),
        }
    }

    /// Returns a readable handle over the same result cell.
    #[must_use]
    pub fn future(&self) -> CompletionFuture<T> {
        CompletionFuture {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Assigns the owning executor if none is set yet.
    ///
    /// Used for promises created before their endpoint's execution context is
    /// known; once registration completes, the real context takes over
    /// notification ordering. Later calls are no-ops.
    pub fn assign_executor(&self, executor: Arc<dyn EventExecutor>) {
        self.shared.assign_executor(executor);
    }

    /// Completes the token successfully.
    ///
    /// # Panics
    ///
    /// Panics if the token is already terminal; double completion is a
    /// programmer error.
    pub fn set_success(&self, value: T) {
        assert!(
            self.try_success(value),
            "promise completed more than once (set_success)"
        );
    }

    /// Completes the token successfully; returns false if already terminal.
    pub fn try_success(&self, value: T) -> bool {
        self.shared.finish(Completion::Success(value), false)
    }

    /// Fails the token.
    ///
    /// # Panics
    ///
    /// Panics if the token is already terminal; double completion is a
    /// programmer error.
    pub fn set_failure(&self, cause: Error) {
        assert!(
            self.try_failure(cause),
            "promise completed more than once (set_failure)"
        );
    }

    /// Fails the token; returns false if already terminal.
    pub fn try_failure(&self, cause: Error) -> bool {
        self.shared.finish(Completion::Failure(cause), false)
    }

    /// Cancels the token.
    ///
    /// Returns false when the token is uncancellable or already terminal.
    /// Cancellation completes the token with a cancellation-kind failure.
    pub fn cancel(&self) -> bool {
        self.shared
            .finish(Completion::Cancelled(Error::cancelled()), true)
    }

    /// Marks the token as non-cancellable.
    ///
    /// Returns true unless the token was already cancelled.
    pub fn set_uncancellable(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        match &inner.state {
            None => {
                inner.uncancellable = true;
                true
            }
            Some(completion) => !completion.is_cancelled(),
        }
    }

    /// Registers a listener; see the module docs for the ordering guarantees.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce(&Completion<T>) + Send + 'static,
    {
        self.shared.add_listener(Box::new(listener))
    }

    /// Removes a not-yet-fired listener. No-op (returns false) if the listener
    /// is unknown or already fired.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.remove_listener(id)
    }

    /// Returns true once the token is terminal.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.completion().is_some()
    }

    /// Returns true if the token completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.shared
            .completion()
            .is_some_and(|completion| completion.is_success())
    }

    /// Returns true if the token was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared
            .completion()
            .is_some_and(|completion| completion.is_cancelled())
    }

    /// Returns the stored failure, if the token failed or was cancelled.
    #[must_use]
    pub fn cause(&self) -> Option<Error> {
        self.shared
            .completion()
            .and_then(|completion| completion.cause().cloned())
    }

    /// Blocks until the token is terminal.
    ///
    /// # Errors
    ///
    /// Fails fast with a deadlock-kind error when called from the token's own
    /// executor thread.
    pub fn wait(&self) -> Result<(), Error> {
        self.shared.wait()
    }

    /// Blocks until the token is terminal or the timeout elapses.
    ///
    /// Returns `Ok(true)` if the token completed in time. The timeout never
    /// cancels the underlying operation; it only stops waiting.
    ///
    /// # Errors
    ///
    /// Fails fast with a deadlock-kind error when called from the token's own
    /// executor thread.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, Error> {
        self.shared.wait_timeout(timeout)
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// Non-blocking peek: the success value, or `None` while not successful.
    #[must_use]
    pub fn get_now(&self) -> Option<T> {
        self.shared
            .completion()
            .and_then(|completion| completion.value().cloned())
    }

    /// Waits, then returns the success value or re-raises the stored failure.
    ///
    /// # Errors
    ///
    /// The stored failure (or cancellation), or a deadlock-kind error for a
    /// self-deadlocking wait.
    pub fn sync(&self) -> Result<T, Error> {
        self.shared.wait()?;
        match self.shared.completion().as_deref() {
            Some(Completion::Success(value)) => Ok(value.clone()),
            Some(completion) => Err(completion
                .cause()
                .cloned()
                .unwrap_or_else(|| Error::internal("terminal completion without a cause"))),
            None => Err(Error::internal("wait returned before completion")),
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.shared.inner.lock().state.as_deref() {
            None => "pending",
            Some(Completion::Success(_)) => "success",
            Some(Completion::Failure(_)) => "failure",
            Some(Completion::Cancelled(_)) => "cancelled",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

/// The readable half of a completion token.
///
/// Shares the result cell with the [`Promise`] it came from; exposes
/// observation, listener registration, and blocking waits, but no completion.
pub struct CompletionFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for CompletionFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> CompletionFuture<T> {
    /// Registers a listener; same ordering guarantees as [`Promise::add_listener`].
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce(&Completion<T>) + Send + 'static,
    {
        self.shared.add_listener(Box::new(listener))
    }

    /// Removes a not-yet-fired listener.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.remove_listener(id)
    }

    /// Returns true once the token is terminal.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.completion().is_some()
    }

    /// Returns true if the token completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.shared
            .completion()
            .is_some_and(|completion| completion.is_success())
    }

    /// Returns true if the token was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared
            .completion()
            .is_some_and(|completion| completion.is_cancelled())
    }

    /// Returns the stored failure, if the token failed or was cancelled.
    #[must_use]
    pub fn cause(&self) -> Option<Error> {
        self.shared
            .completion()
            .and_then(|completion| completion.cause().cloned())
    }

    /// Blocks until the token is terminal.
    ///
    /// # Errors
    ///
    /// Fails fast with a deadlock-kind error when called from the token's own
    /// executor thread.
    pub fn wait(&self) -> Result<(), Error> {
        self.shared.wait()
    }

    /// Blocks until the token is terminal or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Fails fast with a deadlock-kind error when called from the token's own
    /// executor thread.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, Error> {
        self.shared.wait_timeout(timeout)
    }
}

impl<T: Clone + Send + Sync + 'static> CompletionFuture<T> {
    /// Non-blocking peek: the success value, or `None` while not successful.
    #[must_use]
    pub fn get_now(&self) -> Option<T> {
        self.shared
            .completion()
            .and_then(|completion| completion.value().cloned())
    }

    /// Waits, then returns the success value or re-raises the stored failure.
    ///
    /// # Errors
    ///
    /// The stored failure (or cancellation), or a deadlock-kind error for a
    /// self-deadlocking wait.
    pub fn sync(&self) -> Result<T, Error> {
        self.shared.wait()?;
        match self.shared.completion().as_deref() {
            Some(Completion::Success(value)) => Ok(value.clone()),
            Some(completion) => Err(completion
                .cause()
                .cloned()
                .unwrap_or_else(|| Error::internal("terminal completion without a cause"))),
            None => Err(Error::internal("wait returned before completion")),
        }
    }
}

impl<T> std::fmt::Debug for CompletionFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.shared.inner.lock().state.as_deref() {
            None => "pending",
            Some(Completion::Success(_)) => "success",
            Some(Completion::Failure(_)) => "failure",
            Some(Completion::Cancelled(_)) => "cancelled",
        };
        f.debug_struct("CompletionFuture")
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn first_completion_wins() {
        let promise = Promise::new();
        assert!(promise.try_success(7));
        assert!(!promise.try_success(8));
        assert!(!promise.try_failure(Error::bind("late")));
        assert!(!promise.cancel());
        assert_eq!(promise.get_now(), Some(7));
    }

    #[test]
    #[should_panic(expected = "completed more than once")]
    fn set_success_twice_panics() {
        let promise = Promise::new();
        promise.set_success(1);
        promise.set_success(2);
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let promise: Promise<u32> = Promise::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..4u32 {
            let order = Arc::clone(&order);
            promise.add_listener(move |_| order.lock().push(n));
        }
        promise.set_success(0);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn late_listener_fires_inside_add_listener() {
        let promise: Promise<u32> = Promise::new();
        promise.set_success(11);
        let fired = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&fired);
        promise.add_listener(move |completion| {
            assert_eq!(completion.value(), Some(&11));
            observed.fetch_add(1, Ordering::SeqCst);
        });
        // Fired synchronously: no executor is involved.
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_added_during_notification_fires_once_in_order() {
        let promise: Promise<u32> = Promise::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let future = promise.future();
        {
            let order = Arc::clone(&order);
            let future = future.clone();
            promise.add_listener(move |_| {
                order.lock().push("outer");
                let order = Arc::clone(&order);
                future.add_listener(move |_| order.lock().push("inner"));
            });
        }
        promise.set_success(1);
        assert_eq!(*order.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn removed_listener_never_fires() {
        let promise: Promise<u32> = Promise::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&fired);
        let id = promise.add_listener(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        });
        assert!(promise.remove_listener(id));
        assert!(!promise.remove_listener(id));
        promise.set_success(1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_rest() {
        let promise: Promise<u32> = Promise::new();
        let fired = Arc::new(AtomicUsize::new(0));
        promise.add_listener(|_| panic!("misbehaving listener"));
        let observed = Arc::clone(&fired);
        promise.add_listener(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        });
        promise.set_success(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_respects_uncancellable() {
        let promise: Promise<u32> = Promise::new();
        assert!(promise.set_uncancellable());
        assert!(!promise.cancel());
        assert!(promise.try_success(3));
        assert!(promise.is_success());
    }

    #[test]
    fn cancel_completes_with_cancellation_failure() {
        let promise: Promise<u32> = Promise::new();
        assert!(promise.cancel());
        assert!(promise.is_cancelled());
        let cause = promise.cause().expect("cancelled token stores a cause");
        assert!(cause.is_cancellation());
        // Already cancelled: marking uncancellable reports failure.
        assert!(!promise.set_uncancellable());
    }

    #[test]
    fn get_now_is_none_until_success() {
        let promise: Promise<u32> = Promise::new();
        assert_eq!(promise.get_now(), None);
        promise.set_success(21);
        assert_eq!(promise.get_now(), Some(21));
        assert_eq!(promise.get_now(), Some(21));
    }

    #[test]
    fn sync_reraises_failure() {
        let promise: Promise<u32> = Promise::new();
        promise.set_failure(Error::registration("refused"));
        let err = promise.sync().expect_err("failure must re-raise");
        assert_eq!(err.kind(), ErrorKind::Registration);
    }

    #[test]
    fn wait_unblocks_across_threads() {
        let promise: Promise<u32> = Promise::new();
        let future = promise.future();
        let completer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.set_success(5);
        });
        future.wait().expect("no executor, no deadlock hazard");
        assert_eq!(future.get_now(), Some(5));
        completer.join().expect("completer thread");
    }

    #[test]
    fn wait_timeout_expires_on_pending_token() {
        let promise: Promise<u32> = Promise::new();
        let done = promise
            .wait_timeout(Duration::from_millis(10))
            .expect("no deadlock hazard");
        assert!(!done);
        assert!(!promise.is_done());
    }
}
