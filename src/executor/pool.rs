//! A fixed, immutable pool of execution contexts.

use std::sync::Arc;

use super::{chooser_for, EventExecutor, EventExecutorExt, ExecutorChooser, SingleThreadExecutor};
use crate::endpoint::{Endpoint, EndpointFuture};
use crate::error::Error;
use crate::promise::Promise;

/// A fixed-size pool of [`SingleThreadExecutor`]s with deterministic
/// round-robin distribution.
///
/// The executor sequence is assigned at construction and never resized; a
/// registered endpoint therefore keeps its context for life. `next()` is safe
/// to call concurrently from arbitrary threads.
pub struct ExecutorPool {
    executors: Box<[Arc<SingleThreadExecutor>]>,
    chooser: Box<dyn ExecutorChooser>,
}

impl ExecutorPool {
    /// Spawns `size` executors named `{prefix}-{index}`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for `size == 0`, or an I/O error if a
    /// loop thread cannot be spawned.
    pub fn with_prefix(size: usize, prefix: &str) -> Result<Arc<Self>, Error> {
        if size == 0 {
            return Err(Error::configuration("executor pool size must be non-zero"));
        }
        let mut executors = Vec::with_capacity(size);
        for index in 0..size {
            executors.push(SingleThreadExecutor::spawn(format!("{prefix}-{index}"))?);
        }
        Ok(Arc::new(Self {
            executors: executors.into_boxed_slice(),
            chooser: chooser_for(size),
        }))
    }

    /// Spawns `size` executors with the default `event-loop` name prefix.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::with_prefix`].
    pub fn new(size: usize) -> Result<Arc<Self>, Error> {
        Self::with_prefix(size, "event-loop")
    }

    /// Number of execution contexts in this pool.
    #[must_use]
    pub fn size(&self) -> usize {
        self.executors.len()
    }

    /// Deterministically selects the next execution context.
    #[must_use]
    pub fn next(&self) -> Arc<dyn EventExecutor> {
        self.executors[self.chooser.next_index()].clone()
    }

    /// Registers an endpoint with the next context chosen from this pool.
    ///
    /// Registration runs as a work item on the chosen context: the endpoint is
    /// permanently bound to it, marked registered, and the registered event is
    /// fired through its handler chain. The returned future is owned by that
    /// context, so listeners observe registration from the endpoint's own
    /// thread. On failure the endpoint is force-closed; that includes the
    /// context refusing the work item after shutdown, which fails the token
    /// instead of leaving it pending forever.
    pub fn register(&self, endpoint: Arc<dyn Endpoint>) -> EndpointFuture {
        let executor = self.next();
        let promise = Promise::with_executor(executor.clone());
        let completion = promise.clone();
        let context = executor.clone();
        let registering = Arc::clone(&endpoint);
        let submitted = executor.submit(move || {
            // Registration in flight can no longer be abandoned.
            completion.set_uncancellable();
            match registering.register(context) {
                Ok(()) => {
                    registering.chain().fire_registered(&registering);
                    if !completion.try_success(Arc::clone(&registering)) {
                        tracing::debug!("registration token already terminal; result dropped");
                    }
                }
                Err(cause) => {
                    tracing::warn!(error = %cause, "endpoint registration failed; closing endpoint");
                    registering.close();
                    if !completion.try_failure(cause) {
                        tracing::debug!("registration token already terminal; failure dropped");
                    }
                }
            }
        });
        if let Err(cause) = submitted {
            tracing::warn!(error = %cause, "execution context rejected registration; closing endpoint");
            endpoint.close();
            if !promise.try_failure(cause) {
                tracing::debug!("registration token already terminal; rejection dropped");
            }
        }
        promise.future()
    }

    /// Shuts down every executor in the pool and waits for the loop threads to
    /// exit. Queued work items are drained first.
    pub fn shutdown(&self) {
        for executor in self.executors.iter() {
            executor.shutdown();
        }
        for executor in self.executors.iter() {
            executor.join();
        }
    }
}

impl std::fmt::Debug for ExecutorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorPool")
            .field("size", &self.executors.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StubEndpoint;
    use std::time::Duration;

    #[test]
    fn register_binds_endpoint_to_one_context() {
        let pool = ExecutorPool::new(2).expect("pool");
        let endpoint = StubEndpoint::new();
        let registration = pool.register(endpoint.clone() as Arc<dyn Endpoint>);
        assert!(registration
            .wait_timeout(Duration::from_secs(1))
            .expect("caller thread is not a loop thread"));
        assert!(registration.is_success());
        assert!(endpoint.is_registered());
        assert!(endpoint.executor().is_some());
        pool.shutdown();
    }

    #[test]
    fn failed_registration_closes_the_endpoint() {
        let pool = ExecutorPool::new(1).expect("pool");
        let endpoint = StubEndpoint::failing_registration();
        let registration = pool.register(endpoint.clone() as Arc<dyn Endpoint>);
        assert!(registration
            .wait_timeout(Duration::from_secs(1))
            .expect("caller thread is not a loop thread"));
        let cause = registration.cause().expect("registration must fail");
        assert_eq!(cause.kind(), crate::error::ErrorKind::Registration);
        assert!(!endpoint.is_open());
        pool.shutdown();
    }

    #[test]
    fn register_on_a_shut_down_pool_fails_the_token() {
        let pool = ExecutorPool::new(1).expect("pool");
        pool.shutdown();
        let endpoint = StubEndpoint::new();
        let registration = pool.register(endpoint.clone() as Arc<dyn Endpoint>);
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let observed = std::sync::Arc::clone(&fired);
        registration.add_listener(move |completion| {
            assert!(completion.cause().is_some());
            observed.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        assert!(registration
            .wait_timeout(Duration::from_secs(1))
            .expect("caller thread is not a loop thread"));
        let cause = registration.cause().expect("rejected registration must fail");
        assert_eq!(cause.kind(), crate::error::ErrorKind::Rejected);
        assert!(!endpoint.is_open());
        // The owning executor is gone, so the listener fired inline.
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn zero_sized_pool_is_a_configuration_error() {
        let err = match ExecutorPool::new(0) {
            Err(err) => err,
            Ok(_) => panic!("empty pool must be rejected"),
        };
        assert!(err.is_configuration());
    }
}
