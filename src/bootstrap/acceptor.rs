//! Hand-off of accepted child endpoints from the acceptor to a worker pool.

use std::sync::Arc;
use std::time::Duration;

use crate::endpoint::{
    apply_attributes, apply_options, AttrKey, AttrValue, Endpoint, EndpointOption, Handler,
};
use crate::error::Error;
use crate::executor::{EventExecutorExt, ExecutorPool};

/// How long accepts stay paused after an accept-path failure.
pub const ACCEPT_RECOVERY_DELAY: Duration = Duration::from_secs(1);

/// Handler installed on a server endpoint that moves each accepted child onto
/// a worker pool.
///
/// For every accepted child: the configured child handler is attached, child
/// options and attributes are applied in order, and the child is registered
/// with the worker pool, which picks the child's execution context with its
/// own chooser. A child whose registration fails is force-closed; the
/// acceptor itself stays open and keeps accepting.
///
/// An exception on the accept path trips backpressure: auto-read is disabled
/// so no further children are accepted, and a timer on the acceptor's own
/// executor re-enables it after [`ACCEPT_RECOVERY_DELAY`]. The exception still
/// reaches the handlers attached after this one.
pub struct AcceptHandoff {
    worker_pool: Arc<ExecutorPool>,
    child_handler: Arc<dyn Handler>,
    child_options: Vec<EndpointOption>,
    child_attributes: Vec<(AttrKey, AttrValue)>,
}

impl AcceptHandoff {
    pub(crate) fn new(
        worker_pool: Arc<ExecutorPool>,
        child_handler: Arc<dyn Handler>,
        child_options: Vec<EndpointOption>,
        child_attributes: Vec<(AttrKey, AttrValue)>,
    ) -> Self {
        Self {
            worker_pool,
            child_handler,
            child_options,
            child_attributes,
        }
    }
}

impl Handler for AcceptHandoff {
    fn child_accepted(&self, _endpoint: &Arc<dyn Endpoint>, child: Arc<dyn Endpoint>) {
        child.chain().attach(Arc::clone(&self.child_handler));
        apply_options(&child, &self.child_options);
        apply_attributes(&child, &self.child_attributes);

        let watched = Arc::clone(&child);
        self.worker_pool
            .register(child)
            .add_listener(move |completion| {
                if let Some(cause) = completion.cause() {
                    tracing::warn!(error = %cause, "child registration failed; force-closing child");
                    watched.close();
                }
            });
    }

    fn exception_caught(&self, endpoint: &Arc<dyn Endpoint>, error: &Error) {
        if !endpoint.auto_read() {
            // Already paused; the pending recovery timer covers this failure too.
            return;
        }
        // Pausing is only safe once a context exists to run the recovery
        // timer; otherwise the acceptor would stay paused forever.
        let Some(executor) = endpoint.executor() else {
            tracing::warn!(error = %error, "accept failure before registration; accepts stay enabled");
            return;
        };
        tracing::warn!(error = %error, "accept failure; pausing accepts");
        endpoint.set_auto_read(false);
        let resumed = Arc::clone(endpoint);
        let scheduled = executor.submit_after(ACCEPT_RECOVERY_DELAY, move || {
            resumed.set_auto_read(true);
        });
        if let Err(cause) = scheduled {
            tracing::warn!(error = %cause, "recovery timer rejected; resuming accepts immediately");
            endpoint.set_auto_read(true);
        }
    }
}

impl std::fmt::Debug for AcceptHandoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptHandoff")
            .field("child_options", &self.child_options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StubEndpoint;
    use std::time::Duration;

    struct NoopHandler;
    impl Handler for NoopHandler {}

    fn handoff(pool: &Arc<ExecutorPool>) -> AcceptHandoff {
        AcceptHandoff::new(
            Arc::clone(pool),
            Arc::new(NoopHandler),
            Vec::new(),
            Vec::new(),
        )
    }

    #[test]
    fn exception_before_registration_keeps_accepts_enabled() {
        let pool = ExecutorPool::with_prefix(1, "worker").expect("pool");
        let handoff = handoff(&pool);
        // Unregistered endpoint: no context exists to run a recovery timer.
        let acceptor: Arc<dyn Endpoint> = StubEndpoint::new();
        handoff.exception_caught(&acceptor, &Error::registration("emfile"));
        assert!(acceptor.auto_read());
        pool.shutdown();
    }

    #[test]
    fn rejected_recovery_timer_resumes_accepts_inline() {
        let pool = ExecutorPool::with_prefix(1, "worker").expect("pool");
        let handoff = handoff(&pool);
        let acceptor: Arc<dyn Endpoint> = StubEndpoint::new();
        let registration = pool.register(Arc::clone(&acceptor));
        assert!(registration
            .wait_timeout(Duration::from_secs(1))
            .expect("caller thread is not a loop thread"));
        assert!(registration.is_success());

        pool.shutdown();
        handoff.exception_caught(&acceptor, &Error::registration("emfile"));
        assert!(acceptor.auto_read());
    }
}
