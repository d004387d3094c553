//! The endpoint (channel) seam consumed by the completion and bootstrap core.
//!
//! An endpoint is a bindable communication object analogous to a managed
//! socket. The core only relies on the contract captured by [`Endpoint`]:
//! create, register, bind, close, plus typed options, typed attributes, and a
//! handler chain for lifecycle events. Registration permanently binds an
//! endpoint to one execution context; every subsequent operation on the
//! endpoint must run as a work item on that context.
//!
//! [`EndpointCore`] carries the state every implementation shares (executor
//! slot, registered/open/auto-read flags, local address, attributes, handler
//! chain) so concrete endpoints only add their transport specifics.

mod failed;
mod tcp;

pub use failed::FailedEndpoint;
pub use tcp::{TcpServerEndpoint, TcpStreamEndpoint};

use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::executor::EventExecutor;
use crate::promise::CompletionFuture;

/// The completion token produced by registration and bind operations,
/// resolving to the endpoint involved.
pub type EndpointFuture = CompletionFuture<Arc<dyn Endpoint>>;

/// A typed configuration option applied to an endpoint before registration.
///
/// Options are applied in insertion order; endpoints reject options they do
/// not support and the caller logs a warning and continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointOption {
    /// SO_REUSEADDR for listeners, applied before bind.
    ReuseAddr(bool),
    /// Accept backlog for listeners.
    Backlog(u32),
    /// TCP_NODELAY for stream endpoints.
    NoDelay(bool),
    /// SO_KEEPALIVE for stream endpoints.
    KeepAlive(bool),
    /// IP TTL.
    Ttl(u32),
    /// Whether the endpoint keeps reading/accepting without explicit demand.
    AutoRead(bool),
}

/// A typed attribute key. Keys compare by their static name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttrKey(&'static str);

impl AttrKey {
    /// Creates a key from a static name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The key's name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

/// An attribute value stored on an endpoint.
pub type AttrValue = Arc<dyn Any + Send + Sync>;

/// Lifecycle observer attached to an endpoint's handler chain.
///
/// This is the narrow slice of a processing pipeline the core needs: enough to
/// observe registration, receive accepted children, and see exceptions. Full
/// data-plane dispatch stays outside this crate.
pub trait Handler: Send + Sync {
    /// The endpoint was bound to its execution context.
    fn endpoint_registered(&self, _endpoint: &Arc<dyn Endpoint>) {}

    /// A freshly accepted child endpoint arrived on a server endpoint.
    fn child_accepted(&self, _endpoint: &Arc<dyn Endpoint>, _child: Arc<dyn Endpoint>) {}

    /// An exception surfaced on the endpoint.
    fn exception_caught(&self, _endpoint: &Arc<dyn Endpoint>, _error: &Error) {}
}

/// An ordered chain of [`Handler`]s.
///
/// Events are dispatched to every handler in attach order, so an exception
/// observed by one handler still reaches the handlers after it.
#[derive(Default)]
pub struct HandlerChain {
    handlers: Mutex<Vec<Arc<dyn Handler>>>,
}

impl HandlerChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler to the chain.
    pub fn attach(&self, handler: Arc<dyn Handler>) {
        self.handlers.lock().push(handler);
    }

    /// Number of attached handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Returns true when no handler is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Handler>> {
        self.handlers.lock().clone()
    }

    /// Dispatches the registered event.
    pub fn fire_registered(&self, endpoint: &Arc<dyn Endpoint>) {
        for handler in self.snapshot() {
            handler.endpoint_registered(endpoint);
        }
    }

    /// Dispatches an accepted child.
    pub fn fire_child_accepted(&self, endpoint: &Arc<dyn Endpoint>, child: Arc<dyn Endpoint>) {
        for handler in self.snapshot() {
            handler.child_accepted(endpoint, Arc::clone(&child));
        }
    }

    /// Dispatches an exception to every handler in order.
    pub fn fire_exception(&self, endpoint: &Arc<dyn Endpoint>, error: &Error) {
        for handler in self.snapshot() {
            handler.exception_caught(endpoint, error);
        }
    }
}

impl std::fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerChain")
            .field("handlers", &self.len())
            .finish()
    }
}

/// The endpoint contract.
///
/// `register` and `bind` are invoked only as work items on the endpoint's
/// execution context; the bootstrap layer marshals calls from other threads.
pub trait Endpoint: Send + Sync {
    /// The execution context this endpoint is bound to, once registered.
    fn executor(&self) -> Option<Arc<dyn EventExecutor>>;

    /// True once the endpoint is registered with an execution context.
    fn is_registered(&self) -> bool;

    /// True while the endpoint has not been closed.
    fn is_open(&self) -> bool;

    /// The bound local address, if any.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// The endpoint's handler chain.
    fn chain(&self) -> &HandlerChain;

    /// Whether the endpoint keeps reading/accepting without explicit demand.
    fn auto_read(&self) -> bool;

    /// Enables or disables auto-read.
    fn set_auto_read(&self, enabled: bool);

    /// Applies a configuration option.
    ///
    /// # Errors
    ///
    /// Returns an unsupported-kind error for options this endpoint cannot
    /// honor, or an I/O error if applying the option fails.
    fn set_option(&self, option: &EndpointOption) -> Result<(), Error>;

    /// Sets a typed attribute, replacing any previous value for the key while
    /// keeping the key's original insertion position.
    fn set_attribute(&self, key: AttrKey, value: AttrValue);

    /// Reads a typed attribute.
    fn attribute(&self, key: AttrKey) -> Option<AttrValue>;

    /// Permanently binds this endpoint to an execution context.
    ///
    /// Called exactly once, as a work item on `executor` itself.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint is closed or already registered.
    fn register(&self, executor: Arc<dyn EventExecutor>) -> Result<(), Error>;

    /// Binds the endpoint to a local address.
    ///
    /// Called as a work item on the endpoint's execution context.
    ///
    /// # Errors
    ///
    /// Returns a bind-kind or unsupported-kind error.
    fn bind(&self, addr: SocketAddr) -> Result<(), Error>;

    /// Closes the endpoint and releases its resources. Idempotent.
    fn close(&self);
}

/// Registration and lifecycle state shared by every endpoint implementation.
pub struct EndpointCore {
    executor: Mutex<Option<Arc<dyn EventExecutor>>>,
    registered: AtomicBool,
    open: AtomicBool,
    auto_read: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    attributes: Mutex<Vec<(AttrKey, AttrValue)>>,
    chain: HandlerChain,
}

impl EndpointCore {
    /// Creates the state for an open, unregistered endpoint with auto-read on.
    #[must_use]
    pub fn new() -> Self {
        Self {
            executor: Mutex::new(None),
            registered: AtomicBool::new(false),
            open: AtomicBool::new(true),
            auto_read: AtomicBool::new(true),
            local_addr: Mutex::new(None),
            attributes: Mutex::new(Vec::new()),
            chain: HandlerChain::new(),
        }
    }

    /// Binds this endpoint to `executor` and marks it registered.
    ///
    /// # Errors
    ///
    /// Returns a registration error if the endpoint is closed or already has
    /// a context; the owning context is immutable once set.
    pub fn register(&self, executor: Arc<dyn EventExecutor>) -> Result<(), Error> {
        if !self.open.load(Ordering::Acquire) {
            return Err(Error::registration("endpoint is closed"));
        }
        let mut slot = self.executor.lock();
        if slot.is_some() {
            return Err(Error::registration(
                "endpoint is already bound to an execution context",
            ));
        }
        *slot = Some(executor);
        drop(slot);
        self.registered.store(true, Ordering::Release);
        Ok(())
    }

    /// The owning execution context, once assigned.
    #[must_use]
    pub fn executor(&self) -> Option<Arc<dyn EventExecutor>> {
        self.executor.lock().clone()
    }

    /// True once registered.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// True while open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Marks the endpoint closed. Returns true on the first close.
    pub fn close(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }

    /// Current auto-read setting.
    #[must_use]
    pub fn auto_read(&self) -> bool {
        self.auto_read.load(Ordering::Acquire)
    }

    /// Sets auto-read.
    pub fn set_auto_read(&self, enabled: bool) {
        self.auto_read.store(enabled, Ordering::Release);
    }

    /// The bound local address, if any.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Records the bound local address.
    pub fn set_local_addr(&self, addr: SocketAddr) {
        *self.local_addr.lock() = Some(addr);
    }

    /// The handler chain.
    #[must_use]
    pub fn chain(&self) -> &HandlerChain {
        &self.chain
    }

    /// Sets an attribute, replacing in place to keep insertion order stable.
    pub fn set_attribute(&self, key: AttrKey, value: AttrValue) {
        let mut attributes = self.attributes.lock();
        match attributes.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => attributes.push((key, value)),
        }
    }

    /// Reads an attribute.
    #[must_use]
    pub fn attribute(&self, key: AttrKey) -> Option<AttrValue> {
        self.attributes
            .lock()
            .iter()
            .find(|(existing, _)| *existing == key)
            .map(|(_, value)| Arc::clone(value))
    }
}

impl Default for EndpointCore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EndpointCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointCore")
            .field("registered", &self.is_registered())
            .field("open", &self.is_open())
            .field("auto_read", &self.auto_read())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

/// Produces endpoints for the bootstrap layer.
pub trait EndpointFactory: Send + Sync {
    /// Creates a new, unregistered endpoint.
    ///
    /// # Errors
    ///
    /// Any failure here is reported through an already-failed completion
    /// token by the bootstrap layer, never as a panic.
    fn create(&self) -> Result<Arc<dyn Endpoint>, Error>;
}

impl<F> EndpointFactory for F
where
    F: Fn() -> Result<Arc<dyn Endpoint>, Error> + Send + Sync,
{
    fn create(&self) -> Result<Arc<dyn Endpoint>, Error> {
        self()
    }
}

/// Applies options in order, logging and skipping the ones the endpoint
/// rejects.
pub(crate) fn apply_options(endpoint: &Arc<dyn Endpoint>, options: &[EndpointOption]) {
    for option in options {
        if let Err(cause) = endpoint.set_option(option) {
            tracing::warn!(option = ?option, error = %cause, "failed to apply endpoint option");
        }
    }
}

/// Applies attributes in order.
pub(crate) fn apply_attributes(endpoint: &Arc<dyn Endpoint>, attributes: &[(AttrKey, AttrValue)]) {
    for (key, value) in attributes {
        endpoint.set_attribute(*key, Arc::clone(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StubEndpoint;

    #[test]
    fn attributes_replace_in_place() {
        const LABEL: AttrKey = AttrKey::new("label");
        const WEIGHT: AttrKey = AttrKey::new("weight");
        let core = EndpointCore::new();
        core.set_attribute(LABEL, Arc::new("first".to_string()));
        core.set_attribute(WEIGHT, Arc::new(10u32));
        core.set_attribute(LABEL, Arc::new("second".to_string()));

        let value = core.attribute(LABEL).expect("label present");
        let label = value
            .downcast_ref::<String>()
            .expect("label stores a string");
        assert_eq!(label, "second");
        assert_eq!(core.attributes.lock().len(), 2);
        assert_eq!(core.attributes.lock()[0].0, LABEL);
    }

    #[test]
    fn core_rejects_second_registration() {
        let pool = crate::executor::ExecutorPool::new(1).expect("pool");
        let core = EndpointCore::new();
        core.register(pool.next()).expect("first registration");
        let err = core
            .register(pool.next())
            .expect_err("context is immutable once set");
        assert_eq!(err.kind(), crate::error::ErrorKind::Registration);
        pool.shutdown();
    }

    #[test]
    fn chain_dispatches_in_attach_order() {
        struct Recorder {
            name: &'static str,
            seen: Arc<Mutex<Vec<&'static str>>>,
        }
        impl Handler for Recorder {
            fn exception_caught(&self, _endpoint: &Arc<dyn Endpoint>, _error: &Error) {
                self.seen.lock().push(self.name);
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let endpoint: Arc<dyn Endpoint> = StubEndpoint::new();
        endpoint.chain().attach(Arc::new(Recorder {
            name: "first",
            seen: Arc::clone(&seen),
        }));
        endpoint.chain().attach(Arc::new(Recorder {
            name: "second",
            seen: Arc::clone(&seen),
        }));
        endpoint
            .chain()
            .fire_exception(&endpoint, &Error::registration("boom"));
        assert_eq!(*seen.lock(), vec!["first", "second"]);
    }
}
