//! Endpoint setup sequencers: create, register, bind, in order.
//!
//! [`Bootstrap`] wires a plain endpoint; [`ServerBootstrap`] additionally
//! installs the [`AcceptHandoff`] that moves accepted children onto a worker
//! pool. Both are a thin role layer over one shared [`BootstrapConfig`]; there
//! is no self-typed builder hierarchy.
//!
//! The sequencing rules:
//!
//! - Configuration errors (missing pool, missing factory, missing child
//!   handler) surface synchronously as `Err`, before any endpoint exists.
//! - Endpoint creation and init failures surface asynchronously through an
//!   already-failed completion token whose notification context is taken from
//!   the pool, so listener callbacks never run on the caller's stack by
//!   surprise.
//! - Bind is always submitted as a work item on the endpoint's execution
//!   context, never run inline, even when registration has already completed.
//!   When registration is still in flight, a deferred token picks up the real
//!   context from the registration result before the bind is submitted.
//! - A failed bind force-closes the endpoint.

mod acceptor;

pub use acceptor::{AcceptHandoff, ACCEPT_RECOVERY_DELAY};

use std::net::SocketAddr;
use std::sync::Arc;

use crate::endpoint::{
    apply_attributes, apply_options, AttrKey, AttrValue, Endpoint, EndpointFactory,
    EndpointFuture, EndpointOption, FailedEndpoint, Handler,
};
use crate::error::Error;
use crate::executor::{EventExecutor, EventExecutorExt, ExecutorPool};
use crate::promise::Promise;

/// Settings shared by both sequencer roles.
#[derive(Clone, Default)]
struct BootstrapConfig {
    pool: Option<Arc<ExecutorPool>>,
    factory: Option<Arc<dyn EndpointFactory>>,
    handler: Option<Arc<dyn Handler>>,
    options: Vec<EndpointOption>,
    attributes: Vec<(AttrKey, AttrValue)>,
    local_addr: Option<SocketAddr>,
}

impl BootstrapConfig {
    fn validate(&self) -> Result<(), Error> {
        if self.pool.is_none() {
            return Err(Error::configuration("executor pool not set"));
        }
        if self.factory.is_none() {
            return Err(Error::configuration("endpoint factory not set"));
        }
        Ok(())
    }

    fn configured_addr(&self) -> Result<SocketAddr, Error> {
        self.local_addr
            .ok_or_else(|| Error::configuration("local address not set"))
    }
}

/// Role-specific initialization applied to a fresh endpoint before it is
/// registered.
trait RoleInit {
    fn init(&self, config: &BootstrapConfig, endpoint: &Arc<dyn Endpoint>) -> Result<(), Error>;
}

/// A registration in flight, paired with the endpoint it concerns. On factory
/// failure the endpoint slot holds a closed stand-in so the bind path stays
/// uniform.
struct InitOutcome {
    endpoint: Arc<dyn Endpoint>,
    registration: EndpointFuture,
}

/// Creates the endpoint, applies options and attributes, runs role init, and
/// hands the endpoint to the pool for registration.
fn init_and_register(
    config: &BootstrapConfig,
    role: &dyn RoleInit,
) -> Result<InitOutcome, Error> {
    config.validate()?;
    let pool = config
        .pool
        .clone()
        .ok_or_else(|| Error::configuration("executor pool not set"))?;
    let factory = config
        .factory
        .clone()
        .ok_or_else(|| Error::configuration("endpoint factory not set"))?;

    let endpoint = match factory.create() {
        Ok(endpoint) => endpoint,
        Err(cause) => {
            tracing::warn!(error = %cause, "endpoint creation failed");
            let promise: Promise<Arc<dyn Endpoint>> = Promise::with_executor(pool.next());
            promise.set_failure(cause);
            return Ok(InitOutcome {
                endpoint: FailedEndpoint::new(),
                registration: promise.future(),
            });
        }
    };

    apply_options(&endpoint, &config.options);
    apply_attributes(&endpoint, &config.attributes);

    if let Err(cause) = role.init(config, &endpoint) {
        tracing::warn!(error = %cause, "endpoint init failed; closing endpoint");
        endpoint.close();
        let promise: Promise<Arc<dyn Endpoint>> = Promise::with_executor(pool.next());
        promise.set_failure(cause);
        return Ok(InitOutcome {
            endpoint,
            registration: promise.future(),
        });
    }

    let registration = pool.register(Arc::clone(&endpoint));
    Ok(InitOutcome {
        endpoint,
        registration,
    })
}

/// Chains a bind onto a registration.
fn do_bind(outcome: InitOutcome, addr: SocketAddr) -> EndpointFuture {
    let InitOutcome {
        endpoint,
        registration,
    } = outcome;

    if registration.is_done() {
        if registration.cause().is_some() {
            return registration;
        }
        let Some(executor) = endpoint.executor() else {
            let promise: Promise<Arc<dyn Endpoint>> = Promise::new();
            promise.set_failure(Error::internal(
                "registered endpoint has no execution context",
            ));
            return promise.future();
        };
        let promise = Promise::with_executor(executor.clone());
        let future = promise.future();
        bind_on_executor(&executor, endpoint, addr, promise);
        return future;
    }

    // Registration still in flight: the endpoint's context is unknown, so the
    // bind token starts deferred and adopts the context once registration
    // resolves.
    let promise: Promise<Arc<dyn Endpoint>> = Promise::new();
    let future = promise.future();
    registration.add_listener(move |completion| {
        if let Some(cause) = completion.cause() {
            if !promise.try_failure(cause.clone()) {
                tracing::debug!("bind token already terminal; registration failure dropped");
            }
            return;
        }
        match endpoint.executor() {
            Some(executor) => {
                promise.assign_executor(Arc::clone(&executor));
                bind_on_executor(&executor, endpoint, addr, promise);
            }
            None => {
                if !promise.try_failure(Error::internal(
                    "registered endpoint has no execution context",
                )) {
                    tracing::debug!("bind token already terminal; failure dropped");
                }
            }
        }
    });
    future
}

/// Submits the bind as a work item; never binds inline. A context that
/// refuses the work item fails the token and closes the endpoint.
fn bind_on_executor(
    executor: &Arc<dyn EventExecutor>,
    endpoint: Arc<dyn Endpoint>,
    addr: SocketAddr,
    promise: Promise<Arc<dyn Endpoint>>,
) {
    let rejected_endpoint = Arc::clone(&endpoint);
    let rejected_promise = promise.clone();
    let submitted = executor.submit(move || match endpoint.bind(addr) {
        Ok(()) => {
            tracing::debug!(addr = %addr, "endpoint bound");
            if !promise.try_success(Arc::clone(&endpoint)) {
                tracing::debug!("bind token already terminal; result dropped");
            }
        }
        Err(cause) => {
            tracing::warn!(addr = %addr, error = %cause, "bind failed; closing endpoint");
            endpoint.close();
            if !promise.try_failure(cause) {
                tracing::debug!("bind token already terminal; failure dropped");
            }
        }
    });
    if let Err(cause) = submitted {
        tracing::warn!(addr = %addr, error = %cause, "execution context rejected bind; closing endpoint");
        rejected_endpoint.close();
        if !rejected_promise.try_failure(cause) {
            tracing::debug!("bind token already terminal; rejection dropped");
        }
    }
}

struct PlainRole;

impl RoleInit for PlainRole {
    fn init(&self, config: &BootstrapConfig, endpoint: &Arc<dyn Endpoint>) -> Result<(), Error> {
        if let Some(handler) = &config.handler {
            endpoint.chain().attach(Arc::clone(handler));
        }
        Ok(())
    }
}

struct ServerRole<'a> {
    bootstrap: &'a ServerBootstrap,
}

impl RoleInit for ServerRole<'_> {
    fn init(&self, config: &BootstrapConfig, endpoint: &Arc<dyn Endpoint>) -> Result<(), Error> {
        if let Some(handler) = &config.handler {
            endpoint.chain().attach(Arc::clone(handler));
        }
        let child_handler = self
            .bootstrap
            .child_handler
            .clone()
            .ok_or_else(|| Error::configuration("child handler not set"))?;
        let worker_pool = match &self.bootstrap.worker_pool {
            Some(pool) => Arc::clone(pool),
            None => {
                tracing::warn!("worker pool not set; accepted children share the acceptor pool");
                config
                    .pool
                    .clone()
                    .ok_or_else(|| Error::configuration("executor pool not set"))?
            }
        };
        endpoint.chain().attach(Arc::new(AcceptHandoff::new(
            worker_pool,
            child_handler,
            self.bootstrap.child_options.clone(),
            self.bootstrap.child_attributes.clone(),
        )));
        Ok(())
    }
}

/// Sequencer for a plain (non-accepting) endpoint.
#[derive(Clone, Default)]
pub struct Bootstrap {
    config: BootstrapConfig,
}

impl Bootstrap {
    /// Creates an empty sequencer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the executor pool that registration draws contexts from.
    #[must_use]
    pub fn pool(mut self, pool: Arc<ExecutorPool>) -> Self {
        self.config.pool = Some(pool);
        self
    }

    /// Sets the endpoint factory.
    #[must_use]
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: EndpointFactory + 'static,
    {
        self.config.factory = Some(Arc::new(factory));
        self
    }

    /// Sets the handler attached to the endpoint during init.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.config.handler = Some(handler);
        self
    }

    /// Adds an endpoint option, applied in insertion order before init.
    #[must_use]
    pub fn option(mut self, option: EndpointOption) -> Self {
        self.config.options.push(option);
        self
    }

    /// Adds an endpoint attribute, applied in insertion order before init.
    #[must_use]
    pub fn attribute(mut self, key: AttrKey, value: AttrValue) -> Self {
        self.config.attributes.push((key, value));
        self
    }

    /// Sets the address used by [`Self::bind`].
    #[must_use]
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.config.local_addr = Some(addr);
        self
    }

    /// Checks the configuration without creating anything.
    ///
    /// # Errors
    ///
    /// A configuration error naming the first missing piece; the terminal
    /// handler is mandatory for the plain role.
    pub fn validate(&self) -> Result<(), Error> {
        self.config.validate()?;
        if self.config.handler.is_none() {
            return Err(Error::configuration("handler not set"));
        }
        Ok(())
    }

    /// Creates an endpoint and registers it with the pool.
    ///
    /// # Errors
    ///
    /// Configuration errors surface synchronously; creation and registration
    /// failures arrive through the returned token.
    pub fn register(&self) -> Result<EndpointFuture, Error> {
        self.validate()?;
        Ok(init_and_register(&self.config, &PlainRole)?.registration)
    }

    /// Registers and binds to the configured local address.
    ///
    /// # Errors
    ///
    /// Configuration errors (including a missing local address) surface
    /// synchronously; everything later arrives through the returned token.
    pub fn bind(&self) -> Result<EndpointFuture, Error> {
        let addr = self.config.configured_addr()?;
        self.bind_to(addr)
    }

    /// Registers and binds to `addr`.
    ///
    /// # Errors
    ///
    /// Configuration errors surface synchronously; everything later arrives
    /// through the returned token.
    pub fn bind_to(&self, addr: SocketAddr) -> Result<EndpointFuture, Error> {
        self.validate()?;
        Ok(do_bind(init_and_register(&self.config, &PlainRole)?, addr))
    }
}

impl std::fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrap")
            .field("options", &self.config.options.len())
            .field("local_addr", &self.config.local_addr)
            .finish_non_exhaustive()
    }
}

/// Sequencer for an accepting endpoint with child hand-off.
#[derive(Clone, Default)]
pub struct ServerBootstrap {
    config: BootstrapConfig,
    worker_pool: Option<Arc<ExecutorPool>>,
    child_handler: Option<Arc<dyn Handler>>,
    child_options: Vec<EndpointOption>,
    child_attributes: Vec<(AttrKey, AttrValue)>,
}

impl ServerBootstrap {
    /// Creates an empty sequencer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the acceptor's executor pool.
    #[must_use]
    pub fn pool(mut self, pool: Arc<ExecutorPool>) -> Self {
        self.config.pool = Some(pool);
        self
    }

    /// Sets the pool accepted children are registered with. Optional: without
    /// one, children share the acceptor pool (with a warning).
    #[must_use]
    pub fn worker_pool(mut self, pool: Arc<ExecutorPool>) -> Self {
        self.worker_pool = Some(pool);
        self
    }

    /// Sets the endpoint factory for the acceptor.
    #[must_use]
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: EndpointFactory + 'static,
    {
        self.config.factory = Some(Arc::new(factory));
        self
    }

    /// Sets the handler attached to the acceptor itself.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.config.handler = Some(handler);
        self
    }

    /// Sets the handler attached to every accepted child. Required.
    #[must_use]
    pub fn child_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.child_handler = Some(handler);
        self
    }

    /// Adds an option for the acceptor endpoint.
    #[must_use]
    pub fn option(mut self, option: EndpointOption) -> Self {
        self.config.options.push(option);
        self
    }

    /// Adds an option applied to every accepted child.
    #[must_use]
    pub fn child_option(mut self, option: EndpointOption) -> Self {
        self.child_options.push(option);
        self
    }

    /// Adds an attribute for the acceptor endpoint.
    #[must_use]
    pub fn attribute(mut self, key: AttrKey, value: AttrValue) -> Self {
        self.config.attributes.push((key, value));
        self
    }

    /// Adds an attribute applied to every accepted child.
    #[must_use]
    pub fn child_attribute(mut self, key: AttrKey, value: AttrValue) -> Self {
        self.child_attributes.push((key, value));
        self
    }

    /// Sets the address used by [`Self::bind`].
    #[must_use]
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.config.local_addr = Some(addr);
        self
    }

    /// Checks the configuration without creating anything.
    ///
    /// # Errors
    ///
    /// A configuration error naming the first missing piece; the child
    /// handler is mandatory for the server role.
    pub fn validate(&self) -> Result<(), Error> {
        self.config.validate()?;
        if self.child_handler.is_none() {
            return Err(Error::configuration("child handler not set"));
        }
        Ok(())
    }

    /// Creates the acceptor endpoint and registers it with the pool.
    ///
    /// # Errors
    ///
    /// Configuration errors surface synchronously; creation and registration
    /// failures arrive through the returned token.
    pub fn register(&self) -> Result<EndpointFuture, Error> {
        self.validate()?;
        Ok(init_and_register(&self.config, &ServerRole { bootstrap: self })?.registration)
    }

    /// Registers and binds to the configured local address.
    ///
    /// # Errors
    ///
    /// Configuration errors (including a missing local address) surface
    /// synchronously; everything later arrives through the returned token.
    pub fn bind(&self) -> Result<EndpointFuture, Error> {
        let addr = self.config.configured_addr()?;
        self.bind_to(addr)
    }

    /// Registers and binds to `addr`.
    ///
    /// # Errors
    ///
    /// Configuration errors surface synchronously; everything later arrives
    /// through the returned token.
    pub fn bind_to(&self, addr: SocketAddr) -> Result<EndpointFuture, Error> {
        self.validate()?;
        Ok(do_bind(
            init_and_register(&self.config, &ServerRole { bootstrap: self })?,
            addr,
        ))
    }
}

impl std::fmt::Debug for ServerBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBootstrap")
            .field("options", &self.config.options.len())
            .field("child_options", &self.child_options.len())
            .field("local_addr", &self.config.local_addr)
            .finish_non_exhaustive()
    }
}
