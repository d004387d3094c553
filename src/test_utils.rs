//! Shared helpers for unit and integration tests.
//!
//! [`StubEndpoint`] is an in-memory [`Endpoint`] with scriptable failure
//! points, so lifecycle machinery can be exercised without touching real
//! sockets.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::endpoint::{
    AttrKey, AttrValue, Endpoint, EndpointCore, EndpointOption, HandlerChain,
};
use crate::error::Error;
use crate::executor::EventExecutor;

/// An in-memory endpoint for tests.
///
/// Supports the full [`Endpoint`] contract, records every bind, and can be
/// scripted to fail registration or bind.
#[derive(Debug)]
pub struct StubEndpoint {
    core: EndpointCore,
    fail_registration: bool,
    fail_bind: bool,
    bound: Mutex<Vec<SocketAddr>>,
}

impl StubEndpoint {
    fn build(fail_registration: bool, fail_bind: bool) -> Arc<Self> {
        Arc::new(Self {
            core: EndpointCore::new(),
            fail_registration,
            fail_bind,
            bound: Mutex::new(Vec::new()),
        })
    }

    /// A well-behaved endpoint.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::build(false, false)
    }

    /// An endpoint whose registration always fails.
    #[must_use]
    pub fn failing_registration() -> Arc<Self> {
        Self::build(true, false)
    }

    /// An endpoint whose bind always fails.
    #[must_use]
    pub fn failing_bind() -> Arc<Self> {
        Self::build(false, true)
    }

    /// Every address this endpoint was asked to bind to, in order.
    #[must_use]
    pub fn bound_addrs(&self) -> Vec<SocketAddr> {
        self.bound.lock().clone()
    }
}

impl Endpoint for StubEndpoint {
    fn executor(&self) -> Option<Arc<dyn EventExecutor>> {
        self.core.executor()
    }

    fn is_registered(&self) -> bool {
        self.core.is_registered()
    }

    fn is_open(&self) -> bool {
        self.core.is_open()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.core.local_addr()
    }

    fn chain(&self) -> &HandlerChain {
        self.core.chain()
    }

    fn auto_read(&self) -> bool {
        self.core.auto_read()
    }

    fn set_auto_read(&self, enabled: bool) {
        self.core.set_auto_read(enabled);
    }

    fn set_option(&self, _option: &EndpointOption) -> Result<(), Error> {
        Ok(())
    }

    fn set_attribute(&self, key: AttrKey, value: AttrValue) {
        self.core.set_attribute(key, value);
    }

    fn attribute(&self, key: AttrKey) -> Option<AttrValue> {
        self.core.attribute(key)
    }

    fn register(&self, executor: Arc<dyn EventExecutor>) -> Result<(), Error> {
        if self.fail_registration {
            return Err(Error::registration("scripted registration failure"));
        }
        self.core.register(executor)
    }

    fn bind(&self, addr: SocketAddr) -> Result<(), Error> {
        if self.fail_bind {
            return Err(Error::bind("scripted bind failure"));
        }
        self.bound.lock().push(addr);
        self.core.set_local_addr(addr);
        Ok(())
    }

    fn close(&self) {
        self.core.close();
    }
}
