//! Closed stand-in endpoint used when endpoint creation itself fails.

use std::net::SocketAddr;
use std::sync::Arc;

use super::{AttrKey, AttrValue, Endpoint, EndpointCore, EndpointOption, HandlerChain};
use crate::error::Error;
use crate::executor::EventExecutor;

/// An endpoint that was never usable.
///
/// When the endpoint factory fails there is no real endpoint to hang the
/// failed completion token on, so the bootstrap layer substitutes this
/// stand-in. Every operation fails or is a no-op; the endpoint reports closed
/// from birth.
#[derive(Debug)]
pub struct FailedEndpoint {
    core: EndpointCore,
}

impl FailedEndpoint {
    /// Creates the stand-in.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let core = EndpointCore::new();
        core.close();
        Arc::new(Self { core })
    }
}

impl Endpoint for FailedEndpoint {
    fn executor(&self) -> Option<Arc<dyn EventExecutor>> {
        None
    }

    fn is_registered(&self) -> bool {
        false
    }

    fn is_open(&self) -> bool {
        false
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn chain(&self) -> &HandlerChain {
        self.core.chain()
    }

    fn auto_read(&self) -> bool {
        false
    }

    fn set_auto_read(&self, _enabled: bool) {}

    fn set_option(&self, _option: &EndpointOption) -> Result<(), Error> {
        Err(Error::new(
            crate::error::ErrorKind::EndpointClosed,
            "failed endpoint accepts no options",
        ))
    }

    fn set_attribute(&self, key: AttrKey, value: AttrValue) {
        self.core.set_attribute(key, value);
    }

    fn attribute(&self, key: AttrKey) -> Option<AttrValue> {
        self.core.attribute(key)
    }

    fn register(&self, _executor: Arc<dyn EventExecutor>) -> Result<(), Error> {
        Err(Error::registration("failed endpoint cannot be registered"))
    }

    fn bind(&self, _addr: SocketAddr) -> Result<(), Error> {
        Err(Error::bind("failed endpoint cannot be bound"))
    }

    fn close(&self) {
        self.core.close();
    }
}
