//! TCP endpoints: a socket2-backed listener and an accepted-stream wrapper.
//!
//! Sockets are nonblocking from the start; the readiness-polling loop that
//! would drive them lives outside this crate. [`TcpServerEndpoint::accept_now`]
//! is the seam that loop calls into: it accepts whatever is pending and feeds
//! accepted children through the handler chain, which is where the
//! accept-handoff protocol picks them up.

use std::io;
use std::net::{self, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockRef, Socket, Type};

use super::{AttrKey, AttrValue, Endpoint, EndpointCore, EndpointOption, HandlerChain};
use crate::error::{Error, ErrorKind};
use crate::executor::EventExecutor;

const DEFAULT_BACKLOG: u32 = 128;

#[derive(Debug, Clone)]
struct ListenerConfig {
    reuse_addr: bool,
    backlog: u32,
    ttl: Option<u32>,
}

/// A TCP listener endpoint.
#[derive(Debug)]
pub struct TcpServerEndpoint {
    core: EndpointCore,
    config: Mutex<ListenerConfig>,
    listener: Mutex<Option<net::TcpListener>>,
}

impl TcpServerEndpoint {
    /// Creates an unbound, unregistered listener endpoint.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            core: EndpointCore::new(),
            config: Mutex::new(ListenerConfig {
                reuse_addr: false,
                backlog: DEFAULT_BACKLOG,
                ttl: None,
            }),
            listener: Mutex::new(None),
        })
    }

    /// Accepts one pending connection, if any.
    ///
    /// Returns `Ok(None)` when nothing is pending or auto-read is disabled
    /// (the backpressure state set by the accept-handoff protocol). An
    /// accepted child is dispatched through the handler chain before being
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint is closed or unbound, or when the
    /// accept syscall fails with something other than `WouldBlock`.
    pub fn accept_now(self: &Arc<Self>) -> Result<Option<Arc<dyn Endpoint>>, Error> {
        if !self.core.is_open() {
            return Err(Error::new(ErrorKind::EndpointClosed, "listener is closed"));
        }
        if !self.core.auto_read() {
            return Ok(None);
        }
        let guard = self.listener.lock();
        let Some(listener) = guard.as_ref() else {
            return Err(Error::bind("listener is not bound"));
        };
        match listener.accept() {
            Ok((stream, _peer)) => {
                drop(guard);
                let child: Arc<dyn Endpoint> = TcpStreamEndpoint::from_accepted(stream)?;
                let acceptor: Arc<dyn Endpoint> = Arc::clone(self) as Arc<dyn Endpoint>;
                self.core
                    .chain()
                    .fire_child_accepted(&acceptor, Arc::clone(&child));
                Ok(Some(child))
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl Endpoint for TcpServerEndpoint {
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

    fn set_option(&self, option: &EndpointOption) -> Result<(), Error> {
        match option {
            EndpointOption::ReuseAddr(enabled) => {
                self.config.lock().reuse_addr = *enabled;
                Ok(())
            }
            EndpointOption::Backlog(backlog) => {
                self.config.lock().backlog = *backlog;
                Ok(())
            }
            EndpointOption::Ttl(ttl) => {
                let guard = self.listener.lock();
                match guard.as_ref() {
                    Some(listener) => listener.set_ttl(*ttl).map_err(Error::from),
                    None => {
                        drop(guard);
                        self.config.lock().ttl = Some(*ttl);
                        Ok(())
                    }
                }
            }
            EndpointOption::AutoRead(enabled) => {
                self.core.set_auto_read(*enabled);
                Ok(())
            }
            EndpointOption::NoDelay(_) | EndpointOption::KeepAlive(_) => Err(Error::new(
                ErrorKind::Unsupported,
                format!("listener endpoints do not support {option:?}"),
            )),
        }
    }

    fn set_attribute(&self, key: AttrKey, value: AttrValue) {
        self.core.set_attribute(key, value);
    }

    fn attribute(&self, key: AttrKey) -> Option<AttrValue> {
        self.core.attribute(key)
    }

    fn register(&self, executor: Arc<dyn EventExecutor>) -> Result<(), Error> {
        self.core.register(executor)
    }

    fn bind(&self, addr: SocketAddr) -> Result<(), Error> {
        if !self.core.is_open() {
            return Err(Error::new(ErrorKind::EndpointClosed, "listener is closed"));
        }
        let mut slot = self.listener.lock();
        if slot.is_some() {
            return Err(Error::bind("listener is already bound"));
        }
        let config = self.config.lock().clone();

        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(Error::from)?;
        if config.reuse_addr {
            socket.set_reuse_address(true).map_err(Error::from)?;
        }
        socket.bind(&addr.into()).map_err(Error::from)?;
        socket
            .listen(config.backlog.min(i32::MAX as u32) as i32)
            .map_err(Error::from)?;
        socket.set_nonblocking(true).map_err(Error::from)?;

        let listener: net::TcpListener = socket.into();
        if let Some(ttl) = config.ttl {
            listener.set_ttl(ttl).map_err(Error::from)?;
        }
        let local = listener.local_addr().map_err(Error::from)?;
        self.core.set_local_addr(local);
        *slot = Some(listener);
        Ok(())
    }

    fn close(&self) {
        if self.core.close() {
            // Dropping the listener releases the descriptor.
            *self.listener.lock() = None;
        }
    }
}

/// A connected TCP stream endpoint, created from an accepted connection.
#[derive(Debug)]
pub struct TcpStreamEndpoint {
    core: EndpointCore,
    peer_addr: Option<SocketAddr>,
    stream: Mutex<Option<net::TcpStream>>,
}

impl TcpStreamEndpoint {
    /// Wraps an accepted stream, switching it to nonblocking mode.
    ///
    /// # Errors
    ///
    /// Returns an error when the stream cannot be made nonblocking.
    pub fn from_accepted(stream: net::TcpStream) -> Result<Arc<Self>, Error> {
        stream.set_nonblocking(true).map_err(Error::from)?;
        let core = EndpointCore::new();
        if let Ok(local) = stream.local_addr() {
            core.set_local_addr(local);
        }
        let peer_addr = stream.peer_addr().ok();
        Ok(Arc::new(Self {
            core,
            peer_addr,
            stream: Mutex::new(Some(stream)),
        }))
    }

    /// The remote peer's address, if known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

impl Endpoint for TcpStreamEndpoint {
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

    fn set_option(&self, option: &EndpointOption) -> Result<(), Error> {
        let guard = self.stream.lock();
        let Some(stream) = guard.as_ref() else {
            return Err(Error::new(ErrorKind::EndpointClosed, "stream is closed"));
        };
        match option {
            EndpointOption::NoDelay(enabled) => stream.set_nodelay(*enabled).map_err(Error::from),
            EndpointOption::KeepAlive(enabled) => SockRef::from(stream)
                .set_keepalive(*enabled)
                .map_err(Error::from),
            EndpointOption::Ttl(ttl) => stream.set_ttl(*ttl).map_err(Error::from),
            EndpointOption::AutoRead(enabled) => {
                self.core.set_auto_read(*enabled);
                Ok(())
            }
            EndpointOption::ReuseAddr(_) | EndpointOption::Backlog(_) => Err(Error::new(
                ErrorKind::Unsupported,
                format!("stream endpoints do not support {option:?}"),
            )),
        }
    }

    fn set_attribute(&self, key: AttrKey, value: AttrValue) {
        self.core.set_attribute(key, value);
    }

    fn attribute(&self, key: AttrKey) -> Option<AttrValue> {
        self.core.attribute(key)
    }

    fn register(&self, executor: Arc<dyn EventExecutor>) -> Result<(), Error> {
        self.core.register(executor)
    }

    fn bind(&self, _addr: SocketAddr) -> Result<(), Error> {
        Err(Error::new(
            ErrorKind::Unsupported,
            "stream endpoints cannot bind; they inherit the accepted socket",
        ))
    }

    fn close(&self) {
        if self.core.close() {
            *self.stream.lock() = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_addr() -> SocketAddr {
        "127.0.0.1:0".parse().expect("literal address")
    }

    #[test]
    fn bind_assigns_an_ephemeral_port() {
        let endpoint = TcpServerEndpoint::new();
        endpoint.bind(any_addr()).expect("bind to 127.0.0.1:0");
        let local = endpoint.local_addr().expect("bound address recorded");
        assert_ne!(local.port(), 0);
    }

    #[test]
    fn double_bind_is_rejected() {
        let endpoint = TcpServerEndpoint::new();
        endpoint.bind(any_addr()).expect("first bind");
        let err = endpoint.bind(any_addr()).expect_err("second bind");
        assert_eq!(err.kind(), ErrorKind::Bind);
    }

    #[test]
    fn accept_now_returns_pending_connection() {
        let endpoint = TcpServerEndpoint::new();
        endpoint.bind(any_addr()).expect("bind");
        let local = endpoint.local_addr().expect("bound address");

        assert!(endpoint.accept_now().expect("no pending").is_none());

        let client = net::TcpStream::connect(local).expect("connect to listener");
        // Nonblocking accept may need a moment for the connection to land.
        let mut accepted = None;
        for _ in 0..50 {
            if let Some(child) = endpoint.accept_now().expect("accept") {
                accepted = Some(child);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        let child = accepted.expect("accepted child endpoint");
        assert!(child.is_open());
        drop(client);
    }

    #[test]
    fn accept_now_respects_auto_read_backpressure() {
        let endpoint = TcpServerEndpoint::new();
        endpoint.bind(any_addr()).expect("bind");
        let local = endpoint.local_addr().expect("bound address");
        let _client = net::TcpStream::connect(local).expect("connect");

        endpoint.set_auto_read(false);
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(endpoint
            .accept_now()
            .expect("suppressed accept")
            .is_none());
        endpoint.set_auto_read(true);
    }

    #[test]
    fn closed_listener_rejects_accept() {
        let endpoint = TcpServerEndpoint::new();
        endpoint.bind(any_addr()).expect("bind");
        endpoint.close();
        assert!(!endpoint.is_open());
        let err = match endpoint.accept_now() {
            Err(err) => err,
            Ok(_) => panic!("closed listener must reject accepts"),
        };
        assert_eq!(err.kind(), ErrorKind::EndpointClosed);
    }

    #[test]
    fn listener_rejects_stream_options() {
        let endpoint = TcpServerEndpoint::new();
        let err = endpoint
            .set_option(&EndpointOption::NoDelay(true))
            .expect_err("NoDelay is a stream option");
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
