//! Asynchronous-completion and endpoint-lifecycle core for non-blocking
//! transports.
//!
//! tidewire provides the machinery a non-blocking transport framework sits on:
//! single-assignment completion tokens with listener notification, ordered
//! single-threaded execution contexts with deterministic endpoint
//! distribution, and the bootstrap sequencing that takes an endpoint from
//! creation through registration to a bound local address — including the
//! server-side hand-off of accepted children to a worker pool.
//!
//! # Layers
//!
//! - [`promise`] — [`Promise`]/[`CompletionFuture`] over one result cell;
//!   exactly-once listener notification in registration order, blocking waits
//!   with deadlock detection.
//! - [`executor`] — the [`EventExecutor`] contract, the
//!   [`SingleThreadExecutor`] loop, and [`ExecutorPool`] with power-of-two or
//!   modulo index selection.
//! - [`endpoint`] — the [`Endpoint`] seam: registration state, handler chain,
//!   typed options and attributes, TCP listener and stream endpoints.
//! - [`bootstrap`] — [`Bootstrap`] and [`ServerBootstrap`] sequencers and the
//!   [`AcceptHandoff`] backpressure-aware child hand-off.
//!
//! # Threading model
//!
//! Registration permanently binds an endpoint to one execution context. Every
//! operation on the endpoint after that runs as a work item on its context,
//! and completion-token listeners fire on the token's owning context, so
//! handler code never needs its own locking. Blocking on a token from its own
//! context is refused with a deadlock-kind error instead of hanging the loop.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tidewire::bootstrap::ServerBootstrap;
//! use tidewire::endpoint::{Endpoint, EndpointOption, Handler, TcpServerEndpoint};
//! use tidewire::executor::ExecutorPool;
//!
//! struct ChildHandler;
//! impl Handler for ChildHandler {}
//!
//! # fn main() -> Result<(), tidewire::error::Error> {
//! let acceptors = ExecutorPool::with_prefix(1, "acceptor")?;
//! let workers = ExecutorPool::with_prefix(4, "worker")?;
//!
//! let bound = ServerBootstrap::new()
//!     .pool(acceptors)
//!     .worker_pool(workers)
//!     .factory(|| Ok(TcpServerEndpoint::new() as Arc<dyn Endpoint>))
//!     .option(EndpointOption::ReuseAddr(true))
//!     .child_handler(Arc::new(ChildHandler))
//!     .bind_to("127.0.0.1:0".parse().expect("literal address"))?;
//!
//! let endpoint = bound.sync()?;
//! println!("listening on {:?}", endpoint.local_addr());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod promise;
pub mod test_utils;

pub use bootstrap::{AcceptHandoff, Bootstrap, ServerBootstrap, ACCEPT_RECOVERY_DELAY};
pub use endpoint::{Endpoint, EndpointFactory, EndpointFuture, EndpointOption, Handler};
pub use error::{Error, ErrorKind};
pub use executor::{EventExecutor, EventExecutorExt, ExecutorPool, SingleThreadExecutor};
pub use promise::{Completion, CompletionFuture, Promise};
