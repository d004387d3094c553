//! Error types and error handling strategy for tidewire.
//!
//! Errors are explicit and typed (no stringly-typed errors) and cheap to clone:
//! a completed token may hand the same failure to many listeners, so the payload
//! is reference-counted rather than duplicated.
//!
//! # Error Categories
//!
//! - **Configuration**: missing pool, factory, address, or handler; always
//!   surfaced synchronously at `validate()`/`bind()` call time.
//! - **Endpoint lifecycle**: creation, registration, and bind failures; these
//!   travel through completion tokens, never through panics.
//! - **Token misuse**: double completion and self-deadlocking waits are
//!   programmer errors and are surfaced immediately.
//! - **Cancellation**: a terminal state of its own, reported as a
//!   cancellation-kind failure so listeners can distinguish it.

use core::fmt;
use std::io;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Configuration ===
    /// A required piece of bootstrap configuration is missing.
    Configuration,

    // === Endpoint lifecycle ===
    /// The endpoint factory failed to produce an endpoint.
    EndpointCreation,
    /// Registering an endpoint with an execution context failed.
    Registration,
    /// Binding an endpoint to a local address failed.
    Bind,
    /// The endpoint is closed or was never opened.
    EndpointClosed,
    /// The requested operation is not supported by this endpoint.
    Unsupported,

    // === Completion tokens ===
    /// The operation was cancelled.
    Cancelled,
    /// A blocking wait was attempted from the token's own executor thread.
    DeadlockWait,

    // === Execution contexts ===
    /// A work item was refused by a shut-down execution context.
    Rejected,

    // === Transport / OS ===
    /// An underlying I/O operation failed.
    Io,

    // === Internal ===
    /// An invariant the crate relies on was violated.
    Internal,
}

impl ErrorKind {
    /// Short static description of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::EndpointCreation => "endpoint creation",
            Self::Registration => "registration",
            Self::Bind => "bind",
            Self::EndpointClosed => "endpoint closed",
            Self::Unsupported => "unsupported",
            Self::Cancelled => "cancelled",
            Self::DeadlockWait => "deadlock wait",
            Self::Rejected => "rejected",
            Self::Io => "io",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The crate-wide error type.
///
/// Cloning is cheap: the message is an `Arc<str>` shared between clones, so a
/// failed token can distribute the same cause to every listener.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Arc<str>,
}

impl Error {
    /// Creates an error of the given kind with a message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Arc::from(message.into().into_boxed_str()),
        }
    }

    /// A configuration error (missing pool, factory, address, handler, ...).
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// An endpoint-creation error.
    pub fn endpoint_creation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EndpointCreation, message)
    }

    /// A registration error.
    pub fn registration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Registration, message)
    }

    /// A bind error.
    pub fn bind(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Bind, message)
    }

    /// The standard cancellation failure stored by a cancelled token.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation was cancelled")
    }

    /// A rejected-work-item error, raised when an execution context refuses a
    /// submission because it is shut down.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, message)
    }

    /// The failure raised when a wait would deadlock its own executor.
    #[must_use]
    pub fn deadlock_wait() -> Self {
        Self::new(
            ErrorKind::DeadlockWait,
            "blocking wait from the token's own executor thread would deadlock",
        )
    }

    /// An internal invariant violation.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if this is a cancellation-kind failure.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self.kind, ErrorKind::Configuration)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string())
    }
}
