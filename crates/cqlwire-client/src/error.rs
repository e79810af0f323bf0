//! Client error types.

use std::sync::Arc;

use cqlwire_proto::{Opcode, ServerError};
use thiserror::Error;

use crate::context::Interrupted;
use crate::limiter::LimiterError;

/// Result alias for request-path operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Request-path errors. Each variant names the layer that failed.
#[derive(Debug, Error)]
pub enum Error {
    /// Frame encode or decode failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] cqlwire_proto::Error),

    /// The limiter refused admission; nothing was sent.
    #[error("admission refused: {0}")]
    Admission(#[from] LimiterError),

    /// Preparing the statement failed. Shared by every waiter on the key.
    #[error("prepare failed: {0}")]
    Prepare(Arc<Error>),

    /// The server answered with an ERROR frame.
    #[error("{0}")]
    Server(ServerError),

    /// The server answered with a frame the request does not expect.
    #[error("unexpected {0} response")]
    UnexpectedResponse(Opcode),

    /// Transport failure reported by the connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// The caller's deadline passed.
    #[error("request timed out")]
    Timeout,

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// A background task ended without producing a result.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the server no longer knows the prepared id.
    pub fn is_unprepared(&self) -> bool {
        matches!(self, Error::Server(e) if e.is_unprepared())
    }
}

impl From<Interrupted> for Error {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::Cancelled => Error::Cancelled,
            Interrupted::DeadlineExceeded => Error::Timeout,
        }
    }
}
