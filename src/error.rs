//! Error types for mailsweep

use thiserror::Error;

/// Failures surfaced by the engine.
///
/// Server `NO`/`BAD` completions are *statuses* ([`crate::Status`]), not
/// errors: the session stays alive and the caller decides what to do.
/// Everything here is a failure of the machinery around the conversation.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("certificate rejected: {0}")]
    Certificate(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("timeout period expired: {0}")]
    Timeout(String),

    #[error("connection closed by server")]
    Closed,

    #[error("session is not connected")]
    NotConnected,

    #[error("wait interrupted by wake signal")]
    Interrupted,
}

impl Error {
    /// Whether this failure tore down the transport.
    ///
    /// Transport failures close the connection and are candidates for the
    /// silent-reconnect recovery policy; anything else is surfaced as-is.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout(_) | Self::Closed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
