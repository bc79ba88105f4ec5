//! Error types for stub registration, body encoding and response delivery.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the resolution core.
///
/// A request that matches no stub is not an error; it resolves to
/// [`Response::not_configured`](crate::Response::not_configured).
#[derive(Debug, Error)]
pub enum Error {
    /// A charset named in a header or passed explicitly is not known.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// Writing status, headers or body to the transport failed.
    #[error("transport write failed: {0}")]
    Transport(#[from] std::io::Error),

    /// The stub definition was rejected at registration.
    #[error("invalid stub: {0}")]
    InvalidStub(String),

    /// The configured response body could not be produced.
    #[error("invalid response body: {0}")]
    InvalidBody(String),
}
