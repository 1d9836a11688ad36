//! Error types for the Datalith client.

use std::io;

use thiserror::Error;

/// Errors that can occur when using the Datalith client.
#[derive(Debug, Error)]
pub enum Error {
    /// The store rejected the request as malformed (HTTP 400).
    #[error("bad request")]
    BadRequest,

    /// The upload exceeds the store's size limit (HTTP 413).
    #[error("payload too large")]
    PayloadTooLarge,

    /// The resource to convert does not exist (HTTP 404 on convert).
    ///
    /// Fetches and deletes report absence through their return value instead.
    #[error("not found")]
    NotFound,

    /// The request or idle timeout elapsed before the exchange completed.
    #[error("request timed out")]
    Timeout,

    /// A timeout value is outside the accepted range.
    #[error("invalid timeout: {0}ms")]
    InvalidTimeout(u64),

    /// A center-crop ratio is not of the form `<number>:<number>`.
    #[error("invalid center crop: {0:?}")]
    InvalidCenterCrop(String),

    /// An image resolution is neither `original` nor `<n>x`.
    #[error("invalid resolution: {0:?}")]
    InvalidResolution(String),

    /// The response body or headers do not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The store answered with a status the protocol does not define.
    #[error("unexpected HTTP status {0}")]
    UnknownStatus(u16),

    /// Connection error (network failure, DNS resolution, body read failure, etc.).
    #[error("connection error: {0}")]
    Connection(String),

    /// Client configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Returns `true` if either timeout fired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns `true` if this is the convert-only not-found failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns `true` for a 400 from the store and for request parameters
    /// rejected before transmission.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::BadRequest | Self::InvalidCenterCrop(_) | Self::InvalidResolution(_)
        )
    }

    /// Returns `true` if the error was raised before any network I/O.
    pub fn is_client_side(&self) -> bool {
        matches!(
            self,
            Self::InvalidTimeout(_)
                | Self::InvalidCenterCrop(_)
                | Self::InvalidResolution(_)
                | Self::Configuration(_)
        )
    }

    /// Returns the HTTP status the store answered with, if one caused this error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::BadRequest => Some(400),
            Self::NotFound => Some(404),
            Self::PayloadTooLarge => Some(413),
            Self::UnknownStatus(status) => Some(*status),
            _ => None,
        }
    }
}

/// Body read failures: a governed stream reports a fired deadline as
/// [`io::ErrorKind::TimedOut`].
impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::TimedOut {
            Self::Timeout
        } else {
            Self::Connection(error.to_string())
        }
    }
}
