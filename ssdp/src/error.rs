//! Error types for SSDP operations.

use thiserror::Error;

/// Errors raised by the SSDP layer.
#[derive(Debug, Error)]
pub enum SsdpError {
    /// Socket creation, option or send failure
    #[error("SSDP socket error: {0}")]
    Io(#[from] std::io::Error),

    /// `search()` was called on a server that has not been started
    #[error("SSDP server is not started")]
    NotStarted,

    /// A datagram that is not a usable SSDP message
    #[error("Invalid SSDP message: {0}")]
    InvalidMessage(String),
}

/// Convenience Result type alias for SSDP operations.
pub type Result<T> = std::result::Result<T, SsdpError>;

impl From<upnp_http::HttpError> for SsdpError {
    fn from(error: upnp_http::HttpError) -> Self {
        SsdpError::InvalidMessage(error.to_string())
    }
}
