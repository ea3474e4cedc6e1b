//! Error types for the SOAP client

use thiserror::Error;
use upnp_http::HttpError;

/// Errors that can occur during SOAP and GENA requests
#[derive(Debug, Error)]
pub enum SoapError {
    /// Network or HTTP framing error
    #[error("Network/HTTP error: {0}")]
    Http(#[from] HttpError),

    /// XML parsing error
    #[error("XML parsing error: {0}")]
    Parse(String),

    /// SOAP fault returned by the device, with its UPnP error code
    #[error("SOAP fault: error code {0}")]
    Fault(u16),

    /// Unexpected HTTP status
    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    /// A response header the protocol requires is missing
    #[error("Missing {0} header in response")]
    MissingHeader(&'static str),
}

pub type Result<T> = std::result::Result<T, SoapError>;
