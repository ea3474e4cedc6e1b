//! Error types for HTTP message framing and the blocking client.

use thiserror::Error;

/// Errors raised while reading, writing or exchanging HTTP messages.
///
/// Everything except [`HttpError::Io`] is a protocol violation: the peer sent
/// something the codec cannot frame, and retrying the same read is pointless.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Socket or stream failure, including timeouts and unexpected EOF
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request line or status line is missing or lacks required tokens
    #[error("Malformed start line: {0:?}")]
    StartLine(String),

    /// `Content-Length` is present but not a decimal number
    #[error("Invalid Content-Length: {0:?}")]
    ContentLength(String),

    /// A chunk size line is not hexadecimal
    #[error("Invalid chunk size: {0:?}")]
    ChunkSize(String),

    /// A chunk is not followed by CRLF
    #[error("Malformed chunk: {0}")]
    MalformedChunk(String),

    /// The stream ended before the announced number of body bytes arrived
    #[error("Truncated body: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The stream ended before the zero-length terminating chunk
    #[error("Missing terminating chunk")]
    MissingLastChunk,

    /// The URL cannot be used for a plain HTTP exchange
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The peer answered with a status code the caller did not accept
    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    /// Redirect chain longer than the client follows
    #[error("Too many redirects while fetching {0}")]
    TooManyRedirects(String),
}

impl HttpError {
    /// Whether this failure is a transient transport error rather than a
    /// protocol violation.
    pub fn is_io(&self) -> bool {
        matches!(self, HttpError::Io(_))
    }
}

/// Convenience Result alias for HTTP operations.
pub type Result<T> = std::result::Result<T, HttpError>;
