//! Error types for the event receiver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallbackServerError {
    #[error("Event receiver I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid property set: {0}")]
    PropertySet(String),
}

pub type Result<T> = std::result::Result<T, CallbackServerError>;

impl From<quick_xml::Error> for CallbackServerError {
    fn from(error: quick_xml::Error) -> Self {
        CallbackServerError::PropertySet(error.to_string())
    }
}
