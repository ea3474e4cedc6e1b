use thiserror::Error;

use crate::executor::ExecutorError;

#[derive(Error, Debug)]
pub enum ControlPointError {
    #[error("Control point is not started")]
    NotStarted,

    #[error("Control point has been terminated")]
    Terminated,

    #[error("Missing required field {field} in {kind}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("Invalid description: {0}")]
    Description(String),

    #[error("HTTP error: {0}")]
    Http(#[from] upnp_http::HttpError),

    #[error("SOAP error: {0}")]
    Soap(#[from] soap_client::SoapError),

    #[error("SSDP error: {0}")]
    Ssdp(#[from] upnp_ssdp::SsdpError),

    #[error("Task rejected: {0}")]
    Rejected(#[from] ExecutorError),

    #[error("No action {action} on {service_id}")]
    NoSuchAction { service_id: String, action: String },

    #[error("Service {0} is not subscribed")]
    NotSubscribed(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ControlPointError {
    pub(crate) fn missing(kind: &'static str, field: &'static str) -> Self {
        ControlPointError::MissingField { kind, field }
    }
}

pub type Result<T> = std::result::Result<T, ControlPointError>;
