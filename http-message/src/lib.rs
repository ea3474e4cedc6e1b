//! # UPnP HTTP
//!
//! HTTP/1.x framing shared by every part of the control point:
//!
//! - SSDP datagrams are HTTP messages over UDP
//! - GENA `NOTIFY` callbacks arrive as HTTP requests
//! - SOAP actions and subscriptions are HTTP requests to the device
//! - device and service descriptions are fetched with `GET`
//!
//! [`HttpMessage`] handles header maps, `Content-Length` and chunked bodies
//! in both directions. [`HttpClient`] is a small blocking client with
//! keep-alive and redirect support.
//!
//! ```
//! use upnp_http::{HttpRequest, HttpResponse};
//!
//! let mut request = HttpRequest::new("NOTIFY", "/event");
//! request.set_header("SID", "uuid:1234");
//! request.set_body("<e:propertyset/>", true);
//!
//! let parsed = HttpRequest::from_bytes(&request.to_bytes()).unwrap();
//! assert_eq!(parsed.method(), "NOTIFY");
//! assert_eq!(parsed.header("sid"), Some("uuid:1234"));
//!
//! let response = HttpResponse::new(200);
//! assert!(response.is_success());
//! ```

mod client;
mod error;
pub mod headers;
pub mod message;
pub mod urls;

pub use client::{HttpClient, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, USER_AGENT};
pub use error::{HttpError, Result};
pub use headers::{names, HttpHeaders};
pub use message::{
    reason_phrase, HttpMessage, HttpRequest, HttpResponse, RequestLine, StartLine, StatusLine,
};
