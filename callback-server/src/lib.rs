//! GENA event receiver for a UPnP control point.
//!
//! Subscribed devices deliver state changes as HTTP `NOTIFY` requests to the
//! callback URL given at subscription time. [`EventReceiver`] is the small HTTP
//! server behind that URL:
//!
//! 1. Binds a TCP port (ephemeral by default)
//! 2. Accepts one connection at a time and reads a single request
//! 3. Checks `NT: upnp:event`, `NTS: upnp:propchange` and `SID`
//! 4. Parses the `propertyset` body and hands it to an [`EventListener`]
//! 5. Answers `200`, `412` or `400` and closes the connection
//!
//! It knows nothing about subscriptions itself; the listener decides whether a
//! `SID` is known.

mod error;
pub mod propertyset;
mod receiver;

pub use error::{CallbackServerError, Result};
pub use propertyset::parse_property_set;
pub use receiver::{EventListener, EventReceiver, NotificationPayload};
