//! SSDP discovery for a UPnP control point.
//!
//! Each usable interface address gets its own sockets: a
//! [`SsdpSearchServer`] on an ephemeral port that sends `M-SEARCH` and
//! receives unicast responses, and a [`SsdpNotifyReceiver`] bound to port 1900
//! that listens for `NOTIFY` announcements on the multicast group. Both run a
//! single receive thread per socket and hand validated [`SsdpMessage`]s to a
//! listener.
//!
//! ```no_run
//! use std::sync::Arc;
//! use upnp_ssdp::{NetworkInterface, Protocol, SsdpMessage, SsdpSearchServerList};
//!
//! let interfaces = NetworkInterface::list(Protocol::IpV4Only, &[])?;
//! let servers = SsdpSearchServerList::for_interfaces(
//!     &interfaces,
//!     true,
//!     Arc::new(|message: SsdpMessage| {
//!         tracing::info!("Found {} at {:?}", message.uuid(), message.location());
//!     }),
//! );
//! servers.start();
//! servers.search(None, 1)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod address;
mod error;
pub mod interface;
pub mod message;
mod notify;
mod search;
mod server_list;
pub mod transport;

pub use address::{is_link_local, AddressFamily, SSDP_MULTICAST_V4, SSDP_MULTICAST_V6, SSDP_PORT};
pub use error::{Result, SsdpError};
pub use interface::{NetworkInterface, Protocol};
pub use message::{parse_cache_control, parse_usn, MessageKind, Nts, SsdpMessage, DEFAULT_MAX_AGE, MAX_MAX_AGE};
pub use notify::SsdpNotifyReceiver;
pub use search::{search_request, MessageListener, SsdpSearchServer, ST_ALL, ST_ROOTDEVICE};
pub use server_list::{SsdpNotifyReceiverList, SsdpSearchServerList, SsdpServer, SsdpServerList};
