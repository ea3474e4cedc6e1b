//! Active discovery: send `M-SEARCH`, collect unicast responses.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, trace};
use upnp_http::{names, HttpRequest};

use crate::address::AddressFamily;
use crate::error::{Result, SsdpError};
use crate::interface::NetworkInterface;
use crate::message::{MessageKind, SsdpMessage};
use crate::server_list::SsdpServer;
use crate::transport::{decode_datagram, DatagramHandler, SsdpTransport};

/// Search target matching every device and service.
pub const ST_ALL: &str = "ssdp:all";

/// Search target matching root devices only.
pub const ST_ROOTDEVICE: &str = "upnp:rootdevice";

/// Receives validated SSDP messages on the transport's receive thread.
pub type MessageListener = Arc<dyn Fn(SsdpMessage) + Send + Sync>;

/// Build an `M-SEARCH` request for `family`.
pub fn search_request(family: AddressFamily, search_target: &str, mx: u32) -> HttpRequest {
    let mut request = HttpRequest::new("M-SEARCH", "*");
    request.set_header(names::HOST, family.host_header());
    request.set_header(names::MAN, "\"ssdp:discover\"");
    request.set_header(names::MX, mx.max(1).to_string());
    request.set_header(names::ST, search_target);
    request.set_header(names::USER_AGENT, upnp_http::USER_AGENT);
    request
}

/// Search server for one interface address.
pub struct SsdpSearchServer {
    transport: SsdpTransport,
    listener: MessageListener,
    segment_check: bool,
}

impl SsdpSearchServer {
    pub fn new(interface: NetworkInterface, listener: MessageListener) -> Self {
        Self {
            transport: SsdpTransport::new(interface, 0),
            listener,
            segment_check: true,
        }
    }

    /// Drop IPv4 responses from outside the interface subnet (default on).
    pub fn with_segment_check(mut self, enabled: bool) -> Self {
        self.segment_check = enabled;
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn is_started(&self) -> bool {
        self.transport.is_started()
    }

    /// Multicast an `M-SEARCH` for `search_target`, or `ssdp:all` when `None`.
    ///
    /// Fails with [`SsdpError::NotStarted`] unless the server is started.
    pub fn search(&self, search_target: Option<&str>, mx: u32) -> Result<()> {
        if !self.transport.is_started() {
            return Err(SsdpError::NotStarted);
        }
        let target = search_target.unwrap_or(ST_ALL);
        let request = search_request(self.transport.interface().family(), target, mx);
        debug!("Sending M-SEARCH for {} on {}", target, self.transport.interface().name);
        self.transport.send(&request.to_bytes())
    }

    fn handler(&self) -> DatagramHandler {
        let interface = self.transport.interface().clone();
        let listener = Arc::clone(&self.listener);
        let segment_check = self.segment_check;
        Arc::new(move |data: &[u8], source: SocketAddr| {
            if let Some(message) = decode_datagram(data, source, &interface, segment_check) {
                handle_response(message, source, listener.as_ref());
            }
        })
    }
}

fn handle_response(message: SsdpMessage, source: SocketAddr, listener: &(dyn Fn(SsdpMessage) + Send + Sync)) {
    if message.kind() != MessageKind::SearchResponse(200) {
        trace!("Ignoring {} from {}", message, source);
        return;
    }
    if message.is_invalid_location(&source.ip()) {
        debug!("Ignoring search response with invalid location from {}: {}", source, message);
        return;
    }
    listener(message);
}

impl SsdpServer for SsdpSearchServer {
    fn interface(&self) -> &NetworkInterface {
        self.transport.interface()
    }

    fn open(&self) -> Result<()> {
        self.transport.open()
    }

    fn start(&self) -> Result<()> {
        self.transport.start(self.handler())
    }

    fn stop(&self) {
        self.transport.stop(true);
    }

    fn close(&self) {
        self.transport.close();
    }
}
