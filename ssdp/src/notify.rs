//! Passive discovery: `NOTIFY` alive / byebye / update on the SSDP group.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::address::SSDP_PORT;
use crate::error::Result;
use crate::interface::NetworkInterface;
use crate::message::{MessageKind, SsdpMessage};
use crate::search::MessageListener;
use crate::server_list::SsdpServer;
use crate::transport::{decode_datagram, DatagramHandler, SsdpTransport};

/// Notify receiver for one interface address, bound to port 1900.
pub struct SsdpNotifyReceiver {
    transport: SsdpTransport,
    listener: MessageListener,
    segment_check: bool,
}

impl SsdpNotifyReceiver {
    pub fn new(interface: NetworkInterface, listener: MessageListener) -> Self {
        Self::with_port(interface, SSDP_PORT, listener)
    }

    /// Receiver on a non-standard port.
    pub fn with_port(interface: NetworkInterface, port: u16, listener: MessageListener) -> Self {
        Self {
            transport: SsdpTransport::new(interface, port),
            listener,
            segment_check: true,
        }
    }

    pub fn with_segment_check(mut self, enabled: bool) -> Self {
        self.segment_check = enabled;
        self
    }

    pub fn is_started(&self) -> bool {
        self.transport.is_started()
    }

    fn handler(&self) -> DatagramHandler {
        let interface = self.transport.interface().clone();
        let listener = Arc::clone(&self.listener);
        let segment_check = self.segment_check;
        Arc::new(move |data: &[u8], source: SocketAddr| {
            if let Some(message) = decode_datagram(data, source, &interface, segment_check) {
                if accept_notify(&message, source) {
                    listener(message);
                }
            }
        })
    }
}

/// Whether a decoded message is a notification worth handing on.
///
/// Byebye carries no location, so only alive and update are location-checked.
pub(crate) fn accept_notify(message: &SsdpMessage, source: SocketAddr) -> bool {
    if message.kind() != MessageKind::Notify {
        trace!("Ignoring {} from {} on the notify socket", message, source);
        return false;
    }
    if message.nts().is_none() {
        trace!("Ignoring NOTIFY without a known NTS from {}", source);
        return false;
    }
    if !message.is_byebye() && message.is_invalid_location(&source.ip()) {
        debug!("Ignoring NOTIFY with invalid location from {}: {}", source, message);
        return false;
    }
    true
}

impl SsdpServer for SsdpNotifyReceiver {
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
