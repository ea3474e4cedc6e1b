//! Per-interface multicast socket with a dedicated receive thread.

use std::io;
use std::net::{IpAddr, SocketAddr, SocketAddrV6, UdpSocket};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, trace, warn};

use crate::address::{AddressFamily, SSDP_MULTICAST_V4, SSDP_MULTICAST_V6, SSDP_TTL};
use crate::error::Result;
use crate::interface::NetworkInterface;
use crate::message::SsdpMessage;

/// Size of the datagram receive buffer.
pub const RECEIVE_BUFFER_SIZE: usize = 2048;

/// Receive timeout; bounds how long a stop request goes unnoticed.
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(500);

/// How long `stop(true)` waits for the receive thread.
const JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Callback for raw datagrams, invoked on the receive thread.
pub type DatagramHandler = Arc<dyn Fn(&[u8], SocketAddr) + Send + Sync>;

/// One multicast UDP socket bound to one interface address.
///
/// A bind port of 0 gives an ephemeral unicast socket used for `M-SEARCH`;
/// any other port binds the wildcard address and joins the SSDP group.
pub struct SsdpTransport {
    interface: NetworkInterface,
    bind_port: u16,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    task: Mutex<Option<ReceiveTask>>,
}

impl SsdpTransport {
    pub fn new(interface: NetworkInterface, bind_port: u16) -> Self {
        Self {
            interface,
            bind_port,
            socket: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn interface(&self) -> &NetworkInterface {
        &self.interface
    }

    /// Create and bind the socket. Reopening closes the previous socket first.
    pub fn open(&self) -> Result<()> {
        if self.is_open() {
            debug!("Reopening SSDP socket on {}", self.interface.name);
            self.close();
        }
        let socket = create_socket(&self.interface, self.bind_port)?;
        *self.socket.lock() = Some(Arc::new(socket));
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.socket.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .lock()
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    /// Spawn the receive thread. A no-op when already started or not open.
    pub fn start(&self, handler: DatagramHandler) -> Result<()> {
        let Some(socket) = self.socket.lock().clone() else {
            debug!("SSDP socket on {} is not open, not starting", self.interface.name);
            return Ok(());
        };
        let mut task = self.task.lock();
        if task.is_none() {
            *task = Some(ReceiveTask::spawn(
                socket,
                self.interface.clone(),
                self.bind_port != 0,
                handler,
            )?);
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Signal the receive thread to end, optionally waiting for it.
    ///
    /// Calling this when not started is a no-op.
    pub fn stop(&self, wait: bool) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop(wait);
        }
    }

    pub fn close(&self) {
        self.stop(true);
        self.socket.lock().take();
    }

    /// Multicast `data` to the SSDP group. Silently ignored when not open.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        let Some(socket) = self.socket.lock().clone() else {
            trace!("SSDP socket on {} is closed, dropping send", self.interface.name);
            return Ok(());
        };
        let target = self.interface.family().group_socket_addr(self.interface.scope_id);
        socket.send_to(data, target)?;
        Ok(())
    }
}

impl Drop for SsdpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

struct ReceiveTask {
    cancel: Arc<AtomicBool>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl ReceiveTask {
    fn spawn(
        socket: Arc<UdpSocket>,
        interface: NetworkInterface,
        join_group: bool,
        handler: DatagramHandler,
    ) -> io::Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = channel::bounded(1);
        let thread_cancel = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name(format!("ssdp-{}", interface.name))
            .spawn(move || {
                receive_loop(&socket, &interface, join_group, &thread_cancel, handler.as_ref());
                let _ = done_tx.send(());
            })?;
        Ok(Self {
            cancel,
            done,
            handle: Some(handle),
        })
    }

    fn stop(mut self, wait: bool) {
        self.cancel.store(true, Ordering::SeqCst);
        if !wait {
            return;
        }
        match self.done.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        warn!("SSDP receive thread panicked");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                // std threads cannot be aborted; the cancel flag ends it on the next timeout
                warn!("SSDP receive thread did not stop within {:?}, detaching", JOIN_TIMEOUT);
            }
        }
    }
}

fn receive_loop(
    socket: &UdpSocket,
    interface: &NetworkInterface,
    join_group: bool,
    cancel: &AtomicBool,
    handler: &(dyn Fn(&[u8], SocketAddr) + Send + Sync),
) {
    if join_group {
        if let Err(e) = join_group_on(socket, interface) {
            warn!("Failed to join SSDP group on {}: {}", interface.name, e);
            return;
        }
    }

    let mut buf = [0u8; RECEIVE_BUFFER_SIZE];
    while !cancel.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((size, source)) => {
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                trace!("Received {} bytes from {} on {}", size, source, interface.name);
                let handled = panic::catch_unwind(AssertUnwindSafe(|| handler(&buf[..size], source)));
                if handled.is_err() {
                    error!("SSDP handler panicked on a datagram from {}", source);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                if !cancel.load(Ordering::SeqCst) {
                    warn!("SSDP receive on {} failed: {}", interface.name, e);
                }
                break;
            }
        }
    }

    if join_group {
        if let Err(e) = leave_group_on(socket, interface) {
            debug!("Failed to leave SSDP group on {}: {}", interface.name, e);
        }
    }
    debug!("SSDP receive loop on {} finished", interface.name);
}

fn join_group_on(socket: &UdpSocket, interface: &NetworkInterface) -> io::Result<()> {
    match interface.address {
        IpAddr::V4(ip) => socket.join_multicast_v4(&SSDP_MULTICAST_V4, &ip),
        IpAddr::V6(_) => socket.join_multicast_v6(&SSDP_MULTICAST_V6, interface.scope_id),
    }
}

fn leave_group_on(socket: &UdpSocket, interface: &NetworkInterface) -> io::Result<()> {
    match interface.address {
        IpAddr::V4(ip) => socket.leave_multicast_v4(&SSDP_MULTICAST_V4, &ip),
        IpAddr::V6(_) => socket.leave_multicast_v6(&SSDP_MULTICAST_V6, interface.scope_id),
    }
}

fn create_socket(interface: &NetworkInterface, bind_port: u16) -> io::Result<UdpSocket> {
    let family = interface.family();
    let domain = match family {
        AddressFamily::V4 => Domain::IPV4,
        AddressFamily::V6 => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if bind_port != 0 {
        set_reuse_port(&socket)?;
    }

    match interface.address {
        IpAddr::V4(ip) => {
            socket.set_multicast_if_v4(&ip)?;
            socket.set_multicast_ttl_v4(SSDP_TTL)?;
        }
        IpAddr::V6(_) => {
            socket.set_only_v6(true)?;
            socket.set_multicast_if_v6(interface.scope_id)?;
            socket.set_multicast_hops_v6(SSDP_TTL)?;
        }
    }

    // Receivers bind the wildcard address; multicast is not delivered to a
    // socket bound to a unicast address on Linux
    let bind_addr = match (bind_port, interface.address) {
        (0, IpAddr::V6(ip)) => SocketAddr::V6(SocketAddrV6::new(ip, 0, 0, interface.scope_id)),
        (0, ip) => SocketAddr::new(ip, 0),
        (port, _) => SocketAddr::new(family.unspecified(), port),
    };
    socket.bind(&bind_addr.into())?;
    socket.set_read_timeout(Some(RECEIVE_TIMEOUT))?;
    debug!("Opened SSDP socket on {} bound to {}", interface.name, bind_addr);
    Ok(socket.into())
}

#[cfg(unix)]
fn set_reuse_port(socket: &Socket) -> io::Result<()> {
    socket.set_reuse_port(true)
}

#[cfg(not(unix))]
fn set_reuse_port(_socket: &Socket) -> io::Result<()> {
    Ok(())
}

/// Decode a datagram and apply the checks shared by search and notify.
pub(crate) fn decode_datagram(
    data: &[u8],
    source: SocketAddr,
    interface: &NetworkInterface,
    segment_check: bool,
) -> Option<SsdpMessage> {
    if segment_check && !interface.is_same_segment(&source.ip()) {
        trace!("Dropping SSDP datagram from {} outside the {} segment", source, interface.name);
        return None;
    }
    match SsdpMessage::from_datagram(data, source, interface.address, interface.scope_id) {
        Ok(message) => Some(message),
        Err(e) => {
            trace!("Dropping SSDP datagram from {}: {}", source, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn loopback() -> NetworkInterface {
        NetworkInterface::new(
            "lo",
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            Some("255.0.0.0".parse().unwrap()),
            0,
        )
    }

    #[test]
    fn test_lifecycle_calls_are_idempotent() {
        let transport = SsdpTransport::new(loopback(), 0);
        transport.stop(true);
        transport.close();
        assert!(!transport.is_open());

        transport.open().unwrap();
        transport.open().unwrap();
        assert!(transport.is_open());

        let handler: DatagramHandler = Arc::new(|_: &[u8], _: SocketAddr| {});
        transport.start(Arc::clone(&handler)).unwrap();
        transport.start(handler).unwrap();
        assert!(transport.is_started());

        transport.stop(true);
        transport.stop(true);
        assert!(!transport.is_started());
        transport.close();
        assert!(!transport.is_open());
    }

    #[test]
    fn test_send_when_closed_is_ignored() {
        let transport = SsdpTransport::new(loopback(), 0);
        assert!(transport.send(b"M-SEARCH * HTTP/1.1\r\n\r\n").is_ok());
    }

    #[test]
    fn test_receive_thread_delivers_datagrams() {
        let transport = SsdpTransport::new(loopback(), 0);
        transport.open().unwrap();
        let (tx, rx) = channel::unbounded();
        transport
            .start(Arc::new(move |data: &[u8], source: SocketAddr| {
                let _ = tx.send((data.to_vec(), source));
            }))
            .unwrap();

        let target = transport.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"hello", target).unwrap();

        let (data, source) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(source, sender.local_addr().unwrap());
        transport.close();
    }

    #[test]
    fn test_decode_datagram_segment_check() {
        let iface = NetworkInterface::new(
            "eth0",
            "192.168.1.10".parse().unwrap(),
            Some("255.255.255.0".parse().unwrap()),
            0,
        );
        let data = b"NOTIFY * HTTP/1.1\r\nNTS: ssdp:alive\r\nUSN: uuid:a\r\n\r\n";

        assert!(decode_datagram(data, "192.168.1.20:1900".parse().unwrap(), &iface, true).is_some());
        assert!(decode_datagram(data, "10.0.0.20:1900".parse().unwrap(), &iface, true).is_none());
        assert!(decode_datagram(data, "10.0.0.20:1900".parse().unwrap(), &iface, false).is_some());
    }
}
