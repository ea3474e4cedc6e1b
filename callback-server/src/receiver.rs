//! Threaded HTTP server for GENA `NOTIFY` callbacks.

use std::io::{self, BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, trace, warn};
use upnp_http::{names, HttpRequest, HttpResponse};

use crate::error::Result;
use crate::propertyset::parse_property_set;

/// Read timeout for an accepted connection.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `close()` waits for the accept thread.
const JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// One received event notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    /// Value of the `SID` header
    pub subscription_id: String,
    /// Value of the `SEQ` header, 0 when absent or malformed
    pub sequence: u64,
    /// Changed state variables in document order
    pub properties: Vec<(String, String)>,
}

/// Receives parsed notifications on the receiver thread.
///
/// Returning `false` means the subscription is unknown and the device gets
/// `412 Precondition Failed`.
pub trait EventListener: Send + Sync {
    fn on_event_received(&self, payload: NotificationPayload) -> bool;
}

impl<F> EventListener for F
where
    F: Fn(NotificationPayload) -> bool + Send + Sync,
{
    fn on_event_received(&self, payload: NotificationPayload) -> bool {
        self(payload)
    }
}

/// HTTP server accepting one connection at a time.
///
/// Each connection carries one `NOTIFY`; the response always closes it.
///
/// # Example
///
/// ```no_run
/// use callback_server::{EventReceiver, NotificationPayload};
///
/// let receiver = EventReceiver::new(0, |payload: NotificationPayload| {
///     tracing::info!("{} changed {} variables", payload.subscription_id, payload.properties.len());
///     true
/// });
/// receiver.open()?;
/// let port = receiver.local_port();
/// // ... subscribe with a callback URL on `port` ...
/// receiver.close();
/// # Ok::<(), callback_server::CallbackServerError>(())
/// ```
pub struct EventReceiver {
    port: u16,
    listener: Arc<dyn EventListener>,
    task: Mutex<Option<ServerTask>>,
}

impl EventReceiver {
    /// Receiver bound to `port` when opened, 0 for an ephemeral port.
    pub fn new(port: u16, listener: impl EventListener + 'static) -> Self {
        Self::with_listener(port, Arc::new(listener))
    }

    pub fn with_listener(port: u16, listener: Arc<dyn EventListener>) -> Self {
        Self {
            port,
            listener,
            task: Mutex::new(None),
        }
    }

    /// Bind and start accepting. Reopening closes the running server first.
    pub fn open(&self) -> Result<()> {
        self.close();
        let tcp = bind_listener(self.port)?;
        let local_addr = tcp.local_addr()?;
        let task = ServerTask::spawn(tcp, local_addr, Arc::clone(&self.listener))?;
        info!("Event receiver listening on {}", local_addr);
        *self.task.lock() = Some(task);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Bound port, `None` while closed.
    pub fn local_port(&self) -> Option<u16> {
        self.task.lock().as_ref().map(|task| task.local_addr.port())
    }

    /// Stop accepting and wait for the server thread.
    ///
    /// Safe to call at any time, including while a request is being read.
    pub fn close(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop();
        }
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        self.close();
    }
}

struct ServerTask {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    active: Arc<Mutex<Option<TcpStream>>>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl ServerTask {
    fn spawn(tcp: TcpListener, local_addr: SocketAddr, listener: Arc<dyn EventListener>) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let active = Arc::new(Mutex::new(None));
        let (done_tx, done) = channel::bounded(1);

        let thread_shutdown = Arc::clone(&shutdown);
        let thread_active = Arc::clone(&active);
        let handle = thread::Builder::new()
            .name("event-receiver".to_string())
            .spawn(move || {
                accept_loop(&tcp, &thread_shutdown, &thread_active, listener.as_ref());
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            local_addr,
            shutdown,
            active,
            done,
            handle: Some(handle),
        })
    }

    fn stop(mut self) {
        {
            let mut active = self.active.lock();
            self.shutdown.store(true, Ordering::SeqCst);
            if let Some(stream) = active.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        // Wake the blocking accept
        let wake = SocketAddr::new(loopback_for(&self.local_addr), self.local_addr.port());
        if let Err(e) = TcpStream::connect_timeout(&wake, Duration::from_secs(1)) {
            trace!("Wake-up connection to {} failed: {}", wake, e);
        }

        match self.done.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        warn!("Event receiver thread panicked");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Event receiver thread did not stop within {:?}, detaching", JOIN_TIMEOUT);
            }
        }
        info!("Event receiver on {} closed", self.local_addr);
    }
}

fn accept_loop(
    tcp: &TcpListener,
    shutdown: &AtomicBool,
    active: &Mutex<Option<TcpStream>>,
    listener: &dyn EventListener,
) {
    loop {
        let (stream, peer) = match tcp.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !shutdown.load(Ordering::SeqCst) {
                    error!("Event receiver accept failed: {}", e);
                }
                break;
            }
        };
        {
            // Checked under the same lock `stop` takes, so a close is never missed
            let mut slot = active.lock();
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            match stream.try_clone() {
                Ok(handle) => *slot = Some(handle),
                Err(e) => debug!("Could not track connection from {}: {}", peer, e),
            }
        }
        if let Err(e) = serve_connection(&stream, listener) {
            debug!("Connection from {} failed: {}", peer, e);
        }
        active.lock().take();
    }
    debug!("Event receiver accept loop finished");
}

fn serve_connection(stream: &TcpStream, listener: &dyn EventListener) -> io::Result<()> {
    stream.set_read_timeout(Some(CONNECTION_TIMEOUT))?;
    stream.set_write_timeout(Some(CONNECTION_TIMEOUT))?;

    let mut reader = BufReader::new(stream);
    let status = match HttpRequest::read_from(&mut reader) {
        Ok(request) => handle_request(&request, listener),
        Err(e) if e.is_io() => return Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
        Err(e) => {
            debug!("Malformed callback request: {}", e);
            400
        }
    };

    let mut response = HttpResponse::new(status);
    response.set_header(names::SERVER, upnp_http::USER_AGENT);
    response.set_header(names::CONNECTION, "close");
    response.set_body("", true);
    let mut writer = stream;
    response.write_to(&mut writer).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    writer.flush()
}

/// Status code for one callback request.
pub(crate) fn handle_request(request: &HttpRequest, listener: &dyn EventListener) -> u16 {
    if !request.method().eq_ignore_ascii_case("NOTIFY") {
        debug!("Rejecting {} request on the event receiver", request.method());
        return 400;
    }
    let nt = request.header(names::NT).map(str::trim);
    let nts = request.header(names::NTS).map(str::trim);
    let sid = request.header(names::SID).map(str::trim).unwrap_or_default();
    if nt != Some("upnp:event") || nts != Some("upnp:propchange") || sid.is_empty() {
        debug!("Rejecting NOTIFY with NT={:?} NTS={:?} SID={:?}", nt, nts, sid);
        return 412;
    }
    let sequence = request
        .header(names::SEQ)
        .and_then(|seq| seq.trim().parse().ok())
        .unwrap_or(0);
    let properties = match parse_property_set(&request.body_text()) {
        Ok(properties) => properties,
        Err(e) => {
            debug!("Rejecting NOTIFY for {} with bad body: {}", sid, e);
            return 400;
        }
    };
    trace!("NOTIFY {} seq {} with {} properties", sid, sequence, properties.len());

    let payload = NotificationPayload {
        subscription_id: sid.to_string(),
        sequence,
        properties,
    };
    if listener.on_event_received(payload) {
        200
    } else {
        412
    }
}

/// Dual-stack listener on `[::]`, falling back to IPv4 only.
fn bind_listener(port: u16) -> io::Result<TcpListener> {
    match bind_dual_stack(port) {
        Ok(listener) => Ok(listener),
        Err(e) => {
            debug!("Dual-stack bind failed ({}), using IPv4 only", e);
            TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
        }
    }
}

fn bind_dual_stack(port: u16) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_only_v6(false)?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port).into())?;
    socket.listen(128)?;
    Ok(socket.into())
}

fn loopback_for(addr: &SocketAddr) -> IpAddr {
    match addr {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
    }
}
