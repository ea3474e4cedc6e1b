//! Fan-out of SSDP servers across interfaces.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, trace, warn};

use crate::error::{Result, SsdpError};
use crate::interface::NetworkInterface;
use crate::notify::SsdpNotifyReceiver;
use crate::search::{MessageListener, SsdpSearchServer};

/// Lifecycle shared by search servers and notify receivers.
pub trait SsdpServer: Send + Sync {
    fn interface(&self) -> &NetworkInterface;
    fn open(&self) -> Result<()>;
    fn start(&self) -> Result<()>;
    fn stop(&self);
    fn close(&self);
}

/// One server per interface address, driven as a unit.
///
/// A server that fails to open or start is logged and closed; the others
/// carry on.
pub struct SsdpServerList<S> {
    servers: Vec<S>,
    started: AtomicBool,
}

pub type SsdpSearchServerList = SsdpServerList<SsdpSearchServer>;
pub type SsdpNotifyReceiverList = SsdpServerList<SsdpNotifyReceiver>;

impl<S: SsdpServer> SsdpServerList<S> {
    pub fn new(servers: Vec<S>) -> Self {
        Self {
            servers,
            started: AtomicBool::new(false),
        }
    }

    pub fn servers(&self) -> &[S] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Open and start every server. Calling it again while started is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        for server in &self.servers {
            let interface = server.interface();
            match server.open().and_then(|_| server.start()) {
                Ok(()) => info!("SSDP server started on {} ({})", interface.name, interface.address),
                Err(e) => {
                    warn!("Failed to start SSDP server on {} ({}): {}", interface.name, interface.address, e);
                    server.close();
                }
            }
        }
    }

    /// Stop and close every server. A no-op when not started.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        for server in &self.servers {
            server.stop();
            server.close();
        }
    }
}

impl SsdpSearchServerList {
    pub fn for_interfaces(
        interfaces: &[NetworkInterface],
        segment_check: bool,
        listener: MessageListener,
    ) -> Self {
        Self::new(
            interfaces
                .iter()
                .map(|iface| {
                    SsdpSearchServer::new(iface.clone(), listener.clone()).with_segment_check(segment_check)
                })
                .collect(),
        )
    }

    /// Search on every started interface.
    ///
    /// Fails with [`SsdpError::NotStarted`] when the list is not started; a
    /// failure on one interface is logged and does not stop the others.
    pub fn search(&self, search_target: Option<&str>, mx: u32) -> Result<()> {
        if !self.is_started() {
            return Err(SsdpError::NotStarted);
        }
        for server in &self.servers {
            match server.search(search_target, mx) {
                Ok(()) => {}
                Err(SsdpError::NotStarted) => {
                    trace!("Skipping search on {}, server not running", server.interface().name);
                }
                Err(e) => warn!("Search on {} failed: {}", server.interface().name, e),
            }
        }
        Ok(())
    }
}

impl SsdpNotifyReceiverList {
    pub fn for_interfaces(
        interfaces: &[NetworkInterface],
        segment_check: bool,
        listener: MessageListener,
    ) -> Self {
        Self::new(
            interfaces
                .iter()
                .map(|iface| {
                    SsdpNotifyReceiver::new(iface.clone(), listener.clone()).with_segment_check(segment_check)
                })
                .collect(),
        )
    }
}
