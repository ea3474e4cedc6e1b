//! Listener traits, filters and the copy-on-write listener registry.

use std::sync::Arc;

use parking_lot::Mutex;
use upnp_ssdp::SsdpMessage;

use crate::model::{Device, IconDraft, Service};

/// Notified when devices appear and disappear.
pub trait DiscoveryListener: Send + Sync {
    fn on_discover(&self, device: &Arc<Device>);
    fn on_lost(&self, device: &Arc<Device>);
}

/// Notified for every evented state variable in a GENA notification.
pub trait NotifyEventListener: Send + Sync {
    fn on_notify_event(&self, service: &Arc<Service>, seq: u64, variable: &str, value: &str);
}

impl<F> NotifyEventListener for F
where
    F: Fn(&Arc<Service>, u64, &str, &str) + Send + Sync,
{
    fn on_notify_event(&self, service: &Arc<Service>, seq: u64, variable: &str, value: &str) {
        self(service, seq, variable, value)
    }
}

/// Chooses which icons get their image downloaded during description loading.
pub trait IconFilter: Send + Sync {
    fn accept(&self, icon: &IconDraft) -> bool;
}

impl<F> IconFilter for F
where
    F: Fn(&IconDraft) -> bool + Send + Sync,
{
    fn accept(&self, icon: &IconDraft) -> bool {
        self(icon)
    }
}

/// Default icon filter: download nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIcons;

impl IconFilter for NoIcons {
    fn accept(&self, _icon: &IconDraft) -> bool {
        false
    }
}

/// Decides whether an SSDP message reaches the control point at all.
pub trait SsdpMessageFilter: Send + Sync {
    fn accept(&self, message: &SsdpMessage) -> bool;
}

impl<F> SsdpMessageFilter for F
where
    F: Fn(&SsdpMessage) -> bool + Send + Sync,
{
    fn accept(&self, message: &SsdpMessage) -> bool {
        self(message)
    }
}

/// Default message filter: accept everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl SsdpMessageFilter for AcceptAll {
    fn accept(&self, _message: &SsdpMessage) -> bool {
        true
    }
}

/// Copy-on-write set of listeners.
///
/// Dispatch iterates over a snapshot, so listeners may add or remove
/// listeners from inside a callback. Adding the same `Arc` twice is ignored.
pub struct ListenerSet<T: ?Sized> {
    listeners: Mutex<Arc<Vec<Arc<T>>>>,
}

impl<T: ?Sized> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Arc::new(Vec::new())),
        }
    }

    /// Returns `false` if the listener was already registered.
    pub fn add(&self, listener: Arc<T>) -> bool {
        let mut guard = self.listeners.lock();
        if guard.iter().any(|l| same(l, &listener)) {
            return false;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
        true
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove(&self, listener: &Arc<T>) -> bool {
        let mut guard = self.listeners.lock();
        if !guard.iter().any(|l| same(l, listener)) {
            return false;
        }
        let next: Vec<Arc<T>> = guard.iter().filter(|l| !same(l, listener)).cloned().collect();
        *guard = Arc::new(next);
        true
    }

    pub fn clear(&self) {
        *self.listeners.lock() = Arc::new(Vec::new());
    }

    /// Listeners registered at this moment
    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.listeners.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

impl<T: ?Sized> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Compares data pointers only; vtable pointers of the same object may differ
fn same<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
