//! Expiring registry of discovered devices.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::model::Device;

/// Longest the sweep thread sleeps without a pending expiry.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// An entry that can expire out of a [`DeviceHolder`].
pub trait Expiring: Send + Sync + 'static {
    fn key(&self) -> &str;
    fn expire_time(&self) -> Instant;
    /// Pinned entries never expire.
    fn is_pinned(&self) -> bool;
}

impl Expiring for Device {
    fn key(&self) -> &str {
        self.udn()
    }

    fn expire_time(&self) -> Instant {
        Device::expire_time(self)
    }

    fn is_pinned(&self) -> bool {
        Device::is_pinned(self)
    }
}

pub type ExpireCallback<T> = Arc<dyn Fn(Arc<T>) + Send + Sync>;

struct HolderState<T> {
    devices: HashMap<String, Arc<T>>,
}

struct HolderShared<T> {
    state: Mutex<HolderState<T>>,
    changed: Condvar,
    on_expire: ExpireCallback<T>,
}

/// Devices keyed by UDN, removed by a background thread once they expire.
///
/// The sweep thread sleeps until the earliest expiry among non-pinned
/// entries and calls the expire callback once for every entry it removes,
/// outside the registry lock.
pub struct DeviceHolder<T: Expiring = Device> {
    shared: Arc<HolderShared<T>>,
    task: Mutex<Option<SweepTask>>,
}

impl<T: Expiring> DeviceHolder<T> {
    pub fn new(on_expire: ExpireCallback<T>) -> Self {
        Self {
            shared: Arc::new(HolderShared {
                state: Mutex::new(HolderState {
                    devices: HashMap::new(),
                }),
                changed: Condvar::new(),
                on_expire,
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the sweep thread. A no-op while it is running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        match SweepTask::spawn(Arc::clone(&self.shared)) {
            Ok(spawned) => *task = Some(spawned),
            Err(e) => {
                warn!("Failed to start device expiry thread: {}", e);
            }
        }
    }

    /// Stop the sweep thread. Safe to call at any time and more than once.
    pub fn shutdown_request(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        {
            let _state = self.shared.state.lock();
            task.stop.store(true, Ordering::SeqCst);
            self.shared.changed.notify_all();
        }
        task.join();
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Insert or replace; returns the entry previously stored under the key.
    pub fn add(&self, device: Arc<T>) -> Option<Arc<T>> {
        let mut state = self.shared.state.lock();
        let previous = state.devices.insert(device.key().to_string(), device);
        self.shared.changed.notify_all();
        previous
    }

    pub fn remove(&self, key: &str) -> Option<Arc<T>> {
        self.shared.state.lock().devices.remove(key)
    }

    /// Remove the entry only if `predicate` holds for it, atomically.
    pub fn remove_if(&self, key: &str, predicate: impl FnOnce(&T) -> bool) -> Option<Arc<T>> {
        let mut state = self.shared.state.lock();
        match state.devices.get(key) {
            Some(device) if predicate(device) => state.devices.remove(key),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.shared.state.lock().devices.get(key).cloned()
    }

    /// First entry matching `predicate`
    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<Arc<T>> {
        self.shared
            .state
            .lock()
            .devices
            .values()
            .find(|d| predicate(d))
            .cloned()
    }

    pub fn list(&self) -> Vec<Arc<T>> {
        self.shared.state.lock().devices.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().devices.is_empty()
    }

    /// Remove everything and return what was held.
    pub fn clear(&self) -> Vec<Arc<T>> {
        let mut state = self.shared.state.lock();
        state.devices.drain().map(|(_, device)| device).collect()
    }
}

impl<T: Expiring> Drop for DeviceHolder<T> {
    fn drop(&mut self) {
        self.shutdown_request();
    }
}

/// One sweep thread; each has its own stop flag so a restart never revives a
/// thread that is shutting down.
struct SweepTask {
    stop: Arc<AtomicBool>,
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

impl SweepTask {
    fn spawn<T: Expiring>(shared: Arc<HolderShared<T>>) -> std::io::Result<Self> {
        let (done_tx, done) = channel::bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("upnp-device-expiry".to_string())
            .spawn(move || {
                sweep_loop(&shared, &thread_stop);
                let _ = done_tx.send(());
            })?;
        Ok(Self { stop, done, handle })
    }

    fn join(self) {
        // The expire callback may stop the holder from the sweep thread itself
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        match self.done.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    warn!("Device expiry thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Device expiry thread did not stop within {:?}, detaching", JOIN_TIMEOUT);
            }
        }
    }
}

fn sweep_loop<T: Expiring>(shared: &HolderShared<T>, stop: &AtomicBool) {
    loop {
        let expired = {
            let mut state = shared.state.lock();
            loop {
                if stop.load(Ordering::SeqCst) {
                    debug!("Device expiry thread finished");
                    return;
                }
                let now = Instant::now();
                let expired_keys: Vec<String> = state
                    .devices
                    .values()
                    .filter(|d| !d.is_pinned() && d.expire_time() <= now)
                    .map(|d| d.key().to_string())
                    .collect();
                if !expired_keys.is_empty() {
                    break expired_keys
                        .iter()
                        .filter_map(|key| state.devices.remove(key))
                        .collect::<Vec<_>>();
                }
                let wake = state
                    .devices
                    .values()
                    .filter(|d| !d.is_pinned())
                    .map(|d| d.expire_time())
                    .min()
                    .map_or(now + MAX_SWEEP_INTERVAL, |t| t.min(now + MAX_SWEEP_INTERVAL));
                shared.changed.wait_until(&mut state, wake);
            }
        };
        for device in expired {
            debug!("Device {} expired", device.key());
            (shared.on_expire)(device);
        }
    }
}
