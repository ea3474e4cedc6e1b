//! Expiring, auto-renewing registry of GENA subscriptions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::Service;
use crate::subscribe_service::SubscribeService;

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Sends the renewal for a subscription and stores the result on the service.
#[cfg_attr(test, mockall::automock)]
pub trait Renewer: Send + Sync {
    fn renew(&self, service: &Service) -> Result<()>;
}

struct HolderState {
    entries: HashMap<String, SubscribeService>,
}

struct HolderShared {
    state: Mutex<HolderState>,
    changed: Condvar,
    renewer: Arc<dyn Renewer>,
}

/// Subscribed services keyed by subscription id.
///
/// A background thread renews keep-alive entries when their scan time comes
/// and drops the others at expiry. An entry that fails to renew twice in a
/// row is dropped and its service's subscription cleared. Renewals run
/// outside the registry lock.
pub struct SubscribeHolder {
    shared: Arc<HolderShared>,
    task: Mutex<Option<SweepTask>>,
}

impl SubscribeHolder {
    pub fn new(renewer: Arc<dyn Renewer>) -> Self {
        Self {
            shared: Arc::new(HolderShared {
                state: Mutex::new(HolderState {
                    entries: HashMap::new(),
                }),
                changed: Condvar::new(),
                renewer,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        match SweepTask::spawn(Arc::clone(&self.shared)) {
            Ok(spawned) => *task = Some(spawned),
            Err(e) => {
                warn!("Failed to start subscription renewal thread: {}", e);
            }
        }
    }

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

    /// Track a subscribed service, replacing any entry with the same id.
    pub fn add(&self, service: Arc<Service>, keep_alive: bool) -> Result<()> {
        let entry = SubscribeService::new(service, keep_alive)?;
        let Some(sid) = entry.service().subscription_id() else {
            return Ok(());
        };
        let mut state = self.shared.state.lock();
        state.entries.insert(sid, entry);
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Refresh the schedule after a renewal made outside the sweep.
    pub fn renewed(&self, sid: &str) {
        let mut state = self.shared.state.lock();
        if let Some(entry) = state.entries.get_mut(sid) {
            entry.renew_succeeded();
            self.shared.changed.notify_all();
        }
    }

    pub fn remove(&self, sid: &str) -> Option<Arc<Service>> {
        self.shared
            .state
            .lock()
            .entries
            .remove(sid)
            .map(|entry| Arc::clone(entry.service()))
    }

    pub fn get(&self, sid: &str) -> Option<Arc<Service>> {
        self.shared
            .state
            .lock()
            .entries
            .get(sid)
            .map(|entry| Arc::clone(entry.service()))
    }

    pub fn is_keep_alive(&self, sid: &str) -> Option<bool> {
        self.shared
            .state
            .lock()
            .entries
            .get(sid)
            .map(SubscribeService::is_keep_alive)
    }

    pub fn list(&self) -> Vec<Arc<Service>> {
        self.shared
            .state
            .lock()
            .entries
            .values()
            .map(|entry| Arc::clone(entry.service()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().entries.is_empty()
    }

    /// Remove every entry and return the services.
    pub fn clear(&self) -> Vec<Arc<Service>> {
        self.shared
            .state
            .lock()
            .entries
            .drain()
            .map(|(_, entry)| Arc::clone(entry.service()))
            .collect()
    }
}

impl Drop for SubscribeHolder {
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
    fn spawn(shared: Arc<HolderShared>) -> std::io::Result<Self> {
        let (done_tx, done) = channel::bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("upnp-subscription-renewal".to_string())
            .spawn(move || {
                sweep_loop(&shared, &thread_stop);
                let _ = done_tx.send(());
            })?;
        Ok(Self { stop, done, handle })
    }

    fn join(self) {
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        match self.done.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    warn!("Subscription renewal thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                // Most likely blocked in a renewal request; it exits once that returns
                warn!("Subscription renewal thread did not stop within {:?}, detaching", JOIN_TIMEOUT);
            }
        }
    }
}

struct Due {
    sid: String,
    service: Arc<Service>,
    keep_alive: bool,
}

fn sweep_loop(shared: &HolderShared, stop: &AtomicBool) {
    loop {
        let due = {
            let mut state = shared.state.lock();
            loop {
                if stop.load(Ordering::SeqCst) {
                    debug!("Subscription renewal thread finished");
                    return;
                }
                let now = Instant::now();
                let due: Vec<Due> = state
                    .entries
                    .iter()
                    .filter(|(_, entry)| entry.next_scan_time() <= now)
                    .map(|(sid, entry)| Due {
                        sid: sid.clone(),
                        service: Arc::clone(entry.service()),
                        keep_alive: entry.is_keep_alive(),
                    })
                    .collect();
                if !due.is_empty() {
                    break due;
                }
                let wake = state
                    .entries
                    .values()
                    .map(SubscribeService::next_scan_time)
                    .min()
                    .map_or(now + MAX_SWEEP_INTERVAL, |t| t.min(now + MAX_SWEEP_INTERVAL));
                shared.changed.wait_until(&mut state, wake);
            }
        };

        for item in due {
            if item.keep_alive {
                renew(shared, item);
            } else {
                expire(shared, item);
            }
        }
    }
}

fn renew(shared: &HolderShared, item: Due) {
    let result = shared.renewer.renew(&item.service);
    let now = Instant::now();
    let mut state = shared.state.lock();
    let Some(entry) = state.entries.get_mut(&item.sid) else {
        // Removed while the renewal was in flight
        return;
    };
    match result {
        Ok(()) => {
            debug!("Renewed subscription {}", item.sid);
            entry.renew_succeeded();
        }
        Err(e) => {
            warn!("Failed to renew subscription {}: {}", item.sid, e);
            entry.renew_failed(now);
        }
    }
    if entry.is_failed() {
        state.entries.remove(&item.sid);
        drop(state);
        item.service.clear_subscription();
        info!(
            "Dropped subscription {} of {} after repeated renewal failures",
            item.sid,
            item.service.service_id()
        );
    }
}

fn expire(shared: &HolderShared, item: Due) {
    let mut state = shared.state.lock();
    let still_due = state
        .entries
        .get(&item.sid)
        .is_some_and(|entry| entry.is_expired(Instant::now()));
    if !still_due {
        return;
    }
    state.entries.remove(&item.sid);
    drop(state);
    item.service.clear_subscription();
    info!("Subscription {} of {} expired", item.sid, item.service.service_id());
}
