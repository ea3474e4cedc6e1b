//! The control point: discovery state machine and public API.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};
use upnp_http::urls::resolve_url;
use upnp_http::HttpClient;
use upnp_ssdp::{
    is_link_local, MessageKind, MessageListener, NetworkInterface, Protocol, SsdpError, SsdpMessage,
    SsdpNotifyReceiverList, SsdpSearchServerList,
};

use crate::config::ControlPointConfig;
use crate::description::{DescriptionParser, XmlDescriptionParser};
use crate::device_holder::DeviceHolder;
use crate::error::{ControlPointError, Result};
use crate::executor::{CallbackExecutor, TaskExecutors};
use crate::listener::{
    AcceptAll, DiscoveryListener, IconFilter, ListenerSet, NoIcons, NotifyEventListener, SsdpMessageFilter,
};
use crate::model::{Device, DeviceDraft, Service};
use crate::service_client::ServiceClient;
use crate::subscribe_manager::{NotifyListeners, SubscribeManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Initialized,
    Started,
    /// Sockets and subscriptions are being released
    Stopping,
    Terminated,
}

/// A listener notification waiting for the callback executor.
enum Notice {
    Discovered(Arc<Device>),
    Lost(Arc<Device>),
}

/// Notices in detection order. Only one thread drains at a time.
#[derive(Default)]
struct Outbox {
    queue: VecDeque<Notice>,
    draining: bool,
}

/// A UPnP control point.
///
/// Discovers devices over SSDP, loads their descriptions, tracks their
/// liveness and manages event subscriptions. Listener notifications are
/// delivered on the callback executor in the order they were detected.
///
/// Lifecycle methods never fail: `start` initializes if needed, `stop` and
/// `terminate` may be called in any state. Calling [`search`](Self::search)
/// while not started is an error.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use upnp_cp::{ControlPoint, ControlPointConfig, Device, DiscoveryListener};
///
/// struct Printer;
///
/// impl DiscoveryListener for Printer {
///     fn on_discover(&self, device: &Arc<Device>) {
///         tracing::info!("Found {}", device);
///     }
///
///     fn on_lost(&self, device: &Arc<Device>) {
///         tracing::info!("Lost {}", device);
///     }
/// }
///
/// let control_point = ControlPoint::new(ControlPointConfig::default())?;
/// control_point.add_discovery_listener(Arc::new(Printer));
/// control_point.start();
/// control_point.search(None)?;
/// // ...
/// control_point.terminate();
/// # Ok::<(), upnp_cp::ControlPointError>(())
/// ```
pub struct ControlPoint {
    inner: Arc<Inner>,
}

struct Inner {
    me: Weak<Inner>,
    config: ControlPointConfig,
    lifecycle: Mutex<Lifecycle>,
    parser: RwLock<Arc<dyn DescriptionParser>>,
    icon_filter: RwLock<Arc<dyn IconFilter>>,
    message_filter: RwLock<Arc<dyn SsdpMessageFilter>>,
    /// SSDP messages of devices whose description is being loaded, by uuid
    loading: Mutex<HashMap<String, SsdpMessage>>,
    devices: DeviceHolder<Device>,
    outbox: Mutex<Outbox>,
    subscribe: SubscribeManager,
    executors: TaskExecutors,
    discovery_listeners: ListenerSet<dyn DiscoveryListener>,
    notify_listeners: Arc<NotifyListeners>,
    search_servers: SsdpSearchServerList,
    notify_receivers: SsdpNotifyReceiverList,
}

impl ControlPoint {
    /// Validate `config` and open nothing yet; sockets are opened by `start`.
    pub fn new(config: ControlPointConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Deliver listener notifications through `callback` instead of the
    /// built-in single-thread pool.
    pub fn with_callback_executor(
        config: ControlPointConfig,
        callback: Arc<dyn CallbackExecutor>,
    ) -> Result<Self> {
        Self::build(config, Some(callback))
    }

    fn build(config: ControlPointConfig, callback: Option<Arc<dyn CallbackExecutor>>) -> Result<Self> {
        config.validate()?;
        let interfaces =
            NetworkInterface::list(config.protocol, &config.interfaces).map_err(SsdpError::from)?;
        if interfaces.is_empty() {
            warn!("No usable network interface for {:?}", config.protocol);
        }

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let executors =
                TaskExecutors::new(config.io_pool_size, config.pool_idle_timeout(), callback);
            let notify_listeners = Arc::new(NotifyListeners::new());
            let client = Arc::new(ServiceClient::new(
                config.http_keep_alive,
                config.subscription_timeout(),
            ));
            let subscribe = SubscribeManager::new(
                config.event_port,
                client,
                Arc::clone(&notify_listeners),
                executors.callback_executor(),
            );

            let expired = weak.clone();
            let devices = DeviceHolder::<Device>::new(Arc::new(move |device: Arc<Device>| {
                if let Some(inner) = expired.upgrade() {
                    inner.on_expire(device);
                }
            }));

            let received = weak.clone();
            let listener: MessageListener = Arc::new(move |message: SsdpMessage| {
                if let Some(inner) = received.upgrade() {
                    inner.on_receive(message);
                }
            });
            let segment_check = config.notify_segment_check;

            Inner {
                me: weak.clone(),
                search_servers: SsdpSearchServerList::for_interfaces(
                    &interfaces,
                    segment_check,
                    Arc::clone(&listener),
                ),
                notify_receivers: SsdpNotifyReceiverList::for_interfaces(
                    &interfaces,
                    segment_check,
                    listener,
                ),
                config,
                lifecycle: Mutex::new(Lifecycle::Created),
                parser: RwLock::new(Arc::new(XmlDescriptionParser)),
                icon_filter: RwLock::new(Arc::new(NoIcons)),
                message_filter: RwLock::new(Arc::new(AcceptAll)),
                loading: Mutex::new(HashMap::new()),
                devices,
                outbox: Mutex::new(Outbox::default()),
                subscribe,
                executors,
                discovery_listeners: ListenerSet::new(),
                notify_listeners,
            }
        });
        Ok(Self { inner })
    }

    /// Replace the description parser.
    pub fn with_parser(self, parser: Arc<dyn DescriptionParser>) -> Self {
        *self.inner.parser.write() = parser;
        self
    }

    pub fn config(&self) -> &ControlPointConfig {
        &self.inner.config
    }

    /// Start the expiry and renewal threads. Does nothing after the first call.
    pub fn initialize(&self) {
        let mut lifecycle = self.inner.lifecycle.lock();
        if *lifecycle == Lifecycle::Created {
            self.inner.initialize();
            *lifecycle = Lifecycle::Initialized;
        }
    }

    /// Open the event receiver and the SSDP sockets.
    pub fn start(&self) {
        let mut lifecycle = self.inner.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Terminated | Lifecycle::Started | Lifecycle::Stopping => return,
            Lifecycle::Created => self.inner.initialize(),
            Lifecycle::Initialized => {}
        }
        self.inner.subscribe.start();
        self.inner.search_servers.start();
        self.inner.notify_receivers.start();
        *lifecycle = Lifecycle::Started;
        info!("Control point started");
    }

    /// Close sockets, drop subscriptions and forget every device.
    ///
    /// Listeners receive `on_lost` for each device that was known. The
    /// unsubscribe requests run without the lifecycle lock; `start` is ignored
    /// until they are done.
    pub fn stop(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if *lifecycle != Lifecycle::Started {
                return;
            }
            *lifecycle = Lifecycle::Stopping;
        }
        self.inner.stop();
        let mut lifecycle = self.inner.lifecycle.lock();
        if *lifecycle == Lifecycle::Stopping {
            *lifecycle = Lifecycle::Initialized;
        }
        info!("Control point stopped");
    }

    /// Stop and release every thread. The control point cannot be restarted.
    pub fn terminate(&self) {
        let previous = std::mem::replace(&mut *self.inner.lifecycle.lock(), Lifecycle::Terminated);
        match previous {
            Lifecycle::Terminated => return,
            Lifecycle::Started => self.inner.stop(),
            Lifecycle::Created | Lifecycle::Initialized | Lifecycle::Stopping => {}
        }
        self.inner.subscribe.terminate();
        self.inner.devices.shutdown_request();
        self.inner.executors.terminate();
        info!("Control point terminated");
    }

    pub fn is_started(&self) -> bool {
        *self.inner.lifecycle.lock() == Lifecycle::Started
    }

    /// Send `M-SEARCH` on every interface, for the configured target when
    /// `search_target` is `None`.
    pub fn search(&self, search_target: Option<&str>) -> Result<()> {
        match *self.inner.lifecycle.lock() {
            Lifecycle::Started => {}
            Lifecycle::Terminated => return Err(ControlPointError::Terminated),
            Lifecycle::Created | Lifecycle::Initialized | Lifecycle::Stopping => {
                return Err(ControlPointError::NotStarted)
            }
        }
        let target = search_target.unwrap_or(&self.inner.config.search_target);
        self.inner.search_servers.search(Some(target), self.inner.config.search_mx)?;
        Ok(())
    }

    /// Process an SSDP message as if it had arrived on a socket.
    pub fn handle_ssdp_message(&self, message: SsdpMessage) {
        self.inner.on_receive(message);
    }

    pub fn add_discovery_listener(&self, listener: Arc<dyn DiscoveryListener>) -> bool {
        self.inner.discovery_listeners.add(listener)
    }

    pub fn remove_discovery_listener(&self, listener: &Arc<dyn DiscoveryListener>) -> bool {
        self.inner.discovery_listeners.remove(listener)
    }

    pub fn add_notify_event_listener(&self, listener: Arc<dyn NotifyEventListener>) -> bool {
        self.inner.notify_listeners.add(listener)
    }

    pub fn remove_notify_event_listener(&self, listener: &Arc<dyn NotifyEventListener>) -> bool {
        self.inner.notify_listeners.remove(listener)
    }

    /// Choose which icons have their image downloaded.
    pub fn set_icon_filter(&self, filter: Arc<dyn IconFilter>) {
        *self.inner.icon_filter.write() = filter;
    }

    /// Drop SSDP messages before any processing when the filter rejects them.
    pub fn set_ssdp_message_filter(&self, filter: Arc<dyn SsdpMessageFilter>) {
        *self.inner.message_filter.write() = filter;
    }

    pub fn device(&self, udn: &str) -> Option<Arc<Device>> {
        self.inner.devices.get(udn)
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.inner.devices.list()
    }

    pub fn device_count(&self) -> usize {
        self.inner.devices.len()
    }

    pub fn subscribed_service(&self, sid: &str) -> Option<Arc<Service>> {
        self.inner.subscribe.subscribed_service(sid)
    }

    /// Load the device described at `location` and keep it until the pin is
    /// removed, whatever SSDP says.
    ///
    /// Loading happens in the background; listeners hear `on_discover` when
    /// it completes.
    pub fn add_pinned_device(&self, location: &str) -> Result<()> {
        if *self.inner.lifecycle.lock() == Lifecycle::Terminated {
            return Err(ControlPointError::Terminated);
        }
        if let Some(device) = self.inner.devices.find(|d| d.location() == location) {
            device.set_pinned(true);
            debug!("{} is now pinned", device);
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        let location = location.to_string();
        self.inner
            .executors
            .io(Box::new(move || inner.load_pinned(&location)))?;
        Ok(())
    }

    /// Remove the pin from the device at `location`.
    ///
    /// A device also seen through SSDP stays as an ordinary device; one that
    /// was only ever pinned is removed and reported lost.
    pub fn remove_pinned_device(&self, location: &str) {
        self.inner.remove_pinned(location);
    }

    /// Subscribe to a service's events; `keep_renew` renews it until unsubscribed.
    pub fn subscribe(&self, service: &Arc<Service>, keep_renew: bool) -> Result<()> {
        self.inner.subscribe.subscribe(service, keep_renew)
    }

    pub fn renew_subscribe(&self, service: &Arc<Service>) -> Result<()> {
        self.inner.subscribe.renew_subscribe(service)
    }

    pub fn unsubscribe(&self, service: &Arc<Service>) -> Result<()> {
        self.inner.subscribe.unsubscribe(service)
    }

    /// Invoke `action` with input `arguments` and return the output arguments.
    pub fn invoke(
        &self,
        service: &Service,
        action: &str,
        arguments: &[(String, String)],
    ) -> Result<Vec<(String, String)>> {
        self.inner.subscribe.invoke(service, action, arguments)
    }

    /// Port of the event receiver, `None` until started.
    pub fn event_port(&self) -> Option<u16> {
        self.inner.subscribe.event_port()
    }
}

impl Drop for ControlPoint {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl Inner {
    fn initialize(&self) {
        self.devices.start();
        self.subscribe.initialize();
    }

    fn stop(&self) {
        self.subscribe.stop();
        self.search_servers.stop();
        self.notify_receivers.stop();

        {
            let mut loading = self.loading.lock();
            loading.clear();
            for device in self.devices.clear() {
                self.lost(device);
            }
        }
        self.deliver_notices();
    }

    fn parser(&self) -> Arc<dyn DescriptionParser> {
        self.parser.read().clone()
    }

    fn on_receive(&self, message: SsdpMessage) {
        self.track(message);
        self.deliver_notices();
    }

    fn track(&self, message: SsdpMessage) {
        if !self.message_filter.read().accept(&message) {
            trace!("Filtered SSDP message from {}", message.uuid());
            return;
        }
        if let (MessageKind::SearchResponse(_), Some(source)) = (message.kind(), message.source()) {
            if message.is_invalid_location(&source.ip()) {
                debug!("Ignoring {} with location {:?} from {}", message.uuid(), message.location(), source);
                return;
            }
        }

        let uuid = message.uuid().to_string();
        let mut loading = self.loading.lock();

        if let Some(device) = self.devices.get(&uuid) {
            if message.is_byebye() {
                if let Some(device) = self.devices.remove_if(&uuid, |d| !d.is_pinned()) {
                    debug!("{} said byebye", device.udn());
                    self.lost(device);
                }
            } else if self.need_to_update(&device.ssdp_message(), &message) {
                device.update_ssdp_message(message);
            }
            return;
        }

        if let Some(root) = self.devices.find(|d| d.find_embedded(&uuid).is_some()) {
            if !message.is_byebye() && self.need_to_update(&root.ssdp_message(), &message) {
                root.update_ssdp_message(message);
            }
            return;
        }

        if message.is_byebye() {
            if loading.remove(&uuid).is_some() {
                debug!("{} said byebye while loading", uuid);
            }
            return;
        }

        if let Some(pending) = loading.get_mut(&uuid) {
            if self.need_to_update(pending, &message) {
                *pending = message;
            }
            return;
        }

        let Some(location) = message.location().map(str::to_string) else {
            trace!("No location for {}", uuid);
            return;
        };
        let scope_id = message.scope_id();
        loading.insert(uuid.clone(), message);

        let Some(inner) = self.this() else {
            loading.remove(&uuid);
            return;
        };
        let key = uuid.clone();
        let submitted = self
            .executors
            .io(Box::new(move || inner.load_device(&key, &location, scope_id)));
        if let Err(e) = submitted {
            loading.remove(&uuid);
            warn!("Could not schedule loading of {}: {}", uuid, e);
        }
    }

    /// Strong handle for tasks that outlive the current call.
    fn this(&self) -> Option<Arc<Inner>> {
        self.me.upgrade()
    }

    fn need_to_update(&self, old: &SsdpMessage, new: &SsdpMessage) -> bool {
        need_to_update_ssdp_message(self.config.protocol, old, new)
    }

    fn description_client(&self, scope_id: u32) -> HttpClient {
        let timeout = self.config.description_timeout();
        HttpClient::new(false)
            .with_timeouts(timeout, timeout)
            .with_scope_id(scope_id)
    }

    /// Download the description and selected icons, catching parser panics.
    fn fetch_draft(&self, client: &HttpClient, location: &str) -> Result<DeviceDraft> {
        let parser = self.parser();
        let loaded = panic::catch_unwind(AssertUnwindSafe(|| parser.load(client, location)))
            .unwrap_or_else(|_| {
                Err(ControlPointError::Description(format!(
                    "parser panicked on {location}"
                )))
            });
        let mut draft = loaded?;
        let base_url = draft.url_base.clone().unwrap_or_else(|| location.to_string());
        self.download_icons(client, &base_url, &mut draft);
        Ok(draft)
    }

    fn download_icons(&self, client: &HttpClient, base_url: &str, draft: &mut DeviceDraft) {
        let filter = self.icon_filter.read().clone();
        for icon in &mut draft.icons {
            if !filter.accept(icon) {
                continue;
            }
            let Some(url) = icon.url.as_deref() else {
                continue;
            };
            match resolve_url(base_url, url).and_then(|url| client.download_binary(&url)) {
                Ok(binary) => icon.binary = Some(binary),
                Err(e) => warn!("Failed to download icon {}: {}", url, e),
            }
        }
        for child in &mut draft.devices {
            self.download_icons(client, base_url, child);
        }
    }

    fn load_device(&self, uuid: &str, location: &str, scope_id: u32) {
        let client = self.description_client(scope_id);
        let result = self.fetch_draft(&client, location);
        client.close();
        self.commit_device(uuid, location, result);
        self.deliver_notices();
    }

    fn commit_device(&self, uuid: &str, location: &str, result: Result<DeviceDraft>) {
        let mut loading = self.loading.lock();
        let Some(message) = loading.remove(uuid) else {
            debug!("Dropping description of {}, no longer announced", uuid);
            return;
        };
        let device = match result.and_then(|draft| Device::from_draft(draft, message.clone())) {
            Ok(device) => device,
            Err(e) => {
                warn!("Failed to load description of {} from {}: {}", uuid, location, e);
                return;
            }
        };
        if let Some(existing) = self.devices.get(device.udn()) {
            if self.need_to_update(&existing.ssdp_message(), &message) {
                existing.update_ssdp_message(message);
            }
            return;
        }
        if device.udn() != uuid {
            debug!("{} announced as {} but describes itself as {}", location, uuid, device.udn());
        }
        let device = Arc::new(device);
        self.devices.add(Arc::clone(&device));
        info!("Discovered {}", device);
        self.discovered(device);
    }

    fn load_pinned(&self, location: &str) {
        let client = self.description_client(0);
        let result = self.fetch_draft(&client, location).and_then(|draft| {
            let udn = draft
                .udn
                .clone()
                .ok_or(ControlPointError::missing("Device", "UDN"))?;
            let message = SsdpMessage::pinned(&udn, location, client.local_address());
            Device::from_draft(draft, message)
        });
        client.close();
        self.commit_pinned(location, result);
        self.deliver_notices();
    }

    fn commit_pinned(&self, location: &str, result: Result<Device>) {
        let device = match result {
            Ok(device) => device,
            Err(e) => {
                warn!("Failed to load pinned device from {}: {}", location, e);
                return;
            }
        };
        let mut loading = self.loading.lock();
        if let Some(existing) = self.devices.get(device.udn()) {
            existing.set_pinned(true);
            debug!("{} is now pinned", existing);
            return;
        }
        if let Some(message) = loading.remove(device.udn()) {
            device.update_ssdp_message(message);
        }
        let device = Arc::new(device);
        self.devices.add(Arc::clone(&device));
        info!("Pinned {}", device);
        self.discovered(device);
    }

    fn remove_pinned(&self, location: &str) {
        {
            let _loading = self.loading.lock();
            let Some(device) = self
                .devices
                .find(|d| d.is_pinned() && d.location() == location)
            else {
                return;
            };
            if device.ssdp_message().is_pinned() {
                if let Some(device) = self.devices.remove(device.udn()) {
                    self.lost(device);
                }
            } else {
                device.set_pinned(false);
                // Re-adding wakes the expiry thread for the now unpinned device
                self.devices.add(device);
            }
        }
        self.deliver_notices();
    }

    fn on_expire(&self, device: Arc<Device>) {
        {
            let _loading = self.loading.lock();
            info!("{} expired", device);
            self.lost(device);
        }
        self.deliver_notices();
    }

    /// Caller holds the loading lock.
    fn discovered(&self, device: Arc<Device>) {
        self.outbox.lock().queue.push_back(Notice::Discovered(device));
    }

    /// Caller holds the loading lock and has already removed `device`.
    fn lost(&self, device: Arc<Device>) {
        self.subscribe.unregister_device(&device);
        info!("Lost {}", device);
        self.outbox.lock().queue.push_back(Notice::Lost(device));
    }

    /// Hand queued notices to the callback executor in detection order.
    ///
    /// Must be called without the loading lock: an inline executor runs the
    /// listeners right here, and they may call back into the control point.
    fn deliver_notices(&self) {
        {
            let mut outbox = self.outbox.lock();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        loop {
            let notice = {
                let mut outbox = self.outbox.lock();
                match outbox.queue.pop_front() {
                    Some(notice) => notice,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            let listeners = self.discovery_listeners.snapshot();
            let delivered = match notice {
                Notice::Discovered(device) => self.executors.callback(Box::new(move || {
                    for listener in listeners.iter() {
                        listener.on_discover(&device);
                    }
                })),
                Notice::Lost(device) => self.executors.callback(Box::new(move || {
                    for listener in listeners.iter() {
                        listener.on_lost(&device);
                    }
                })),
            };
            if let Err(e) = delivered {
                warn!("Discovery notification dropped: {}", e);
            }
        }
    }
}

/// Whether `new` should replace `old` as a device's SSDP message.
///
/// Single-family modes only take addresses of their family. Dual stack
/// moves away from an IPv4 link-local address, keeps IPv4 otherwise, and
/// from IPv6 (or unknown) accepts IPv6 or any non link-local address.
pub(crate) fn need_to_update_ssdp_message(
    protocol: Protocol,
    old: &SsdpMessage,
    new: &SsdpMessage,
) -> bool {
    if old.is_pinned() {
        return true;
    }
    let Some(new_address) = new.local_address() else {
        return true;
    };
    match protocol {
        Protocol::IpV4Only => new_address.is_ipv4(),
        Protocol::IpV6Only => new_address.is_ipv6(),
        Protocol::DualStack => match old.local_address() {
            Some(old_address) if old_address.is_ipv4() => {
                is_link_local(&old_address) || new_address.is_ipv4()
            }
            _ => new_address.is_ipv6() || !is_link_local(&new_address),
        },
    }
}
