//! Event subscriptions: the renewal registry plus the NOTIFY receiver.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, UdpSocket};
use std::sync::Arc;

use callback_server::{EventListener, EventReceiver, NotificationPayload};
use tracing::{debug, error, info, warn};
use upnp_http::urls::{http_url, parse_http_url};
use upnp_http::HttpError;

use crate::error::{ControlPointError, Result};
use crate::executor::CallbackExecutor;
use crate::listener::{ListenerSet, NotifyEventListener};
use crate::model::{Device, Service, StateVariable};
use crate::service_client::ServiceClient;
use crate::subscribe_holder::SubscribeHolder;

pub(crate) type NotifyListeners = ListenerSet<dyn NotifyEventListener>;

/// Routes received notifications to the notify listeners.
struct EventDispatcher {
    holder: Arc<SubscribeHolder>,
    listeners: Arc<NotifyListeners>,
    callback: Arc<dyn CallbackExecutor>,
}

impl EventListener for EventDispatcher {
    fn on_event_received(&self, payload: NotificationPayload) -> bool {
        let Some(service) = self.holder.get(&payload.subscription_id) else {
            debug!("Event for unknown subscription {}", payload.subscription_id);
            return false;
        };
        let properties: Vec<(String, String)> = payload
            .properties
            .into_iter()
            .filter(|(name, _)| {
                service
                    .find_state_variable(name)
                    .is_some_and(StateVariable::is_send_events)
            })
            .collect();
        let listeners = self.listeners.snapshot();
        if properties.is_empty() || listeners.is_empty() {
            return true;
        }

        let sequence = payload.sequence;
        let task = Box::new(move || {
            for (name, value) in &properties {
                for listener in listeners.iter() {
                    listener.on_notify_event(&service, sequence, name, value);
                }
            }
        });
        if let Err(e) = self.callback.execute(task) {
            warn!("Dropped event for {}: {}", payload.subscription_id, e);
        }
        true
    }
}

/// Owns every subscription made by a control point.
pub(crate) struct SubscribeManager {
    holder: Arc<SubscribeHolder>,
    receiver: EventReceiver,
    client: Arc<ServiceClient>,
}

impl SubscribeManager {
    pub(crate) fn new(
        event_port: u16,
        client: Arc<ServiceClient>,
        listeners: Arc<NotifyListeners>,
        callback: Arc<dyn CallbackExecutor>,
    ) -> Self {
        let holder = Arc::new(SubscribeHolder::new(client.clone()));
        let dispatcher = EventDispatcher {
            holder: Arc::clone(&holder),
            listeners,
            callback,
        };
        Self {
            holder,
            receiver: EventReceiver::with_listener(event_port, Arc::new(dispatcher)),
            client,
        }
    }

    pub(crate) fn initialize(&self) {
        self.holder.start();
    }

    /// Open the event receiver. A bind failure leaves subscriptions unavailable.
    pub(crate) fn start(&self) {
        if let Err(e) = self.receiver.open() {
            error!("Event receiver failed to open, subscriptions disabled: {}", e);
        }
    }

    /// Unsubscribe everything, then close the receiver.
    pub(crate) fn stop(&self) {
        for service in self.holder.clear() {
            if let Err(e) = self.client.unsubscribe(&service) {
                debug!("Unsubscribe from {} failed during stop: {}", service.service_id(), e);
            }
        }
        self.receiver.close();
    }

    pub(crate) fn terminate(&self) {
        self.holder.shutdown_request();
    }

    pub(crate) fn event_port(&self) -> Option<u16> {
        self.receiver.local_port()
    }

    /// Subscribe, or renew an existing subscription and update its keep-alive flag.
    pub(crate) fn subscribe(&self, service: &Arc<Service>, keep_renew: bool) -> Result<()> {
        if service.is_subscribed() {
            self.client.renew_subscription(service)?;
            return self.holder.add(Arc::clone(service), keep_renew);
        }
        let port = self.event_port().ok_or(ControlPointError::NotStarted)?;
        let local = match service.local_address() {
            Some(ip) => ip,
            None => route_address(service.event_sub_url())?,
        };
        self.client.subscribe(service, &http_url(local, port, "/"))?;
        self.holder.add(Arc::clone(service), keep_renew)
    }

    pub(crate) fn renew_subscribe(&self, service: &Arc<Service>) -> Result<()> {
        self.client.renew_subscription(service)?;
        if let Some(sid) = service.subscription_id() {
            self.holder.renewed(&sid);
        }
        Ok(())
    }

    pub(crate) fn unsubscribe(&self, service: &Arc<Service>) -> Result<()> {
        if let Some(sid) = service.subscription_id() {
            self.holder.remove(&sid);
        }
        self.client.unsubscribe(service)
    }

    /// Forget the subscriptions of a device that went away, without any requests.
    pub(crate) fn unregister_device(&self, device: &Device) {
        for service in device.all_services() {
            if let Some(subscription) = service.clear_subscription() {
                info!("Dropping subscription {} of lost {}", subscription.id, device.udn());
                self.holder.remove(&subscription.id);
            }
        }
    }

    pub(crate) fn subscribed_service(&self, sid: &str) -> Option<Arc<Service>> {
        self.holder.get(sid)
    }

    pub(crate) fn invoke(
        &self,
        service: &Service,
        action: &str,
        arguments: &[(String, String)],
    ) -> Result<Vec<(String, String)>> {
        self.client.invoke(service, action, arguments)
    }
}

/// Local address the OS would use to reach the host of `url`.
fn route_address(url: &str) -> Result<IpAddr> {
    let url = parse_http_url(url)?;
    let target = url
        .socket_addrs(|| Some(80))
        .map_err(HttpError::from)?
        .into_iter()
        .next()
        .ok_or_else(|| HttpError::InvalidUrl(url.to_string()))?;
    let unspecified: IpAddr = if target.is_ipv4() {
        Ipv4Addr::UNSPECIFIED.into()
    } else {
        Ipv6Addr::UNSPECIFIED.into()
    };
    let socket = UdpSocket::bind((unspecified, 0)).map_err(HttpError::from)?;
    socket.connect(target).map_err(HttpError::from)?;
    Ok(socket.local_addr().map_err(HttpError::from)?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::WorkerPool;
    use crate::model::service::tests::test_service;
    use crate::model::Subscription;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    type Received = Arc<Mutex<Vec<(String, u64, String, String)>>>;

    fn recording_listeners() -> (Arc<NotifyListeners>, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let listeners = Arc::new(NotifyListeners::new());
        listeners.add(Arc::new(
            move |service: &Arc<Service>, seq: u64, name: &str, value: &str| {
                sink.lock().push((
                    service.service_id().to_string(),
                    seq,
                    name.to_string(),
                    value.to_string(),
                ));
            },
        ));
        (listeners, received)
    }

    fn dispatcher_with(service: Option<Arc<Service>>) -> (EventDispatcher, Received) {
        let holder = Arc::new(SubscribeHolder::new(Arc::new(ServiceClient::new(
            false,
            Duration::from_secs(300),
        ))));
        if let Some(service) = service {
            holder.add(service, false).unwrap();
        }
        let (listeners, received) = recording_listeners();
        let dispatcher = EventDispatcher {
            holder,
            listeners,
            callback: Arc::new(WorkerPool::sequential("test-callback", Duration::from_secs(1))),
        };
        (dispatcher, received)
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    fn payload(sid: &str, properties: &[(&str, &str)]) -> NotificationPayload {
        NotificationPayload {
            subscription_id: sid.to_string(),
            sequence: 3,
            properties: properties
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_unknown_subscription_is_rejected() {
        let (dispatcher, received) = dispatcher_with(None);
        assert!(!dispatcher.on_event_received(payload("uuid:nobody", &[("Volume", "1")])));
        std::thread::sleep(Duration::from_millis(50));
        assert!(received.lock().is_empty());
    }

    #[test]
    fn test_only_evented_variables_are_dispatched() {
        let service = Arc::new(test_service());
        service.set_subscription(Subscription::new(
            "uuid:sub-1",
            Instant::now(),
            Duration::from_secs(300),
        ));
        let (dispatcher, received) = dispatcher_with(Some(service));

        let accepted = dispatcher.on_event_received(payload(
            "uuid:sub-1",
            &[("Volume", "30"), ("A_ARG_TYPE_InstanceID", "0"), ("Undeclared", "x")],
        ));
        assert!(accepted);
        assert!(wait_for(|| !received.lock().is_empty()));
        std::thread::sleep(Duration::from_millis(50));

        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(
            received[0],
            (
                "urn:upnp-org:serviceId:RenderingControl".to_string(),
                3,
                "Volume".to_string(),
                "30".to_string()
            )
        );
    }

    #[test]
    fn test_subscribe_requires_open_receiver() {
        let (listeners, _) = recording_listeners();
        let manager = SubscribeManager::new(
            0,
            Arc::new(ServiceClient::new(false, Duration::from_secs(300))),
            listeners,
            Arc::new(WorkerPool::sequential("test-callback", Duration::from_secs(1))),
        );
        let service = Arc::new(test_service());
        assert!(matches!(
            manager.subscribe(&service, true),
            Err(ControlPointError::NotStarted)
        ));
    }

    #[test]
    fn test_subscribe_and_stop_unsubscribes() {
        let mut server = mockito::Server::new();
        let subscribe = server
            .mock("SUBSCRIBE", "/RenderingControl/event")
            .with_status(200)
            .with_header("SID", "uuid:sub-9")
            .with_header("TIMEOUT", "Second-300")
            .create();
        let unsubscribe = server
            .mock("UNSUBSCRIBE", "/RenderingControl/event")
            .match_header("SID", "uuid:sub-9")
            .with_status(200)
            .create();

        let (listeners, _) = recording_listeners();
        let manager = SubscribeManager::new(
            0,
            Arc::new(ServiceClient::new(false, Duration::from_secs(300))),
            listeners,
            Arc::new(WorkerPool::sequential("test-callback", Duration::from_secs(1))),
        );
        manager.initialize();
        manager.start();
        assert!(manager.event_port().is_some());

        let service = Arc::new(
            Service::from_draft(
                crate::model::service::tests::service_draft(),
                "uuid:device-1",
                &server.url(),
                crate::model::service::tests::test_presence(),
            )
            .unwrap(),
        );
        manager.subscribe(&service, true).unwrap();
        subscribe.assert();
        assert!(manager.subscribed_service("uuid:sub-9").is_some());

        manager.stop();
        unsubscribe.assert();
        assert!(manager.subscribed_service("uuid:sub-9").is_none());
        assert!(!service.is_subscribed());
        assert!(manager.event_port().is_none());
        manager.terminate();
    }

    #[test]
    fn test_route_address_for_loopback() {
        let ip = route_address("http://127.0.0.1:8080/event").unwrap();
        assert!(ip.is_loopback());
    }
}
