//! End-to-end tests for the control point
//!
//! SSDP messages are fed through `handle_ssdp_message`; descriptions, icons
//! and GENA endpoints are served by a local mockito server.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mockito::{Mock, ServerGuard};
use parking_lot::Mutex;
use upnp_cp::{
    CallbackExecutor, ControlPoint, ControlPointConfig, Device, DiscoveryListener, ExecutorError,
    IconDraft, Service, SsdpMessage, Task,
};

const UDN: &str = "uuid:renderer-1";

const DEVICE_XML: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Kitchen</friendlyName>
    <manufacturer>Acme</manufacturer>
    <modelName>Renderer</modelName>
    <UDN>uuid:renderer-1</UDN>
    <iconList>
      <icon>
        <mimetype>image/png</mimetype>
        <width>48</width>
        <height>48</height>
        <depth>24</depth>
        <url>/icon.png</url>
      </icon>
    </iconList>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
        <SCPDURL>/rc.xml</SCPDURL>
        <controlURL>/rc/control</controlURL>
        <eventSubURL>/rc/event</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#;

const SCPD_XML: &str = r#"<?xml version="1.0"?>
<scpd xmlns="urn:schemas-upnp-org:service-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <actionList>
    <action>
      <name>GetVolume</name>
      <argumentList>
        <argument>
          <name>InstanceID</name>
          <direction>in</direction>
          <relatedStateVariable>A_ARG_TYPE_InstanceID</relatedStateVariable>
        </argument>
        <argument>
          <name>CurrentVolume</name>
          <direction>out</direction>
          <relatedStateVariable>Volume</relatedStateVariable>
        </argument>
      </argumentList>
    </action>
  </actionList>
  <serviceStateTable>
    <stateVariable sendEvents="no">
      <name>A_ARG_TYPE_InstanceID</name>
      <dataType>ui4</dataType>
    </stateVariable>
    <stateVariable sendEvents="yes">
      <name>Volume</name>
      <dataType>ui2</dataType>
    </stateVariable>
  </serviceStateTable>
</scpd>"#;

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Default)]
struct RecordingListener {
    discovered: AtomicUsize,
    lost: AtomicUsize,
    order: Mutex<Vec<String>>,
}

impl DiscoveryListener for RecordingListener {
    fn on_discover(&self, device: &Arc<Device>) {
        self.discovered.fetch_add(1, Ordering::SeqCst);
        self.order.lock().push(format!("discover {}", device.udn()));
    }

    fn on_lost(&self, device: &Arc<Device>) {
        self.lost.fetch_add(1, Ordering::SeqCst);
        self.order.lock().push(format!("lost {}", device.udn()));
    }
}

/// Config that opens no SSDP sockets
fn isolated_config() -> ControlPointConfig {
    ControlPointConfig {
        interfaces: vec!["no-such-interface".to_string()],
        io_pool_size: 2,
        pool_idle_timeout_secs: 1,
        description_timeout_secs: 5,
        ..ControlPointConfig::default()
    }
}

fn control_point() -> (ControlPoint, Arc<RecordingListener>) {
    let control_point = ControlPoint::new(isolated_config()).unwrap();
    let listener = Arc::new(RecordingListener::default());
    control_point.add_discovery_listener(listener.clone());
    control_point.initialize();
    (control_point, listener)
}

fn serve_description(server: &mut ServerGuard, expected_loads: usize) -> Mock {
    server
        .mock("GET", "/rc.xml")
        .with_status(200)
        .with_body(SCPD_XML)
        .create();
    server
        .mock("GET", "/desc.xml")
        .with_status(200)
        .with_header("Content-Type", "text/xml")
        .with_body(DEVICE_XML)
        .expect(expected_loads)
        .create()
}

fn notify(server: &ServerGuard, nts: &str) -> SsdpMessage {
    announce(server, nts, 1800)
}

fn announce(server: &ServerGuard, nts: &str, max_age: u64) -> SsdpMessage {
    let datagram = format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         CACHE-CONTROL: max-age={}\r\n\
         LOCATION: {}/desc.xml\r\n\
         NT: upnp:rootdevice\r\n\
         NTS: {}\r\n\
         USN: {}::upnp:rootdevice\r\n\r\n",
        max_age,
        server.url(),
        nts,
        UDN
    );
    SsdpMessage::from_datagram(
        datagram.as_bytes(),
        SocketAddr::from((Ipv4Addr::LOCALHOST, 1900)),
        Ipv4Addr::LOCALHOST.into(),
        0,
    )
    .unwrap()
}

fn wait_for(condition: impl Fn() -> bool) -> bool {
    wait_within(Duration::from_secs(5), condition)
}

fn wait_within(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

// ============================================================================
// Discovery
// ============================================================================

#[test]
fn test_alive_then_byebye() {
    let mut server = mockito::Server::new();
    let description = serve_description(&mut server, 1);
    let (control_point, listener) = control_point();

    control_point.handle_ssdp_message(notify(&server, "ssdp:alive"));
    assert!(wait_for(|| listener.discovered.load(Ordering::SeqCst) == 1));

    let device = control_point.device(UDN).expect("device should be held");
    assert_eq!(device.friendly_name(), "Kitchen");
    assert_eq!(device.services().len(), 1);
    assert!(device.services()[0].find_action("GetVolume").is_some());
    description.assert();

    control_point.handle_ssdp_message(notify(&server, "ssdp:byebye"));
    assert!(wait_for(|| listener.lost.load(Ordering::SeqCst) == 1));
    assert!(control_point.device(UDN).is_none());
    assert_eq!(
        *listener.order.lock(),
        vec![format!("discover {UDN}"), format!("lost {UDN}")]
    );

    thread::sleep(Duration::from_millis(100));
    assert_eq!(listener.discovered.load(Ordering::SeqCst), 1);
    assert_eq!(listener.lost.load(Ordering::SeqCst), 1);
    control_point.terminate();
}

#[test]
fn test_repeated_alive_loads_once() {
    let mut server = mockito::Server::new();
    let description = serve_description(&mut server, 1);
    let (control_point, listener) = control_point();

    for _ in 0..5 {
        control_point.handle_ssdp_message(notify(&server, "ssdp:alive"));
    }
    assert!(wait_for(|| listener.discovered.load(Ordering::SeqCst) == 1));
    control_point.handle_ssdp_message(notify(&server, "ssdp:update"));

    thread::sleep(Duration::from_millis(200));
    assert_eq!(listener.discovered.load(Ordering::SeqCst), 1);
    assert_eq!(control_point.device_count(), 1);
    description.assert();
    control_point.terminate();
}

#[test]
fn test_rejected_messages_are_ignored() {
    let mut server = mockito::Server::new();
    let description = serve_description(&mut server, 0);
    let (control_point, listener) = control_point();
    control_point.set_ssdp_message_filter(Arc::new(|_: &SsdpMessage| false));

    control_point.handle_ssdp_message(notify(&server, "ssdp:alive"));

    thread::sleep(Duration::from_millis(300));
    assert_eq!(listener.discovered.load(Ordering::SeqCst), 0);
    assert_eq!(control_point.device_count(), 0);
    description.assert();
    control_point.terminate();
}

#[test]
fn test_failed_description_is_dropped() {
    let mut server = mockito::Server::new();
    server.mock("GET", "/desc.xml").with_status(500).create();
    let (control_point, listener) = control_point();

    control_point.handle_ssdp_message(notify(&server, "ssdp:alive"));

    thread::sleep(Duration::from_millis(300));
    assert_eq!(listener.discovered.load(Ordering::SeqCst), 0);
    assert!(control_point.device(UDN).is_none());
    control_point.terminate();
}

#[test]
fn test_icon_filter_downloads_selected_icons() {
    let mut server = mockito::Server::new();
    serve_description(&mut server, 1);
    let icon = server
        .mock("GET", "/icon.png")
        .with_status(200)
        .with_body([0x89u8, b'P', b'N', b'G'])
        .create();
    let (control_point, listener) = control_point();
    control_point.set_icon_filter(Arc::new(|icon: &IconDraft| {
        icon.mime_type.as_deref() == Some("image/png")
    }));

    control_point.handle_ssdp_message(notify(&server, "ssdp:alive"));
    assert!(wait_for(|| listener.discovered.load(Ordering::SeqCst) == 1));

    let device = control_point.device(UDN).unwrap();
    assert_eq!(device.icons()[0].binary(), Some(&[0x89u8, b'P', b'N', b'G'][..]));
    icon.assert();
    control_point.terminate();
}

#[test]
fn test_stop_reports_every_device_lost() {
    let mut server = mockito::Server::new();
    serve_description(&mut server, 1);
    let (control_point, listener) = control_point();
    control_point.start();

    control_point.handle_ssdp_message(notify(&server, "ssdp:alive"));
    assert!(wait_for(|| listener.discovered.load(Ordering::SeqCst) == 1));

    control_point.stop();
    assert!(wait_for(|| listener.lost.load(Ordering::SeqCst) == 1));
    assert_eq!(control_point.device_count(), 0);
    control_point.terminate();
}

#[test]
fn test_expired_device_is_lost_once_with_its_subscriptions() {
    let mut server = mockito::Server::new();
    serve_description(&mut server, 1);
    server
        .mock("SUBSCRIBE", "/rc/event")
        .with_status(200)
        .with_header("SID", "uuid:sub-expiring")
        .with_header("TIMEOUT", "Second-300")
        .create();
    let (control_point, listener) = control_point();
    control_point.start();

    // Expires max-age plus the ten second margin after the announcement
    control_point.handle_ssdp_message(announce(&server, "ssdp:alive", 1));
    assert!(wait_for(|| listener.discovered.load(Ordering::SeqCst) == 1));
    let service = Arc::clone(&control_point.device(UDN).unwrap().services()[0]);
    control_point.subscribe(&service, true).unwrap();
    assert!(control_point.subscribed_service("uuid:sub-expiring").is_some());

    assert!(wait_within(Duration::from_secs(20), || {
        listener.lost.load(Ordering::SeqCst) == 1
    }));
    assert!(control_point.device(UDN).is_none());
    assert!(control_point.subscribed_service("uuid:sub-expiring").is_none());
    assert!(!service.is_subscribed());

    thread::sleep(Duration::from_millis(200));
    assert_eq!(listener.lost.load(Ordering::SeqCst), 1);
    assert_eq!(
        *listener.order.lock(),
        vec![format!("discover {UDN}"), format!("lost {UDN}")]
    );
    control_point.terminate();
}

#[test]
fn test_lifecycle_queries_do_not_wait_for_unsubscribe() {
    let mut server = mockito::Server::new();
    serve_description(&mut server, 1);
    server
        .mock("SUBSCRIBE", "/rc/event")
        .with_status(200)
        .with_header("SID", "uuid:sub-slow")
        .with_header("TIMEOUT", "Second-300")
        .create();
    let unsubscribe = server
        .mock("UNSUBSCRIBE", "/rc/event")
        .with_status(200)
        .with_chunked_body(|writer: &mut dyn Write| {
            thread::sleep(Duration::from_millis(1500));
            writer.write_all(b"")
        })
        .create();
    let (control_point, listener) = control_point();
    control_point.start();

    control_point.handle_ssdp_message(notify(&server, "ssdp:alive"));
    assert!(wait_for(|| listener.discovered.load(Ordering::SeqCst) == 1));
    let service = Arc::clone(&control_point.device(UDN).unwrap().services()[0]);
    control_point.subscribe(&service, true).unwrap();

    let control_point = Arc::new(control_point);
    let stopping = {
        let control_point = Arc::clone(&control_point);
        thread::spawn(move || control_point.stop())
    };
    thread::sleep(Duration::from_millis(200));

    let asked = Instant::now();
    assert!(!control_point.is_started());
    assert!(control_point.search(None).is_err());
    assert!(asked.elapsed() < Duration::from_millis(500));
    assert!(!stopping.is_finished());

    stopping.join().unwrap();
    unsubscribe.assert();
    assert!(wait_for(|| listener.lost.load(Ordering::SeqCst) == 1));
    control_point.terminate();
}

// ============================================================================
// Pinned devices
// ============================================================================

#[test]
fn test_pinned_device_survives_byebye() {
    let mut server = mockito::Server::new();
    serve_description(&mut server, 1);
    let (control_point, listener) = control_point();

    control_point
        .add_pinned_device(&format!("{}/desc.xml", server.url()))
        .unwrap();
    assert!(wait_for(|| listener.discovered.load(Ordering::SeqCst) == 1));
    assert!(control_point.device(UDN).unwrap().is_pinned());

    control_point.handle_ssdp_message(notify(&server, "ssdp:byebye"));
    thread::sleep(Duration::from_millis(200));
    assert!(control_point.device(UDN).is_some());
    assert_eq!(listener.lost.load(Ordering::SeqCst), 0);

    control_point.remove_pinned_device(&format!("{}/desc.xml", server.url()));
    assert!(wait_for(|| listener.lost.load(Ordering::SeqCst) == 1));
    assert!(control_point.device(UDN).is_none());
    control_point.terminate();
}

#[test]
fn test_unpinning_a_visible_device_keeps_it() {
    let mut server = mockito::Server::new();
    serve_description(&mut server, 1);
    let (control_point, listener) = control_point();
    let location = format!("{}/desc.xml", server.url());

    control_point.add_pinned_device(&location).unwrap();
    assert!(wait_for(|| listener.discovered.load(Ordering::SeqCst) == 1));

    control_point.handle_ssdp_message(notify(&server, "ssdp:alive"));
    let device = control_point.device(UDN).unwrap();
    assert!(device.is_pinned());
    assert!(!device.ssdp_message().is_pinned());

    control_point.remove_pinned_device(&location);
    let device = control_point.device(UDN).expect("still visible through SSDP");
    assert!(!device.is_pinned());
    thread::sleep(Duration::from_millis(100));
    assert_eq!(listener.lost.load(Ordering::SeqCst), 0);
    control_point.terminate();
}

// ============================================================================
// Events
// ============================================================================

fn send_notify(port: u16, sid: &str, body: &str) -> String {
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let request = format!(
        "NOTIFY / HTTP/1.1\r\n\
         HOST: 127.0.0.1:{port}\r\n\
         CONTENT-TYPE: text/xml; charset=\"utf-8\"\r\n\
         NT: upnp:event\r\n\
         NTS: upnp:propchange\r\n\
         SID: {sid}\r\n\
         SEQ: 0\r\n\
         CONTENT-LENGTH: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).unwrap();
    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);
    response
}

#[test]
fn test_subscription_delivers_events() {
    let mut server = mockito::Server::new();
    serve_description(&mut server, 1);
    let subscribe = server
        .mock("SUBSCRIBE", "/rc/event")
        .match_header("NT", "upnp:event")
        .with_status(200)
        .with_header("SID", "uuid:sub-42")
        .with_header("TIMEOUT", "Second-300")
        .create();
    server.mock("UNSUBSCRIBE", "/rc/event").with_status(200).create();

    let (control_point, listener) = control_point();
    let events: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    control_point.add_notify_event_listener(Arc::new(
        move |_service: &Arc<Service>, _seq: u64, variable: &str, value: &str| {
            sink.lock().push((variable.to_string(), value.to_string()));
        },
    ));
    control_point.start();
    let port = control_point.event_port().expect("event receiver should be open");

    control_point.handle_ssdp_message(notify(&server, "ssdp:alive"));
    assert!(wait_for(|| listener.discovered.load(Ordering::SeqCst) == 1));
    let device = control_point.device(UDN).unwrap();
    let service = Arc::clone(&device.services()[0]);

    control_point.subscribe(&service, true).unwrap();
    subscribe.assert();
    assert_eq!(service.subscription_id().as_deref(), Some("uuid:sub-42"));
    assert!(control_point.subscribed_service("uuid:sub-42").is_some());

    let body = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
  <e:property><Volume>25</Volume></e:property>
  <e:property><A_ARG_TYPE_InstanceID>0</A_ARG_TYPE_InstanceID></e:property>
</e:propertyset>"#;
    let response = send_notify(port, "uuid:sub-42", body);
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(wait_for(|| !events.lock().is_empty()));
    assert_eq!(*events.lock(), vec![("Volume".to_string(), "25".to_string())]);

    let response = send_notify(port, "uuid:unknown", body);
    assert!(response.starts_with("HTTP/1.1 412"), "{response}");

    control_point.handle_ssdp_message(notify(&server, "ssdp:byebye"));
    assert!(wait_for(|| listener.lost.load(Ordering::SeqCst) == 1));
    assert!(control_point.subscribed_service("uuid:sub-42").is_none());
    assert!(!service.is_subscribed());
    control_point.terminate();
}

// ============================================================================
// Callback executors
// ============================================================================

struct InlineExecutor;

impl CallbackExecutor for InlineExecutor {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        task();
        Ok(())
    }
}

/// Unpins whatever it discovers, from inside the notification.
struct Unpinner {
    control_point: Mutex<Option<Arc<ControlPoint>>>,
    recorder: RecordingListener,
}

impl DiscoveryListener for Unpinner {
    fn on_discover(&self, device: &Arc<Device>) {
        self.recorder.on_discover(device);
        let control_point = self.control_point.lock().clone();
        if let Some(control_point) = control_point {
            control_point.remove_pinned_device(device.location());
        }
    }

    fn on_lost(&self, device: &Arc<Device>) {
        self.recorder.on_lost(device);
    }
}

#[test]
fn test_inline_listener_may_call_back_into_control_point() {
    let mut server = mockito::Server::new();
    serve_description(&mut server, 1);
    let control_point = Arc::new(
        ControlPoint::with_callback_executor(isolated_config(), Arc::new(InlineExecutor)).unwrap(),
    );
    let listener = Arc::new(Unpinner {
        control_point: Mutex::new(Some(Arc::clone(&control_point))),
        recorder: RecordingListener::default(),
    });
    control_point.add_discovery_listener(listener.clone());
    control_point.initialize();

    control_point
        .add_pinned_device(&format!("{}/desc.xml", server.url()))
        .unwrap();
    assert!(wait_for(|| listener.recorder.lost.load(Ordering::SeqCst) == 1));
    assert_eq!(listener.recorder.discovered.load(Ordering::SeqCst), 1);
    assert!(control_point.device(UDN).is_none());
    assert_eq!(
        *listener.recorder.order.lock(),
        vec![format!("discover {UDN}"), format!("lost {UDN}")]
    );

    listener.control_point.lock().take();
    control_point.terminate();
}
