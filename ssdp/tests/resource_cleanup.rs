//! Tests for socket and thread cleanup across server lifecycles

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use upnp_ssdp::{NetworkInterface, SsdpMessage, SsdpSearchServer, SsdpSearchServerList, SsdpServer};

fn loopback() -> NetworkInterface {
    NetworkInterface::new(
        "lo",
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        Some("255.0.0.0".parse().unwrap()),
        0,
    )
}

fn ignore() -> Arc<dyn Fn(SsdpMessage) + Send + Sync> {
    Arc::new(|_: SsdpMessage| {})
}

#[test]
fn test_stop_returns_promptly_while_receiving() {
    let server = SsdpSearchServer::new(loopback(), ignore());
    server.open().unwrap();
    server.start().unwrap();

    // The receive thread is blocked in recv_from here
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    server.stop();
    server.close();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(server.local_addr().is_none());
}

#[test]
fn test_drop_without_start() {
    let server = SsdpSearchServer::new(loopback(), ignore());
    server.open().unwrap();
    // Dropped here with an open socket and no thread
}

#[test]
fn test_restart_sequence() {
    let server = SsdpSearchServer::new(loopback(), ignore());
    for _ in 0..3 {
        server.open().unwrap();
        server.start().unwrap();
        assert!(server.is_started());
        server.stop();
        server.close();
        assert!(!server.is_started());
    }
}

#[test]
fn test_socket_released_after_close() {
    let server = SsdpSearchServer::new(loopback(), ignore());
    server.open().unwrap();
    let address = server.local_addr().unwrap();
    server.close();

    // The ephemeral port can be bound again once the socket is gone
    let rebound = UdpSocket::bind(address);
    assert!(rebound.is_ok());
}

#[test]
fn test_list_survives_repeated_lifecycle_calls() {
    let list = SsdpSearchServerList::for_interfaces(&[loopback()], true, ignore());
    list.stop();
    list.start();
    list.start();
    assert!(list.is_started());
    list.stop();
    list.stop();
    assert!(!list.is_started());
}
