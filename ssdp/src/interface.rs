//! Network interface selection.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::address::{is_link_local, AddressFamily};

/// Which address families the control point runs SSDP on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    IpV4Only,
    IpV6Only,
    #[default]
    DualStack,
}

impl Protocol {
    pub fn supports(&self, family: AddressFamily) -> bool {
        match self {
            Protocol::IpV4Only => family == AddressFamily::V4,
            Protocol::IpV6Only => family == AddressFamily::V6,
            Protocol::DualStack => true,
        }
    }
}

/// One usable address of a local network interface.
///
/// An interface with both IPv4 and IPv6 addresses shows up once per family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub address: IpAddr,
    pub netmask: Option<IpAddr>,
    /// IPv6 zone index, 0 when unknown or for IPv4
    pub scope_id: u32,
}

impl NetworkInterface {
    pub fn new(name: impl Into<String>, address: IpAddr, netmask: Option<IpAddr>, scope_id: u32) -> Self {
        Self {
            name: name.into(),
            address,
            netmask,
            scope_id,
        }
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.address)
    }

    /// List non-loopback interfaces usable for `protocol`.
    ///
    /// IPv4 takes every address; IPv6 only the link-local one, since that is
    /// what the `FF02::C` group is scoped to. A non-empty `names` restricts the
    /// result to those interface names.
    pub fn list(protocol: Protocol, names: &[String]) -> std::io::Result<Vec<NetworkInterface>> {
        let mut interfaces = Vec::new();
        for iface in get_if_addrs::get_if_addrs()? {
            if iface.is_loopback() {
                continue;
            }
            if !names.is_empty() && !names.iter().any(|n| n == &iface.name) {
                continue;
            }
            let (address, netmask) = match &iface.addr {
                get_if_addrs::IfAddr::V4(v4) => (IpAddr::V4(v4.ip), IpAddr::V4(v4.netmask)),
                get_if_addrs::IfAddr::V6(v6) => (IpAddr::V6(v6.ip), IpAddr::V6(v6.netmask)),
            };
            let family = AddressFamily::of(&address);
            if !protocol.supports(family) {
                continue;
            }
            if family == AddressFamily::V6 && !is_link_local(&address) {
                continue;
            }
            let scope_id = match family {
                AddressFamily::V4 => 0,
                AddressFamily::V6 => interface_index(&iface.name),
            };
            tracing::debug!("Using interface {} ({}, scope {})", iface.name, address, scope_id);
            interfaces.push(NetworkInterface::new(iface.name.clone(), address, Some(netmask), scope_id));
        }
        Ok(interfaces)
    }

    /// Whether `other` is on this interface's IPv4 subnet.
    ///
    /// Always true for IPv6 and when no netmask is known.
    pub fn is_same_segment(&self, other: &IpAddr) -> bool {
        match (&self.address, self.netmask, other) {
            (IpAddr::V4(local), Some(IpAddr::V4(mask)), IpAddr::V4(remote)) => {
                let mask = u32::from(mask);
                (u32::from(*local) & mask) == (u32::from(*remote) & mask)
            }
            (IpAddr::V4(_), _, IpAddr::V6(_)) => false,
            _ => true,
        }
    }
}

#[cfg(unix)]
fn interface_index(name: &str) -> u32 {
    let Ok(name) = std::ffi::CString::new(name) else {
        return 0;
    };
    // SAFETY: `name` is a valid NUL-terminated string for the duration of the call
    unsafe { libc::if_nametoindex(name.as_ptr()) }
}

#[cfg(not(unix))]
fn interface_index(_name: &str) -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn v4_interface() -> NetworkInterface {
        NetworkInterface::new(
            "eth0",
            "192.168.1.10".parse().unwrap(),
            Some("255.255.255.0".parse().unwrap()),
            0,
        )
    }

    #[rstest]
    #[case("192.168.1.200", true)]
    #[case("192.168.2.1", false)]
    #[case("10.0.0.1", false)]
    fn test_is_same_segment(#[case] remote: &str, #[case] expected: bool) {
        assert_eq!(v4_interface().is_same_segment(&remote.parse().unwrap()), expected);
    }

    #[test]
    fn test_is_same_segment_without_netmask() {
        let iface = NetworkInterface::new("eth0", "192.168.1.10".parse().unwrap(), None, 0);
        assert!(iface.is_same_segment(&"10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_ipv6_is_always_same_segment() {
        let iface = NetworkInterface::new("eth0", "fe80::1".parse().unwrap(), None, 2);
        assert!(iface.is_same_segment(&"fe80::99".parse().unwrap()));
        assert_eq!(iface.family(), AddressFamily::V6);
    }

    #[rstest]
    #[case(Protocol::IpV4Only, AddressFamily::V4, true)]
    #[case(Protocol::IpV4Only, AddressFamily::V6, false)]
    #[case(Protocol::IpV6Only, AddressFamily::V4, false)]
    #[case(Protocol::IpV6Only, AddressFamily::V6, true)]
    #[case(Protocol::DualStack, AddressFamily::V4, true)]
    #[case(Protocol::DualStack, AddressFamily::V6, true)]
    fn test_protocol_supports(#[case] protocol: Protocol, #[case] family: AddressFamily, #[case] expected: bool) {
        assert_eq!(protocol.supports(family), expected);
    }

    #[test]
    fn test_list_excludes_loopback() {
        let interfaces = NetworkInterface::list(Protocol::DualStack, &[]).unwrap();
        assert!(interfaces.iter().all(|i| !i.address.is_loopback()));
    }
}
