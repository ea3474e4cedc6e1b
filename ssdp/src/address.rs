//! SSDP multicast groups.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6};

pub const SSDP_PORT: u16 = 1900;

pub const SSDP_MULTICAST_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Link-local scoped SSDP group `FF02::C`.
pub const SSDP_MULTICAST_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x000c);

/// Multicast TTL / hop limit for outgoing datagrams.
pub const SSDP_TTL: u32 = 4;

/// Address family a single SSDP socket operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    pub fn group(&self) -> IpAddr {
        match self {
            AddressFamily::V4 => IpAddr::V4(SSDP_MULTICAST_V4),
            AddressFamily::V6 => IpAddr::V6(SSDP_MULTICAST_V6),
        }
    }

    /// Destination for multicast sends; IPv6 carries the interface scope id.
    pub fn group_socket_addr(&self, scope_id: u32) -> SocketAddr {
        match self {
            AddressFamily::V4 => SocketAddr::new(self.group(), SSDP_PORT),
            AddressFamily::V6 => {
                SocketAddr::V6(SocketAddrV6::new(SSDP_MULTICAST_V6, SSDP_PORT, 0, scope_id))
            }
        }
    }

    /// Value of the `HOST` header for multicast messages.
    pub fn host_header(&self) -> String {
        match self {
            AddressFamily::V4 => format!("{}:{}", SSDP_MULTICAST_V4, SSDP_PORT),
            AddressFamily::V6 => format!("[{}]:{}", SSDP_MULTICAST_V6.to_string().to_uppercase(), SSDP_PORT),
        }
    }

    pub fn unspecified(&self) -> IpAddr {
        match self {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

/// `169.254.0.0/16` or `fe80::/10`.
pub fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}
