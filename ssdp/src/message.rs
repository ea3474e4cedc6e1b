//! SSDP message decoding.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use upnp_http::{names, HttpHeaders, HttpRequest, HttpResponse};
use url::{Host, Url};

use crate::error::{Result, SsdpError};

/// `max-age` used when `CACHE-CONTROL` is missing or malformed.
pub const DEFAULT_MAX_AGE: u64 = 1800;

/// Advertised `max-age` values are capped to one day.
pub const MAX_MAX_AGE: u64 = 86_400;

/// Added to `max-age` before a device is considered gone.
pub const EXPIRE_MARGIN: Duration = Duration::from_secs(10);

/// Notification sub type carried in `NTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nts {
    Alive,
    ByeBye,
    Update,
}

impl Nts {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ssdp:alive" => Some(Nts::Alive),
            "ssdp:byebye" => Some(Nts::ByeBye),
            "ssdp:update" => Some(Nts::Update),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Nts::Alive => "ssdp:alive",
            Nts::ByeBye => "ssdp:byebye",
            Nts::Update => "ssdp:update",
        }
    }
}

impl fmt::Display for Nts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Multicast `NOTIFY`
    Notify,
    /// Unicast response to our `M-SEARCH`, with its status code
    SearchResponse(u16),
    /// Placeholder for a device added by location rather than SSDP
    Pinned,
}

/// A decoded SSDP message, immutable once built.
#[derive(Debug, Clone)]
pub struct SsdpMessage {
    kind: MessageKind,
    headers: HttpHeaders,
    uuid: String,
    message_type: String,
    nts: Option<Nts>,
    location: Option<String>,
    max_age: u64,
    expire_time: Instant,
    local_address: Option<IpAddr>,
    scope_id: u32,
    source: Option<SocketAddr>,
}

impl SsdpMessage {
    /// Decode a received datagram.
    ///
    /// Only `NOTIFY` requests and `M-SEARCH` responses are accepted. Messages
    /// whose `USN` carries no uuid are rejected.
    pub fn from_datagram(
        data: &[u8],
        source: SocketAddr,
        local_address: IpAddr,
        scope_id: u32,
    ) -> Result<Self> {
        let (kind, headers) = if data.starts_with(b"HTTP/") {
            let response = HttpResponse::from_bytes(data)?;
            (MessageKind::SearchResponse(response.status()), response.headers().clone())
        } else {
            let request = HttpRequest::from_bytes(data)?;
            if !request.method().eq_ignore_ascii_case("NOTIFY") {
                return Err(SsdpError::InvalidMessage(format!(
                    "unexpected method {}",
                    request.method()
                )));
            }
            (MessageKind::Notify, request.headers().clone())
        };
        let message = Self::from_headers(kind, headers, Some(local_address), scope_id, Some(source));
        if message.uuid.is_empty() {
            return Err(SsdpError::InvalidMessage(format!(
                "no uuid in USN {:?}",
                message.usn()
            )));
        }
        Ok(message)
    }

    /// Placeholder message for a device that was added by its description URL.
    ///
    /// Pinned messages never expire on their own.
    pub fn pinned(uuid: &str, location: &str, local_address: Option<IpAddr>) -> Self {
        let mut headers = HttpHeaders::new();
        headers.set(names::USN, uuid);
        headers.set(names::LOCATION, location);
        let mut message = Self::from_headers(MessageKind::Pinned, headers, local_address, 0, None);
        message.uuid = uuid.to_string();
        message.expire_time = far_future();
        message
    }

    fn from_headers(
        kind: MessageKind,
        headers: HttpHeaders,
        local_address: Option<IpAddr>,
        scope_id: u32,
        source: Option<SocketAddr>,
    ) -> Self {
        let (uuid, message_type) = parse_usn(headers.get(names::USN).unwrap_or_default());
        let nts = headers.get(names::NTS).and_then(Nts::parse);
        let location = headers.get(names::LOCATION).map(|l| l.trim().to_string());
        let max_age = parse_cache_control(headers.get(names::CACHE_CONTROL));
        let expire_time = Instant::now() + Duration::from_secs(max_age) + EXPIRE_MARGIN;
        Self {
            kind,
            headers,
            uuid,
            message_type,
            nts,
            location,
            max_age,
            expire_time,
            local_address,
            scope_id,
            source,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is_pinned(&self) -> bool {
        self.kind == MessageKind::Pinned
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Type part of the `USN`, empty for the bare `uuid:` form.
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn nts(&self) -> Option<Nts> {
        self.nts
    }

    pub fn is_byebye(&self) -> bool {
        self.nts == Some(Nts::ByeBye)
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn max_age(&self) -> u64 {
        self.max_age
    }

    pub fn expire_time(&self) -> Instant {
        self.expire_time
    }

    pub fn local_address(&self) -> Option<IpAddr> {
        self.local_address
    }

    pub fn scope_id(&self) -> u32 {
        self.scope_id
    }

    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    pub fn usn(&self) -> &str {
        self.headers.get(names::USN).unwrap_or_default()
    }

    pub fn server(&self) -> Option<&str> {
        self.headers.get(names::SERVER)
    }

    /// `NT` for notifications, `ST` for search responses.
    pub fn target(&self) -> Option<&str> {
        self.headers.get(names::NT).or_else(|| self.headers.get(names::ST))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Whether `LOCATION` fails to point at the host the packet came from.
    ///
    /// The location must be an `http://` URL whose host is the literal source
    /// address. Pinned messages were validated when they were added and are
    /// never invalid.
    pub fn is_invalid_location(&self, source: &IpAddr) -> bool {
        if self.is_pinned() {
            return false;
        }
        let Some(location) = self.location() else {
            return true;
        };
        let Ok(url) = Url::parse(location) else {
            return true;
        };
        if url.scheme() != "http" {
            return true;
        }
        let host = match url.host() {
            Some(Host::Ipv4(ip)) => IpAddr::V4(ip),
            Some(Host::Ipv6(ip)) => IpAddr::V6(ip),
            _ => return true,
        };
        host != *source
    }
}

impl fmt::Display for SsdpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.kind, self.usn())?;
        if let Some(nts) = self.nts {
            write!(f, " {}", nts)?;
        }
        if let Some(location) = &self.location {
            write!(f, " {}", location)?;
        }
        Ok(())
    }
}

/// Split a `USN` into uuid and type.
///
/// `uuid:X::upnp:rootdevice` gives `("uuid:X", "upnp:rootdevice")`, `uuid:X`
/// gives `("uuid:X", "")` and anything not starting with `uuid` gives empty strings.
pub fn parse_usn(usn: &str) -> (String, String) {
    let usn = usn.trim();
    if !usn.starts_with("uuid") {
        return (String::new(), String::new());
    }
    match usn.find("::") {
        Some(pos) => (usn[..pos].to_string(), usn[pos + 2..].to_string()),
        None => (usn.to_string(), String::new()),
    }
}

/// Read `max-age` from a `CACHE-CONTROL` value, falling back to [`DEFAULT_MAX_AGE`].
///
/// Values above [`MAX_MAX_AGE`] are clamped.
pub fn parse_cache_control(value: Option<&str>) -> u64 {
    let Some(value) = value else {
        return DEFAULT_MAX_AGE;
    };
    value
        .split(',')
        .map(str::trim)
        .find(|directive| {
            directive
                .get(..7)
                .is_some_and(|name| name.eq_ignore_ascii_case("max-age"))
        })
        .and_then(|directive| directive.split_once('='))
        .and_then(|(_, seconds)| seconds.trim().parse::<u64>().ok())
        .map_or(DEFAULT_MAX_AGE, |seconds| seconds.min(MAX_MAX_AGE))
}

fn far_future() -> Instant {
    // Roughly 30 years; Instant has no MAX
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365 * 30)
}
