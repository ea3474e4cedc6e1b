//! Blocking HTTP client built on the message codec.

use std::io::BufReader;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::Duration;

use parking_lot::Mutex;
use url::Url;

use crate::error::{HttpError, Result};
use crate::headers::names;
use crate::message::{HttpRequest, HttpResponse};
use crate::urls::parse_http_url;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Value sent in `USER-AGENT` unless the request already carries one.
pub const USER_AGENT: &str = concat!("upnp-cp/", env!("CARGO_PKG_VERSION"), " UPnP/1.0");

const MAX_REDIRECTS: usize = 2;

struct Connection {
    address: SocketAddr,
    stream: BufReader<TcpStream>,
}

/// A minimal HTTP/1.1 client for description downloads, SOAP and GENA.
///
/// With keep-alive enabled the client holds on to the last connection and
/// reuses it for the next request to the same address, reconnecting once if
/// the peer closed it in the meantime.
pub struct HttpClient {
    keep_alive: bool,
    connect_timeout: Duration,
    read_timeout: Duration,
    scope_id: u32,
    connection: Mutex<Option<Connection>>,
    local_address: Mutex<Option<IpAddr>>,
}

impl HttpClient {
    pub fn new(keep_alive: bool) -> Self {
        Self {
            keep_alive,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            scope_id: 0,
            connection: Mutex::new(None),
            local_address: Mutex::new(None),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Scope id applied to IPv6 link-local targets that do not carry one.
    pub fn with_scope_id(mut self, scope_id: u32) -> Self {
        self.scope_id = scope_id;
        self
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Local address of the most recently opened connection.
    pub fn local_address(&self) -> Option<IpAddr> {
        *self.local_address.lock()
    }

    /// Send `request` to `url` and read the response, whatever its status.
    pub fn send(&self, url: &Url, mut request: HttpRequest) -> Result<HttpResponse> {
        request.set_url(url, true)?;
        request.set_header(
            names::CONNECTION,
            if self.keep_alive { "keep-alive" } else { "close" },
        );
        if !request.headers().contains(names::USER_AGENT) {
            request.set_header(names::USER_AGENT, USER_AGENT);
        }
        let address = self.resolve(url)?;

        // The connection is taken out of the lock for the duration of the exchange
        let reusable = self
            .connection
            .lock()
            .take()
            .filter(|connection| connection.address == address);
        if let Some(connection) = reusable {
            match self.exchange(connection, &request) {
                Ok(response) => return Ok(response),
                Err(e) if e.is_io() => {
                    tracing::debug!("Kept-alive connection to {} failed, reconnecting: {}", address, e);
                }
                Err(e) => return Err(e),
            }
        }
        let connection = self.connect(address)?;
        self.exchange(connection, &request)
    }

    /// Send `request` to the URL given as text.
    pub fn post(&self, url: &str, request: HttpRequest) -> Result<HttpResponse> {
        let url = parse_http_url(url)?;
        self.send(&url, request)
    }

    /// `GET` a resource, following up to two redirects, and require `200 OK`.
    pub fn download(&self, url: &str) -> Result<HttpResponse> {
        let mut current = parse_http_url(url)?;
        for _ in 0..=MAX_REDIRECTS {
            let response = self.send(&current, HttpRequest::new("GET", "/"))?;
            match response.status() {
                200 => return Ok(response),
                301 | 302 | 303 | 307 | 308 => {
                    let location = response
                        .header(names::LOCATION)
                        .ok_or(HttpError::Status(response.status()))?;
                    tracing::debug!("Redirected from {} to {}", current, location);
                    current = current
                        .join(location)
                        .map_err(|e| HttpError::InvalidUrl(format!("{location}: {e}")))?;
                }
                status => return Err(HttpError::Status(status)),
            }
        }
        Err(HttpError::TooManyRedirects(url.to_string()))
    }

    pub fn download_string(&self, url: &str) -> Result<String> {
        Ok(self.download(url)?.body_text())
    }

    pub fn download_binary(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.download(url)?;
        Ok(response.body().to_vec())
    }

    /// Drop any kept-alive connection.
    pub fn close(&self) {
        self.connection.lock().take();
    }

    fn exchange(&self, mut connection: Connection, request: &HttpRequest) -> Result<HttpResponse> {
        request.write_to(connection.stream.get_mut())?;
        let response = HttpResponse::read_from(&mut connection.stream)?;
        if self.keep_alive && response.is_keep_alive() {
            *self.connection.lock() = Some(connection);
        }
        Ok(response)
    }

    fn connect(&self, address: SocketAddr) -> Result<Connection> {
        let stream = TcpStream::connect_timeout(&address, self.connect_timeout)?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        stream.set_write_timeout(Some(self.read_timeout))?;
        *self.local_address.lock() = Some(stream.local_addr()?.ip());
        Ok(Connection {
            address,
            stream: BufReader::new(stream),
        })
    }

    fn resolve(&self, url: &Url) -> Result<SocketAddr> {
        let mut address = url
            .socket_addrs(|| Some(80))?
            .into_iter()
            .next()
            .ok_or_else(|| HttpError::InvalidUrl(url.to_string()))?;
        if let SocketAddr::V6(v6) = &mut address {
            let link_local = (v6.ip().segments()[0] & 0xffc0) == 0xfe80;
            if link_local && v6.scope_id() == 0 {
                v6.set_scope_id(self.scope_id);
            }
        }
        Ok(address)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_defaults() {
        let client = HttpClient::default();
        assert!(!client.is_keep_alive());
        assert!(client.local_address().is_none());
    }

    #[test]
    fn test_resolve_applies_scope_id_to_link_local() {
        let client = HttpClient::new(false).with_scope_id(3);
        let url = Url::parse("http://[fe80::1]:8080/").unwrap();
        match client.resolve(&url).unwrap() {
            SocketAddr::V6(v6) => assert_eq!(v6.scope_id(), 3),
            other => panic!("Expected IPv6 address, got {}", other),
        }

        let url = Url::parse("http://[2001:db8::1]:8080/").unwrap();
        match client.resolve(&url).unwrap() {
            SocketAddr::V6(v6) => assert_eq!(v6.scope_id(), 0),
            other => panic!("Expected IPv6 address, got {}", other),
        }
    }

    #[test]
    fn test_rejects_non_http_url() {
        let client = HttpClient::default();
        assert!(matches!(
            client.download("ftp://10.0.0.1/file"),
            Err(HttpError::InvalidUrl(_))
        ));
    }
}
