//! URL helpers shared by description loading, GENA and SOAP.

use std::net::IpAddr;

use url::Url;

use crate::error::{HttpError, Result};

/// Parse `text` as an absolute `http://` URL with a host.
pub fn parse_http_url(text: &str) -> Result<Url> {
    let url = Url::parse(text).map_err(|e| HttpError::InvalidUrl(format!("{text}: {e}")))?;
    if url.scheme() != "http" || url.host_str().is_none() {
        return Err(HttpError::InvalidUrl(text.to_string()));
    }
    Ok(url)
}

pub fn is_http_url(text: &str) -> bool {
    parse_http_url(text).is_ok()
}

/// `HOST` header value for `url`: host plus explicit port, IPv6 bracketed.
pub fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| HttpError::InvalidUrl(url.to_string()))?;
    let port = url.port_or_known_default().unwrap_or(80);
    Ok(format!("{host}:{port}"))
}

/// Resolve `relative` against `base`; absolute inputs are returned as-is.
pub fn resolve_url(base: &str, relative: &str) -> Result<String> {
    let base = Url::parse(base).map_err(|e| HttpError::InvalidUrl(format!("{base}: {e}")))?;
    base.join(relative)
        .map(String::from)
        .map_err(|e| HttpError::InvalidUrl(format!("{relative}: {e}")))
}

/// Build `http://ip:port/path`, bracketing IPv6 literals.
pub fn http_url(ip: IpAddr, port: u16, path: &str) -> String {
    let path = path.trim_start_matches('/');
    match ip {
        IpAddr::V4(v4) => format!("http://{v4}:{port}/{path}"),
        IpAddr::V6(v6) => format!("http://[{v6}]:{port}/{path}"),
    }
}
