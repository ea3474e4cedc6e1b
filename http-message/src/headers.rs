//! Case-insensitive, order-preserving HTTP header map.

use std::fmt;

/// Header names used across SSDP, GENA, SOAP and description downloads.
pub mod names {
    pub const HOST: &str = "HOST";
    pub const MAN: &str = "MAN";
    pub const MX: &str = "MX";
    pub const ST: &str = "ST";
    pub const NT: &str = "NT";
    pub const NTS: &str = "NTS";
    pub const USN: &str = "USN";
    pub const CACHE_CONTROL: &str = "CACHE-CONTROL";
    pub const LOCATION: &str = "LOCATION";
    pub const SERVER: &str = "SERVER";
    pub const USER_AGENT: &str = "USER-AGENT";
    pub const CALLBACK: &str = "CALLBACK";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const SID: &str = "SID";
    pub const SEQ: &str = "SEQ";
    pub const SOAPACTION: &str = "SOAPACTION";
    pub const CONNECTION: &str = "Connection";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
}

/// Ordered header map with case-insensitive names.
///
/// Lookups ignore ASCII case while the name casing of the most recent `set`
/// is kept for output. Setting an existing name replaces the value in place,
/// so `len()` counts distinct names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders {
    entries: Vec<(String, String)>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Get a header value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// Set a header, replacing any existing value stored under the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.entries[i] = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    /// Remove a header and return its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Check whether a comma-separated header carries `token`, ignoring case.
    ///
    /// `Transfer-Encoding: gzip, chunked` contains `chunked`.
    pub fn contains_value(&self, name: &str, token: &str) -> bool {
        self.get(name).is_some_and(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl fmt::Display for HttpHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_get_is_case_insensitive() {
        let mut headers = HttpHeaders::new();
        headers.set("Content-Type", "text/xml");

        assert_eq!(headers.get("content-type"), Some("text/xml"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/xml"));
        assert_eq!(headers.get("Content-Length"), None);
    }

    #[test]
    fn test_last_write_wins_and_keeps_latest_casing() {
        let mut headers = HttpHeaders::new();
        headers.set("host", "a");
        headers.set("SERVER", "x");
        headers.set("HOST", "b");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("Host"), Some("b"));
        assert_eq!(headers.to_string(), "HOST: b\r\nSERVER: x\r\n");
    }

    #[test]
    fn test_remove() {
        let mut headers = HttpHeaders::new();
        headers.set("SID", "uuid:1");

        assert_eq!(headers.remove("sid"), Some("uuid:1".to_string()));
        assert!(headers.is_empty());
        assert_eq!(headers.remove("sid"), None);
    }

    #[rstest]
    #[case("chunked", true)]
    #[case("gzip, chunked", true)]
    #[case("Chunked", true)]
    #[case("gzip", false)]
    fn test_contains_value(#[case] value: &str, #[case] expected: bool) {
        let mut headers = HttpHeaders::new();
        headers.set("Transfer-Encoding", value);
        assert_eq!(headers.contains_value("transfer-encoding", "chunked"), expected);
    }

    proptest! {
        #[test]
        fn prop_lookup_ignores_case(name in "[A-Za-z][A-Za-z-]{0,15}", value in "[ -~]{0,30}") {
            let mut headers = HttpHeaders::new();
            headers.set(name.to_ascii_lowercase(), value.clone());
            headers.set(name.to_ascii_uppercase(), value.clone());
            prop_assert_eq!(headers.len(), 1);
            prop_assert_eq!(headers.get(&name), Some(value.as_str()));
        }
    }
}
