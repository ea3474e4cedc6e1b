//! HTTP/1.x message encoding and decoding.
//!
//! A single codec serves SSDP datagrams, GENA callbacks, SOAP calls and
//! description downloads. [`HttpMessage`] is generic over its start line so
//! requests and responses share header, body and framing logic.

use std::fmt;
use std::io::{BufRead, Read, Write};

use url::Url;

use crate::error::{HttpError, Result};
use crate::headers::{names, HttpHeaders};

pub const HTTP_1_0: &str = "HTTP/1.0";
pub const HTTP_1_1: &str = "HTTP/1.1";

/// Body bytes per chunk when writing `Transfer-Encoding: chunked`.
pub const CHUNK_SIZE: usize = 1024;

/// First line of an HTTP message.
pub trait StartLine: Clone + fmt::Debug + fmt::Display + Sized {
    /// Parse the line, without its trailing CRLF.
    fn parse(line: &str) -> Result<Self>;

    /// Protocol version token, e.g. `HTTP/1.1`.
    fn version(&self) -> &str;

    /// Whether a body without length framing runs until the peer closes.
    fn body_until_eof(&self, _keep_alive: bool) -> bool {
        false
    }
}

/// `METHOD URI VERSION`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub uri: String,
    pub version: String,
}

impl StartLine for RequestLine {
    fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(method), Some(uri), Some(version)) if version.starts_with("HTTP/") => {
                Ok(Self {
                    method: method.to_string(),
                    uri: uri.to_string(),
                    version: version.to_string(),
                })
            }
            _ => Err(HttpError::StartLine(line.to_string())),
        }
    }

    fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.method, self.uri, self.version)
    }
}

/// `VERSION STATUS REASON`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    pub status: u16,
    pub reason: String,
}

impl StartLine for StatusLine {
    fn parse(line: &str) -> Result<Self> {
        let mut parts = line.trim().splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let status = parts.next().and_then(|s| s.trim().parse::<u16>().ok());
        match status {
            Some(status) if version.starts_with("HTTP/") => Ok(Self {
                version: version.to_string(),
                status,
                reason: parts.next().unwrap_or_default().trim().to_string(),
            }),
            _ => Err(HttpError::StartLine(line.to_string())),
        }
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn body_until_eof(&self, keep_alive: bool) -> bool {
        !keep_alive && !matches!(self.status, 100..=199 | 204 | 304)
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.version, self.status, self.reason)
    }
}

/// Standard reason phrase for the status codes this stack produces or checks.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        412 => "Precondition Failed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "",
    }
}

/// An HTTP message: start line, headers and raw body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessage<L> {
    start_line: L,
    headers: HttpHeaders,
    body: Vec<u8>,
}

pub type HttpRequest = HttpMessage<RequestLine>;
pub type HttpResponse = HttpMessage<StatusLine>;

impl<L: StartLine> HttpMessage<L> {
    pub fn with_start_line(start_line: L) -> Self {
        Self {
            start_line,
            headers: HttpHeaders::new(),
            body: Vec::new(),
        }
    }

    pub fn start_line(&self) -> &L {
        &self.start_line
    }

    pub fn version(&self) -> &str {
        self.start_line.version()
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(name)
    }

    /// Raw body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8.
    ///
    /// A body that is not valid UTF-8 yields an empty string; callers that
    /// need to distinguish use [`HttpMessage::try_body_text`].
    pub fn body_text(&self) -> String {
        match self.try_body_text() {
            Ok(text) => text.to_string(),
            Err(e) => {
                tracing::debug!("Body is not valid UTF-8, treating as empty: {}", e);
                String::new()
            }
        }
    }

    pub fn try_body_text(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// Store `text` as the body, optionally announcing its length.
    pub fn set_body(&mut self, text: &str, with_content_length: bool) {
        self.set_body_binary(text.as_bytes().to_vec(), with_content_length);
    }

    pub fn set_body_binary(&mut self, body: Vec<u8>, with_content_length: bool) {
        if with_content_length {
            self.headers
                .set(names::CONTENT_LENGTH, body.len().to_string());
        }
        self.body = body;
    }

    pub fn is_chunked(&self) -> bool {
        self.headers
            .contains_value(names::TRANSFER_ENCODING, "chunked")
    }

    /// Parsed `Content-Length`, `None` when absent.
    pub fn content_length(&self) -> Result<Option<usize>> {
        match self.headers.get(names::CONTENT_LENGTH) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|_| HttpError::ContentLength(value.to_string())),
        }
    }

    /// Whether the connection stays open after this message.
    pub fn is_keep_alive(&self) -> bool {
        let connection = self.headers.get(names::CONNECTION);
        match self.version() {
            HTTP_1_1 => !connection.is_some_and(|c| c.trim().eq_ignore_ascii_case("close")),
            HTTP_1_0 => connection.is_some_and(|c| c.trim().eq_ignore_ascii_case("keep-alive")),
            _ => false,
        }
    }

    /// Encode the start line and headers, including the blank separator line.
    pub fn header_bytes(&self) -> Vec<u8> {
        format!("{}\r\n{}\r\n", self.start_line, self.headers).into_bytes()
    }

    /// Encode the whole message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header_bytes();
        if self.is_chunked() {
            for chunk in self.body.chunks(CHUNK_SIZE) {
                out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                out.extend_from_slice(chunk);
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b"0\r\n\r\n");
        } else {
            out.extend_from_slice(&self.body);
        }
        out
    }

    /// Write the encoded message and flush.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(&self.to_bytes())?;
        out.flush()?;
        Ok(())
    }

    /// Read one complete message from `input`.
    pub fn read_from<R: BufRead>(input: &mut R) -> Result<Self> {
        let start_line = loop {
            match read_line(input)? {
                None => return Err(HttpError::StartLine(String::new())),
                // Tolerate stray CRLF before the start line
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break L::parse(&line)?,
            }
        };

        let mut message = Self::with_start_line(start_line);
        while let Some(line) = read_line(input)? {
            if line.is_empty() {
                break;
            }
            match line.split_once(':') {
                Some((name, value)) if !name.trim().is_empty() => {
                    message.headers.set(name.trim(), value.trim());
                }
                _ => tracing::trace!("Skipping malformed header line: {:?}", line),
            }
        }

        message.body = if message.is_chunked() {
            read_chunked_body(input)?
        } else if let Some(length) = message.content_length()? {
            read_exact_body(input, length)?
        } else if message.start_line.body_until_eof(message.is_keep_alive()) {
            let mut body = Vec::new();
            input.read_to_end(&mut body)?;
            body
        } else {
            Vec::new()
        };
        Ok(message)
    }

    /// Decode a message held entirely in memory, e.g. a datagram.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        Self::read_from(&mut input)
    }
}

impl HttpRequest {
    /// Create an HTTP/1.1 request.
    pub fn new(method: &str, uri: &str) -> Self {
        Self::with_start_line(RequestLine {
            method: method.to_string(),
            uri: uri.to_string(),
            version: HTTP_1_1.to_string(),
        })
    }

    pub fn method(&self) -> &str {
        &self.start_line.method
    }

    pub fn uri(&self) -> &str {
        &self.start_line.uri
    }

    /// Point the request at `url`: the request target becomes its path and
    /// query, and optionally the `HOST` header is set from its authority.
    pub fn set_url(&mut self, url: &Url, with_host_header: bool) -> Result<()> {
        if url.scheme() != "http" {
            return Err(HttpError::InvalidUrl(url.to_string()));
        }
        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }
        self.start_line.uri = target;
        if with_host_header {
            self.headers.set(names::HOST, crate::urls::host_header(url)?);
        }
        Ok(())
    }
}

impl HttpResponse {
    /// Create an HTTP/1.1 response with the standard reason phrase.
    pub fn new(status: u16) -> Self {
        Self::with_start_line(StatusLine {
            version: HTTP_1_1.to_string(),
            status,
            reason: reason_phrase(status).to_string(),
        })
    }

    pub fn status(&self) -> u16 {
        self.start_line.status
    }

    pub fn reason(&self) -> &str {
        &self.start_line.reason
    }

    pub fn set_status(&mut self, status: u16) {
        self.start_line.status = status;
        self.start_line.reason = reason_phrase(status).to_string();
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status())
    }
}

/// Read a line terminated by LF, stripping CRLF. `None` at end of stream.
fn read_line<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut buf = Vec::new();
    if input.read_until(b'\n', &mut buf)? == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn read_exact_body<R: Read>(input: &mut R, length: usize) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(length.min(64 * 1024));
    let read = input.take(length as u64).read_to_end(&mut body)?;
    if read < length {
        return Err(HttpError::Truncated {
            expected: length,
            actual: read,
        });
    }
    Ok(body)
}

fn read_chunked_body<R: BufRead>(input: &mut R) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line = read_line(input)?.ok_or(HttpError::MissingLastChunk)?;
        let size_token = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_token, 16)
            .map_err(|_| HttpError::ChunkSize(line.clone()))?;

        if size == 0 {
            // Trailer section, discarded
            while let Some(trailer) = read_line(input)? {
                if trailer.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }

        let chunk = read_exact_body(input, size)?;
        body.extend_from_slice(&chunk);

        match read_line(input)? {
            Some(rest) if rest.is_empty() => {}
            Some(rest) => {
                return Err(HttpError::MalformedChunk(format!(
                    "expected CRLF after {size} bytes, found {rest:?}"
                )))
            }
            None => return Err(HttpError::MissingLastChunk),
        }
    }
}
