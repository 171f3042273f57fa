//! HTTP glue between the InfluxDB client and `reqwless`
//!
//! The configured server URL is parsed here into the transport endpoint and
//! the request target. `TransportIo` presents a `Transport` connection to
//! `reqwless` through the `embedded-io-async` traits.

use core::fmt::{self, Write};

use embedded_io_async::{ErrorKind, ErrorType, Read};
use hal_abstractions::{Endpoint, Security, TlsMode, Transport, TransportError};
use heapless::{String, Vec};
use serde::Deserialize;

use crate::config::URL_MAX;

/// Longest accepted path prefix
pub const PREFIX_MAX: usize = 64;

/// Health endpoint path, relative to the URL prefix
pub const HEALTH_PATH: &str = "/health";

/// Write endpoint path, relative to the URL prefix
pub const WRITE_PATH: &str = "/api/v2/write";

/// URL errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UrlError {
    Empty,
    /// Scheme other than `http` or `https`
    UnsupportedScheme,
    MissingHost,
    InvalidPort,
    /// Query strings, fragments and user info are not accepted
    UnsupportedComponent,
    TooLong,
}

impl fmt::Display for UrlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty URL"),
            Self::UnsupportedScheme => write!(f, "unsupported URL scheme"),
            Self::MissingHost => write!(f, "missing host"),
            Self::InvalidPort => write!(f, "invalid port"),
            Self::UnsupportedComponent => write!(f, "unsupported URL component"),
            Self::TooLong => write!(f, "URL too long"),
        }
    }
}

impl core::error::Error for UrlError {}

/// Parsed InfluxDB server URL
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServerUrl {
    host: String<URL_MAX>,
    port: u16,
    tls: bool,
    prefix: String<PREFIX_MAX>,
}

impl ServerUrl {
    /// Parse `http[s]://host[:port][/prefix]`
    pub fn parse(url: &str) -> Result<Self, UrlError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(UrlError::Empty);
        }

        let (tls, rest) = if let Some(rest) = strip_prefix_ignore_case(url, "https://") {
            (true, rest)
        } else if let Some(rest) = strip_prefix_ignore_case(url, "http://") {
            (false, rest)
        } else {
            return Err(UrlError::UnsupportedScheme);
        };

        if rest.contains(['?', '#', '@']) {
            return Err(UrlError::UnsupportedComponent);
        }

        let (authority, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        let default_port = if tls { 443 } else { 80 };

        let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
            let end = v6.find(']').ok_or(UrlError::MissingHost)?;
            let port = match &v6[end + 1..] {
                "" => default_port,
                p => parse_port(p.strip_prefix(':').ok_or(UrlError::InvalidPort)?)?,
            };
            (&v6[..end], port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, parse_port(port)?),
                None => (authority, default_port),
            }
        };

        if host.is_empty() {
            return Err(UrlError::MissingHost);
        }

        Ok(Self {
            host: String::try_from(host).map_err(|_| UrlError::TooLong)?,
            port,
            tls,
            prefix: String::try_from(path.trim_end_matches('/')).map_err(|_| UrlError::TooLong)?,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Path prefix without a trailing slash, possibly empty
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Transport endpoint; `https` uses `tls_mode`
    pub fn endpoint(&self, tls_mode: TlsMode) -> Endpoint<'_> {
        Endpoint {
            host: &self.host,
            port: self.port,
            security: if self.tls {
                Security::Tls(tls_mode)
            } else {
                Security::Plain
            },
        }
    }

    /// Write the request target: prefix, `path`, then the percent-encoded
    /// query
    pub fn write_target<W: Write>(
        &self,
        out: &mut W,
        path: &str,
        query: &[(&str, &str)],
    ) -> fmt::Result {
        write!(out, "{}{}", self.prefix, path)?;
        for (i, (key, value)) in query.iter().enumerate() {
            out.write_char(if i == 0 { '?' } else { '&' })?;
            write_percent_encoded(out, key)?;
            out.write_char('=')?;
            write_percent_encoded(out, value)?;
        }
        Ok(())
    }

    /// Write the `Host` header value
    ///
    /// IPv6 hosts are bracketed and the scheme's default port is left out.
    pub fn write_host<W: Write>(&self, out: &mut W) -> fmt::Result {
        if self.host.contains(':') {
            write!(out, "[{}]", self.host)?;
        } else {
            out.write_str(&self.host)?;
        }
        if !self.is_default_port() {
            write!(out, ":{}", self.port)?;
        }
        Ok(())
    }

    fn is_default_port(&self) -> bool {
        self.port == if self.tls { 443 } else { 80 }
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn parse_port(s: &str) -> Result<u16, UrlError> {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => Err(UrlError::InvalidPort),
        Ok(port) => Ok(port),
    }
}

/// Write `s` with every byte outside the RFC 3986 unreserved set
/// percent-encoded
pub fn write_percent_encoded<W: Write>(out: &mut W, s: &str) -> fmt::Result {
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.write_char(b as char)?;
        } else {
            write!(out, "%{:02X}", b)?;
        }
    }
    Ok(())
}

/// Outgoing bytes collected before one `write_all`
const IO_TX_MAX: usize = 1024;

/// Transport error carried through the `embedded-io` traits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoError(pub TransportError);

impl embedded_io_async::Error for IoError {
    fn kind(&self) -> ErrorKind {
        match self.0 {
            TransportError::Connect => ErrorKind::ConnectionRefused,
            TransportError::NotConnected => ErrorKind::NotConnected,
            TransportError::Timeout => ErrorKind::TimedOut,
            _ => ErrorKind::Other,
        }
    }
}

/// `embedded-io-async` view of an open `Transport` connection
///
/// Writes are collected and handed to the transport as one `write_all`
/// when the HTTP client flushes or starts reading. The HTTP client reports
/// I/O failures without their cause, so the adapter keeps the last
/// transport error and whether the peer closed the connection.
pub struct TransportIo<'a, T> {
    transport: &'a mut T,
    pending: Vec<u8, IO_TX_MAX>,
    error: Option<TransportError>,
    peer_closed: bool,
}

impl<'a, T: Transport> TransportIo<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self {
            transport,
            pending: Vec::new(),
            error: None,
            peer_closed: false,
        }
    }

    /// Last error returned by the transport
    pub fn error(&self) -> Option<TransportError> {
        self.error
    }

    /// Whether a read hit the end of the stream
    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    async fn send_pending(&mut self) -> Result<(), IoError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let result = self.transport.write_all(&self.pending).await;
        self.pending.clear();
        result.map_err(|e| self.fail(e))
    }

    fn fail(&mut self, e: TransportError) -> IoError {
        self.error = Some(e);
        IoError(e)
    }
}

impl<T> ErrorType for TransportIo<'_, T> {
    type Error = IoError;
}

impl<T: Transport> Read for TransportIo<'_, T> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, IoError> {
        self.send_pending().await?;
        if buf.is_empty() {
            return Ok(0);
        }
        match self.transport.read(buf).await {
            Ok(0) => {
                self.peer_closed = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => Err(self.fail(e)),
        }
    }
}

impl<T: Transport> embedded_io_async::Write for TransportIo<'_, T> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, IoError> {
        if self.pending.is_full() {
            self.send_pending().await?;
        }
        let n = buf.len().min(self.pending.capacity() - self.pending.len());
        // Cannot fail: `n` bytes fit the free space
        let _ = self.pending.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    async fn flush(&mut self) -> Result<(), IoError> {
        self.send_pending().await
    }
}

#[derive(Deserialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

/// Human-readable reason from an InfluxDB error body
///
/// Uses the JSON `message` field when present, otherwise the body itself up
/// to the first invalid UTF-8 byte.
pub fn error_message(body: &[u8]) -> &str {
    if let Ok((ErrorBody { message }, _)) = serde_json_core::from_slice::<ErrorBody<'_>>(body) {
        return message;
    }
    match core::str::from_utf8(body) {
        Ok(s) => s.trim(),
        Err(e) => core::str::from_utf8(&body[..e.valid_up_to()])
            .unwrap_or_default()
            .trim(),
    }
}
