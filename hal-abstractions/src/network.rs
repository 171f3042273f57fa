//! Network link and byte-stream transport capabilities
//!
//! - **`Radio`**: provisioning, link status and signal strength
//! - **`Transport`**: one outbound stream connection (plain TCP or TLS)
//!
//! The transport holds at most one open connection. Callers decide whether
//! to keep it open between requests; implementations only have to honour
//! `connect`/`close`.

use core::future::Future;

/// Link status reported by the radio stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkStatus {
    Up,
    Down,
}

/// Network link (WiFi radio, Ethernet PHY, ...)
pub trait Radio {
    /// Join a network, falling back to an access-point portal named
    /// `portal_name` for credential entry. Returns `false` once
    /// `timeout_secs` elapse without a connection.
    ///
    /// Runs to its own timeout; there is no way to cancel it.
    fn auto_connect(&mut self, portal_name: &str, timeout_secs: u32)
        -> impl Future<Output = bool>;

    /// Current link status. Implementations may use this call to drive
    /// their own reconnection attempts.
    fn link_status(&mut self) -> LinkStatus;

    /// Received signal strength in dBm
    fn rssi(&mut self) -> i32;
}

/// Server certificate handling for TLS connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TlsMode {
    /// Verify the server chain against the pinned root certificate
    Validated,
    /// Encrypt without verifying the server
    Insecure,
}

/// Channel security for one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Security {
    Plain,
    Tls(TlsMode),
}

/// Remote endpoint of a transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Endpoint<'a> {
    /// Host name (used for DNS and SNI)
    pub host: &'a str,
    pub port: u16,
    pub security: Security,
}

/// Transport errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// DNS resolution failed
    Dns,
    /// TCP connect failed
    Connect,
    /// TLS handshake or certificate check failed
    Tls,
    /// Read or write failed on an open connection
    Io,
    /// Operation attempted without an open connection
    NotConnected,
    /// Operation timed out
    Timeout,
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Dns => write!(f, "DNS resolution failed"),
            Self::Connect => write!(f, "connection failed"),
            Self::Tls => write!(f, "TLS handshake failed"),
            Self::Io => write!(f, "I/O error"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

impl core::error::Error for TransportError {}

/// Outbound byte-stream connection
pub trait Transport {
    /// Open a connection to `endpoint`, replacing any open one
    fn connect(&mut self, endpoint: &Endpoint<'_>)
        -> impl Future<Output = Result<(), TransportError>>;

    /// Whether a connection is currently open
    fn is_connected(&self) -> bool;

    /// Write and flush the whole buffer
    fn write_all(&mut self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>>;

    /// Read available bytes; `Ok(0)` means the peer closed the connection
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize, TransportError>>;

    /// Close the connection if one is open
    fn close(&mut self) -> impl Future<Output = ()>;
}
