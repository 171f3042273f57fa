#![deny(unsafe_code)]
//! Network error types

use defmt::Format;
use hal_abstractions::{TimeSyncError, TransportError};

/// Network operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum NetworkError {
    /// DNS resolution failed
    DnsError,
    /// Socket bind/connect error
    SocketError,
    /// Request timeout
    Timeout,
    /// Invalid response from server
    InvalidResponse,
    /// Server error (e.g., invalid stratum for NTP)
    ServerError,
    /// All configured servers failed
    AllServersFailed,
    /// Link or DHCP configuration is down
    LinkDown,
    /// TLS handshake failed
    TlsHandshakeFailed,
    /// TLS record read/write failed
    TlsIoError,
    /// No connection is open
    NotConnected,
}

impl core::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::DnsError => write!(f, "DNS resolution failed"),
            Self::SocketError => write!(f, "Socket error"),
            Self::Timeout => write!(f, "Request timeout"),
            Self::InvalidResponse => write!(f, "Invalid response"),
            Self::ServerError => write!(f, "Server error"),
            Self::AllServersFailed => write!(f, "All servers failed"),
            Self::LinkDown => write!(f, "Link down"),
            Self::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            Self::TlsIoError => write!(f, "TLS I/O error"),
            Self::NotConnected => write!(f, "Not connected"),
        }
    }
}

// Implement core::error::Error for no_std compatibility
impl core::error::Error for NetworkError {}

impl embedded_io_async::Error for NetworkError {
    fn kind(&self) -> embedded_io_async::ErrorKind {
        match self {
            Self::SocketError | Self::NotConnected => embedded_io_async::ErrorKind::BrokenPipe,
            Self::Timeout => embedded_io_async::ErrorKind::TimedOut,
            Self::InvalidResponse => embedded_io_async::ErrorKind::InvalidData,
            _ => embedded_io_async::ErrorKind::Other,
        }
    }
}

impl From<NetworkError> for TransportError {
    fn from(e: NetworkError) -> Self {
        match e {
            NetworkError::DnsError => TransportError::Dns,
            NetworkError::SocketError | NetworkError::LinkDown => TransportError::Connect,
            NetworkError::Timeout => TransportError::Timeout,
            NetworkError::TlsHandshakeFailed => TransportError::Tls,
            NetworkError::NotConnected => TransportError::NotConnected,
            NetworkError::InvalidResponse
            | NetworkError::ServerError
            | NetworkError::AllServersFailed
            | NetworkError::TlsIoError => TransportError::Io,
        }
    }
}

impl From<NetworkError> for TimeSyncError {
    fn from(e: NetworkError) -> Self {
        match e {
            NetworkError::LinkDown => TimeSyncError::NetworkDown,
            _ => TimeSyncError::AllServersFailed,
        }
    }
}
