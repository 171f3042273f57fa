//! Network layer for the W5500 and embassy-net
//!
//! - **`config`**: Configuration structs with `Default` implementations
//! - **`error`**: Error enum for network operations
//! - **`link`**: DHCP link status behind the `Radio` capability
//! - **`sntp`**: SNTP client behind the `TimeSync` capability
//! - **`socket`**: Async TCP socket wrapper for embedded-io-async
//! - **`transport`**: Plain and TLS 1.3 connections behind `Transport`

pub mod config;
pub mod error;
pub mod link;
pub mod sntp;
pub mod socket;
pub mod transport;

pub use config::{mac_from_uid, NetworkConfig, SntpConfig};
pub use link::EthernetLink;
pub use sntp::SntpClock;
pub use socket::SocketSlot;
pub use transport::NetTransport;
