#![deny(unsafe_code)]
//! Network configuration structures

use embassy_time::Duration;

/// SNTP client configuration
///
/// Servers are supplied per call by the boot sequence.
#[derive(Debug, Clone)]
pub struct SntpConfig {
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Number of retry attempts per server
    pub retry_count: usize,
    /// Delay between attempts in milliseconds
    pub retry_backoff_ms: u64,
    /// Maximum accepted stratum level (1-15)
    pub max_stratum: u8,
}

impl Default for SntpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            retry_count: 3,
            retry_backoff_ms: 2000,
            max_stratum: 3,
        }
    }
}

/// Network stack configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Socket inactivity timeout for InfluxDB connections
    pub socket_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            socket_timeout: Duration::from_secs(10),
        }
    }
}

/// Locally administered MAC address derived from the chip UID
///
/// Stable across reboots and distinct between boards.
pub fn mac_from_uid(uid: &[u8; 12]) -> [u8; 6] {
    let mut mac = [0x02, 0, 0, 0, 0, 0];
    for (i, b) in uid.iter().enumerate() {
        mac[1 + i % 5] ^= b;
    }
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_is_locally_administered_unicast() {
        let mac = mac_from_uid(&[0xff; 12]);
        assert_eq!(mac[0], 0x02);
    }
}
