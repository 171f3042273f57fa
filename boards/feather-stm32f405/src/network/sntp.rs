#![deny(unsafe_code)]
//! SNTP client backing the boot-time clock sync
//!
//! One request per attempt, servers tried in the order given, a fixed number
//! of attempts each. The result sets the wall clock used for certificate
//! validity checks.

use defmt::{error, info, warn, Debug2Format};
use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_time::{Duration, Instant, Timer};
use hal_abstractions::{TimeSync, TimeSyncError};

use crate::time::{set_wall_clock, Timestamp};

use super::config::SntpConfig;
use super::error::NetworkError;

/// SNTP port (UDP 123)
const SNTP_PORT: u16 = 123;

/// NTP packet size without extensions
const NTP_PACKET_LEN: usize = 48;

/// SNTP client for time synchronization
pub struct SntpClock {
    stack: Stack<'static>,
    config: SntpConfig,
}

impl SntpClock {
    pub fn new(stack: Stack<'static>, config: SntpConfig) -> Self {
        Self { stack, config }
    }

    async fn sync_servers(&self, servers: &[&str]) -> Result<Timestamp, NetworkError> {
        if !self.stack.is_config_up() {
            return Err(NetworkError::LinkDown);
        }

        for server in servers {
            for attempt in 0..self.config.retry_count {
                info!(
                    "Attempting SNTP sync with {} (attempt {})",
                    server,
                    attempt + 1
                );
                match self.sntp_request(server).await {
                    Ok((timestamp, at)) => {
                        set_wall_clock(timestamp, at);
                        return Ok(timestamp);
                    }
                    Err(e) => {
                        warn!("SNTP sync failed: {}, retrying...", e);
                        Timer::after_millis(self.config.retry_backoff_ms).await;
                    }
                }
            }
        }
        error!("All SNTP sync attempts failed");
        Err(NetworkError::AllServersFailed)
    }

    async fn sntp_request(&self, server: &str) -> Result<(Timestamp, Instant), NetworkError> {
        let server_ip = self
            .stack
            .dns_query(server, DnsQueryType::A)
            .await
            .map_err(|_| NetworkError::DnsError)?
            .first()
            .copied()
            .ok_or(NetworkError::DnsError)?;

        let server_endpoint = IpEndpoint::new(server_ip, SNTP_PORT);
        info!("Resolved {} to {}", server, Debug2Format(&server_endpoint));

        let mut rx_meta = [PacketMetadata::EMPTY; 2];
        let mut rx_buffer = [0u8; 64];
        let mut tx_meta = [PacketMetadata::EMPTY; 2];
        let mut tx_buffer = [0u8; 64];
        let mut socket = UdpSocket::new(
            self.stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        socket.bind(0).map_err(|_| NetworkError::SocketError)?;

        // LI=0, VN=3, Mode=3 (client)
        let mut request = [0u8; NTP_PACKET_LEN];
        request[0] = 0x1B;
        let transmit_time = Instant::now();
        socket
            .send_to(&request, server_endpoint)
            .await
            .map_err(|_| NetworkError::SocketError)?;

        let mut response = [0u8; NTP_PACKET_LEN];
        let timeout = Timer::after(Duration::from_millis(self.config.timeout_ms));
        let (recv_len, from_addr) =
            match embassy_futures::select::select(timeout, socket.recv_from(&mut response)).await {
                embassy_futures::select::Either::First(_) => return Err(NetworkError::Timeout),
                embassy_futures::select::Either::Second(result) => {
                    result.map_err(|_| NetworkError::SocketError)?
                }
            };
        let receive_time = Instant::now();

        if recv_len < NTP_PACKET_LEN || from_addr.endpoint.addr != server_ip {
            return Err(NetworkError::InvalidResponse);
        }

        let timestamp = parse_response(&response, self.config.max_stratum)?;
        let rtt_correction_micros = receive_time.duration_since(transmit_time).as_micros() / 2;
        let timestamp = timestamp.add_micros(rtt_correction_micros);

        info!(
            "NTP timestamp: {}.{:06} UTC (RTT correction: {} us)",
            timestamp.unix_secs, timestamp.micros, rtt_correction_micros
        );
        Ok((timestamp, receive_time))
    }
}

/// Validate a server response and extract its transmit timestamp
fn parse_response(
    response: &[u8; NTP_PACKET_LEN],
    max_stratum: u8,
) -> Result<Timestamp, NetworkError> {
    // Mode 4 (server) in the low three bits
    if response[0] & 0x07 != 4 {
        return Err(NetworkError::InvalidResponse);
    }

    let stratum = response[1];
    if stratum == 0 || stratum > max_stratum {
        warn!("Invalid stratum {} (max {})", stratum, max_stratum);
        return Err(NetworkError::ServerError);
    }

    let tx_secs =
        u32::from_be_bytes([response[40], response[41], response[42], response[43]]) as u64;
    let tx_frac = u32::from_be_bytes([response[44], response[45], response[46], response[47]]);
    if tx_secs == 0 {
        return Err(NetworkError::InvalidResponse);
    }

    Ok(Timestamp::from_ntp(tx_secs, tx_frac))
}

impl TimeSync for SntpClock {
    async fn sync(&mut self, timezone: &str, servers: &[&str]) -> Result<u64, TimeSyncError> {
        // Timestamps are kept in UTC; the zone only matters for display
        info!("Starting SNTP synchronization (display zone {})", timezone);
        self.sync_servers(servers)
            .await
            .map(|ts| ts.unix_secs)
            .map_err(TimeSyncError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(mode: u8, stratum: u8, tx_secs: u32) -> [u8; NTP_PACKET_LEN] {
        let mut packet = [0u8; NTP_PACKET_LEN];
        packet[0] = 0x18 | mode;
        packet[1] = stratum;
        packet[40..44].copy_from_slice(&tx_secs.to_be_bytes());
        packet
    }

    #[test]
    fn test_parse_valid_response() {
        let ts = parse_response(&response(4, 2, 3_913_056_000), 3).unwrap();
        assert_eq!(ts.unix_secs, 3_913_056_000 - 2_208_988_800);
    }

    #[test]
    fn test_reject_bad_stratum_and_mode() {
        assert_eq!(
            parse_response(&response(4, 0, 1), 3),
            Err(NetworkError::ServerError)
        );
        assert_eq!(
            parse_response(&response(4, 4, 1), 3),
            Err(NetworkError::ServerError)
        );
        assert_eq!(
            parse_response(&response(3, 2, 1), 3),
            Err(NetworkError::InvalidResponse)
        );
    }
}
