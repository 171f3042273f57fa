#![deny(unsafe_code)]
//! SenseAir S8 CO2 sensor over Modbus RTU
//!
//! One read-input-registers request for register 3 (space CO2), answered
//! with a 7-byte frame carrying the concentration in ppm.

use defmt::{debug, warn, Format};
use embassy_time::{with_timeout, Duration};
use embedded_io_async::{Read, Write};

/// Read input register 0x0003 from the "any sensor" address 0xFE
const CMD_READ_CO2: [u8; 8] = [0xFE, 0x04, 0x00, 0x03, 0x00, 0x01, 0xD5, 0xC5];

const RESPONSE_LEN: usize = 7;

const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

const DRAIN_TIMEOUT: Duration = Duration::from_millis(20);

/// Returned instead of a concentration when the exchange failed
pub const READ_FAILED: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum ResponseError {
    /// Wrong address, function or byte count
    Header,
    Crc,
}

/// Modbus CRC-16 (reflected polynomial 0xA001, initial 0xFFFF)
pub fn modbus_crc(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF, |crc, &byte| {
        let mut crc = crc ^ byte as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xA001
            } else {
                crc >> 1
            };
        }
        crc
    })
}

/// CO2 in ppm from a register response
pub fn decode_response(response: &[u8; RESPONSE_LEN]) -> Result<u16, ResponseError> {
    if response[..3] != [0xFE, 0x04, 0x02] {
        return Err(ResponseError::Header);
    }
    // CRC is transmitted low byte first
    if modbus_crc(&response[..5]).to_le_bytes() != [response[5], response[6]] {
        return Err(ResponseError::Crc);
    }
    Ok(u16::from_be_bytes([response[3], response[4]]))
}

/// S8 on a UART
pub struct SenseairS8<U> {
    uart: U,
}

impl<U: Read + Write> SenseairS8<U> {
    pub fn new(uart: U) -> Self {
        Self { uart }
    }

    /// CO2 in ppm, or `READ_FAILED`
    pub async fn read_co2(&mut self) -> i32 {
        let mut scratch = [0u8; 16];
        while let Ok(Ok(n)) = with_timeout(DRAIN_TIMEOUT, self.uart.read(&mut scratch)).await {
            if n == 0 {
                break;
            }
        }

        if self.uart.write_all(&CMD_READ_CO2).await.is_err() || self.uart.flush().await.is_err() {
            warn!("S8: failed to send request");
            return READ_FAILED;
        }

        let mut response = [0u8; RESPONSE_LEN];
        match with_timeout(RESPONSE_TIMEOUT, self.uart.read_exact(&mut response)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                warn!("S8: UART read error");
                return READ_FAILED;
            }
            Err(_) => {
                warn!("S8: no response");
                return READ_FAILED;
            }
        }

        match decode_response(&response) {
            Ok(ppm) => {
                debug!("S8: CO2 {} ppm", ppm);
                ppm as i32
            }
            Err(e) => {
                warn!("S8: invalid response ({})", e);
                READ_FAILED
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(ppm: u16) -> [u8; RESPONSE_LEN] {
        let mut r = [0xFE, 0x04, 0x02, 0, 0, 0, 0];
        r[3..5].copy_from_slice(&ppm.to_be_bytes());
        let crc = modbus_crc(&r[..5]).to_le_bytes();
        r[5..].copy_from_slice(&crc);
        r
    }

    #[test]
    fn test_request_crc() {
        assert_eq!(modbus_crc(&CMD_READ_CO2[..6]).to_le_bytes(), [0xD5, 0xC5]);
    }

    #[test]
    fn test_decode_response() {
        assert_eq!(decode_response(&response(612)), Ok(612));

        let mut bad = response(612);
        bad[4] ^= 0x10;
        assert_eq!(decode_response(&bad), Err(ResponseError::Crc));

        let mut bad = response(612);
        bad[1] = 0x84;
        assert_eq!(decode_response(&bad), Err(ResponseError::Header));
    }
}
