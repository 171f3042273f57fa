#![deny(unsafe_code)]
//! Plantower PMS5003 particulate sensor in passive mode
//!
//! The sensor only answers when asked, so a read is request, then one
//! 32-byte frame:
//!
//! ```text
//! 42 4D | len (28) | 13 data words | checksum
//! ```
//!
//! Word 6 (bytes 12-13) is PM2.5 under atmospheric conditions. The
//! checksum is the 16-bit sum of bytes 0..30.

use defmt::{debug, warn, Format};
use embassy_time::{with_timeout, Duration};
use embedded_io_async::{Read, Write};

/// Switch to passive (query) mode
const CMD_PASSIVE_MODE: [u8; 7] = [0x42, 0x4D, 0xE1, 0x00, 0x00, 0x01, 0x70];

/// Request one frame in passive mode
const CMD_READ: [u8; 7] = [0x42, 0x4D, 0xE2, 0x00, 0x00, 0x01, 0x71];

const FRAME_LEN: usize = 32;
const START: [u8; 2] = [0x42, 0x4D];

/// The sensor answers within a second of a request
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Bytes arriving this close together belong to a stale frame
const DRAIN_TIMEOUT: Duration = Duration::from_millis(20);

/// Returned instead of a concentration when no valid frame arrived
pub const READ_FAILED: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum FrameError {
    BadStart,
    BadLength,
    Checksum,
}

/// Extract PM2.5 (atmospheric, µg/m³) from a complete frame
pub fn decode_frame(frame: &[u8; FRAME_LEN]) -> Result<u16, FrameError> {
    if frame[..2] != START {
        return Err(FrameError::BadStart);
    }
    if u16::from_be_bytes([frame[2], frame[3]]) != (FRAME_LEN - 4) as u16 {
        return Err(FrameError::BadLength);
    }

    let sum = frame[..30]
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
    if sum != u16::from_be_bytes([frame[30], frame[31]]) {
        return Err(FrameError::Checksum);
    }

    Ok(u16::from_be_bytes([frame[12], frame[13]]))
}

/// PMS5003 on a UART
pub struct Pms5003<U> {
    uart: U,
}

impl<U: Read + Write> Pms5003<U> {
    pub fn new(uart: U) -> Self {
        Self { uart }
    }

    /// Put the sensor in passive mode
    pub async fn init(&mut self) {
        if self.uart.write_all(&CMD_PASSIVE_MODE).await.is_err() {
            warn!("PMS5003: failed to send passive mode command");
        }
        let _ = self.uart.flush().await;
        self.drain().await;
    }

    /// PM2.5 in µg/m³, or `READ_FAILED`
    pub async fn read_pm25(&mut self) -> i32 {
        self.drain().await;
        if self.uart.write_all(&CMD_READ).await.is_err() || self.uart.flush().await.is_err() {
            warn!("PMS5003: failed to send read request");
            return READ_FAILED;
        }

        let frame = match with_timeout(RESPONSE_TIMEOUT, self.read_frame()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!("PMS5003: UART read error");
                return READ_FAILED;
            }
            Err(_) => {
                warn!("PMS5003: no response");
                return READ_FAILED;
            }
        };

        match decode_frame(&frame) {
            Ok(pm25) => {
                debug!("PMS5003: PM2.5 {} ug/m3", pm25);
                pm25 as i32
            }
            Err(e) => {
                warn!("PMS5003: invalid frame ({})", e);
                READ_FAILED
            }
        }
    }

    /// Synchronise on the start bytes and read the rest of the frame
    async fn read_frame(&mut self) -> Option<[u8; FRAME_LEN]> {
        let mut frame = [0u8; FRAME_LEN];
        let mut byte = [0u8; 1];
        let mut matched = 0;
        while matched < START.len() {
            self.uart.read_exact(&mut byte).await.ok()?;
            matched = if byte[0] == START[matched] {
                matched + 1
            } else if byte[0] == START[0] {
                1
            } else {
                0
            };
        }
        frame[..2].copy_from_slice(&START);
        self.uart.read_exact(&mut frame[2..]).await.ok()?;
        Some(frame)
    }

    /// Discard anything left over from earlier frames
    async fn drain(&mut self) {
        let mut scratch = [0u8; FRAME_LEN];
        while let Ok(Ok(n)) = with_timeout(DRAIN_TIMEOUT, self.uart.read(&mut scratch)).await {
            if n == 0 {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_pm25(pm25: u16) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[..4].copy_from_slice(&[0x42, 0x4D, 0x00, 0x1C]);
        frame[12..14].copy_from_slice(&pm25.to_be_bytes());
        let sum = frame[..30].iter().map(|&b| b as u16).sum::<u16>();
        frame[30..].copy_from_slice(&sum.to_be_bytes());
        frame
    }

    #[test]
    fn test_decode_valid_frame() {
        assert_eq!(decode_frame(&frame_with_pm25(37)), Ok(37));
    }

    #[test]
    fn test_reject_corrupt_frame() {
        let mut frame = frame_with_pm25(37);
        frame[13] ^= 0x01;
        assert_eq!(decode_frame(&frame), Err(FrameError::Checksum));

        let mut frame = frame_with_pm25(37);
        frame[0] = 0x00;
        assert_eq!(decode_frame(&frame), Err(FrameError::BadStart));
    }

    #[test]
    fn test_command_checksums() {
        for cmd in [CMD_PASSIVE_MODE, CMD_READ] {
            let sum = cmd[..5].iter().map(|&b| b as u16).sum::<u16>();
            assert_eq!(sum.to_be_bytes(), [cmd[5], cmd[6]]);
        }
    }
}
