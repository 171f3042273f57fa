#![deny(unsafe_code)]
//! Configuration document in internal flash
//!
//! Sector 11 (the last 128 KB of flash) holds a single file: the JSON
//! configuration, written at `0x080E_0000` with
//!
//! ```text
//! probe-rs download --chip STM32F405RG --binary-format bin \
//!     --base-address 0x080E0000 config.json
//! ```
//!
//! The document ends at the first erased (`0xFF`) or NUL byte. An erased
//! sector reads as "file not found".

use defmt::{debug, warn};
use embassy_stm32::flash::{Blocking, Flash};
use hal_abstractions::{FileStore, StorageError};

/// Offset of sector 11 from the start of flash
const CONFIG_OFFSET: u32 = 0x000E_0000;

/// Size of sector 11
const CONFIG_REGION_SIZE: usize = 128 * 1024;

/// Path of the only file the region holds
pub const CONFIG_FILE: &str = telemetry_core::config::CONFIG_PATH;

fn is_terminator(b: u8) -> bool {
    b == 0xFF || b == 0x00
}

/// Length of the document at the start of `bytes`, if it ends inside it
fn document_len(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| is_terminator(b))
}

/// Read-only file store over the config sector
pub struct FlashConfigStore {
    flash: Flash<'static, Blocking>,
}

impl FlashConfigStore {
    pub fn new(flash: Flash<'static, Blocking>) -> Self {
        Self { flash }
    }

    fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        self.flash
            .blocking_read(CONFIG_OFFSET + offset as u32, buf)
            .map_err(|e| {
                warn!("Flash read failed: {:?}", e);
                StorageError::ReadFailed
            })
    }
}

impl FileStore for FlashConfigStore {
    async fn read(&mut self, path: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        if path != CONFIG_FILE {
            return Err(StorageError::NotFound);
        }

        let window = buf.len().min(CONFIG_REGION_SIZE);
        self.read_at(0, &mut buf[..window])?;

        let len = match document_len(&buf[..window]) {
            Some(len) => len,
            None if window == CONFIG_REGION_SIZE => window,
            None => {
                // Fits exactly only if the next byte ends it
                let mut next = [0u8; 1];
                self.read_at(window, &mut next)?;
                if !is_terminator(next[0]) {
                    return Err(StorageError::TooLarge);
                }
                window
            }
        };

        if len == 0 {
            return Err(StorageError::NotFound);
        }
        debug!("Read {} byte config document from flash", len);
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_ends_at_erased_flash() {
        assert_eq!(document_len(b"{\"a\":1}\xff\xff"), Some(7));
        assert_eq!(document_len(b"{}\x00junk"), Some(2));
        assert_eq!(document_len(b"\xff\xff"), Some(0));
        assert_eq!(document_len(b"{\"a\":1}"), None);
    }
}
