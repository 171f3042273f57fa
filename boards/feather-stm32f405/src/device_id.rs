#![deny(unsafe_code)]
//! Device identity from the STM32F405 unique ID
//!
//! The factory-programmed 96-bit UID is stable across reboots and unique to
//! each chip. Its 24-character hex form is the device id reported to
//! InfluxDB.

use hal_abstractions::IdentityProvider;

/// Hardware class reported alongside the id
pub const DEVICE_CLASS: &str = "STM32F405";

/// Get the STM32F405 unique device ID as a hex string
pub fn uid_hex() -> &'static str {
    embassy_stm32::uid::uid_hex()
}

/// Get the raw 12-byte (96-bit) unique device ID
pub fn uid() -> &'static [u8; 12] {
    embassy_stm32::uid::uid()
}

/// Identity backed by the chip UID
pub struct BoardIdentity {
    id: &'static str,
}

impl BoardIdentity {
    pub fn new() -> Self {
        Self { id: uid_hex() }
    }
}

impl IdentityProvider for BoardIdentity {
    fn device_id(&self) -> &str {
        self.id
    }

    fn device_class(&self) -> &str {
        DEVICE_CLASS
    }
}
