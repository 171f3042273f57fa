//! Hardware abstraction traits for the sensor-node firmware
//!
//! This crate defines the capabilities the telemetry core consumes. BSPs
//! implement these traits; the core never touches a peripheral directly.
//!
//! All I/O-bound methods return futures so a board can run the whole
//! telemetry cycle inside a single cooperative task. Callers await each call
//! before issuing the next one, so implementations may assume they are never
//! re-entered.

#![no_std]
#![deny(unsafe_code)]
#![deny(warnings)]

pub mod display;
pub mod network;
pub mod sensor;
pub mod storage;
pub mod system;
pub mod time;

pub use display::{DisplayDriver, FontSize};
pub use network::{Endpoint, LinkStatus, Radio, Security, TlsMode, Transport, TransportError};
pub use sensor::{ClimateSample, SensorDriver, SensorKind};
pub use storage::{FileStore, StorageError};
pub use system::{IdentityProvider, Restart};
pub use time::{TimeSync, TimeSyncError};

/// Async delay provider used for sensor settle times and loop pauses
pub use embedded_hal_async::delay::DelayNs;
