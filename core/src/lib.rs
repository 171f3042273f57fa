//! Platform-agnostic telemetry logic for the sensor-node firmware
//!
//! This crate contains the acquisition-and-publication cycle and the
//! configuration model. It has NO hardware dependencies: every peripheral is
//! reached through the traits in `hal-abstractions`.
//!
//! - **`config`**: persisted device/connection configuration
//! - **`sensors`**: per-cycle sampling with sentinel handling
//! - **`point`**: time-series point and its builder
//! - **`connectivity`**: provisioning and link-state tracking
//! - **`http`**: server URL model and the transport adapter for `reqwless`
//! - **`client`**: best-effort point writer
//! - **`app`**: boot sequence and the unbounded main loop

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

// Must come first so the logging macros are visible to the other modules
mod fmt;

pub mod app;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod http;
pub mod point;
pub mod sensors;

#[cfg(test)]
mod test_support;

pub use app::{AppParts, BootError, CycleOutcome, TelemetryApp, TimeSyncConfig};
pub use client::{ClientOptions, PublishError, TelemetryClient};
pub use config::{ConfigError, ConfigStore, DeviceConfig};
pub use connectivity::{ConnectivityError, ConnectivityManager, ConnectivityState};
pub use point::{FieldValue, TelemetryPoint, TelemetryPointBuilder};
pub use sensors::{Sample, SamplerConfig, SensorReading, SensorSampler, SensorSet};
