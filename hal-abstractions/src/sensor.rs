//! Sensor driver capability
//!
//! Drivers report failures in-band with sentinel values instead of a
//! distinct error type. The sampler in the core decides what a sentinel
//! means; drivers only have to document which one they return.

use core::future::Future;

/// Physical sensor units on the node, in sampling order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorKind {
    /// PM2.5 particulate sensor (e.g. Plantower PMS5003)
    Particulate,
    /// CO2 sensor (e.g. SenseAir S8)
    Co2,
    /// Combined temperature/humidity sensor (e.g. SHT3x)
    Climate,
}

/// One temperature/humidity acquisition
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClimateSample {
    /// Temperature in degrees Celsius
    pub temperature_c: f32,
    /// Relative humidity in percent
    pub humidity: f32,
}

/// Synchronous per-sensor reads
///
/// Each read may take as long as the sensor needs to produce a fresh value.
pub trait SensorDriver {
    /// Prepare one sensor for sampling. Called once at boot for every
    /// enabled sensor.
    fn init(&mut self, kind: SensorKind) -> impl Future<Output = ()>;

    /// PM2.5 concentration in µg/m³, negative when no valid frame was read
    fn read_particulate(&mut self) -> impl Future<Output = i32>;

    /// CO2 concentration in ppm, zero or negative when the read failed
    fn read_co2(&mut self) -> impl Future<Output = i32>;

    /// Temperature and relative humidity
    fn read_climate(&mut self) -> impl Future<Output = ClimateSample>;
}
