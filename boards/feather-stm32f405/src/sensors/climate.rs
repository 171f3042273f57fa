#![deny(unsafe_code)]
//! Sensirion SHT3x temperature/humidity sensor on the shared I2C1 bus
//!
//! Single-shot, high repeatability measurements through the `sht3x`
//! driver. The driver reports hundredths of a degree and of a percent.

use defmt::{debug, warn};
use embassy_embedded_hal::shared_bus::blocking::i2c::I2cDevice;
use embassy_stm32::i2c::I2c;
use embassy_stm32::mode::Blocking;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Delay;
use hal_abstractions::ClimateSample;
use sht3x::{Address, Repeatability, SHT3x};

/// Handle onto the I2C bus shared with the display
pub type ClimateI2c = I2cDevice<'static, CriticalSectionRawMutex, I2c<'static, Blocking>>;

/// SHT3x at the ADDR-low address (0x44)
pub struct ClimateSensor {
    sensor: SHT3x<ClimateI2c, Delay>,
}

impl ClimateSensor {
    pub fn new(i2c: ClimateI2c) -> Self {
        Self {
            sensor: SHT3x::new(i2c, Delay, Address::Low),
        }
    }

    /// Take one measurement
    ///
    /// Failures come back as NaN in both fields so the sample is rejected.
    pub fn measure(&mut self) -> ClimateSample {
        match self.sensor.measure(Repeatability::High) {
            Ok(measurement) => {
                let sample = ClimateSample {
                    temperature_c: measurement.temperature as f32 / 100.0,
                    humidity: measurement.humidity as f32 / 100.0,
                };
                debug!(
                    "SHT3x: {} C, {} %RH",
                    sample.temperature_c, sample.humidity
                );
                sample
            }
            Err(_) => {
                warn!("SHT3x: measurement failed");
                ClimateSample {
                    temperature_c: f32::NAN,
                    humidity: f32::NAN,
                }
            }
        }
    }
}
