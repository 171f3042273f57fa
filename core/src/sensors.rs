//! Per-cycle sensor sampling
//!
//! Sensors are read one after another in a fixed order (particulate, CO2,
//! temperature/humidity). Drivers are not re-entrant, so reads are never
//! overlapped. Each read is followed by a display update and the sensor's
//! settle delay.
//!
//! Drivers signal failure with sentinel values:
//! - particulate: any negative value
//! - CO2: zero or negative
//! - temperature/humidity: none; only non-finite values are rejected
//!
//! An invalid reading is shown as `error` on the display and never reaches
//! the published point.

use core::fmt::Write;

use hal_abstractions::{ClimateSample, DelayNs, DisplayDriver, FontSize, SensorDriver, SensorKind};
use heapless::{String, Vec};

use crate::point::FieldValue;

/// Default per-sensor acquisition/settle delay
pub const DEFAULT_SETTLE_MS: u32 = 3000;

/// Text shown in place of a value when a reading is invalid
pub const ERROR_TEXT: &str = "error";

/// Display line buffer, wide enough for any formatted `f32`
type Line = String<48>;

/// Measured quantity carried by a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadingKind {
    Particulate,
    Co2,
    Temperature,
    Humidity,
}

/// One reading with its validity already decided
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorReading {
    kind: ReadingKind,
    value: FieldValue,
    valid: bool,
}

impl SensorReading {
    /// PM2.5 reading; negative values are the driver's error sentinel
    pub fn particulate(raw: i32) -> Self {
        Self {
            kind: ReadingKind::Particulate,
            value: FieldValue::Integer(raw.into()),
            valid: raw >= 0,
        }
    }

    /// CO2 reading; zero or negative values are the driver's error sentinel
    pub fn co2(raw: i32) -> Self {
        Self {
            kind: ReadingKind::Co2,
            value: FieldValue::Integer(raw.into()),
            valid: raw > 0,
        }
    }

    pub fn temperature(celsius: f32) -> Self {
        Self {
            kind: ReadingKind::Temperature,
            value: FieldValue::Float(celsius),
            valid: celsius.is_finite(),
        }
    }

    pub fn humidity(percent: f32) -> Self {
        Self {
            kind: ReadingKind::Humidity,
            value: FieldValue::Float(percent),
            valid: percent.is_finite(),
        }
    }

    pub fn kind(&self) -> ReadingKind {
        self.kind
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Usable value, `None` for an invalid reading
    pub fn value(&self) -> Option<FieldValue> {
        self.valid.then_some(self.value)
    }
}

/// Fahrenheit from Celsius
pub fn fahrenheit(celsius: f32) -> f32 {
    celsius * 1.8 + 32.0
}

/// All readings taken in one cycle, valid or not, in sampling order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    readings: Vec<SensorReading, 4>,
}

impl Sample {
    pub(crate) fn push(&mut self, reading: SensorReading) {
        // At most one reading per kind, so four always fit
        let _ = self.readings.push(reading);
    }

    pub fn readings(&self) -> &[SensorReading] {
        &self.readings
    }

    pub fn get(&self, kind: ReadingKind) -> Option<&SensorReading> {
        self.readings.iter().find(|r| r.kind == kind)
    }

    /// Readings that may be published
    pub fn valid(&self) -> impl Iterator<Item = &SensorReading> {
        self.readings.iter().filter(|r| r.valid)
    }
}

/// Which sensors are fitted on this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorSet {
    pub particulate: bool,
    pub co2: bool,
    pub climate: bool,
}

impl SensorSet {
    pub const ALL: Self = Self {
        particulate: true,
        co2: true,
        climate: true,
    };

    /// Enabled sensors in sampling order
    pub fn enabled(&self) -> impl Iterator<Item = SensorKind> {
        [
            (SensorKind::Particulate, self.particulate),
            (SensorKind::Co2, self.co2),
            (SensorKind::Climate, self.climate),
        ]
        .into_iter()
        .filter_map(|(kind, on)| on.then_some(kind))
    }
}

impl Default for SensorSet {
    fn default() -> Self {
        Self::ALL
    }
}

/// Sampler configuration
#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    pub sensors: SensorSet,
    /// Pause after each sensor read
    pub settle_ms: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sensors: SensorSet::ALL,
            settle_ms: DEFAULT_SETTLE_MS,
        }
    }
}

/// Coordinates reads across the enabled sensor set
pub struct SensorSampler<S> {
    driver: S,
    config: SamplerConfig,
}

impl<S: SensorDriver> SensorSampler<S> {
    pub fn new(driver: S, config: SamplerConfig) -> Self {
        Self { driver, config }
    }

    pub fn driver(&self) -> &S {
        &self.driver
    }

    /// Initialise every enabled sensor, in sampling order
    pub async fn init_sensors(&mut self) {
        for kind in self.config.sensors.enabled() {
            debug!("Initializing sensor {}", kind);
            self.driver.init(kind).await;
        }
    }

    /// Read all enabled sensors once
    ///
    /// The display shows each sensor's outcome as soon as it is read.
    pub async fn sample<D, L>(&mut self, display: &mut D, delay: &mut L) -> Sample
    where
        D: DisplayDriver,
        L: DelayNs,
    {
        let mut sample = Sample::default();

        for kind in self.config.sensors.enabled() {
            match kind {
                SensorKind::Particulate => {
                    let raw = self.driver.read_particulate().await;
                    let reading = SensorReading::particulate(raw);
                    if reading.is_valid() {
                        info!("PM2.5: {} ug/m3", raw);
                    } else {
                        warn!("Particulate sensor read failed (sentinel {})", raw);
                    }
                    show_single(display, "PM2", &reading).await;
                    sample.push(reading);
                }
                SensorKind::Co2 => {
                    let raw = self.driver.read_co2().await;
                    let reading = SensorReading::co2(raw);
                    if reading.is_valid() {
                        info!("CO2: {} ppm", raw);
                    } else {
                        warn!("CO2 sensor read failed (sentinel {})", raw);
                    }
                    show_single(display, "CO2", &reading).await;
                    sample.push(reading);
                }
                SensorKind::Climate => {
                    let ClimateSample {
                        temperature_c,
                        humidity,
                    } = self.driver.read_climate().await;
                    let temperature = SensorReading::temperature(temperature_c);
                    let relative_humidity = SensorReading::humidity(humidity);
                    if temperature.is_valid() && relative_humidity.is_valid() {
                        info!("Temperature: {} C, humidity: {} %", temperature_c, humidity);
                    } else {
                        warn!("Climate sensor returned a non-finite value");
                    }
                    show_climate(display, &temperature, &relative_humidity).await;
                    sample.push(temperature);
                    sample.push(relative_humidity);
                }
            }

            delay.delay_ms(self.config.settle_ms).await;
        }

        sample
    }
}

fn format_value(reading: &SensorReading, suffix: &str) -> Line {
    let mut line = Line::new();
    // Overflow only truncates the displayed text
    let _ = match reading.value() {
        Some(FieldValue::Integer(v)) => write!(line, "{}{}", v, suffix),
        Some(FieldValue::Float(v)) => write!(line, "{:.2}{}", v, suffix),
        None => write!(line, "{}", ERROR_TEXT),
    };
    line
}

async fn show_single<D: DisplayDriver>(display: &mut D, label: &str, reading: &SensorReading) {
    let value = format_value(reading, "");
    display.render(label, &value, FontSize::Large).await;
}

async fn show_climate<D: DisplayDriver>(
    display: &mut D,
    temperature: &SensorReading,
    humidity: &SensorReading,
) {
    let line1 = format_value(temperature, "");
    let line2 = format_value(humidity, "%");
    display.render(&line1, &line2, FontSize::Large).await;
}
