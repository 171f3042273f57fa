#![deny(unsafe_code)]
//! Sensor drivers for the node
//!
//! - **`climate`**: SHT3x temperature/humidity over I2C
//! - **`pms5003`**: PM2.5 over UART, passive mode
//! - **`senseair_s8`**: CO2 over UART, Modbus RTU

pub mod climate;
pub mod pms5003;
pub mod senseair_s8;

use defmt::info;
use embedded_io_async::{Read, Write};
use hal_abstractions::{ClimateSample, SensorDriver, SensorKind};

use climate::{ClimateI2c, ClimateSensor};
use pms5003::Pms5003;
use senseair_s8::SenseairS8;

/// All three sensors behind the `SensorDriver` capability
pub struct BoardSensors<P, C> {
    particulate: Pms5003<P>,
    co2: SenseairS8<C>,
    climate: ClimateSensor,
}

impl<P, C> BoardSensors<P, C>
where
    P: Read + Write,
    C: Read + Write,
{
    pub fn new(pms_uart: P, s8_uart: C, i2c: ClimateI2c) -> Self {
        Self {
            particulate: Pms5003::new(pms_uart),
            co2: SenseairS8::new(s8_uart),
            climate: ClimateSensor::new(i2c),
        }
    }
}

impl<P, C> SensorDriver for BoardSensors<P, C>
where
    P: Read + Write,
    C: Read + Write,
{
    async fn init(&mut self, kind: SensorKind) {
        match kind {
            SensorKind::Particulate => self.particulate.init().await,
            // S8 and SHT3x need no setup
            SensorKind::Co2 | SensorKind::Climate => {}
        }
        info!("Sensor {} ready", kind);
    }

    async fn read_particulate(&mut self) -> i32 {
        self.particulate.read_pm25().await
    }

    async fn read_co2(&mut self) -> i32 {
        self.co2.read_co2().await
    }

    async fn read_climate(&mut self) -> ClimateSample {
        self.climate.measure()
    }
}
