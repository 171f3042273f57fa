#![deny(unsafe_code)]
//! Core reset

use defmt::warn;
use hal_abstractions::Restart;

/// Restart through the SCB system reset request
pub struct SystemReset;

impl Restart for SystemReset {
    fn restart(&mut self) {
        warn!("Restarting device");
        cortex_m::peripheral::SCB::sys_reset();
    }
}
