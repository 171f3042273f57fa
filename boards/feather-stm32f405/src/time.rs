#![deny(unsafe_code)]
//! Wall-clock time derived from the last SNTP sync
//!
//! SNTP stores the Unix time of the monotonic epoch (boot). The current
//! wall time is that offset plus `embassy_time::Instant::now()`. Until the
//! first sync no wall time is available and certificate checks that need
//! one fail.

use core::sync::atomic::{AtomicU32, Ordering};

use defmt::Format;
use embassy_time::Instant;

/// NTP epoch offset (1900-01-01 to 1970-01-01 in seconds)
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Unix seconds at boot, 0 until synchronised
static BOOT_UNIX_SECS: AtomicU32 = AtomicU32::new(0);

/// Timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct Timestamp {
    /// Unix timestamp in seconds since epoch (1970-01-01 00:00:00 UTC)
    pub unix_secs: u64,
    /// Microseconds component (0-999,999)
    pub micros: u32,
}

impl Timestamp {
    pub const fn new(unix_secs: u64, micros: u32) -> Self {
        Self { unix_secs, micros }
    }

    /// Convert from NTP timestamp (seconds since 1900-01-01)
    pub fn from_ntp(ntp_secs: u64, ntp_frac: u32) -> Self {
        let unix_secs = ntp_secs.saturating_sub(NTP_UNIX_OFFSET);
        // NTP fraction is in units of 2^-32 seconds
        let micros = ((ntp_frac as u64 * 1_000_000) >> 32) as u32;
        Self::new(unix_secs, micros)
    }

    /// Add a correction, carrying into seconds
    pub fn add_micros(self, micros: u64) -> Self {
        let total = self.micros as u64 + micros;
        Self::new(
            self.unix_secs.saturating_add(total / 1_000_000),
            (total % 1_000_000) as u32,
        )
    }
}

/// Record a synchronised time measured at `at`
pub fn set_wall_clock(timestamp: Timestamp, at: Instant) {
    let boot = timestamp.unix_secs.saturating_sub(at.as_secs());
    BOOT_UNIX_SECS.store(boot as u32, Ordering::Relaxed);
}

/// Current Unix time in seconds, if synchronised
pub fn now_unix_secs() -> Option<u64> {
    match BOOT_UNIX_SECS.load(Ordering::Relaxed) {
        0 => None,
        boot => Some(boot as u64 + Instant::now().as_secs()),
    }
}

/// Certificate validity clock for embedded-tls
pub struct WallClock;

impl embedded_tls::TlsClock for WallClock {
    fn now() -> Option<u64> {
        now_unix_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ntp_to_unix_conversion() {
        let ts = Timestamp::from_ntp(NTP_UNIX_OFFSET, 0);
        assert_eq!(ts.unix_secs, 0);
        assert_eq!(ts.micros, 0);
        assert_eq!(Timestamp::from_ntp(NTP_UNIX_OFFSET + 5, 1 << 31).micros, 500_000);
    }

    #[test]
    fn test_add_micros_carries() {
        let ts = Timestamp::new(10, 999_900).add_micros(250);
        assert_eq!(ts, Timestamp::new(11, 150));
    }
}
