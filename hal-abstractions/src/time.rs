//! Wall-clock synchronisation capability

use core::future::Future;

/// Time synchronisation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimeSyncError {
    /// Every configured server failed
    AllServersFailed,
    /// No network available
    NetworkDown,
}

impl core::fmt::Display for TimeSyncError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AllServersFailed => write!(f, "all time servers failed"),
            Self::NetworkDown => write!(f, "network down"),
        }
    }
}

impl core::error::Error for TimeSyncError {}

/// One-shot clock synchronisation
pub trait TimeSync {
    /// Synchronise against the first responsive server and return the UTC
    /// time in Unix seconds. `timezone` is a POSIX TZ string for local
    /// presentation only.
    fn sync(
        &mut self,
        timezone: &str,
        servers: &[&str],
    ) -> impl Future<Output = Result<u64, TimeSyncError>>;
}
