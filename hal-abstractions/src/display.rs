//! Two-line text display capability

use core::future::Future;

/// Font size for a two-line screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FontSize {
    Small,
    Large,
}

/// Minimal display used for boot messages and per-sensor values
pub trait DisplayDriver {
    /// Replace the screen contents with two lines of text
    fn render(&mut self, line1: &str, line2: &str, size: FontSize) -> impl Future<Output = ()>;
}
