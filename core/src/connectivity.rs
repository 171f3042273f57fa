//! Network provisioning and link-state tracking
//!
//! Provisioning happens once at boot and may block for the full portal
//! timeout. After that the state follows the link status polled once per
//! cycle; the radio stack reconnects on its own and no backoff is applied
//! here.

use hal_abstractions::{LinkStatus, Radio};
use heapless::String;

/// How long provisioning may wait for a network before giving up
pub const PROVISIONING_TIMEOUT_SECS: u32 = 120;

/// Prefix of the provisioning portal name
pub const PORTAL_PREFIX: &str = "AIRGRADIENT-";

/// Maximum portal name length
pub const PORTAL_NAME_MAX: usize = 48;

/// Link state as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectivityState {
    Disconnected,
    Provisioning,
    Connected,
}

/// Connectivity errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectivityError {
    /// No network joined before the provisioning timeout
    ProvisioningTimeout,
}

impl core::fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ProvisioningTimeout => write!(f, "provisioning timed out"),
        }
    }
}

impl core::error::Error for ConnectivityError {}

/// Portal name for a device identity, cut to `PORTAL_NAME_MAX` bytes
pub fn portal_name(device_id: &str) -> String<PORTAL_NAME_MAX> {
    let mut name = String::new();
    let _ = name.push_str(PORTAL_PREFIX);

    let mut end = device_id.len().min(PORTAL_NAME_MAX - PORTAL_PREFIX.len());
    while !device_id.is_char_boundary(end) {
        end -= 1;
    }
    if end < device_id.len() {
        warn!("Device id too long for portal name, truncated");
    }
    // Cannot fail: bounded by the remaining capacity above
    let _ = name.push_str(&device_id[..end]);
    name
}

/// Tracks the link on top of a `Radio`
pub struct ConnectivityManager<R> {
    radio: R,
    state: ConnectivityState,
}

impl<R: Radio> ConnectivityManager<R> {
    pub fn new(radio: R) -> Self {
        Self {
            radio,
            state: ConnectivityState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectivityState::Connected
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Join a network, opening the provisioning portal if needed
    ///
    /// A timeout is fatal to the caller; the manager itself falls back to
    /// `Disconnected`.
    pub async fn provision(&mut self, portal_name: &str) -> Result<(), ConnectivityError> {
        info!("Provisioning network via portal {}", portal_name);
        self.state = ConnectivityState::Provisioning;

        if self
            .radio
            .auto_connect(portal_name, PROVISIONING_TIMEOUT_SECS)
            .await
        {
            info!("Network connected");
            self.state = ConnectivityState::Connected;
            Ok(())
        } else {
            error!(
                "Network provisioning timed out after {} s",
                PROVISIONING_TIMEOUT_SECS
            );
            self.state = ConnectivityState::Disconnected;
            Err(ConnectivityError::ProvisioningTimeout)
        }
    }

    /// Refresh the state from the current link status
    pub fn poll(&mut self) -> ConnectivityState {
        let next = match self.radio.link_status() {
            LinkStatus::Up => ConnectivityState::Connected,
            LinkStatus::Down => ConnectivityState::Disconnected,
        };

        match (self.state, next) {
            (ConnectivityState::Connected, ConnectivityState::Disconnected) => {
                warn!("Network connection lost")
            }
            (ConnectivityState::Disconnected, ConnectivityState::Connected) => {
                info!("Network connection restored")
            }
            _ => {}
        }

        self.state = next;
        next
    }

    /// Current signal strength in dBm
    pub fn rssi(&mut self) -> i32 {
        self.radio.rssi()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRadio;
    use embassy_futures::block_on;

    #[test]
    fn test_initial_state() {
        let manager = ConnectivityManager::new(FakeRadio::up());
        assert_eq!(manager.state(), ConnectivityState::Disconnected);
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_provision_success() {
        let mut manager = ConnectivityManager::new(FakeRadio::up());
        assert_eq!(block_on(manager.provision("AIRGRADIENT-abc")), Ok(()));
        assert_eq!(manager.state(), ConnectivityState::Connected);
        assert_eq!(
            manager.radio().provision_calls,
            [("AIRGRADIENT-abc".to_owned(), PROVISIONING_TIMEOUT_SECS)]
        );
    }

    #[test]
    fn test_provision_timeout() {
        let mut manager = ConnectivityManager::new(FakeRadio::unprovisionable());
        assert_eq!(
            block_on(manager.provision("AIRGRADIENT-abc")),
            Err(ConnectivityError::ProvisioningTimeout)
        );
        assert_eq!(manager.state(), ConnectivityState::Disconnected);
    }

    #[test]
    fn test_poll_follows_link() {
        let mut manager = ConnectivityManager::new(FakeRadio::with_links(&[
            LinkStatus::Up,
            LinkStatus::Down,
            LinkStatus::Down,
            LinkStatus::Up,
        ]));
        assert_eq!(manager.poll(), ConnectivityState::Connected);
        assert_eq!(manager.poll(), ConnectivityState::Disconnected);
        assert_eq!(manager.poll(), ConnectivityState::Disconnected);
        assert_eq!(manager.poll(), ConnectivityState::Connected);
        assert!(manager.is_connected());
    }

    #[test]
    fn test_rssi_from_radio() {
        let mut manager = ConnectivityManager::new(FakeRadio::up().with_rssi(-72));
        assert_eq!(manager.rssi(), -72);
    }

    #[test]
    fn test_portal_name() {
        assert_eq!(portal_name("3a00213c").as_str(), "AIRGRADIENT-3a00213c");
        let long = "f".repeat(64);
        assert_eq!(portal_name(&long).len(), PORTAL_NAME_MAX);
    }
}
