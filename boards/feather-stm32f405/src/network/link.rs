#![deny(unsafe_code)]
//! Wired link standing in for the radio
//!
//! The W5500 has no credentials to provision: joining the network means
//! waiting for DHCP. There is no signal strength on a cable, so RSSI is
//! reported as 0.

use defmt::{info, warn};
use embassy_net::Stack;
use embassy_time::{with_timeout, Duration};
use hal_abstractions::{LinkStatus, Radio};

/// Ethernet link over the embassy-net stack
pub struct EthernetLink {
    stack: Stack<'static>,
}

impl EthernetLink {
    pub fn new(stack: Stack<'static>) -> Self {
        Self { stack }
    }

    fn log_config(&self) {
        if let Some(config) = self.stack.config_v4() {
            let octets = config.address.address().octets();
            info!(
                "IP: {}.{}.{}.{}",
                octets[0], octets[1], octets[2], octets[3]
            );

            if let Some(gateway) = config.gateway {
                let gw_octets = gateway.octets();
                info!(
                    "Gateway: {}.{}.{}.{}",
                    gw_octets[0], gw_octets[1], gw_octets[2], gw_octets[3]
                );
            }
        }
    }
}

impl Radio for EthernetLink {
    async fn auto_connect(&mut self, portal_name: &str, timeout_secs: u32) -> bool {
        info!("Waiting for DHCP as {}...", portal_name);
        let wait = self.stack.wait_config_up();
        match with_timeout(Duration::from_secs(timeout_secs as u64), wait).await {
            Ok(()) => {
                info!("Network is UP!");
                self.log_config();
                true
            }
            Err(_) => {
                warn!("No DHCP lease after {} s", timeout_secs);
                false
            }
        }
    }

    fn link_status(&mut self) -> LinkStatus {
        if self.stack.is_link_up() && self.stack.is_config_up() {
            LinkStatus::Up
        } else {
            LinkStatus::Down
        }
    }

    fn rssi(&mut self) -> i32 {
        0
    }
}
