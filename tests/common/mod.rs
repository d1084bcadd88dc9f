#![allow(dead_code)]

use lansim::{DeviceConfig, Ipv4Address, Lan, LanConfig};
use std::time::Duration;

/// Long enough for any exchange on an idle test machine, short enough that
/// the failure paths finish quickly.
pub const TIMEOUT: Duration = Duration::from_millis(750);

pub fn config() -> DeviceConfig {
    DeviceConfig {
        tick: Duration::from_millis(10),
        ..DeviceConfig::default()
    }
    .with_timeouts(TIMEOUT)
}

/// A network with a fixed seed and short timeouts.
pub fn lan() -> Lan {
    Lan::with_config(LanConfig {
        device: config(),
        seed: Some(0x5eed),
    })
}

pub fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Address {
    Ipv4Address::new([a, b, c, d])
}
