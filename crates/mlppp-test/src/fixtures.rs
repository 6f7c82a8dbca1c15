//! Test fixtures.

use mlppp_bundle::{Bundle, BundleSettings, Endpoint, LinkConfig, NullTunnel};
use mlppp_core::PhysType;

/// Settings with no idle timeout, routes or filters.
#[must_use]
pub fn test_settings() -> BundleSettings {
    BundleSettings::default()
}

/// A dead bundle on a [`NullTunnel`] with default settings.
#[must_use]
pub fn test_bundle() -> Bundle {
    Bundle::new(Box::new(NullTunnel), test_settings())
}

/// Config for a link driven by an attached device.
#[must_use]
pub fn direct_link() -> LinkConfig {
    LinkConfig {
        phys_type: PhysType::DIRECT,
        endpoint: Endpoint::None,
    }
}

/// Config for a demand-dial link reaching `endpoint`.
#[must_use]
pub fn auto_link(endpoint: Endpoint) -> LinkConfig {
    LinkConfig {
        phys_type: PhysType::AUTO,
        endpoint,
    }
}

/// A minimal IPv4 header carrying protocol `proto`.
#[must_use]
pub fn ipv4_packet(proto: u8) -> Vec<u8> {
    let mut p = vec![0u8; 20];
    p[0] = 0x45;
    p[9] = proto;
    p
}
