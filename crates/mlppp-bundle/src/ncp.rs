//! Network control protocol state shared by the whole bundle.

use std::net::Ipv4Addr;

use mlppp_core::Layer;

/// IPCP and multilink state.
///
/// The network layer counts as up once IPCP is up and, when multilink is
/// in use, the multilink layer is up too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ncp {
    ipcp_up: bool,
    ccp_up: bool,
    mp_active: bool,
    mp_up: bool,
    my_addr: Option<Ipv4Addr>,
    his_addr: Option<Ipv4Addr>,
}

impl Ncp {
    /// Fresh state. `multilink` says whether the MP layer has to come up
    /// before the network layer counts as up.
    #[must_use]
    pub fn new(multilink: bool) -> Self {
        Self {
            mp_active: multilink,
            ..Self::default()
        }
    }

    /// Record a layer coming up.
    pub fn layer_up(&mut self, layer: Layer) {
        self.set(layer, true);
    }

    /// Record a layer going down.
    pub fn layer_down(&mut self, layer: Layer) {
        self.set(layer, false);
    }

    fn set(&mut self, layer: Layer, up: bool) {
        match layer {
            Layer::Ipcp => self.ipcp_up = up,
            Layer::Mp => self.mp_up = up,
            Layer::Ccp => self.ccp_up = up,
            Layer::Lcp => {},
        }
    }

    /// Whether the network layer is up.
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.ipcp_up && (!self.mp_active || self.mp_up)
    }

    /// Whether compression was negotiated.
    #[must_use]
    pub fn compression(&self) -> bool {
        self.ccp_up
    }

    /// Whether the MP layer is required.
    #[must_use]
    pub fn multilink(&self) -> bool {
        self.mp_active
    }

    /// Record negotiated addresses.
    pub fn set_addresses(&mut self, mine: Ipv4Addr, his: Ipv4Addr) {
        self.my_addr = Some(mine);
        self.his_addr = Some(his);
    }

    /// Our negotiated address.
    #[must_use]
    pub fn my_addr(&self) -> Option<Ipv4Addr> {
        self.my_addr
    }

    /// The peer's negotiated address.
    #[must_use]
    pub fn his_addr(&self) -> Option<Ipv4Addr> {
        self.his_addr
    }

    /// Forget everything negotiated. The multilink setting stays.
    pub fn reset(&mut self) {
        *self = Self::new(self.mp_active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipcp_alone_is_enough_without_multilink() {
        let mut ncp = Ncp::new(false);
        assert!(!ncp.is_up());
        ncp.layer_up(Layer::Ipcp);
        assert!(ncp.is_up());
    }

    #[test]
    fn test_multilink_needs_mp() {
        let mut ncp = Ncp::new(true);
        ncp.layer_up(Layer::Ipcp);
        assert!(!ncp.is_up());
        ncp.layer_up(Layer::Mp);
        assert!(ncp.is_up());
        ncp.layer_down(Layer::Mp);
        assert!(!ncp.is_up());
    }

    #[test]
    fn test_reset_keeps_multilink() {
        let mut ncp = Ncp::new(true);
        ncp.layer_up(Layer::Ipcp);
        ncp.set_addresses(Ipv4Addr::LOCALHOST, Ipv4Addr::new(10, 0, 0, 2));
        ncp.reset();
        assert!(ncp.multilink());
        assert!(!ncp.is_up());
        assert_eq!(ncp.his_addr(), None);
    }
}
