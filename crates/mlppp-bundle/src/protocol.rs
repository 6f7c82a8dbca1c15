//! The per-link protocol stack seen from the bundle.

use std::fmt::Debug;

use mlppp_core::{Layer, LinkSignal};

/// Framing, negotiation and authentication of one link.
///
/// The bundle never looks inside; it hands the stack raw device bytes and
/// outgoing packets and acts on the [`LinkSignal`]s it returns.
pub trait LinkProtocol: Debug + Send {
    /// The device was attached. Returns whatever negotiation concluded
    /// immediately.
    fn start(&mut self) -> Vec<LinkSignal>;

    /// Bytes arrived from the device.
    fn input(&mut self, bytes: &[u8]) -> Vec<LinkSignal>;

    /// Frame a network packet for the device.
    fn encapsulate(&mut self, packet: &[u8]) -> Vec<u8>;

    /// The link is being closed. Returns `Closed` once nothing is left to
    /// unwind; a stack that needs a round trip reports it later.
    fn stop(&mut self) -> Vec<LinkSignal>;

    /// A fresh stack with the same configuration, for a cloned link.
    fn duplicate(&self) -> Box<dyn LinkProtocol>;
}

/// A raw pass-through stack.
///
/// Negotiation succeeds as soon as the device is attached, bytes read are
/// delivered as packets unchanged and packets are written unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProtocol;

impl LinkProtocol for NullProtocol {
    fn start(&mut self) -> Vec<LinkSignal> {
        vec![
            LinkSignal::Established,
            LinkSignal::Authenticated,
            LinkSignal::LayerUp(Layer::Ipcp),
        ]
    }

    fn input(&mut self, bytes: &[u8]) -> Vec<LinkSignal> {
        vec![LinkSignal::Packet(bytes.to_vec())]
    }

    fn encapsulate(&mut self, packet: &[u8]) -> Vec<u8> {
        packet.to_vec()
    }

    fn stop(&mut self) -> Vec<LinkSignal> {
        vec![LinkSignal::Closed]
    }

    fn duplicate(&self) -> Box<dyn LinkProtocol> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_protocol_comes_straight_up() {
        let mut p = NullProtocol;
        assert_eq!(p.start().first(), Some(&LinkSignal::Established));
        assert_eq!(p.input(b"hi"), vec![LinkSignal::Packet(b"hi".to_vec())]);
        assert_eq!(p.stop(), vec![LinkSignal::Closed]);
    }
}
