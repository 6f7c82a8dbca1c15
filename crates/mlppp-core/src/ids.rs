//! Identifiers shared between the bundle, the server and the multiplexer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a datalink within its bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u32);

/// Identity of an admin session within its server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PromptId(pub u32);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prompt#{}", self.0)
    }
}

/// Handle naming one participant of the readiness multiplexer.
///
/// The set is closed: a descriptor is the bundle's tunnel, the admin
/// server's listening socket, one datalink, or one admin session. Owners
/// resolve the handle with an exhaustive `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorId {
    /// The bundle's tunnel handle.
    Bundle,
    /// The admin server's listening socket.
    Server,
    /// One datalink.
    Link(LinkId),
    /// One accepted admin session.
    Prompt(PromptId),
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorId::Bundle => f.write_str("bundle"),
            DescriptorId::Server => f.write_str("server"),
            DescriptorId::Link(id) => id.fmt(f),
            DescriptorId::Prompt(id) => id.fmt(f),
        }
    }
}

/// Protocol layer reporting up/down to the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    /// Link control protocol of one datalink.
    Lcp,
    /// Compression control protocol.
    Ccp,
    /// IP control protocol.
    Ipcp,
    /// Multilink aggregation.
    Mp,
}

impl Layer {
    /// Whether the layer is part of the bundle-wide network control block.
    #[must_use]
    pub fn is_ncp(self) -> bool {
        matches!(self, Layer::Ipcp | Layer::Mp)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Layer::Lcp => "LCP",
            Layer::Ccp => "CCP",
            Layer::Ipcp => "IPCP",
            Layer::Mp => "MP",
        })
    }
}
