//! Bundle phase values.
//!
//! ```text
//!   Dead ──▶ Establish ──▶ Authenticate ──▶ Network ──▶ Terminate ──▶ Dead
//!              │   │             │   │                     ▲
//!              │   └─────────────┼───┴─────────────────────┘
//!              └─────────────────┴──▶ Dead (last link lost before Network)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse lifecycle state of a bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Phase {
    /// No link is doing anything.
    #[default]
    Dead = 0,
    /// At least one link is being brought up.
    Establish = 1,
    /// Link-layer negotiation finished, peer is being authenticated.
    Authenticate = 2,
    /// Network layer is up.
    Network = 3,
    /// Links are being closed.
    Terminate = 4,
}

impl Phase {
    /// Every phase, in numeric order.
    pub const ALL: [Phase; 5] = [
        Phase::Dead,
        Phase::Establish,
        Phase::Authenticate,
        Phase::Network,
        Phase::Terminate,
    ];

    /// Human-readable phase name used for status output and logging.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Phase::Dead => "Dead",
            Phase::Establish => "Establish",
            Phase::Authenticate => "Authenticate",
            Phase::Network => "Network",
            Phase::Terminate => "Terminate",
        }
    }

    /// Numeric phase value.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look a phase up by its numeric value.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }

    /// Whether the bundle may move from `self` to `next` in one step.
    ///
    /// Staying in the same phase is not a transition.
    #[must_use]
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Dead, Phase::Establish)
                | (Phase::Establish, Phase::Authenticate)
                | (Phase::Authenticate, Phase::Network)
                | (
                    Phase::Establish | Phase::Authenticate | Phase::Network,
                    Phase::Terminate
                )
                | (
                    Phase::Establish | Phase::Authenticate | Phase::Terminate,
                    Phase::Dead
                )
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
