#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! mlppp Core - shared types and the reactor substrate of the mlppp daemon.
//!
//! This crate provides:
//! - The bundle [`Phase`] and its legal transition table
//! - Bounded text values ([`BoundedText`]) for names and secrets
//! - Physical link type flags ([`PhysType`])
//! - The [`Descriptor`] capability and the [`Multiplexer`] that dispatches
//!   readiness to descriptors once per iteration
//! - The [`Event`] queue used to hand link and session events to the owner
//!   of the descriptors between dispatches
//!
//! Nothing in here knows about sockets, tunnels or links in particular; the
//! bundle and server crates build on these pieces.

pub mod prelude;

pub mod clock;
pub mod descriptor;
pub mod event;
pub mod ids;
pub mod multiplexer;
pub mod phase;
pub mod phys;
pub mod text;

pub use clock::{Clock, SystemClock};
pub use descriptor::{Descriptor, FdSets, Ready, ReadySet};
pub use event::{Event, EventQueue, LinkSignal};
pub use ids::{DescriptorId, Layer, LinkId, PromptId};
pub use multiplexer::{DescriptorSet, Multiplexer};
pub use phase::Phase;
pub use phys::{PhysType, PhysTypeError};
pub use text::BoundedText;
