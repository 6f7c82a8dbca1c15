//! mlppp Test - shared test utilities for the mlppp crates.
//!
//! Deterministic stand-ins for the bundle's collaborators (clock, link
//! protocol stack, layer observer, notify channel, tunnel) plus fixtures
//! and harness helpers.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! mlppp-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use mlppp_test::{ManualClock, ScriptedProtocol, direct_link};
//!
//! let clock = ManualClock::new();
//! let mut bundle = test_bundle().with_clock(clock.shared());
//! let id = bundle.add_link("deflink", direct_link(), Box::new(ScriptedProtocol::new())).unwrap();
//! ```
//!
//! Only use these from integration tests (`tests/`); a crate's own unit
//! tests would see a second copy of its types.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
