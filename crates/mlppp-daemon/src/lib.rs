#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! mlppp Daemon - the event loop that ties the bundle to its operators.
//!
//! A [`Daemon`] owns one [`mlppp_bundle::Bundle`] and one
//! [`mlppp_server::Server`] and presents both, with every datalink and
//! admin session, to the [`mlppp_core::Multiplexer`] as a single
//! [`mlppp_core::DescriptorSet`]. Each iteration waits for readiness,
//! services descriptors in order, applies link events as they arrive and
//! runs admin commands at the end of the iteration.
//!
//! The `mlpppd` binary loads the layered configuration, builds a
//! [`Daemon`] and runs it on a blocking thread while a `tokio` task turns
//! SIGINT/SIGTERM into a cleanup request.

pub mod prelude;

pub mod admin;
pub mod daemon;
pub mod error;
pub mod settings;

pub use admin::{Reply, execute};
pub use daemon::{Daemon, MAX_WAIT, STARTUP_TYPES};
pub use error::{DaemonError, DaemonResult};
