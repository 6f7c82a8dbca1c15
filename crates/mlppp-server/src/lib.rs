#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! mlppp Server - the administrative control channel.
//!
//! A [`Server`] listens on either a filesystem socket or a TCP port (never
//! both), accepts operator connections, applies the access policy and
//! turns each admitted connection into a [`Prompt`] session. Sessions
//! belong to the server that accepted them: closing the server drops them.
//!
//! Both the listener and every session are [`mlppp_core::Descriptor`]s;
//! command lines read from a session surface as
//! [`mlppp_core::Event::Command`] for the daemon to execute.

pub mod prelude;

pub mod command;
pub mod error;
pub mod policy;
pub mod prompt;
pub mod server;

pub use command::{AdminCommand, CommandError, HELP};
pub use error::{ServerError, ServerResult, Transport};
pub use policy::{Admission, CONNECTION_REFUSED, MIN_CLIENT_PORT, Origin, PeerAddr, UNRECOGNISED_ACCESS, admit};
pub use prompt::{
    Connection, MAX_OUTPUT, MAX_PENDING_OUTPUT, PROMPT, Prompt, PromptMode, SessionName,
};
pub use server::{LISTEN_BACKLOG, Server, ServerState};
