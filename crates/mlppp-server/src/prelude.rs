//! Prelude module - commonly used types for convenient import.
//!
//! Use `use mlppp_server::prelude::*;` to import all essential types.

pub use crate::{AdminCommand, CommandError};
pub use crate::{Origin, Prompt, Server, ServerState};
pub use crate::{ServerError, ServerResult};
