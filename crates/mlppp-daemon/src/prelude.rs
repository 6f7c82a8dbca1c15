//! Prelude module - commonly used types for convenient import.
//!
//! Use `use mlppp_daemon::prelude::*;` to import all essential types.

pub use crate::Daemon;
pub use crate::{DaemonError, DaemonResult};
