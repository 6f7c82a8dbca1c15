//! mlppp Telemetry - logging setup for the mlppp daemon.
//!
//! The daemon logs through `tracing`. Diagnostics are grouped by severity
//! the way operators read them:
//!
//! | Severity   | Macro                                   |
//! |------------|-----------------------------------------|
//! | error      | `error!`                                |
//! | warning    | `warn!`                                 |
//! | alert      | `warn!(target: "mlppp::alert", ..)`     |
//! | phase-info | `info!(target: "mlppp::phase", ..)`     |
//!
//! # Example
//!
//! ```rust,no_run
//! use mlppp_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), mlppp_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("mlppp::phase=debug");
//! setup_logging(&config)?;
//! tracing::info!(target: "mlppp::phase", phase = "Dead", "bundle created");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};

/// Target used for alert-level diagnostics (access-policy rejections and the
/// like).
pub const ALERT_TARGET: &str = "mlppp::alert";

/// Target used for phase transitions.
pub const PHASE_TARGET: &str = "mlppp::phase";
