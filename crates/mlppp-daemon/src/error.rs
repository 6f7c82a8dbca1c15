//! Daemon error types.

use std::io;

use mlppp_bundle::BundleError;
use mlppp_config::ConfigError;
use mlppp_server::ServerError;
use mlppp_telemetry::TelemetryError;
use thiserror::Error;

/// Errors raised while building or running the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A configured value could not be turned into its runtime form.
    #[error("{field}: {message}")]
    Setting {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// The bundle could not be built.
    #[error(transparent)]
    Bundle(#[from] BundleError),

    /// The admin server could not be opened.
    #[error("admin server: {0}")]
    Server(#[from] ServerError),

    /// Logging could not be set up.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// The readiness wait failed.
    #[error("event loop: {0}")]
    Io(#[from] io::Error),
}

impl DaemonError {
    pub(crate) fn setting(field: impl Into<String>, message: impl ToString) -> Self {
        Self::Setting {
            field: field.into(),
            message: message.to_string(),
        }
    }

    /// Process exit status for this error. Server errors keep their own
    /// result codes.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Server(e) => e.code(),
            Self::Config(_) | Self::Setting { .. } => 1,
            Self::Bundle(_) | Self::Telemetry(_) | Self::Io(_) => 10,
        }
    }
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
