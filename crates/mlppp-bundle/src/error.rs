//! Bundle error types.

use std::io;

use thiserror::Error;

use crate::route::RouteError;

/// Errors raised by bundle operations.
#[derive(Debug, Error)]
pub enum BundleError {
    /// No link has the given name.
    #[error("{0}: no such link")]
    UnknownLink(String),

    /// A link with the given name already exists.
    #[error("{0}: link name already in use")]
    DuplicateLink(String),

    /// Removing the link would leave the network phase without a link.
    #[error("{0}: cannot remove the only link carrying the network layer")]
    RemoveForbidden(String),

    /// The bundle is shutting down.
    #[error("bundle is cleaning up")]
    CleaningUp,

    /// The link has no device to open.
    #[error("{0}: no device configured")]
    NoDevice(String),

    /// Opening or using a link's device failed.
    #[error("{link}: {source}")]
    Device {
        /// Link name.
        link: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The tunnel device could not be opened or used.
    #[error("tunnel: {0}")]
    Tunnel(#[source] io::Error),

    /// The notification channel could not be opened.
    #[error("notify channel {path}: {source}")]
    Notify {
        /// Channel path.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The routing table rejected a change.
    #[error(transparent)]
    Route(#[from] RouteError),
}

/// Result type for bundle operations.
pub type BundleResult<T> = Result<T, BundleError>;
