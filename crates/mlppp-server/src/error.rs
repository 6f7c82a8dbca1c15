//! Server error types.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Which listening mode an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Filesystem socket.
    Local,
    /// TCP port.
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "Local",
            Self::Tcp => "Tcp",
        })
    }
}

/// Errors opening a listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The socket path does not fit the platform's address size.
    #[error("Local: {}: Path too long", path.display())]
    PathTooLong {
        /// Requested path.
        path: PathBuf,
    },

    /// Creating the socket failed.
    #[error("{transport}: socket: {source}")]
    Socket {
        /// Listening mode.
        transport: Transport,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Binding failed.
    #[error("{transport}: bind: {source}")]
    Bind {
        /// Listening mode.
        transport: Transport,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Listening failed.
    #[error("{transport}: unable to listen to socket: {source}")]
    Listen {
        /// Listening mode.
        transport: Transport,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl ServerError {
    /// Stable numeric result code, as reported to the command layer.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::PathTooLong { .. } => 2,
            Self::Socket { transport, .. } => match transport {
                Transport::Local => 3,
                Transport::Tcp => 7,
            },
            Self::Bind { transport, .. } => match transport {
                Transport::Local => 4,
                Transport::Tcp => 8,
            },
            Self::Listen { transport, .. } => match transport {
                Transport::Local => 5,
                Transport::Tcp => 9,
            },
        }
    }

    /// Which listening mode failed.
    #[must_use]
    pub fn transport(&self) -> Transport {
        match self {
            Self::PathTooLong { .. } => Transport::Local,
            Self::Socket { transport, .. }
            | Self::Bind { transport, .. }
            | Self::Listen { transport, .. } => *transport,
        }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
