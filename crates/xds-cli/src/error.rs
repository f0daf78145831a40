//! CLI error types.

use thiserror::Error;

use crate::transport::TransportError;

/// CLI-specific errors.
///
/// Each variant maps to a process exit code through [`CliError::exit_code`].
#[derive(Debug, Error)]
pub enum CliError {
    /// Missing, unreadable or malformed configuration.
    #[error("{0}")]
    Config(String),

    /// Connection, handshake or request failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Invalid or missing argument, rejected before any network call.
    #[error("{0}")]
    Validation(String),

    /// The remote operation finished with a non-zero code.
    #[error("{message}")]
    Remote {
        /// Remote exit code, passed through verbatim.
        code: i32,
        /// Remote error message.
        message: String,
    },

    /// The event channel dropped while an operation was in flight.
    #[error("{0}")]
    TransportLost(String),

    /// No terminal event arrived before the soft timeout.
    #[error("timeout")]
    Timeout,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),
}

impl CliError {
    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Remote { code, .. } => *code,
            Self::TransportLost(_) => 2,
            _ => 1,
        }
    }
}

impl From<xds_proto::ProtoError> for CliError {
    fn from(err: xds_proto::ProtoError) -> Self {
        match err {
            xds_proto::ProtoError::Validation(msg) => Self::Validation(msg),
            xds_proto::ProtoError::UnknownProjectType(t) => {
                Self::Validation(format!("Unknown project type: {t}"))
            }
            other => Self::Format(other.to_string()),
        }
    }
}
