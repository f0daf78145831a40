//! Error types for the xds-proto crate.

use thiserror::Error;

/// Errors that can occur while decoding or validating wire types.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to decode a message.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// A project type string did not match any known type.
    #[error("unknown project type: {0}")]
    UnknownProjectType(String),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),
}

impl From<serde_json::Error> for ProtoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decoding(err.to_string())
    }
}
