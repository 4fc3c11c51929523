use thiserror::Error;

use crate::config::{loader::DocumentFormat, validation::ValidationError};

/// A configuration document could not be turned into a snapshot.
///
/// Always recoverable: the store keeps serving the previous snapshot.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse {format} configuration: {message}")]
    Parse {
        format: DocumentFormat,
        message: String,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("Configuration source error: {0}")]
    Source(String),
}
