//! Control plane gateway errors

use thiserror::Error;

/// Errors that can occur when talking to the OpenNebula control plane
#[derive(Debug, Error)]
pub enum OneError {
    /// Required configuration or tooling is missing; nothing was attempted
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Transport or authentication failure
    #[error("OpenNebula unavailable: {0}")]
    Unavailable(String),

    /// The control plane rejected or failed an operation
    #[error("OpenNebula operation failed: {0}")]
    Operation(String),

    /// A command did not finish within the configured timeout
    #[error("Command `{command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    /// The create command ran but the new machine's id could not be obtained
    #[error("Creation of {name} could not be confirmed: {reason}")]
    CreationConfirmation { name: String, reason: String },

    /// The request cannot be expressed (e.g. missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OneError {
    /// Errors after which no further call to the control plane makes sense
    pub fn is_fatal(&self) -> bool {
        matches!(self, OneError::Precondition(_) | OneError::Unavailable(_))
    }
}
