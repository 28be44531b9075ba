//! Controller-specific error types.
//!
//! Wraps the definition and gateway errors and adds the failures detected by
//! the convergence engine itself.

use one_client::OneError;
use platform_def::DefinitionError;
use thiserror::Error;

/// Errors that can occur while reconciling a platform.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Definition file could not be loaded or resolved
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// OpenNebula gateway error
    #[error("OpenNebula error: {0}")]
    Gateway(#[from] OneError),

    /// Two specifications of different machines were compared
    #[error("Cannot compare machine {current} with machine {target}")]
    IdentityMismatch { current: String, target: String },

    /// The operation is not allowed in the machine's current state
    #[error("Invalid state for {name}: {reason}")]
    InvalidState { name: String, reason: String },

    /// The run was interrupted before the next operation
    #[error("Interrupted, remaining operations were not started")]
    Cancelled,

    /// Some machines could not be reconciled
    #[error("{failures} machine operation(s) failed")]
    BatchFailed { failures: usize },
}

impl ControllerError {
    /// Whether the error stops the whole run instead of a single machine
    pub fn is_fatal(&self) -> bool {
        match self {
            ControllerError::Definition(_)
            | ControllerError::IdentityMismatch { .. }
            | ControllerError::Cancelled
            | ControllerError::BatchFailed { .. } => true,
            // the machine may exist in an unknown state
            ControllerError::Gateway(OneError::CreationConfirmation { .. }) => true,
            ControllerError::Gateway(e) => e.is_fatal(),
            ControllerError::InvalidState { .. } => false,
        }
    }
}
