//! Definition loading and resolution errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or resolving a platform definition
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The definition file could not be read
    #[error("Cannot read definition file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unsupported format version or a document that does not decode
    #[error("Invalid definition format: {0}")]
    ConfigFormat(String),

    /// JSON decoding error
    #[error("Invalid definition format: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML decoding error
    #[error("Invalid definition format: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The document decodes but violates a rule (empty platform name, duplicate host, ...)
    #[error("Invalid definition: {0}")]
    Validation(String),

    /// A class chain refers back to itself
    #[error("Class inheritance cycle: {0}")]
    ConfigCycle(String),
}
