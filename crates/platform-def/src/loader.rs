//! Definition file loading
//!
//! JSON is the native format; `.yaml`/`.yml` files decode into the same
//! types.

use crate::definition::{DefinitionDocument, VersionProbe, SUPPORTED_FORMAT_VERSION};
use crate::error::DefinitionError;
use crate::resolver::{resolve, ResolvedDefinition};
use std::path::Path;
use tracing::{debug, info};

/// Encoding of a definition document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Pick the format from a file extension, defaulting to JSON
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                DocumentFormat::Yaml
            }
            _ => DocumentFormat::Json,
        }
    }
}

/// Decode a definition document, rejecting unsupported versions before the
/// rest of the schema is looked at
pub fn parse_definition(
    text: &str,
    format: DocumentFormat,
) -> Result<DefinitionDocument, DefinitionError> {
    let probe: VersionProbe = match format {
        DocumentFormat::Json => serde_json::from_str(text)?,
        DocumentFormat::Yaml => serde_yaml::from_str(text)?,
    };
    if probe.format_version.0 != SUPPORTED_FORMAT_VERSION {
        return Err(DefinitionError::ConfigFormat(format!(
            "unhandled format version {} (supported: {})",
            probe.format_version.0, SUPPORTED_FORMAT_VERSION
        )));
    }

    let document = match format {
        DocumentFormat::Json => serde_json::from_str(text)?,
        DocumentFormat::Yaml => serde_yaml::from_str(text)?,
    };
    Ok(document)
}

/// Read a definition document from disk
pub fn load_definition(path: &Path) -> Result<DefinitionDocument, DefinitionError> {
    info!("Processing definition file: {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let format = DocumentFormat::from_path(path);
    debug!("Decoding {} as {:?}", path.display(), format);
    parse_definition(&text, format)
}

/// Read and resolve a definition document in one step
pub fn load_and_resolve(path: &Path) -> Result<ResolvedDefinition, DefinitionError> {
    let document = load_definition(path)?;
    resolve(&document)
}
