//! Error types for npm-manifest

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading a package manifest
#[derive(Error, Debug)]
pub enum ManifestError {
    /// package.json does not exist
    #[error("package.json not found at {}", .0.display())]
    NotFound(PathBuf),

    /// package.json has no usable `version` field
    #[error("package.json at {} has no version", .0.display())]
    MissingVersion(PathBuf),

    /// package.json is not a JSON object
    #[error("package.json at {} is not a JSON object", .0.display())]
    NotAnObject(PathBuf),

    /// Dependency reference could not be parsed
    #[error("invalid dependency reference: {0}")]
    InvalidReference(String),

    /// IO error
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON parsing error
    #[error("JSON parsing error in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_path() {
        let err = ManifestError::NotFound(PathBuf::from("/tmp/x/package.json"));
        assert!(err.to_string().contains("/tmp/x/package.json"));
    }

    #[test]
    fn invalid_reference_displays_input() {
        let err = ManifestError::InvalidReference("github:".to_string());
        assert!(err.to_string().contains("github:"));
    }
}
