//! Read-only view over a `package.json` file.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ManifestError;
use crate::Result;

/// File name npm uses for the package manifest.
pub const MANIFEST_FILE: &str = "package.json";

/// Parsed `package.json`.
///
/// Only the fields the release flow needs are exposed; everything else is
/// kept in the raw JSON object.
#[derive(Debug, Clone)]
pub struct PackageManifest {
    path: PathBuf,
    root: Map<String, Value>,
}

impl PackageManifest {
    /// Read `package.json` from a package directory.
    pub fn read_dir(dir: &Path) -> Result<Self> {
        Self::read(&dir.join(MANIFEST_FILE))
    }

    /// Read a manifest from an explicit file path.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ManifestError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = Self::parse(path, &content)?;
        debug!(path = %path.display(), version = ?manifest.version().ok(), "read package manifest");
        Ok(manifest)
    }

    /// Parse manifest text; `path` is used for error messages only.
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content).map_err(|source| ManifestError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        match value {
            Value::Object(root) => Ok(Self {
                path: path.to_path_buf(),
                root,
            }),
            _ => Err(ManifestError::NotAnObject(path.to_path_buf())),
        }
    }

    /// The `version` field.
    pub fn version(&self) -> Result<&str> {
        self.root
            .get("version")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ManifestError::MissingVersion(self.path.clone()))
    }

    /// Git tag for the current version, e.g. `v1.2.3`.
    pub fn version_tag(&self) -> Result<String> {
        Ok(version_tag(self.version()?))
    }

    /// The reference recorded for `package` under `dependencies`.
    pub fn dependency(&self, package: &str) -> Option<&str> {
        self.root
            .get("dependencies")
            .and_then(Value::as_object)
            .and_then(|deps| deps.get(package))
            .and_then(Value::as_str)
    }

    pub fn has_dependency(&self, package: &str) -> bool {
        self.dependency(package).is_some()
    }
}

/// Git tag name for a package version.
pub fn version_tag(version: &str) -> String {
    format!("v{version}")
}
