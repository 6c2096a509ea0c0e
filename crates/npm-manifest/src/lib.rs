//! npm-manifest: package.json access for polyrepo
//!
//! This crate provides the npm side of the release flow: reading
//! `package.json` versions and dependency entries, and rendering the
//! `npm install` references used to point one repository at another.

pub mod error;
pub mod manifest;
pub mod reference;

pub use error::ManifestError;
pub use manifest::{version_tag, PackageManifest, MANIFEST_FILE};
pub use reference::{package_name, DependencySource};

/// Result type for manifest operations
pub type Result<T> = std::result::Result<T, ManifestError>;
