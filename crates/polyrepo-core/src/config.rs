//! Repository list configuration (`repositories.json`).
//!
//! ```json
//! { "owner": "acme", "repositories": [ { "name": "specification" }, { "name": "server" } ] }
//! ```
//!
//! The older `projects.json` layout used `projects` instead of
//! `repositories`; both keys are accepted.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PolyrepoError, Result};
use crate::model::Workspace;

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "repositories.json";

/// One configured repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub name: String,
}

/// Container add-on packaging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonConfig {
    /// Repository holding the add-on definitions.
    pub repository: String,
    /// Repository whose `package.json` version the add-on ships.
    pub component: String,
    /// Add-on directory rebuilt for every merged pull request.
    pub latest_dir: String,
    /// Add-on directory published on release.
    pub release_dir: String,
    /// Add-on slug written on release.
    pub slug: String,
    /// Container image name; `{arch}` is kept verbatim for the add-on builder.
    pub image: String,
    /// Optional extra line written below `image:` on release.
    #[serde(default)]
    pub maintainer: Option<String>,
}

/// Parsed config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub owner: String,
    #[serde(alias = "projects")]
    pub repositories: Vec<RepositoryEntry>,
    #[serde(default)]
    pub addon: Option<AddonConfig>,
}

impl WorkspaceConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PolyrepoError::Config {
            path: path.to_path_buf(),
            detail: format!("cannot read file: {e}"),
        })?;
        let config = Self::parse(path, &content)?;
        debug!(
            path = %path.display(),
            owner = %config.owner,
            repositories = config.repositories.len(),
            "loaded repository config"
        );
        Ok(config)
    }

    /// Parse config text; `path` is used for error messages only.
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let config: WorkspaceConfig =
            serde_json::from_str(content).map_err(|e| PolyrepoError::Config {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |detail: &str| PolyrepoError::Config {
            path: path.to_path_buf(),
            detail: detail.to_string(),
        };
        if self.owner.trim().is_empty() {
            return Err(invalid("owner must not be empty"));
        }
        if self.repositories.is_empty() {
            return Err(invalid("repository list must not be empty"));
        }
        if let Some(entry) = self.repositories.iter().find(|r| r.name.trim().is_empty()) {
            return Err(invalid(&format!(
                "repository name must not be empty (entry {:?})",
                entry.name
            )));
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.repositories.iter().map(|r| r.name.clone()).collect()
    }

    /// Build the runtime workspace for the authenticated `login`.
    pub fn into_workspace(self, login: impl Into<String>) -> Workspace {
        let names = self.names();
        Workspace::new(self.owner, login, &names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "owner": "acme",
        "repositories": [ { "name": "specification" }, { "name": "server" } ]
    }"#;

    #[test]
    fn parse_reads_owner_and_repositories() {
        let cfg = WorkspaceConfig::parse(Path::new("repositories.json"), CONFIG).unwrap();
        assert_eq!(cfg.owner, "acme");
        assert_eq!(cfg.names(), vec!["specification", "server"]);
        assert!(cfg.addon.is_none());
    }

    #[test]
    fn legacy_projects_key_is_accepted() {
        let cfg = WorkspaceConfig::parse(
            Path::new("projects.json"),
            r#"{ "owner": "acme", "projects": [ { "name": "server" } ] }"#,
        )
        .unwrap();
        assert_eq!(cfg.names(), vec!["server"]);
    }

    #[test]
    fn empty_repository_list_is_rejected() {
        let err = WorkspaceConfig::parse(
            Path::new("repositories.json"),
            r#"{ "owner": "acme", "repositories": [] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, PolyrepoError::Config { .. }));
        assert!(err.to_string().contains("repositories.json"));
    }

    #[test]
    fn malformed_json_names_the_file() {
        let err = WorkspaceConfig::parse(Path::new("broken.json"), "{ owner").unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn addon_section_uses_camel_case() {
        let cfg = WorkspaceConfig::parse(
            Path::new("repositories.json"),
            r#"{
                "owner": "acme",
                "repositories": [ { "name": "server" } ],
                "addon": {
                    "repository": "addon-repository",
                    "component": "server",
                    "latestDir": "acme.latest",
                    "releaseDir": "acme",
                    "slug": "acme",
                    "image": "acme/acme-{arch}"
                }
            }"#,
        )
        .unwrap();
        let addon = cfg.addon.unwrap();
        assert_eq!(addon.latest_dir, "acme.latest");
        assert_eq!(addon.maintainer, None);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = WorkspaceConfig::load(&dir.path().join("repositories.json")).unwrap_err();
        assert!(matches!(err, PolyrepoError::Config { .. }));
    }

    #[test]
    fn into_workspace_keeps_order() {
        let cfg = WorkspaceConfig::parse(Path::new("repositories.json"), CONFIG).unwrap();
        let ws = cfg.into_workspace("jdoe");
        assert_eq!(ws.login, "jdoe");
        assert_eq!(ws.repositories[1].name, "server");
    }
}
