//! npm dependency references between sibling repositories.
//!
//! A repository `<owner>/<name>` is published as the scoped package
//! `@<owner>/<name>`. Depending on the workflow, other repositories refer to
//! it by a local checkout, the GitHub default branch, an open pull request,
//! or a release tag.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;
use crate::Result;

/// Scoped npm package name for a repository.
pub fn package_name(owner: &str, repository: &str) -> String {
    format!("@{owner}/{repository}")
}

/// Where an npm dependency should be installed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DependencySource {
    /// Sibling checkout next to the current repository.
    Local { repository: String },
    /// Default branch on GitHub.
    Remote { owner: String, repository: String },
    /// Head of an open pull request.
    PullRequest {
        owner: String,
        repository: String,
        number: u64,
    },
    /// A release tag such as `v1.2.3`.
    Release {
        owner: String,
        repository: String,
        tag: String,
    },
}

impl DependencySource {
    /// Argument passed to `npm install`.
    pub fn install_spec(&self) -> String {
        match self {
            DependencySource::Local { repository } => format!("../{repository}"),
            DependencySource::Remote { owner, repository } => {
                format!("github:{owner}/{repository}")
            }
            DependencySource::PullRequest {
                owner,
                repository,
                number,
            } => format!("github:{owner}/{repository}#pull/{number}/head"),
            DependencySource::Release {
                owner,
                repository,
                tag,
            } => format!("github:{owner}/{repository}#{tag}"),
        }
    }

    /// Parse an install spec previously produced by [`Self::install_spec`].
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = || ManifestError::InvalidReference(spec.to_string());

        if let Some(repository) = spec.strip_prefix("../") {
            if repository.is_empty() || repository.contains('/') {
                return Err(invalid());
            }
            return Ok(DependencySource::Local {
                repository: repository.to_string(),
            });
        }

        let rest = spec.strip_prefix("github:").ok_or_else(invalid)?;
        let (slug, fragment) = match rest.split_once('#') {
            Some((slug, fragment)) => (slug, Some(fragment)),
            None => (rest, None),
        };
        let (owner, repository) = slug.split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || repository.is_empty() {
            return Err(invalid());
        }
        let owner = owner.to_string();
        let repository = repository.to_string();

        match fragment {
            None => Ok(DependencySource::Remote { owner, repository }),
            Some(fragment) => {
                if let Some(pull) = fragment.strip_prefix("pull/") {
                    let number = pull
                        .strip_suffix("/head")
                        .and_then(|n| n.parse::<u64>().ok())
                        .ok_or_else(invalid)?;
                    Ok(DependencySource::PullRequest {
                        owner,
                        repository,
                        number,
                    })
                } else if fragment.is_empty() {
                    Err(invalid())
                } else {
                    Ok(DependencySource::Release {
                        owner,
                        repository,
                        tag: fragment.to_string(),
                    })
                }
            }
        }
    }
}

impl fmt::Display for DependencySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.install_spec())
    }
}
