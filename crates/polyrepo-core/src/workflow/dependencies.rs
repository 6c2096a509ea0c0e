//! Rewriting `@<owner>/<repo>` dependencies in `package.json` between local
//! checkouts, GitHub branches, pull-request heads and release tags.

use std::fmt;
use std::str::FromStr;

use npm_manifest::{package_name, DependencySource, PackageManifest, MANIFEST_FILE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn, Instrument};

use super::{run_step, Context, Orchestrator};
use crate::error::{PolyrepoError, Result};
use crate::model::{PullRequestRef, Repository, MAIN_BRANCH};
use crate::obs::repo_span;

/// Where sibling dependencies should point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// `../<repo>` checkouts.
    Local,
    /// Heads of the required pull requests.
    Pull,
    /// `main` on GitHub.
    Remote,
    /// The version tag of the sibling checkout.
    Release,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Local => "local",
            DependencyKind::Pull => "pull",
            DependencyKind::Remote => "remote",
            DependencyKind::Release => "release",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyKind {
    type Err = PolyrepoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(DependencyKind::Local),
            "pull" => Ok(DependencyKind::Pull),
            "remote" => Ok(DependencyKind::Remote),
            "release" => Ok(DependencyKind::Release),
            other => Err(PolyrepoError::MissingArgument(format!(
                "dependency type '{other}' (expected local, pull, remote or release)"
            ))),
        }
    }
}

/// A sibling repository that may be referenced, with its pull request for `pull`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referenced {
    pub name: String,
    pub pull: Option<u64>,
}

async fn remote_source(ctx: &Context<'_>, name: &str) -> Result<Option<DependencySource>> {
    if ctx
        .github
        .tree_contains(&ctx.owner, name, MAIN_BRANCH, MANIFEST_FILE)
        .await?
    {
        return Ok(Some(DependencySource::Remote {
            owner: ctx.owner.clone(),
            repository: name.to_string(),
        }));
    }
    warn!(
        "{MANIFEST_FILE} is missing in {}/{name}#{MAIN_BRANCH}; keeping the current reference",
        ctx.owner
    );
    Ok(None)
}

async fn pull_source(
    ctx: &Context<'_>,
    name: &str,
    number: u64,
) -> Result<Option<DependencySource>> {
    let view = ctx.github.view_pull(&ctx.owner, name, number).await?;
    if !view.is_open() {
        info!(
            repository = %name,
            number,
            state = %view.state,
            "pull request is closed, using main"
        );
        return remote_source(ctx, name).await;
    }
    let head = if view.head_ref_oid.is_empty() {
        view.head_ref_name.as_str()
    } else {
        view.head_ref_oid.as_str()
    };
    if ctx
        .github
        .tree_contains(&ctx.owner, name, head, MANIFEST_FILE)
        .await?
    {
        return Ok(Some(DependencySource::PullRequest {
            owner: ctx.owner.clone(),
            repository: name.to_string(),
            number,
        }));
    }
    warn!(
        "{MANIFEST_FILE} is missing in {}/{name}#pull/{number}/head; keeping the current reference",
        ctx.owner
    );
    Ok(None)
}

async fn source_for(
    ctx: &Context<'_>,
    kind: DependencyKind,
    target: &Referenced,
) -> Result<Option<DependencySource>> {
    match (kind, target.pull) {
        (DependencyKind::Local, _) => Ok(Some(DependencySource::Local {
            repository: target.name.clone(),
        })),
        (DependencyKind::Pull, Some(number)) => pull_source(ctx, &target.name, number).await,
        (DependencyKind::Pull, None) | (DependencyKind::Remote, _) => {
            remote_source(ctx, &target.name).await
        }
        (DependencyKind::Release, _) => {
            let tag = PackageManifest::read_dir(&ctx.dir(&target.name))?.version_tag()?;
            Ok(Some(DependencySource::Release {
                owner: ctx.owner.clone(),
                repository: target.name.clone(),
                tag,
            }))
        }
    }
}

/// Point the sibling dependencies of `repo` at `kind` sources and reinstall.
///
/// Returns whether any reference was rewritten.
pub async fn update_references(
    ctx: &Context<'_>,
    repo: &str,
    kind: DependencyKind,
    targets: &[Referenced],
) -> Result<bool> {
    let manifest = PackageManifest::read_dir(&ctx.dir(repo))?;
    let mut install = Vec::new();
    let mut uninstall = Vec::new();
    for target in targets {
        let package = package_name(&ctx.owner, &target.name);
        if !manifest.has_dependency(&package) {
            continue;
        }
        if let Some(source) = source_for(ctx, kind, target).await? {
            let current = manifest
                .dependency(&package)
                .and_then(|spec| DependencySource::parse(spec).ok());
            if current.as_ref() == Some(&source) {
                debug!(%package, reference = %source, "reference unchanged, reinstalling");
            } else {
                info!(
                    %package,
                    from = ?current.map(|c| c.to_string()),
                    reference = %source.install_spec(),
                    "updating dependency"
                );
            }
            install.push(source.install_spec());
            uninstall.push(package);
        }
    }
    if !uninstall.is_empty() {
        ctx.npm(repo, std::iter::once("uninstall".to_string()).chain(uninstall))
            .await?;
    }
    if let Err(e) = ctx
        .npm(repo, std::iter::once("install".to_string()).chain(install.iter().cloned()))
        .await
    {
        warn!("npm cache errors can happen when a github reference in dependencies is wrong");
        return Err(e);
    }
    Ok(!install.is_empty())
}

async fn dependencies_repository(
    ctx: &Context<'_>,
    repo: &mut Repository,
    kind: DependencyKind,
    targets: &[Referenced],
) -> Result<()> {
    update_references(ctx, &repo.name, kind, targets).await?;
    repo.local_changes = ctx.git(&repo.name).local_changes().await?;
    // Release references are committed by the release flow.
    if kind != DependencyKind::Release && repo.local_changes > 0 {
        return Err(PolyrepoError::LocalChanges {
            repo: repo.name.clone(),
        });
    }
    Ok(())
}

impl Orchestrator<'_> {
    /// Rewrite sibling dependencies of every checkout.
    ///
    /// `pull` needs `pr`: the referenced pull requests are its required set.
    /// Except for `release`, whose changes go into the release commit, any
    /// rewrite that leaves uncommitted changes fails with
    /// [`PolyrepoError::LocalChanges`].
    pub async fn dependencies(
        &mut self,
        kind: DependencyKind,
        pr: Option<&PullRequestRef>,
    ) -> Result<()> {
        let targets: Vec<Referenced> = match (kind, pr) {
            (DependencyKind::Pull, None) => {
                return Err(PolyrepoError::MissingArgument(
                    "pull requires a pull request (-r <repository>:<number>)".into(),
                ))
            }
            (DependencyKind::Pull, Some(pr)) => {
                let prs = self.required_pull_requests(pr).await?;
                self.workspace.assign_pull_requests(&prs);
                prs.into_iter()
                    .map(|p| Referenced {
                        name: p.name,
                        pull: Some(p.number),
                    })
                    .collect()
            }
            _ => self
                .workspace
                .repositories
                .iter()
                .map(|r| Referenced {
                    name: r.name.clone(),
                    pull: r.pull_request_id,
                })
                .collect(),
        };

        let ctx = &self.ctx;
        let repos = &mut self.workspace.repositories;
        let targets = &targets;
        run_step("dependencies", repos.len(), async {
            for repo in repos.iter_mut() {
                let span = repo_span("dependencies", &repo.name);
                dependencies_repository(ctx, repo, kind, targets)
                    .instrument(span)
                    .await?;
            }
            Ok(())
        })
        .await
    }
}
