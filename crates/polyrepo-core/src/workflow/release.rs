//! Release flow: bump versions on `main`, merge into `release`, pin sibling
//! dependencies to release tags and push the tags.

use npm_manifest::PackageManifest;
use serde::Serialize;
use tracing::{info, Instrument};

use super::dependencies::{update_references, DependencyKind, Referenced};
use super::{run_step, Context, Orchestrator};
use crate::error::{PolyrepoError, Result};
use crate::model::{Repository, MAIN_BRANCH, RELEASE_BRANCH};
use crate::obs::repo_span;

/// Tag pushed for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleasedTag {
    pub repository: String,
    pub tag: String,
    /// A new release commit was pushed together with the tag.
    pub new_release: bool,
}

/// Tag for the checkout's version, bumping the patch version first when
/// that tag already exists.
async fn ensure_new_version(ctx: &Context<'_>, repo: &str) -> Result<String> {
    let dir = ctx.dir(repo);
    let tag = PackageManifest::read_dir(&dir)?.version_tag()?;
    if !ctx.git(repo).tag_exists(&tag).await? {
        return Ok(tag);
    }
    ctx.npm(repo, ["--no-git-tag-version", "version", "patch"])
        .await?;
    Ok(PackageManifest::read_dir(&dir)?.version_tag()?)
}

/// Files changed on `main` since `release` forked off, plus commits
/// `release` lacks on GitHub.
async fn unreleased_changes(ctx: &Context<'_>, repo: &str) -> Result<usize> {
    let git = ctx.git(repo);
    let sha = match git.fork_point(RELEASE_BRANCH).await {
        Ok(sha) => sha,
        Err(e) if e.is_silent_failure() => return Ok(0),
        Err(e) => return Err(e),
    };
    let changed = git.changed_files_since(&sha).await?;
    let head = format!("{}:{RELEASE_BRANCH}", ctx.owner);
    let comparison = ctx
        .github
        .compare(&ctx.owner, repo, MAIN_BRANCH, &head)
        .await?;
    Ok(changed + comparison.behind_by as usize)
}

async fn prepare_repository(ctx: &Context<'_>, repo: &mut Repository) -> Result<()> {
    let git = ctx.git(&repo.name);
    let prefix = format!("{}/", ctx.owner);
    if !git.remotes().await?.iter().any(|r| r.url.contains(&prefix)) {
        return Err(PolyrepoError::OriginMismatch {
            owner: ctx.owner.clone(),
            repo: repo.name.clone(),
        });
    }
    git.switch(RELEASE_BRANCH).await?;
    repo.branch = Some(RELEASE_BRANCH.to_string());
    Ok(())
}

async fn release_repository(
    ctx: &Context<'_>,
    repo: &mut Repository,
    targets: &[Referenced],
) -> Result<ReleasedTag> {
    let git = ctx.git(&repo.name);
    let mut new_release = false;

    git.switch(MAIN_BRANCH).await?;
    git.pull_rebase().await?;
    let changed = unreleased_changes(ctx, &repo.name).await?;
    info!(changed, "unreleased changes on main");
    if changed > 0 {
        let tag = ensure_new_version(ctx, &repo.name).await?;
        if git.local_changes().await? > 0 {
            git.add_all().await?;
            git.commit(&format!("Update npm version number {tag}")).await?;
            git.pull_theirs().await?;
            git.push(&ctx.owner, MAIN_BRANCH).await?;
            new_release = true;
        }
    }

    git.switch(RELEASE_BRANCH).await?;
    git.pull_theirs().await?;
    git.merge_theirs(MAIN_BRANCH).await?;
    update_references(ctx, &repo.name, DependencyKind::Release, targets).await?;
    repo.local_changes = git.local_changes().await?;
    if repo.local_changes > 0 {
        let tag = ensure_new_version(ctx, &repo.name).await?;
        git.add_all().await?;
        git.commit(&format!("Release {tag}")).await?;
        new_release = true;
    }

    let tag = PackageManifest::read_dir(&ctx.dir(&repo.name))?.version_tag()?;
    if git.tag_exists(&tag).await? {
        if new_release {
            return Err(PolyrepoError::TagExists {
                repo: repo.name.clone(),
                tag,
            });
        }
        info!(%tag, "already released");
    } else {
        git.tag(&tag).await?;
        if new_release {
            git.push_atomic_force(&ctx.owner, RELEASE_BRANCH, &tag).await?;
        } else {
            git.push_tag(&ctx.owner, &tag).await?;
        }
        info!(%tag, "released");
    }
    Ok(ReleasedTag {
        repository: repo.name.clone(),
        tag,
        new_release,
    })
}

impl Orchestrator<'_> {
    /// Release every repository in config order. Only the owner may release.
    pub async fn release(&mut self) -> Result<Vec<ReleasedTag>> {
        if self.ctx.owner != self.ctx.login {
            return Err(PolyrepoError::ReleaseNotAllowed {
                owner: self.ctx.owner.clone(),
                login: self.ctx.login.clone(),
            });
        }
        let targets: Vec<Referenced> = self
            .workspace
            .repositories
            .iter()
            .map(|r| Referenced {
                name: r.name.clone(),
                pull: None,
            })
            .collect();

        let ctx = &self.ctx;
        let repos = &mut self.workspace.repositories;
        let targets = &targets;
        run_step("release", repos.len(), async {
            for repo in repos.iter_mut() {
                let span = repo_span("prepare-release", &repo.name);
                prepare_repository(ctx, repo).instrument(span).await?;
            }
            let mut released = Vec::new();
            for repo in repos.iter_mut() {
                let span = repo_span("release", &repo.name);
                released.push(release_repository(ctx, repo, targets).instrument(span).await?);
            }
            Ok(released)
        })
        .await
    }
}
