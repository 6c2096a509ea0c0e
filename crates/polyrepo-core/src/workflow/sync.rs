//! Checkout and branch synchronisation: init, branch, sync, syncpull, push
//! and install.

use tracing::{debug, info, Instrument};

use super::{run_step, Context, Orchestrator};
use crate::error::Result;
use crate::git::Git;
use crate::model::{ForkMode, PullRequestRef, Repository, MAIN_BRANCH};
use crate::obs::{emit_repo_skipped, repo_span};
use crate::trailer;

/// Add remotes named after the owner and, for forks, after the login.
async fn ensure_remotes(ctx: &Context<'_>, git: &Git<'_>, repo: &str, forked: bool) -> Result<()> {
    let mut accounts = vec![ctx.owner.as_str()];
    if forked && ctx.fork_mode() == ForkMode::Fork {
        accounts.push(ctx.login.as_str());
    }
    let existing = git.remotes().await?;
    for account in accounts {
        if !existing.iter().any(|r| r.name == account) {
            debug!(remote = %account, "adding remote");
            git.add_remote(account, &ctx.remote_url(account, repo)).await?;
        }
    }
    Ok(())
}

async fn init_repository(ctx: &Context<'_>, repo: &mut Repository) -> Result<()> {
    let git = ctx.git(&repo.name);
    repo.is_forked = ctx.github.is_forked(&repo.name).await?;
    if git.dir().exists() {
        debug!(dir = %git.dir().display(), "checkout exists");
    } else {
        let account = if repo.is_forked { &ctx.login } else { &ctx.owner };
        let url = ctx.remote_url(account, &repo.name);
        info!(%url, "cloning");
        Git::clone_into(ctx.runner, &ctx.root, &url).await?;
    }
    ensure_remotes(ctx, &git, &repo.name, repo.is_forked).await
}

async fn branch_repository(ctx: &Context<'_>, repo: &mut Repository, branch: &str) -> Result<()> {
    let git = ctx.git(&repo.name);
    if !git.has_local_branch(branch).await? {
        git.create_branch(branch).await?;
    }
    git.switch(branch).await?;
    git.fetch_all().await?;
    repo.branch = Some(branch.to_string());
    Ok(())
}

async fn sync_repository(ctx: &Context<'_>, repo: &mut Repository) -> Result<()> {
    let git = ctx.git(&repo.name);
    repo.is_forked = ctx.github.is_forked(&repo.name).await?;
    let branch = git.current_branch().await?;
    repo.branch = Some(branch.clone());
    ensure_remotes(ctx, &git, &repo.name, repo.is_forked).await?;

    let owner_main = format!("{}/{MAIN_BRANCH}", ctx.owner);
    git.switch(MAIN_BRANCH).await?;
    git.fetch(&ctx.owner, MAIN_BRANCH).await?;
    git.merge_ff_only(&owner_main).await?;

    if repo.is_forked {
        ctx.github
            .sync_fork(&ctx.login, &repo.name, MAIN_BRANCH)
            .await?;
        git.switch(&branch).await?;
        if ctx
            .github
            .branch_exists(&ctx.login, &repo.name, &branch)
            .await?
        {
            let upstream = format!("{}/{branch}", ctx.login);
            git.fetch(&ctx.login, &branch).await?;
            git.set_upstream(&upstream, Some(&branch)).await?;
            git.pull_rebase().await?;
            repo.remote_branch = Some(upstream);
        } else {
            debug!(%branch, "branch not found on fork, tracking owner main");
            git.set_upstream(&owner_main, Some(&branch)).await?;
            repo.remote_branch = Some(owner_main.clone());
        }
    } else {
        git.switch(&branch).await?;
        if !git.has_upstream().await? && git.remote_has_branch(&ctx.owner, &branch).await? {
            let upstream = format!("{}/{branch}", ctx.owner);
            git.fetch(&ctx.owner, &branch).await?;
            git.set_upstream(&upstream, Some(&branch)).await?;
        }
        if git.has_upstream().await? {
            git.pull_rebase().await?;
        }
    }

    repo.local_changes = git.local_changes().await?;
    git.merge(&owner_main).await?;
    repo.git_changes = git.changed_files(MAIN_BRANCH).await?;
    info!(
        branch = %branch,
        forked = repo.is_forked,
        local_changes = repo.local_changes,
        git_changes = repo.git_changes,
        "synced"
    );
    Ok(())
}

async fn syncpull_repository(
    ctx: &Context<'_>,
    repo: &mut Repository,
    prs: &[PullRequestRef],
) -> Result<()> {
    let git = ctx.git(&repo.name);
    git.switch(MAIN_BRANCH).await?;
    match prs.iter().find(|pr| pr.name == repo.name) {
        Some(pr) => {
            let branch = format!("pull{}", pr.number);
            git.fetch(&ctx.owner, &format!("+pull/{}/head:{branch}", pr.number))
                .await?;
            git.switch(&branch).await?;
            repo.branch = Some(branch);
        }
        None => {
            git.fetch(&ctx.owner, MAIN_BRANCH).await?;
            git.checkout(MAIN_BRANCH).await?;
            repo.branch = Some(MAIN_BRANCH.to_string());
        }
    }
    Ok(())
}

async fn push_repository(ctx: &Context<'_>, repo: &mut Repository) -> Result<()> {
    if repo.git_changes == 0 {
        emit_repo_skipped("push", &repo.name, "no changes relative to main");
        return Ok(());
    }
    let git = ctx.git(&repo.name);
    let branch = repo.branch_or_main().to_string();
    let remote = match ctx.fork_mode() {
        ForkMode::SelfOwned => ctx.owner.clone(),
        ForkMode::Fork => {
            if !ctx.github.is_forked(&repo.name).await? {
                ctx.github.fork(&ctx.owner, &repo.name).await?;
                repo.is_forked = true;
            }
            let url = ctx.remote_url(&ctx.login, &repo.name);
            if git.has_remote(&ctx.login).await? {
                git.set_remote_url(&ctx.login, &url).await?;
            } else {
                git.add_remote(&ctx.login, &url).await?;
            }
            ctx.login.clone()
        }
    };
    git.switch(&branch).await?;
    git.push(&remote, &branch).await?;
    info!(%remote, %branch, "pushed");
    Ok(())
}

impl Orchestrator<'_> {
    /// Clone missing checkouts (from the login's fork when there is one) and
    /// configure remotes; with `branch`, create and switch to it everywhere.
    pub async fn init(&mut self, branch: Option<&str>) -> Result<()> {
        let ctx = &self.ctx;
        let repos = &mut self.workspace.repositories;
        run_step("init", repos.len(), async {
            for repo in repos.iter_mut() {
                let span = repo_span("init", &repo.name);
                init_repository(ctx, repo).instrument(span).await?;
            }
            Ok(())
        })
        .await?;
        if let Some(branch) = branch {
            self.branch(branch).await?;
        }
        Ok(())
    }

    /// Create `branch` where it is missing, switch to it and fetch.
    pub async fn branch(&mut self, branch: &str) -> Result<()> {
        let ctx = &self.ctx;
        let repos = &mut self.workspace.repositories;
        run_step("branch", repos.len(), async {
            for repo in repos.iter_mut() {
                let span = repo_span("branch", &repo.name);
                branch_repository(ctx, repo, branch).instrument(span).await?;
            }
            Ok(())
        })
        .await
    }

    /// Bring `main` and the current branch of every checkout up to date with
    /// the owner, and record local and branch changes.
    pub async fn sync(&mut self) -> Result<()> {
        let ctx = &self.ctx;
        let repos = &mut self.workspace.repositories;
        run_step("sync", repos.len(), async {
            for repo in repos.iter_mut() {
                let span = repo_span("sync", &repo.name);
                sync_repository(ctx, repo).instrument(span).await?;
            }
            Ok(())
        })
        .await
    }

    /// Pull requests required together with `pr`, read from its trailer.
    pub async fn required_pull_requests(&self, pr: &PullRequestRef) -> Result<Vec<PullRequestRef>> {
        let view = self
            .ctx
            .github
            .view_pull(&self.ctx.owner, &pr.name, pr.number)
            .await?;
        Ok(trailer::parse_required(Some(&view.body), pr))
    }

    /// Check out the head of every required pull request of `pr`; other
    /// repositories go to the owner's `main`. Returns the required set.
    pub async fn syncpull(&mut self, pr: &PullRequestRef) -> Result<Vec<PullRequestRef>> {
        let prs = self.required_pull_requests(pr).await?;
        info!(required = %trailer::format(&prs), "syncing pull requests");
        self.workspace.assign_pull_requests(&prs);
        let ctx = &self.ctx;
        let repos = &mut self.workspace.repositories;
        let required = &prs;
        run_step("syncpull", repos.len(), async {
            for repo in repos.iter_mut() {
                let span = repo_span("syncpull", &repo.name);
                syncpull_repository(ctx, repo, required)
                    .instrument(span)
                    .await?;
            }
            Ok(())
        })
        .await?;
        Ok(prs)
    }

    /// Push branches with changes to the owner (self-owned) or to the
    /// login's fork, forking first when needed.
    pub async fn push(&mut self) -> Result<()> {
        let ctx = &self.ctx;
        let repos = &mut self.workspace.repositories;
        run_step("push", repos.len(), async {
            for repo in repos.iter_mut() {
                let span = repo_span("push", &repo.name);
                push_repository(ctx, repo).instrument(span).await?;
            }
            Ok(())
        })
        .await
    }

    /// `npm install` in every checkout.
    pub async fn install(&mut self) -> Result<()> {
        let ctx = &self.ctx;
        let repos = &self.workspace.repositories;
        run_step("install", repos.len(), async {
            for repo in repos {
                ctx.npm(&repo.name, ["install"])
                    .instrument(repo_span("install", &repo.name))
                    .await?;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::fakes::RecordingRunner;
    use crate::model::Workspace;
    use std::time::Duration;

    fn orchestrator<'a>(runner: &'a RecordingRunner, owner: &str, login: &str) -> Orchestrator<'a> {
        let ws = Workspace::new(owner, login, &["server".to_string()]);
        Orchestrator::new(runner, ws, "/work").with_fork_settle(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_branch_creates_missing_branch() {
        let runner = RecordingRunner::new();
        runner.on("git show-ref", CommandOutput::failed("", ""));
        let mut orch = orchestrator(&runner, "acme", "acme");
        orch.branch("feature").await.unwrap();
        assert_eq!(
            runner.command_lines(),
            vec![
                "git show-ref --quiet refs/heads/feature",
                "git checkout -b feature",
                "git switch feature",
                "git fetch",
            ]
        );
        assert_eq!(orch.workspace().repositories[0].branch.as_deref(), Some("feature"));
    }

    #[tokio::test]
    async fn test_syncpull_fetches_required_pull_heads() {
        let runner = RecordingRunner::new();
        runner.on(
            "gh pr view",
            CommandOutput::ok(r#"{"body":"text\nrequired PRs: server:4","state":"OPEN"}"#),
        );
        let mut orch = orchestrator(&runner, "acme", "acme");
        let prs = orch
            .syncpull(&PullRequestRef::new("server", 4))
            .await
            .unwrap();
        assert_eq!(prs, vec![PullRequestRef::new("server", 4)]);
        assert!(runner.ran_in("server", "git fetch acme +pull/4/head:pull4"));
        assert!(runner.ran_in("server", "git switch pull4"));
        assert_eq!(orch.workspace().repositories[0].pull_request_id, Some(4));
    }

    #[tokio::test]
    async fn test_install_runs_npm_in_each_checkout() {
        let runner = RecordingRunner::new();
        let mut orch = orchestrator(&runner, "acme", "acme");
        orch.install().await.unwrap();
        assert!(runner.ran_in("server", "npm install"));
    }

    #[tokio::test]
    async fn test_push_forks_when_missing() {
        let runner = RecordingRunner::new();
        runner.on("gh repo list", CommandOutput::ok("[]"));
        let mut orch = orchestrator(&runner, "acme", "jdoe");
        {
            let repo = &mut orch.workspace_mut().repositories[0];
            repo.git_changes = 2;
            repo.branch = Some("feature".into());
        }
        orch.push().await.unwrap();
        assert!(runner.ran("gh repo fork acme/server"));
        assert!(runner.ran("git remote add jdoe git@github.com:jdoe/server.git"));
        assert!(runner.ran("git push jdoe feature"));
        assert!(orch.workspace().repositories[0].is_forked);
    }
}
