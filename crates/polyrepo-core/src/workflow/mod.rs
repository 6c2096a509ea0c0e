//! Per-repository workflows.
//!
//! An [`Orchestrator`] owns the [`Workspace`] and walks its repositories in
//! config order for each step. Every subprocess of a step runs with the
//! repository checkout (`<root>/<name>`) as its working directory, and the
//! first failing repository aborts the step.

pub mod addon;
pub mod checks;
pub mod dependencies;
pub mod pulls;
pub mod release;
pub mod sync;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::WorkspaceConfig;
use crate::error::Result;
use crate::exec::{CommandRunner, CommandSpec};
use crate::git::Git;
use crate::github::GitHub;
use crate::model::{ForkMode, Workspace};
use crate::obs::{emit_step_finished, emit_step_started};

/// What every step needs besides the repository it works on.
#[derive(Clone)]
pub struct Context<'a> {
    pub runner: &'a dyn CommandRunner,
    pub github: GitHub<'a>,
    pub owner: String,
    pub login: String,
    pub root: PathBuf,
}

impl<'a> Context<'a> {
    /// Checkout directory of `repo`.
    pub fn dir(&self, repo: &str) -> PathBuf {
        self.root.join(repo)
    }

    pub fn git(&self, repo: &str) -> Git<'a> {
        Git::new(self.runner, self.dir(repo))
    }

    pub fn fork_mode(&self) -> ForkMode {
        if self.owner == self.login {
            ForkMode::SelfOwned
        } else {
            ForkMode::Fork
        }
    }

    /// Remote URL of `<account>/<repo>` for the current fork mode.
    pub fn remote_url(&self, account: &str, repo: &str) -> String {
        format!("{}{account}/{repo}.git", self.fork_mode().url_prefix())
    }

    /// `npm <args>` in the checkout of `repo`.
    pub async fn npm<I, S>(&self, repo: &str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = CommandSpec::new("npm", self.dir(repo)).args(args);
        self.runner.run_checked(&spec).await
    }
}

/// Runs workflow steps over the configured repositories.
pub struct Orchestrator<'a> {
    ctx: Context<'a>,
    workspace: Workspace,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        workspace: Workspace,
        root: impl Into<PathBuf>,
    ) -> Self {
        let root = root.into();
        let ctx = Context {
            runner,
            github: GitHub::new(runner, root.clone()),
            owner: workspace.owner.clone(),
            login: workspace.login.clone(),
            root,
        };
        Self { ctx, workspace }
    }

    /// Resolve the authenticated login with `gh` and build the workspace.
    pub async fn connect(
        runner: &'a dyn CommandRunner,
        config: WorkspaceConfig,
        root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let root = root.into();
        let login = GitHub::new(runner, root.clone()).login().await?;
        tracing::info!(owner = %config.owner, login = %login, "resolved GitHub login");
        Ok(Self::new(runner, config.into_workspace(login), root))
    }

    /// Delay after forking a repository; only tests shorten it.
    pub fn with_fork_settle(mut self, settle: Duration) -> Self {
        self.ctx.github = self.ctx.github.with_fork_settle(settle);
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }

    pub fn context(&self) -> &Context<'a> {
        &self.ctx
    }

    pub fn root(&self) -> &Path {
        &self.ctx.root
    }
}

/// Wrap one step over all repositories with start/finish events.
pub(crate) async fn run_step<T, F>(step: &str, repositories: usize, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    emit_step_started(step, repositories);
    let started = Instant::now();
    let result = work.await;
    emit_step_finished(step, started.elapsed().as_millis() as u64, result.is_ok());
    result
}
