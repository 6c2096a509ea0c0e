//! Test runs and their status on pull requests.

use std::time::Duration;

use tracing::{info, warn, Instrument};

use super::{run_step, Context, Orchestrator};
use crate::error::{PolyrepoError, Result};
use crate::exec::CommandSpec;
use crate::model::{PullRequestRef, Repository, TestStatus};
use crate::obs::{emit_ignored_failure, emit_subprocess_output, emit_test_finished, repo_span};
use crate::trailer;

/// Default polling interval of `testorwait`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

async fn test_repository(ctx: &Context<'_>, repo: &mut Repository) -> Result<()> {
    repo.test_status = TestStatus::Running;
    let spec = CommandSpec::new("npm", ctx.dir(&repo.name)).args(["run", "test"]);
    let output = ctx.runner.run(&spec).await?;
    // stderr is echoed by the runner while the tests run.
    emit_subprocess_output("npm", &output.stdout);
    repo.test_status = if output.success() {
        TestStatus::Success
    } else {
        TestStatus::Failed
    };
    emit_test_finished(&repo.name, output.success());
    Ok(())
}

/// The required pull request whose repository comes last in config order.
pub fn main_test_pull_request<'p>(
    repositories: &[Repository],
    prs: &'p [PullRequestRef],
) -> Option<&'p PullRequestRef> {
    prs.iter()
        .filter_map(|pr| {
            repositories
                .iter()
                .position(|r| r.name == pr.name)
                .map(|pos| (pos, pr))
        })
        .max_by_key(|(pos, _)| *pos)
        .map(|(_, pr)| pr)
}

impl Orchestrator<'_> {
    /// Post `status` on every pull request of the workspace.
    ///
    /// Only the owner may comment; failures are logged and ignored.
    async fn send_test_status(&self, status: TestStatus, edit_last: bool) {
        if self.ctx.owner != self.ctx.login {
            warn!(
                owner = %self.ctx.owner,
                login = %self.ctx.login,
                "only the repository owner may update pull requests; no status sent"
            );
            return;
        }
        for repo in &self.workspace.repositories {
            let Some(number) = repo.pull_request_id else {
                continue;
            };
            if let Err(e) = self
                .ctx
                .github
                .comment_pull(&self.ctx.owner, &repo.name, number, status.comment(), edit_last)
                .await
            {
                emit_ignored_failure("test-status", &repo.name, &e);
            }
        }
    }

    /// Run `npm run test` everywhere and return the aggregate status.
    ///
    /// With `pr`, the checkouts are first moved to its required pull
    /// requests, and the pull requests get a running and a final comment.
    pub async fn test(&mut self, pr: Option<&PullRequestRef>) -> Result<TestStatus> {
        if let Some(pr) = pr {
            self.syncpull(pr).await?;
            self.send_test_status(TestStatus::Running, false).await;
        }

        let ctx = &self.ctx;
        let repos = &mut self.workspace.repositories;
        run_step("test", repos.len(), async {
            for repo in repos.iter_mut() {
                let span = repo_span("test", &repo.name);
                test_repository(ctx, repo).instrument(span).await?;
            }
            Ok(())
        })
        .await?;

        let status = self.workspace.test_result();
        info!(status = ?status, "tests finished");
        if pr.is_some() {
            self.send_test_status(status, true).await;
        }
        Ok(status)
    }

    /// Run the tests when `pr` is the main test pull request of its set;
    /// otherwise wait for the main test pull request's check run.
    pub async fn testorwait(
        &mut self,
        pr: &PullRequestRef,
        interval: Duration,
    ) -> Result<TestStatus> {
        let prs = self.required_pull_requests(pr).await?;
        let main = main_test_pull_request(&self.workspace.repositories, &prs)
            .cloned()
            .ok_or_else(|| PolyrepoError::UnknownRepository(trailer::format(&prs)))?;
        if &main == pr {
            info!(pull_request = %pr, "main test pull request, running tests");
            return self.test(Some(pr)).await;
        }
        self.wait_for_check_run(&main, interval).await
    }

    async fn wait_for_check_run(
        &self,
        main: &PullRequestRef,
        interval: Duration,
    ) -> Result<TestStatus> {
        info!(pull_request = %main, "waiting for main test pull request");
        loop {
            let view = self
                .ctx
                .github
                .view_pull(&self.ctx.owner, &main.name, main.number)
                .await?;
            if !view.is_open() {
                return Err(PolyrepoError::PullRequestClosed {
                    target: main.to_string(),
                    state: view.state,
                });
            }
            let reference = if view.head_ref_oid.is_empty() {
                view.head_ref_name.as_str()
            } else {
                view.head_ref_oid.as_str()
            };
            if reference.is_empty() {
                return Err(PolyrepoError::CheckRun {
                    target: main.to_string(),
                    detail: "pull request has no head".into(),
                });
            }
            match self
                .ctx
                .github
                .latest_check_run(&self.ctx.owner, &main.name, reference)
                .await?
            {
                Some(run) if run.completed => {
                    let status = if run.success {
                        TestStatus::Success
                    } else {
                        TestStatus::Failed
                    };
                    info!(pull_request = %main, success = run.success, "check run finished");
                    return Ok(status);
                }
                run => info!(state = %view.state, started = run.is_some(), "check run pending"),
            }
            tokio::time::sleep(interval).await;
        }
    }
}
