//! Pull-request creation across repositories.

use tracing::{info, Instrument};

use super::dependencies::DependencyKind;
use super::{run_step, Context, Orchestrator};
use crate::error::{PolyrepoError, Result};
use crate::github::{CreatedPull, NewPullRequest, PullRequestContent};
use crate::model::{
    IssueRef, PullRequestRef, PullText, PullTextKind, Repository, Workspace, MAIN_BRANCH,
};
use crate::obs::{emit_pull_request_opened, emit_repo_skipped, repo_span};
use crate::pulltext::{self, COMMIT_LOG_FORMAT};
use crate::trailer;

/// Repositories that get a pull request: those with changes relative to `main`.
///
/// Uncommitted changes anywhere abort with [`PolyrepoError::LocalChanges`];
/// no changes at all abort with [`PolyrepoError::NoChanges`].
pub fn pull_repositories(workspace: &Workspace) -> Result<Vec<String>> {
    if let Some(dirty) = workspace.repositories.iter().find(|r| r.local_changes > 0) {
        return Err(PolyrepoError::LocalChanges {
            repo: dirty.name.clone(),
        });
    }
    let pulls: Vec<String> = workspace
        .repositories
        .iter()
        .filter(|r| r.git_changes > 0)
        .map(|r| r.name.clone())
        .collect();
    if pulls.is_empty() {
        return Err(PolyrepoError::NoChanges);
    }
    Ok(pulls)
}

/// Pull text for repositories other than the issue's when the issue itself
/// becomes the pull request.
fn issue_reference_text(owner: &str, issue: &IssueRef) -> PullText {
    let reference = format!("{owner}/{}#{}", issue.name, issue.number);
    PullText::new(PullTextKind::Feature, reference.clone(), format!("Required by {reference}"))
}

async fn readpulltext_repository(ctx: &Context<'_>, repo: &mut Repository) -> Result<()> {
    let range = format!("{MAIN_BRANCH}...{}", repo.branch_or_main());
    let log = ctx.git(&repo.name).log(&range, COMMIT_LOG_FORMAT).await?;
    repo.pull_texts = pulltext::parse_commit_log(&log);
    info!(entries = repo.pull_texts.len(), "read pull text");
    Ok(())
}

async fn createpull_repository(
    ctx: &Context<'_>,
    repo: &mut Repository,
    text: Option<&PullText>,
    issue: Option<&IssueRef>,
) -> Result<()> {
    if repo.git_changes == 0 {
        emit_repo_skipped("createpull", &repo.name, "no changes relative to main");
        return Ok(());
    }
    let content = match (text, issue) {
        (Some(text), _) => PullRequestContent::Text(text.clone()),
        (None, Some(issue)) if issue.name == repo.name => PullRequestContent::Issue(issue.number),
        (None, Some(issue)) => PullRequestContent::Text(issue_reference_text(&ctx.owner, issue)),
        (None, None) => {
            return Err(PolyrepoError::MissingArgument(
                "pull text or issue for pull request".into(),
            ))
        }
    };
    let branch = repo.branch_or_main().to_string();
    let request = NewPullRequest {
        content,
        head: format!("{}:{branch}", ctx.login),
        base: MAIN_BRANCH.to_string(),
    };
    let number = match ctx.github.create_pull(&ctx.owner, &repo.name, &request).await? {
        CreatedPull::Created(number) => {
            emit_pull_request_opened(&repo.name, number, false);
            Some(number)
        }
        CreatedPull::AlreadyExists => {
            let found = ctx
                .github
                .find_pull(&ctx.owner, &repo.name, &ctx.login, &branch)
                .await?;
            if let Some(number) = found {
                emit_pull_request_opened(&repo.name, number, true);
            }
            found
        }
    };
    repo.pull_request_id = number;
    Ok(())
}

async fn updatepulltext_repository(
    ctx: &Context<'_>,
    repo: &Repository,
    prs: &[PullRequestRef],
) -> Result<()> {
    let Some(number) = repo.pull_request_id else {
        return Ok(());
    };
    let view = ctx.github.view_pull(&ctx.owner, &repo.name, number).await?;
    let body = trailer::append(&view.body, prs);
    ctx.github
        .edit_pull_body(&ctx.owner, &repo.name, number, &body)
        .await
}

impl Orchestrator<'_> {
    /// Collect `[bug]`/`[feature]` commits of every branch.
    pub async fn readpulltext(&mut self) -> Result<()> {
        let ctx = &self.ctx;
        let repos = &mut self.workspace.repositories;
        run_step("readpulltext", repos.len(), async {
            for repo in repos.iter_mut() {
                let span = repo_span("readpulltext", &repo.name);
                readpulltext_repository(ctx, repo).instrument(span).await?;
            }
            Ok(())
        })
        .await
    }

    /// Open pull requests for every repository with changes.
    pub async fn createpull_each(
        &mut self,
        text: Option<&PullText>,
        issue: Option<&IssueRef>,
    ) -> Result<()> {
        let ctx = &self.ctx;
        let repos = &mut self.workspace.repositories;
        run_step("createpull", repos.len(), async {
            for repo in repos.iter_mut() {
                let span = repo_span("createpull", &repo.name);
                createpull_repository(ctx, repo, text, issue)
                    .instrument(span)
                    .await?;
            }
            Ok(())
        })
        .await
    }

    /// Rewrite each pull request body so it ends with the trailer listing
    /// all pull requests of this change.
    pub async fn updatepulltext(&mut self) -> Result<Vec<PullRequestRef>> {
        let prs: Vec<PullRequestRef> = self
            .workspace
            .repositories
            .iter()
            .filter_map(|r| r.pull_request_id.map(|n| PullRequestRef::new(r.name.clone(), n)))
            .collect();
        let ctx = &self.ctx;
        let repos = &self.workspace.repositories;
        let required = &prs;
        run_step("updatepulltext", repos.len(), async {
            for repo in repos {
                let span = repo_span("updatepulltext", &repo.name);
                updatepulltext_repository(ctx, repo, required)
                    .instrument(span)
                    .await?;
            }
            Ok(())
        })
        .await?;
        Ok(prs)
    }

    /// Full pull-request flow: sync, push, pick the repositories with
    /// changes, point dependencies at GitHub, then open the pull requests
    /// and link them with the `required PRs:` trailer.
    pub async fn createpull(&mut self, issue: Option<&IssueRef>) -> Result<Vec<PullRequestRef>> {
        self.sync().await?;
        self.push().await?;
        let pull_repos = pull_repositories(&self.workspace)?;
        info!(repositories = ?pull_repos, "opening pull requests");
        self.readpulltext().await?;
        self.dependencies(DependencyKind::Remote, None).await?;
        let text =
            pulltext::build_pull_text(&self.ctx.github, &self.workspace, &pull_repos, issue)
                .await?;
        self.createpull_each(text.as_ref(), issue).await?;
        self.updatepulltext().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::fakes::RecordingRunner;

    fn workspace() -> Workspace {
        Workspace::new("acme", "jdoe", &["server".to_string(), "angular".to_string()])
    }

    #[test]
    fn local_changes_abort_pull_selection() {
        let mut ws = workspace();
        ws.repositories[1].local_changes = 1;
        ws.repositories[0].git_changes = 3;
        let err = pull_repositories(&ws).unwrap_err();
        assert!(matches!(err, PolyrepoError::LocalChanges { ref repo } if repo == "angular"));
    }

    #[test]
    fn no_git_changes_is_an_error() {
        assert!(matches!(
            pull_repositories(&workspace()),
            Err(PolyrepoError::NoChanges)
        ));
    }

    #[test]
    fn only_changed_repositories_get_pulls() {
        let mut ws = workspace();
        ws.repositories[1].git_changes = 2;
        assert_eq!(pull_repositories(&ws).unwrap(), vec!["angular"]);
    }

    #[tokio::test]
    async fn test_createpull_skips_unchanged_and_finds_existing() {
        let runner = RecordingRunner::new();
        runner
            .on(
                "gh api",
                CommandOutput::failed(
                    "gh: Validation Failed (HTTP 422)",
                    r#"{"errors":[{"message":"A pull request already exists for jdoe:feature."}]}"#,
                ),
            )
            .on(
                "gh pr list",
                CommandOutput::ok(r#"[{"number":8,"headRefName":"feature","author":{"login":"jdoe"}}]"#),
            );
        let mut orch = Orchestrator::new(&runner, workspace(), "/work");
        {
            let repo = &mut orch.workspace_mut().repositories[0];
            repo.git_changes = 1;
            repo.branch = Some("feature".into());
        }
        let text = PullText::new(PullTextKind::Bug, "fix", "");
        orch.createpull_each(Some(&text), None).await.unwrap();
        assert_eq!(orch.workspace().repositories[0].pull_request_id, Some(8));
        assert_eq!(orch.workspace().repositories[1].pull_request_id, None);
        assert_eq!(runner.matching("gh api").len(), 1);
    }

    #[tokio::test]
    async fn test_updatepulltext_appends_trailer() {
        let runner = RecordingRunner::new();
        runner.on(
            "gh pr view",
            CommandOutput::ok(r#"{"body":"Fix it\nrequired PRs: server:1"}"#),
        );
        let mut orch = Orchestrator::new(&runner, workspace(), "/work");
        orch.workspace_mut().repositories[0].pull_request_id = Some(3);
        orch.workspace_mut().repositories[1].pull_request_id = Some(9);
        let prs = orch.updatepulltext().await.unwrap();
        assert_eq!(prs.len(), 2);
        let edits = runner.matching("gh pr edit");
        assert_eq!(edits.len(), 2);
        assert!(edits[0].ends_with("--body Fix it\nrequired PRs: server:3, angular:9"));
    }
}
