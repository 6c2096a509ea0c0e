//! `gh` invocations: REST calls through `gh api` plus `gh repo` / `gh pr`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PolyrepoError, Result};
use crate::exec::{CommandRunner, CommandSpec};
use crate::model::PullText;

/// Time GitHub needs after `gh repo fork` before the fork can be pushed to.
pub const FORK_SETTLE: Duration = Duration::from_secs(3);

const ALREADY_EXISTS: &str = "A pull request already exists for";
const BRANCH_NOT_FOUND: &str = "Branch not found";

/// A `-f` (string) or `-F` (typed: numbers, booleans) field for `gh api`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiField {
    flag: &'static str,
    pair: String,
}

impl ApiField {
    pub fn string(key: &str, value: impl AsRef<str>) -> Self {
        Self {
            flag: "-f",
            pair: format!("{key}={}", value.as_ref()),
        }
    }

    pub fn typed(key: &str, value: impl ToString) -> Self {
        Self {
            flag: "-F",
            pair: format!("{key}={}", value.to_string()),
        }
    }
}

/// Result of `GET /repos/{o}/{r}/compare/{base}...{head}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Comparison {
    pub status: String,
    pub ahead_by: u64,
    pub behind_by: u64,
}

/// Latest check run on a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckRun {
    pub completed: bool,
    pub success: bool,
}

#[derive(Debug, Deserialize)]
struct CheckRuns {
    total_count: u64,
    #[serde(default)]
    check_runs: Vec<CheckRunEntry>,
}

#[derive(Debug, Deserialize)]
struct CheckRunEntry {
    status: String,
    conclusion: Option<String>,
}

/// Fields of `gh pr view --json body,state,headRefName,headRefOid`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestView {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub head_ref_name: String,
    #[serde(default)]
    pub head_ref_oid: String,
}

impl PullRequestView {
    /// Still accepting changes: `OPEN` (or `APPROVED`, as some CI payloads report it).
    pub fn is_open(&self) -> bool {
        matches!(self.state.as_str(), "OPEN" | "APPROVED")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestListEntry {
    number: u64,
    head_ref_name: String,
    author: Author,
}

#[derive(Debug, Deserialize)]
struct Author {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Number {
    number: u64,
}

/// Issue title and body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Issue {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
}

/// What a new pull request is created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestContent {
    Text(PullText),
    /// Convert an existing issue into the pull request.
    Issue(u64),
}

/// Request body for `POST /repos/{o}/{r}/pulls`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub content: PullRequestContent,
    /// `<login>:<branch>`.
    pub head: String,
    pub base: String,
}

impl NewPullRequest {
    fn fields(&self) -> Vec<ApiField> {
        let mut fields = match &self.content {
            PullRequestContent::Text(text) => vec![
                ApiField::string("title", &text.topic),
                ApiField::string("body", &text.text),
                ApiField::typed("draft", text.draft),
            ],
            PullRequestContent::Issue(number) => vec![
                ApiField::typed("issue", number),
                ApiField::typed("draft", false),
            ],
        };
        fields.push(ApiField::string("head", &self.head));
        fields.push(ApiField::string("base", &self.base));
        fields
    }
}

/// Outcome of creating a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatedPull {
    Created(u64),
    /// GitHub refused because a pull request for the head branch is open.
    AlreadyExists,
}

fn parse_json<T: DeserializeOwned>(command: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| PolyrepoError::UnexpectedResponse {
        command: command.to_string(),
        detail: e.to_string(),
    })
}

/// `gh` bound to a working directory.
#[derive(Clone)]
pub struct GitHub<'a> {
    runner: &'a dyn CommandRunner,
    cwd: PathBuf,
    fork_settle: Duration,
}

impl<'a> GitHub<'a> {
    pub fn new(runner: &'a dyn CommandRunner, cwd: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            cwd: cwd.into(),
            fork_settle: FORK_SETTLE,
        }
    }

    pub fn with_fork_settle(mut self, settle: Duration) -> Self {
        self.fork_settle = settle;
        self
    }

    fn gh<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("gh", &self.cwd).args(args)
    }

    async fn json<T: DeserializeOwned>(&self, spec: CommandSpec) -> Result<T> {
        let out = self.runner.run_checked(&spec).await?;
        parse_json(&spec.to_string(), &out)
    }

    fn api_spec(&self, method: &str, url: &str, fields: &[ApiField]) -> CommandSpec {
        let mut spec = self.gh([
            "api",
            "-H",
            "Accept: application/vnd.github+json",
            "-H",
            "X-GitHub-Api-Version: 2022-11-28",
            "-X",
            method,
            url,
        ]);
        for field in fields {
            spec = spec.args([field.flag.to_string(), field.pair.clone()]);
        }
        spec
    }

    /// Raw `gh api` call; returns the response body.
    pub async fn api(&self, method: &str, url: &str, fields: &[ApiField]) -> Result<String> {
        self.runner
            .run_checked(&self.api_spec(method, url, fields))
            .await
    }

    async fn api_json<T: DeserializeOwned>(&self, method: &str, url: &str) -> Result<T> {
        self.json(self.api_spec(method, url, &[])).await
    }

    /// Login of the authenticated account.
    pub async fn login(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct User {
            login: String,
        }
        let user: User = self.api_json("GET", "/user").await?;
        Ok(user.login)
    }

    /// Whether the authenticated account has a fork named `name`.
    pub async fn is_forked(&self, name: &str) -> Result<bool> {
        #[derive(Deserialize)]
        struct Name {
            name: String,
        }
        let forks: Vec<Name> = self
            .json(self.gh(["repo", "list", "--fork", "--limit", "1000", "--json", "name"]))
            .await?;
        Ok(forks.iter().any(|f| f.name == name))
    }

    /// Fork `<owner>/<name>` into the authenticated account and wait for it to settle.
    pub async fn fork(&self, owner: &str, name: &str) -> Result<()> {
        let target = format!("{owner}/{name}");
        self.runner
            .run_checked(&self.gh(["repo", "fork", target.as_str(), "--clone=false"]))
            .await?;
        info!(repository = %target, "forked, waiting for GitHub");
        tokio::time::sleep(self.fork_settle).await;
        Ok(())
    }

    /// `gh repo sync <login>/<name> -b <branch>`.
    pub async fn sync_fork(&self, login: &str, name: &str, branch: &str) -> Result<()> {
        let target = format!("{login}/{name}");
        self.runner
            .run_checked(&self.gh(["repo", "sync", target.as_str(), "-b", branch]))
            .await
            .map(|_| ())
    }

    /// Whether `<owner>/<repo>` has `branch`. A "Branch not found" answer is `false`.
    pub async fn branch_exists(&self, owner: &str, repo: &str, branch: &str) -> Result<bool> {
        let url = format!("/repos/{owner}/{repo}/branches/{branch}");
        match self.api("GET", &url, &[]).await {
            Ok(_) => Ok(true),
            Err(e) if e.output_contains(BRANCH_NOT_FOUND) => {
                debug!(%owner, %repo, %branch, "branch not found");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn compare(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<Comparison> {
        self.api_json("GET", &format!("/repos/{owner}/{repo}/compare/{base}...{head}"))
            .await
    }

    /// Whether the tree at `reference` (branch or sha) contains `path`.
    pub async fn tree_contains(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
        path: &str,
    ) -> Result<bool> {
        #[derive(Deserialize)]
        struct Tree {
            tree: Vec<TreeEntry>,
        }
        #[derive(Deserialize)]
        struct TreeEntry {
            path: String,
        }
        let tree: Tree = self
            .api_json(
                "GET",
                &format!("/repos/{owner}/{repo}/git/trees/{reference}?recursive=true"),
            )
            .await?;
        Ok(tree.tree.iter().any(|e| e.path == path))
    }

    pub async fn create_pull(
        &self,
        owner: &str,
        repo: &str,
        request: &NewPullRequest,
    ) -> Result<CreatedPull> {
        let url = format!("/repos/{owner}/{repo}/pulls");
        match self.api("POST", &url, &request.fields()).await {
            Ok(body) => {
                let created: Number = parse_json(&format!("gh api POST {url}"), &body)?;
                Ok(CreatedPull::Created(created.number))
            }
            Err(e) if e.output_contains(ALREADY_EXISTS) => {
                info!(
                    %owner,
                    %repo,
                    head = %request.head,
                    "pull request already exists, continuing"
                );
                Ok(CreatedPull::AlreadyExists)
            }
            Err(e) => Err(e),
        }
    }

    /// Number of the pull request `login` opened from `branch`, if any.
    pub async fn find_pull(
        &self,
        owner: &str,
        repo: &str,
        login: &str,
        branch: &str,
    ) -> Result<Option<u64>> {
        let target = format!("{owner}/{repo}");
        let entries: Vec<PullRequestListEntry> = self
            .json(self.gh([
                "pr",
                "list",
                "-R",
                target.as_str(),
                "--json",
                "number,headRefName,author",
            ]))
            .await?;
        Ok(entries
            .into_iter()
            .find(|e| e.author.login == login && e.head_ref_name == branch)
            .map(|e| e.number))
    }

    pub async fn view_pull(&self, owner: &str, repo: &str, number: u64) -> Result<PullRequestView> {
        let target = format!("{owner}/{repo}");
        self.json(self.gh([
            "pr".to_string(),
            "view".to_string(),
            number.to_string(),
            "-R".to_string(),
            target,
            "--json".to_string(),
            "body,state,headRefName,headRefOid".to_string(),
        ]))
        .await
    }

    pub async fn edit_pull_body(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<()> {
        let spec = self.gh([
            "pr".to_string(),
            "edit".to_string(),
            number.to_string(),
            "-R".to_string(),
            format!("{owner}/{repo}"),
            "--body".to_string(),
            body.to_string(),
        ]);
        self.runner.run_checked(&spec).await.map(|_| ())
    }

    /// Comment on a pull request; `edit_last` replaces the previous comment.
    pub async fn comment_pull(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
        edit_last: bool,
    ) -> Result<()> {
        let mut spec = self.gh([
            "pr".to_string(),
            "comment".to_string(),
            number.to_string(),
            "-R".to_string(),
            format!("{owner}/{repo}"),
        ]);
        if edit_last {
            spec = spec.arg("--edit-last");
        }
        spec = spec.args(["-b", body]);
        self.runner.run_checked(&spec).await.map(|_| ())
    }

    pub async fn issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue> {
        self.api_json("GET", &format!("/repos/{owner}/{repo}/issues/{number}"))
            .await
    }

    /// Latest check run on `reference`; `None` while no run has been reported.
    pub async fn latest_check_run(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> Result<Option<CheckRun>> {
        let runs: CheckRuns = self
            .api_json(
                "GET",
                &format!("/repos/{owner}/{repo}/commits/{reference}/check-runs?filter=latest"),
            )
            .await?;
        if runs.total_count == 0 {
            return Ok(None);
        }
        let run = runs
            .check_runs
            .first()
            .ok_or_else(|| PolyrepoError::CheckRun {
                target: format!("{owner}/{repo}/{reference}"),
                detail: format!("total_count is {} but no runs were listed", runs.total_count),
            })?;
        Ok(Some(CheckRun {
            completed: run.status == "completed",
            success: run.conclusion.as_deref() == Some("success"),
        }))
    }

    /// Number of the most recently closed pull request of the checkout in `dir`.
    pub async fn latest_closed_pull(&self, dir: &Path) -> Result<Option<u64>> {
        let spec = CommandSpec::new("gh", dir).args([
            "pr", "list", "-s", "closed", "-L", "1", "--json", "number",
        ]);
        let out = self.runner.run_checked(&spec).await?;
        let entries: Vec<Number> = parse_json(&spec.to_string(), &out)?;
        Ok(entries.first().map(|n| n.number))
    }
}
