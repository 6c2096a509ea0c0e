//! Runtime model: the configured repositories and what the workflows learn
//! about them while they run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PolyrepoError, Result};

/// Default branch every repository integrates into.
pub const MAIN_BRANCH: &str = "main";

/// Branch releases are cut from.
pub const RELEASE_BRANCH: &str = "release";

/// Kind of change a commit message announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullTextKind {
    Bug,
    Feature,
}

impl PullTextKind {
    pub const ALL: [PullTextKind; 2] = [PullTextKind::Bug, PullTextKind::Feature];

    /// The `[tag]` that marks a commit subject with this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            PullTextKind::Bug => "bug",
            PullTextKind::Feature => "feature",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

/// Title and description material for a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullText {
    pub kind: PullTextKind,
    pub topic: String,
    pub text: String,
    pub draft: bool,
}

impl PullText {
    pub fn new(kind: PullTextKind, topic: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            topic: topic.into(),
            text: text.into(),
            draft: true,
        }
    }
}

/// Per-repository test progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    #[default]
    NotStarted,
    Running,
    Failed,
    Success,
    /// Aggregate only: every repository failed.
    AllFailed,
}

impl TestStatus {
    /// Heading posted as a pull-request comment.
    pub fn comment(&self) -> &'static str {
        match self {
            TestStatus::NotStarted => "No tests",
            TestStatus::Running => "# Tests are running ...",
            TestStatus::Success => "# Tests successful",
            TestStatus::Failed => "# Some Tests failed",
            TestStatus::AllFailed => "# All Tests failed",
        }
    }

    /// Value printed as `status=<..>` for CI consumers.
    pub fn outcome(&self) -> &'static str {
        match self {
            TestStatus::Success => "success",
            _ => "failure",
        }
    }
}

/// `<repository>:<number>` reference to a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub name: String,
    pub number: u64,
}

impl PullRequestRef {
    pub fn new(name: impl Into<String>, number: u64) -> Self {
        Self {
            name: name.into(),
            number,
        }
    }
}

fn split_ref(s: &str) -> Option<(String, u64)> {
    let mut parts = s.split(':');
    let (name, number) = (parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let number = number.trim().parse::<u64>().ok()?;
    Some((name.to_string(), number))
}

impl FromStr for PullRequestRef {
    type Err = PolyrepoError;

    fn from_str(s: &str) -> Result<Self> {
        split_ref(s)
            .map(|(name, number)| Self { name, number })
            .ok_or_else(|| PolyrepoError::InvalidPullRequestRef(s.to_string()))
    }
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.number)
    }
}

/// `<repository>:<number>` reference to an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
    pub name: String,
    pub number: u64,
}

impl FromStr for IssueRef {
    type Err = PolyrepoError;

    fn from_str(s: &str) -> Result<Self> {
        split_ref(s)
            .map(|(name, number)| Self { name, number })
            .ok_or_else(|| PolyrepoError::InvalidIssueRef(s.to_string()))
    }
}

impl fmt::Display for IssueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.number)
    }
}

/// How the authenticated account relates to the repository owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkMode {
    /// `owner == login`: work directly on the owner's repositories.
    SelfOwned,
    /// `owner != login`: fork into the login account and push there.
    Fork,
}

impl ForkMode {
    /// Prefix for clone/remote URLs.
    pub fn url_prefix(&self) -> &'static str {
        match self {
            ForkMode::SelfOwned => "https://github.com/",
            ForkMode::Fork => "git@github.com:",
        }
    }
}

/// Runtime state of one configured repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub branch: Option<String>,
    pub is_forked: bool,
    pub remote_branch: Option<String>,
    /// Uncommitted files in the checkout.
    pub local_changes: usize,
    /// Files that differ from `main`.
    pub git_changes: usize,
    pub pull_texts: Vec<PullText>,
    pub pull_request_id: Option<u64>,
    pub test_status: TestStatus,
}

impl Repository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Branch recorded by the last sync, or `main`.
    pub fn branch_or_main(&self) -> &str {
        self.branch.as_deref().unwrap_or(MAIN_BRANCH)
    }
}

/// The owner, the authenticated login and the repositories worked on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub owner: String,
    pub login: String,
    pub repositories: Vec<Repository>,
    /// Explicit title/description overriding the generated pull text.
    pub pull_text: Option<PullText>,
}

impl Workspace {
    pub fn new(owner: impl Into<String>, login: impl Into<String>, names: &[String]) -> Self {
        Self {
            owner: owner.into(),
            login: login.into(),
            repositories: names.iter().map(Repository::new).collect(),
            pull_text: None,
        }
    }

    pub fn fork_mode(&self) -> ForkMode {
        if self.owner == self.login {
            ForkMode::SelfOwned
        } else {
            ForkMode::Fork
        }
    }

    pub fn repository(&self, name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.name == name)
    }

    pub fn repository_mut(&mut self, name: &str) -> Option<&mut Repository> {
        self.repositories.iter_mut().find(|r| r.name == name)
    }

    /// Record pull request numbers from a required-PR list.
    pub fn assign_pull_requests(&mut self, prs: &[PullRequestRef]) {
        for pr in prs {
            if let Some(repo) = self.repository_mut(&pr.name) {
                repo.pull_request_id = Some(pr.number);
            }
        }
    }

    /// Aggregate test status across all repositories.
    pub fn test_result(&self) -> TestStatus {
        let failed = self
            .repositories
            .iter()
            .filter(|r| r.test_status == TestStatus::Failed)
            .count();
        if failed == 0 {
            TestStatus::Success
        } else if failed == self.repositories.len() {
            TestStatus::AllFailed
        } else {
            TestStatus::Failed
        }
    }
}
