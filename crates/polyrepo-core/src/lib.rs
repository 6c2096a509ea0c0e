//! polyrepo core library
//!
//! Workflows that keep a fixed set of GitHub repositories in step: cloning
//! and forking, branch synchronisation, cross-repository pull requests,
//! test status and releases. All real work is delegated to `git`, `gh` and
//! `npm` through [`exec::CommandRunner`].

pub mod config;
pub mod error;
pub mod exec;
pub mod fakes;
pub mod git;
pub mod github;
pub mod model;
pub mod obs;
pub mod pulltext;
pub mod telemetry;
pub mod trailer;
pub mod workflow;

pub use config::{AddonConfig, RepositoryEntry, WorkspaceConfig, DEFAULT_CONFIG_FILE};
pub use error::{PolyrepoError, Result};
pub use exec::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use git::Git;
pub use github::GitHub;
pub use model::{
    ForkMode, IssueRef, PullRequestRef, PullText, PullTextKind, Repository, TestStatus, Workspace,
    MAIN_BRANCH, RELEASE_BRANCH,
};
pub use telemetry::init_tracing;
pub use workflow::checks::DEFAULT_POLL_INTERVAL;
pub use workflow::dependencies::DependencyKind;
pub use workflow::release::ReleasedTag;
pub use workflow::Orchestrator;
