//! Error taxonomy for polyrepo workflows.

use std::path::PathBuf;

/// polyrepo errors.
#[derive(Debug, thiserror::Error)]
pub enum PolyrepoError {
    /// A `git`, `gh` or `npm` invocation exited with a non-zero status.
    #[error("{}: `{command}` failed: {}", .cwd.display(), failure_text(.stderr, .stdout))]
    CommandFailed {
        command: String,
        cwd: PathBuf,
        code: Option<i32>,
        stderr: String,
        stdout: String,
    },

    #[error(
        "File(s) have been updated in {repo}.\nThere are local changes.\nPlease commit them first"
    )]
    LocalChanges { repo: String },

    #[error("no changes in GitHub: nothing to open pull requests for")]
    NoChanges,

    #[error("no repositories to open pull requests for")]
    NoPullRepositories,

    #[error(
        "invalid pull request reference '{0}' (expected: <repository>:<pull request number>)"
    )]
    InvalidPullRequestRef(String),

    #[error("invalid issue reference '{0}' (expected: <repository>:<issue number>)")]
    InvalidIssueRef(String),

    #[error("config error in {}: {detail}", .path.display())]
    Config { path: PathBuf, detail: String },

    #[error("repository '{0}' is not configured")]
    UnknownRepository(String),

    #[error("release is allowed for {owner} only (logged in as {login})")]
    ReleaseNotAllowed { owner: String, login: String },

    #[error("git origin is not {owner}/{repo}")]
    OriginMismatch { owner: String, repo: String },

    #[error("release failed: tag '{tag}' exists in {repo}")]
    TagExists { repo: String, tag: String },

    #[error("unable to validate check run for {target}: {detail}")]
    CheckRun { target: String, detail: String },

    #[error("pull request {target} is {state}")]
    PullRequestClosed { target: String, state: String },

    #[error("missing argument: {0}")]
    MissingArgument(String),

    #[error("unexpected response from {command}: {detail}")]
    UnexpectedResponse { command: String, detail: String },

    #[error("manifest error: {0}")]
    Manifest(#[from] npm_manifest::ManifestError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn failure_text<'a>(stderr: &'a str, stdout: &'a str) -> &'a str {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        stdout.trim()
    } else {
        stderr
    }
}

impl PolyrepoError {
    /// True when this is a command failure whose stderr or stdout contains `needle`.
    pub fn output_contains(&self, needle: &str) -> bool {
        match self {
            PolyrepoError::CommandFailed { stderr, stdout, .. } => {
                stderr.contains(needle) || stdout.contains(needle)
            }
            _ => false,
        }
    }

    /// True for a command failure that wrote nothing to stderr.
    pub fn is_silent_failure(&self) -> bool {
        matches!(self, PolyrepoError::CommandFailed { stderr, .. } if stderr.trim().is_empty())
    }
}

/// Result type for polyrepo operations.
pub type Result<T> = std::result::Result<T, PolyrepoError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str, stdout: &str) -> PolyrepoError {
        PolyrepoError::CommandFailed {
            command: "gh api -X GET /repos/acme/server/branches/feature".into(),
            cwd: PathBuf::from("/work/server"),
            code: Some(1),
            stderr: stderr.into(),
            stdout: stdout.into(),
        }
    }

    #[test]
    fn command_failure_displays_cwd_and_stderr() {
        let msg = failed("gh: Branch not found (HTTP 404)", "").to_string();
        assert!(msg.starts_with("/work/server:"));
        assert!(msg.contains("Branch not found"));
    }

    #[test]
    fn command_failure_falls_back_to_stdout() {
        let msg = failed("", r#"{"message":"Not Found"}"#).to_string();
        assert!(msg.contains("Not Found"));
    }

    #[test]
    fn output_contains_checks_both_streams() {
        assert!(failed("", r#"{"message":"Branch not found"}"#).output_contains("Branch not found"));
        assert!(failed("Branch not found", "").output_contains("Branch not found"));
        assert!(!PolyrepoError::NoChanges.output_contains("Branch"));
    }

    #[test]
    fn silent_failure_has_empty_stderr() {
        assert!(failed("  \n", "").is_silent_failure());
        assert!(!failed("fatal: no such branch", "").is_silent_failure());
    }

    #[test]
    fn local_changes_message_names_repo() {
        let msg = PolyrepoError::LocalChanges {
            repo: "server".into(),
        }
        .to_string();
        assert!(msg.contains("server"));
        assert!(msg.contains("local changes"));
    }
}
