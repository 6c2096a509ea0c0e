//! Structured step events for repository workflows.
//!
//! Every workflow step runs inside a [`repo_span`] so that subprocess output
//! and step events carry the repository name. Events are emitted at `info!`
//! unless noted.

use tracing::{info, warn, Span};

/// Span tagged with the repository and the workflow step.
///
/// ```ignore
/// use tracing::Instrument;
/// sync_one(repo).instrument(repo_span("sync", "server")).await?;
/// ```
pub fn repo_span(step: &str, repo: &str) -> Span {
    tracing::info_span!("polyrepo.repo", step = %step, repo = %repo)
}

pub fn emit_step_started(step: &str, repositories: usize) {
    info!(event = "step.started", step = %step, repositories = repositories);
}

pub fn emit_step_finished(step: &str, duration_ms: u64, success: bool) {
    info!(
        event = "step.finished",
        step = %step,
        duration_ms = duration_ms,
        success = success,
    );
}

/// A repository was skipped for a step, e.g. no changes relative to `main`.
pub fn emit_repo_skipped(step: &str, repo: &str, reason: &str) {
    info!(event = "repo.skipped", step = %step, repo = %repo, reason = %reason);
}

pub fn emit_pull_request_opened(repo: &str, number: u64, existing: bool) {
    info!(
        event = "pull_request.opened",
        repo = %repo,
        number = number,
        existing = existing,
    );
}

pub fn emit_test_finished(repo: &str, success: bool) {
    info!(event = "test.finished", repo = %repo, success = success);
}

/// Echo captured subprocess output to the log stream, one event per
/// non-blank line. Returns the number of lines echoed.
pub fn emit_subprocess_output(program: &str, output: &str) -> usize {
    let mut echoed = 0;
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        info!(target: "polyrepo::subprocess", program = %program, "{line}");
        echoed += 1;
    }
    echoed
}

/// A non-fatal failure that the workflow logs and continues past (warning level).
pub fn emit_ignored_failure(step: &str, repo: &str, error: &dyn std::fmt::Display) {
    warn!(event = "step.ignored_failure", step = %step, repo = %repo, error = %error);
}
