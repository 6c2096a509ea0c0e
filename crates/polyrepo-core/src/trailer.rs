//! The `required PRs:` trailer that links the pull requests of one change
//! across repositories.
//!
//! ```text
//! Fix reconnect handling
//!
//! required PRs: server:12, angular:7
//! ```

use std::sync::OnceLock;

use regex::Regex;

use crate::model::PullRequestRef;

const TRAILER_PREFIX: &str = "required PRs: ";

fn trailer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"required PRs: (.*)").expect("trailer pattern is valid"))
}

fn strip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^required PRs: .*\n?").expect("strip pattern is valid"))
}

/// Pull requests listed in the trailer of `body`.
///
/// Without a body or without a trailer the result is `[fallback]`. Entries
/// that are not `<repository>:<number>` are skipped.
pub fn parse_required(body: Option<&str>, fallback: &PullRequestRef) -> Vec<PullRequestRef> {
    let Some(captures) = body.and_then(|b| trailer_re().captures(b)) else {
        return vec![fallback.clone()];
    };
    captures
        .get(1)
        .map(|list| {
            list.as_str()
                .split(',')
                .filter_map(|entry| entry.trim().parse::<PullRequestRef>().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Remove every trailer line, leaving the text around it as it was.
pub fn strip(body: &str) -> String {
    strip_re().replace_all(body, "").into_owned()
}

/// Render the trailer line for `prs`.
pub fn format(prs: &[PullRequestRef]) -> String {
    let list: Vec<String> = prs.iter().map(ToString::to_string).collect();
    format!("{TRAILER_PREFIX}{}", list.join(", "))
}

/// Replace the trailer of `body` with one listing `prs`.
pub fn append(body: &str, prs: &[PullRequestRef]) -> String {
    let stripped = strip(body);
    let stripped = stripped.trim_end();
    if stripped.is_empty() {
        format(prs)
    } else {
        format!("{stripped}\n{}", format(prs))
    }
}
