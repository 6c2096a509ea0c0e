//! Pull-request title and description built from tagged commit messages.
//!
//! A commit subject carrying `[bug]` or `[feature]` contributes one entry;
//! the rest of the subject is the topic and the commit body is the text.

use std::sync::OnceLock;

use regex::Regex;
use tracing::info;

use crate::error::{PolyrepoError, Result};
use crate::github::GitHub;
use crate::model::{IssueRef, PullText, PullTextKind, Workspace};

/// Placeholder topic and text for pull requests nobody described yet.
pub const INITIAL_TEXT: &str = "Please update me";

/// `git log` pretty format matching [`parse_commit_log`].
pub const COMMIT_LOG_FORMAT: &str = "%s%n%b%x1e";

const RECORD_SEPARATOR: char = '\x1e';

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(bug|feature)\](.*)").expect("tag pattern is valid"))
}

/// Tagged commits of a `git log --pretty=`[`COMMIT_LOG_FORMAT`] listing, newest first.
pub fn parse_commit_log(log: &str) -> Vec<PullText> {
    log.split(RECORD_SEPARATOR)
        .filter_map(|record| {
            let record = record.trim_start_matches(&['\n', '\r'][..]);
            let (subject, body) = record.split_once('\n').unwrap_or((record, ""));
            let captures = tag_re().captures(subject)?;
            let kind = PullTextKind::from_tag(&captures[1])?;
            let topic = captures[2].trim();
            if topic.is_empty() {
                return None;
            }
            Some(PullText::new(kind, topic, body.trim()))
        })
        .collect()
}

fn bullet(section: &mut String, repo: &str, entry: &PullText) {
    section.push_str(&format!("* {repo}:{}<br>\n", entry.topic));
    if !entry.text.is_empty() {
        section.push_str(&format!("    {}<br>\n", entry.text));
    }
}

/// Fold the tagged commits of every repository into `base`.
///
/// Entries are grouped under `## Bugs:` and `## Features:`. When each
/// contributing repository has exactly one entry and all topics agree, that
/// shared topic and its text are used instead and the result is not a draft.
pub fn aggregate(workspace: &Workspace, base: PullText) -> PullText {
    let mut result = base;
    let mut bugs = String::new();
    let mut features = String::new();
    let mut shared: Option<&PullText> = None;
    let mut single_topic = true;

    for repo in workspace.repositories.iter().filter(|r| !r.pull_texts.is_empty()) {
        if repo.pull_texts.len() != 1 {
            single_topic = false;
        }
        for entry in &repo.pull_texts {
            match entry.kind {
                PullTextKind::Bug => bullet(&mut bugs, &repo.name, entry),
                PullTextKind::Feature => bullet(&mut features, &repo.name, entry),
            }
            match shared {
                None => shared = Some(entry),
                Some(first) if first.topic != entry.topic => single_topic = false,
                Some(_) => {}
            }
        }
    }

    if !bugs.is_empty() || !features.is_empty() {
        let mut text = String::new();
        if !bugs.is_empty() {
            text.push_str("## Bugs:\n");
            text.push_str(&bugs);
        }
        if !features.is_empty() {
            text.push_str("## Features:\n");
            text.push_str(&features);
        }
        result.text = text;
    }

    if let Some(first) = shared.filter(|_| single_topic) {
        result.kind = first.kind;
        result.topic = first.topic.clone();
        result.text = first.text.clone();
        result.draft = false;
    }
    result
}

/// Starting text: the workspace override, or the placeholder.
fn initial(workspace: &Workspace) -> PullText {
    match &workspace.pull_text {
        Some(explicit) => {
            let mut text = explicit.clone();
            if !text.topic.is_empty() && !text.text.is_empty() {
                text.draft = false;
            }
            text
        }
        None => PullText::new(PullTextKind::Feature, INITIAL_TEXT, INITIAL_TEXT),
    }
}

/// Title and description for the pull requests of `pull_repos`.
///
/// Returns `None` when `issue` lives in the last pull repository: that pull
/// request is created from the issue itself.
pub async fn build_pull_text(
    github: &GitHub<'_>,
    workspace: &Workspace,
    pull_repos: &[String],
    issue: Option<&IssueRef>,
) -> Result<Option<PullText>> {
    let Some(last) = pull_repos.last() else {
        return Err(PolyrepoError::NoPullRepositories);
    };
    let mut text = initial(workspace);

    let Some(issue) = issue else {
        return Ok(Some(aggregate(workspace, text)));
    };
    info!(issue = %issue, "reading pull text from issue");
    if &issue.name == last {
        return Ok(None);
    }
    let fetched = github
        .issue(&workspace.owner, &issue.name, issue.number)
        .await?;
    text.topic = fetched.title;
    text.text = fetched.body.unwrap_or_default();
    text.draft = false;
    Ok(Some(text))
}
