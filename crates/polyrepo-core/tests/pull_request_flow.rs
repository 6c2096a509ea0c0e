//! End-to-end pull-request flows against scripted `git`, `gh` and `npm`.
//!
//! Covers:
//! - `createpull` as the owner: only changed repositories are pushed and get
//!   a pull request; the body ends with the `required PRs:` trailer.
//! - `createpull` from a fork: pushes go to the login's remote and heads are
//!   `<login>:<branch>`.
//! - Sync falls back to tracking `<owner>/main` when the branch is missing on
//!   the fork.
//! - `init` clones only missing checkouts, from the fork when there is one.
//! - `dependencies local` leaves uncommitted changes and aborts, while
//!   `dependencies release` leaves them for the release commit.

use std::path::Path;

use polyrepo_core::fakes::RecordingRunner;
use polyrepo_core::{
    CommandOutput, DependencyKind, Orchestrator, PolyrepoError, PullRequestRef, Workspace,
};

fn checkout(root: &Path, name: &str, deps: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("package.json"),
        format!(r#"{{ "name": "@acme/{name}", "version": "2.0.0", "dependencies": {{ {deps} }} }}"#),
    )
    .unwrap();
}

fn two_repositories(login: &str) -> (tempfile::TempDir, Workspace) {
    let root = tempfile::tempdir().unwrap();
    checkout(root.path(), "specification", "");
    checkout(
        root.path(),
        "server",
        r#""@acme/specification": "github:acme/specification""#,
    );
    let ws = Workspace::new(
        "acme",
        login,
        &["specification".to_string(), "server".to_string()],
    );
    (root, ws)
}

/// Scripts a checkout on `feature` where only `server` differs from `main`.
fn feature_branch(runner: &RecordingRunner, remotes: &str) {
    runner
        .on("git rev-parse --abbrev-ref HEAD", CommandOutput::ok("feature\n"))
        .on("git remote -v", CommandOutput::ok(remotes))
        .on_in("server", "git diff --name-only main", CommandOutput::ok("src/a.ts\nsrc/b.ts\n"))
        .on_in(
            "server",
            "git log main...feature",
            CommandOutput::ok("[bug] reconnect after timeout\nThe client retries.\n\x1e\n"),
        )
        .on_match(
            "/git/trees/",
            CommandOutput::ok(r#"{"tree":[{"path":"package.json"}]}"#),
        )
        .on_match("/repos/acme/server/pulls", CommandOutput::ok(r#"{"number":11}"#))
        .on("gh pr view", CommandOutput::ok(r#"{"body":"The client retries."}"#));
}

// ---- owner == login ----

#[tokio::test]
async fn test_createpull_as_owner_links_changed_repository() {
    let (root, ws) = two_repositories("acme");
    let runner = RecordingRunner::new();
    runner.on("gh repo list", CommandOutput::ok("[]"));
    feature_branch(&runner, "acme\thttps://github.com/acme/x.git (fetch)\n");

    let mut orch = Orchestrator::new(&runner, ws, root.path());
    let prs = orch.createpull(None).await.unwrap();
    assert_eq!(prs, vec![PullRequestRef::new("server", 11)]);

    assert!(runner.ran_in("server", "git push acme feature"));
    assert!(!runner.ran_in("specification", "git push"));
    assert!(!runner
        .command_lines()
        .iter()
        .any(|l| l.contains("/repos/acme/specification/pulls")));

    let create = runner
        .command_lines()
        .into_iter()
        .find(|l| l.contains("/repos/acme/server/pulls"))
        .unwrap();
    assert!(create.contains("title=reconnect after timeout"));
    assert!(create.contains("head=acme:feature"));
    assert!(create.contains("base=main"));
    assert!(create.contains("draft=false"));

    let edits = runner.matching("gh pr edit 11 -R acme/server");
    assert_eq!(edits.len(), 1);
    assert!(edits[0].ends_with("--body The client retries.\nrequired PRs: server:11"));
}

#[tokio::test]
async fn test_createpull_without_changes_fails_before_github() {
    let (root, ws) = two_repositories("acme");
    let runner = RecordingRunner::new();
    runner
        .on("gh repo list", CommandOutput::ok("[]"))
        .on("git rev-parse --abbrev-ref HEAD", CommandOutput::ok("feature\n"));
    let mut orch = Orchestrator::new(&runner, ws, root.path());
    let err = orch.createpull(None).await.unwrap_err();
    assert!(matches!(err, PolyrepoError::NoChanges));
    assert!(!runner.ran("git push"));
    assert!(!runner.ran("gh api"));
}

#[tokio::test]
async fn test_init_as_owner_clones_over_https() {
    let root = tempfile::tempdir().unwrap();
    let ws = Workspace::new("acme", "acme", &["specification".to_string()]);
    let runner = RecordingRunner::new();
    runner.on("gh repo list", CommandOutput::ok("[]"));
    let mut orch = Orchestrator::new(&runner, ws, root.path());
    orch.init(None).await.unwrap();

    let clones = runner.matching("git clone");
    assert_eq!(clones, vec!["git clone https://github.com/acme/specification.git"]);
    assert!(runner.ran_in("specification", "git remote add acme https://github.com/acme/"));
    assert!(!runner.ran("git switch"));
}

// ---- owner != login ----

#[tokio::test]
async fn test_init_clones_missing_checkouts_and_switches_branch() {
    let (root, _) = two_repositories("jdoe");
    std::fs::remove_dir_all(root.path().join("server")).unwrap();
    let names = ["specification", "server", "angular"].map(String::from);
    let ws = Workspace::new("acme", "jdoe", &names);
    let runner = RecordingRunner::new();
    runner
        .on("gh repo list", CommandOutput::ok(r#"[{"name":"server"}]"#))
        .on_in("server", "git show-ref", CommandOutput::failed("", ""))
        .on_in("angular", "git show-ref", CommandOutput::failed("", ""));

    let mut orch = Orchestrator::new(&runner, ws, root.path());
    orch.init(Some("feature")).await.unwrap();

    let clones: Vec<_> = runner
        .calls()
        .into_iter()
        .filter(|c| c.to_string().starts_with("git clone"))
        .collect();
    assert_eq!(clones.len(), 2);
    assert!(clones.iter().all(|c| c.cwd == root.path()));
    assert_eq!(clones[0].to_string(), "git clone git@github.com:jdoe/server.git");
    assert_eq!(clones[1].to_string(), "git clone git@github.com:acme/angular.git");

    assert!(runner.ran_in("server", "git remote add jdoe git@github.com:jdoe/server.git"));
    assert!(!runner.ran_in("angular", "git remote add jdoe"));
    assert!(!runner.ran_in("specification", "git checkout -b"));
    assert!(runner.ran_in("server", "git checkout -b feature"));
    for name in ["specification", "server", "angular"] {
        assert!(runner.ran_in(name, "git switch feature"), "{name}");
    }
    assert!(orch
        .workspace()
        .repositories
        .iter()
        .all(|r| r.branch.as_deref() == Some("feature")));
    assert!(orch.workspace().repository("server").unwrap().is_forked);
}

// ---- owner != login (pull requests) ----

#[tokio::test]
async fn test_createpull_from_fork_pushes_to_login() {
    let (root, ws) = two_repositories("jdoe");
    let runner = RecordingRunner::new();
    runner
        .on("gh repo list", CommandOutput::ok(r#"[{"name":"server"}]"#))
        .on_match("/branches/feature", CommandOutput::ok("{}"));
    feature_branch(&runner, "acme\tgit@github.com:acme/x.git (fetch)\n");

    let mut orch = Orchestrator::new(&runner, ws, root.path());
    orch.createpull(None).await.unwrap();

    assert!(runner.ran_in(
        "server",
        "git remote add jdoe git@github.com:jdoe/server.git"
    ));
    assert!(runner.ran_in("server", "gh repo sync jdoe/server -b main"));
    assert!(runner.ran_in("server", "git branch --set-upstream-to=jdoe/feature feature"));
    assert!(runner.ran_in("server", "git push jdoe feature"));
    assert!(!runner.ran("git push acme"));
    assert!(!runner.ran("gh repo fork"));
    assert!(runner
        .command_lines()
        .iter()
        .any(|l| l.contains("/repos/acme/server/pulls") && l.contains("head=jdoe:feature")));
    assert_eq!(
        orch.workspace().repository("server").unwrap().remote_branch.as_deref(),
        Some("jdoe/feature")
    );
}

#[tokio::test]
async fn test_sync_tracks_owner_main_when_fork_lacks_branch() {
    let (root, ws) = two_repositories("jdoe");
    let runner = RecordingRunner::new();
    runner
        .on("gh repo list", CommandOutput::ok(r#"[{"name":"specification"},{"name":"server"}]"#))
        .on("git rev-parse --abbrev-ref HEAD", CommandOutput::ok("feature\n"))
        .on_match(
            "/branches/feature",
            CommandOutput::failed("gh: Branch not found (HTTP 404)", ""),
        );
    let mut orch = Orchestrator::new(&runner, ws, root.path());
    orch.sync().await.unwrap();

    assert!(runner.ran("git branch --set-upstream-to=acme/main feature"));
    assert!(!runner.ran("git pull --rebase"));
    for repo in &orch.workspace().repositories {
        assert!(repo.is_forked);
        assert_eq!(repo.remote_branch.as_deref(), Some("acme/main"));
    }
}

// ---- dependencies ----

#[tokio::test]
async fn test_local_dependencies_leave_changes_and_abort() {
    let (root, ws) = two_repositories("acme");
    let runner = RecordingRunner::new();
    runner.on_in(
        "server",
        "git status --porcelain",
        CommandOutput::ok(" M package.json\n M package-lock.json\n"),
    );
    let mut orch = Orchestrator::new(&runner, ws, root.path());
    let err = orch.dependencies(DependencyKind::Local, None).await.unwrap_err();
    assert!(matches!(err, PolyrepoError::LocalChanges { ref repo } if repo == "server"));
    assert_eq!(orch.workspace().repository("server").unwrap().local_changes, 2);
    assert!(runner.ran_in("server", "npm install ../specification"));
}

#[tokio::test]
async fn test_release_dependencies_keep_changes_for_the_release_commit() {
    let (root, ws) = two_repositories("acme");
    let runner = RecordingRunner::new();
    runner.on_in(
        "server",
        "git status --porcelain",
        CommandOutput::ok(" M package.json\n"),
    );
    let mut orch = Orchestrator::new(&runner, ws, root.path());
    orch.dependencies(DependencyKind::Release, None).await.unwrap();
    assert_eq!(orch.workspace().repository("server").unwrap().local_changes, 1);
    assert!(runner.ran_in("server", "npm install github:acme/specification#v2.0.0"));
}
