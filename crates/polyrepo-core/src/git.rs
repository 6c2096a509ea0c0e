//! `git` invocations used by the repository workflows.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::exec::{count_lines, CommandOutput, CommandRunner, CommandSpec};

/// A configured remote as listed by `git remote -v`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

/// Parse `git remote -v` output into unique remotes (fetch URLs win).
pub fn parse_remotes(output: &str) -> Vec<Remote> {
    let mut remotes: Vec<Remote> = Vec::new();
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(url)) = (parts.next(), parts.next()) else {
            continue;
        };
        if remotes.iter().any(|r| r.name == name) {
            continue;
        }
        remotes.push(Remote {
            name: name.to_string(),
            url: url.to_string(),
        });
    }
    remotes
}

/// `git` bound to one checkout directory.
pub struct Git<'a> {
    runner: &'a dyn CommandRunner,
    dir: PathBuf,
}

impl<'a> Git<'a> {
    pub fn new(runner: &'a dyn CommandRunner, dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn spec<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("git", &self.dir).args(args)
    }

    async fn checked<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.run_checked(&self.spec(args)).await
    }

    async fn unchecked<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.run(&self.spec(args)).await
    }

    /// `git clone <url>` inside `parent`.
    pub async fn clone_into(runner: &dyn CommandRunner, parent: &Path, url: &str) -> Result<()> {
        let spec = CommandSpec::new("git", parent).args(["clone", url]);
        runner.run_checked(&spec).await.map(|_| ())
    }

    /// Name of the checked-out branch.
    pub async fn current_branch(&self) -> Result<String> {
        Ok(self
            .checked(["rev-parse", "--abbrev-ref", "HEAD"])
            .await?
            .trim()
            .to_string())
    }

    /// Number of uncommitted entries in `git status --porcelain`.
    pub async fn local_changes(&self) -> Result<usize> {
        Ok(count_lines(&self.checked(["status", "--porcelain"]).await?))
    }

    pub async fn switch(&self, branch: &str) -> Result<()> {
        self.checked(["switch", branch]).await.map(|_| ())
    }

    pub async fn checkout(&self, branch: &str) -> Result<()> {
        self.checked(["checkout", branch]).await.map(|_| ())
    }

    pub async fn create_branch(&self, branch: &str) -> Result<()> {
        self.checked(["checkout", "-b", branch]).await.map(|_| ())
    }

    pub async fn has_local_branch(&self, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{branch}");
        Ok(self
            .unchecked(["show-ref", "--quiet", reference.as_str()])
            .await?
            .success())
    }

    /// Whether the current branch has an upstream configured.
    pub async fn has_upstream(&self) -> Result<bool> {
        Ok(self
            .unchecked(["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"])
            .await?
            .success())
    }

    pub async fn fetch_all(&self) -> Result<()> {
        self.checked(["fetch"]).await.map(|_| ())
    }

    pub async fn fetch(&self, remote: &str, refspec: &str) -> Result<()> {
        self.checked(["fetch", remote, refspec]).await.map(|_| ())
    }

    pub async fn pull_rebase(&self) -> Result<()> {
        self.checked(["pull", "--rebase"]).await.map(|_| ())
    }

    pub async fn pull_theirs(&self) -> Result<()> {
        self.checked(["pull", "-X", "theirs"]).await.map(|_| ())
    }

    pub async fn merge(&self, reference: &str) -> Result<()> {
        self.checked(["merge", reference]).await.map(|_| ())
    }

    pub async fn merge_ff_only(&self, reference: &str) -> Result<()> {
        self.checked(["merge", "--ff-only", reference])
            .await
            .map(|_| ())
    }

    pub async fn merge_theirs(&self, reference: &str) -> Result<()> {
        self.checked(["merge", "-X", "theirs", reference])
            .await
            .map(|_| ())
    }

    /// Number of files that differ between the work tree and `reference`.
    pub async fn changed_files(&self, reference: &str) -> Result<usize> {
        Ok(count_lines(
            &self.checked(["diff", "--name-only", reference]).await?,
        ))
    }

    /// Number of files changed since commit `sha`.
    pub async fn changed_files_since(&self, sha: &str) -> Result<usize> {
        Ok(count_lines(
            &self.checked(["diff", "--name-status", sha]).await?,
        ))
    }

    pub async fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.checked(["push", remote, branch]).await.map(|_| ())
    }

    /// Push a branch and a tag together, all or nothing.
    pub async fn push_atomic_force(&self, remote: &str, branch: &str, tag: &str) -> Result<()> {
        self.checked(["push", "--atomic", "-f", remote, branch, tag])
            .await
            .map(|_| ())
    }

    pub async fn push_tag(&self, remote: &str, tag: &str) -> Result<()> {
        self.checked(["push", remote, "tag", tag]).await.map(|_| ())
    }

    pub async fn delete_remote_tag(&self, remote: &str, tag: &str) -> Result<()> {
        self.checked(["push", "--delete", remote, tag])
            .await
            .map(|_| ())
    }

    pub async fn delete_tag(&self, tag: &str) -> Result<()> {
        self.checked(["tag", "-d", tag]).await.map(|_| ())
    }

    pub async fn tag(&self, tag: &str) -> Result<()> {
        self.checked(["tag", tag]).await.map(|_| ())
    }

    pub async fn tag_exists(&self, tag: &str) -> Result<bool> {
        Ok(count_lines(&self.checked(["tag", "-l", tag]).await?) > 0)
    }

    pub async fn remotes(&self) -> Result<Vec<Remote>> {
        Ok(parse_remotes(&self.checked(["remote", "-v"]).await?))
    }

    pub async fn has_remote(&self, name: &str) -> Result<bool> {
        Ok(self.remotes().await?.iter().any(|r| r.name == name))
    }

    pub async fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.checked(["remote", "add", name, url]).await.map(|_| ())
    }

    pub async fn set_remote_url(&self, name: &str, url: &str) -> Result<()> {
        self.checked(["remote", "set-url", name, url])
            .await
            .map(|_| ())
    }

    /// `git branch --set-upstream-to=<upstream> [branch]`.
    pub async fn set_upstream(&self, upstream: &str, branch: Option<&str>) -> Result<()> {
        let mut args = vec![format!("--set-upstream-to={upstream}")];
        args.extend(branch.map(str::to_string));
        self.checked(std::iter::once("branch".to_string()).chain(args))
            .await
            .map(|_| ())
    }

    /// Whether `remote` has a branch named `branch`. Lookup failures count as absent.
    pub async fn remote_has_branch(&self, remote: &str, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{branch}");
        let out = self
            .unchecked(["ls-remote", "--heads", remote, reference.as_str()])
            .await?;
        Ok(out.success() && !out.stdout.trim().is_empty())
    }

    /// `git merge-base --fork-point <reference>`.
    pub async fn fork_point(&self, reference: &str) -> Result<String> {
        Ok(self
            .checked(["merge-base", "--fork-point", reference])
            .await?
            .trim()
            .to_string())
    }

    pub async fn add_all(&self) -> Result<()> {
        self.checked(["add", "."]).await.map(|_| ())
    }

    pub async fn commit(&self, message: &str) -> Result<()> {
        self.checked(["commit", "-m", message]).await.map(|_| ())
    }

    /// `git log <range> --pretty=<format>`.
    pub async fn log(&self, range: &str, format: &str) -> Result<String> {
        let pretty = format!("--pretty={format}");
        self.checked(["log", range, pretty.as_str()]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ProcessRunner;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        run_git(dir.path(), &["branch", "-M", "main"]);
        dir
    }

    #[test]
    fn parse_remotes_dedups_fetch_and_push() {
        let out = "acme\thttps://github.com/acme/server.git (fetch)\n\
                   acme\thttps://github.com/acme/server.git (push)\n\
                   jdoe\tgit@github.com:jdoe/server.git (fetch)\n";
        let remotes = parse_remotes(out);
        assert_eq!(remotes.len(), 2);
        assert_eq!(remotes[0].name, "acme");
        assert_eq!(remotes[1].url, "git@github.com:jdoe/server.git");
    }

    #[tokio::test]
    async fn test_current_branch_and_local_changes() {
        let repo = make_git_repo();
        let git = Git::new(&ProcessRunner, repo.path());
        assert_eq!(git.current_branch().await.unwrap(), "main");
        assert_eq!(git.local_changes().await.unwrap(), 0);

        std::fs::write(repo.path().join("a.txt"), "a").unwrap();
        std::fs::write(repo.path().join("b.txt"), "b").unwrap();
        assert_eq!(git.local_changes().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_branch_creation_and_lookup() {
        let repo = make_git_repo();
        let git = Git::new(&ProcessRunner, repo.path());
        assert!(!git.has_local_branch("feature").await.unwrap());
        git.create_branch("feature").await.unwrap();
        assert!(git.has_local_branch("feature").await.unwrap());
        assert_eq!(git.current_branch().await.unwrap(), "feature");
        git.switch("main").await.unwrap();
        assert_eq!(git.current_branch().await.unwrap(), "main");
    }

    #[tokio::test]
    async fn test_changed_files_against_main() {
        let repo = make_git_repo();
        let git = Git::new(&ProcessRunner, repo.path());
        git.create_branch("feature").await.unwrap();
        std::fs::write(repo.path().join("a.txt"), "a").unwrap();
        git.add_all().await.unwrap();
        git.commit("[feature] add a").await.unwrap();
        assert_eq!(git.changed_files("main").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tags_and_remotes() {
        let repo = make_git_repo();
        let git = Git::new(&ProcessRunner, repo.path());
        assert!(!git.tag_exists("v1.0.0").await.unwrap());
        git.tag("v1.0.0").await.unwrap();
        assert!(git.tag_exists("v1.0.0").await.unwrap());

        assert!(!git.has_remote("acme").await.unwrap());
        git.add_remote("acme", "https://github.com/acme/server.git")
            .await
            .unwrap();
        assert!(git.has_remote("acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_not_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        let git = Git::new(&ProcessRunner, dir.path());
        assert!(git.current_branch().await.is_err());
    }
}
