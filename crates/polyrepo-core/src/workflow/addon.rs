//! Version stamping for a container add-on built from one component
//! repository.
//!
//! Development builds stamp `<version>-pr<n>` (the last merged pull request
//! of the component) into the latest add-on directory. Releases mirror that
//! directory into the release directory and stamp the plain version, the
//! image, the slug and the component's release tag.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use npm_manifest::{version_tag, PackageManifest};
use regex::{NoExpand, Regex};
use tracing::info;

use super::{Context, Orchestrator};
use crate::config::AddonConfig;
use crate::error::{PolyrepoError, Result};
use crate::exec::CommandSpec;
use crate::git::Git;
use crate::obs::emit_ignored_failure;

pub const CONFIG_YAML: &str = "config.yaml";
pub const DOCKERFILE: &str = "Dockerfile";

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"version: v[0-9.][^\n]*").expect("version pattern is valid"))
}

fn slug_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"slug:[^\n]*").expect("slug pattern is valid"))
}

/// Replace every `version: v...` line.
pub fn stamp_version(content: &str, replacement: &str) -> String {
    version_re()
        .replace_all(content, NoExpand(replacement))
        .into_owned()
}

/// Replace every `slug:` line.
pub fn stamp_slug(content: &str, slug: &str) -> String {
    slug_re()
        .replace_all(content, NoExpand(&format!("slug: {slug}")))
        .into_owned()
}

/// Point every `github:<owner>/<component>...` reference at `#<tag>`.
pub fn stamp_component_reference(content: &str, reference: &str, tag: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        match line.find(reference) {
            Some(start) => {
                let ending = if line.ends_with('\n') { "\n" } else { "" };
                out.push_str(&line[..start]);
                out.push_str(&format!("{reference}#{tag}"));
                out.push_str(ending);
            }
            None => out.push_str(line),
        }
    }
    out
}

fn rewrite(path: &Path, edit: impl FnOnce(&str) -> String) -> Result<()> {
    let content = std::fs::read_to_string(path).map_err(|e| PolyrepoError::Config {
        path: path.to_path_buf(),
        detail: format!("cannot read add-on file: {e}"),
    })?;
    std::fs::write(path, edit(&content))?;
    info!(path = %path.display(), "stamped");
    Ok(())
}

async fn remove_tag(ctx: &Context<'_>, repo_dir: &Path, tag: &str) {
    let repo = repo_dir.display().to_string();
    let git = Git::new(ctx.runner, repo_dir);
    if let Err(e) = git.delete_remote_tag("origin", tag).await {
        emit_ignored_failure("addon", &repo, &e);
    }
    if let Err(e) = git.delete_tag(tag).await {
        emit_ignored_failure("addon", &repo, &e);
    }
}

impl Orchestrator<'_> {
    /// Stamp the add-on and return its tag (`v<version>`).
    ///
    /// `basedir` holds the component and add-on checkouts; it defaults to
    /// the workspace root.
    pub async fn addon(
        &self,
        addon: &AddonConfig,
        basedir: Option<&Path>,
        release: bool,
    ) -> Result<String> {
        let basedir: PathBuf = basedir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.ctx.root.clone());
        let addon_repo = basedir.join(&addon.repository);
        let version = PackageManifest::read_dir(&basedir.join(&addon.component))?
            .version()?
            .to_string();

        if !release {
            let number = self
                .ctx
                .github
                .latest_closed_pull(&basedir.join(&addon.component))
                .await?
                .ok_or_else(|| PolyrepoError::UnexpectedResponse {
                    command: "gh pr list -s closed".into(),
                    detail: format!("no closed pull request in {}", addon.component),
                })?;
            let version = format!("{version}-pr{number}");
            let dir = addon_repo.join(&addon.latest_dir);
            let line = format!("version: v{version}");
            rewrite(&dir.join(CONFIG_YAML), |c| stamp_version(c, &line))?;
            rewrite(&dir.join(DOCKERFILE), |c| stamp_version(c, &line))?;
            return Ok(version_tag(&version));
        }

        let latest = addon_repo.join(&addon.latest_dir);
        let target = addon_repo.join(&addon.release_dir);
        let rsync = CommandSpec::new("rsync", &basedir).args([
            "-avh".to_string(),
            format!("{}/", latest.display()),
            format!("{}/", target.display()),
            "--delete".to_string(),
        ]);
        self.ctx.runner.run_checked(&rsync).await?;

        let tag = version_tag(&version);
        remove_tag(&self.ctx, &addon_repo, &tag).await;

        let mut line = format!("version: v{version}\nimage: {}:{version}", addon.image);
        if let Some(maintainer) = &addon.maintainer {
            line.push('\n');
            line.push_str(maintainer);
        }
        rewrite(&target.join(CONFIG_YAML), |c| {
            stamp_slug(&stamp_version(c, &line), &addon.slug)
        })?;
        let reference = format!("github:{}/{}", self.ctx.owner, addon.component);
        rewrite(&target.join(DOCKERFILE), |c| {
            stamp_component_reference(c, &reference, &tag)
        })?;
        Ok(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::fakes::RecordingRunner;
    use crate::model::Workspace;

    fn addon_config() -> AddonConfig {
        AddonConfig {
            repository: "addon-repository".into(),
            component: "server".into(),
            latest_dir: "acme.latest".into(),
            release_dir: "acme".into(),
            slug: "acme".into(),
            image: "acme/acme-{arch}".into(),
            maintainer: Some("codenotary: ops@example.com".into()),
        }
    }

    fn layout(root: &Path, dir: &str) {
        let server = root.join("server");
        std::fs::create_dir_all(&server).unwrap();
        std::fs::write(server.join("package.json"), r#"{ "version": "0.9.1" }"#).unwrap();
        let addon = root.join("addon-repository").join(dir);
        std::fs::create_dir_all(&addon).unwrap();
        std::fs::write(
            addon.join(CONFIG_YAML),
            "name: Acme\nversion: v0.0.1-pr1\nslug: acme-latest\n",
        )
        .unwrap();
        std::fs::write(
            addon.join(DOCKERFILE),
            "# version: v0.0.1-pr1\nRUN npm install github:acme/server#main --omit=dev\n",
        )
        .unwrap();
    }

    #[test]
    fn version_stamp_keeps_other_lines() {
        let out = stamp_version("a: 1\nversion: v1.0.0\nb: 2\n", "version: v2.0.0");
        assert_eq!(out, "a: 1\nversion: v2.0.0\nb: 2\n");
    }

    #[test]
    fn component_reference_is_pinned() {
        let out = stamp_component_reference(
            "RUN npm install github:acme/server#main --omit=dev\nRUN true\n",
            "github:acme/server",
            "v1.0.0",
        );
        assert_eq!(out, "RUN npm install github:acme/server#v1.0.0\nRUN true\n");
    }

    #[tokio::test]
    async fn test_development_stamp_uses_last_closed_pull() {
        let root = tempfile::tempdir().unwrap();
        layout(root.path(), "acme.latest");
        let runner = RecordingRunner::new();
        runner.on("gh pr list", CommandOutput::ok(r#"[{"number":17}]"#));
        let orch = Orchestrator::new(&runner, Workspace::new("acme", "acme", &[]), root.path());
        let tag = orch.addon(&addon_config(), None, false).await.unwrap();
        assert_eq!(tag, "v0.9.1-pr17");
        let config = std::fs::read_to_string(
            root.path().join("addon-repository/acme.latest").join(CONFIG_YAML),
        )
        .unwrap();
        assert!(config.contains("version: v0.9.1-pr17\n"));
        assert!(runner.ran_in("server", "gh pr list -s closed"));
    }

    #[tokio::test]
    async fn test_release_stamp() {
        let root = tempfile::tempdir().unwrap();
        layout(root.path(), "acme");
        let runner = RecordingRunner::new();
        runner.on("git push --delete", CommandOutput::failed("remote ref does not exist", ""));
        let orch = Orchestrator::new(&runner, Workspace::new("acme", "acme", &[]), root.path());
        let tag = orch.addon(&addon_config(), None, true).await.unwrap();
        assert_eq!(tag, "v0.9.1");
        assert!(runner.ran("rsync -avh"));
        assert!(runner.ran_in("addon-repository", "git tag -d v0.9.1"));

        let dir = root.path().join("addon-repository/acme");
        let config = std::fs::read_to_string(dir.join(CONFIG_YAML)).unwrap();
        assert_eq!(
            config,
            "name: Acme\nversion: v0.9.1\nimage: acme/acme-{arch}:0.9.1\ncodenotary: ops@example.com\nslug: acme\n"
        );
        let docker = std::fs::read_to_string(dir.join(DOCKERFILE)).unwrap();
        assert!(docker.contains("RUN npm install github:acme/server#v0.9.1\n"));
    }
}
