//! polyrepo - multi-repository pull request and release CLI
//!
//! Keeps the repositories listed in `repositories.json` in step.
//!
//! ## Commands
//!
//! - `init` / `branch` / `sync`: checkouts, remotes and feature branches
//! - `createpull`: open linked pull requests for every changed repository
//! - `syncpull` / `test` / `testorwait`: check out and test a pull request set
//! - `dependencies`: point sibling npm dependencies somewhere else
//! - `release`: version, tag and push every repository
//! - `addon`: stamp the container add-on version
//!
//! Logs go to stderr; stdout only carries `status=...`, `TAG_NAME=...` and
//! similar lines for CI jobs.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use polyrepo_core::{
    trailer, DependencyKind, IssueRef, Orchestrator, ProcessRunner, PullRequestRef, PullText,
    PullTextKind, WorkspaceConfig, DEFAULT_CONFIG_FILE,
};

#[derive(Parser)]
#[command(name = "polyrepo")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Pull requests and releases across a set of GitHub repositories",
    long_about = None
)]
struct Cli {
    /// Repository list
    #[arg(
        short = 'p',
        long,
        global = true,
        env = "POLYREPO_CONFIG",
        default_value = DEFAULT_CONFIG_FILE
    )]
    repositories: PathBuf,

    /// Directory holding the checkouts
    #[arg(long, global = true, env = "POLYREPO_ROOT", default_value = ".")]
    root: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone missing checkouts and configure remotes
    Init {
        /// Also create and switch to this branch
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Create (if needed) and switch to a branch everywhere
    Branch {
        #[arg(short, long)]
        branch: String,
    },

    /// Update main and the current branch from the owner
    Sync,

    /// Check out the pull requests required by a pull request
    Syncpull {
        /// Pull request as <repository>:<number>
        #[arg(short = 'r', long = "pullrequest", alias = "pull-request")]
        pull_request: PullRequestRef,
    },

    /// npm install in every checkout
    Install,

    /// Run npm tests in every checkout
    Test {
        /// Test this pull request set and report on its pull requests
        #[arg(short = 'r', long = "pullrequest", alias = "pull-request")]
        pull_request: Option<PullRequestRef>,
    },

    /// Test if this is the main test pull request, else wait for its result
    Testorwait {
        #[arg(short = 'r', long = "pullrequest", alias = "pull-request")]
        pull_request: PullRequestRef,

        /// Seconds between check-run polls
        #[arg(long, default_value = "30")]
        interval: u64,
    },

    /// Push changed repositories and open linked pull requests
    Createpull {
        /// Issue the pull requests resolve, as <repository>:<number>
        #[arg(short, long)]
        issue: Option<IssueRef>,

        /// Pull request title instead of the one built from commits
        #[arg(long, requires = "text")]
        topic: Option<String>,

        /// Pull request description to go with --topic
        #[arg(long, requires = "topic")]
        text: Option<String>,
    },

    /// Point sibling npm dependencies at another source
    Dependencies {
        #[arg(value_enum)]
        kind: DependencyArg,

        /// Pull request whose required set is referenced (pull only)
        #[arg(short = 'r', long = "pullrequest", alias = "pull-request")]
        pull_request: Option<PullRequestRef>,
    },

    /// Release every repository (owner only)
    Release,

    /// Stamp the add-on version for a development build or a release
    Addon {
        /// Directory holding the component and add-on checkouts (default: --root)
        #[arg(long)]
        basedir: Option<PathBuf>,

        #[arg(long)]
        release: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DependencyArg {
    Local,
    Pull,
    Remote,
    Release,
}

impl From<DependencyArg> for DependencyKind {
    fn from(arg: DependencyArg) -> Self {
        match arg {
            DependencyArg::Local => DependencyKind::Local,
            DependencyArg::Pull => DependencyKind::Pull,
            DependencyArg::Remote => DependencyKind::Remote,
            DependencyArg::Release => DependencyKind::Release,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    polyrepo_core::init_tracing(cli.json, cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn load_config(path: &Path) -> Result<WorkspaceConfig> {
    WorkspaceConfig::load(path)
        .with_context(|| format!("Failed to load repository list {}", path.display()))
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.repositories)?;
    let addon = config.addon.clone();
    let runner = ProcessRunner;
    let mut orch = Orchestrator::connect(&runner, config, cli.root.as_path())
        .await
        .context("Failed to resolve the GitHub login (is gh authenticated?)")?;

    match cli.command {
        Commands::Init { branch } => orch.init(branch.as_deref()).await?,
        Commands::Branch { branch } => orch.branch(&branch).await?,
        Commands::Sync => orch.sync().await?,
        Commands::Syncpull { pull_request } => {
            let prs = orch.syncpull(&pull_request).await?;
            println!("{}", trailer::format(&prs));
        }
        Commands::Install => orch.install().await?,
        Commands::Test { pull_request } => {
            let status = orch.test(pull_request.as_ref()).await?;
            println!("status={}", status.outcome());
        }
        Commands::Testorwait {
            pull_request,
            interval,
        } => {
            let status = orch
                .testorwait(&pull_request, Duration::from_secs(interval))
                .await?;
            println!("status={}", status.outcome());
        }
        Commands::Createpull { issue, topic, text } => {
            if let (Some(topic), Some(text)) = (topic, text) {
                orch.workspace_mut().pull_text =
                    Some(PullText::new(PullTextKind::Feature, topic, text));
            }
            let prs = orch.createpull(issue.as_ref()).await?;
            info!(count = prs.len(), "pull requests ready");
            println!("{}", trailer::format(&prs));
        }
        Commands::Dependencies { kind, pull_request } => {
            orch.dependencies(kind.into(), pull_request.as_ref()).await?
        }
        Commands::Release => {
            let released = orch.release().await?;
            println!("{}", serde_json::to_string_pretty(&released)?);
        }
        Commands::Addon { basedir, release } => {
            let addon = addon.context("No \"addon\" section in the repository list")?;
            let tag = orch.addon(&addon, basedir.as_deref(), release).await?;
            println!("TAG_NAME={tag}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_default() {
        let cli = Cli::try_parse_from(["polyrepo", "sync"]).unwrap();
        assert_eq!(cli.repositories, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(cli.root, PathBuf::from("."));
        assert!(!cli.verbose);
    }

    #[test]
    fn pull_request_argument_is_parsed() {
        let cli = Cli::try_parse_from(["polyrepo", "testorwait", "-r", "server:12"]).unwrap();
        match cli.command {
            Commands::Testorwait {
                pull_request,
                interval,
            } => {
                assert_eq!(pull_request, PullRequestRef::new("server", 12));
                assert_eq!(interval, 30);
            }
            _ => panic!("expected testorwait"),
        }
        assert!(Cli::try_parse_from(["polyrepo", "syncpull", "-r", "server"]).is_err());
    }

    #[test]
    fn long_pull_request_flag_is_pullrequest() {
        let cli = Cli::try_parse_from(["polyrepo", "test", "--pullrequest", "server:1"]).unwrap();
        match cli.command {
            Commands::Test { pull_request } => {
                assert_eq!(pull_request, Some(PullRequestRef::new("server", 1)));
            }
            _ => panic!("expected test"),
        }
        for command in ["syncpull", "testorwait", "dependencies"] {
            let mut args = vec!["polyrepo", command];
            if command == "dependencies" {
                args.push("pull");
            }
            args.extend(["--pullrequest", "a:2"]);
            assert!(Cli::try_parse_from(&args).is_ok(), "{command}");
        }
    }

    #[test]
    fn dependency_kind_maps_to_library_kind() {
        let args = ["polyrepo", "-p", "projects.json", "dependencies", "pull", "-r", "a:1"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.repositories, PathBuf::from("projects.json"));
        match cli.command {
            Commands::Dependencies { kind, pull_request } => {
                assert_eq!(DependencyKind::from(kind), DependencyKind::Pull);
                assert_eq!(pull_request, Some(PullRequestRef::new("a", 1)));
            }
            _ => panic!("expected dependencies"),
        }
        assert!(Cli::try_parse_from(["polyrepo", "dependencies", "nightly"]).is_err());
    }

    #[test]
    fn topic_needs_text() {
        assert!(Cli::try_parse_from(["polyrepo", "createpull", "--topic", "x"]).is_err());
        let args = ["polyrepo", "createpull", "--topic", "x", "--text", "y"];
        assert!(Cli::try_parse_from(args).is_ok());
    }

    #[test]
    fn missing_config_names_the_file() {
        let err = load_config(Path::new("/nonexistent/repositories.json")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/repositories.json"));
    }
}
