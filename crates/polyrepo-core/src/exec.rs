//! Subprocess execution for `git`, `gh` and `npm`.
//!
//! Every external tool call goes through [`CommandRunner`], so workflows can
//! be driven by [`crate::fakes::RecordingRunner`] in tests and by
//! [`ProcessRunner`] for real.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{PolyrepoError, Result};

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name, e.g. `git`.
    pub program: String,

    /// Arguments after the executable.
    pub args: Vec<String>,

    /// Working directory for the child process.
    pub cwd: PathBuf,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program followed by its arguments.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line: Vec<&str> = self.tokens().collect();
        f.write_str(&line.join(" "))
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with exit code 1.
    pub fn failed(stderr: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self {
            code: Some(1),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`PolyrepoError::CommandFailed`].
    pub fn into_result(self, spec: &CommandSpec) -> Result<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(PolyrepoError::CommandFailed {
                command: spec.to_string(),
                cwd: spec.cwd.clone(),
                code: self.code,
                stderr: self.stderr,
                stdout: self.stdout,
            })
        }
    }
}

/// Executes external commands.
///
/// Implement this trait to plug in the real process spawner or a test stub.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output. A non-zero exit is
    /// reported in [`CommandOutput::code`], not as an error.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run a command and return its stdout, failing on a non-zero exit.
    async fn run_checked(&self, spec: &CommandSpec) -> Result<String> {
        self.run(spec).await?.into_result(spec)
    }
}

/// Spawns real child processes with `tokio::process`.
///
/// stderr of the child is echoed line by line to the log stream while the
/// command runs and is also captured for error reporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec, cwd = %spec.cwd.display(), "running command");

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failure(spec, &e))?;

        let stderr_echo = child.stderr.take().map(|stderr| {
            let program = spec.program.clone();
            tokio::spawn(async move {
                let mut collected = String::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "polyrepo::subprocess", program = %program, "{line}");
                    collected.push_str(&line);
                    collected.push('\n');
                }
                collected
            })
        });

        let mut stdout = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_end(&mut stdout).await?;
        }
        let status = child.wait().await?;

        let stderr = match stderr_echo {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        Ok(CommandOutput {
            code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr,
        })
    }
}

fn spawn_failure(spec: &CommandSpec, err: &std::io::Error) -> PolyrepoError {
    PolyrepoError::CommandFailed {
        command: spec.to_string(),
        cwd: spec.cwd.clone(),
        code: None,
        stderr: format!("failed to run {}: {err}", spec.program),
        stdout: String::new(),
    }
}

/// Count non-empty lines, the way `wc -l` is used on porcelain output.
pub fn count_lines(output: &str) -> usize {
    output.lines().filter(|l| !l.trim().is_empty()).count()
}
