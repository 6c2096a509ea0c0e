//! In-memory fake [`CommandRunner`] for tests.
//!
//! [`RecordingRunner`] never spawns anything: it records each command and
//! answers from a list of scripted rules. Commands that match no rule succeed
//! with empty output.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};

#[derive(Debug, Clone)]
enum Matcher {
    /// Leading whitespace-separated tokens.
    Prefix(Vec<String>),
    /// Substring of the rendered command line.
    Contains(String),
}

#[derive(Debug, Clone)]
struct Rule {
    matcher: Matcher,
    dir: Option<String>,
    output: CommandOutput,
    once: bool,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        if let Some(dir) = &self.dir {
            if !spec.cwd.ends_with(Path::new(dir)) {
                return false;
            }
        }
        match &self.matcher {
            Matcher::Prefix(prefix) => {
                let tokens: Vec<&str> = spec.tokens().collect();
                tokens.len() >= prefix.len()
                    && prefix.iter().zip(tokens.iter()).all(|(want, got)| want == got)
            }
            Matcher::Contains(fragment) => spec.to_string().contains(fragment.as_str()),
        }
    }
}

/// Scripted command runner that records every invocation.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, dir: Option<&str>, prefix: &str, output: CommandOutput, once: bool) {
        let matcher = Matcher::Prefix(prefix.split_whitespace().map(str::to_string).collect());
        self.push_rule(dir, matcher, output, once);
    }

    fn push_rule(&self, dir: Option<&str>, matcher: Matcher, output: CommandOutput, once: bool) {
        self.rules.lock().unwrap().push(Rule {
            matcher,
            dir: dir.map(str::to_string),
            output,
            once,
        });
    }

    /// Answer every command starting with `prefix` (whitespace-separated
    /// tokens) with `output`. Earlier rules win.
    pub fn on(&self, prefix: &str, output: CommandOutput) -> &Self {
        self.push(None, prefix, output, false);
        self
    }

    /// Like [`Self::on`], but only for commands whose working directory ends
    /// with `dir`.
    pub fn on_in(&self, dir: &str, prefix: &str, output: CommandOutput) -> &Self {
        self.push(Some(dir), prefix, output, false);
        self
    }

    /// Answer every command whose command line contains `fragment`, e.g. a
    /// `gh api` URL.
    pub fn on_match(&self, fragment: &str, output: CommandOutput) -> &Self {
        self.push_rule(None, Matcher::Contains(fragment.to_string()), output, false);
        self
    }

    /// Answer the next matching command only; the rule is consumed.
    pub fn once(&self, prefix: &str, output: CommandOutput) -> &Self {
        self.push(None, prefix, output, true);
        self
    }

    /// All recorded commands, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded commands rendered as command lines.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    /// Recorded command lines that start with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.command_lines()
            .into_iter()
            .filter(|line| line.starts_with(prefix))
            .collect()
    }

    /// Whether any recorded command line starts with `prefix`.
    pub fn ran(&self, prefix: &str) -> bool {
        !self.matching(prefix).is_empty()
    }

    /// Whether a command starting with `prefix` ran in a directory ending with `dir`.
    pub fn ran_in(&self, dir: &str, prefix: &str) -> bool {
        self.calls()
            .iter()
            .any(|c| c.cwd.ends_with(Path::new(dir)) && c.to_string().starts_with(prefix))
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());

        let mut rules = self.rules.lock().unwrap();
        let Some(idx) = rules.iter().position(|r| r.matches(spec)) else {
            return Ok(CommandOutput::ok(""));
        };
        let output = rules[idx].output.clone();
        if rules[idx].once {
            rules.remove(idx);
        }
        Ok(output)
    }
}
