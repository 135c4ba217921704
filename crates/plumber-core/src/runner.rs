//! Subprocess execution for `gcloud`, `mvn` and template start scripts
//!
//! Commands are described as a program plus an argument vector and run
//! without a shell. The [`CommandRunner`] trait is the seam tests replace.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Maximum bytes of stdout/stderr kept per stream
const MAX_OUTPUT_BYTES: usize = 256 * 1024;

/// A command to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Shell-like rendering for logs and dry runs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote_for_display)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

fn quote_for_display(part: &str) -> String {
    let needs_quotes = part.is_empty()
        || part
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '^' | '#' | '&' | ';' | '|'));
    if needs_quotes {
        format!("\"{}\"", part.replace('"', "\\\""))
    } else {
        part.to_string()
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into [`Error::CommandFailed`]
    pub fn into_result(self, spec: &CommandSpec) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::CommandFailed {
                command: spec.display(),
                exit_code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Executes commands; implemented by the real process runner and test fakes
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion. A non-zero exit is returned as output,
    /// not as an error; callers decide with [`CommandOutput::into_result`].
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run a command and fail on non-zero exit
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.run(spec).await?.into_result(spec)
    }

    /// Run until a line of output matches `pattern`, then stop the process.
    ///
    /// Used for launchers that never exit on their own (streaming pipelines).
    /// Output from both streams is collected in `stdout`. A match counts as
    /// success; otherwise the real exit code is reported.
    async fn run_until_match(&self, spec: &CommandSpec, _pattern: &Regex) -> Result<CommandOutput> {
        self.run(spec).await
    }
}

/// Runs commands as real child processes with a timeout
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        command
    }

    fn spawn_error(spec: &CommandSpec, e: std::io::Error) -> Error {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!(
                "Executable '{}' (is it installed and on PATH?)",
                spec.program
            ))
        } else {
            Error::Io(e)
        }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(1800))
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec.display(), "Running command");

        let child = Self::command(spec)
            .spawn()
            .map_err(|e| Self::spawn_error(spec, e))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(command = %spec.display(), timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Err(Error::CommandTimeout(spec.display(), self.timeout.as_secs()));
            }
        };

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: truncate_output(String::from_utf8_lossy(&output.stdout).into_owned()),
            stderr: truncate_output(String::from_utf8_lossy(&output.stderr).into_owned()),
        };

        debug!(exit_code = result.exit_code, "Command finished");
        Ok(result)
    }

    async fn run_until_match(&self, spec: &CommandSpec, pattern: &Regex) -> Result<CommandOutput> {
        debug!(command = %spec.display(), pattern = %pattern, "Running command until output matches");

        let mut child = Self::command(spec)
            .spawn()
            .map_err(|e| Self::spawn_error(spec, e))?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(Error::Unexpected("child output pipes missing".to_string()));
        };
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();

        let watch = async {
            let mut collected = String::new();
            let (mut out_done, mut err_done) = (false, false);
            loop {
                let line = tokio::select! {
                    line = out_lines.next_line(), if !out_done => match line? {
                        Some(line) => line,
                        None => {
                            out_done = true;
                            continue;
                        }
                    },
                    line = err_lines.next_line(), if !err_done => match line? {
                        Some(line) => line,
                        None => {
                            err_done = true;
                            continue;
                        }
                    },
                    else => break,
                };
                collected.push_str(&line);
                collected.push('\n');
                if pattern.is_match(&line) {
                    return Ok::<_, std::io::Error>((collected, true));
                }
            }
            Ok((collected, false))
        };

        let (collected, matched) = match tokio::time::timeout(self.timeout, watch).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(command = %spec.display(), timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Err(Error::CommandTimeout(spec.display(), self.timeout.as_secs()));
            }
        };

        let exit_code = if matched {
            // The launcher keeps watching the job; we have what we need
            let _ = child.start_kill();
            0
        } else {
            child.wait().await?.code().unwrap_or(-1)
        };

        Ok(CommandOutput {
            exit_code,
            stdout: truncate_output(collected),
            stderr: String::new(),
        })
    }
}

fn truncate_output(mut text: String) -> String {
    if text.len() > MAX_OUTPUT_BYTES {
        let mut cut = MAX_OUTPUT_BYTES;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n... (output truncated)");
    }
    text
}

/// Test double that records commands and replays canned outputs
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingRunner {
    responses: std::sync::Mutex<Vec<CommandOutput>>,
    calls: std::sync::Mutex<Vec<CommandSpec>>,
}

#[cfg(test)]
impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an output; outputs are returned in push order, then success
    pub fn push_output(&self, output: CommandOutput) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(output);
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls
            .lock()
            .map_err(|_| Error::Unexpected("runner lock poisoned".to_string()))?
            .push(spec.clone());
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| Error::Unexpected("runner lock poisoned".to_string()))?;
        if responses.is_empty() {
            Ok(CommandOutput::default())
        } else {
            Ok(responses.remove(0))
        }
    }
}
