//! External command execution for installcheck.
//!
//! Every package-manager call, probe program and CLI smoke check goes
//! through [`run_command_in_dir`]. Output is captured in full so it can be
//! copied into the run transcript; only the exit status decides success.
//!
//! # Example
//!
//! ```ignore
//! use installcheck_process::{CommandSpec, run_command_in_dir};
//! use std::path::Path;
//!
//! let spec = CommandSpec::new("npm", ["--version"]);
//! let result = run_command_in_dir(&spec, Path::new("."), None).expect("run");
//! assert!(result.success);
//! ```

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Exit code reported when a process was killed or terminated by a signal.
pub const NO_EXIT_CODE: i32 = -1;

/// A program plus its arguments, independent of where it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<P, I, S>(program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Shell-like rendering for logs. Arguments containing whitespace are quoted.
    pub fn display_line(&self) -> String {
        let mut line = quote_arg(&self.program);
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote_arg(arg));
        }
        line
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_line())
    }
}

fn quote_arg(arg: &str) -> String {
    if arg.is_empty() || arg.chars().any(char::is_whitespace) {
        format!("'{}'", arg.replace('\'', "'\\''"))
    } else {
        arg.to_string()
    }
}

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Whether the command succeeded (exit code 0)
    pub success: bool,
    /// Exit code, or [`NO_EXIT_CODE`] when the process had none
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Whether the command was killed after exceeding its timeout
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl CommandResult {
    /// Turn a non-zero exit into an error carrying stderr.
    pub fn ok(&self) -> Result<&Self> {
        if self.success {
            Ok(self)
        } else {
            Err(anyhow::anyhow!(
                "command failed with exit code {}: {}",
                self.exit_code,
                self.stderr.trim()
            ))
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Run `spec` in `dir` and capture its output.
///
/// With a timeout the child is polled and killed once the deadline passes;
/// the result then reports `timed_out` and a failed status. An `Err` is
/// returned only when the process could not be started at all.
pub fn run_command_in_dir(
    spec: &CommandSpec,
    dir: &Path,
    timeout: Option<Duration>,
) -> Result<CommandResult> {
    let start = Instant::now();
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = command
        .spawn()
        .with_context(|| format!("failed to run command: {spec} in {}", dir.display()))?;

    let (exit_code, stdout, mut stderr, timed_out) = match timeout {
        Some(limit) => wait_with_deadline(child, limit)?,
        None => {
            let output = child
                .wait_with_output()
                .with_context(|| format!("failed to wait for command: {spec}"))?;
            (
                output.status.code().unwrap_or(NO_EXIT_CODE),
                String::from_utf8_lossy(&output.stdout).to_string(),
                String::from_utf8_lossy(&output.stderr).to_string(),
                false,
            )
        }
    };

    if timed_out && let Some(limit) = timeout {
        stderr.push_str(&format!(
            "\ncommand timed out after {}",
            humantime::format_duration(limit)
        ));
    }

    Ok(CommandResult {
        success: exit_code == 0 && !timed_out,
        exit_code,
        stdout,
        stderr,
        timed_out,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

fn wait_with_deadline(mut child: Child, limit: Duration) -> Result<(i32, String, String, bool)> {
    // Drain pipes on helper threads so a chatty child cannot block on a full pipe.
    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + limit;
    let (exit_code, timed_out) = loop {
        match child.try_wait().context("failed to poll command")? {
            Some(status) => break (status.code().unwrap_or(NO_EXIT_CODE), false),
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                break (NO_EXIT_CODE, true);
            }
            None => thread::sleep(Duration::from_millis(50)),
        }
    };

    let stdout = stdout_reader.map(join_reader).unwrap_or_default();
    let stderr = stderr_reader.map(join_reader).unwrap_or_default();
    Ok((exit_code, stdout, stderr, timed_out))
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: thread::JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).to_string()
}

/// Check if a command exists in PATH
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Get the full path to a command
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// Run `<program> --version` and return the first line of stdout.
pub fn tool_version(program: &str, dir: &Path) -> Result<String> {
    let spec = CommandSpec::new(program, ["--version"]);
    let result = run_command_in_dir(&spec, dir, Some(Duration::from_secs(30)))?;
    result
        .ok()
        .with_context(|| format!("{program} --version failed"))?;
    Ok(result.stdout.lines().next().unwrap_or_default().trim().to_string())
}
