//! Append-only run transcript.
//!
//! The diagnostic stream stays short; the transcript gets everything:
//! each external command line, where it ran, its exit code, duration and
//! full output. Write failures after the file is open are ignored so a
//! full disk cannot turn a passing scenario into a failing one.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use installcheck_process::{CommandResult, CommandSpec};

#[derive(Debug)]
pub struct Transcript {
    path: PathBuf,
    file: File,
}

impl Transcript {
    /// Open `path` for appending, creating it and its parent directory.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one timestamped line.
    pub fn line(&mut self, message: &str) {
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let _ = writeln!(self.file, "[{ts}] {message}");
    }

    /// Record a finished command with its captured output.
    pub fn command(&mut self, spec: &CommandSpec, dir: &Path, result: &CommandResult) {
        self.line(&format!("$ {spec}  (in {})", dir.display()));
        write_block(&mut self.file, "stdout", &result.stdout);
        write_block(&mut self.file, "stderr", &result.stderr);
        let status = if result.timed_out {
            "timed out".to_string()
        } else {
            format!("exit code {}", result.exit_code)
        };
        self.line(&format!(
            "{status} after {}",
            humantime::format_duration(result.duration())
        ));
    }

    pub fn flush(&mut self) {
        let _ = self.file.flush();
    }
}

fn write_block(file: &mut File, label: &str, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    let _ = writeln!(file, "--- {label} ---");
    let _ = file.write_all(text.as_bytes());
    if !text.ends_with('\n') {
        let _ = writeln!(file);
    }
}
