//! Package-manager command construction.
//!
//! The orchestrator never talks to a registry itself. It only needs the
//! command lines for a handful of operations, and the exit status of each
//! is the whole contract.

use std::fmt;
use std::str::FromStr;

use installcheck_config::ToolsConfig;
use installcheck_process::CommandSpec;

use crate::error::UnsupportedManager;

/// Selectors accepted on the command line.
pub const SUPPORTED_MANAGERS: &[&str] = &["npm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageManagerKind {
    #[default]
    Npm,
}

impl PackageManagerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManagerKind::Npm => "npm",
        }
    }
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageManagerKind {
    type Err = UnsupportedManager;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "npm" => Ok(PackageManagerKind::Npm),
            other => Err(UnsupportedManager(other.to_string())),
        }
    }
}

/// Command lines for the operations a scenario performs.
pub trait PackageManager {
    fn kind(&self) -> PackageManagerKind;

    /// Install `target` into the working directory's `node_modules`.
    fn install_local(&self, target: &str) -> CommandSpec;

    fn install_global(&self, target: &str) -> CommandSpec;

    /// Top-level listing of globally installed packages.
    fn list_global(&self) -> CommandSpec;

    fn uninstall_global(&self, name: &str) -> CommandSpec;

    /// Prints the global installation prefix on stdout.
    fn global_prefix(&self) -> CommandSpec;
}

#[derive(Debug, Clone)]
pub struct Npm {
    program: String,
}

impl Npm {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command<const N: usize>(&self, args: [&str; N]) -> CommandSpec {
        CommandSpec::new(self.program.as_str(), args)
    }
}

impl PackageManager for Npm {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Npm
    }

    fn install_local(&self, target: &str) -> CommandSpec {
        self.command(["install", target])
    }

    fn install_global(&self, target: &str) -> CommandSpec {
        self.command(["install", "--global", target])
    }

    fn list_global(&self) -> CommandSpec {
        self.command(["ls", "--global", "--depth=0"])
    }

    fn uninstall_global(&self, name: &str) -> CommandSpec {
        self.command(["uninstall", "--global", name])
    }

    fn global_prefix(&self) -> CommandSpec {
        self.command(["prefix", "--global"])
    }
}

/// Build the manager for `kind`, honoring tool overrides.
pub fn manager_for(kind: PackageManagerKind, tools: &ToolsConfig) -> Box<dyn PackageManager> {
    match kind {
        PackageManagerKind::Npm => Box::new(Npm::new(tools.npm_program())),
    }
}
