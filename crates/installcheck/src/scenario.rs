//! Scenario plans and the step runner.
//!
//! Local and global scenarios share one shape: a [`ScenarioPlan`] is an
//! ordered list of [`Step`]s, each tagged with the [`Phase`] that names its
//! failure. The plan is pure data so it can be printed without running
//! anything; [`run_scenario`] executes it against a [`RunContext`].

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use installcheck_config::Config;
use installcheck_process::{CommandResult, CommandSpec, run_command_in_dir};

use crate::error::{FailureCause, ScenarioError};
use crate::manager::PackageManager;
use crate::probe::{self, MANIFEST_FILE};
use crate::transcript::Transcript;
use crate::types::{Phase, ScenarioKind};

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Start from an empty working directory.
    CreateDir,
    WriteFile { name: String, contents: String },
    /// Run a command inside the working directory.
    Run { command: CommandSpec, esm_only: bool },
    /// Run the globally installed command-line entry point.
    RunBin { bin: String, args: Vec<String> },
    RemoveDir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub phase: Phase,
    pub action: StepAction,
}

impl Step {
    fn new(phase: Phase, action: StepAction) -> Self {
        Self { phase, action }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            StepAction::CreateDir => write!(f, "create working directory"),
            StepAction::WriteFile { name, .. } => write!(f, "write {name}"),
            StepAction::Run { command, esm_only } => {
                write!(f, "{command}")?;
                if *esm_only {
                    write!(f, "  (ES modules only)")?;
                }
                Ok(())
            }
            StepAction::RunBin { bin, args } => {
                write!(f, "{}", CommandSpec::new(bin.as_str(), args.iter().map(String::as_str)))
            }
            StepAction::RemoveDir => write!(f, "remove working directory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioPlan {
    pub kind: ScenarioKind,
    /// Install target handed to the package manager
    pub target: String,
    pub steps: Vec<Step>,
}

/// Build the plan for one scenario.
pub fn build_plan(
    kind: ScenarioKind,
    config: &Config,
    manager: &dyn PackageManager,
    node: &str,
) -> ScenarioPlan {
    let target = if kind.from_source() {
        config.package.source_spec()
    } else {
        config.package.spec()
    };

    let mut steps = vec![Step::new(Phase::Setup, StepAction::CreateDir)];

    if kind.is_global() {
        steps.push(Step::new(
            Phase::Install,
            StepAction::Run {
                command: manager.install_global(&target),
                esm_only: false,
            },
        ));
        steps.push(Step::new(
            Phase::Install,
            StepAction::Run {
                command: manager.list_global(),
                esm_only: false,
            },
        ));
        steps.push(Step::new(
            Phase::Test,
            StepAction::RunBin {
                bin: config.package.bin_name().to_string(),
                args: vec!["--help".to_string()],
            },
        ));
        steps.push(Step::new(
            Phase::Cleanup,
            StepAction::Run {
                command: manager.uninstall_global(config.package.name()),
                esm_only: false,
            },
        ));
        steps.push(Step::new(
            Phase::Cleanup,
            StepAction::Run {
                command: manager.list_global(),
                esm_only: false,
            },
        ));
    } else {
        let probes = probe::probe_programs(config);

        steps.push(Step::new(
            Phase::Setup,
            StepAction::WriteFile {
                name: MANIFEST_FILE.to_string(),
                contents: probe::manifest_json(),
            },
        ));
        for p in &probes {
            steps.push(Step::new(
                Phase::Setup,
                StepAction::WriteFile {
                    name: p.file_name.clone(),
                    contents: p.source.clone(),
                },
            ));
        }
        steps.push(Step::new(
            Phase::Install,
            StepAction::Run {
                command: manager.install_local(&target),
                esm_only: false,
            },
        ));
        for p in &probes {
            steps.push(Step::new(
                Phase::Test,
                StepAction::Run {
                    command: CommandSpec::new(node, [p.file_name.as_str()]),
                    esm_only: p.requires_esm(),
                },
            ));
        }
    }

    steps.push(Step::new(Phase::Cleanup, StepAction::RemoveDir));

    ScenarioPlan {
        kind,
        target,
        steps,
    }
}

/// Plans for every scenario, in execution order.
pub fn build_all(config: &Config, manager: &dyn PackageManager, node: &str) -> Vec<ScenarioPlan> {
    ScenarioKind::all()
        .into_iter()
        .map(|kind| build_plan(kind, config, manager, node))
        .collect()
}

/// State shared by every step of a run.
pub struct RunContext<'a> {
    pub work_dir: PathBuf,
    pub manager: &'a dyn PackageManager,
    /// Whether the ES-module probe steps run
    pub esm_enabled: bool,
    pub timeout: Option<Duration>,
    pub transcript: &'a mut Transcript,
}

/// Execute every step of `plan`, stopping at the first failure.
///
/// A failed attempt removes the working directory best-effort so the next
/// attempt, or the next scenario, starts clean.
pub fn run_scenario(plan: &ScenarioPlan, ctx: &mut RunContext<'_>) -> Result<(), ScenarioError> {
    ctx.transcript.line(&format!(
        "== {} ({}) target {}",
        plan.kind.title(),
        plan.kind,
        plan.target
    ));

    for step in &plan.steps {
        if let Err(cause) = run_step(step, ctx) {
            let err = ScenarioError::new(plan.kind, step.phase, cause);
            ctx.transcript.line(&format!("!! {err}"));
            if step.action != StepAction::RemoveDir {
                remove_dir_best_effort(&ctx.work_dir, ctx.transcript);
            }
            ctx.transcript.flush();
            return Err(err);
        }
    }

    ctx.transcript.line(&format!("== {} passed", plan.kind));
    ctx.transcript.flush();
    Ok(())
}

fn run_step(step: &Step, ctx: &mut RunContext<'_>) -> Result<(), FailureCause> {
    match &step.action {
        StepAction::CreateDir => {
            if ctx.work_dir.exists() {
                fs::remove_dir_all(&ctx.work_dir).map_err(|source| {
                    io_failure("failed to clear working directory", &ctx.work_dir, source)
                })?;
            }
            fs::create_dir_all(&ctx.work_dir).map_err(|source| {
                io_failure("failed to create working directory", &ctx.work_dir, source)
            })?;
            ctx.transcript
                .line(&format!("created {}", ctx.work_dir.display()));
            Ok(())
        }
        StepAction::WriteFile { name, contents } => {
            let path = ctx.work_dir.join(name);
            fs::write(&path, contents)
                .map_err(|source| io_failure("failed to write", &path, source))?;
            ctx.transcript.line(&format!("wrote {}", path.display()));
            Ok(())
        }
        StepAction::Run { command, esm_only } => {
            if *esm_only && !ctx.esm_enabled {
                ctx.transcript
                    .line(&format!("skipped {command} (runtime lacks ES module support)"));
                return Ok(());
            }
            execute(command, ctx)
        }
        StepAction::RunBin { bin, args } => {
            let program = resolve_global_bin(bin, ctx)?;
            let command = CommandSpec::new(program.to_string_lossy(), args.iter().map(String::as_str));
            execute(&command, ctx)
        }
        StepAction::RemoveDir => {
            fs::remove_dir_all(&ctx.work_dir).map_err(|source| {
                io_failure("failed to remove working directory", &ctx.work_dir, source)
            })?;
            ctx.transcript
                .line(&format!("removed {}", ctx.work_dir.display()));
            Ok(())
        }
    }
}

fn execute(command: &CommandSpec, ctx: &mut RunContext<'_>) -> Result<(), FailureCause> {
    let result = run_captured(command, ctx)?;
    if result.success {
        Ok(())
    } else {
        Err(FailureCause::CommandFailed {
            command: command.display_line(),
            exit_code: result.exit_code,
            timed_out: result.timed_out,
            stderr: result.stderr,
        })
    }
}

fn run_captured(command: &CommandSpec, ctx: &mut RunContext<'_>) -> Result<CommandResult, FailureCause> {
    match run_command_in_dir(command, &ctx.work_dir, ctx.timeout) {
        Ok(result) => {
            ctx.transcript.command(command, &ctx.work_dir, &result);
            Ok(result)
        }
        Err(e) => {
            ctx.transcript.line(&format!("$ {command}  (failed to start: {e:#})"));
            Err(FailureCause::Spawn {
                command: command.display_line(),
                message: format!("{e:#}"),
            })
        }
    }
}

/// The manager's global `bin` directory wins over `PATH`, so a stale copy
/// elsewhere on `PATH` is never mistaken for the fresh install.
fn resolve_global_bin(bin: &str, ctx: &mut RunContext<'_>) -> Result<PathBuf, FailureCause> {
    let prefix_cmd = ctx.manager.global_prefix();
    let prefix = run_captured(&prefix_cmd, ctx)?;
    if prefix.success {
        let prefix_dir = PathBuf::from(prefix.stdout.trim());
        if let Some(found) = global_bin_candidates(&prefix_dir, bin)
            .into_iter()
            .find(|p| p.is_file())
        {
            return Ok(found);
        }
    }

    installcheck_process::which(bin).ok_or_else(|| FailureCause::MissingBin {
        bin: bin.to_string(),
    })
}

fn global_bin_candidates(prefix: &Path, bin: &str) -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![prefix.join(format!("{bin}.cmd")), prefix.join(bin)]
    } else {
        vec![prefix.join("bin").join(bin)]
    }
}

fn remove_dir_best_effort(dir: &Path, transcript: &mut Transcript) {
    if !dir.exists() {
        return;
    }
    match fs::remove_dir_all(dir) {
        Ok(()) => transcript.line(&format!("removed {} after failure", dir.display())),
        Err(e) => transcript.line(&format!("could not remove {}: {e}", dir.display())),
    }
}

fn io_failure(what: &str, path: &Path, source: io::Error) -> FailureCause {
    FailureCause::Io {
        context: format!("{what} {}", path.display()),
        source,
    }
}
