use std::env;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use installcheck::engine::{self, Reporter, RunHooks};
use installcheck::manager::{self, PackageManagerKind};
use installcheck::probe;
use installcheck::receipt::{Receipt, ScenarioState};
use installcheck::scenario;
use installcheck::types::{RunOptions, ScenarioKind};
use installcheck_config::{CliOverrides, Config};

mod progress;

use progress::{ProgressReporter, ProgressSink};

#[derive(Parser, Debug)]
#[command(name = "installcheck", version)]
#[command(about = "Smoke-test that an npm package installs and runs: locally, globally and from source control")]
struct Cli {
    /// Package manager to drive (supported: npm)
    manager: Option<String>,

    /// Scratch directory each scenario creates and removes
    install_dir: Option<PathBuf>,

    /// Append-only log receiving the full output of every command
    log_file: Option<PathBuf>,

    /// Config file (default: ./installcheck.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Package name to install
    #[arg(long, global = true)]
    package: Option<String>,

    /// Registry version or dist-tag (default: latest)
    #[arg(long, global = true)]
    package_version: Option<String>,

    /// Source-control URL for the *-source scenarios
    #[arg(long, global = true)]
    repository: Option<String>,

    /// Branch, tag or commit to install from the repository (default: main)
    #[arg(long, global = true)]
    reference: Option<String>,

    /// Command-line entry point checked after a global install (default: package name)
    #[arg(long, global = true)]
    bin: Option<String>,

    /// Time between heartbeat lines (e.g. 30s, 5m)
    #[arg(long, global = true)]
    heartbeat_interval: Option<String>,

    /// Backoff before the single retry of a failed scenario (e.g. 15s)
    #[arg(long, global = true)]
    retry_delay: Option<String>,

    /// Kill any external command running longer than this (e.g. 30m)
    #[arg(long, global = true)]
    timeout: Option<String>,

    /// Write a JSON receipt of the run to this path
    #[arg(long, global = true)]
    receipt: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every scenario and its steps without running anything.
    Plan {
        /// Package manager to plan for
        #[arg(default_value = "npm")]
        manager: String,
    },
    /// Print the package target and tool versions.
    Doctor,
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

struct CliReporter {
    progress: Option<ProgressReporter>,
    heartbeat: ProgressSink,
}

impl CliReporter {
    fn new() -> Self {
        Self {
            progress: None,
            heartbeat: ProgressSink::default(),
        }
    }

    fn emit(&self, line: &str) {
        match &self.progress {
            Some(p) => p.println(line),
            None => eprintln!("{line}"),
        }
    }

    fn finish(&mut self) {
        self.heartbeat.detach();
        if let Some(p) = self.progress.take() {
            p.finish();
        }
    }
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        self.emit(&format!("[info] {msg}"));
    }

    fn warn(&mut self, msg: &str) {
        self.emit(&format!("[warn] {msg}"));
    }

    fn error(&mut self, msg: &str) {
        self.emit(&format!("[error] {msg}"));
    }

    fn scenario_started(&mut self, index: usize, total: usize, kind: ScenarioKind) {
        let progress = self.progress.get_or_insert_with(|| ProgressReporter::new(total));
        if let Some(bar) = progress.progress_bar() {
            self.heartbeat.attach(bar);
        }
        progress.set_scenario(index, kind);
    }

    fn scenario_finished(&mut self, _kind: ScenarioKind, passed: bool) {
        if let Some(p) = &mut self.progress {
            p.finish_scenario(passed);
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match panic::catch_unwind(AssertUnwindSafe(|| run(cli))) {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            eprintln!("[error] {e:#}");
            ExitCode::FAILURE
        }
        Err(_) => {
            eprintln!("[error] installcheck aborted unexpectedly");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut reporter = CliReporter::new();

    match &cli.cmd {
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(*shell, &mut Cli::command(), "installcheck", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Plan { manager }) => {
            let config = load_config(&cli)?;
            let kind: PackageManagerKind = manager.parse()?;
            config.validate().context("invalid configuration")?;
            print_plan(kind, &config);
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Doctor) => {
            let config = load_config(&cli)?;
            run_doctor(&config, &mut reporter);
            Ok(ExitCode::SUCCESS)
        }
        None => run_install_checks(&cli, &mut reporter),
    }
}

fn run_install_checks(cli: &Cli, reporter: &mut CliReporter) -> Result<ExitCode> {
    let (Some(manager), Some(install_dir), Some(log_file)) =
        (&cli.manager, &cli.install_dir, &cli.log_file)
    else {
        bail!("usage: installcheck <MANAGER> <INSTALL_DIR> <LOG_FILE> (see --help)");
    };

    let opts = RunOptions {
        manager: manager.clone(),
        install_dir: install_dir.clone(),
        log_file: log_file.clone(),
        config: load_config(cli)?,
        receipt_path: cli.receipt.clone(),
    };

    let hooks = RunHooks {
        heartbeat_sink: Arc::new(reporter.heartbeat.clone()),
        ..RunHooks::default()
    };
    let result = engine::run_checks(&opts, hooks, reporter);
    reporter.finish();

    match result {
        Ok(receipt) => {
            print_receipt(&receipt);
            Ok(ExitCode::SUCCESS)
        }
        // Already reported through the reporter.
        Err(_) => Ok(ExitCode::FAILURE),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => {
            let cwd = env::current_dir().context("failed to read current directory")?;
            installcheck_config::load_config(&cwd)?
        }
    };

    config.apply_overrides(CliOverrides {
        package: cli.package.clone(),
        version: cli.package_version.clone(),
        repository: cli.repository.clone(),
        reference: cli.reference.clone(),
        bin: cli.bin.clone(),
        heartbeat_interval: parse_opt_duration(cli.heartbeat_interval.as_deref())?,
        retry_delay: parse_opt_duration(cli.retry_delay.as_deref())?,
        command_timeout: parse_opt_duration(cli.timeout.as_deref())?,
    });
    Ok(config)
}

fn parse_opt_duration(s: Option<&str>) -> Result<Option<Duration>> {
    s.map(parse_duration).transpose()
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

fn print_plan(kind: PackageManagerKind, config: &Config) {
    let tools = &config.tools;
    let manager = manager::manager_for(kind, tools);
    let plans = scenario::build_all(config, manager.as_ref(), &tools.node_program());

    println!("manager: {kind}");
    println!("package: {}", config.package.spec());
    println!("source: {}", config.package.source_spec());
    println!(
        "retry: {} attempt(s), {} backoff",
        installcheck_retry::MAX_ATTEMPTS,
        humantime::format_duration(config.retry.delay)
    );
    println!(
        "heartbeat: every {}",
        humantime::format_duration(config.heartbeat.interval)
    );

    let total = plans.len();
    for (idx, plan) in plans.iter().enumerate() {
        println!();
        println!("[{}/{total}] {} ({})", idx + 1, plan.kind.title(), plan.kind);
        for step in &plan.steps {
            println!("  {:<8} {step}", step.phase.name());
        }
    }
}

fn run_doctor(config: &Config, reporter: &mut dyn Reporter) {
    println!("package: {}", config.package.spec());
    println!("source: {}", config.package.source_spec());

    let cwd = PathBuf::from(".");
    let npm = config.tools.npm_program();
    let node = config.tools.node_program();
    print_tool_version("npm", &npm, &cwd, reporter);
    print_tool_version("node", &node, &cwd, reporter);
    print_tool_version("git", "git", &cwd, reporter);

    match probe::detect_node_version(&node, &cwd, config.tools.timeout) {
        Ok(version) => {
            let min = config.probe.esm_min_node;
            let supported = probe::supports_esm(&version, min);
            println!("es_module_probes: {} (node {version}, requires >= {min})", yes_no(supported));
        }
        Err(e) => reporter.warn(&format!("cannot determine node version: {e:#}")),
    }

    if let Err(e) = config.validate() {
        reporter.warn(&format!("configuration is incomplete: {e:#}"));
    }
}

fn print_tool_version(label: &str, program: &str, dir: &Path, reporter: &mut dyn Reporter) {
    match installcheck_process::tool_version(program, dir) {
        Ok(version) => println!("{label}: {version}"),
        Err(e) => reporter.warn(&format!("unable to run {program} --version: {e:#}")),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn print_receipt(receipt: &Receipt) {
    println!("manager: {}", receipt.manager);
    println!("package: {}", receipt.package);
    println!("source: {}", receipt.source);
    println!();

    for s in &receipt.scenarios {
        let state = match &s.state {
            ScenarioState::Passed => "passed".to_string(),
            ScenarioState::Failed { phase, .. } => format!("failed ({})", phase.failure_reason()),
            ScenarioState::NotRun => "not run".to_string(),
        };
        println!(
            "{}: {state} (attempts={}, {}ms)",
            s.scenario, s.attempts, s.duration_ms
        );
    }
}
