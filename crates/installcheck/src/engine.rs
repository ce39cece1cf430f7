use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use installcheck_heartbeat::{Heartbeat, HeartbeatSink, StderrSink};
use installcheck_retry::RetryExecutor;

use crate::error::DriverError;
use crate::manager::{self, PackageManagerKind};
use crate::probe;
use crate::receipt::{self, Receipt, ScenarioState};
use crate::scenario::{self, RunContext};
use crate::transcript::Transcript;
use crate::types::{RunOptions, ScenarioKind};

pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);

    /// A scenario is about to start its first attempt. `index` is 1-based.
    fn scenario_started(&mut self, _index: usize, _total: usize, _kind: ScenarioKind) {}

    fn scenario_finished(&mut self, _kind: ScenarioKind, _passed: bool) {}
}

/// Seams for the parts of a run that touch time and the terminal.
#[derive(Clone)]
pub struct RunHooks {
    pub heartbeat_sink: Arc<dyn HeartbeatSink>,
    /// Replaces `thread::sleep` between retry attempts
    pub sleep: Option<Arc<dyn Fn(Duration) + Send + Sync>>,
}

impl Default for RunHooks {
    fn default() -> Self {
        Self {
            heartbeat_sink: Arc::new(StderrSink),
            sleep: None,
        }
    }
}

/// Run every scenario in order with the heartbeat alive for the whole run.
///
/// The heartbeat is stopped before this returns on every path; if a step
/// panics, dropping the handle during unwinding stops it as well. When a
/// receipt path is configured the receipt is written on success and
/// failure alike. Any error is passed to `reporter` before it is returned.
pub fn run_checks(
    opts: &RunOptions,
    hooks: RunHooks,
    reporter: &mut dyn Reporter,
) -> Result<Receipt, DriverError> {
    let result = run_with_heartbeat(opts, hooks, reporter);
    if let Err(e) = &result {
        reporter.error(&e.to_string());
    }
    result
}

fn run_with_heartbeat(
    opts: &RunOptions,
    hooks: RunHooks,
    reporter: &mut dyn Reporter,
) -> Result<Receipt, DriverError> {
    let config = &opts.config;
    let mut receipt = Receipt::pending(
        &opts.manager,
        config.package.spec(),
        config.package.source_spec(),
    );

    let mut heartbeat = Heartbeat::start(config.heartbeat.interval, hooks.heartbeat_sink)
        .map_err(DriverError::Heartbeat)?;

    let outcome = drive(opts, hooks.sleep, reporter, &mut receipt);

    heartbeat.stop();
    receipt.finish();

    if let Some(path) = &opts.receipt_path {
        match receipt::write_receipt(path, &receipt) {
            Ok(()) => reporter.info(&format!("receipt written to {}", path.display())),
            Err(e) if outcome.is_ok() => return Err(DriverError::Receipt(e)),
            Err(e) => reporter.warn(&format!("failed to write receipt: {e:#}")),
        }
    }

    outcome?;
    reporter.info(&format!(
        "all {} scenarios passed in {}",
        receipt.scenarios.len(),
        format_elapsed(&receipt)
    ));
    Ok(receipt)
}

fn drive(
    opts: &RunOptions,
    sleep: Option<Arc<dyn Fn(Duration) + Send + Sync>>,
    reporter: &mut dyn Reporter,
    receipt: &mut Receipt,
) -> Result<(), DriverError> {
    let config = &opts.config;

    let kind: PackageManagerKind = opts.manager.parse()?;
    config.validate().map_err(DriverError::Config)?;

    let mut transcript = Transcript::open(&opts.log_file).map_err(|cause| DriverError::LogFile {
        path: opts.log_file.clone(),
        cause,
    })?;
    transcript.line(&format!(
        "installcheck run: manager={kind} package={} source={}",
        config.package.spec(),
        config.package.source_spec()
    ));

    let manager = manager::manager_for(kind, &config.tools);
    let node = config.tools.node_program();
    let esm_enabled = detect_esm(
        &node,
        config.probe.esm_min_node,
        config.tools.timeout,
        reporter,
        &mut transcript,
    );

    let mut executor = RetryExecutor::new(config.retry.delay);
    if let Some(sleep) = sleep {
        executor = executor.with_shared_sleep(sleep);
    }

    let plans = scenario::build_all(config, manager.as_ref(), &node);
    let total = plans.len();
    reporter.info(&format!(
        "checking {} with {kind} ({total} scenarios, heartbeat every {})",
        config.package.spec(),
        humantime::format_duration(config.heartbeat.interval)
    ));

    let mut ctx = RunContext {
        work_dir: opts.install_dir.clone(),
        manager: manager.as_ref(),
        esm_enabled,
        timeout: config.tools.timeout,
        transcript: &mut transcript,
    };

    for (idx, plan) in plans.iter().enumerate() {
        reporter.scenario_started(idx + 1, total, plan.kind);
        let started = Instant::now();
        let mut attempts = 0u32;

        let result = executor.run_classified(
            |attempt| {
                attempts = attempt;
                if attempt > 1 {
                    ctx.transcript
                        .line(&format!("retrying {} (attempt {attempt})", plan.kind));
                }
                scenario::run_scenario(plan, &mut ctx)
            },
            |e| e.class(),
            |attempt, e, delay| {
                reporter.warn(&format!(
                    "{} attempt {attempt} failed: {e}; retrying in {}",
                    plan.kind,
                    humantime::format_duration(delay)
                ));
            },
        );

        let elapsed = started.elapsed();
        if let Some(entry) = receipt.scenario_mut(plan.kind) {
            entry.attempts = attempts;
            entry.duration_ms = elapsed.as_millis() as u64;
            entry.state = match &result {
                Ok(()) => ScenarioState::Passed,
                Err(e) => ScenarioState::Failed {
                    phase: e.phase,
                    message: e.to_string(),
                },
            };
        }
        reporter.scenario_finished(plan.kind, result.is_ok());

        match result {
            Ok(()) => reporter.info(&format!(
                "{} passed ({})",
                plan.kind.title(),
                humantime::format_duration(Duration::from_secs(elapsed.as_secs()))
            )),
            Err(source) => return Err(DriverError::Scenario { attempts, source }),
        }
    }

    Ok(())
}

/// Decide whether the ES-module probes run. An unusable node is not fatal
/// here; the CommonJS probes will surface it as a test failure.
fn detect_esm(
    node: &str,
    min_major: u64,
    timeout: Option<Duration>,
    reporter: &mut dyn Reporter,
    transcript: &mut Transcript,
) -> bool {
    match probe::detect_node_version(node, Path::new("."), timeout) {
        Ok(version) => {
            let supported = probe::supports_esm(&version, min_major);
            transcript.line(&format!("node {version}, ES module probes: {supported}"));
            if !supported {
                reporter.info(&format!(
                    "node {version} is older than {min_major}; skipping ES module probes"
                ));
            }
            supported
        }
        Err(e) => {
            transcript.line(&format!("could not determine node version: {e:#}"));
            reporter.warn(&format!(
                "could not determine node version ({e:#}); skipping ES module probes"
            ));
            false
        }
    }
}

fn format_elapsed(receipt: &Receipt) -> String {
    let secs = (receipt.finished_at - receipt.started_at).num_seconds().max(0) as u64;
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}
