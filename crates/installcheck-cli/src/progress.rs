//! Scenario progress with TTY detection.
//!
//! On a terminal a single status line is redrawn as scenarios advance; in CI
//! logs (no TTY) each transition is printed as its own line instead.

use std::io::IsTerminal;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use installcheck::types::ScenarioKind;
use installcheck_heartbeat::HeartbeatSink;

/// Detects whether stderr, where progress is drawn, is a TTY.
pub fn is_tty() -> bool {
    std::io::stderr().is_terminal()
}

pub struct ProgressReporter {
    is_tty: bool,
    total: usize,
    /// 1-indexed position of the running scenario
    current: usize,
    current_name: String,
    passed: usize,
    progress_bar: Option<ProgressBar>,
    start_time: Instant,
}

impl ProgressReporter {
    pub fn new(total: usize) -> Self {
        let is_tty = is_tty();
        let progress_bar = if is_tty {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            Some(pb)
        } else {
            None
        };

        Self {
            is_tty,
            total,
            current: 0,
            current_name: String::new(),
            passed: 0,
            progress_bar,
            start_time: Instant::now(),
        }
    }

    /// A reporter that never draws, regardless of TTY.
    #[cfg(test)]
    pub fn silent(total: usize) -> Self {
        Self {
            is_tty: false,
            total,
            current: 0,
            current_name: String::new(),
            passed: 0,
            progress_bar: None,
            start_time: Instant::now(),
        }
    }

    pub fn set_scenario(&mut self, index: usize, kind: ScenarioKind) {
        self.current = index;
        self.current_name = kind.title().to_string();
        let msg = format!("[{}/{}] {}...", self.current, self.total, self.current_name);

        match &self.progress_bar {
            Some(pb) if self.is_tty => {
                pb.set_position((self.current.saturating_sub(1)) as u64);
                pb.set_message(msg);
                pb.enable_steady_tick(std::time::Duration::from_millis(120));
            }
            _ => eprintln!("{msg}"),
        }
    }

    pub fn finish_scenario(&mut self, passed: bool) {
        if passed {
            self.passed += 1;
        }
        if let Some(pb) = &self.progress_bar {
            pb.inc(1);
        }
    }

    pub fn progress_bar(&self) -> Option<&ProgressBar> {
        self.progress_bar.as_ref()
    }

    /// Print a line without tearing the progress line.
    pub fn println(&self, line: &str) {
        match &self.progress_bar {
            Some(pb) => pb.println(line),
            None => eprintln!("{line}"),
        }
    }

    pub fn finish(self) {
        let elapsed = humantime::format_duration(std::time::Duration::from_secs(
            self.start_time.elapsed().as_secs(),
        ));
        let msg = format!("{}/{} scenarios passed in {elapsed}", self.passed, self.total);
        match self.progress_bar {
            Some(pb) => pb.finish_with_message(msg),
            None => eprintln!("{msg}"),
        }
    }
}

/// Heartbeat sink that prints above the progress bar while one is drawn.
///
/// The heartbeat thread starts before the first scenario creates the bar,
/// so the bar is attached and detached as the run progresses.
#[derive(Clone, Default)]
pub struct ProgressSink {
    bar: Arc<Mutex<Option<ProgressBar>>>,
}

impl ProgressSink {
    pub fn attach(&self, bar: &ProgressBar) {
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar.clone());
        }
    }

    pub fn detach(&self) {
        if let Ok(mut slot) = self.bar.lock() {
            *slot = None;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.bar.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

impl HeartbeatSink for ProgressSink {
    fn beat(&self, line: &str) {
        match self.bar.lock().as_deref() {
            Ok(Some(bar)) => bar.println(line),
            _ => eprintln!("{line}"),
        }
    }
}
