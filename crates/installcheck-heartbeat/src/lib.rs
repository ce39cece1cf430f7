//! Keep-alive heartbeat for long-running CI steps.
//!
//! CI hosts kill jobs that stay silent for too long. A [`Heartbeat`] owns a
//! background thread that prints a timestamped liveness line every
//! `interval` until it is stopped. Stopping is immediate: the thread waits
//! on a channel rather than sleeping, so a stop request wakes it at once.
//!
//! The handle stops the thread when dropped, so holding it for the length of
//! a run guarantees teardown on every exit path, including panics.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use installcheck_heartbeat::{Heartbeat, StderrSink};
//!
//! let mut heartbeat = Heartbeat::start(Duration::from_secs(300), Arc::new(StderrSink))
//!     .expect("spawn heartbeat");
//! assert!(heartbeat.is_running());
//! heartbeat.stop();
//! assert!(!heartbeat.is_running());
//! ```

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};

/// Destination for liveness lines.
pub trait HeartbeatSink: Send + Sync {
    fn beat(&self, line: &str);
}

/// Writes liveness lines to stderr, the diagnostic stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl HeartbeatSink for StderrSink {
    fn beat(&self, line: &str) {
        eprintln!("{line}");
    }
}

/// Format one liveness line.
pub fn format_beat(now: DateTime<Utc>, elapsed: Duration) -> String {
    let elapsed = Duration::from_secs(elapsed.as_secs());
    format!(
        "[heartbeat] {} still running (elapsed {})",
        now.to_rfc3339_opts(SecondsFormat::Secs, true),
        humantime::format_duration(elapsed)
    )
}

/// Handle to a running heartbeat thread.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Spawn the heartbeat thread. The first line is emitted after one full
    /// `interval`.
    pub fn start(interval: Duration, sink: Arc<dyn HeartbeatSink>) -> Result<Self> {
        if interval.is_zero() {
            bail!("heartbeat interval must be greater than 0");
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("installcheck-heartbeat".to_string())
            .spawn(move || {
                let started = Instant::now();
                // Either an explicit stop or a dropped sender ends the loop.
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                    sink.beat(&format_beat(Utc::now(), started.elapsed()));
                }
            })
            .context("failed to spawn heartbeat thread")?;

        Ok(Self {
            interval,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the heartbeat thread. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;

    #[derive(Default)]
    struct CollectingSink {
        lines: Mutex<Vec<String>>,
    }

    impl CollectingSink {
        fn count(&self) -> usize {
            self.lines.lock().expect("lock").len()
        }
    }

    impl HeartbeatSink for CollectingSink {
        fn beat(&self, line: &str) {
            self.lines.lock().expect("lock").push(line.to_string());
        }
    }

    #[test]
    fn format_beat_is_timestamped() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).single().expect("time");
        let line = format_beat(now, Duration::from_millis(125_400));
        assert_eq!(
            line,
            "[heartbeat] 2024-05-01T12:30:00Z still running (elapsed 2m 5s)"
        );
    }

    #[test]
    fn zero_interval_is_rejected() {
        let sink = Arc::new(CollectingSink::default());
        let err = Heartbeat::start(Duration::ZERO, sink).expect_err("must fail");
        assert!(err.to_string().contains("greater than 0"));
    }

    #[test]
    fn emits_lines_while_running() {
        let sink = Arc::new(CollectingSink::default());
        let mut heartbeat =
            Heartbeat::start(Duration::from_millis(10), sink.clone()).expect("start");
        thread::sleep(Duration::from_millis(120));
        heartbeat.stop();

        assert!(sink.count() >= 2, "expected several beats, got {}", sink.count());
        let lines = sink.lines.lock().expect("lock");
        assert!(lines.iter().all(|l| l.starts_with("[heartbeat] ")));
    }

    #[test]
    fn no_lines_after_stop() {
        let sink = Arc::new(CollectingSink::default());
        let mut heartbeat =
            Heartbeat::start(Duration::from_millis(10), sink.clone()).expect("start");
        thread::sleep(Duration::from_millis(50));
        heartbeat.stop();
        let after_stop = sink.count();

        thread::sleep(Duration::from_millis(60));
        assert_eq!(sink.count(), after_stop);
        assert!(!heartbeat.is_running());
    }

    #[test]
    fn stop_is_idempotent() {
        let sink = Arc::new(CollectingSink::default());
        let mut heartbeat = Heartbeat::start(Duration::from_secs(60), sink).expect("start");
        heartbeat.stop();
        heartbeat.stop();
        assert!(!heartbeat.is_running());
    }

    #[test]
    fn stop_does_not_wait_for_interval() {
        let sink = Arc::new(CollectingSink::default());
        let mut heartbeat = Heartbeat::start(Duration::from_secs(3600), sink.clone()).expect("start");
        let started = Instant::now();
        heartbeat.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn drop_stops_the_thread() {
        let sink = Arc::new(CollectingSink::default());
        {
            let _heartbeat =
                Heartbeat::start(Duration::from_millis(10), sink.clone()).expect("start");
            thread::sleep(Duration::from_millis(30));
        }
        let after_drop = sink.count();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(sink.count(), after_drop);
    }

    #[test]
    fn drop_stops_the_thread_during_unwind() {
        let sink = Arc::new(CollectingSink::default());
        let inner = sink.clone();
        let result = std::panic::catch_unwind(move || {
            let _heartbeat = Heartbeat::start(Duration::from_millis(10), inner).expect("start");
            thread::sleep(Duration::from_millis(30));
            panic!("scenario blew up");
        });
        assert!(result.is_err());

        let after_panic = sink.count();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(sink.count(), after_panic);
    }
}
