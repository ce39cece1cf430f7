//! Retry-once execution for install scenarios.
//!
//! A scenario gets exactly two attempts with a fixed pause between them.
//! Only the pause is configurable; the attempt count and the constant
//! backoff are not.
//!
//! # Example
//!
//! ```
//! use installcheck_retry::RetryExecutor;
//! use std::time::Duration;
//!
//! let executor = RetryExecutor::new(Duration::from_secs(15)).with_sleep(|_| {});
//! let mut calls = 0;
//! let result = executor.run(|attempt| {
//!     calls += 1;
//!     if attempt < 2 { Err("flaky") } else { Ok(attempt) }
//! });
//! assert_eq!(result, Ok(2));
//! assert_eq!(calls, 2);
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Attempts per scenario, including the first one.
pub const MAX_ATTEMPTS: u32 = 2;

/// Default pause between the first and the second attempt.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(15);

/// Error classification for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Error is transient and the operation should be attempted again
    #[default]
    Retryable,
    /// Error is permanent and retrying cannot help
    Permanent,
}

type SleepFn = Arc<dyn Fn(Duration) + Send + Sync>;

/// Runs a fallible operation at most [`MAX_ATTEMPTS`] times.
pub struct RetryExecutor {
    backoff: Duration,
    sleep: SleepFn,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF)
    }
}

impl RetryExecutor {
    pub fn new(backoff: Duration) -> Self {
        Self {
            backoff,
            sleep: Arc::new(std::thread::sleep),
        }
    }

    /// Replace the function used to wait between attempts.
    pub fn with_sleep<S>(self, sleep: S) -> Self
    where
        S: Fn(Duration) + Send + Sync + 'static,
    {
        self.with_shared_sleep(Arc::new(sleep))
    }

    pub fn with_shared_sleep(mut self, sleep: Arc<dyn Fn(Duration) + Send + Sync>) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Execute `operation`, retrying every error once.
    ///
    /// The operation receives the current attempt number (starting at 1).
    pub fn run<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_classified(operation, |_| ErrorClass::Retryable, |_, _, _| {})
    }

    /// Execute `operation`, retrying only errors that `classify` marks as
    /// retryable. `on_retry` is called with the failed attempt number, the
    /// error and the delay before the next attempt.
    pub fn run_classified<T, E, F, C, N>(
        &self,
        mut operation: F,
        classify: C,
        mut on_retry: N,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        C: Fn(&E) -> ErrorClass,
        N: FnMut(u32, &E, Duration),
    {
        let mut attempt = 1;

        loop {
            match operation(attempt) {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt >= MAX_ATTEMPTS || classify(&e) == ErrorClass::Permanent {
                        return Err(e);
                    }

                    on_retry(attempt, &e, self.backoff);
                    (self.sleep)(self.backoff);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use proptest::prelude::*;

    use super::*;

    fn recording_executor(backoff: Duration) -> (RetryExecutor, Arc<Mutex<Vec<Duration>>>) {
        let slept = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&slept);
        let executor = RetryExecutor::new(backoff).with_sleep(move |d| {
            sink.lock().expect("lock").push(d);
        });
        (executor, slept)
    }

    #[test]
    fn default_executor_waits_fifteen_seconds() {
        assert_eq!(RetryExecutor::default().backoff(), Duration::from_secs(15));
        assert_eq!(MAX_ATTEMPTS, 2);
    }

    #[test]
    fn executor_succeeds_without_sleeping() {
        let (executor, slept) = recording_executor(DEFAULT_BACKOFF);
        let result = executor.run(|_attempt| Ok::<_, &str>("installed"));
        assert_eq!(result, Ok("installed"));
        assert!(slept.lock().expect("lock").is_empty());
    }

    #[test]
    fn executor_retries_once_then_gives_up() {
        let (executor, slept) = recording_executor(DEFAULT_BACKOFF);
        let mut attempts = Vec::new();
        let result = executor.run(|attempt| {
            attempts.push(attempt);
            Err::<(), _>("npm exited with 1")
        });

        assert_eq!(result, Err("npm exited with 1"));
        assert_eq!(attempts, vec![1, 2]);
        assert_eq!(*slept.lock().expect("lock"), vec![DEFAULT_BACKOFF]);
    }

    #[test]
    fn executor_recovers_on_second_attempt() {
        let (executor, _slept) = recording_executor(DEFAULT_BACKOFF);
        let result = executor.run(|attempt| if attempt == 1 { Err("flaky") } else { Ok(attempt) });
        assert_eq!(result, Ok(2));
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let (executor, slept) = recording_executor(DEFAULT_BACKOFF);
        let mut calls = 0;
        let result = executor.run_classified(
            |_| {
                calls += 1;
                Err::<(), _>("no such file")
            },
            |_| ErrorClass::Permanent,
            |_, _, _| panic!("must not schedule a retry"),
        );

        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert!(slept.lock().expect("lock").is_empty());
    }

    #[test]
    fn on_retry_sees_failed_attempt_and_delay() {
        let (executor, _slept) = recording_executor(Duration::from_millis(250));
        let mut notices = Vec::new();
        let _ = executor.run_classified(
            |_| Err::<(), _>("boom"),
            |_| ErrorClass::Retryable,
            |attempt, err, delay| notices.push((attempt, err.to_string(), delay)),
        );

        assert_eq!(notices, vec![(1, "boom".to_string(), Duration::from_millis(250))]);
    }

    #[test]
    fn error_class_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorClass::Permanent).expect("serialize");
        assert_eq!(json, "\"permanent\"");
    }

    proptest! {
        #[test]
        fn never_more_than_two_attempts(backoff_ms in 0u64..600_000, failures in 0u32..10) {
            let (executor, slept) = recording_executor(Duration::from_millis(backoff_ms));
            let mut calls = 0;
            let result = executor.run(|attempt| {
                calls += 1;
                if attempt <= failures { Err(attempt) } else { Ok(attempt) }
            });

            prop_assert!(calls <= MAX_ATTEMPTS);
            prop_assert_eq!(result.is_ok(), failures < MAX_ATTEMPTS);

            let slept = slept.lock().expect("lock");
            prop_assert!(slept.len() <= 1);
            prop_assert!(slept.iter().all(|d| *d == Duration::from_millis(backoff_ms)));
        }
    }
}
