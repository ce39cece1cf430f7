#![no_main]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use installcheck_retry::{ErrorClass, MAX_ATTEMPTS, RetryExecutor};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (u64, u8, bool)| {
    let (backoff_ms, failures, permanent) = data;
    let backoff = Duration::from_millis(backoff_ms % 600_000);

    let executor = RetryExecutor::new(backoff).with_sleep(|_| {});
    let mut calls = 0u32;
    let retries = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&retries);

    let result = executor.run_classified(
        |attempt| {
            calls += 1;
            if u32::from(failures) >= attempt { Err(attempt) } else { Ok(attempt) }
        },
        |_| if permanent { ErrorClass::Permanent } else { ErrorClass::Retryable },
        |_, _, delay| seen.borrow_mut().push(delay),
    );

    assert!(calls >= 1 && calls <= MAX_ATTEMPTS);
    assert!(retries.borrow().iter().all(|d| *d == backoff));
    assert!(retries.borrow().len() <= 1);
    if permanent {
        assert_eq!(calls, 1);
    }
    if failures == 0 {
        assert_eq!(result, Ok(1));
    }
});
