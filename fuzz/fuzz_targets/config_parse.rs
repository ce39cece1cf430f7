#![no_main]

use installcheck_config::Config;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(config) = toml::from_str::<Config>(text) else {
        return;
    };

    // Whatever parses must validate or reject without panicking, and the
    // derived values must be usable.
    let _ = config.validate();
    let _ = config.package.spec();
    let _ = config.package.source_spec();

    // Whatever parses, a failing scenario is attempted exactly twice.
    let executor = installcheck_retry::RetryExecutor::new(config.retry.delay).with_sleep(|_| {});
    let mut calls = 0;
    let _ = executor.run(|_| {
        calls += 1;
        Err::<(), _>(())
    });
    assert_eq!(calls, installcheck_retry::MAX_ATTEMPTS);
});
