#![no_main]

use libfuzzer_sys::fuzz_target;
use std::time::Duration;
use wheelhouse_retry::{BackoffConfig, BackoffStrategy, delay_for};

fuzz_target!(|data: (u32, u8, u64, u64, u8)| {
    let (attempt, strategy_byte, base_ms, max_ms, jitter_byte) = data;

    let attempt = attempt % 1000 + 1;
    let strategy = match strategy_byte % 4 {
        0 => BackoffStrategy::Immediate,
        1 => BackoffStrategy::Exponential,
        2 => BackoffStrategy::Linear,
        _ => BackoffStrategy::Constant,
    };
    let config = BackoffConfig {
        strategy,
        max_attempts: 0,
        base_delay: Duration::from_millis(base_ms % 100_000),
        max_delay: Duration::from_millis(max_ms % 1_000_000),
        jitter: (jitter_byte as f64) / 255.0,
    };

    let delay = delay_for(&config, attempt);

    // The cap holds even with full jitter: the factor tops out at 2.
    assert!(delay <= config.max_delay * 2);
    if config.jitter == 0.0 {
        assert!(delay <= config.max_delay);
    }
});
