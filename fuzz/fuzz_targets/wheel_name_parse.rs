#![no_main]

use libfuzzer_sys::fuzz_target;
use wheelhouse_types::WheelName;

fuzz_target!(|data: &str| {
    // Parsing must never panic, and anything it accepts must
    // reassemble into itself.
    if let Ok(name) = WheelName::parse(data) {
        assert_eq!(name.filename(), data);
    }
});
