#![no_main]

use libfuzzer_sys::fuzz_target;
use ratecheck_core::config::RatecheckConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(toml_str) = std::str::from_utf8(data) {
        if let Ok(config) = RatecheckConfig::parse(toml_str) {
            let _ = config.validate();
        }
    }
});
