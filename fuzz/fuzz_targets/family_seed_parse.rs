#![no_main]

use keirloom_core::FamilySeed;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Try parsing arbitrary bytes as a UTF-8 string, then as a family seed.
    // FamilySeed::from_str must never panic; it always returns Ok or Err.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = s.parse::<FamilySeed>();
    }

    // Also try with the "s" prefix prepended to exercise deeper decoding paths
    if let Ok(s) = std::str::from_utf8(data) {
        let prefixed = format!("s{}", s);
        let _ = prefixed.parse::<FamilySeed>();
    }
});
