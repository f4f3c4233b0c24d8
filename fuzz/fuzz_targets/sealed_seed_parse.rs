#![no_main]

use keirloom_core::SealedSeed;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Try deserializing arbitrary bytes as a SealedSeed.
    // SealedSeed::from_bytes must never panic; it always returns Ok or Err.
    if let Ok(sealed) = SealedSeed::from_bytes(data) {
        // If deserialization succeeds, the round trip must not panic either
        let bytes = sealed.to_bytes();
        let _ = SealedSeed::from_bytes(&bytes);
    }

    // The hex form goes through the same validation
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = SealedSeed::from_hex(s);
    }
});
