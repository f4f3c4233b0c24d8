#![no_main]

use keirloom_gateway::tx::decode_blob;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Heirs upload signed transaction blobs, so this parser sees fully
    // untrusted input. decode_blob must never panic; it always returns Ok
    // or Err.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = decode_blob(s);
    }

    // Also try the hex encoding of the raw bytes to reach the field decoder
    let _ = decode_blob(&hex_upper(data));
});

fn hex_upper(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02X}", b));
    }
    out
}
