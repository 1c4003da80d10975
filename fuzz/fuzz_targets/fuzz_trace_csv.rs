#![no_main]
use libfuzzer_sys::fuzz_target;

// The replay trace parser takes any reader, so raw fuzz bytes feed it
// directly. Malformed CSVs must come back as errors, never panics.
fuzz_target!(|data: &[u8]| {
    let _ = bms_config::parse_trace_csv(data);
});
