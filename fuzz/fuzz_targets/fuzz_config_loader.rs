#![no_main]
use libfuzzer_sys::fuzz_target;

// TOML parsing and validation of arbitrary config text must reject bad
// inputs with errors, never panic.
fuzz_target!(|data: &str| {
    if let Ok(cfg) = bms_config::load_toml(data) {
        let _ = cfg.validate();
    }
});
