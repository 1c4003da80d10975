//! Human-readable error descriptions and structured JSON error formatting.

use crate::cli::LAST_SAFETY;

pub fn trip_reason_name(r: &bms_core::error::TripReason) -> &'static str {
    use bms_core::error::TripReason::*;
    match r {
        SignalLoss => "SignalLoss",
        BusSilence => "BusSilence",
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use bms_core::error::{BmsError, BuildError, TripReason};

    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSignals => {
                "What happened: No signal source was provided to the interlock engine.\nLikely causes: The input line backend failed to initialize or was not wired into the builder.\nHow to fix: Ensure the signal source is created successfully and passed via with_signals(...).".to_string()
            }
            BuildError::MissingCellBus => {
                "What happened: No cell bus was provided to the interlock engine.\nLikely causes: The cell monitoring backend failed to initialize or was not wired into the builder.\nHow to fix: Ensure the bus is created successfully and passed via with_cell_bus(...).".to_string()
            }
            BuildError::MissingOutputs => {
                "What happened: No inhibit outputs were provided to the interlock engine.\nLikely causes: The output backend failed to initialize or was not wired into the builder.\nHow to fix: Ensure the outputs are created successfully and passed via with_outputs(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/bms.toml for a sample."
            ),
        };
    }

    if let Some(be) = err.downcast_ref::<BmsError>() {
        if matches!(be, BmsError::Timeout) {
            return "What happened: A cell bus poll timed out.\nLikely causes: Bus wiring or power problems, or cycle.bus_timeout_ms set too low.\nHow to fix: Verify the bus harness, and consider raising cycle.bus_timeout_ms in the config.".to_string();
        }
        if let BmsError::Trip(reason) = be {
            return match reason {
                TripReason::SignalLoss => "What happened: The controller tripped after repeated signal capture failures.\nLikely causes: Input harness unplugged, line driver fault, or GPIO permissions.\nHow to fix: Restore the input lines, then re-arm (restart the run). Adjust safety.signal_fault_limit if captures are only transiently flaky.".to_string(),
                TripReason::BusSilence => "What happened: The controller tripped because the cell bus stayed silent past the hard window.\nLikely causes: Bus power loss, broken transceiver, or every scan failing.\nHow to fix: Restore the bus, then re-arm (restart the run). safety.bus_silence_ms controls the window.".to_string(),
            };
        }
        // Fallback to generic for other domain errors
        return format!(
            "What happened: {be}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
        );
    }

    // String-based heuristics for errors coming from init or config; scan
    // the whole chain so wrap_err contexts do not hide the root cause.
    let msg = err
        .chain()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("trace csv must have headers") {
        return format!(
            "Invalid headers in trace CSV. Expected '{}'.",
            bms_config::TRACE_HEADERS.join(",")
        );
    }

    if lower.contains("gpio") {
        return "What happened: Failed to access a GPIO line.\nLikely causes: Incorrect pin numbers in [pins] or insufficient GPIO permissions.\nHow to fix: Fix the [pins] values in the config; ensure the process has permission to access GPIO.".to_string();
    }

    if lower.contains("must be") || lower.contains("must exceed") || lower.contains("must not") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file and try again."
        );
    }

    // Generic fallback
    format!(
        "Something went wrong.\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Map trip causes (if present) to stable exit codes; other errors return 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    use bms_core::error::{BmsError, TripReason};
    if let Some(BmsError::Trip(reason)) = err.downcast_ref::<BmsError>() {
        return match reason {
            TripReason::SignalLoss => 3,
            TripReason::BusSilence => 4,
        };
    }
    1
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use bms_core::error::{BmsError, TripReason};
    use serde_json::json;

    if let Some(BmsError::Trip(reason)) = err.downcast_ref::<BmsError>() {
        let msg = humanize(err);
        let details = LAST_SAFETY.get();
        let reason_name = trip_reason_name(reason);

        let detail_obj = match reason {
            TripReason::SignalLoss => {
                details.map(|s| json!({ "signal_fault_limit": s.signal_fault_limit }))
            }
            TripReason::BusSilence => details.map(|s| {
                json!({ "bus_silence_ms": s.bus_silence_ms, "bus_ttl_ms": s.bus_ttl_ms })
            }),
        };

        let obj = if let Some(d) = detail_obj {
            json!({ "reason": reason_name, "details": d, "message": msg })
        } else {
            json!({ "reason": reason_name, "message": msg })
        };
        return obj.to_string();
    }

    // Generic error JSON
    json!({ "reason": "Error", "message": humanize(err) }).to_string()
}
