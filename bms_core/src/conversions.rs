//! `From` implementations bridging `bms_config` types to `bms_core` types.
//!
//! These keep the field-by-field mapping out of the CLI.

use crate::{ChargeCfg, CycleCfg, DebounceCfg, SafetyCfg, ThresholdCfg, Topology};

// ── Topology ─────────────────────────────────────────────────────────────────

impl From<&bms_config::Topology> for Topology {
    fn from(c: &bms_config::Topology) -> Self {
        Self {
            packs: c.packs,
            cells_per_pack: c.cells_per_pack,
        }
    }
}

// ── ThresholdCfg ─────────────────────────────────────────────────────────────

impl From<&bms_config::Thresholds> for ThresholdCfg {
    fn from(c: &bms_config::Thresholds) -> Self {
        Self {
            cell_empty_v: c.cell_empty_v,
            cell_full_v: c.cell_full_v,
            fault_floor_v: c.fault_floor_v,
            fault_ceiling_v: c.fault_ceiling_v,
            max_temp_c: c.max_temp_c,
            min_charge_temp_c: c.min_charge_temp_c,
            pack_delta_mv: c.pack_delta_mv,
        }
    }
}

// ── DebounceCfg ──────────────────────────────────────────────────────────────

impl From<&bms_config::Debounce> for DebounceCfg {
    fn from(c: &bms_config::Debounce) -> Self {
        Self {
            release_cycles: c.release_cycles,
        }
    }
}

// ── CycleCfg ─────────────────────────────────────────────────────────────────

impl From<&bms_config::Cycle> for CycleCfg {
    fn from(c: &bms_config::Cycle) -> Self {
        Self {
            rate_hz: c.cycle_rate_hz,
            bus_timeout_ms: c.bus_timeout_ms,
            bus_ttl_ms: c.bus_ttl_ms,
        }
    }
}

// ── SafetyCfg ────────────────────────────────────────────────────────────────

impl From<&bms_config::Safety> for SafetyCfg {
    fn from(c: &bms_config::Safety) -> Self {
        Self {
            signal_fault_limit: c.signal_fault_limit,
            bus_silence_ms: c.bus_silence_ms,
        }
    }
}

// ── ChargeCfg ────────────────────────────────────────────────────────────────

impl From<&bms_config::Charge> for ChargeCfg {
    fn from(c: &bms_config::Charge) -> Self {
        Self {
            throttle_low_c: c.throttle_low_c,
            throttle_high_c: c.throttle_high_c,
            current_max_a: c.current_max_a,
            current_min_a: c.current_min_a,
        }
    }
}
