#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and replay-trace parsing for the battery interlock controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The trace CSV loader enforces exact headers so replayed scenarios fail
//!   loudly instead of evaluating garbage inputs.
use serde::Deserialize;

/// Replay trace CSV schema: one row of inputs per control cycle.
///
/// Expected headers:
/// ignition,charge_enable,batt1_inhibit,batt2_inhibit,charger_inhibit,heater_enable,low_cell_mv,high_cell_mv,pack_temp_dc
///
/// Example:
/// ignition,charge_enable,batt1_inhibit,batt2_inhibit,charger_inhibit,heater_enable,low_cell_mv,high_cell_mv,pack_temp_dc
/// true,false,false,false,false,false,3700,3710,200
/// true,false,false,false,false,false,2850,3710,200
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TraceRow {
    pub ignition: bool,
    pub charge_enable: bool,
    pub batt1_inhibit: bool,
    pub batt2_inhibit: bool,
    pub charger_inhibit: bool,
    pub heater_enable: bool,
    pub low_cell_mv: i32,
    pub high_cell_mv: i32,
    pub pack_temp_dc: i16,
}

/// BCM pin assignment for the GPIO backend. Six input lines, the two global
/// inhibit outputs, the heater command, and one contactor line per pack.
#[derive(Debug, Deserialize, Clone)]
pub struct Pins {
    pub ignition_in: u8,
    pub charge_enable_in: u8,
    pub batt1_inhibit_in: u8,
    pub batt2_inhibit_in: u8,
    pub charger_inhibit_in: u8,
    pub heater_enable_in: u8,
    pub drive_inhibit_out: u8,
    pub charge_inhibit_out: u8,
    pub heater_out: u8,
    pub pack_inhibit_out: Vec<u8>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Topology {
    pub packs: u8,
    pub cells_per_pack: u16,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            packs: 2,
            cells_per_pack: 96,
        }
    }
}

/// Classification thresholds in engineering units; quantized to integers at
/// the core boundary.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Thresholds {
    /// A cell strictly below this voltage is Empty.
    pub cell_empty_v: f32,
    /// A cell strictly above this voltage is Full.
    pub cell_full_v: f32,
    /// Readings outside [fault_floor_v, fault_ceiling_v] are sensor faults.
    pub fault_floor_v: f32,
    pub fault_ceiling_v: f32,
    /// At or above this pack temperature both inhibits assert.
    pub max_temp_c: f32,
    /// Strictly below this temperature charging is blocked.
    pub min_charge_temp_c: f32,
    /// Pack-to-pack voltage delta that counts as imbalanced (mV).
    pub pack_delta_mv: i32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cell_empty_v: 2.90,
            cell_full_v: 4.00,
            fault_floor_v: 0.50,
            fault_ceiling_v: 5.00,
            max_temp_c: 50.0,
            min_charge_temp_c: -10.0,
            pack_delta_mv: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Debounce {
    /// Consecutive clear cycles required before an inhibit releases.
    pub release_cycles: u8,
}

impl Default for Debounce {
    fn default() -> Self {
        Self { release_cycles: 3 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Cycle {
    /// Control loop rate in Hz. Also accepts alias "rate_hz".
    #[serde(alias = "rate_hz")]
    pub cycle_rate_hz: u32,
    /// Per-poll cell bus timeout (ms).
    pub bus_timeout_ms: u64,
    /// Scan freshness window; a pack not scanned within it degrades to Fault.
    pub bus_ttl_ms: u64,
}

impl Default for Cycle {
    fn default() -> Self {
        Self {
            cycle_rate_hz: 10,
            bus_timeout_ms: 150,
            bus_ttl_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Safety {
    /// Consecutive signal-capture failures before the controller trips.
    pub signal_fault_limit: u8,
    /// No successful bus scan within this window is a latched trip (ms).
    pub bus_silence_ms: u64,
}

impl Default for Safety {
    fn default() -> Self {
        Self {
            signal_fault_limit: 10,
            bus_silence_ms: 30_000,
        }
    }
}

/// Charge current derating between the two throttle temperatures.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Charge {
    pub throttle_low_c: f32,
    pub throttle_high_c: f32,
    pub current_max_a: f32,
    pub current_min_a: f32,
}

impl Default for Charge {
    fn default() -> Self {
        Self {
            throttle_low_c: 20.0,
            throttle_high_c: 30.0,
            current_max_a: 125.0,
            current_min_a: 8.0,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PollModeCfg {
    #[default]
    Sampler,
    Direct,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Runner {
    /// Default bus orchestration: "sampler" (background thread) or "direct".
    pub mode: PollModeCfg,
    /// Pacing for the background sampler thread in Hz.
    pub sampler_hz: u32,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            mode: PollModeCfg::Sampler,
            sampler_hz: 20,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Pin map for the GPIO backend; the simulated backend ignores it.
    pub pins: Option<Pins>,
    pub topology: Topology,
    pub thresholds: Thresholds,
    pub debounce: Debounce,
    pub cycle: Cycle,
    pub safety: Safety,
    pub charge: Charge,
    pub logging: Logging,
    pub runner: Runner,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Topology
        if self.topology.packs == 0 {
            eyre::bail!("topology.packs must be >= 1");
        }
        if self.topology.packs > 8 {
            eyre::bail!("topology.packs must be <= 8");
        }
        if self.topology.cells_per_pack == 0 {
            eyre::bail!("topology.cells_per_pack must be >= 1");
        }

        // Thresholds
        let t = &self.thresholds;
        for v in [
            t.cell_empty_v,
            t.cell_full_v,
            t.fault_floor_v,
            t.fault_ceiling_v,
            t.max_temp_c,
            t.min_charge_temp_c,
        ] {
            if !v.is_finite() {
                eyre::bail!("thresholds must be finite numbers");
            }
        }
        if t.cell_empty_v >= t.cell_full_v {
            eyre::bail!("thresholds.cell_empty_v must be below cell_full_v");
        }
        if t.fault_floor_v >= t.cell_empty_v {
            eyre::bail!("thresholds.fault_floor_v must be below cell_empty_v");
        }
        if t.fault_ceiling_v <= t.cell_full_v {
            eyre::bail!("thresholds.fault_ceiling_v must be above cell_full_v");
        }
        if t.max_temp_c <= t.min_charge_temp_c {
            eyre::bail!("thresholds.max_temp_c must exceed min_charge_temp_c");
        }
        if t.pack_delta_mv < 1 {
            eyre::bail!("thresholds.pack_delta_mv must be >= 1");
        }

        // Debounce
        if self.debounce.release_cycles == 0 {
            eyre::bail!("debounce.release_cycles must be >= 1");
        }

        // Cycle
        if self.cycle.cycle_rate_hz == 0 {
            eyre::bail!("cycle.cycle_rate_hz must be > 0");
        }
        if self.cycle.cycle_rate_hz > 1000 {
            eyre::bail!("cycle.cycle_rate_hz is unreasonably fast (>1kHz)");
        }
        if self.cycle.bus_timeout_ms == 0 {
            eyre::bail!("cycle.bus_timeout_ms must be >= 1");
        }
        if self.cycle.bus_ttl_ms == 0 {
            eyre::bail!("cycle.bus_ttl_ms must be >= 1");
        }

        // Safety
        if self.safety.signal_fault_limit == 0 {
            eyre::bail!("safety.signal_fault_limit must be >= 1");
        }
        if self.safety.bus_silence_ms <= self.cycle.bus_ttl_ms {
            eyre::bail!("safety.bus_silence_ms must exceed cycle.bus_ttl_ms");
        }

        // Charge
        let c = &self.charge;
        for v in [
            c.throttle_low_c,
            c.throttle_high_c,
            c.current_max_a,
            c.current_min_a,
        ] {
            if !v.is_finite() {
                eyre::bail!("charge values must be finite numbers");
            }
        }
        if c.throttle_low_c >= c.throttle_high_c {
            eyre::bail!("charge.throttle_low_c must be below throttle_high_c");
        }
        if c.current_min_a < 0.0 {
            eyre::bail!("charge.current_min_a must be >= 0");
        }
        if c.current_min_a > c.current_max_a {
            eyre::bail!("charge.current_min_a must not exceed current_max_a");
        }

        // Runner
        if self.runner.sampler_hz == 0 {
            eyre::bail!("runner.sampler_hz must be > 0");
        }

        // Pins (only meaningful for the GPIO backend)
        if let Some(pins) = &self.pins
            && pins.pack_inhibit_out.len() != usize::from(self.topology.packs)
        {
            eyre::bail!("pins.pack_inhibit_out must list one pin per pack");
        }

        Ok(())
    }
}

/// Exact header row required of trace CSVs.
pub const TRACE_HEADERS: [&str; 9] = [
    "ignition",
    "charge_enable",
    "batt1_inhibit",
    "batt2_inhibit",
    "charger_inhibit",
    "heater_enable",
    "low_cell_mv",
    "high_cell_mv",
    "pack_temp_dc",
];

/// Parse a replay trace from any reader. Enforces exact headers and reports
/// the first bad row with its line number.
pub fn parse_trace_csv<R: std::io::Read>(reader: R) -> eyre::Result<Vec<TraceRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers: {}", e))?
        .clone();
    let actual: Vec<String> = headers.iter().map(ToString::to_string).collect();
    if actual != TRACE_HEADERS {
        eyre::bail!(
            "trace CSV must have headers '{}', got: {}",
            TRACE_HEADERS.join(","),
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<TraceRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    if rows.is_empty() {
        eyre::bail!("trace CSV has no data rows");
    }
    Ok(rows)
}

pub fn load_trace_csv(path: &std::path::Path) -> eyre::Result<Vec<TraceRow>> {
    let f = std::fs::File::open(path)
        .map_err(|e| eyre::eyre!("open trace CSV {:?}: {}", path, e))?;
    parse_trace_csv(std::io::BufReader::new(f))
}
