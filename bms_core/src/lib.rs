#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core charge/drive interlock logic (hardware-agnostic).
//!
//! This crate provides the hardware-independent interlock engine. All
//! hardware interactions go through the `bms_traits::SignalSource`,
//! `bms_traits::CellBus` and `bms_traits::InhibitBank` traits.
//!
//! ## Architecture
//!
//! - **Classification**: Voltage limits to cell status (`cell` module)
//! - **Monitoring**: Scan ingestion, freshness, worst-case fold (`monitor` module)
//! - **Decision**: The per-cycle inhibit formulas (`InterlockCore`)
//! - **Debounce**: Assert fast, release slow (`outputs` module)
//! - **Safety**: Signal-loss and bus-silence trip latches, safe-default snapshot
//! - **Status**: Interlock state and packed telemetry bytes (`status` module)
//!
//! ## Fixed-Point Arithmetic
//!
//! Internals operate on integers for deterministic behavior: cell voltages in
//! **millivolts** (`i32`), temperatures in **tenths of a degree Celsius**
//! (`i16`), charge current in **deciamps** (`u16`). Floating-point config
//! values are quantized once at build time, never per cycle.

// Module declarations
pub mod cell;
pub mod conversions;
pub mod error;
pub mod mocks;
pub mod monitor;
pub mod outputs;
pub mod runner;
pub mod sampler;
pub mod status;
pub mod util;

pub use cell::{CellLimits, CellReading, CellStatus};
pub use monitor::{BatteryStatus, CellMonitor};
pub use status::{CycleReport, InterlockKind, InterlockState};

use crate::error::BuildError;
use crate::error::{BmsError, Result, TripReason};
use crate::outputs::DebouncedLine;
use crate::status::{error_byte, status_byte};
use crate::util::div_round_nearest_i32;
use bms_traits::clock::{Clock, MonotonicClock};
use bms_traits::{CellBus, CellSample, InhibitBank, SignalSnapshot, SignalSource};
use eyre::WrapErr;
use std::sync::Arc;
use std::time::{Duration, Instant};

// For typed hardware error mapping
#[cfg(feature = "hardware-errors")]
use bms_hardware::error::HwError;

/// Quantize a floating-point volts value to integer millivolts, rounding to
/// nearest and clamping to the i32 range. Non-finite values (NaN/±Inf) map to 0.
#[inline]
fn quantize_to_mv_i32(x_v: f32) -> i32 {
    if !x_v.is_finite() {
        return 0;
    }
    let scaled = (x_v * 1000.0).round();
    if scaled >= i32::MAX as f32 {
        i32::MAX
    } else if scaled <= i32::MIN as f32 {
        i32::MIN
    } else {
        scaled as i32
    }
}

/// Quantize degrees Celsius to integer tenths of a degree, rounding to
/// nearest and saturating at the i16 range. Non-finite values map to 0.
#[inline]
fn quantize_to_dc_i16(x_c: f32) -> i16 {
    if !x_c.is_finite() {
        return 0;
    }
    let scaled = (x_c * 10.0).round();
    if scaled >= f32::from(i16::MAX) {
        i16::MAX
    } else if scaled <= f32::from(i16::MIN) {
        i16::MIN
    } else {
        scaled as i16
    }
}

/// Quantize amps to integer deciamps. Negative and non-finite values map to 0.
#[inline]
fn quantize_to_da_u16(x_a: f32) -> u16 {
    if !x_a.is_finite() || x_a <= 0.0 {
        return 0;
    }
    let scaled = (x_a * 10.0).round();
    if scaled >= f32::from(u16::MAX) {
        u16::MAX
    } else {
        scaled as u16
    }
}


/// Charge-current ceiling in deciamps for a given hottest-cell temperature.
///
/// At or below `low_dc` the full `max_da` is allowed; at or above `high_dc`
/// only `min_da` remains. Between the two the ceiling tapers linearly,
/// rounded to the nearest deciamp. Integer arithmetic throughout.
#[inline]
fn derate_charge_limit_da(
    high_temp_dc: i16,
    low_dc: i16,
    high_dc: i16,
    max_da: u16,
    min_da: u16,
) -> u16 {
    // A collapsed or inverted window has no taper to interpolate over
    if high_dc <= low_dc {
        return min_da;
    }
    if high_temp_dc <= low_dc {
        return max_da;
    }
    if high_temp_dc >= high_dc {
        return min_da;
    }
    let span = i32::from(high_dc) - i32::from(low_dc);
    let over = i32::from(high_temp_dc) - i32::from(low_dc);
    let range = i32::from(max_da) - i32::from(min_da);
    let scaled = div_round_nearest_i32(range.saturating_mul(span - over), span);
    (i32::from(min_da) + scaled).clamp(0, i32::from(u16::MAX)) as u16
}

#[cfg(test)]
mod derate_tests {
    use super::derate_charge_limit_da;

    #[test]
    fn flat_below_and_above_the_window() {
        assert_eq!(derate_charge_limit_da(150, 200, 300, 1_250, 80), 1_250);
        assert_eq!(derate_charge_limit_da(200, 200, 300, 1_250, 80), 1_250);
        assert_eq!(derate_charge_limit_da(300, 200, 300, 1_250, 80), 80);
        assert_eq!(derate_charge_limit_da(420, 200, 300, 1_250, 80), 80);
    }

    #[test]
    fn linear_taper_inside_the_window() {
        // Halfway between 20.0C and 30.0C: 80 + round(1170 * 50/100) = 665
        assert_eq!(derate_charge_limit_da(250, 200, 300, 1_250, 80), 665);
        // One tenth inside either edge
        assert_eq!(derate_charge_limit_da(201, 200, 300, 1_250, 80), 1_238);
        assert_eq!(derate_charge_limit_da(299, 200, 300, 1_250, 80), 92);
    }

    #[test]
    fn inverted_window_degrades_to_minimum() {
        assert_eq!(derate_charge_limit_da(250, 300, 200, 1_250, 80), 80);
        // Even a pack cooler than both edges gets the minimum
        assert_eq!(derate_charge_limit_da(150, 300, 200, 1_250, 80), 80);
        // A zero-width window likewise
        assert_eq!(derate_charge_limit_da(150, 200, 200, 1_250, 80), 80);
    }
}

/// Snapshot substituted when signal capture fails: every level reads as
/// inhibited until real levels come back.
#[inline]
fn inhibited_snapshot() -> SignalSnapshot {
    SignalSnapshot {
        ignition: false,
        charge_enable: false,
        batt1_inhibit: false,
        batt2_inhibit: false,
        charger_inhibit: true,
        heater_enable: false,
    }
}

/// Public status of a single interlock cycle.
#[derive(Debug)]
pub enum CycleStatus {
    /// Keep cycling; outputs reflect this cycle's evaluation.
    Cycling,
    /// Latched on a trip; outputs are parked safe until `arm()`.
    Tripped(BmsError),
}

/// Voltage and temperature thresholds, quantized once at build time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdCfg {
    /// A cell strictly below this is Empty.
    pub cell_empty_v: f32,
    /// A cell strictly above this is Full.
    pub cell_full_v: f32,
    /// Readings outside the floor/ceiling window are sensor faults,
    /// not charge states.
    pub fault_floor_v: f32,
    pub fault_ceiling_v: f32,
    /// At or above this the pack is too hot to drive or charge.
    pub max_temp_c: f32,
    /// Below this the pack is too cold to charge (driving is unaffected).
    pub min_charge_temp_c: f32,
    /// Pack totals further apart than this flag an imbalance.
    pub pack_delta_mv: i32,
}

impl Default for ThresholdCfg {
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

/// Output debounce configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceCfg {
    /// Consecutive clear cycles required before an inhibit releases.
    /// Assertion is never debounced.
    pub release_cycles: u8,
}

impl Default for DebounceCfg {
    fn default() -> Self {
        Self { release_cycles: 3 }
    }
}

/// Control loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleCfg {
    /// Evaluation rate in Hz.
    pub rate_hz: u32,
    /// Max cell-bus wait per poll (ms).
    pub bus_timeout_ms: u64,
    /// A pack with no scan for this long degrades to Fault (ms).
    pub bus_ttl_ms: u64,
}

impl Default for CycleCfg {
    fn default() -> Self {
        Self {
            rate_hz: 10,
            bus_timeout_ms: 150,
            bus_ttl_ms: 5_000,
        }
    }
}

/// Trip latch configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyCfg {
    /// Consecutive failed signal captures before the signal-loss trip.
    pub signal_fault_limit: u8,
    /// Bus silence window before the bus-silence trip (ms). Floored at
    /// build time so one slow poll or missed cycle cannot latch it.
    pub bus_silence_ms: u64,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            signal_fault_limit: 10,
            bus_silence_ms: 30_000,
        }
    }
}

/// Charge-current derating configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeCfg {
    /// Full current is allowed at or below this temperature (C).
    pub throttle_low_c: f32,
    /// Only the minimum current remains at or above this temperature (C).
    pub throttle_high_c: f32,
    pub current_max_a: f32,
    pub current_min_a: f32,
}

impl Default for ChargeCfg {
    fn default() -> Self {
        Self {
            throttle_low_c: 20.0,
            throttle_high_c: 30.0,
            current_max_a: 125.0,
            current_min_a: 8.0,
        }
    }
}

/// Physical battery arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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

/// Bitmask with one bit set per configured pack, LSB = pack 0.
#[inline]
fn all_packs_mask(packs: u8) -> u8 {
    if packs >= 8 {
        u8::MAX
    } else {
        (1u8 << packs) - 1
    }
}

/// Unified engine for both dynamic (boxed) and generic (static dispatch) variants.
pub struct InterlockCore<G: SignalSource, B: CellBus, O: InhibitBank> {
    signals: G,
    bus: B,
    outputs: O,
    monitor: CellMonitor,
    state: InterlockState,
    drive_line: DebouncedLine,
    charge_line: DebouncedLine,
    // Unified clock for deterministic time in tests
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    // Epoch Instant for computing monotonic milliseconds
    epoch: Instant,

    // Cached quantized thresholds (integer units)
    max_temp_dc: i16,
    min_charge_temp_dc: i16,
    pack_delta_limit_mv: i32,
    throttle_low_dc: i16,
    throttle_high_dc: i16,
    charge_max_da: u16,
    charge_min_da: u16,
    // Cached control-loop sleep period in microseconds
    period_us: u64,
    bus_timeout_ms: u64,
    // Effective silence trip window, floored by the runner helpers
    silence_threshold_ms: u64,
    packs: u8,

    // Signal fault streak and trip latch
    signal_fault_streak: u8,
    signal_fault_limit: u8,
    tripped: Option<TripReason>,
    cycles: u64,

    // Latest derived outputs
    heater_on: bool,
    pack_inhibit_mask: u8,
    charge_limit_da: u16,
    last_report: Option<CycleReport>,

    // Run counters for the CLI summary
    signal_faults_total: u64,
    bus_errors_total: u64,
}

impl<G: SignalSource, B: CellBus, O: InhibitBank> core::fmt::Debug for InterlockCore<G, B, O> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InterlockCore")
            .field("kind", &self.state.kind())
            .field("cycles", &self.cycles)
            .field("tripped", &self.tripped)
            .finish()
    }
}

impl<G: SignalSource, B: CellBus, O: InhibitBank> InterlockCore<G, B, O> {
    /// Reset to the armed state and start a fresh cycle epoch. Call once at
    /// startup and again to manually clear a latched trip.
    pub fn arm(&mut self) {
        // Reset epoch; subsequent ms are measured from here
        self.epoch = self.clock.now();
        self.state = InterlockState::default();
        self.drive_line.reset();
        self.charge_line.reset();
        self.monitor.reset();
        self.signal_fault_streak = 0;
        self.tripped = None;
        self.cycles = 0;
        self.heater_on = false;
        self.pack_inhibit_mask = 0;
        self.charge_limit_da = 0;
        self.last_report = None;
        self.signal_faults_total = 0;
        self.bus_errors_total = 0;
    }

    /// One iteration of the interlock loop: capture signals, poll the cell
    /// bus, evaluate, drive outputs, sleep out the rest of the period.
    pub fn step(&mut self) -> Result<CycleStatus> {
        // A latched trip keeps re-asserting the safe state until arm()
        if let Some(r) = self.tripped {
            self.force_safe_outputs();
            return Ok(CycleStatus::Tripped(BmsError::Trip(r)));
        }

        let (snap, signal_fault) = match self.capture_signals() {
            Ok(pair) => pair,
            Err(reason) => return self.trip(reason),
        };

        // A failed poll is not itself fatal; freshness tracking inhibits and
        // eventually trips if the bus stays quiet.
        let timeout = Duration::from_millis(self.bus_timeout_ms);
        match self.bus.poll(timeout) {
            Ok(scan) => {
                let now = self.clock.ms_since(self.epoch);
                self.monitor.ingest(&scan, now);
            }
            Err(e) => {
                self.bus_errors_total += 1;
                tracing::debug!(error = %e, "cell bus poll failed");
            }
        }

        self.evaluate(snap, signal_fault)
    }

    /// Process one cycle with an externally sampled scan (sampler
    /// integration). Signals are still captured and evaluated; `None` means
    /// no fresh scan arrived this cycle.
    pub fn step_with_scan(&mut self, scan: Option<&[CellSample]>) -> Result<CycleStatus> {
        if let Some(r) = self.tripped {
            self.force_safe_outputs();
            return Ok(CycleStatus::Tripped(BmsError::Trip(r)));
        }

        let (snap, signal_fault) = match self.capture_signals() {
            Ok(pair) => pair,
            Err(reason) => return self.trip(reason),
        };

        if let Some(scan) = scan {
            let now = self.clock.ms_since(self.epoch);
            self.monitor.ingest(scan, now);
        }

        self.evaluate(snap, signal_fault)
    }

    /// Capture the control lines, substituting the inhibited snapshot on
    /// failure. Err carries the trip once the failure streak hits the limit.
    fn capture_signals(&mut self) -> std::result::Result<(SignalSnapshot, bool), TripReason> {
        match self.signals.capture() {
            Ok(snap) => {
                self.signal_fault_streak = 0;
                Ok((snap, false))
            }
            Err(e) => {
                self.signal_faults_total += 1;
                self.signal_fault_streak = self.signal_fault_streak.saturating_add(1);
                tracing::warn!(
                    error = %e,
                    streak = self.signal_fault_streak,
                    "signal capture failed, assuming inhibited levels"
                );
                if self.signal_fault_streak >= self.signal_fault_limit {
                    return Err(TripReason::SignalLoss);
                }
                Ok((inhibited_snapshot(), true))
            }
        }
    }

    fn evaluate(&mut self, snap: SignalSnapshot, signal_fault: bool) -> Result<CycleStatus> {
        let now = self.clock.ms_since(self.epoch);

        if self.monitor.silent_for(now) >= self.silence_threshold_ms {
            return self.trip(TripReason::BusSilence);
        }
        let battery = self.monitor.summary(now)?;
        let bus_stale = self.monitor.bus_stale(now);

        let manual = snap.batt1_inhibit || snap.batt2_inhibit;
        // Temperature extremes cover live cells only; with none, any_fault
        // already forces both inhibits and these terms stay neutral.
        let too_hot = battery.high_temp_dc >= self.max_temp_dc;
        let too_cold = battery.low_temp_dc < self.min_charge_temp_dc;

        // The two inhibit formulas. A failed capture already substituted the
        // inhibited snapshot, so no separate signal-fault term is needed.
        let drive_demand =
            battery.any_empty || battery.any_fault || !snap.ignition || manual || too_hot;
        let charge_demand = battery.any_full
            || battery.any_fault
            || snap.charger_inhibit
            || !snap.charge_enable
            || manual
            || too_hot
            || too_cold;

        let prev = self.state;
        self.state.drive_inhibit = self.drive_line.update(drive_demand);
        self.state.charge_inhibit = self.charge_line.update(charge_demand);

        // Heater demand is derived, never passed through from the input line
        self.heater_on = too_cold && snap.charge_enable && !too_hot;

        let imbalanced = battery.pack_delta_mv >= self.pack_delta_limit_mv;
        let mut mask: u8 = 0;
        if imbalanced {
            mask = all_packs_mask(self.packs);
        }
        if snap.batt1_inhibit {
            mask |= 1;
        }
        if snap.batt2_inhibit && self.packs > 1 {
            mask |= 1 << 1;
        }
        self.pack_inhibit_mask = mask;

        // Thermal bars always demand the inhibit, so one check covers both
        self.charge_limit_da = if self.state.charge_inhibit {
            0
        } else {
            derate_charge_limit_da(
                battery.high_temp_dc,
                self.throttle_low_dc,
                self.throttle_high_dc,
                self.charge_max_da,
                self.charge_min_da,
            )
        };

        if prev.drive_inhibit != self.state.drive_inhibit {
            if self.state.drive_inhibit {
                tracing::warn!(
                    reason = drive_reason(&battery, snap, manual),
                    "drive inhibit asserted"
                );
            } else {
                tracing::info!("drive inhibit released");
            }
        }
        if prev.charge_inhibit != self.state.charge_inhibit {
            if self.state.charge_inhibit {
                tracing::warn!(
                    reason = charge_reason(&battery, snap, manual, too_hot),
                    "charge inhibit asserted"
                );
            } else {
                tracing::info!("charge inhibit released");
            }
        }

        self.apply_outputs()?;

        let report = CycleReport {
            cycle: self.cycles,
            state: self.state,
            kind: self.state.kind(),
            snapshot: snap,
            battery,
            heater_on: self.heater_on,
            pack_inhibit_mask: self.pack_inhibit_mask,
            charge_limit_da: self.charge_limit_da,
            signal_fault,
            status_byte: status_byte(self.state, self.heater_on, snap),
            error_byte: error_byte(false, imbalanced, bus_stale),
        };
        tracing::trace!(
            cycle = report.cycle,
            kind = %report.kind,
            status = report.status_byte,
            error = report.error_byte,
            "cycle evaluated"
        );
        self.last_report = Some(report);
        self.cycles += 1;

        // Throttle loop to the configured cycle rate.
        self.clock.sleep(Duration::from_micros(self.period_us));

        Ok(CycleStatus::Cycling)
    }

    /// Latch a trip and park the outputs. Only `arm()` clears it.
    fn trip(&mut self, reason: TripReason) -> Result<CycleStatus> {
        self.tripped = Some(reason);
        self.force_safe_outputs();
        self.publish_trip_report(reason);
        tracing::error!(%reason, "interlock trip latched, manual re-arm required");
        Ok(CycleStatus::Tripped(BmsError::Trip(reason)))
    }

    /// Final telemetry for a latched trip: parked outputs, the inhibited
    /// snapshot, and the error byte with the tripped bit set.
    fn publish_trip_report(&mut self, reason: TripReason) {
        let now = self.clock.ms_since(self.epoch);
        let snap = inhibited_snapshot();
        // The build rejects empty topologies, so the summary cannot fail here
        let Ok(battery) = self.monitor.summary(now) else {
            return;
        };
        let bus_stale = self.monitor.bus_stale(now);
        let imbalanced = battery.pack_delta_mv >= self.pack_delta_limit_mv;
        self.last_report = Some(CycleReport {
            cycle: self.cycles,
            state: self.state,
            kind: self.state.kind(),
            snapshot: snap,
            battery,
            heater_on: false,
            pack_inhibit_mask: self.pack_inhibit_mask,
            charge_limit_da: 0,
            signal_fault: matches!(reason, TripReason::SignalLoss),
            status_byte: status_byte(self.state, false, snap),
            error_byte: error_byte(true, imbalanced, bus_stale),
        });
    }

    /// Drive every output to its safe level, best-effort.
    fn force_safe_outputs(&mut self) {
        self.drive_line.force(true);
        self.charge_line.force(true);
        self.state.drive_inhibit = true;
        self.state.charge_inhibit = true;
        self.heater_on = false;
        self.pack_inhibit_mask = all_packs_mask(self.packs);
        self.charge_limit_da = 0;
        if let Err(e) = self.outputs.set_drive_inhibit(true) {
            tracing::warn!(error = %e, "set_drive_inhibit failed while parking safe");
        }
        if let Err(e) = self.outputs.set_charge_inhibit(true) {
            tracing::warn!(error = %e, "set_charge_inhibit failed while parking safe");
        }
        if let Err(e) = self.outputs.set_heater(false) {
            tracing::warn!(error = %e, "heater off failed while parking safe");
        }
        for pack in 0..self.packs {
            if let Err(e) = self.outputs.set_pack_inhibit(pack, true) {
                tracing::warn!(error = %e, pack, "set_pack_inhibit failed while parking safe");
            }
        }
    }

    /// Park the outputs safe ahead of an operator shutdown.
    pub fn park(&mut self) {
        self.force_safe_outputs();
        tracing::info!("outputs parked safe");
    }

    fn apply_outputs(&mut self) -> Result<()> {
        self.outputs
            .set_drive_inhibit(self.state.drive_inhibit)
            .map_err(|e| eyre::Report::new(map_hw_error_dyn(&*e)))
            .wrap_err("set drive inhibit")?;
        self.outputs
            .set_charge_inhibit(self.state.charge_inhibit)
            .map_err(|e| eyre::Report::new(map_hw_error_dyn(&*e)))
            .wrap_err("set charge inhibit")?;
        self.outputs
            .set_heater(self.heater_on)
            .map_err(|e| eyre::Report::new(map_hw_error_dyn(&*e)))
            .wrap_err("set heater")?;
        for pack in 0..self.packs {
            let active = self.pack_inhibit_mask & (1 << pack) != 0;
            self.outputs
                .set_pack_inhibit(pack, active)
                .map_err(|e| eyre::Report::new(map_hw_error_dyn(&*e)))
                .wrap_err("set pack inhibit")?;
        }
        Ok(())
    }

    /// Current persistent interlock state.
    #[must_use]
    pub fn state(&self) -> InterlockState {
        self.state
    }

    #[must_use]
    pub fn kind(&self) -> InterlockKind {
        self.state.kind()
    }

    /// Report from the most recent evaluated cycle, if any.
    #[must_use]
    pub fn report(&self) -> Option<CycleReport> {
        self.last_report
    }

    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.tripped.is_some()
    }

    #[must_use]
    pub fn trip_reason(&self) -> Option<TripReason> {
        self.tripped
    }

    /// Cycles evaluated since the last `arm()`.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    #[must_use]
    pub fn heater_on(&self) -> bool {
        self.heater_on
    }

    /// Allowed charge current in deciamps; 0 while charging is inhibited.
    #[must_use]
    pub fn charge_limit_da(&self) -> u16 {
        self.charge_limit_da
    }

    #[must_use]
    pub fn signal_faults_total(&self) -> u64 {
        self.signal_faults_total
    }

    #[must_use]
    pub fn bus_errors_total(&self) -> u64 {
        self.bus_errors_total
    }
}

fn drive_reason(b: &BatteryStatus, snap: SignalSnapshot, manual: bool) -> &'static str {
    if b.any_fault {
        "cell fault"
    } else if b.any_empty {
        "cell empty"
    } else if !snap.ignition {
        "ignition off"
    } else if manual {
        "manual override"
    } else {
        "over temperature"
    }
}

fn charge_reason(
    b: &BatteryStatus,
    snap: SignalSnapshot,
    manual: bool,
    too_hot: bool,
) -> &'static str {
    if b.any_fault {
        "cell fault"
    } else if b.any_full {
        "cell full"
    } else if snap.charger_inhibit {
        "charger inhibit line"
    } else if !snap.charge_enable {
        "charge not requested"
    } else if manual {
        "manual override"
    } else if too_hot {
        "over temperature"
    } else {
        "too cold to charge"
    }
}

/// Public dynamic (boxed) interlock that hides the endpoint generics.
pub struct Interlock {
    inner: InterlockCore<Box<dyn SignalSource>, Box<dyn CellBus>, Box<dyn InhibitBank>>,
}

impl core::fmt::Debug for Interlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Interlock")
            .field("kind", &self.inner.state.kind())
            .field("cycles", &self.inner.cycles)
            .field("tripped", &self.inner.tripped)
            .finish()
    }
}

impl Interlock {
    /// Start building an Interlock.
    #[must_use]
    pub fn builder() -> InterlockBuilder<Missing, Missing, Missing> {
        InterlockBuilder::default()
    }

    /// Reset to the armed state; also clears a latched trip.
    pub fn arm(&mut self) {
        self.inner.arm();
    }

    /// One iteration of the interlock loop.
    pub fn step(&mut self) -> Result<CycleStatus> {
        self.inner.step()
    }

    /// Process one cycle with an externally sampled scan.
    pub fn step_with_scan(&mut self, scan: Option<&[CellSample]>) -> Result<CycleStatus> {
        self.inner.step_with_scan(scan)
    }

    /// Park the outputs safe ahead of an operator shutdown.
    pub fn park(&mut self) {
        self.inner.park();
    }

    #[must_use]
    pub fn state(&self) -> InterlockState {
        self.inner.state()
    }

    #[must_use]
    pub fn kind(&self) -> InterlockKind {
        self.inner.kind()
    }

    /// Report from the most recent evaluated cycle, if any.
    #[must_use]
    pub fn report(&self) -> Option<CycleReport> {
        self.inner.report()
    }

    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.inner.is_tripped()
    }

    #[must_use]
    pub fn trip_reason(&self) -> Option<TripReason> {
        self.inner.trip_reason()
    }

    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.inner.cycles()
    }

    #[must_use]
    pub fn heater_on(&self) -> bool {
        self.inner.heater_on()
    }

    #[must_use]
    pub fn charge_limit_da(&self) -> u16 {
        self.inner.charge_limit_da()
    }

    #[must_use]
    pub fn signal_faults_total(&self) -> u64 {
        self.inner.signal_faults_total()
    }

    #[must_use]
    pub fn bus_errors_total(&self) -> u64 {
        self.inner.bus_errors_total()
    }
}

// Map any error to a typed BmsError, with special handling for hardware errors.
fn map_hw_error_dyn(e: &(dyn std::error::Error + 'static)) -> BmsError {
    #[cfg(feature = "hardware-errors")]
    if let Some(hw) = e.downcast_ref::<HwError>() {
        return match hw {
            HwError::Timeout => BmsError::Timeout,
            HwError::Gpio(s) => BmsError::HardwareFault(s.clone()),
            other => BmsError::Hardware(other.to_string()),
        };
    }
    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        BmsError::Timeout
    } else {
        BmsError::Hardware(s)
    }
}

// Type-state markers for the builder
pub struct Missing;
pub struct Set;

use std::marker::PhantomData;

/// Builder for `Interlock`. All fields are validated on `build()`.
pub struct InterlockBuilder<G, B, O> {
    signals: Option<Box<dyn SignalSource>>,
    bus: Option<Box<dyn CellBus>>,
    outputs: Option<Box<dyn InhibitBank>>,
    topology: Option<Topology>,
    thresholds: Option<ThresholdCfg>,
    debounce: Option<DebounceCfg>,
    cycle: Option<CycleCfg>,
    safety: Option<SafetyCfg>,
    charge: Option<ChargeCfg>,
    // Optional clock for tests (accept Box here)
    clock: Option<Box<dyn Clock + Send + Sync>>,
    // Type-state markers
    _g: PhantomData<G>,
    _b: PhantomData<B>,
    _o: PhantomData<O>,
}

impl Default for InterlockBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            signals: None,
            bus: None,
            outputs: None,
            topology: None,
            thresholds: None,
            debounce: None,
            cycle: None,
            safety: None,
            charge: None,
            clock: None,
            _g: PhantomData,
            _b: PhantomData,
            _o: PhantomData,
        }
    }
}

impl<G, B, O> InterlockBuilder<G, B, O> {
    /// Fallible build available in any type-state; returns a detailed
    /// BuildError for missing pieces. Validation happens in `build_interlock`
    /// so both build paths share one rule set.
    pub fn try_build(self) -> Result<Interlock> {
        let InterlockBuilder {
            signals,
            bus,
            outputs,
            topology,
            thresholds,
            debounce,
            cycle,
            safety,
            charge,
            clock,
            _g: _,
            _b: _,
            _o: _,
        } = self;

        let signals = signals.ok_or_else(|| eyre::Report::new(BuildError::MissingSignals))?;
        let bus = bus.ok_or_else(|| eyre::Report::new(BuildError::MissingCellBus))?;
        let outputs = outputs.ok_or_else(|| eyre::Report::new(BuildError::MissingOutputs))?;

        let inner = build_interlock(
            signals,
            bus,
            outputs,
            topology.unwrap_or_default(),
            thresholds.unwrap_or_default(),
            debounce.unwrap_or_default(),
            cycle.unwrap_or_default(),
            safety.unwrap_or_default(),
            charge.unwrap_or_default(),
            clock,
        )?;
        Ok(Interlock { inner })
    }
}

/// Chainable setters that do not affect type-state
impl<G, B, O> InterlockBuilder<G, B, O> {
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }
    pub fn with_thresholds(mut self, thresholds: ThresholdCfg) -> Self {
        self.thresholds = Some(thresholds);
        self
    }
    pub fn with_debounce(mut self, debounce: DebounceCfg) -> Self {
        self.debounce = Some(debounce);
        self
    }
    pub fn with_cycle(mut self, cycle: CycleCfg) -> Self {
        self.cycle = Some(cycle);
        self
    }
    pub fn with_safety(mut self, safety: SafetyCfg) -> Self {
        self.safety = Some(safety);
        self
    }
    pub fn with_charge(mut self, charge: ChargeCfg) -> Self {
        self.charge = Some(charge);
        self
    }
    /// Provide a custom clock implementation; defaults to MonotonicClock when not provided.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
}

// Setters that advance type-state when providing mandatory components
impl<B, O> InterlockBuilder<Missing, B, O> {
    pub fn with_signals(self, signals: impl SignalSource + 'static) -> InterlockBuilder<Set, B, O> {
        let InterlockBuilder {
            signals: _,
            bus,
            outputs,
            topology,
            thresholds,
            debounce,
            cycle,
            safety,
            charge,
            clock,
            _g: _,
            _b: _,
            _o: _,
        } = self;
        InterlockBuilder {
            signals: Some(Box::new(signals)),
            bus,
            outputs,
            topology,
            thresholds,
            debounce,
            cycle,
            safety,
            charge,
            clock,
            _g: PhantomData,
            _b: PhantomData,
            _o: PhantomData,
        }
    }
}

impl<G, O> InterlockBuilder<G, Missing, O> {
    pub fn with_cell_bus(self, bus: impl CellBus + 'static) -> InterlockBuilder<G, Set, O> {
        let InterlockBuilder {
            signals,
            bus: _,
            outputs,
            topology,
            thresholds,
            debounce,
            cycle,
            safety,
            charge,
            clock,
            _g: _,
            _b: _,
            _o: _,
        } = self;
        InterlockBuilder {
            signals,
            bus: Some(Box::new(bus)),
            outputs,
            topology,
            thresholds,
            debounce,
            cycle,
            safety,
            charge,
            clock,
            _g: PhantomData,
            _b: PhantomData,
            _o: PhantomData,
        }
    }
}

impl<G, B> InterlockBuilder<G, B, Missing> {
    pub fn with_outputs(self, outputs: impl InhibitBank + 'static) -> InterlockBuilder<G, B, Set> {
        let InterlockBuilder {
            signals,
            bus,
            outputs: _,
            topology,
            thresholds,
            debounce,
            cycle,
            safety,
            charge,
            clock,
            _g: _,
            _b: _,
            _o: _,
        } = self;
        InterlockBuilder {
            signals,
            bus,
            outputs: Some(Box::new(outputs)),
            topology,
            thresholds,
            debounce,
            cycle,
            safety,
            charge,
            clock,
            _g: PhantomData,
            _b: PhantomData,
            _o: PhantomData,
        }
    }
}

impl InterlockBuilder<Set, Set, Set> {
    /// Validate and build the Interlock. Only available when the signal
    /// source, cell bus and outputs are all set.
    pub fn build(self) -> Result<Interlock> {
        self.try_build()
    }
}

/// Generic, statically-dispatched alias using the unified core.
pub type InterlockG<G, B, O> = InterlockCore<G, B, O>;

/// Build a generic, statically-dispatched engine from concrete endpoints.
#[allow(clippy::too_many_arguments)]
pub fn build_interlock<G, B, O>(
    signals: G,
    bus: B,
    outputs: O,
    topology: Topology,
    thresholds: ThresholdCfg,
    debounce: DebounceCfg,
    cycle: CycleCfg,
    safety: SafetyCfg,
    charge: ChargeCfg,
    clock: Option<Box<dyn Clock + Send + Sync>>,
) -> Result<InterlockG<G, B, O>>
where
    G: SignalSource + 'static,
    B: CellBus + 'static,
    O: InhibitBank + 'static,
{
    if topology.packs == 0 || topology.packs > 8 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "pack count must be between 1 and 8",
        )));
    }
    if topology.cells_per_pack == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "cell topology needs at least one cell per pack",
        )));
    }
    if !(thresholds.cell_empty_v.is_finite()
        && thresholds.cell_full_v.is_finite()
        && thresholds.fault_floor_v.is_finite()
        && thresholds.fault_ceiling_v.is_finite()
        && thresholds.max_temp_c.is_finite()
        && thresholds.min_charge_temp_c.is_finite())
    {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "voltage and temperature thresholds must be finite",
        )));
    }
    if thresholds.cell_empty_v >= thresholds.cell_full_v {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "cell_empty_v must be below cell_full_v",
        )));
    }
    if thresholds.fault_floor_v >= thresholds.fault_ceiling_v {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "fault_floor_v must be below fault_ceiling_v",
        )));
    }
    if thresholds.pack_delta_mv <= 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "pack_delta_mv must be > 0",
        )));
    }
    if debounce.release_cycles == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "release_cycles must be >= 1",
        )));
    }
    if cycle.rate_hz == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "cycle rate must be > 0",
        )));
    }
    if cycle.rate_hz > 1_000 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "cycle rate unreasonably fast (>1kHz)",
        )));
    }
    if cycle.bus_timeout_ms == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "bus_timeout_ms must be >= 1",
        )));
    }
    if cycle.bus_ttl_ms == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "bus_ttl_ms must be >= 1",
        )));
    }
    if safety.signal_fault_limit == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "signal_fault_limit must be >= 1",
        )));
    }
    if safety.bus_silence_ms <= cycle.bus_ttl_ms {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "bus_silence_ms must exceed bus_ttl_ms",
        )));
    }
    if !(charge.throttle_low_c.is_finite()
        && charge.throttle_high_c.is_finite()
        && charge.current_max_a.is_finite()
        && charge.current_min_a.is_finite())
    {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "charge throttle parameters must be finite",
        )));
    }
    if charge.throttle_low_c >= charge.throttle_high_c {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "throttle_low_c must be below throttle_high_c",
        )));
    }
    if charge.current_min_a < 0.0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "charge currents must be >= 0",
        )));
    }
    if charge.current_max_a <= charge.current_min_a {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "current_max_a must exceed current_min_a",
        )));
    }

    let clock: Arc<dyn Clock + Send + Sync> = match clock {
        Some(b) => Arc::from(b),
        None => Arc::new(MonotonicClock::new()),
    };

    let limits = CellLimits {
        empty_mv: quantize_to_mv_i32(thresholds.cell_empty_v),
        full_mv: quantize_to_mv_i32(thresholds.cell_full_v),
        fault_floor_mv: quantize_to_mv_i32(thresholds.fault_floor_v),
        fault_ceil_mv: quantize_to_mv_i32(thresholds.fault_ceiling_v),
    };
    let monitor = CellMonitor::new(limits, topology.packs, topology.cells_per_pack, cycle.bus_ttl_ms)?;

    // Establish epoch for monotonic timing
    let epoch = clock.now();

    // Precompute loop period and the floored silence window
    let period_us = crate::util::period_us(cycle.rate_hz);
    let period_ms = crate::util::period_ms(cycle.rate_hz);
    let silence_threshold_ms =
        runner::effective_silence_ms(safety.bus_silence_ms, cycle.bus_timeout_ms, period_ms);

    Ok(InterlockG {
        signals,
        bus,
        outputs,
        monitor,
        state: InterlockState::default(),
        drive_line: DebouncedLine::new(debounce.release_cycles),
        charge_line: DebouncedLine::new(debounce.release_cycles),
        clock,
        epoch,
        max_temp_dc: quantize_to_dc_i16(thresholds.max_temp_c),
        min_charge_temp_dc: quantize_to_dc_i16(thresholds.min_charge_temp_c),
        pack_delta_limit_mv: thresholds.pack_delta_mv,
        throttle_low_dc: quantize_to_dc_i16(charge.throttle_low_c),
        throttle_high_dc: quantize_to_dc_i16(charge.throttle_high_c),
        charge_max_da: quantize_to_da_u16(charge.current_max_a),
        charge_min_da: quantize_to_da_u16(charge.current_min_a),
        period_us,
        bus_timeout_ms: cycle.bus_timeout_ms,
        silence_threshold_ms,
        packs: topology.packs,
        signal_fault_streak: 0,
        signal_fault_limit: safety.signal_fault_limit,
        tripped: None,
        cycles: 0,
        heater_on: false,
        pack_inhibit_mask: 0,
        charge_limit_da: 0,
        last_report: None,
        signal_faults_total: 0,
        bus_errors_total: 0,
    })
}
