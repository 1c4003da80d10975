//! Simulated bench for scenario testing.
//!
//! A `Charger` is the operator's handle on a simulated vehicle: it owns the
//! six control lines, every cell voltage, the pack temperature, and observers
//! for each output the controller drives. `endpoints()` hands out the
//! `SignalSource` / `CellBus` / `InhibitBank` implementations that share its
//! state, so a test can wire an engine, flip a line or force a cell, and
//! watch the inhibit levels move.

use crate::error::HwError;
use bms_traits::{CellBus, CellSample, InhibitBank, SignalSnapshot, SignalSource};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Nominal cell voltage the bench resets to.
pub const NOMINAL_MV: i32 = 3_700;
/// Comfortably below the default empty threshold (2.90 V).
pub const EMPTY_MV: i32 = 2_850;
/// Comfortably above the default full threshold (4.00 V).
pub const FULL_MV: i32 = 4_050;
/// Below the sensor floor; classifies as a fault, not a charge state.
pub const FAULT_MV: i32 = 0;
/// 20.0 C.
pub const NOMINAL_TEMP_DC: i16 = 200;

/// Levels last written by the controller, one flag per output line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputLevels {
    pub drive_inhibit: bool,
    pub charge_inhibit: bool,
    pub heater: bool,
    /// One entry per pack, LSB-ordered like the engine's mask.
    pub pack_inhibit: [bool; 8],
}

#[derive(Debug)]
struct BenchState {
    lines: SignalSnapshot,
    packs: u8,
    cells_per_pack: u16,
    cells_mv: Vec<i32>,
    temp_dc: i16,
    signal_failures_left: u32,
    bus_failures_left: u32,
    outputs: OutputLevels,
}

impl BenchState {
    fn nominal_lines() -> SignalSnapshot {
        SignalSnapshot {
            ignition: true,
            ..SignalSnapshot::default()
        }
    }

    fn cell_index(&self, pack: u8, cell: u16) -> Option<usize> {
        if pack >= self.packs || cell >= self.cells_per_pack {
            tracing::warn!(pack, cell, "bench poke outside topology ignored");
            return None;
        }
        Some(usize::from(pack) * usize::from(self.cells_per_pack) + usize::from(cell))
    }
}

/// Operator handle on the simulated bench.
#[derive(Clone)]
pub struct Charger {
    state: Arc<Mutex<BenchState>>,
}

impl Charger {
    /// A bench with all cells nominal, ignition on, and nothing inhibiting.
    #[must_use]
    pub fn new(packs: u8, cells_per_pack: u16) -> Self {
        let n = usize::from(packs) * usize::from(cells_per_pack);
        Self {
            state: Arc::new(Mutex::new(BenchState {
                lines: BenchState::nominal_lines(),
                packs,
                cells_per_pack,
                cells_mv: vec![NOMINAL_MV; n],
                temp_dc: NOMINAL_TEMP_DC,
                signal_failures_left: 0,
                bus_failures_left: 0,
                outputs: OutputLevels::default(),
            })),
        }
    }

    /// The three engine endpoints backed by this bench.
    #[must_use]
    pub fn endpoints(&self) -> (BenchSignals, BenchBus, BenchOutputs) {
        (
            BenchSignals(self.state.clone()),
            BenchBus(self.state.clone()),
            BenchOutputs(self.state.clone()),
        )
    }

    fn lock(&self) -> MutexGuard<'_, BenchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restore the nominal bench state: ignition on, charge not requested,
    /// no overrides, every cell nominal, temperate pack, no pending
    /// injected failures. Output observers are left as last written.
    pub fn reset(&self) {
        let mut s = self.lock();
        s.lines = BenchState::nominal_lines();
        for mv in &mut s.cells_mv {
            *mv = NOMINAL_MV;
        }
        s.temp_dc = NOMINAL_TEMP_DC;
        s.signal_failures_left = 0;
        s.bus_failures_left = 0;
    }

    pub fn set_ignition(&self, on: bool) {
        self.lock().lines.ignition = on;
    }

    pub fn set_charge_enable(&self, on: bool) {
        self.lock().lines.charge_enable = on;
    }

    pub fn set_charger_inhibit(&self, on: bool) {
        self.lock().lines.charger_inhibit = on;
    }

    pub fn set_batt1_inhibit(&self, on: bool) {
        self.lock().lines.batt1_inhibit = on;
    }

    pub fn set_batt2_inhibit(&self, on: bool) {
        self.lock().lines.batt2_inhibit = on;
    }

    pub fn set_heater_enable(&self, on: bool) {
        self.lock().lines.heater_enable = on;
    }

    /// Pin one cell to an arbitrary voltage.
    pub fn set_cell_mv(&self, pack: u8, cell: u16, mv: i32) {
        let mut s = self.lock();
        if let Some(i) = s.cell_index(pack, cell) {
            s.cells_mv[i] = mv;
        }
    }

    /// Drag one cell below the empty threshold.
    pub fn force_empty(&self, pack: u8, cell: u16) {
        self.set_cell_mv(pack, cell, EMPTY_MV);
    }

    /// Push one cell above the full threshold.
    pub fn force_full(&self, pack: u8, cell: u16) {
        self.set_cell_mv(pack, cell, FULL_MV);
    }

    /// Make one cell read like a broken sensor.
    pub fn force_fault(&self, pack: u8, cell: u16) {
        self.set_cell_mv(pack, cell, FAULT_MV);
    }

    /// Bring one cell back to the nominal voltage.
    pub fn restore_cell(&self, pack: u8, cell: u16) {
        self.set_cell_mv(pack, cell, NOMINAL_MV);
    }

    /// Pack temperature in tenths of a degree Celsius, shared by all cells.
    pub fn set_temp_dc(&self, temp_dc: i16) {
        self.lock().temp_dc = temp_dc;
    }

    /// Fail the next `n` signal captures.
    pub fn fail_signal_captures(&self, n: u32) {
        self.lock().signal_failures_left = n;
    }

    /// Fail the next `n` cell bus polls.
    pub fn fail_bus_polls(&self, n: u32) {
        self.lock().bus_failures_left = n;
    }

    /// Levels last written by the controller.
    #[must_use]
    pub fn outputs(&self) -> OutputLevels {
        self.lock().outputs
    }
}

impl core::fmt::Debug for Charger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = self.lock();
        f.debug_struct("Charger")
            .field("lines", &s.lines)
            .field("temp_dc", &s.temp_dc)
            .field("outputs", &s.outputs)
            .finish()
    }
}

fn lock_shared(state: &Arc<Mutex<BenchState>>) -> MutexGuard<'_, BenchState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `SignalSource` half of the bench.
pub struct BenchSignals(Arc<Mutex<BenchState>>);

impl SignalSource for BenchSignals {
    fn capture(&mut self) -> Result<SignalSnapshot, Box<dyn std::error::Error + Send + Sync>> {
        let mut s = lock_shared(&self.0);
        if s.signal_failures_left > 0 {
            s.signal_failures_left -= 1;
            return Err(Box::new(HwError::Injected("signal capture")));
        }
        Ok(s.lines)
    }
}

/// `CellBus` half of the bench; every poll scans the full topology.
pub struct BenchBus(Arc<Mutex<BenchState>>);

impl CellBus for BenchBus {
    fn poll(
        &mut self,
        _timeout: Duration,
    ) -> Result<Vec<CellSample>, Box<dyn std::error::Error + Send + Sync>> {
        let mut s = lock_shared(&self.0);
        if s.bus_failures_left > 0 {
            s.bus_failures_left -= 1;
            return Err(Box::new(HwError::Injected("cell bus poll")));
        }
        let mut scan = Vec::with_capacity(s.cells_mv.len());
        for pack in 0..s.packs {
            for cell in 0..s.cells_per_pack {
                let i = usize::from(pack) * usize::from(s.cells_per_pack) + usize::from(cell);
                scan.push(CellSample {
                    pack,
                    cell,
                    millivolts: s.cells_mv[i],
                    temp_dc: s.temp_dc,
                });
            }
        }
        Ok(scan)
    }
}

/// `InhibitBank` half of the bench; writes land in the observer struct.
pub struct BenchOutputs(Arc<Mutex<BenchState>>);

impl InhibitBank for BenchOutputs {
    fn set_drive_inhibit(
        &mut self,
        active: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        lock_shared(&self.0).outputs.drive_inhibit = active;
        Ok(())
    }

    fn set_charge_inhibit(
        &mut self,
        active: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        lock_shared(&self.0).outputs.charge_inhibit = active;
        Ok(())
    }

    fn set_heater(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        lock_shared(&self.0).outputs.heater = on;
        Ok(())
    }

    fn set_pack_inhibit(
        &mut self,
        pack: u8,
        active: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut s = lock_shared(&self.0);
        if usize::from(pack) < s.outputs.pack_inhibit.len() {
            s.outputs.pack_inhibit[usize::from(pack)] = active;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_restores_nominal_lines_and_cells() {
        let bench = Charger::new(2, 2);
        bench.set_ignition(false);
        bench.set_charge_enable(true);
        bench.force_empty(0, 1);
        bench.set_temp_dc(550);
        bench.reset();

        let (mut signals, mut bus, _) = bench.endpoints();
        let snap = signals.capture().unwrap();
        assert!(snap.ignition);
        assert!(!snap.charge_enable);
        let scan = bus.poll(Duration::from_millis(1)).unwrap();
        assert_eq!(scan.len(), 4);
        assert!(scan.iter().all(|c| c.millivolts == NOMINAL_MV));
        assert!(scan.iter().all(|c| c.temp_dc == NOMINAL_TEMP_DC));
    }

    #[test]
    fn forced_cell_shows_up_in_the_scan() {
        let bench = Charger::new(1, 3);
        bench.force_fault(0, 2);
        let (_, mut bus, _) = bench.endpoints();
        let scan = bus.poll(Duration::from_millis(1)).unwrap();
        assert_eq!(scan[2].millivolts, FAULT_MV);
        assert_eq!(scan[0].millivolts, NOMINAL_MV);
    }

    #[test]
    fn pokes_outside_the_topology_are_ignored() {
        let bench = Charger::new(1, 1);
        bench.force_empty(3, 0);
        bench.force_empty(0, 9);
        let (_, mut bus, _) = bench.endpoints();
        let scan = bus.poll(Duration::from_millis(1)).unwrap();
        assert_eq!(scan.len(), 1);
        assert_eq!(scan[0].millivolts, NOMINAL_MV);
    }

    #[test]
    fn injected_failures_burn_down_then_recover() {
        let bench = Charger::new(1, 1);
        bench.fail_signal_captures(2);
        bench.fail_bus_polls(1);
        let (mut signals, mut bus, _) = bench.endpoints();
        assert!(signals.capture().is_err());
        assert!(signals.capture().is_err());
        assert!(signals.capture().is_ok());
        assert!(bus.poll(Duration::from_millis(1)).is_err());
        assert!(bus.poll(Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn output_writes_are_observable() {
        let bench = Charger::new(2, 1);
        let (_, _, mut outputs) = bench.endpoints();
        outputs.set_drive_inhibit(true).unwrap();
        outputs.set_heater(true).unwrap();
        outputs.set_pack_inhibit(1, true).unwrap();
        let seen = bench.outputs();
        assert!(seen.drive_inhibit);
        assert!(!seen.charge_inhibit);
        assert!(seen.heater);
        assert!(seen.pack_inhibit[1]);
        assert!(!seen.pack_inhibit[0]);
    }
}
