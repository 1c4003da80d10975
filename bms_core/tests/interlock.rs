//! Engine scenarios against scripted endpoints: each test drives a small
//! two-pack, two-cell topology through a few cycles and watches the levels
//! the engine writes out.

use bms_core::error::TripReason;
use bms_core::{
    ChargeCfg, CycleCfg, CycleStatus, DebounceCfg, InterlockG, InterlockKind, SafetyCfg,
    ThresholdCfg, Topology, build_interlock,
};
use bms_traits::clock::Clock;
use bms_traits::{CellBus, CellSample, InhibitBank, SignalSnapshot, SignalSource};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Replays a snapshot sequence, holding the last one forever.
struct ScriptSignals {
    script: Vec<SignalSnapshot>,
    at: usize,
}

impl ScriptSignals {
    fn new(script: Vec<SignalSnapshot>) -> Self {
        Self { script, at: 0 }
    }
    fn hold(snap: SignalSnapshot) -> Self {
        Self::new(vec![snap])
    }
}

impl SignalSource for ScriptSignals {
    fn capture(&mut self) -> Result<SignalSnapshot, DynError> {
        let snap = self.script[self.at.min(self.script.len() - 1)];
        self.at += 1;
        Ok(snap)
    }
}

/// Serves the shared scan on every poll; tests mutate it mid-run.
struct SharedBus(Arc<Mutex<Vec<CellSample>>>);

impl CellBus for SharedBus {
    fn poll(&mut self, _timeout: Duration) -> Result<Vec<CellSample>, DynError> {
        Ok(self.0.lock().unwrap().clone())
    }
}

/// A signal harness that never answers.
struct DeadSignals;

impl SignalSource for DeadSignals {
    fn capture(&mut self) -> Result<SignalSnapshot, DynError> {
        Err("line driver unresponsive".into())
    }
}

/// A cell bus that never answers.
struct DeadBus;

impl CellBus for DeadBus {
    fn poll(&mut self, _timeout: Duration) -> Result<Vec<CellSample>, DynError> {
        Err("bus transceiver offline".into())
    }
}

/// Hand-cranked clock; `sleep` advances time instead of blocking.
#[derive(Clone)]
struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    fn advance(&self, d: Duration) {
        *self.offset.lock().unwrap() += d;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct OutputLevels {
    drive: bool,
    charge: bool,
    heater: bool,
    packs: [bool; 8],
}

#[derive(Clone, Default)]
struct RecordingOutputs(Arc<Mutex<OutputLevels>>);

impl RecordingOutputs {
    fn levels(&self) -> OutputLevels {
        *self.0.lock().unwrap()
    }
}

impl InhibitBank for RecordingOutputs {
    fn set_drive_inhibit(&mut self, active: bool) -> Result<(), DynError> {
        self.0.lock().unwrap().drive = active;
        Ok(())
    }
    fn set_charge_inhibit(&mut self, active: bool) -> Result<(), DynError> {
        self.0.lock().unwrap().charge = active;
        Ok(())
    }
    fn set_heater(&mut self, on: bool) -> Result<(), DynError> {
        self.0.lock().unwrap().heater = on;
        Ok(())
    }
    fn set_pack_inhibit(&mut self, pack: u8, active: bool) -> Result<(), DynError> {
        self.0.lock().unwrap().packs[usize::from(pack)] = active;
        Ok(())
    }
}

fn cell(pack: u8, idx: u16, mv: i32) -> CellSample {
    CellSample {
        pack,
        cell: idx,
        millivolts: mv,
        temp_dc: 200,
    }
}

fn nominal_scan() -> Vec<CellSample> {
    vec![
        cell(0, 0, 3_700),
        cell(0, 1, 3_700),
        cell(1, 0, 3_700),
        cell(1, 1, 3_700),
    ]
}

fn set_temps(scan: &Arc<Mutex<Vec<CellSample>>>, temp_dc: i16) {
    for c in scan.lock().unwrap().iter_mut() {
        c.temp_dc = temp_dc;
    }
}

/// Ignition on, no charge request.
fn driving() -> SignalSnapshot {
    SignalSnapshot {
        ignition: true,
        ..SignalSnapshot::default()
    }
}

/// Ignition on and charge requested; nothing inhibiting.
fn charging() -> SignalSnapshot {
    SignalSnapshot {
        ignition: true,
        charge_enable: true,
        ..SignalSnapshot::default()
    }
}

fn engine<G: SignalSource + 'static>(
    signals: G,
    scan: Arc<Mutex<Vec<CellSample>>>,
    outputs: RecordingOutputs,
) -> InterlockG<G, SharedBus, RecordingOutputs> {
    let mut core = build_interlock(
        signals,
        SharedBus(scan),
        outputs,
        Topology {
            packs: 2,
            cells_per_pack: 2,
        },
        ThresholdCfg::default(),
        DebounceCfg::default(),
        // Fast cycles so tests sleep microseconds, not hundreds of ms
        CycleCfg {
            rate_hz: 1_000,
            bus_timeout_ms: 1,
            bus_ttl_ms: 5_000,
        },
        SafetyCfg::default(),
        ChargeCfg::default(),
        None,
    )
    .expect("engine builds");
    core.arm();
    core
}

#[test]
fn ignition_off_inhibits_drive_only() {
    let scan = Arc::new(Mutex::new(nominal_scan()));
    let outputs = RecordingOutputs::default();
    let snap = SignalSnapshot {
        charge_enable: true,
        ..SignalSnapshot::default()
    };
    let mut core = engine(ScriptSignals::hold(snap), scan, outputs.clone());

    assert!(matches!(core.step().unwrap(), CycleStatus::Cycling));
    assert_eq!(core.kind(), InterlockKind::DriveInhibited);
    let lv = outputs.levels();
    assert!(lv.drive);
    assert!(!lv.charge);
}

#[test]
fn empty_cell_bars_drive_not_charge() {
    let scan = Arc::new(Mutex::new(nominal_scan()));
    let outputs = RecordingOutputs::default();
    let mut core = engine(ScriptSignals::hold(charging()), scan.clone(), outputs.clone());

    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::Armed);

    // Exactly at the threshold is still Normal
    scan.lock().unwrap()[1].millivolts = 2_900;
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::Armed);

    // Strictly below asserts drive on the same cycle
    scan.lock().unwrap()[1].millivolts = 2_899;
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::DriveInhibited);
    let lv = outputs.levels();
    assert!(lv.drive);
    assert!(!lv.charge);
}

#[test]
fn full_cell_bars_charge_not_drive() {
    let scan = Arc::new(Mutex::new(nominal_scan()));
    let outputs = RecordingOutputs::default();
    let mut core = engine(ScriptSignals::hold(charging()), scan.clone(), outputs.clone());

    scan.lock().unwrap()[2].millivolts = 4_000;
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::Armed);

    scan.lock().unwrap()[2].millivolts = 4_001;
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::ChargeInhibited);
    let lv = outputs.levels();
    assert!(!lv.drive);
    assert!(lv.charge);
}

#[test]
fn implausible_reading_bars_both() {
    let scan = Arc::new(Mutex::new(nominal_scan()));
    let outputs = RecordingOutputs::default();
    let mut core = engine(ScriptSignals::hold(charging()), scan.clone(), outputs.clone());

    scan.lock().unwrap()[0].millivolts = 400; // below the sensor fault floor
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::BothInhibited);
    let lv = outputs.levels();
    assert!(lv.drive);
    assert!(lv.charge);
}

#[test]
fn dropping_the_charge_request_asserts_charge_inhibit() {
    let scan = Arc::new(Mutex::new(nominal_scan()));
    let outputs = RecordingOutputs::default();
    let mut core = engine(
        ScriptSignals::new(vec![charging(), driving()]),
        scan,
        outputs.clone(),
    );

    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::Armed);
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::ChargeInhibited);
    assert!(!outputs.levels().drive);
}

#[test]
fn charger_inhibit_line_bars_charge() {
    let scan = Arc::new(Mutex::new(nominal_scan()));
    let outputs = RecordingOutputs::default();
    let snap = SignalSnapshot {
        charger_inhibit: true,
        ..charging()
    };
    let mut core = engine(ScriptSignals::hold(snap), scan, outputs.clone());

    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::ChargeInhibited);
}

#[test]
fn manual_override_forces_both_and_its_pack_contactor() {
    let scan = Arc::new(Mutex::new(nominal_scan()));
    let outputs = RecordingOutputs::default();
    let snap = SignalSnapshot {
        batt2_inhibit: true,
        ..charging()
    };
    let mut core = engine(ScriptSignals::hold(snap), scan, outputs.clone());

    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::BothInhibited);
    let lv = outputs.levels();
    assert!(lv.drive);
    assert!(lv.charge);
    assert!(!lv.packs[0]);
    assert!(lv.packs[1]);
    let report = core.report().unwrap();
    assert_eq!(report.pack_inhibit_mask, 0b10);
}

#[test]
fn over_temperature_bars_both_then_releases_with_debounce() {
    let scan = Arc::new(Mutex::new(nominal_scan()));
    let outputs = RecordingOutputs::default();
    let mut core = engine(ScriptSignals::hold(charging()), scan.clone(), outputs.clone());

    set_temps(&scan, 500); // exactly 50.0C trips the hot bar
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::BothInhibited);
    assert_eq!(core.charge_limit_da(), 0);

    // Cooling down releases only after three consecutive clear cycles
    set_temps(&scan, 200);
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::BothInhibited);
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::BothInhibited);
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::Armed);
    assert_eq!(core.charge_limit_da(), 1_250);
}

#[test]
fn too_cold_bars_charge_and_runs_the_heater() {
    let scan = Arc::new(Mutex::new(nominal_scan()));
    let outputs = RecordingOutputs::default();
    let mut core = engine(ScriptSignals::hold(charging()), scan.clone(), outputs.clone());

    set_temps(&scan, -150); // -15.0C
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::ChargeInhibited);
    assert_eq!(core.charge_limit_da(), 0);
    let lv = outputs.levels();
    assert!(!lv.drive);
    assert!(lv.heater);
}

#[test]
fn heater_stays_off_without_a_charge_request() {
    let scan = Arc::new(Mutex::new(nominal_scan()));
    let outputs = RecordingOutputs::default();
    let mut core = engine(ScriptSignals::hold(driving()), scan.clone(), outputs.clone());

    set_temps(&scan, -150);
    core.step().unwrap();
    assert!(!outputs.levels().heater);
    assert!(!core.heater_on());
}

#[test]
fn pack_imbalance_inhibits_contactors_but_not_the_vehicle() {
    let scan = Arc::new(Mutex::new(vec![
        cell(0, 0, 3_700),
        cell(0, 1, 3_700),
        cell(1, 0, 3_690),
        cell(1, 1, 3_695),
    ]));
    let outputs = RecordingOutputs::default();
    let mut core = engine(ScriptSignals::hold(charging()), scan, outputs.clone());

    core.step().unwrap();
    // 15 mV pack delta crosses the 10 mV limit
    assert_eq!(core.kind(), InterlockKind::Armed);
    let lv = outputs.levels();
    assert!(!lv.drive);
    assert!(!lv.charge);
    assert!(lv.packs[0]);
    assert!(lv.packs[1]);
    let report = core.report().unwrap();
    assert_eq!(report.error_byte & 0b010, 0b010);
}

#[test]
fn charge_limit_derates_with_the_hottest_cell() {
    let scan = Arc::new(Mutex::new(nominal_scan()));
    let outputs = RecordingOutputs::default();
    let mut core = engine(ScriptSignals::hold(charging()), scan.clone(), outputs);

    core.step().unwrap();
    assert_eq!(core.charge_limit_da(), 1_250); // 20.0C, full current

    set_temps(&scan, 250);
    core.step().unwrap();
    assert_eq!(core.charge_limit_da(), 665); // halfway down the taper

    set_temps(&scan, 300);
    core.step().unwrap();
    assert_eq!(core.charge_limit_da(), 80); // floor of the taper
}

#[test]
fn status_byte_tracks_signals_and_state() {
    let scan = Arc::new(Mutex::new(nominal_scan()));
    let outputs = RecordingOutputs::default();
    let snap = SignalSnapshot {
        charger_inhibit: true,
        ..charging()
    };
    let mut core = engine(ScriptSignals::hold(snap), scan, outputs);

    core.step().unwrap();
    let report = core.report().unwrap();
    // charge inhibit | ignition<<3 | charge_enable<<4
    assert_eq!(report.status_byte, 0b11001);
    assert_eq!(report.error_byte, 0);
}

#[test]
fn heater_input_line_is_captured_but_drives_nothing() {
    let scan = Arc::new(Mutex::new(nominal_scan()));
    let outputs = RecordingOutputs::default();
    let snap = SignalSnapshot {
        heater_enable: true,
        ..charging()
    };
    let mut core = engine(ScriptSignals::hold(snap), scan, outputs.clone());

    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::Armed);
    assert!(!outputs.levels().heater);
    assert!(core.report().unwrap().snapshot.heater_enable);
}

#[test]
fn signal_loss_trip_publishes_the_tripped_bit_and_parks_safe() {
    let scan = Arc::new(Mutex::new(nominal_scan()));
    let outputs = RecordingOutputs::default();
    let mut core = build_interlock(
        DeadSignals,
        SharedBus(scan),
        outputs.clone(),
        Topology {
            packs: 2,
            cells_per_pack: 2,
        },
        ThresholdCfg::default(),
        DebounceCfg::default(),
        CycleCfg {
            rate_hz: 1_000,
            bus_timeout_ms: 1,
            bus_ttl_ms: 5_000,
        },
        SafetyCfg {
            signal_fault_limit: 2,
            bus_silence_ms: 30_000,
        },
        ChargeCfg::default(),
        None,
    )
    .expect("engine builds");
    core.arm();

    // First failed capture evaluates on the inhibited snapshot
    assert!(matches!(core.step().unwrap(), CycleStatus::Cycling));
    // Second one hits the streak limit
    assert!(matches!(core.step().unwrap(), CycleStatus::Tripped(_)));
    assert_eq!(core.trip_reason(), Some(TripReason::SignalLoss));

    let report = core.report().unwrap();
    assert_eq!(report.error_byte & 0b001, 0b001);
    assert!(report.state.drive_inhibit);
    assert!(report.state.charge_inhibit);
    assert!(report.signal_fault);
    assert_eq!(report.charge_limit_da, 0);
    let lv = outputs.levels();
    assert!(lv.drive);
    assert!(lv.charge);
    assert!(lv.packs[0] && lv.packs[1]);
}

#[test]
fn silent_bus_trips_after_the_hard_window() {
    let outputs = RecordingOutputs::default();
    let clock = ManualClock::new();
    let mut core = build_interlock(
        ScriptSignals::hold(charging()),
        DeadBus,
        outputs.clone(),
        Topology {
            packs: 2,
            cells_per_pack: 2,
        },
        ThresholdCfg::default(),
        DebounceCfg::default(),
        CycleCfg {
            rate_hz: 1_000,
            bus_timeout_ms: 1,
            bus_ttl_ms: 50,
        },
        SafetyCfg {
            signal_fault_limit: 10,
            bus_silence_ms: 200,
        },
        ChargeCfg::default(),
        Some(Box::new(clock.clone())),
    )
    .expect("engine builds");
    core.arm();

    // Inside the window a dead bus only degrades readings to Fault
    assert!(matches!(core.step().unwrap(), CycleStatus::Cycling));
    assert_eq!(core.kind(), InterlockKind::BothInhibited);
    assert!(!core.is_tripped());

    clock.advance(Duration::from_millis(250));
    assert!(matches!(core.step().unwrap(), CycleStatus::Tripped(_)));
    assert_eq!(core.trip_reason(), Some(TripReason::BusSilence));
    let report = core.report().unwrap();
    assert_eq!(report.error_byte & 0b101, 0b101); // tripped and bus-stale
    let lv = outputs.levels();
    assert!(lv.drive && lv.charge);

    // Latched until a manual re-arm
    assert!(matches!(core.step().unwrap(), CycleStatus::Tripped(_)));
    core.arm();
    assert!(!core.is_tripped());
    assert!(matches!(core.step().unwrap(), CycleStatus::Cycling));
}
