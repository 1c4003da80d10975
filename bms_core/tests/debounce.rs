//! Release debouncing observed through whole engine cycles.

use bms_core::{
    ChargeCfg, CycleCfg, DebounceCfg, InterlockG, InterlockKind, SafetyCfg, ThresholdCfg,
    Topology, build_interlock,
};
use bms_traits::{CellBus, CellSample, InhibitBank, SignalSnapshot, SignalSource};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type DynError = Box<dyn std::error::Error + Send + Sync>;

struct HoldSignals(SignalSnapshot);

impl SignalSource for HoldSignals {
    fn capture(&mut self) -> Result<SignalSnapshot, DynError> {
        Ok(self.0)
    }
}

struct SharedBus(Arc<Mutex<Vec<CellSample>>>);

impl CellBus for SharedBus {
    fn poll(&mut self, _timeout: Duration) -> Result<Vec<CellSample>, DynError> {
        Ok(self.0.lock().unwrap().clone())
    }
}

struct NullOutputs;

impl InhibitBank for NullOutputs {
    fn set_drive_inhibit(&mut self, _active: bool) -> Result<(), DynError> {
        Ok(())
    }
    fn set_charge_inhibit(&mut self, _active: bool) -> Result<(), DynError> {
        Ok(())
    }
    fn set_heater(&mut self, _on: bool) -> Result<(), DynError> {
        Ok(())
    }
    fn set_pack_inhibit(&mut self, _pack: u8, _active: bool) -> Result<(), DynError> {
        Ok(())
    }
}

fn scan_at(temp_dc: i16) -> Vec<CellSample> {
    vec![CellSample {
        pack: 0,
        cell: 0,
        millivolts: 3_700,
        temp_dc,
    }]
}

fn charging() -> SignalSnapshot {
    SignalSnapshot {
        ignition: true,
        charge_enable: true,
        ..SignalSnapshot::default()
    }
}

fn engine(scan: Arc<Mutex<Vec<CellSample>>>) -> InterlockG<HoldSignals, SharedBus, NullOutputs> {
    let mut core = build_interlock(
        HoldSignals(charging()),
        SharedBus(scan),
        NullOutputs,
        Topology {
            packs: 1,
            cells_per_pack: 1,
        },
        ThresholdCfg::default(),
        DebounceCfg { release_cycles: 3 },
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
fn release_needs_three_consecutive_clear_cycles() {
    let scan = Arc::new(Mutex::new(scan_at(500)));
    let mut core = engine(scan.clone());

    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::BothInhibited);

    *scan.lock().unwrap() = scan_at(200);
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::BothInhibited);
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::BothInhibited);
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::Armed);
}

#[test]
fn returning_condition_restarts_the_release_run() {
    let scan = Arc::new(Mutex::new(scan_at(500)));
    let mut core = engine(scan.clone());

    core.step().unwrap(); // asserted

    *scan.lock().unwrap() = scan_at(200);
    core.step().unwrap(); // clear 1
    core.step().unwrap(); // clear 2
    *scan.lock().unwrap() = scan_at(500);
    core.step().unwrap(); // condition back, run restarts
    assert_eq!(core.kind(), InterlockKind::BothInhibited);

    *scan.lock().unwrap() = scan_at(200);
    core.step().unwrap();
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::BothInhibited);
    core.step().unwrap();
    assert_eq!(core.kind(), InterlockKind::Armed);
}

#[test]
fn flapping_condition_never_releases() {
    let scan = Arc::new(Mutex::new(scan_at(500)));
    let mut core = engine(scan.clone());

    for i in 0..10 {
        let temp = if i % 2 == 0 { 500 } else { 200 };
        *scan.lock().unwrap() = scan_at(temp);
        core.step().unwrap();
        assert_eq!(core.kind(), InterlockKind::BothInhibited, "cycle {i}");
    }
}

#[test]
fn steady_state_cycles_are_idempotent() {
    let scan = Arc::new(Mutex::new(scan_at(200)));
    let mut core = engine(scan);

    for _ in 0..5 {
        core.step().unwrap();
        assert_eq!(core.kind(), InterlockKind::Armed);
        assert_eq!(core.charge_limit_da(), 1_250);
    }
    assert_eq!(core.cycles(), 5);
    assert_eq!(core.report().unwrap().cycle, 4);
}
