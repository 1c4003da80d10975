//! End-to-end scenarios driven through the simulated bench: an operator
//! `Charger` handle on one side, the interlock engine in the middle, and the
//! bench's output observers on the other.

use bms_core::{
    ChargeCfg, CycleCfg, CycleStatus, DebounceCfg, InterlockKind, SafetyCfg, ThresholdCfg,
    Topology, build_interlock,
};
use bms_hardware::Charger;
use bms_hardware::bench::{BenchBus, BenchOutputs, BenchSignals};

type Engine = bms_core::InterlockG<BenchSignals, BenchBus, BenchOutputs>;

fn engine(bench: &Charger) -> Engine {
    let (signals, bus, outputs) = bench.endpoints();
    let mut core = build_interlock(
        signals,
        bus,
        outputs,
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
            signal_fault_limit: 3,
            bus_silence_ms: 30_000,
        },
        ChargeCfg::default(),
        None,
    )
    .expect("engine builds");
    core.arm();
    core
}

fn step(core: &mut Engine) -> CycleStatus {
    core.step().expect("step succeeds")
}

/// The original tester's scenario: ignition on, charge not requested, no
/// overrides, heater line off; one cell goes empty and drive inhibit must
/// follow within a cycle.
#[test]
fn empty_cell_while_driving_inhibits_drive() {
    let bench = Charger::new(2, 2);
    bench.reset();
    bench.set_ignition(true);
    bench.set_charge_enable(false);
    bench.set_batt1_inhibit(false);
    bench.set_batt2_inhibit(false);
    bench.set_charger_inhibit(false);
    bench.set_heater_enable(false);
    let mut core = engine(&bench);

    step(&mut core);
    assert!(!bench.outputs().drive_inhibit);

    bench.force_empty(0, 1);
    step(&mut core);
    assert!(bench.outputs().drive_inhibit);
}

#[test]
fn ignition_off_inhibits_drive_whatever_the_cells_say() {
    let bench = Charger::new(2, 2);
    bench.set_ignition(false);
    let mut core = engine(&bench);

    step(&mut core);
    assert!(bench.outputs().drive_inhibit);

    // Even a freshly forced-full pack changes nothing about drive
    bench.force_full(1, 0);
    step(&mut core);
    assert!(bench.outputs().drive_inhibit);
}

#[test]
fn nominal_drive_leaves_drive_clear_and_charge_barred() {
    let bench = Charger::new(2, 2);
    let mut core = engine(&bench);

    step(&mut core);
    let lv = bench.outputs();
    assert!(!lv.drive_inhibit);
    assert!(lv.charge_inhibit); // charge not requested
    assert_eq!(core.kind(), InterlockKind::ChargeInhibited);
}

#[test]
fn faulted_cell_bars_both_within_one_cycle() {
    let bench = Charger::new(2, 2);
    bench.set_charge_enable(true);
    let mut core = engine(&bench);

    step(&mut core);
    assert_eq!(core.kind(), InterlockKind::Armed);

    bench.force_fault(1, 1);
    step(&mut core);
    let lv = bench.outputs();
    assert!(lv.drive_inhibit);
    assert!(lv.charge_inhibit);
}

#[test]
fn restored_cell_releases_only_after_three_clear_cycles() {
    let bench = Charger::new(2, 2);
    let mut core = engine(&bench);

    bench.force_empty(0, 0);
    step(&mut core);
    assert!(bench.outputs().drive_inhibit);

    bench.restore_cell(0, 0);
    step(&mut core);
    assert!(bench.outputs().drive_inhibit);
    step(&mut core);
    assert!(bench.outputs().drive_inhibit);
    step(&mut core);
    assert!(!bench.outputs().drive_inhibit);
}

#[test]
fn settled_inputs_are_idempotent() {
    let bench = Charger::new(2, 2);
    bench.set_charge_enable(true);
    let mut core = engine(&bench);

    for _ in 0..5 {
        step(&mut core);
    }
    let settled = bench.outputs();
    let kind = core.kind();
    for _ in 0..10 {
        step(&mut core);
        assert_eq!(bench.outputs(), settled);
        assert_eq!(core.kind(), kind);
    }
}

#[test]
fn manual_override_bars_both_and_closes_that_packs_contactor() {
    let bench = Charger::new(2, 2);
    bench.set_charge_enable(true);
    bench.set_batt1_inhibit(true);
    let mut core = engine(&bench);

    step(&mut core);
    let lv = bench.outputs();
    assert!(lv.drive_inhibit);
    assert!(lv.charge_inhibit);
    assert!(lv.pack_inhibit[0]);
    assert!(!lv.pack_inhibit[1]);
}

#[test]
fn cold_pack_heats_while_charge_waits() {
    let bench = Charger::new(2, 2);
    bench.set_charge_enable(true);
    bench.set_temp_dc(-150);
    let mut core = engine(&bench);

    step(&mut core);
    let lv = bench.outputs();
    assert!(!lv.drive_inhibit);
    assert!(lv.charge_inhibit);
    assert!(lv.heater);

    // Once the pack warms up, charge releases and the heater stops
    bench.set_temp_dc(bms_hardware::bench::NOMINAL_TEMP_DC);
    for _ in 0..3 {
        step(&mut core);
    }
    let lv = bench.outputs();
    assert!(!lv.charge_inhibit);
    assert!(!lv.heater);
}

#[test]
fn one_dropped_capture_inhibits_that_cycle_only() {
    let bench = Charger::new(2, 2);
    let mut core = engine(&bench);

    step(&mut core);
    assert!(!bench.outputs().drive_inhibit);

    bench.fail_signal_captures(1);
    assert!(matches!(step(&mut core), CycleStatus::Cycling));
    // The safe-default snapshot reads as inhibited
    assert!(bench.outputs().drive_inhibit);
    assert!(bench.outputs().charge_inhibit);
    assert!(core.report().unwrap().signal_fault);

    // Real levels return; drive releases after the debounce window
    for _ in 0..3 {
        step(&mut core);
    }
    assert!(!bench.outputs().drive_inhibit);
}

#[test]
fn capture_failure_streak_trips_until_rearmed() {
    let bench = Charger::new(2, 2);
    let mut core = engine(&bench);

    step(&mut core);
    bench.fail_signal_captures(3);
    assert!(matches!(step(&mut core), CycleStatus::Cycling));
    assert!(matches!(step(&mut core), CycleStatus::Cycling));
    assert!(matches!(step(&mut core), CycleStatus::Tripped(_)));
    assert!(core.is_tripped());

    // Latched: healthy captures no longer matter, outputs stay parked
    assert!(matches!(step(&mut core), CycleStatus::Tripped(_)));
    let lv = bench.outputs();
    assert!(lv.drive_inhibit);
    assert!(lv.charge_inhibit);
    assert!(lv.pack_inhibit[0] && lv.pack_inhibit[1]);

    // Manual reset arms again and normal cycling resumes
    core.arm();
    assert!(matches!(step(&mut core), CycleStatus::Cycling));
    assert!(!core.is_tripped());
}

#[test]
fn dropped_bus_polls_ride_through_on_the_last_scan() {
    let bench = Charger::new(2, 2);
    let mut core = engine(&bench);

    step(&mut core);
    assert!(!bench.outputs().drive_inhibit);

    // Freshness TTL is far away, so a few missed polls change nothing
    bench.fail_bus_polls(5);
    for _ in 0..5 {
        assert!(matches!(step(&mut core), CycleStatus::Cycling));
        assert!(!bench.outputs().drive_inhibit);
    }
}
