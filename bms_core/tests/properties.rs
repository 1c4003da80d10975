//! Property tests for the pure pieces: classification, the worst-case fold,
//! and the asymmetric debounce.

use bms_core::cell::{CellLimits, CellReading, CellStatus, classify_mv};
use bms_core::monitor::aggregate;
use bms_core::outputs::DebouncedLine;
use proptest::prelude::*;
use rstest::rstest;

fn limits() -> CellLimits {
    CellLimits {
        empty_mv: 2_900,
        full_mv: 4_000,
        fault_floor_mv: 500,
        fault_ceil_mv: 5_000,
    }
}

proptest! {
    /// Classification agrees with the threshold definitions for any voltage.
    #[test]
    fn classify_matches_the_threshold_rules(mv in -10_000i32..10_000) {
        let l = limits();
        let status = classify_mv(mv, &l);
        let expected = if mv < l.fault_floor_mv || mv > l.fault_ceil_mv {
            CellStatus::Fault
        } else if mv < l.empty_mv {
            CellStatus::Empty
        } else if mv > l.full_mv {
            CellStatus::Full
        } else {
            CellStatus::Normal
        };
        prop_assert_eq!(status, expected);
    }

    /// The fold reports exactly the statuses present and the true extremes
    /// over live cells.
    #[test]
    fn aggregate_reflects_its_inputs(mvs in prop::collection::vec(-1_000i32..7_000, 1..64)) {
        let l = limits();
        let readings: Vec<CellReading> = mvs
            .iter()
            .enumerate()
            .map(|(i, &mv)| CellReading {
                pack: (i % 2) as u8,
                cell: (i / 2) as u16,
                millivolts: mv,
                temp_dc: 200,
                status: classify_mv(mv, &l),
            })
            .collect();

        let b = aggregate(&readings).unwrap();

        prop_assert_eq!(b.any_empty, readings.iter().any(|r| r.status == CellStatus::Empty));
        prop_assert_eq!(b.any_full, readings.iter().any(|r| r.status == CellStatus::Full));
        prop_assert_eq!(b.any_fault, readings.iter().any(|r| r.status == CellStatus::Fault));
        prop_assert_eq!(b.cell_count, readings.len());

        let worst_severity = readings.iter().map(|r| r.status.severity()).max().unwrap();
        prop_assert_eq!(b.worst.severity(), worst_severity);

        let live: Vec<&CellReading> =
            readings.iter().filter(|r| r.status != CellStatus::Fault).collect();
        if live.is_empty() {
            prop_assert_eq!(b.low_mv, 0);
            prop_assert_eq!(b.high_mv, 0);
        } else {
            prop_assert!(live.iter().all(|r| b.low_mv <= r.millivolts));
            prop_assert!(live.iter().all(|r| b.high_mv >= r.millivolts));
        }
    }

    /// The debounced line matches a straightforward reference model over any
    /// demand sequence: assert immediately, release after N clear updates.
    #[test]
    fn debounce_matches_the_reference_model(
        release_n in 1u8..6,
        demands in prop::collection::vec(any::<bool>(), 0..64),
    ) {
        let mut line = DebouncedLine::new(release_n);
        let mut model_active = false;
        let mut model_clear_run = 0u8;
        for demand in demands {
            let got = line.update(demand);
            if demand {
                model_active = true;
                model_clear_run = 0;
            } else if model_active {
                model_clear_run += 1;
                if model_clear_run >= release_n {
                    model_active = false;
                    model_clear_run = 0;
                }
            }
            prop_assert_eq!(got, model_active);
        }
    }

    /// A settled clear line stays clear; a settled asserted line stays
    /// asserted while demand holds.
    #[test]
    fn settled_lines_do_not_chatter(release_n in 1u8..6) {
        let mut line = DebouncedLine::new(release_n);
        for _ in 0..release_n {
            prop_assert!(!line.update(false));
        }
        prop_assert!(line.update(true));
        for _ in 0..10 {
            prop_assert!(line.update(true));
        }
    }
}

#[rstest]
#[case(1, 1)]
#[case(3, 3)]
#[case(5, 5)]
fn release_takes_exactly_n_clear_cycles(#[case] release_n: u8, #[case] expected: u32) {
    let mut line = DebouncedLine::new(release_n);
    assert!(line.update(true));
    let mut clears = 0u32;
    while line.update(false) {
        clears += 1;
        assert!(clears < 100, "line never released");
    }
    // The update that returned false is the Nth clear cycle
    assert_eq!(clears + 1, expected);
}
