//! Replay a recorded input trace through the engine: one CSV row of line
//! levels and cell extremes per control cycle, last row held while debounce
//! settles.

use bms_config::TraceRow;
use bms_core::{CycleStatus, status::CycleReport};
use bms_traits::{CellBus, CellSample, SignalSnapshot, SignalSource};
use eyre::WrapErr;
use std::path::Path;
use std::time::Duration;

type DynError = Box<dyn std::error::Error + Send + Sync>;

fn row_at(rows: &[TraceRow], at: usize) -> TraceRow {
    rows[at.min(rows.len() - 1)]
}

/// Feeds the trace's line levels, one row per capture, holding the last row.
struct TraceSignals {
    rows: Vec<TraceRow>,
    at: usize,
}

impl SignalSource for TraceSignals {
    fn capture(&mut self) -> Result<SignalSnapshot, DynError> {
        let row = row_at(&self.rows, self.at);
        self.at += 1;
        Ok(SignalSnapshot {
            ignition: row.ignition,
            charge_enable: row.charge_enable,
            batt1_inhibit: row.batt1_inhibit,
            batt2_inhibit: row.batt2_inhibit,
            charger_inhibit: row.charger_inhibit,
            heater_enable: row.heater_enable,
        })
    }
}

/// Expands each row's cell extremes into a full topology scan: the first
/// cell of every pack carries the low extreme, the rest the high one.
struct TraceBus {
    rows: Vec<TraceRow>,
    at: usize,
    packs: u8,
    cells_per_pack: u16,
}

impl CellBus for TraceBus {
    fn poll(&mut self, _timeout: Duration) -> Result<Vec<CellSample>, DynError> {
        let row = row_at(&self.rows, self.at);
        self.at += 1;
        let mut scan =
            Vec::with_capacity(usize::from(self.packs) * usize::from(self.cells_per_pack));
        for pack in 0..self.packs {
            for cell in 0..self.cells_per_pack {
                scan.push(CellSample {
                    pack,
                    cell,
                    millivolts: if cell == 0 { row.low_cell_mv } else { row.high_cell_mv },
                    temp_dc: row.pack_temp_dc,
                });
            }
        }
        Ok(scan)
    }
}

/// Sinks output writes; replay only reports the engine's view.
struct SinkOutputs;

impl bms_traits::InhibitBank for SinkOutputs {
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

/// Run the trace and return the last cycle's report.
pub fn replay_trace(
    cfg: &bms_config::Config,
    trace: &Path,
    settle: u64,
) -> eyre::Result<CycleReport> {
    let rows = bms_config::load_trace_csv(trace).wrap_err("load trace")?;
    let total = rows.len() as u64 + settle;
    tracing::info!(rows = rows.len(), settle, "replaying trace");

    let signals = TraceSignals {
        rows: rows.clone(),
        at: 0,
    };
    let bus = TraceBus {
        rows,
        at: 0,
        packs: cfg.topology.packs,
        cells_per_pack: cfg.topology.cells_per_pack,
    };

    let mut core = bms_core::build_interlock(
        signals,
        bus,
        SinkOutputs,
        (&cfg.topology).into(),
        (&cfg.thresholds).into(),
        (&cfg.debounce).into(),
        // Replay does not pace against wall time; cycle as fast as the
        // engine's floor allows.
        bms_core::CycleCfg {
            rate_hz: 1_000,
            ..(&cfg.cycle).into()
        },
        (&cfg.safety).into(),
        (&cfg.charge).into(),
        None,
    )?;
    core.arm();

    for _ in 0..total {
        match core.step()? {
            CycleStatus::Cycling => {}
            CycleStatus::Tripped(e) => return Err(eyre::Report::new(e)),
        }
        if let Some(r) = core.report() {
            tracing::debug!(
                cycle = r.cycle,
                kind = %r.kind,
                status = r.status_byte,
                error = r.error_byte,
                "replay cycle"
            );
        }
    }

    core.report()
        .ok_or_else(|| eyre::eyre!("trace produced no evaluated cycles"))
}
