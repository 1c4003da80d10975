//! Scan ingestion, freshness tracking, and worst-case aggregation.
//!
//! The monitor owns a dense reading table sized by the configured topology.
//! Cells start out as Fault (never scanned) and a pack that outlives the
//! freshness window degrades back to Fault, so a silent bus always reads as
//! an inhibit condition rather than a stale Normal.

use crate::cell::{CellLimits, CellReading, CellStatus, classify_mv};
use crate::error::{BmsError, Report, Result};
use bms_traits::CellSample;

/// Worst-case aggregate over one cycle's effective readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    pub worst: CellStatus,
    pub any_empty: bool,
    pub any_full: bool,
    pub any_fault: bool,
    /// Extremes over non-fault cells; all zero when every cell is faulted.
    pub low_mv: i32,
    pub high_mv: i32,
    pub low_temp_dc: i16,
    pub high_temp_dc: i16,
    /// Largest pack-total voltage difference in millivolts.
    pub pack_delta_mv: i32,
    pub cell_count: usize,
}

/// Fold readings into one worst-case battery status.
///
/// Severity order: Fault > Empty/Full > Normal. An empty reading set is a
/// configuration error, never a quiet Normal.
pub fn aggregate(readings: &[CellReading]) -> Result<BatteryStatus> {
    if readings.is_empty() {
        return Err(Report::new(BmsError::Config(
            "no cell readings to aggregate".into(),
        )));
    }
    let mut worst = CellStatus::Normal;
    let (mut any_empty, mut any_full, mut any_fault) = (false, false, false);
    let mut low_mv = i32::MAX;
    let mut high_mv = i32::MIN;
    let mut low_temp_dc = i16::MAX;
    let mut high_temp_dc = i16::MIN;
    let mut live = 0usize;
    let mut totals: Vec<(u8, i64)> = Vec::with_capacity(4);

    for r in readings {
        worst = worst.worst(r.status);
        match r.status {
            CellStatus::Empty => any_empty = true,
            CellStatus::Full => any_full = true,
            CellStatus::Fault => any_fault = true,
            CellStatus::Normal => {}
        }
        if r.status != CellStatus::Fault {
            live += 1;
            low_mv = low_mv.min(r.millivolts);
            high_mv = high_mv.max(r.millivolts);
            low_temp_dc = low_temp_dc.min(r.temp_dc);
            high_temp_dc = high_temp_dc.max(r.temp_dc);
        }
        match totals.iter_mut().find(|(p, _)| *p == r.pack) {
            Some((_, t)) => *t += i64::from(r.millivolts),
            None => totals.push((r.pack, i64::from(r.millivolts))),
        }
    }

    if live == 0 {
        low_mv = 0;
        high_mv = 0;
        low_temp_dc = 0;
        high_temp_dc = 0;
    }
    let pack_delta_mv = if totals.len() < 2 {
        0
    } else {
        let max = totals.iter().map(|(_, t)| *t).max().unwrap_or(0);
        let min = totals.iter().map(|(_, t)| *t).min().unwrap_or(0);
        i32::try_from(max - min).unwrap_or(i32::MAX)
    };

    Ok(BatteryStatus {
        worst,
        any_empty,
        any_full,
        any_fault,
        low_mv,
        high_mv,
        low_temp_dc,
        high_temp_dc,
        pack_delta_mv,
        cell_count: readings.len(),
    })
}

#[derive(Debug)]
pub struct CellMonitor {
    limits: CellLimits,
    packs: u8,
    cells_per_pack: u16,
    ttl_ms: u64,
    // Per-pack timestamp of the last ingested sample
    last_scan_ms: Vec<Option<u64>>,
    last_any_scan_ms: Option<u64>,
    readings: Vec<CellReading>,
    // Reused per cycle to avoid allocating the effective-reading view
    scratch: Vec<CellReading>,
    stale_mask: Vec<bool>,
}

impl CellMonitor {
    pub fn new(limits: CellLimits, packs: u8, cells_per_pack: u16, ttl_ms: u64) -> Result<Self> {
        if packs == 0 || cells_per_pack == 0 {
            return Err(Report::new(BmsError::Config(
                "cell topology needs at least one cell".into(),
            )));
        }
        let n = usize::from(packs) * usize::from(cells_per_pack);
        let mut readings = Vec::with_capacity(n);
        for pack in 0..packs {
            for cell in 0..cells_per_pack {
                readings.push(CellReading {
                    pack,
                    cell,
                    millivolts: 0,
                    temp_dc: 0,
                    status: CellStatus::Fault,
                });
            }
        }
        Ok(Self {
            limits,
            packs,
            cells_per_pack,
            ttl_ms,
            last_scan_ms: vec![None; usize::from(packs)],
            last_any_scan_ms: None,
            readings,
            scratch: Vec::with_capacity(n),
            stale_mask: vec![true; usize::from(packs)],
        })
    }

    /// Fold one bus scan into the reading table and refresh pack timestamps.
    /// Samples outside the configured topology are dropped.
    pub fn ingest(&mut self, scan: &[CellSample], now_ms: u64) {
        for s in scan {
            if s.pack >= self.packs || s.cell >= self.cells_per_pack {
                tracing::debug!(pack = s.pack, cell = s.cell, "sample outside topology");
                continue;
            }
            let idx =
                usize::from(s.pack) * usize::from(self.cells_per_pack) + usize::from(s.cell);
            self.readings[idx] = CellReading {
                pack: s.pack,
                cell: s.cell,
                millivolts: s.millivolts,
                temp_dc: s.temp_dc,
                status: classify_mv(s.millivolts, &self.limits),
            };
            self.last_scan_ms[usize::from(s.pack)] = Some(now_ms);
            self.last_any_scan_ms = Some(now_ms);
        }
    }

    /// Worst-case summary at `now_ms`, with stale packs degraded to Fault.
    pub fn summary(&mut self, now_ms: u64) -> Result<BatteryStatus> {
        for p in 0..usize::from(self.packs) {
            self.stale_mask[p] = match self.last_scan_ms[p] {
                Some(t) => now_ms.saturating_sub(t) > self.ttl_ms,
                None => true,
            };
        }
        self.scratch.clear();
        for r in &self.readings {
            let mut r = *r;
            if self.stale_mask[usize::from(r.pack)] {
                r.status = CellStatus::Fault;
            }
            self.scratch.push(r);
        }
        aggregate(&self.scratch)
    }

    /// True when any pack has outlived the freshness window.
    #[must_use]
    pub fn bus_stale(&self, now_ms: u64) -> bool {
        self.last_scan_ms.iter().any(|t| match t {
            Some(t) => now_ms.saturating_sub(*t) > self.ttl_ms,
            None => true,
        })
    }

    /// Milliseconds since the last successful scan; before the first scan this
    /// is the time since the monitor (re)started counting.
    #[must_use]
    pub fn silent_for(&self, now_ms: u64) -> u64 {
        match self.last_any_scan_ms {
            Some(t) => now_ms.saturating_sub(t),
            None => now_ms,
        }
    }

    /// Forget all scans; every cell reads Fault until the bus speaks again.
    pub fn reset(&mut self) {
        for r in &mut self.readings {
            r.millivolts = 0;
            r.temp_dc = 0;
            r.status = CellStatus::Fault;
        }
        for t in &mut self.last_scan_ms {
            *t = None;
        }
        self.last_any_scan_ms = None;
    }
}
