use crate::error::Result as CoreResult;
use crate::sampler::Sampler;
use crate::{
    ChargeCfg, CycleCfg, CycleStatus, DebounceCfg, InterlockKind, SafetyCfg, ThresholdCfg,
    Topology,
};
use bms_traits::clock::MonotonicClock;
use bms_traits::{CellBus, InhibitBank, SignalSource};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How cell scans should be orchestrated
#[derive(Debug, Clone, Copy)]
pub enum PollMode {
    /// Poll inside the control loop using `CellBus::poll(timeout)`
    Direct,
    /// Background sampler thread paced at the given Hz
    Paced(u32),
}

/// Everything `run` needs besides the three endpoints.
#[derive(Debug, Clone, Copy)]
pub struct RunParams {
    pub topology: Topology,
    pub thresholds: ThresholdCfg,
    pub debounce: DebounceCfg,
    pub cycle: CycleCfg,
    pub safety: SafetyCfg,
    pub charge: ChargeCfg,
    pub mode: PollMode,
    /// Stop cleanly after this many cycles (bench and replay runs).
    pub max_cycles: Option<u64>,
}

/// Counters and final outputs from a finished run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub cycles: u64,
    pub signal_faults: u64,
    pub bus_errors: u64,
    pub final_kind: InterlockKind,
    pub final_status_byte: u8,
    pub final_error_byte: u8,
}

/// Compute the effective bus-silence trip window in milliseconds.
///
/// Parameters:
/// - `bus_silence_ms`: the configured trip window. The result never goes
///   below it, only above.
/// - `bus_timeout_ms`: the per-poll bus timeout. The window is kept at or
///   above 4x this value so a single slow poll cannot trip the latch.
/// - `period_ms`: the control period derived from `rate_hz`. The window spans
///   at least two periods so one missed cycle is tolerated.
///
/// Rationale: the configured window is a policy choice (how long a silent bus
/// is acceptable), but the floor terms are mechanical. Tripping faster than
/// the bus can answer one poll, or faster than the loop can observe two
/// scans, would latch on scheduling noise instead of real silence.
#[inline]
pub(crate) fn effective_silence_ms(bus_silence_ms: u64, bus_timeout_ms: u64, period_ms: u64) -> u64 {
    debug_assert!((1..=crate::util::MILLIS_PER_SEC).contains(&period_ms));

    bus_silence_ms
        .max(four_timeouts_ms(bus_timeout_ms))
        .max(two_periods_ms(period_ms))
        .max(1)
}

/// Floor the trip window at four per-poll timeouts.
#[inline]
fn four_timeouts_ms(bus_timeout_ms: u64) -> u64 {
    bus_timeout_ms.saturating_mul(4)
}

/// Ensure the trip window spans at least two periods to tolerate one miss.
#[inline]
fn two_periods_ms(period_ms: u64) -> u64 {
    period_ms.saturating_mul(2)
}

/// Run the interlock until shutdown, a cycle cap, or a trip.
///
/// Shutdown and the cycle cap park the outputs in the safe state and return
/// stats; a trip or a hardware write failure returns the error.
pub fn run<G, B, O>(
    signals: G,
    bus: B,
    outputs: O,
    params: RunParams,
    shutdown: Arc<AtomicBool>,
) -> CoreResult<RunStats>
where
    G: SignalSource + 'static,
    B: CellBus + Send + 'static,
    O: InhibitBank + 'static,
{
    match params.mode {
        PollMode::Direct => run_direct(signals, bus, outputs, params, &shutdown),
        PollMode::Paced(hz) => run_with_sampler(signals, bus, outputs, params, &shutdown, hz),
    }
}

fn run_direct<G, B, O>(
    signals: G,
    bus: B,
    outputs: O,
    params: RunParams,
    shutdown: &AtomicBool,
) -> CoreResult<RunStats>
where
    G: SignalSource + 'static,
    B: CellBus + 'static,
    O: InhibitBank + 'static,
{
    let mut core = crate::build_interlock(
        signals,
        bus,
        outputs,
        params.topology,
        params.thresholds,
        params.debounce,
        params.cycle,
        params.safety,
        params.charge,
        None,
    )?;
    core.arm();
    tracing::info!(rate_hz = params.cycle.rate_hz, mode = "direct", "interlock cycling");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("shutdown requested");
            core.park();
            return Ok(collect_stats(&core));
        }
        match core.step()? {
            CycleStatus::Cycling => {
                if let Some(max) = params.max_cycles
                    && core.cycles() >= max
                {
                    core.park();
                    return Ok(collect_stats(&core));
                }
            }
            CycleStatus::Tripped(e) => {
                tracing::error!(error = %e, "interlock latched");
                return Err(crate::error::Report::new(e));
            }
        }
    }
}

fn run_with_sampler<G, B, O>(
    signals: G,
    bus: B,
    outputs: O,
    params: RunParams,
    shutdown: &AtomicBool,
    sampler_hz: u32,
) -> CoreResult<RunStats>
where
    G: SignalSource + 'static,
    B: CellBus + Send + 'static,
    O: InhibitBank + 'static,
{
    // Shared NoopBus since step_with_scan won't call poll()
    use crate::mocks::NoopBus;

    let sampler_timeout = Duration::from_millis(params.cycle.bus_timeout_ms);
    let sampler = Sampler::spawn(bus, sampler_hz, sampler_timeout, MonotonicClock::new());

    // Build the engine with NoopBus; scans only arrive via step_with_scan
    let mut core = crate::build_interlock(
        signals,
        NoopBus,
        outputs,
        params.topology,
        params.thresholds,
        params.debounce,
        params.cycle,
        params.safety,
        params.charge,
        None,
    )?;
    core.arm();
    tracing::info!(
        rate_hz = params.cycle.rate_hz,
        sampler_hz,
        mode = "sampler",
        "interlock cycling"
    );

    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("shutdown requested");
            core.park();
            return Ok(collect_stats(&core));
        }
        // Signals are still evaluated on cycles with no fresh scan; the
        // monitor ages the last one until the bus speaks again.
        let scan = sampler.latest();
        match core.step_with_scan(scan.as_deref())? {
            CycleStatus::Cycling => {
                if let Some(max) = params.max_cycles
                    && core.cycles() >= max
                {
                    core.park();
                    return Ok(collect_stats(&core));
                }
            }
            CycleStatus::Tripped(e) => {
                tracing::error!(error = %e, "interlock latched");
                return Err(crate::error::Report::new(e));
            }
        }
    }
}

fn collect_stats<G, B, O>(core: &crate::InterlockCore<G, B, O>) -> RunStats
where
    G: SignalSource,
    B: CellBus,
    O: InhibitBank,
{
    let (status_byte, error_byte) = core
        .report()
        .map_or((0, 0), |r| (r.status_byte, r.error_byte));
    RunStats {
        cycles: core.cycles(),
        signal_faults: core.signal_faults_total(),
        bus_errors: core.bus_errors_total(),
        final_kind: core.kind(),
        final_status_byte: status_byte,
        final_error_byte: error_byte,
    }
}

#[cfg(test)]
mod tests {
    use super::{effective_silence_ms, four_timeouts_ms, two_periods_ms};

    #[test]
    fn four_timeouts_scales_by_four() {
        assert_eq!(four_timeouts_ms(0), 0);
        assert_eq!(four_timeouts_ms(1), 4);
        assert_eq!(four_timeouts_ms(150), 600);
    }

    #[test]
    fn two_periods_is_double_period() {
        assert_eq!(two_periods_ms(1), 2);
        assert_eq!(two_periods_ms(10), 20);
    }

    #[test]
    fn configured_window_wins_when_generous() {
        // floors: 4x150=600, 2x100=200
        assert_eq!(effective_silence_ms(30_000, 150, 100), 30_000);
    }

    #[test]
    fn window_is_floored_by_timeout_and_period() {
        // timeout floor dominates
        assert_eq!(effective_silence_ms(100, 150, 100), 600);
        // period floor dominates
        assert_eq!(effective_silence_ms(100, 10, 400), 800);
    }

    #[test]
    fn degenerate_inputs_still_get_a_floor() {
        assert_eq!(effective_silence_ms(0, 0, 1), 2);
    }
}
