//! Endpoint assembly and run execution for the `run` and `self-check` commands.

use crate::cli::{CliSafety, LAST_SAFETY, RtLock};
use crate::rt::setup_rt_once;
use bms_core::error::Result as CoreResult;
use bms_core::runner::{PollMode, RunParams, RunStats};
use bms_core::{CycleStatus, InterlockCore};
use bms_traits::{CellBus, InhibitBank, SignalSource};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy)]
pub struct RunOpts {
    pub cycles: Option<u64>,
    pub direct: bool,
    pub rt: bool,
    pub rt_prio: Option<i32>,
    pub rt_lock: Option<RtLock>,
    pub rt_cpu: Option<usize>,
    pub stats: bool,
}

fn params_from(cfg: &bms_config::Config, opts: &RunOpts) -> RunParams {
    let mode = if opts.direct || cfg.runner.mode == bms_config::PollModeCfg::Direct {
        PollMode::Direct
    } else {
        PollMode::Paced(cfg.runner.sampler_hz)
    };
    RunParams {
        topology: (&cfg.topology).into(),
        thresholds: (&cfg.thresholds).into(),
        debounce: (&cfg.debounce).into(),
        cycle: (&cfg.cycle).into(),
        safety: (&cfg.safety).into(),
        charge: (&cfg.charge).into(),
        mode,
        max_cycles: opts.cycles,
    }
}

/// Assemble the endpoints from the config and run the interlock until
/// shutdown, the cycle cap, or a trip.
pub fn run_interlock(
    cfg: &bms_config::Config,
    opts: RunOpts,
    shutdown: Arc<AtomicBool>,
) -> CoreResult<RunStats> {
    setup_rt_once(
        opts.rt,
        opts.rt_prio,
        opts.rt_lock.unwrap_or(RtLock::os_default()),
        opts.rt_cpu,
    );

    let _ = LAST_SAFETY.set(CliSafety {
        signal_fault_limit: cfg.safety.signal_fault_limit,
        bus_silence_ms: cfg.safety.bus_silence_ms,
        bus_ttl_ms: cfg.cycle.bus_ttl_ms,
        release_cycles: cfg.debounce.release_cycles,
    });

    let params = params_from(cfg, &opts);

    // GPIO lines when the build and config provide them. The cell bus keeps
    // its own transport and is not a GPIO concern; until one is wired in,
    // scans come from the simulated bench either way.
    #[cfg(feature = "hardware")]
    if let Some(pins) = &cfg.pins {
        use bms_hardware::gpio::{GpioOutputs, GpioSignals, InputPins, OutputPins};
        let signals = GpioSignals::open(InputPins {
            ignition: pins.ignition_in,
            charge_enable: pins.charge_enable_in,
            batt1_inhibit: pins.batt1_inhibit_in,
            batt2_inhibit: pins.batt2_inhibit_in,
            charger_inhibit: pins.charger_inhibit_in,
            heater_enable: pins.heater_enable_in,
        })
        .map_err(|e| eyre::eyre!("open input lines: {e}"))?;
        let outputs = GpioOutputs::open(OutputPins {
            drive_inhibit: pins.drive_inhibit_out,
            charge_inhibit: pins.charge_inhibit_out,
            heater: pins.heater_out,
            pack_inhibit: pins.pack_inhibit_out.clone(),
        })
        .map_err(|e| eyre::eyre!("open output lines: {e}"))?;
        let bench = bms_hardware::Charger::new(cfg.topology.packs, cfg.topology.cells_per_pack);
        let (_, bus, _) = bench.endpoints();
        return dispatch(signals, bus, outputs, params, opts, cfg, shutdown);
    }

    let bench = bms_hardware::Charger::new(cfg.topology.packs, cfg.topology.cells_per_pack);
    let (signals, bus, outputs) = bench.endpoints();
    tracing::info!("simulated bench endpoints in use");
    dispatch(signals, bus, outputs, params, opts, cfg, shutdown)
}

fn dispatch<G, B, O>(
    signals: G,
    bus: B,
    outputs: O,
    params: RunParams,
    opts: RunOpts,
    cfg: &bms_config::Config,
    shutdown: Arc<AtomicBool>,
) -> CoreResult<RunStats>
where
    G: SignalSource + 'static,
    B: CellBus + Send + 'static,
    O: InhibitBank + 'static,
{
    if opts.stats {
        run_with_stats(signals, bus, outputs, params, cfg, &shutdown)
    } else {
        bms_core::runner::run(signals, bus, outputs, params, shutdown)
    }
}

/// Stats variant of the run loop: same semantics as the core runner, with
/// per-cycle latency recording around each step.
fn run_with_stats<G, B, O>(
    signals: G,
    bus: B,
    outputs: O,
    params: RunParams,
    cfg: &bms_config::Config,
    shutdown: &AtomicBool,
) -> CoreResult<RunStats>
where
    G: SignalSource + 'static,
    B: CellBus + Send + 'static,
    O: InhibitBank + 'static,
{
    let period_us = bms_core::util::period_us(cfg.cycle.cycle_rate_hz);
    let mut latencies: Vec<u64> = Vec::new();
    let mut missed_deadlines = 0usize;

    #[inline]
    fn record_sample(
        latencies: &mut Vec<u64>,
        missed_deadlines: &mut usize,
        period_us: u64,
        t_start: std::time::Instant,
    ) {
        let latency = t_start.elapsed().as_micros() as u64;
        latencies.push(latency);
        if latency > period_us {
            *missed_deadlines = missed_deadlines.saturating_add(1);
        }
    }

    match params.mode {
        PollMode::Direct => {
            let mut core = bms_core::build_interlock(
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
                    core.park();
                    print_stats(&latencies, missed_deadlines, cfg.cycle.cycle_rate_hz);
                    return Ok(stats_of(&core));
                }
                let t_start = std::time::Instant::now();
                let status = core.step()?;
                record_sample(&mut latencies, &mut missed_deadlines, period_us, t_start);
                match status {
                    CycleStatus::Cycling => {
                        if let Some(max) = params.max_cycles
                            && core.cycles() >= max
                        {
                            core.park();
                            print_stats(&latencies, missed_deadlines, cfg.cycle.cycle_rate_hz);
                            return Ok(stats_of(&core));
                        }
                    }
                    CycleStatus::Tripped(e) => {
                        print_stats(&latencies, missed_deadlines, cfg.cycle.cycle_rate_hz);
                        return Err(bms_core::error::Report::new(e));
                    }
                }
            }
        }
        PollMode::Paced(hz) => {
            use bms_core::mocks::NoopBus;
            let sampler_timeout = std::time::Duration::from_millis(params.cycle.bus_timeout_ms);
            let sampler = bms_core::sampler::Sampler::spawn(
                bus,
                hz,
                sampler_timeout,
                bms_traits::clock::MonotonicClock::new(),
            );
            let mut core = bms_core::build_interlock(
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
                sampler_hz = hz,
                mode = "sampler",
                "interlock cycling"
            );
            loop {
                if shutdown.load(Ordering::Relaxed) {
                    core.park();
                    print_stats(&latencies, missed_deadlines, cfg.cycle.cycle_rate_hz);
                    return Ok(stats_of(&core));
                }
                let t_start = std::time::Instant::now();
                let scan = sampler.latest();
                let status = core.step_with_scan(scan.as_deref())?;
                record_sample(&mut latencies, &mut missed_deadlines, period_us, t_start);
                match status {
                    CycleStatus::Cycling => {
                        if let Some(max) = params.max_cycles
                            && core.cycles() >= max
                        {
                            core.park();
                            print_stats(&latencies, missed_deadlines, cfg.cycle.cycle_rate_hz);
                            return Ok(stats_of(&core));
                        }
                    }
                    CycleStatus::Tripped(e) => {
                        print_stats(&latencies, missed_deadlines, cfg.cycle.cycle_rate_hz);
                        return Err(bms_core::error::Report::new(e));
                    }
                }
            }
        }
    }
}

fn stats_of<G, B, O>(core: &InterlockCore<G, B, O>) -> RunStats
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

/// Print cycle latency/jitter stats to stderr.
fn print_stats(latencies: &[u64], missed_deadlines: usize, rate_hz: u32) {
    if latencies.is_empty() {
        return;
    }
    let expected_period_us = bms_core::util::period_us(rate_hz);
    let min = *latencies.iter().min().unwrap_or(&0);
    let max = *latencies.iter().max().unwrap_or(&0);
    let avg = latencies.iter().sum::<u64>() as f64 / latencies.len() as f64;
    let stdev = if latencies.len() > 1 {
        let mean = avg;
        let var = latencies
            .iter()
            .map(|&x| (x as f64 - mean).powi(2))
            .sum::<f64>()
            / (latencies.len() as f64 - 1.0);
        var.sqrt()
    } else {
        0.0
    };
    eprintln!("\n--- Interlock Stats ---");
    eprintln!("Cycles: {}", latencies.len());
    eprintln!("Period (us): {expected_period_us}");
    eprintln!("Latency min/avg/max/stdev (us): {min:.0} / {avg:.1} / {max:.0} / {stdev:.1}");
    eprintln!("Missed deadlines (> period): {missed_deadlines}");
    eprintln!("-----------------------\n");
}

/// A few direct cycles against the simulated bench; proves the endpoints
/// assemble and the engine evaluates.
pub fn self_check(cfg: &bms_config::Config) -> eyre::Result<()> {
    let bench = bms_hardware::Charger::new(cfg.topology.packs, cfg.topology.cells_per_pack);
    let (signals, bus, outputs) = bench.endpoints();
    let mut core = bms_core::build_interlock(
        signals,
        bus,
        outputs,
        (&cfg.topology).into(),
        (&cfg.thresholds).into(),
        (&cfg.debounce).into(),
        bms_core::CycleCfg {
            rate_hz: 1_000,
            ..(&cfg.cycle).into()
        },
        (&cfg.safety).into(),
        (&cfg.charge).into(),
        None,
    )?;
    core.arm();
    for _ in 0..5 {
        match core.step()? {
            CycleStatus::Cycling => {}
            CycleStatus::Tripped(e) => return Err(eyre::eyre!("self-check tripped: {e}")),
        }
    }
    let report = core
        .report()
        .ok_or_else(|| eyre::eyre!("no cycle report after self-check"))?;
    tracing::info!(
        kind = %report.kind,
        status = report.status_byte,
        error = report.error_byte,
        "self-check evaluated"
    );
    Ok(())
}
