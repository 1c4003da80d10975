//! `bms` binary entry point: argument parsing, logging setup, config
//! loading, and command dispatch.

mod cli;
mod error_fmt;
mod replay;
mod rt;
mod run;

use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use error_fmt::{exit_code_for_error, format_error_json, humanize};
use eyre::WrapErr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("Warning: color-eyre install failed: {e}");
    }

    if let Err(err) = dispatch(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn dispatch(cli: Cli) -> eyre::Result<()> {
    let text = std::fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("read config {}", cli.config.display()))?;
    let cfg = bms_config::load_toml(&text)
        .map_err(|e| eyre::eyre!("parse config {}: {e}", cli.config.display()))?;
    cfg.validate()
        .wrap_err_with(|| format!("validate config {}", cli.config.display()))?;

    init_tracing(&cli, &cfg.logging);

    match cli.cmd {
        Commands::CheckConfig => {
            println!("config ok: {}", cli.config.display());
            Ok(())
        }
        Commands::SelfCheck => {
            run::self_check(&cfg)?;
            println!("self-check ok");
            Ok(())
        }
        Commands::Run {
            cycles,
            direct,
            rt,
            rt_prio,
            rt_lock,
            rt_cpu,
            stats,
        } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = shutdown.clone();
            ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
                .wrap_err("install ctrl-c handler")?;

            let summary = run::run_interlock(
                &cfg,
                run::RunOpts {
                    cycles,
                    direct,
                    rt,
                    rt_prio,
                    rt_lock,
                    rt_cpu,
                    stats,
                },
                shutdown,
            )?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "cycles": summary.cycles,
                        "signal_faults": summary.signal_faults,
                        "bus_errors": summary.bus_errors,
                        "final_kind": summary.final_kind.to_string(),
                        "status_byte": summary.final_status_byte,
                        "error_byte": summary.final_error_byte,
                    })
                );
            } else {
                println!(
                    "run complete: {} cycles, final state {}, status 0x{:02x}, error 0x{:02x}",
                    summary.cycles,
                    summary.final_kind,
                    summary.final_status_byte,
                    summary.final_error_byte
                );
                if summary.signal_faults > 0 || summary.bus_errors > 0 {
                    println!(
                        "degraded cycles: {} signal faults, {} bus errors",
                        summary.signal_faults, summary.bus_errors
                    );
                }
            }
            Ok(())
        }
        Commands::Replay { trace, settle } => {
            let report = replay::replay_trace(&cfg, &trace, settle)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "cycles": report.cycle + 1,
                        "final_kind": report.kind.to_string(),
                        "drive_inhibit": report.state.drive_inhibit,
                        "charge_inhibit": report.state.charge_inhibit,
                        "heater_on": report.heater_on,
                        "charge_limit_da": report.charge_limit_da,
                        "status_byte": report.status_byte,
                        "error_byte": report.error_byte,
                    })
                );
            } else {
                println!(
                    "replay complete: {} cycles, final state {}",
                    report.cycle + 1,
                    report.kind
                );
                println!(
                    "drive inhibit: {}, charge inhibit: {}, heater: {}, charge limit: {:.1} A",
                    report.state.drive_inhibit,
                    report.state.charge_inhibit,
                    report.heater_on,
                    f64::from(report.charge_limit_da) / 10.0
                );
                println!(
                    "status byte 0x{:02x}, error byte 0x{:02x}",
                    report.status_byte, report.error_byte
                );
            }
            Ok(())
        }
    }
}

/// Console logging (pretty or JSON lines) plus optional JSON file output
/// with the configured rotation. The CLI flag wins over `RUST_LOG`, which
/// wins over the config's logging.level.
fn init_tracing(cli: &Cli, logging: &bms_config::Logging) {
    let level = if cli.log_level != "info" {
        cli.log_level.clone()
    } else if let Ok(env) = std::env::var("RUST_LOG") {
        env
    } else {
        logging.level.clone().unwrap_or_else(|| "info".to_string())
    };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = logging.file.as_ref().map(|path| {
        let path = std::path::Path::new(path);
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let name = path
            .file_name()
            .map_or_else(|| "bms.log".into(), |n| n.to_string_lossy().into_owned());
        let dir = dir.unwrap_or_else(|| std::path::Path::new("."));
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
    });

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if cli.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}
