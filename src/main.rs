//! Thin CLI shell. Everything interesting lives in `cimian_agent`; this
//! binary only parses flags, wires up logging, and translates the
//! resulting error (if any) into a process exit code (spec §6).

use cimian_agent::cli::Cli;
use cimian_agent::config::Config;
use cimian_agent::context::RunContext;
use cimian_agent::{bootstrap, ipc, orchestrator, paths, reporter};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_logging(log_level: u8, logs_dir: &std::path::Path) -> tracing_appender::non_blocking::WorkerGuard {
    let level = match log_level {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    };
    let _ = std::fs::create_dir_all(logs_dir);
    let file_appender = tracing_appender::rolling::never(logs_dir, "agent.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    guard
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.set_bootstrap_mode {
        match bootstrap::set(&paths::bootstrap_flag_path()) {
            Ok(()) => return ExitCode::from(0),
            Err(e) => {
                eprintln!("failed to set bootstrap mode: {e}");
                return ExitCode::from(1);
            }
        }
    }
    if cli.clear_bootstrap_mode {
        match bootstrap::clear(&paths::bootstrap_flag_path()) {
            Ok(()) => return ExitCode::from(0),
            Err(e) => {
                eprintln!("failed to clear bootstrap mode: {e}");
                return ExitCode::from(1);
            }
        }
    }
    if cli.show_status {
        return ExitCode::from(ipc::show_status().clamp(0, 255) as u8);
    }
    if cli.report {
        match reporter::regenerate(&paths::logs_path(), &paths::reports_path()) {
            Ok((sessions, items)) => {
                println!("regenerated reports: {sessions} session(s), {items} item(s)");
                return ExitCode::from(0);
            }
            Err(e) => {
                eprintln!("failed to regenerate reports: {e}");
                return ExitCode::from(1);
            }
        }
    }

    let config = match Config::load(&paths::config_path()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let log_level = cli.verbose.max(config.log_level);
    let logs_path = config.logs_path();
    let _guard = init_logging(log_level, &logs_path);

    let os_version = detect_os_version();
    let ctx = RunContext::build(cli, config, os_version);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let exit_code = runtime.block_on(orchestrator::run(ctx));
    ExitCode::from(exit_code.clamp(0, 255) as u8)
}

#[cfg(windows)]
fn detect_os_version() -> String {
    use windows_sys::Win32::System::SystemInformation::{GetVersionExW, OSVERSIONINFOW};
    unsafe {
        let mut info: OSVERSIONINFOW = std::mem::zeroed();
        info.dwOSVersionInfoSize = std::mem::size_of::<OSVERSIONINFOW>() as u32;
        if GetVersionExW(&mut info) == 0 {
            return String::new();
        }
        format!("{}.{}.{}", info.dwMajorVersion, info.dwMinorVersion, info.dwBuildNumber)
    }
}

#[cfg(not(windows))]
fn detect_os_version() -> String {
    String::new()
}
