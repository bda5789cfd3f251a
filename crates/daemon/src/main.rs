// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! spoold: the print-service scheduler.
//!
//! By default the process forks itself into the background: the parent
//! waits for the child to signal USR1 once initialisation succeeded, and
//! reports startup failures through its own exit code (2 when the child
//! exited, 3 when it died on a signal).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use clap::Parser;
use fs2::FileExt;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use signal_hook::consts::SIGUSR1;
use spoold_core::{Clock, SystemClock};
use spoold_daemon::cert::CertStore;
use spoold_daemon::signal::SignalBridge;
use spoold_daemon::{Config, DaemonState, Scheduler};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Marks the re-executed child of a backgrounding parent.
const DAEMONIZED_ENV: &str = "SPOOLD_DAEMONIZED";
/// Pid the child signals once initialisation succeeded.
const PARENT_PID_ENV: &str = "SPOOLD_PARENT_PID";

#[derive(Debug, Parser)]
#[command(name = "spoold", about = "Print service scheduler", version)]
struct Cli {
    /// Configuration file (absolute or relative to the current directory)
    #[arg(short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run in the foreground
    #[arg(short = 'f')]
    foreground: bool,

    /// Run in the foreground but detach from the controlling terminal
    #[arg(short = 'F')]
    foreground_detached: bool,

    /// Disable platform bootstrap registration
    #[arg(short = 'd')]
    no_bootstrap: bool,

    /// Lazy: exit at once when no printer is shared and no job is pending
    #[arg(short = 'L')]
    lazy: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let daemonized = std::env::var_os(DAEMONIZED_ENV).is_some();

    if !cli.foreground && !cli.foreground_detached && !daemonized {
        return run_parent();
    }
    run_daemon(&cli, daemonized)
}

/// Background the scheduler by re-executing ourselves, then wait for the
/// child's USR1 or its death.
fn run_parent() -> ExitCode {
    let ready = Arc::new(AtomicBool::new(false));
    if signal_hook::flag::register(SIGUSR1, Arc::clone(&ready)).is_err() {
        eprintln!("spoold: unable to install startup handler");
        return ExitCode::FAILURE;
    }

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            eprintln!("spoold: unable to locate executable: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut child = match std::process::Command::new(exe)
        .args(std::env::args_os().skip(1))
        .env(DAEMONIZED_ENV, "1")
        .env(PARENT_PID_ENV, std::process::id().to_string())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            eprintln!("spoold: unable to start scheduler child: {e}");
            return ExitCode::FAILURE;
        }
    };

    loop {
        if ready.load(Ordering::SeqCst) {
            return ExitCode::SUCCESS;
        }
        match child.try_wait() {
            Ok(Some(status)) => {
                return match status.code() {
                    Some(code) => {
                        eprintln!("spoold: child exited with status {code}");
                        ExitCode::from(2)
                    }
                    None => {
                        eprintln!("spoold: child exited on a signal");
                        ExitCode::from(3)
                    }
                };
            }
            Ok(None) => std::thread::sleep(std::time::Duration::from_millis(100)),
            Err(e) => {
                eprintln!("spoold: unable to wait for child: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
}

fn run_daemon(cli: &Cli, daemonized: bool) -> ExitCode {
    // Resolve the configuration path before any chdir.
    let config_path = match &cli.config {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(e) => {
                eprintln!("spoold: unable to resolve configuration path: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => PathBuf::from("/etc/spoold/spoold.toml"),
    };

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("spoold: unable to read configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let state_dir = match config.state_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("spoold: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = std::fs::create_dir_all(&state_dir) {
        eprintln!("spoold: unable to create {}: {e}", state_dir.display());
        return ExitCode::FAILURE;
    }

    // Exactly one scheduler per state directory.
    let lock_path = state_dir.join("spoold.pid");
    let lock_file = match acquire_lock(&lock_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("spoold is already running ({e})");
            return ExitCode::FAILURE;
        }
    };

    let log_to_file = daemonized;
    let _log_guard = match setup_logging(&state_dir, log_to_file) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("spoold: unable to set up logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    if daemonized || cli.foreground_detached {
        // Detach from the controlling terminal and any mounted cwd.
        let _ = nix::unistd::setsid();
        let _ = std::env::set_current_dir("/");
    }
    if cli.no_bootstrap {
        debug!("bootstrap registration disabled");
    }

    info!("starting scheduler, configuration {}", config_path.display());

    let clock = SystemClock::new();

    let certs_dir = state_dir.join("certs");
    let certs = match CertStore::init(certs_dir, config.root_cert_duration, clock.now()) {
        Ok(certs) => certs,
        Err(e) => {
            error!("unable to initialise certificates: {e}");
            return ExitCode::FAILURE;
        }
    };

    let signals = match SignalBridge::install(config.run_as_user) {
        Ok(signals) => signals,
        Err(e) => {
            error!("unable to install signal handlers: {e}");
            return ExitCode::FAILURE;
        }
    };

    let state = match DaemonState::new(config, config_path) {
        Ok(state) => state,
        Err(e) => {
            error!("unable to initialise scheduler state: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialisation succeeded; release the waiting parent.
    notify_parent();

    if cli.lazy && !state.printers.values().any(|p| p.shared) && state.jobs.is_empty() {
        info!("no shared printers and no pending jobs; exiting until needed");
        return ExitCode::SUCCESS;
    }

    let mut scheduler = Scheduler::new(clock, state, signals, certs);
    let status = match scheduler.run() {
        Ok(()) => {
            info!("scheduler shutting down normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("scheduler shutting down due to program error: {e}");
            ExitCode::FAILURE
        }
    };

    drop(lock_file);
    status
}

fn notify_parent() {
    let Some(ppid) = std::env::var(PARENT_PID_ENV)
        .ok()
        .and_then(|s| s.parse::<i32>().ok())
    else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(ppid), Signal::SIGUSR1) {
        debug!("unable to notify parent {ppid}: {e}");
    }
}

fn acquire_lock(path: &Path) -> std::io::Result<std::fs::File> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    file.try_lock_exclusive()?;
    use std::io::Write;
    let mut file = file;
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(file)
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate `spoold.log` → `.1` → `.2` → `.3` when it has grown too large.
/// Best-effort: rotation failures never block startup.
fn rotate_log_if_needed(log_path: &Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    state_dir: &Path,
    to_file: bool,
) -> std::io::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if !to_file {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(None);
    }

    let log_path = state_dir.join("spoold.log");
    rotate_log_if_needed(&log_path);

    // Startup marker, written synchronously so it is findable even if
    // the process dies before the appender flushes.
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        writeln!(file, "--- spoold: starting (pid: {}) ---\n", std::process::id())?;
    }

    let file_appender = tracing_appender::rolling::never(state_dir, "spoold.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(Some(guard))
}
