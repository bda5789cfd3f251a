// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! spoold-usb: USB printer backend.
//!
//! With no arguments, lists detected printers for discovery. With job
//! arguments (`uri hostname resource options print-fd copies`), streams
//! the job to the matching printer, draining the back channel and
//! servicing side-channel commands until done.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use clap::Parser;
use rusb::Context;
use spoold_core::match_device_uri;
use spoold_usb::{find_device, list_devices, BackendStatus, Coordinator, Probe, ScChannel};
use std::os::unix::io::RawFd;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "spoold-usb", about = "USB printer backend", version)]
struct Cli {
    /// Device URI of the target printer
    uri: Option<String>,
    /// Host the job came from
    hostname: Option<String>,
    /// Queue name
    resource: Option<String>,
    /// Job options
    options: Option<String>,
    /// Descriptor carrying the job data (0 = stdin)
    print_fd: Option<RawFd>,
    /// Copies to print
    copies: Option<u32>,
}

fn main() -> ExitCode {
    // Diagnostics go to stderr alongside the status lines; the scheduler
    // logs unrecognised lines at debug level.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();

    let Some(uri) = cli.uri else {
        // Discovery mode.
        return match list_devices() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("ERROR: Unable to list USB devices: {e}");
                ExitCode::from(BackendStatus::Failed.exit_code())
            }
        };
    };

    let print_fd = cli.print_fd.unwrap_or(0);
    let copies = cli.copies.unwrap_or(1);

    let context = match Context::new() {
        Ok(context) => context,
        Err(e) => {
            eprintln!("ERROR: Unable to initialise USB: {e}");
            return ExitCode::from(BackendStatus::Stop.exit_code());
        }
    };

    // Wait for the requested printer to show up.
    let found = loop {
        let result = find_device(&context, true, |_printer, device_uri, _id| {
            if match_device_uri(&uri, device_uri) {
                Probe::Accept
            } else {
                Probe::KeepSearching
            }
        });
        match result {
            Ok(Some(found)) => break found,
            Ok(None) => {
                eprintln!("INFO: Waiting for printer to become available.");
                std::thread::sleep(Duration::from_secs(5));
            }
            Err(e) => {
                eprintln!("ERROR: Unable to enumerate USB devices: {e}");
                return ExitCode::from(BackendStatus::Stop.exit_code());
            }
        }
    };
    debug!("matched {} as {}", uri, found.device_uri);

    // When printing from stdin, ignore TERM so the driver can finish out
    // page data; a raw job keeps its cancel path.
    if print_fd == 0 {
        if let Err(e) =
            signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::new(AtomicBool::new(false)))
        {
            debug!("unable to ignore SIGTERM: {e}");
        }
    }

    let sidechannel = ScChannel::from_env();

    let coordinator = Coordinator::new(found.printer, Box::new(std::io::stdout()));

    let side_thread = match sidechannel {
        Some(channel) => match coordinator.spawn_sidechannel(channel, print_fd) {
            Ok(handle) => Some(handle),
            Err(e) => {
                eprintln!("ERROR: There was an unrecoverable USB error.");
                eprintln!("DEBUG: Couldn't create side-channel thread: {e}");
                return ExitCode::from(BackendStatus::Stop.exit_code());
            }
        },
        None => None,
    };

    let read_thread = match coordinator.spawn_reader() {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("ERROR: There was an unrecoverable USB error.");
            eprintln!("DEBUG: Couldn't create read thread: {e}");
            return ExitCode::from(BackendStatus::Stop.exit_code());
        }
    };

    let status = coordinator.print_job(print_fd, copies, sidechannel);

    coordinator.shutdown(sidechannel);
    let _ = read_thread.join();
    if let Some(side) = side_thread {
        let _ = side.join();
    }

    if let Some(mut printer) = coordinator.into_port() {
        printer.close();
    }

    ExitCode::from(status.exit_code())
}
