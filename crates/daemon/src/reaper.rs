// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child reaper.
//!
//! Runs when the `dead_children` latch is set: collects every exited
//! child without blocking, maps each pid to its job's pipeline slot, and
//! records the exit disposition. A failing backend (the last pipeline
//! slot) stops the printer; a failing filter fails only the job.

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use spoold_core::{Job, JobId, JobState, Printer};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, error, info};

/// One reaped child, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapedChild {
    pub pid: i32,
    /// Exit code for a normal exit, signal number for a signalled one.
    pub code: i32,
    pub signalled: bool,
}

/// Classify a wait status. Termination by the cancel signal counts as a
/// clean exit.
pub fn classify(status: WaitStatus) -> Option<ReapedChild> {
    match status {
        WaitStatus::Exited(pid, code) => Some(ReapedChild {
            pid: pid.as_raw(),
            code,
            signalled: false,
        }),
        WaitStatus::Signaled(pid, Signal::SIGTERM, _) => Some(ReapedChild {
            pid: pid.as_raw(),
            code: 0,
            signalled: false,
        }),
        WaitStatus::Signaled(pid, signal, _) => Some(ReapedChild {
            pid: pid.as_raw(),
            code: signal as i32,
            signalled: true,
        }),
        _ => None,
    }
}

/// Reap every available exited child without blocking.
pub fn reap(
    jobs: &mut BTreeMap<JobId, Job>,
    printers: &mut BTreeMap<String, Printer>,
    now: u64,
) {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => {
                if let Some(child) = classify(status) {
                    if child.code != 0 {
                        if child.signalled {
                            error!("PID {} crashed on signal {}", child.pid, child.code);
                        } else {
                            error!("PID {} stopped with status {}", child.pid, child.code);
                        }
                    } else {
                        debug!("PID {} exited with no errors", child.pid);
                    }
                    apply_exit(jobs, printers, child, now);
                }
            }
            Err(Errno::ECHILD) => break,
            Err(Errno::EINTR) => continue,
            Err(errno) => {
                error!("waitpid failed: {errno}");
                break;
            }
        }
    }
}

/// Record one classified exit against the owning job.
pub fn apply_exit(
    jobs: &mut BTreeMap<JobId, Job>,
    printers: &mut BTreeMap<String, Printer>,
    child: ReapedChild,
    now: u64,
) {
    for job in jobs.values_mut() {
        if job.state != JobState::Processing {
            continue;
        }
        let Some(slot) = job.record_exit(child.pid, child.code) else {
            continue;
        };

        if child.code != 0 && job.status >= 0 {
            // A negative status means the backend failed and the printer
            // needs to be stopped.
            if slot.is_last {
                job.set_disposition(-child.code);
            } else {
                job.set_disposition(child.code);
            }

            let filter = basename(&job.filters[slot.index]);
            let message = if child.signalled {
                format!(
                    "The process \"{}\" terminated unexpectedly on signal {}",
                    filter, child.code
                )
            } else {
                format!(
                    "The process \"{}\" stopped unexpectedly with status {}",
                    filter, child.code
                )
            };
            if let Some(printer) = printers.get_mut(&job.printer) {
                printer.set_state_message(message, now);
            }
        }
        return;
    }
}

/// Move fully-reaped jobs to their terminal state. Returns the finalized
/// job ids so the scheduler can retire their status pipes.
pub fn finalize_jobs(
    jobs: &mut BTreeMap<JobId, Job>,
    printers: &mut BTreeMap<String, Printer>,
) -> Vec<JobId> {
    let mut finalized = Vec::new();

    for job in jobs.values_mut() {
        if job.state != JobState::Processing || !job.all_reaped() {
            continue;
        }

        let terminal = job.terminal_state();
        job.state = terminal;
        info!("job {} finished: {}", job.id, terminal);

        if let Some(printer) = printers.get_mut(&job.printer) {
            if job.status < 0 {
                printer.stop();
            } else if printer.state == spoold_core::PrinterState::Processing {
                printer.state = spoold_core::PrinterState::Idle;
            }
        }
        finalized.push(job.id);
    }

    finalized
}

fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

#[cfg(test)]
#[path = "reaper_tests.rs"]
mod tests;
