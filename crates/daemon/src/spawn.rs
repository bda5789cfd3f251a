// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job pipeline launcher.
//!
//! A job runs as a chain of filter processes whose stdout feeds the next
//! stdin; the last process is the backend. Every child's stderr is the
//! job's status pipe, which the scheduler multiplexes for status lines.
//! The backend additionally receives one end of a side-channel socket
//! pair on an inherited descriptor advertised via `SPOOLD_SC_FD`.

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use spoold_core::Job;
use std::io::PipeReader;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable naming the side-channel descriptor in a child.
pub const SC_FD_ENV: &str = "SPOOLD_SC_FD";

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("a job pipeline needs at least one process")]
    EmptyPipeline,
    #[error("unable to launch \"{program}\": {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },
    #[error("pipeline plumbing failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("descriptor flag update failed: {0}")]
    Fcntl(nix::errno::Errno),
}

/// A launched pipeline: the children's pids, in slot order, and the read
/// end of their shared status pipe.
#[derive(Debug)]
pub struct LaunchedPipeline {
    pub procs: Vec<i32>,
    pub status_pipe: PipeReader,
}

/// Everything a pipeline launch needs to know about its job.
#[derive(Debug, Clone, Copy)]
pub struct PipelineArgs<'a> {
    pub job_id: u32,
    pub title: &'a str,
    pub copies: u32,
    pub device_uri: &'a str,
    pub printer_name: &'a str,
    pub spool_file: Option<&'a Path>,
}

pub fn launch_pipeline(
    filters: &[String],
    args: PipelineArgs<'_>,
) -> Result<LaunchedPipeline, SpawnError> {
    if filters.is_empty() {
        return Err(SpawnError::EmptyPipeline);
    }

    let (status_read, status_write) = std::io::pipe()?;
    set_nonblocking(status_read.as_raw_fd())?;

    // Side channel between the driver filters and the backend.
    let (filter_sc, backend_sc) = UnixStream::pair()?;

    let mut procs: Vec<i32> = Vec::with_capacity(filters.len());
    let mut previous_stdout = None;

    for (slot, program) in filters.iter().enumerate() {
        let is_backend = slot + 1 == filters.len();

        let mut command = Command::new(program);

        let copies = args.copies.to_string();
        if is_backend {
            command.args([
                args.device_uri,
                "localhost",
                args.printer_name,
                "",
                "0",
                copies.as_str(),
            ]);
        } else {
            let job_id = args.job_id.to_string();
            command.args([job_id.as_str(), args.title, copies.as_str()]);
        }

        match previous_stdout.take() {
            Some(stdout) => {
                command.stdin(Stdio::from(stdout));
            }
            None => match args.spool_file {
                Some(path) => {
                    command.stdin(Stdio::from(std::fs::File::open(path)?));
                }
                None => {
                    command.stdin(Stdio::null());
                }
            },
        }

        if is_backend {
            command.stdout(Stdio::null());
        } else {
            command.stdout(Stdio::piped());
        }
        command.stderr(Stdio::from(status_write.try_clone()?));

        command.env("DEVICE_URI", args.device_uri);

        // The side-channel end is inherited in place: clear its
        // close-on-exec flag for this spawn only.
        let sc_end = if is_backend { &backend_sc } else { &filter_sc };
        command.env(SC_FD_ENV, sc_end.as_raw_fd().to_string());
        let inherit = InheritGuard::new(sc_end.as_raw_fd())?;

        let mut child = command.spawn().map_err(|source| {
            terminate_pids(&procs);
            SpawnError::Launch {
                program: program.clone(),
                source,
            }
        })?;
        drop(inherit);

        debug!(
            job = args.job_id,
            slot,
            program = %program,
            pid = child.id(),
            "pipeline child started"
        );
        procs.push(child.id() as i32);
        previous_stdout = child.stdout.take();
    }

    Ok(LaunchedPipeline {
        procs,
        status_pipe: status_read,
    })
}

/// Request cancellation: TERM every live child and mark the job so the
/// reaper treats the exits as clean.
pub fn cancel_job(job: &mut Job) {
    job.cancelled = true;
    let live: Vec<i32> = job.procs.iter().copied().filter(|&p| p > 0).collect();
    terminate_pids(&live);
}

fn terminate_pids(pids: &[i32]) {
    for &pid in pids {
        if pid <= 0 {
            continue;
        }
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!(pid, "unable to terminate pipeline child: {e}");
        }
    }
}

/// Put a descriptor into non-blocking mode.
pub fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    use nix::fcntl::OFlag;
    let set = || -> Result<(), nix::errno::Errno> {
        let flags = fcntl(fd, FcntlArg::F_GETFL)?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(fd, FcntlArg::F_SETFL(flags))?;
        Ok(())
    };
    set().map_err(std::io::Error::from)
}

/// Clears close-on-exec for the lifetime of one spawn, then restores it.
struct InheritGuard {
    fd: RawFd,
}

impl InheritGuard {
    fn new(fd: RawFd) -> Result<Self, SpawnError> {
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty())).map_err(SpawnError::Fcntl)?;
        Ok(Self { fd })
    }
}

impl Drop for InheritGuard {
    fn drop(&mut self) {
        let _ = fcntl(self.fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC));
    }
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
