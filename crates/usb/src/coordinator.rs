// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Three-thread print coordinator.
//!
//! The main (writer) thread streams job data to the bulk-out endpoint; a
//! reader thread drains the bulk-in endpoint into the back channel on a
//! 250 ms cadence; a side-channel thread services driver commands. The
//! threads share one I/O lock, a flag guarded by a mutex and condition:
//! the writer holds it except around its blocking poll on the job
//! descriptor, and the soft-reset path takes it to quiesce the device.
//! Every shutdown wait is bounded by an absolute deadline.

use crate::port::{PrinterPort, TransferError};
use crate::sidechannel_io::{ScChannel, ScIoError};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::unistd::{lseek, Whence};
use parking_lot::{Condvar, Mutex};
use spoold_core::{ScCommand, ScFrame, ScStatus};
use std::io::Write;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Bulk transfer budget.
const BULK_TIMEOUT: Duration = Duration::from_secs(60);

/// Back-channel read cadence.
const READ_CADENCE: Duration = Duration::from_millis(250);

/// Grace for the side-channel thread at shutdown.
const WAIT_SIDE_DELAY: Duration = Duration::from_secs(3);

/// Grace for the reader thread at shutdown, plus one extra second once
/// its pending transfer has been told not to wait for EOF.
const WAIT_EOF_DELAY: Duration = Duration::from_secs(7);

/// Side-channel read budget per call.
const SIDE_READ_BUDGET: Duration = Duration::from_secs(1);

/// Job data is moved through an 8 KiB buffer.
const PRINT_BUF_SIZE: usize = 8192;

/// Backend process exit disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Ok,
    /// The job failed; it may be retried elsewhere.
    Failed,
    /// The printer should stop.
    Stop,
}

impl BackendStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            BackendStatus::Ok => 0,
            BackendStatus::Failed => 1,
            BackendStatus::Stop => 4,
        }
    }
}

struct Shared<P> {
    port: P,
    /// The I/O lock flag; true while some thread owns device I/O.
    io_held: Mutex<bool>,
    io_cond: Condvar,
    read_stop: AtomicBool,
    read_done: Mutex<bool>,
    read_done_cond: Condvar,
    side_stop: AtomicBool,
    side_done: Mutex<bool>,
    side_done_cond: Condvar,
    /// Keep reading after stop until the device reports EOF.
    wait_eof: AtomicBool,
    /// A drain-output request is outstanding; the writer replies once
    /// its queue is empty.
    drain_output: AtomicBool,
    /// Soft reset flushed the job descriptor; the writer must forget its
    /// residue.
    discard_residue: AtomicBool,
    backchannel: Mutex<Box<dyn Write + Send>>,
}

impl<P: PrinterPort> Shared<P> {
    /// Drop the I/O lock so the reader or side channel can transfer.
    fn release_io(&self) {
        let mut held = self.io_held.lock();
        *held = false;
        self.io_cond.notify_all();
    }

    /// Take the I/O lock, waiting out any holder.
    fn acquire_io(&self) {
        let mut held = self.io_held.lock();
        while *held {
            self.io_cond.wait(&mut held);
        }
        *held = true;
    }
}

pub struct Coordinator<P: PrinterPort> {
    shared: Arc<Shared<P>>,
}

impl<P: PrinterPort + 'static> Coordinator<P> {
    pub fn new(port: P, backchannel: Box<dyn Write + Send>) -> Self {
        Self {
            shared: Arc::new(Shared {
                port,
                io_held: Mutex::new(true),
                io_cond: Condvar::new(),
                read_stop: AtomicBool::new(false),
                read_done: Mutex::new(false),
                read_done_cond: Condvar::new(),
                side_stop: AtomicBool::new(false),
                side_done: Mutex::new(false),
                side_done_cond: Condvar::new(),
                wait_eof: AtomicBool::new(false),
                drain_output: AtomicBool::new(false),
                discard_residue: AtomicBool::new(false),
                backchannel: Mutex::new(backchannel),
            }),
        }
    }

    pub fn port(&self) -> &P {
        &self.shared.port
    }

    /// Reclaim the port once every helper thread has been joined, for
    /// the final device close.
    pub fn into_port(self) -> Option<P> {
        Arc::try_unwrap(self.shared).ok().map(|shared| shared.port)
    }

    /// Start the back-channel reader thread.
    pub fn spawn_reader(&self) -> std::io::Result<std::thread::JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        std::thread::Builder::new()
            .name("backchannel-reader".into())
            .spawn(move || run_reader(&shared))
    }

    /// Start the side-channel thread.
    pub fn spawn_sidechannel(
        &self,
        channel: ScChannel,
        print_fd: RawFd,
    ) -> std::io::Result<std::thread::JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        std::thread::Builder::new()
            .name("sidechannel".into())
            .spawn(move || run_sidechannel(&shared, channel, print_fd))
    }

    /// Stream the job to the printer. Runs on the calling (main) thread.
    pub fn print_job(
        &self,
        print_fd: RawFd,
        copies: u32,
        sc: Option<ScChannel>,
    ) -> BackendStatus {
        let shared = &self.shared;
        let mut buffer = [0u8; PRINT_BUF_SIZE];
        // Unsent tail of the buffer after a partial bulk write.
        let mut offset = 0usize;
        let mut pending = 0usize;
        let mut total_bytes: u64 = 0;

        let mut copies = copies.max(1);
        while copies > 0 {
            copies -= 1;
            eprintln!("INFO: Sending data to printer.");

            if print_fd != 0 {
                let _ = lseek(print_fd, 0, Whence::SeekSet);
                eprintln!("PAGE: 1 1");
            }

            loop {
                // Adaptive poll: 100 ms while residue remains, a
                // non-blocking check while draining, forever otherwise.
                let timeout_ms: i32 = if pending > 0 {
                    100
                } else if shared.drain_output.load(Ordering::SeqCst) {
                    0
                } else {
                    -1
                };

                // I/O is unlocked around the poll.
                shared.release_io();
                let polled = if pending == 0 {
                    let mut fds = [PollFd::new(print_fd, PollFlags::POLLIN)];
                    poll(&mut fds, timeout_ms).map(|n| {
                        let ready = fds[0]
                            .revents()
                            .unwrap_or_else(PollFlags::empty)
                            .intersects(PollFlags::POLLIN | PollFlags::POLLHUP);
                        (n, ready)
                    })
                } else {
                    let mut fds: [PollFd; 0] = [];
                    poll(&mut fds, timeout_ms).map(|n| (n, false))
                };
                shared.acquire_io();

                if shared.discard_residue.swap(false, Ordering::SeqCst) {
                    // A soft reset flushed the job stream.
                    pending = 0;
                    offset = 0;
                }

                let (nfds, input_ready) = match polled {
                    Ok(result) => result,
                    Err(Errno::EINTR) if total_bytes == 0 => {
                        eprintln!(
                            "DEBUG: Received an interrupt before any bytes were written, aborting."
                        );
                        return BackendStatus::Ok;
                    }
                    Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
                    Err(e) => {
                        eprintln!("ERROR: Unable to read print data.");
                        eprintln!("DEBUG: job poll failed: {e}");
                        return BackendStatus::Failed;
                    }
                };

                // Drain completed: everything read was written.
                if shared.drain_output.load(Ordering::SeqCst) && nfds == 0 && pending == 0 {
                    if let Some(sc) = sc {
                        let _ = sc.write_frame(&ScFrame::response(
                            ScCommand::DrainOutput,
                            ScStatus::Ok,
                            Vec::new(),
                        ));
                    }
                    shared.drain_output.store(false, Ordering::SeqCst);
                }

                if input_ready {
                    match nix::unistd::read(print_fd, &mut buffer) {
                        Ok(0) => break,
                        Ok(n) => {
                            pending = n;
                            offset = 0;
                            debug!("read {n} bytes of print data");
                        }
                        Err(Errno::EAGAIN) | Err(Errno::EINTR) => pending = 0,
                        Err(e) => {
                            eprintln!("ERROR: Unable to read print data.");
                            eprintln!("DEBUG: job read failed: {e}");
                            return BackendStatus::Failed;
                        }
                    }
                }

                if pending > 0 {
                    let chunk = &buffer[offset..offset + pending];
                    let result = match shared.port.write_bulk(chunk, BULK_TIMEOUT) {
                        // Keep the byte count at zero; nothing is resent.
                        Err(TransferError::Timeout) => {
                            eprintln!("DEBUG: Got USB transaction timeout during write.");
                            Ok(0)
                        }
                        Err(TransferError::Stall) => {
                            eprintln!("DEBUG: Got USB pipe stalled during write.");
                            shared.port.write_bulk(chunk, BULK_TIMEOUT)
                        }
                        Err(TransferError::Interrupted) => {
                            eprintln!("DEBUG: Got USB return aborted during write.");
                            shared.port.write_bulk(chunk, BULK_TIMEOUT)
                        }
                        other => other,
                    };

                    match result {
                        Ok(written) => {
                            if written > 0 {
                                debug!("wrote {written} bytes of print data");
                                pending -= written;
                                offset += written;
                                total_bytes += written as u64;
                            }
                        }
                        Err(e) => {
                            eprintln!("ERROR: Unable to send data to printer.");
                            eprintln!("DEBUG: bulk write returned {e}.");
                            return BackendStatus::Failed;
                        }
                    }
                }
            }
        }

        eprintln!("DEBUG: Sent {total_bytes} bytes...");
        BackendStatus::Ok
    }

    /// Ordered shutdown: retire the side channel first, then give the
    /// reader its bounded grace.
    pub fn shutdown(&self, sc: Option<ScChannel>) {
        let shared = &self.shared;

        if let Some(sc) = sc {
            sc.close();
            shared.release_io();
            shared.side_stop.store(true, Ordering::SeqCst);

            let mut done = shared.side_done.lock();
            if !*done {
                let deadline = Instant::now() + WAIT_SIDE_DELAY;
                while !*done {
                    if shared
                        .side_done_cond
                        .wait_until(&mut done, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
            }
        }

        shared.read_stop.store(true, Ordering::SeqCst);
        let mut done = shared.read_done.lock();
        if !*done {
            debug!("waiting for the read thread to exit");
            let deadline = Instant::now() + WAIT_EOF_DELAY;
            while !*done {
                if shared
                    .read_done_cond
                    .wait_until(&mut done, deadline)
                    .timed_out()
                {
                    break;
                }
            }

            if !*done {
                // Abort the pending read and give it one more second.
                debug!("read thread still active, aborting the pending read");
                shared.wait_eof.store(false, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(1);
                while !*done {
                    if shared
                        .read_done_cond
                        .wait_until(&mut done, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
            }
        }
    }
}

/// Back-channel reader: one bulk-in attempt per 250 ms window.
fn run_reader<P: PrinterPort>(shared: &Shared<P>) {
    loop {
        let start = Instant::now();
        let mut buf = [0u8; 512];

        let got_data = match shared.port.read_bulk(&mut buf, BULK_TIMEOUT) {
            Ok(n) if n > 0 => {
                debug!("read {n} bytes of back-channel data");
                let mut sink = shared.backchannel.lock();
                let _ = sink.write_all(&buf[..n]);
                let _ = sink.flush();
                true
            }
            Ok(_) => false,
            Err(TransferError::Timeout) => {
                debug!("bulk-in transaction timeout");
                false
            }
            Err(TransferError::Stall) => {
                debug!("bulk-in pipe stalled");
                false
            }
            Err(TransferError::Interrupted) => {
                debug!("bulk-in aborted");
                false
            }
            Err(e) => {
                debug!("bulk-in failed: {e}");
                false
            }
        };

        let keep_going =
            shared.wait_eof.load(Ordering::SeqCst) || !shared.read_stop.load(Ordering::SeqCst);

        // Throttle empty rounds to the cadence.
        if !got_data && keep_going {
            let elapsed = start.elapsed();
            if elapsed < READ_CADENCE {
                std::thread::sleep(READ_CADENCE - elapsed);
            }
        }

        if !(shared.wait_eof.load(Ordering::SeqCst) || !shared.read_stop.load(Ordering::SeqCst)) {
            break;
        }
    }

    let mut done = shared.read_done.lock();
    *done = true;
    shared.read_done_cond.notify_all();
}

/// Side-channel servicing: one command at a time, one-second read budget
/// so the stop flag is honoured promptly.
fn run_sidechannel<P: PrinterPort>(shared: &Shared<P>, channel: ScChannel, print_fd: RawFd) {
    loop {
        let frame = match channel.read_frame(SIDE_READ_BUDGET) {
            Ok(frame) => frame,
            Err(ScIoError::Timeout) => {
                if shared.side_stop.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
            Err(_) => break,
        };

        match frame.command {
            ScCommand::SoftReset => {
                debug!("SOFT_RESET received from driver");
                soft_reset(shared, print_fd);
                let _ = channel.write_frame(&ScFrame::response(
                    ScCommand::SoftReset,
                    ScStatus::Ok,
                    Vec::new(),
                ));
            }
            ScCommand::DrainOutput => {
                debug!("DRAIN_OUTPUT received from driver");
                // The writer replies once its queue is empty.
                shared.drain_output.store(true, Ordering::SeqCst);
            }
            ScCommand::GetBidi => {
                let bidi = u8::from(shared.port.bidirectional());
                let _ = channel.write_frame(&ScFrame::response(
                    ScCommand::GetBidi,
                    ScStatus::Ok,
                    vec![bidi],
                ));
            }
            ScCommand::GetDeviceId => {
                let (status, data) = match shared.port.device_id() {
                    Ok(id) => (ScStatus::Ok, id.into_bytes()),
                    Err(_) => (ScStatus::IoError, Vec::new()),
                };
                let _ = channel.write_frame(&ScFrame::response(
                    ScCommand::GetDeviceId,
                    status,
                    data,
                ));
            }
            ScCommand::GetState => {
                // ONLINE
                let _ = channel.write_frame(&ScFrame::response(
                    ScCommand::GetState,
                    ScStatus::Ok,
                    vec![1],
                ));
            }
            ScCommand::GetConnected => {
                let connected = u8::from(shared.port.connected());
                let _ = channel.write_frame(&ScFrame::response(
                    ScCommand::GetConnected,
                    ScStatus::Ok,
                    vec![connected],
                ));
            }
            ScCommand::Unknown(code) => {
                debug!("unknown side-channel command {code}");
                let _ = channel.write_frame(&ScFrame::response(
                    frame.command,
                    ScStatus::NotImplemented,
                    Vec::new(),
                ));
            }
        }

        if shared.side_stop.load(Ordering::SeqCst) {
            break;
        }
    }

    let mut done = shared.side_done.lock();
    *done = true;
    shared.side_done_cond.notify_all();
}

/// Quiesce the device: wait for the writer to release the I/O lock, take
/// it, flush whatever is queued on the job descriptor, and reset.
fn soft_reset<P: PrinterPort>(shared: &Shared<P>, print_fd: RawFd) {
    {
        let mut held = shared.io_held.lock();
        while *held {
            let deadline = Instant::now() + Duration::from_secs(1);
            while *held {
                if shared.io_cond.wait_until(&mut held, deadline).timed_out() {
                    break;
                }
            }
        }
        *held = true;
    }

    // The writer must restart with an empty buffer.
    shared.discard_residue.store(true, Ordering::SeqCst);

    // Flush bytes waiting on the job descriptor.
    loop {
        let mut fds = [PollFd::new(print_fd, PollFlags::POLLIN)];
        let readable = matches!(poll(&mut fds, 0), Ok(n) if n > 0);
        if !readable {
            break;
        }
        let mut scratch = [0u8; 2048];
        match nix::unistd::read(print_fd, &mut scratch) {
            Ok(n) if n > 0 => continue,
            _ => break,
        }
    }

    let _ = shared.port.reset();

    shared.release_io();
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
