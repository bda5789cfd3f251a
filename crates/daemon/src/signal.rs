// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signal bridge.
//!
//! Async signal delivery is converted into loop-visible events with the
//! self-pipe pattern: the handler latches an atomic flag and writes one
//! wake byte to a non-blocking pipe whose read end is always registered
//! with the multiplexer. The loop drains the pipe first and reads the
//! flags second, so a signal arriving mid-drain produces at worst a
//! spurious wake-up, never a lost latch.

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};
use signal_hook::consts::{SIGCHLD, SIGHUP, SIGPIPE, SIGTERM};
use std::io::{PipeReader, PipeWriter};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("unable to create self-pipe: {0}")]
    Pipe(std::io::Error),
    #[error("unable to register signal handler: {0}")]
    Register(std::io::Error),
    #[error("unable to adjust signal mask: {0}")]
    Mask(Errno),
}

/// Latched flags drained from the bridge each loop iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalFlags {
    pub dead_children: bool,
    pub need_reload: bool,
    pub stop_scheduler: bool,
}

impl SignalFlags {
    pub fn any(&self) -> bool {
        self.dead_children || self.need_reload || self.stop_scheduler
    }
}

pub struct SignalBridge {
    reader: PipeReader,
    // Held so the write end stays open for the handlers.
    _writer: PipeWriter,
    chld: Arc<AtomicBool>,
    hup: Arc<AtomicBool>,
    term: Arc<AtomicBool>,
    sig_ids: Vec<signal_hook::SigId>,
    hold_depth: u32,
}

impl SignalBridge {
    /// Install handlers for CHLD, HUP, and TERM, and ignore PIPE
    /// process-wide. When `hup_is_stop` is set (running unprivileged),
    /// HUP requests a graceful stop instead of a reload.
    pub fn install(hup_is_stop: bool) -> Result<Self, SignalError> {
        let (reader, writer) = std::io::pipe().map_err(SignalError::Pipe)?;
        set_nonblocking(reader.as_raw_fd()).map_err(SignalError::Mask)?;
        set_nonblocking(writer.as_raw_fd()).map_err(SignalError::Mask)?;

        let chld = Arc::new(AtomicBool::new(false));
        let hup = Arc::new(AtomicBool::new(false));
        let term = Arc::new(AtomicBool::new(false));
        let mut sig_ids = Vec::new();

        // A handled SIGPIPE no longer kills the process; the handler
        // itself does nothing useful.
        sig_ids.push(
            signal_hook::flag::register(SIGPIPE, Arc::new(AtomicBool::new(false)))
                .map_err(SignalError::Register)?,
        );

        // Flag first, wake byte second; registration order matches.
        sig_ids.push(
            signal_hook::flag::register(SIGCHLD, Arc::clone(&chld))
                .map_err(SignalError::Register)?,
        );
        let hup_flag = if hup_is_stop { &term } else { &hup };
        sig_ids.push(
            signal_hook::flag::register(SIGHUP, Arc::clone(hup_flag))
                .map_err(SignalError::Register)?,
        );
        sig_ids.push(
            signal_hook::flag::register(SIGTERM, Arc::clone(&term))
                .map_err(SignalError::Register)?,
        );
        for signal in [SIGCHLD, SIGHUP, SIGTERM] {
            sig_ids.push(
                signal_hook::low_level::pipe::register_raw(signal, writer.as_raw_fd())
                    .map_err(SignalError::Register)?,
            );
        }

        Ok(Self {
            reader,
            _writer: writer,
            chld,
            hup,
            term,
            sig_ids,
            hold_depth: 0,
        })
    }

    /// Read end of the self-pipe; always registered readable.
    pub fn read_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    /// Drain the pipe and collect the latched flags.
    pub fn drain(&self) -> SignalFlags {
        let mut scratch = [0u8; 64];
        loop {
            match nix::unistd::read(self.reader.as_raw_fd(), &mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        }

        SignalFlags {
            dead_children: self.chld.swap(false, Ordering::SeqCst),
            need_reload: self.hup.swap(false, Ordering::SeqCst),
            stop_scheduler: self.term.swap(false, Ordering::SeqCst),
        }
    }

    /// Block TERM and CHLD delivery for a critical section. Nests.
    pub fn hold(&mut self) -> Result<(), SignalError> {
        if self.hold_depth == 0 {
            let mut set = SigSet::empty();
            set.add(Signal::SIGTERM);
            set.add(Signal::SIGCHLD);
            sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), None).map_err(SignalError::Mask)?;
        }
        self.hold_depth += 1;
        Ok(())
    }

    /// Release a matching [`hold`](Self::hold). The nesting count never
    /// goes below zero.
    pub fn release(&mut self) -> Result<(), SignalError> {
        match self.hold_depth {
            0 => Ok(()),
            1 => {
                let mut set = SigSet::empty();
                set.add(Signal::SIGTERM);
                set.add(Signal::SIGCHLD);
                sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&set), None)
                    .map_err(SignalError::Mask)?;
                self.hold_depth = 0;
                Ok(())
            }
            _ => {
                self.hold_depth -= 1;
                Ok(())
            }
        }
    }

    pub fn hold_depth(&self) -> u32 {
        self.hold_depth
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        for id in self.sig_ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

fn set_nonblocking(fd: RawFd) -> Result<(), Errno> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

#[cfg(test)]
#[path = "signal_tests.rs"]
mod tests;
