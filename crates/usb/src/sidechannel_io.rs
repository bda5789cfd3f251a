// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed I/O on the side-channel descriptor.
//!
//! The driver hands the backend a socket on an inherited descriptor
//! (`SPOOLD_SC_FD`, descriptor 4 by default). Reads carry a per-call
//! budget so the side-channel thread can notice its stop flag once a
//! second.

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::stat::{fstat, SFlag};
use spoold_core::{ScFrame, SidechannelError};
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default side-channel descriptor number.
pub const SC_FD_DEFAULT: RawFd = 4;

/// Environment override for the side-channel descriptor.
pub const SC_FD_ENV: &str = "SPOOLD_SC_FD";

#[derive(Debug, Error)]
pub enum ScIoError {
    #[error("side channel timed out")]
    Timeout,
    #[error("side channel closed")]
    Closed,
    #[error("side channel I/O failed: {0}")]
    Io(Errno),
    #[error("side channel framing failed: {0}")]
    Frame(SidechannelError),
}

/// The backend's half of the side channel. A thin handle over the
/// inherited descriptor; copies share the descriptor, and `close`
/// invalidates them all (pending reads fail, which is how the shutdown
/// handshake interrupts the side-channel thread).
#[derive(Debug, Clone, Copy)]
pub struct ScChannel {
    fd: RawFd,
}

impl ScChannel {
    /// Pick up the descriptor the driver passed us, when it is actually
    /// a socket.
    pub fn from_env() -> Option<Self> {
        let fd = std::env::var(SC_FD_ENV)
            .ok()
            .and_then(|s| s.parse::<RawFd>().ok())
            .unwrap_or(SC_FD_DEFAULT);

        let stat = fstat(fd).ok()?;
        let mode = SFlag::from_bits_truncate(stat.st_mode);
        if mode.contains(SFlag::S_IFSOCK) {
            Some(Self { fd })
        } else {
            None
        }
    }

    #[cfg(test)]
    pub fn from_fd(fd: RawFd) -> Self {
        Self { fd }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Read one command frame within the given budget.
    pub fn read_frame(&self, budget: Duration) -> Result<ScFrame, ScIoError> {
        let deadline = Instant::now() + budget;
        let mut buffer: Vec<u8> = Vec::with_capacity(64);

        loop {
            match ScFrame::decode(&buffer) {
                Ok((frame, _consumed)) => return Ok(frame),
                Err(SidechannelError::Truncated { .. }) => {}
                Err(e) => return Err(ScIoError::Frame(e)),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ScIoError::Timeout);
            }

            let mut fds = [PollFd::new(self.fd, PollFlags::POLLIN)];
            match poll(&mut fds, remaining.as_millis().min(i32::MAX as u128) as i32) {
                Ok(0) => return Err(ScIoError::Timeout),
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(ScIoError::Io(errno)),
            }

            let mut scratch = [0u8; 256];
            match nix::unistd::read(self.fd, &mut scratch) {
                Ok(0) => return Err(ScIoError::Closed),
                Ok(n) => buffer.extend_from_slice(&scratch[..n]),
                Err(Errno::EAGAIN) | Err(Errno::EINTR) => continue,
                Err(errno) => return Err(ScIoError::Io(errno)),
            }
        }
    }

    /// Write one frame, whole.
    pub fn write_frame(&self, frame: &ScFrame) -> Result<(), ScIoError> {
        let bytes = frame.encode().map_err(ScIoError::Frame)?;
        let mut offset = 0;
        while offset < bytes.len() {
            match nix::unistd::write(self.fd, &bytes[offset..]) {
                Ok(0) => return Err(ScIoError::Closed),
                Ok(n) => offset += n,
                Err(Errno::EINTR) => continue,
                Err(Errno::EPIPE) => return Err(ScIoError::Closed),
                Err(errno) => return Err(ScIoError::Io(errno)),
            }
        }
        Ok(())
    }

    /// Close the descriptor. Part of the shutdown handshake: the
    /// side-channel thread's pending read fails once the peer is gone.
    pub fn close(self) {
        let _ = nix::unistd::close(self.fd);
    }
}

#[cfg(test)]
#[path = "sidechannel_io_tests.rs"]
mod tests;
