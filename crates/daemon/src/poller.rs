// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event multiplexer.
//!
//! A thin wrapper over level-triggered `poll(2)`. The caller passes a
//! fresh registry snapshot and a relative timeout in seconds; the result
//! is the set of ready descriptors, or an interrupted wake-up which the
//! loop treats as a zero-work tick.

use crate::fdset::SnapshotEntry;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use std::collections::HashSet;
use std::os::unix::io::RawFd;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("poll failed: {0}")]
    Wait(Errno),
}

/// Ready descriptors from one wait.
#[derive(Debug, Default)]
pub struct Ready {
    readable: HashSet<RawFd>,
    writable: HashSet<RawFd>,
}

impl Ready {
    pub fn is_readable(&self, fd: RawFd) -> bool {
        self.readable.contains(&fd)
    }

    pub fn is_writable(&self, fd: RawFd) -> bool {
        self.writable.contains(&fd)
    }

    /// Clear a descriptor's ready bit in this local snapshot. Used for job
    /// status pipes so a descriptor number reused within the same
    /// iteration cannot be mistaken for the removed job's pipe.
    pub fn clear_readable(&mut self, fd: RawFd) {
        self.readable.remove(&fd);
    }

    pub fn len(&self) -> usize {
        self.readable.len() + self.writable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readable.is_empty() && self.writable.is_empty()
    }
}

/// Outcome of one multiplexer wait.
#[derive(Debug)]
pub enum Wait {
    Ready(Ready),
    /// Interrupted by a signal; not an error.
    Interrupted,
}

/// Block until a descriptor is ready or the timeout elapses.
pub fn wait(snapshot: &[SnapshotEntry], timeout_secs: u64) -> Result<Wait, PollerError> {
    let mut fds: Vec<PollFd> = Vec::with_capacity(snapshot.len());
    for row in snapshot {
        let mut flags = PollFlags::empty();
        if row.interest.readable {
            flags.insert(PollFlags::POLLIN);
        }
        if row.interest.writable {
            flags.insert(PollFlags::POLLOUT);
        }
        fds.push(PollFd::new(row.fd, flags));
    }

    let timeout_ms = timeout_secs.saturating_mul(1000).min(i32::MAX as u64) as i32;

    match poll(&mut fds, timeout_ms) {
        Ok(_) => {
            let mut ready = Ready::default();
            for (row, pfd) in snapshot.iter().zip(fds.iter()) {
                let revents = pfd.revents().unwrap_or_else(PollFlags::empty);
                // Hangup and error conditions surface as readability so
                // the owner observes EOF and cleans up.
                if revents.intersects(
                    PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL,
                ) {
                    ready.readable.insert(row.fd);
                }
                if revents.contains(PollFlags::POLLOUT) {
                    ready.writable.insert(row.fd);
                }
            }
            Ok(Wait::Ready(ready))
        }
        Err(Errno::EINTR) => Ok(Wait::Interrupted),
        Err(errno) => Err(PollerError::Wait(errno)),
    }
}

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;
