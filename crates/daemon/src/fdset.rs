// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Descriptor interest registry.
//!
//! Tracks which descriptors the multiplexer should watch and why. Updates
//! are O(1); each loop iteration takes an O(n) snapshot. A descriptor must
//! be deregistered before its owner closes it, so the multiplexer never
//! observes a closed descriptor.

use spoold_core::JobId;
use std::collections::HashMap;
use std::os::unix::io::RawFd;

/// What a registered descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdOwner {
    Listener,
    Client(u64),
    JobStatus(JobId),
    Browse,
    Cgi,
    SelfPipe,
}

/// Readiness interest for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READ: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITE: Interest = Interest {
        readable: false,
        writable: true,
    };
    pub const READ_WRITE: Interest = Interest {
        readable: true,
        writable: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    interest: Interest,
    owner: FdOwner,
}

/// One row of a registry snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotEntry {
    pub fd: RawFd,
    pub interest: Interest,
    pub owner: FdOwner,
}

#[derive(Debug, Default)]
pub struct FdRegistry {
    entries: HashMap<RawFd, Entry>,
}

impl FdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a descriptor. Re-registering an fd replaces its entry; the
    /// previous owner must already have deregistered and closed it.
    pub fn register(&mut self, fd: RawFd, owner: FdOwner, interest: Interest) {
        self.entries.insert(fd, Entry { interest, owner });
    }

    /// Stop tracking a descriptor. Call before closing it.
    pub fn deregister(&mut self, fd: RawFd) -> bool {
        self.entries.remove(&fd).is_some()
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.entries.contains_key(&fd)
    }

    pub fn owner(&self, fd: RawFd) -> Option<FdOwner> {
        self.entries.get(&fd).map(|e| e.owner)
    }

    pub fn set_readable(&mut self, fd: RawFd, readable: bool) -> bool {
        match self.entries.get_mut(&fd) {
            Some(entry) => {
                entry.interest.readable = readable;
                true
            }
            None => false,
        }
    }

    pub fn set_writable(&mut self, fd: RawFd, writable: bool) -> bool {
        match self.entries.get_mut(&fd) {
            Some(entry) => {
                entry.interest.writable = writable;
                true
            }
            None => false,
        }
    }

    pub fn interest(&self, fd: RawFd) -> Option<Interest> {
        self.entries.get(&fd).map(|e| e.interest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot for one multiplexer call. Entries with no interest are
    /// skipped.
    pub fn snapshot(&self) -> Vec<SnapshotEntry> {
        let mut rows: Vec<SnapshotEntry> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.interest.is_empty())
            .map(|(&fd, e)| SnapshotEntry {
                fd,
                interest: e.interest,
                owner: e.owner,
            })
            .collect();
        rows.sort_by_key(|r| r.fd);
        rows
    }

    /// All tracked descriptors with their owners, for diagnostics.
    pub fn describe(&self) -> Vec<(RawFd, FdOwner, Interest)> {
        let mut rows: Vec<_> = self
            .entries
            .iter()
            .map(|(&fd, e)| (fd, e.owner, e.interest))
            .collect();
        rows.sort_by_key(|r| r.0);
        rows
    }
}

#[cfg(test)]
#[path = "fdset_tests.rs"]
mod tests;
