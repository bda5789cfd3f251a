// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job identifier and state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a print job.
///
/// Job ids are small integers assigned by the scheduler and reused in log
/// lines, status queries, and spool references.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct JobId(pub u32);

impl JobId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a job.
///
/// Transitions are driven only by the scheduler: `Pending` → `Processing`
/// on launch, and `Processing` → a terminal state when the last pipeline
/// child is reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Queued, waiting for the printer
    Pending,
    /// Held by an operator; not eligible to start
    Held,
    /// Filter pipeline is running
    Processing,
    /// Backend failed; printer stopped, job kept for retry
    Stopped,
    /// Finished cleanly
    Completed,
    /// Cancelled by request
    Cancelled,
    /// A filter failed
    Aborted,
}

impl JobState {
    /// True for states that still hold scheduler resources.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Stopped | JobState::Completed | JobState::Cancelled | JobState::Aborted
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Held => write!(f, "held"),
            JobState::Processing => write!(f, "processing"),
            JobState::Stopped => write!(f, "stopped"),
            JobState::Completed => write!(f, "completed"),
            JobState::Cancelled => write!(f, "cancelled"),
            JobState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Configuration for creating a new job
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub id: JobId,
    pub printer: String,
    pub title: String,
    /// Pipeline program names, in order. The last entry is the backend.
    pub filters: Vec<String>,
}

/// Result of recording one child exit against a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapedSlot {
    pub index: usize,
    /// True when this slot is the last of the pipeline (the backend).
    pub is_last: bool,
}

/// A job instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Name of the owning printer
    pub printer: String,
    pub title: String,
    pub state: JobState,
    /// Pipeline program names, in order. The last entry is the backend.
    pub filters: Vec<String>,
    /// Pipeline pids: positive while live, negated once reaped, zero when
    /// the slot was never started.
    pub procs: Vec<i32>,
    /// Per-slot exit code, written exactly once when the pid is reaped.
    pub exit_status: Vec<Option<i32>>,
    /// Read end of the status pipe (the children's stderr), raw value.
    pub status_pipe: Option<i32>,
    /// Overall disposition: zero is clean, positive is a filter failure,
    /// negative is a backend failure (the printer should stop).
    pub status: i32,
    /// Set when cancellation was requested; the reaper treats the
    /// resulting exits as clean.
    pub cancelled: bool,
}

impl Job {
    pub fn new(config: JobConfig) -> Self {
        let slots = config.filters.len();
        Self {
            id: config.id,
            printer: config.printer,
            title: config.title,
            state: JobState::Pending,
            filters: config.filters,
            procs: vec![0; slots],
            exit_status: vec![None; slots],
            status_pipe: None,
            status: 0,
            cancelled: false,
        }
    }

    /// Record pipeline launch: the job moves to `Processing`.
    pub fn start(&mut self, procs: Vec<i32>, status_pipe: i32) {
        debug_assert_eq!(procs.len(), self.filters.len());
        self.procs = procs;
        self.status_pipe = Some(status_pipe);
        self.state = JobState::Processing;
    }

    /// Number of pipeline children still running.
    pub fn live_procs(&self) -> usize {
        self.procs.iter().filter(|&&pid| pid > 0).count()
    }

    /// True once every started slot has been reaped.
    pub fn all_reaped(&self) -> bool {
        self.procs.iter().all(|&pid| pid <= 0)
    }

    /// Record one child exit. Replaces the slot with `-pid` and writes the
    /// per-slot exit code exactly once. Returns `None` when the pid does
    /// not belong to this job.
    pub fn record_exit(&mut self, pid: i32, code: i32) -> Option<ReapedSlot> {
        let index = self.procs.iter().position(|&p| p == pid)?;
        self.procs[index] = -pid;
        if self.exit_status[index].is_none() {
            self.exit_status[index] = Some(code);
        }
        Some(ReapedSlot {
            index,
            is_last: index + 1 == self.procs.len(),
        })
    }

    /// Record the overall disposition. A disposition already marked as a
    /// backend failure (negative) is sticky.
    pub fn set_disposition(&mut self, status: i32) {
        if self.status >= 0 {
            self.status = status;
        }
    }

    /// Terminal state implied by the disposition once all children are
    /// reaped.
    pub fn terminal_state(&self) -> JobState {
        if self.cancelled {
            JobState::Cancelled
        } else if self.status < 0 {
            JobState::Stopped
        } else if self.status > 0 {
            JobState::Aborted
        } else {
            JobState::Completed
        }
    }

    /// True while the job should keep the scheduler's 10-second rescan
    /// timer armed.
    pub fn keeps_scheduler_busy(&self) -> bool {
        matches!(self.state, JobState::Pending | JobState::Processing)
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
