// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Printer record and state history.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Maximum number of state-message entries kept per printer.
pub const PRINTER_HISTORY_MAX: usize = 10;

/// State of a printer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterState {
    Idle,
    Processing,
    Stopped,
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrinterState::Idle => write!(f, "idle"),
            PrinterState::Processing => write!(f, "processing"),
            PrinterState::Stopped => write!(f, "stopped"),
        }
    }
}

/// One entry of a printer's state history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub at: u64,
    pub message: String,
}

/// A printer known to the scheduler.
///
/// Mutated only by the scheduler thread; backends learn about printers
/// through their device URI and the filter contract, never through shared
/// memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Printer {
    pub name: String,
    /// Device URI handed to the backend (e.g. `usb://HP/DeskJet`)
    pub device_uri: String,
    pub state: PrinterState,
    pub state_message: String,
    /// Advertised to the local network when browsing is on
    pub shared: bool,
    /// Learned from a remote browse advert rather than local configuration
    pub remote: bool,
    /// Last time an advert was sent (local) or received (remote)
    pub browse_time: u64,
    /// Bounded ring of recent state messages
    pub history: VecDeque<StateEntry>,
}

impl Printer {
    pub fn new(name: impl Into<String>, device_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_uri: device_uri.into(),
            state: PrinterState::Idle,
            state_message: String::new(),
            shared: false,
            remote: false,
            browse_time: 0,
            history: VecDeque::new(),
        }
    }

    /// Record a state message and append it to the bounded history ring.
    pub fn set_state_message(&mut self, message: impl Into<String>, now: u64) {
        self.state_message = message.into();
        if self.history.len() == PRINTER_HISTORY_MAX {
            self.history.pop_front();
        }
        self.history.push_back(StateEntry {
            at: now,
            message: self.state_message.clone(),
        });
    }

    pub fn stop(&mut self) {
        self.state = PrinterState::Stopped;
    }

    /// True when the queue can accept a new job launch.
    pub fn is_available(&self) -> bool {
        self.state == PrinterState::Idle && !self.remote
    }
}

#[cfg(test)]
#[path = "printer_tests.rs"]
mod tests;
