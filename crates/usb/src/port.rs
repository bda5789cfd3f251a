// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Printer transfer port.
//!
//! The coordinator drives a [`PrinterPort`] rather than a USB handle so
//! its threading and retry behaviour can be exercised against a fake
//! device in tests. The production implementation wraps an open
//! [`UsbPrinter`](crate::finder::UsbPrinter).

use std::time::Duration;
use thiserror::Error;

/// Transfer outcomes the coordinator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Transaction timed out; no bytes are counted.
    #[error("transfer timed out")]
    Timeout,
    /// Endpoint stalled.
    #[error("endpoint stalled")]
    Stall,
    /// Transfer aborted by a signal.
    #[error("transfer interrupted")]
    Interrupted,
    /// Device gone.
    #[error("device disconnected")]
    Disconnected,
    #[error("transfer failed")]
    Other,
}

impl From<rusb::Error> for TransferError {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::Timeout => TransferError::Timeout,
            rusb::Error::Pipe => TransferError::Stall,
            rusb::Error::Interrupted => TransferError::Interrupted,
            rusb::Error::NoDevice => TransferError::Disconnected,
            _ => TransferError::Other,
        }
    }
}

/// Bulk and control operations against one opened printer.
pub trait PrinterPort: Send + Sync {
    /// Write to the bulk-out endpoint; returns the bytes accepted.
    fn write_bulk(&self, data: &[u8], timeout: Duration) -> Result<usize, TransferError>;

    /// Read from the bulk-in endpoint; returns the bytes received.
    /// Unidirectional printers report [`TransferError::Other`].
    fn read_bulk(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransferError>;

    /// Fetch the IEEE-1284 device ID.
    fn device_id(&self) -> Result<String, TransferError>;

    /// Issue a device reset.
    fn reset(&self) -> Result<(), TransferError>;

    /// Protocol 2 or better was negotiated.
    fn bidirectional(&self) -> bool;

    /// The device handle is open.
    fn connected(&self) -> bool;
}

#[cfg(test)]
#[path = "port_tests.rs"]
mod tests;
