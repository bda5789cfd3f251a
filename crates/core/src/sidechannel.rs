// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Side-channel command frames.
//!
//! The side channel is a control socket between the print driver and a
//! backend, carried on a well-known descriptor. Each frame is a command
//! byte, a status byte, a big-endian u16 payload length, and the payload.

use thiserror::Error;

/// Largest payload a frame may carry.
pub const SC_MAX_DATA: usize = 2048;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SidechannelError {
    #[error("frame truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("payload length {0} exceeds the frame limit")]
    Oversized(usize),
}

/// Commands a driver may send to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScCommand {
    SoftReset,
    DrainOutput,
    GetBidi,
    GetDeviceId,
    GetState,
    GetConnected,
    /// Anything this backend does not understand.
    Unknown(u8),
}

impl ScCommand {
    pub fn to_byte(self) -> u8 {
        match self {
            ScCommand::SoftReset => 1,
            ScCommand::DrainOutput => 2,
            ScCommand::GetBidi => 3,
            ScCommand::GetDeviceId => 4,
            ScCommand::GetState => 5,
            ScCommand::GetConnected => 6,
            ScCommand::Unknown(b) => b,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => ScCommand::SoftReset,
            2 => ScCommand::DrainOutput,
            3 => ScCommand::GetBidi,
            4 => ScCommand::GetDeviceId,
            5 => ScCommand::GetState,
            6 => ScCommand::GetConnected,
            other => ScCommand::Unknown(other),
        }
    }
}

/// Response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScStatus {
    None,
    Ok,
    IoError,
    Timeout,
    NotImplemented,
}

impl ScStatus {
    pub fn to_byte(self) -> u8 {
        match self {
            ScStatus::None => 0,
            ScStatus::Ok => 1,
            ScStatus::IoError => 2,
            ScStatus::Timeout => 3,
            ScStatus::NotImplemented => 7,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => ScStatus::None,
            1 => ScStatus::Ok,
            2 => ScStatus::IoError,
            3 => ScStatus::Timeout,
            _ => ScStatus::NotImplemented,
        }
    }
}

/// One side-channel frame, either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScFrame {
    pub command: ScCommand,
    pub status: ScStatus,
    pub data: Vec<u8>,
}

impl ScFrame {
    pub fn command(command: ScCommand) -> Self {
        Self {
            command,
            status: ScStatus::None,
            data: Vec::new(),
        }
    }

    pub fn response(command: ScCommand, status: ScStatus, data: Vec<u8>) -> Self {
        Self {
            command,
            status,
            data,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SidechannelError> {
        if self.data.len() > SC_MAX_DATA {
            return Err(SidechannelError::Oversized(self.data.len()));
        }
        let mut out = Vec::with_capacity(4 + self.data.len());
        out.push(self.command.to_byte());
        out.push(self.status.to_byte());
        out.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    /// Decode one frame from the head of `buf`; returns the frame and the
    /// number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), SidechannelError> {
        if buf.len() < 4 {
            return Err(SidechannelError::Truncated {
                need: 4,
                have: buf.len(),
            });
        }
        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if len > SC_MAX_DATA {
            return Err(SidechannelError::Oversized(len));
        }
        if buf.len() < 4 + len {
            return Err(SidechannelError::Truncated {
                need: 4 + len,
                have: buf.len(),
            });
        }
        Ok((
            Self {
                command: ScCommand::from_byte(buf[0]),
                status: ScStatus::from_byte(buf[1]),
                data: buf[4..4 + len].to_vec(),
            },
            4 + len,
        ))
    }
}

#[cfg(test)]
#[path = "sidechannel_tests.rs"]
mod tests;
