// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! spoold-core: shared model for the spoold scheduler and its backends

pub mod clock;
pub mod device_id;
pub mod job;
pub mod printer;
pub mod sidechannel;

pub use clock::{deadline_in, Clock, FakeClock, SystemClock, MAX_TIMEOUT, MIN_TIMEOUT};
pub use device_id::{
    encode_device_id, extract_device_id, make_device_uri, match_device_uri, parse_device_id,
    DeviceId, DeviceIdError, UriParts,
};
pub use job::{Job, JobConfig, JobId, JobState};
pub use printer::{Printer, PrinterState, StateEntry, PRINTER_HISTORY_MAX};
pub use sidechannel::{ScCommand, ScFrame, ScStatus, SidechannelError};
