// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn command_frame_encodes_empty_payload() {
    let frame = ScFrame::command(ScCommand::SoftReset);
    let bytes = frame.encode().unwrap();
    assert_eq!(bytes, vec![1, 0, 0, 0]);
}

#[test]
fn response_frame_carries_payload() {
    let frame = ScFrame::response(ScCommand::GetBidi, ScStatus::Ok, vec![1]);
    let bytes = frame.encode().unwrap();
    assert_eq!(bytes, vec![3, 1, 0, 1, 1]);

    let (decoded, consumed) = ScFrame::decode(&bytes).unwrap();
    assert_eq!(consumed, 5);
    assert_eq!(decoded, frame);
}

#[test]
fn decode_reports_truncation() {
    assert_eq!(
        ScFrame::decode(&[1, 0]),
        Err(SidechannelError::Truncated { need: 4, have: 2 })
    );

    // Header promises 4 data bytes, only 1 present.
    assert_eq!(
        ScFrame::decode(&[4, 1, 0, 4, 9]),
        Err(SidechannelError::Truncated { need: 8, have: 5 })
    );
}

#[test]
fn decode_consumes_only_one_frame() {
    let mut bytes = ScFrame::command(ScCommand::GetState).encode().unwrap();
    bytes.extend(ScFrame::command(ScCommand::GetConnected).encode().unwrap());

    let (first, consumed) = ScFrame::decode(&bytes).unwrap();
    assert_eq!(first.command, ScCommand::GetState);

    let (second, _) = ScFrame::decode(&bytes[consumed..]).unwrap();
    assert_eq!(second.command, ScCommand::GetConnected);
}

#[test]
fn oversized_payload_rejected() {
    let frame = ScFrame::response(
        ScCommand::GetDeviceId,
        ScStatus::Ok,
        vec![0u8; SC_MAX_DATA + 1],
    );
    assert_eq!(
        frame.encode(),
        Err(SidechannelError::Oversized(SC_MAX_DATA + 1))
    );
}

#[test]
fn unknown_command_round_trips() {
    let frame = ScFrame::command(ScCommand::Unknown(0x42));
    let bytes = frame.encode().unwrap();
    let (decoded, _) = ScFrame::decode(&bytes).unwrap();
    assert_eq!(decoded.command, ScCommand::Unknown(0x42));
}

#[test]
fn status_bytes_are_stable() {
    for status in [
        ScStatus::None,
        ScStatus::Ok,
        ScStatus::IoError,
        ScStatus::Timeout,
        ScStatus::NotImplemented,
    ] {
        assert_eq!(ScStatus::from_byte(status.to_byte()), status);
    }
}
