// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use spoold_core::{ScCommand, ScStatus};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;

fn pair() -> (ScChannel, UnixStream) {
    let (ours, theirs) = UnixStream::pair().unwrap();
    // The channel side only borrows the fd; keep the stream alive by
    // leaking it into the test.
    let fd = ours.as_raw_fd();
    std::mem::forget(ours);
    (ScChannel::from_fd(fd), theirs)
}

#[test]
fn read_frame_round_trip() {
    let (channel, mut peer) = pair();

    let frame = ScFrame::command(ScCommand::GetBidi);
    peer.write_all(&frame.encode().unwrap()).unwrap();

    let read = channel.read_frame(Duration::from_secs(1)).unwrap();
    assert_eq!(read.command, ScCommand::GetBidi);
}

#[test]
fn read_frame_reassembles_split_frames() {
    let (channel, mut peer) = pair();

    let bytes = ScFrame::response(ScCommand::GetDeviceId, ScStatus::Ok, b"MFG:HP;".to_vec())
        .encode()
        .unwrap();
    let (head, tail) = bytes.split_at(3);
    peer.write_all(head).unwrap();

    let tail = tail.to_vec();
    let writer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        peer.write_all(&tail).unwrap();
        peer
    });

    let frame = channel.read_frame(Duration::from_secs(1)).unwrap();
    assert_eq!(frame.data, b"MFG:HP;");
    writer.join().unwrap();
}

#[test]
fn read_frame_times_out() {
    let (channel, _peer) = pair();
    let started = Instant::now();
    match channel.read_frame(Duration::from_millis(50)) {
        Err(ScIoError::Timeout) => {}
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[test]
fn read_frame_reports_close() {
    let (channel, peer) = pair();
    drop(peer);
    match channel.read_frame(Duration::from_secs(1)) {
        Err(ScIoError::Closed) => {}
        other => panic!("expected closed, got {other:?}"),
    }
}

#[test]
fn write_frame_is_readable_by_peer() {
    let (channel, mut peer) = pair();

    channel
        .write_frame(&ScFrame::response(
            ScCommand::GetState,
            ScStatus::Ok,
            vec![1],
        ))
        .unwrap();

    let mut buf = [0u8; 16];
    let n = peer.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], &[5, 1, 0, 1, 1]);
}
