// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::fdset::{FdOwner, FdRegistry, Interest};
use std::io::Write;
use std::os::unix::io::AsRawFd;

#[test]
fn empty_snapshot_times_out() {
    let outcome = wait(&[], 0).unwrap();
    match outcome {
        Wait::Ready(ready) => assert!(ready.is_empty()),
        Wait::Interrupted => panic!("unexpected interrupt"),
    }
}

#[test]
fn readable_pipe_is_reported() {
    let (reader, mut writer) = std::io::pipe().unwrap();
    writer.write_all(b"x").unwrap();

    let mut reg = FdRegistry::new();
    reg.register(reader.as_raw_fd(), FdOwner::SelfPipe, Interest::READ);

    let outcome = wait(&reg.snapshot(), 1).unwrap();
    match outcome {
        Wait::Ready(ready) => {
            assert!(ready.is_readable(reader.as_raw_fd()));
            assert_eq!(ready.len(), 1);
        }
        Wait::Interrupted => panic!("unexpected interrupt"),
    }
}

#[test]
fn quiet_pipe_is_not_reported() {
    let (reader, _writer) = std::io::pipe().unwrap();

    let mut reg = FdRegistry::new();
    reg.register(reader.as_raw_fd(), FdOwner::SelfPipe, Interest::READ);

    match wait(&reg.snapshot(), 0).unwrap() {
        Wait::Ready(ready) => assert!(!ready.is_readable(reader.as_raw_fd())),
        Wait::Interrupted => panic!("unexpected interrupt"),
    }
}

#[test]
fn closed_write_end_reads_as_ready() {
    let (reader, writer) = std::io::pipe().unwrap();
    drop(writer);

    let mut reg = FdRegistry::new();
    reg.register(reader.as_raw_fd(), FdOwner::JobStatus(spoold_core::JobId::new(1)), Interest::READ);

    // Hangup must surface as readability so the owner observes EOF.
    match wait(&reg.snapshot(), 1).unwrap() {
        Wait::Ready(ready) => assert!(ready.is_readable(reader.as_raw_fd())),
        Wait::Interrupted => panic!("unexpected interrupt"),
    }
}

#[test]
fn writable_pipe_is_reported() {
    let (_reader, writer) = std::io::pipe().unwrap();

    let mut reg = FdRegistry::new();
    reg.register(writer.as_raw_fd(), FdOwner::Client(1), Interest::WRITE);

    match wait(&reg.snapshot(), 1).unwrap() {
        Wait::Ready(ready) => assert!(ready.is_writable(writer.as_raw_fd())),
        Wait::Interrupted => panic!("unexpected interrupt"),
    }
}

#[test]
fn clear_readable_masks_fd() {
    let (reader, mut writer) = std::io::pipe().unwrap();
    writer.write_all(b"x").unwrap();

    let mut reg = FdRegistry::new();
    reg.register(reader.as_raw_fd(), FdOwner::SelfPipe, Interest::READ);

    match wait(&reg.snapshot(), 1).unwrap() {
        Wait::Ready(mut ready) => {
            ready.clear_readable(reader.as_raw_fd());
            assert!(!ready.is_readable(reader.as_raw_fd()));
        }
        Wait::Interrupted => panic!("unexpected interrupt"),
    }
}
