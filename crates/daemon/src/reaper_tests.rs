// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use spoold_core::{JobConfig, PrinterState};

fn fixture() -> (BTreeMap<JobId, Job>, BTreeMap<String, Printer>) {
    let mut printers = BTreeMap::new();
    let mut printer = Printer::new("deskjet", "usb://HP/DeskJet");
    printer.state = PrinterState::Processing;
    printers.insert("deskjet".to_string(), printer);

    let mut job = Job::new(JobConfig {
        id: JobId::new(1),
        printer: "deskjet".to_string(),
        title: "doc".to_string(),
        filters: vec![
            "/usr/lib/spoold/filter/A".to_string(),
            "/usr/lib/spoold/filter/B".to_string(),
            "/usr/lib/spoold/backend/usb".to_string(),
        ],
    });
    job.start(vec![100, 101, 102], 5);

    let mut jobs = BTreeMap::new();
    jobs.insert(job.id, job);
    (jobs, printers)
}

#[test]
fn classify_exited() {
    let status = WaitStatus::Exited(Pid::from_raw(100), 2);
    assert_eq!(
        classify(status),
        Some(ReapedChild {
            pid: 100,
            code: 2,
            signalled: false
        })
    );
}

#[test]
fn classify_sigterm_is_clean() {
    // Cancellation sends TERM; the exit must not count as a failure.
    let status = WaitStatus::Signaled(Pid::from_raw(100), Signal::SIGTERM, false);
    assert_eq!(
        classify(status),
        Some(ReapedChild {
            pid: 100,
            code: 0,
            signalled: false
        })
    );
}

#[test]
fn classify_crash_signal() {
    let status = WaitStatus::Signaled(Pid::from_raw(100), Signal::SIGSEGV, true);
    assert_eq!(
        classify(status),
        Some(ReapedChild {
            pid: 100,
            code: Signal::SIGSEGV as i32,
            signalled: true
        })
    );
}

#[test]
fn filter_crash_fails_job_but_not_printer() {
    let (mut jobs, mut printers) = fixture();

    // Filter B dies on signal 11.
    apply_exit(
        &mut jobs,
        &mut printers,
        ReapedChild {
            pid: 101,
            code: 11,
            signalled: true,
        },
        50,
    );

    let job = &jobs[&JobId::new(1)];
    assert_eq!(job.procs, vec![100, -101, 102]);
    assert_eq!(job.status, 11);

    let printer = &printers["deskjet"];
    assert!(printer.state_message.contains("\"B\""));
    assert!(printer.state_message.contains("signal 11"));
    assert_eq!(printer.history.len(), 1);

    // Remaining children exit cleanly; the job aborts, the printer
    // continues.
    for pid in [100, 102] {
        apply_exit(
            &mut jobs,
            &mut printers,
            ReapedChild {
                pid,
                code: 0,
                signalled: false,
            },
            51,
        );
    }
    let finalized = finalize_jobs(&mut jobs, &mut printers);
    assert_eq!(finalized, vec![JobId::new(1)]);
    assert_eq!(jobs[&JobId::new(1)].state, JobState::Aborted);
    assert_eq!(printers["deskjet"].state, PrinterState::Idle);
}

#[test]
fn backend_failure_stops_printer() {
    let (mut jobs, mut printers) = fixture();

    // The backend (last slot) exits with status 2.
    apply_exit(
        &mut jobs,
        &mut printers,
        ReapedChild {
            pid: 102,
            code: 2,
            signalled: false,
        },
        50,
    );

    let job = &jobs[&JobId::new(1)];
    assert_eq!(job.status, -2);
    assert!(printers["deskjet"].state_message.contains("\"usb\""));
    assert!(printers["deskjet"].state_message.contains("status 2"));

    for pid in [100, 101] {
        apply_exit(
            &mut jobs,
            &mut printers,
            ReapedChild {
                pid,
                code: 0,
                signalled: false,
            },
            51,
        );
    }
    finalize_jobs(&mut jobs, &mut printers);
    assert_eq!(jobs[&JobId::new(1)].state, JobState::Stopped);
    assert_eq!(printers["deskjet"].state, PrinterState::Stopped);
}

#[test]
fn cancelled_job_finalizes_cancelled() {
    let (mut jobs, mut printers) = fixture();
    jobs.get_mut(&JobId::new(1)).unwrap().cancelled = true;

    for pid in [100, 101, 102] {
        apply_exit(
            &mut jobs,
            &mut printers,
            ReapedChild {
                pid,
                code: 0,
                signalled: false,
            },
            50,
        );
    }
    finalize_jobs(&mut jobs, &mut printers);
    assert_eq!(jobs[&JobId::new(1)].state, JobState::Cancelled);
    assert_eq!(printers["deskjet"].state, PrinterState::Idle);
}

#[test]
fn clean_completion() {
    let (mut jobs, mut printers) = fixture();

    for pid in [100, 101, 102] {
        apply_exit(
            &mut jobs,
            &mut printers,
            ReapedChild {
                pid,
                code: 0,
                signalled: false,
            },
            50,
        );
    }
    finalize_jobs(&mut jobs, &mut printers);

    let job = &jobs[&JobId::new(1)];
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.status, 0);
    assert!(printers["deskjet"].state_message.is_empty());
}

#[test]
fn unknown_pid_changes_nothing() {
    let (mut jobs, mut printers) = fixture();
    apply_exit(
        &mut jobs,
        &mut printers,
        ReapedChild {
            pid: 999,
            code: 1,
            signalled: false,
        },
        50,
    );
    assert_eq!(jobs[&JobId::new(1)].procs, vec![100, 101, 102]);
    assert_eq!(jobs[&JobId::new(1)].status, 0);
}

#[test]
fn live_proc_count_is_monotonic() {
    let (mut jobs, mut printers) = fixture();
    let mut last = jobs[&JobId::new(1)].live_procs();

    for pid in [101, 100, 102] {
        apply_exit(
            &mut jobs,
            &mut printers,
            ReapedChild {
                pid,
                code: 0,
                signalled: false,
            },
            50,
        );
        let live = jobs[&JobId::new(1)].live_procs();
        assert!(live < last);
        last = live;
    }
    assert_eq!(last, 0);
}
