// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    idle = { "3 usb://HP/DeskJet deskjet", PrinterState::Idle },
    processing = { "4 usb://HP/DeskJet deskjet", PrinterState::Processing },
    stopped = { "5 usb://HP/DeskJet deskjet", PrinterState::Stopped },
)]
fn parse_advert_states(line: &str, state: PrinterState) {
    let advert = parse_advert(line).unwrap();
    assert_eq!(advert.state, state);
    assert_eq!(advert.uri, "usb://HP/DeskJet");
    assert_eq!(advert.name, "deskjet");
}

#[parameterized(
    empty = { "" },
    bad_state = { "9 usb://HP/DeskJet deskjet" },
    missing_name = { "3 usb://HP/DeskJet" },
    garbage = { "not an advert" },
)]
fn parse_advert_rejects(line: &str) {
    assert!(parse_advert(line).is_none());
}

#[test]
fn format_parse_round_trip() {
    let mut printer = Printer::new("deskjet", "usb://HP/DeskJet");
    printer.state = PrinterState::Processing;

    let line = format_advert(&printer);
    let advert = parse_advert(line.trim()).unwrap();
    assert_eq!(advert.name, "deskjet");
    assert_eq!(advert.state, PrinterState::Processing);
}

fn channel() -> BrowseChannel {
    // Port 0 avoids clashing with a real scheduler on the host.
    BrowseChannel::open(0, 30, 300).unwrap()
}

#[test]
fn remote_printers_age_out() {
    let channel = channel();
    let mut printers = BTreeMap::new();

    let mut remote = Printer::new("faraway", "ipp://other/faraway");
    remote.remote = true;
    remote.browse_time = 100;
    printers.insert("faraway".to_string(), remote);

    let mut local = Printer::new("deskjet", "usb://HP/DeskJet");
    local.browse_time = 0;
    printers.insert("deskjet".to_string(), local);

    // Within the timeout nothing happens.
    channel.age_remote(&mut printers, 400);
    assert!(printers.contains_key("faraway"));

    // Past it, the remote entry goes; local printers are never aged.
    channel.age_remote(&mut printers, 401);
    assert!(!printers.contains_key("faraway"));
    assert!(printers.contains_key("deskjet"));
}

#[test]
fn next_deadline_picks_earliest() {
    let channel = channel();
    let mut printers = BTreeMap::new();

    let mut shared = Printer::new("deskjet", "usb://HP/DeskJet");
    shared.shared = true;
    shared.browse_time = 100;
    printers.insert("deskjet".to_string(), shared);

    let mut remote = Printer::new("faraway", "ipp://other/faraway");
    remote.remote = true;
    remote.browse_time = 50;
    printers.insert("faraway".to_string(), remote);

    let mut private = Printer::new("basement", "usb://Old/Thing");
    private.browse_time = 1;
    printers.insert("basement".to_string(), private);

    // deskjet re-advert at 130, faraway expiry at 350; unshared local
    // printers contribute nothing.
    assert_eq!(channel.next_deadline(&printers), Some(130));
}

#[test]
fn local_queue_shadows_remote_advert() {
    let channel = channel();
    let mut printers = BTreeMap::new();
    printers.insert(
        "deskjet".to_string(),
        Printer::new("deskjet", "usb://HP/DeskJet"),
    );

    channel.apply_advert(
        &mut printers,
        Advert {
            state: PrinterState::Stopped,
            uri: "ipp://imposter/deskjet".to_string(),
            name: "deskjet".to_string(),
        },
        500,
    );

    let p = &printers["deskjet"];
    assert!(!p.remote);
    assert_eq!(p.device_uri, "usb://HP/DeskJet");
    assert_eq!(p.state, PrinterState::Idle);
}
