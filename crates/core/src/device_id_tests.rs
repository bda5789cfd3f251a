// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;
use yare::parameterized;

const HP_ID: &str = "MFG:Hewlett-Packard;MDL:DeskJet 990C;SERN:US05N1J00XLG;CMD:MLC,PCL,PML;";

#[test]
fn extract_big_endian_prefix() {
    let raw = encode_device_id("MFG:HP;MDL:DeskJet;", false);
    let id = extract_device_id(&raw, 1024).unwrap();
    assert_eq!(id, "MFG:HP;MDL:DeskJet;");
}

#[test]
fn extract_little_endian_fallback() {
    // A LE prefix decodes as an absurd BE length, triggering the fallback.
    let raw = encode_device_id("MFG:HP;MDL:DeskJet;", true);
    let id = extract_device_id(&raw, 1024).unwrap();
    assert_eq!(id, "MFG:HP;MDL:DeskJet;");
}

#[test]
fn extract_rejects_short_payload() {
    let raw = encode_device_id("MFG:x;", false);
    assert_eq!(extract_device_id(&raw, 1024), Err(DeviceIdError::TooShort));
    assert_eq!(extract_device_id(&[0x00], 1024), Err(DeviceIdError::TooShort));
}

#[test]
fn extract_clamps_oversized_length() {
    // Prefix claims more bytes than the buffer holds in either byte order;
    // the length is clamped to the buffer.
    let payload = "MFG:HP;MDL:DeskJet;extra";
    let mut raw = encode_device_id(payload, false);
    raw[0] = 0xff;
    raw[1] = 0xff;
    let id = extract_device_id(&raw, raw.len()).unwrap();
    assert_eq!(id, &payload[..payload.len()]);
}

#[test]
fn extract_stops_at_nul() {
    let mut raw = encode_device_id("MFG:HP;MDL:DeskJet;", false);
    let nul_at = 2 + 10;
    raw[nul_at] = 0;
    let id = extract_device_id(&raw, 1024).unwrap();
    assert_eq!(id, "MFG:HP;MDL");
}

proptest! {
    /// parse(build(P)) = P for any valid payload, regardless of the
    /// prefix endianness on the wire.
    #[test]
    fn prefix_round_trip(
        payload in "[ -:<-~]{12,200}",
        little_endian in any::<bool>(),
    ) {
        let raw = encode_device_id(&payload, little_endian);
        prop_assert!(raw.len() + 2 <= 1024);
        let decoded = extract_device_id(&raw, 1024).unwrap();
        prop_assert_eq!(decoded, payload);
    }
}

#[test]
fn parse_splits_pairs() {
    let id = parse_device_id(HP_ID);
    assert_eq!(id.get("MFG"), Some("Hewlett-Packard"));
    assert_eq!(id.get("MDL"), Some("DeskJet 990C"));
    assert_eq!(id.serial(), Some("US05N1J00XLG"));
    assert_eq!(id.get("CMD"), Some("MLC,PCL,PML"));
    assert_eq!(id.get("MISSING"), None);
}

#[test]
fn parse_prefers_long_form_keys() {
    let id = parse_device_id("MANUFACTURER:Canon;MFG:ignored;MODEL:MF743;MDL:ignored;");
    assert_eq!(id.manufacturer(), Some("Canon"));
    assert_eq!(id.model(), Some("MF743"));
}

#[test]
fn parse_is_case_insensitive_on_keys() {
    let id = parse_device_id("mfg:Epson;mdl:Stylus;");
    assert_eq!(id.manufacturer(), Some("Epson"));
}

#[parameterized(
    hp = { "MFG:Hewlett-Packard;MDL:DeskJet 990C;", "usb://HP/DeskJet%20990C" },
    lexmark = { "MFG:Lexmark International;MDL:E260;", "usb://Lexmark/E260" },
    plain = { "MFG:Epson;MDL:Stylus Photo;", "usb://Epson/Stylus%20Photo" },
    model_prefix_stripped = { "MFG:Canon;MDL:Canon MF743;", "usb://Canon/MF743" },
    derived_from_model = { "MDL:Brother HL-2270DW;", "usb://Brother/HL-2270DW" },
    derived_from_description = { "DES:Okidata B4600;", "usb://Okidata/B4600" },
    nothing_known = { "CMD:PCL;XX:YY;", "usb://Unknown/Printer" },
)]
fn uri_construction(device_id: &str, expected: &str) {
    let id = parse_device_id(device_id);
    assert_eq!(make_device_uri(&id, UriParts::default()), expected);
}

#[test]
fn uri_with_serial_and_interface() {
    let id = parse_device_id(HP_ID);
    assert_eq!(
        make_device_uri(
            &id,
            UriParts {
                fallback_serial: None,
                interface: 1
            }
        ),
        "usb://HP/DeskJet%20990C?serial=US05N1J00XLG&interface=1"
    );
}

#[test]
fn uri_interface_zero_is_omitted() {
    let id = parse_device_id(HP_ID);
    assert_eq!(
        make_device_uri(&id, UriParts::default()),
        "usb://HP/DeskJet%20990C?serial=US05N1J00XLG"
    );
}

#[test]
fn uri_uses_fallback_serial() {
    let id = parse_device_id("MFG:Epson;MDL:Stylus;");
    assert_eq!(
        make_device_uri(
            &id,
            UriParts {
                fallback_serial: Some("ABC123"),
                interface: 0
            }
        ),
        "usb://Epson/Stylus?serial=ABC123"
    );
}

#[test]
fn uri_is_deterministic() {
    let id = parse_device_id(HP_ID);
    let parts = UriParts {
        fallback_serial: None,
        interface: 1,
    };
    assert_eq!(make_device_uri(&id, parts), make_device_uri(&id, parts));
}

#[parameterized(
    exact = { "usb://HP/DeskJet", "usb://HP/DeskJet", true },
    different_model = { "usb://HP/DeskJet", "usb://HP/LaserJet", false },
    detected_has_interface = { "usb://HP/DeskJet", "usb://HP/DeskJet?interface=1", true },
    requested_has_interface = { "usb://HP/DeskJet?interface=1", "usb://HP/DeskJet", true },
    detected_has_serial = { "usb://HP/DeskJet", "usb://HP/DeskJet?serial=X1", true },
    requested_has_serial = { "usb://HP/DeskJet?serial=X1", "usb://HP/DeskJet", true },
    serial_mismatch = { "usb://HP/DeskJet?serial=X1", "usb://HP/DeskJet?serial=X2", false },
    explicit_no_serial = { "usb://HP/DeskJet?serial=?", "usb://HP/DeskJet?serial=X2", true },
    serial_and_interface = {
        "usb://HP/DeskJet?serial=X1",
        "usb://HP/DeskJet?serial=X1&interface=2",
        true
    },
)]
fn uri_matching(requested: &str, detected: &str, matches: bool) {
    assert_eq!(match_device_uri(requested, detected), matches);
}

#[test]
fn make_model_canonicalises() {
    let id = parse_device_id(HP_ID);
    assert_eq!(id.make_model(), "HP DeskJet 990C");
}
