// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IEEE-1284 device IDs and `usb://` device URIs.
//!
//! A device ID is a length-prefixed key/value string
//! (`MFG:HP;MDL:DeskJet 990C;...`). The length prefix is big-endian per
//! the 1284 spec, but some vendors store it little-endian; the decoder
//! accommodates both. The URI built from an ID is deterministic in its
//! inputs so queue matching is byte-stable across rediscovery.

use indexmap::IndexMap;
use thiserror::Error;

/// Minimum valid device ID including the two length bytes
/// (`MFG:x;MDL:y;` is 12 bytes).
const MIN_DEVICE_ID_LEN: usize = 14;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceIdError {
    #[error("device ID shorter than the minimum valid length")]
    TooShort,
}

/// Decode a raw length-prefixed device-ID buffer into its text payload.
///
/// `capacity` is the size of the transfer buffer the data was read into;
/// the out-of-range checks use it the same way the wire producers do.
pub fn extract_device_id(raw: &[u8], capacity: usize) -> Result<String, DeviceIdError> {
    if raw.len() < 2 {
        return Err(DeviceIdError::TooShort);
    }

    let mut length = u16::from_be_bytes([raw[0], raw[1]]) as usize;

    // Vendors that mis-implemented the spec store the prefix LSB first.
    if length > capacity || length < MIN_DEVICE_ID_LEN {
        length = u16::from_le_bytes([raw[0], raw[1]]) as usize;
    }

    if length > capacity {
        length = capacity;
    }

    if length < MIN_DEVICE_ID_LEN {
        return Err(DeviceIdError::TooShort);
    }

    let end = length.min(raw.len());
    let text = &raw[2..end];
    let text = match text.iter().position(|&b| b == 0) {
        Some(nul) => &text[..nul],
        None => text,
    };

    Ok(String::from_utf8_lossy(text).into_owned())
}

/// Encode a device-ID payload with its length prefix.
pub fn encode_device_id(payload: &str, little_endian: bool) -> Vec<u8> {
    let total = (payload.len() + 2) as u16;
    let prefix = if little_endian {
        total.to_le_bytes()
    } else {
        total.to_be_bytes()
    };
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.extend_from_slice(&prefix);
    out.extend_from_slice(payload.as_bytes());
    out
}

/// Parsed key/value view of a device ID. Keys are upper-cased; insertion
/// order is preserved so first-wins lookups match the wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceId {
    values: IndexMap<String, String>,
}

/// Parse the `KEY:value;` pairs of a device-ID string.
pub fn parse_device_id(id: &str) -> DeviceId {
    let mut values = IndexMap::new();
    for pair in id.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once(':') else {
            continue;
        };
        values
            .entry(key.trim().to_ascii_uppercase())
            .or_insert_with(|| value.trim().to_string());
    }
    DeviceId { values }
}

impl DeviceId {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_ascii_uppercase()).map(String::as_str)
    }

    fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.first_of(&["MANUFACTURER", "MFG"])
    }

    pub fn model(&self) -> Option<&str> {
        self.first_of(&["MODEL", "MDL"])
    }

    pub fn serial(&self) -> Option<&str> {
        self.first_of(&["SERIALNUMBER", "SERN", "SN"])
    }

    pub fn description(&self) -> Option<&str> {
        self.first_of(&["DESCRIPTION", "DES"])
    }

    /// Make-and-model string for discovery listings.
    pub fn make_model(&self) -> String {
        match (self.manufacturer(), self.model()) {
            (Some(mfg), Some(mdl)) => format!("{} {}", canonical_manufacturer(mfg), mdl),
            (None, Some(mdl)) => mdl.to_string(),
            _ => self
                .description()
                .unwrap_or("Unknown")
                .to_string(),
        }
    }
}

/// Manufacturer names mapped for compatibility with the original
/// character-device backend.
fn canonical_manufacturer(mfg: &str) -> &str {
    if mfg.eq_ignore_ascii_case("Hewlett-Packard") {
        "HP"
    } else if mfg.eq_ignore_ascii_case("Lexmark International") {
        "Lexmark"
    } else {
        mfg
    }
}

/// First whitespace-delimited token of a make-and-model string.
fn first_token(s: &str) -> &str {
    s.split_whitespace().next().unwrap_or("Unknown")
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Inputs for [`make_device_uri`] beyond the parsed device ID.
#[derive(Debug, Clone, Copy, Default)]
pub struct UriParts<'a> {
    /// Serial number read from the USB string descriptor, used when the
    /// device ID carries none.
    pub fallback_serial: Option<&'a str>,
    /// Interface index; included in the URI only when non-zero.
    pub interface: u8,
}

/// Compose a `usb://<mfg>/<model>[?serial=…[&interface=…]]` device URI.
///
/// Deterministic in its inputs: identical device ID and interface yield a
/// byte-identical URI.
pub fn make_device_uri(id: &DeviceId, parts: UriParts<'_>) -> String {
    let serial = id.serial().or(parts.fallback_serial);

    let derived;
    let mfg = match id.manufacturer() {
        Some(mfg) => canonical_manufacturer(mfg),
        None => {
            // No manufacturer? Use the model string or description.
            derived = id
                .model()
                .or_else(|| id.description())
                .map(first_token)
                .unwrap_or("Unknown")
                .to_string();
            &derived
        }
    };

    let mut mdl = match id.model() {
        Some(mdl) => mdl,
        None => match id.description() {
            Some(des) => des,
            None if mfg.eq_ignore_ascii_case("Unknown") => "Printer",
            None => "Unknown Model",
        },
    };

    // Strip a leading manufacturer name from the model.
    if let (Some(prefix), Some(rest)) = (mdl.get(..mfg.len()), mdl.get(mfg.len()..)) {
        if prefix.eq_ignore_ascii_case(mfg) && rest.starts_with(char::is_whitespace) {
            mdl = rest.trim_start();
        }
    }

    let options = match (serial, parts.interface) {
        (Some(sn), 0) => format!("?serial={}", percent_encode(sn)),
        (Some(sn), iface) => format!("?serial={}&interface={}", percent_encode(sn), iface),
        (None, 0) => String::new(),
        (None, iface) => format!("?interface={}", iface),
    };

    format!(
        "usb://{}/{}{}",
        percent_encode(mfg),
        percent_encode(mdl),
        options
    )
}

fn option_position(uri: &str, key: &str) -> Option<usize> {
    uri.find(&format!("?{key}"))
        .or_else(|| uri.find(&format!("&{key}")))
}

/// Decide whether a detected printer URI satisfies a requested one.
///
/// The `interface=` and `serial=` components are stripped from whichever
/// side lacks them so queues created against either discovery style keep
/// matching. `?serial=?` on the requested side means "no serial number",
/// not the serial `?`.
pub fn match_device_uri(requested: &str, detected: &str) -> bool {
    if requested == detected {
        return true;
    }

    let mut req = requested.to_string();
    let mut det = detected.to_string();

    match (
        option_position(&req, "interface="),
        option_position(&det, "interface="),
    ) {
        (None, Some(pos)) => det.truncate(pos),
        (Some(pos), None) => req.truncate(pos),
        _ => {}
    }

    if let Some(pos) = req.find("?serial=?") {
        req.truncate(pos);
    }

    match (option_position(&req, "serial="), option_position(&det, "serial=")) {
        (None, Some(pos)) => det.truncate(pos),
        (Some(pos), None) => req.truncate(pos),
        _ => {}
    }

    req == det
}

#[cfg(test)]
#[path = "device_id_tests.rs"]
mod tests;
