// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Printer browsing.
//!
//! Shared local printers are advertised as one-line UDP datagrams;
//! adverts received from other schedulers appear as remote printers and
//! age out when they stop being re-advertised. The advert line format is
//! the collaborator protocol's concern; only `state uri name` survives
//! here.

use spoold_core::{Printer, PrinterState};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::{debug, info, warn};

/// One parsed browse advert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advert {
    pub state: PrinterState,
    pub uri: String,
    pub name: String,
}

/// Parse a `state uri name` advert line.
pub fn parse_advert(line: &str) -> Option<Advert> {
    let mut fields = line.split_whitespace();
    let state = match fields.next()? {
        "3" => PrinterState::Idle,
        "4" => PrinterState::Processing,
        "5" => PrinterState::Stopped,
        _ => return None,
    };
    let uri = fields.next()?.to_string();
    let name = fields.next()?.to_string();
    Some(Advert { state, uri, name })
}

/// Format the advert line for a local printer.
pub fn format_advert(printer: &Printer) -> String {
    let state = match printer.state {
        PrinterState::Idle => 3,
        PrinterState::Processing => 4,
        PrinterState::Stopped => 5,
    };
    format!("{} {} {}\n", state, printer.device_uri, printer.name)
}

/// The browse socket and its send cadence.
#[derive(Debug)]
pub struct BrowseChannel {
    socket: UdpSocket,
    target: SocketAddr,
    interval: u64,
    timeout: u64,
}

impl BrowseChannel {
    pub fn open(port: u16, interval: u64, timeout: u64) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket,
            target: SocketAddr::from((Ipv4Addr::BROADCAST, port)),
            interval,
            timeout,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Drain pending adverts into the printer catalogue.
    pub fn drain(&self, printers: &mut BTreeMap<String, Printer>, now: u64) {
        let mut datagram = [0u8; 1024];
        loop {
            match self.socket.recv_from(&mut datagram) {
                Ok((len, _peer)) => {
                    let text = String::from_utf8_lossy(&datagram[..len]);
                    for line in text.lines() {
                        let Some(advert) = parse_advert(line) else {
                            debug!("ignoring malformed browse advert: {line:?}");
                            continue;
                        };
                        self.apply_advert(printers, advert, now);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("browse receive failed: {e}");
                    break;
                }
            }
        }
    }

    fn apply_advert(&self, printers: &mut BTreeMap<String, Printer>, advert: Advert, now: u64) {
        let entry = printers.entry(advert.name.clone()).or_insert_with(|| {
            info!("discovered remote printer \"{}\"", advert.name);
            let mut p = Printer::new(advert.name.clone(), advert.uri.clone());
            p.remote = true;
            p
        });
        if !entry.remote {
            // A local queue shadows same-named remote adverts.
            return;
        }
        entry.state = advert.state;
        entry.device_uri = advert.uri;
        entry.browse_time = now;
    }

    /// Send adverts for shared local printers whose interval elapsed.
    pub fn send_due(&self, printers: &mut BTreeMap<String, Printer>, now: u64) {
        for printer in printers.values_mut() {
            if printer.remote || !printer.shared {
                continue;
            }
            if printer.browse_time + self.interval > now {
                continue;
            }
            let line = format_advert(printer);
            match self.socket.send_to(line.as_bytes(), self.target) {
                Ok(_) => printer.browse_time = now,
                Err(e) => {
                    warn!("browse send for \"{}\" failed: {e}", printer.name);
                    // Still advance the timer so one broken route does not
                    // turn the loop into a busy wait.
                    printer.browse_time = now;
                }
            }
        }
    }

    /// Drop remote printers that have not re-advertised in time.
    pub fn age_remote(&self, printers: &mut BTreeMap<String, Printer>, now: u64) {
        let timeout = self.timeout;
        printers.retain(|name, p| {
            let stale = p.remote && p.browse_time + timeout < now;
            if stale {
                info!("remote printer \"{name}\" timed out");
            }
            !stale
        });
    }

    /// Deadline candidates for the adaptive timeout: the earliest local
    /// re-advert and the earliest remote expiry.
    pub fn next_deadline(&self, printers: &BTreeMap<String, Printer>) -> Option<u64> {
        printers
            .values()
            .filter_map(|p| {
                if p.remote {
                    Some(p.browse_time + self.timeout)
                } else if p.shared {
                    Some(p.browse_time + self.interval)
                } else {
                    None
                }
            })
            .min()
    }
}

#[cfg(test)]
#[path = "browse_tests.rs"]
mod tests;
