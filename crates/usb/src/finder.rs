// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! USB printer discovery and open/close.
//!
//! Walks every configuration, interface, and alternate setting of every
//! connected device, accepting printer-class interfaces (class 7,
//! subclass 1) speaking the unidirectional or bidirectional protocol.
//! Within an interface the highest protocol wins; an alt-setting with no
//! host-to-device bulk endpoint is rejected outright.

use crate::port::{PrinterPort, TransferError};
use rusb::constants::{LIBUSB_CLASS_PRINTER, LIBUSB_REQUEST_GET_CONFIGURATION};
use rusb::{Context, Device, DeviceHandle, Direction, Recipient, RequestType, TransferType, UsbContext};
use spoold_core::{extract_device_id, make_device_uri, parse_device_id, UriParts};
use std::time::Duration;
use tracing::debug;

/// Control transfer budget.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Printer-class interface subclass.
const PRINTER_SUBCLASS: u8 = 1;

/// What a probe callback decides about an offered printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    KeepSearching,
    Accept,
}

/// An accepted printer with the identity it was offered under.
pub struct FoundPrinter {
    pub printer: UsbPrinter,
    pub device_uri: String,
    pub device_id: String,
}

/// One matched printer interface, possibly open.
pub struct UsbPrinter {
    device: Device<Context>,
    handle: Option<DeviceHandle<Context>>,
    /// Configuration index (position, used in the device-ID request)
    pub conf_index: u8,
    /// bConfigurationValue
    pub conf_value: u8,
    /// Interface position within the configuration (URI `interface=`)
    pub iface_position: u8,
    /// bInterfaceNumber, used for claim/detach/alt-setting
    pub iface_number: u8,
    /// Alternate-setting position (device-ID request index)
    pub altset_index: u8,
    /// bAlternateSetting
    pub altset_value: u8,
    num_altsetting: usize,
    /// Bulk host-to-device endpoint address
    pub write_endp: u8,
    /// Bulk device-to-host endpoint address, when bidirectional
    pub read_endp: Option<u8>,
    /// 1 = unidirectional, 2 = bidirectional
    pub protocol: u8,
    /// The usblp kernel driver was attached and must be re-attached
    usblp_attached: bool,
}

struct AltChoice {
    altset_index: u8,
    altset_value: u8,
    iface_number: u8,
    num_altsetting: usize,
    write_endp: u8,
    read_endp: Option<u8>,
}

/// Enumerate USB printers, offering each to `probe` until it accepts.
/// `verbose` emits connecting-to-device state lines while opening, for
/// print mode; discovery keeps quiet.
pub fn find_device<F>(
    context: &Context,
    verbose: bool,
    mut probe: F,
) -> Result<Option<FoundPrinter>, rusb::Error>
where
    F: FnMut(&UsbPrinter, &str, &str) -> Probe,
{
    for device in context.devices()?.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        // Ignore devices with no configuration data.
        if desc.num_configurations() == 0 || desc.vendor_id() == 0 || desc.product_id() == 0 {
            continue;
        }

        for conf_index in 0..desc.num_configurations() {
            let Ok(config) = device.config_descriptor(conf_index) else {
                continue;
            };

            for (iface_position, interface) in config.interfaces().enumerate() {
                let mut protocol = 0u8;
                let mut best: Option<AltChoice> = None;

                for (altset_index, alt) in interface.descriptors().enumerate() {
                    if alt.class_code() != LIBUSB_CLASS_PRINTER
                        || alt.sub_class_code() != PRINTER_SUBCLASS
                    {
                        continue;
                    }
                    let proto = alt.protocol_code();
                    if !(1..=2).contains(&proto) || proto < protocol {
                        continue;
                    }

                    let mut read_endp = None;
                    let mut write_endp = None;
                    for ep in alt.endpoint_descriptors() {
                        if ep.transfer_type() != TransferType::Bulk {
                            continue;
                        }
                        match ep.direction() {
                            Direction::In => {
                                if read_endp.is_none() {
                                    read_endp = Some(ep.address());
                                }
                            }
                            Direction::Out => {
                                if write_endp.is_none() {
                                    write_endp = Some(ep.address());
                                }
                            }
                        }
                    }
                    let Some(write_endp) = write_endp else {
                        continue;
                    };

                    protocol = proto;
                    best = Some(AltChoice {
                        altset_index: altset_index as u8,
                        altset_value: alt.setting_number(),
                        iface_number: alt.interface_number(),
                        num_altsetting: interface.descriptors().count(),
                        write_endp,
                        read_endp,
                    });
                }

                let Some(choice) = best else {
                    continue;
                };

                let mut printer = UsbPrinter {
                    device: device.clone(),
                    handle: None,
                    conf_index,
                    conf_value: config.number(),
                    iface_position: iface_position as u8,
                    iface_number: choice.iface_number,
                    altset_index: choice.altset_index,
                    altset_value: choice.altset_value,
                    num_altsetting: choice.num_altsetting,
                    write_endp: choice.write_endp,
                    read_endp: choice.read_endp,
                    protocol,
                    usblp_attached: false,
                };

                if printer.open(verbose).is_err() {
                    continue;
                }

                let device_id = printer.fetch_device_id().unwrap_or_default();
                let device_uri = printer.device_uri(&device_id);

                match probe(&printer, &device_uri, &device_id) {
                    Probe::Accept => {
                        return Ok(Some(FoundPrinter {
                            printer,
                            device_uri,
                            device_id,
                        }))
                    }
                    Probe::KeepSearching => printer.close(),
                }
            }
        }
    }

    Ok(None)
}

/// Report every detected printer on stdout in discovery format.
pub fn list_devices() -> Result<(), rusb::Error> {
    let context = Context::new()?;
    find_device(&context, false, |_, uri, id| {
        let make_model = parse_device_id(id).make_model();
        println!("direct {uri} \"{make_model}\" \"{make_model} USB\" \"{id}\"");
        Probe::KeepSearching
    })?;
    Ok(())
}

impl UsbPrinter {
    fn ids(&self) -> (u16, u16) {
        self.device
            .device_descriptor()
            .map(|d| (d.vendor_id(), d.product_id()))
            .unwrap_or((0, 0))
    }

    /// Open the device: select the configuration, displace the kernel
    /// driver, claim the interface, and select the alternate setting.
    pub fn open(&mut self, verbose: bool) -> Result<(), rusb::Error> {
        if self.handle.is_some() {
            return Ok(());
        }

        let handle = self.device.open()?;
        if verbose {
            eprintln!("STATE: +connecting-to-device");
        }

        let result = self.configure(&handle);

        if verbose {
            eprintln!("STATE: -connecting-to-device");
        }
        match result {
            Ok(()) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn configure(&mut self, handle: &DeviceHandle<Context>) -> Result<(), rusb::Error> {
        let (vendor, product) = self.ids();

        // Set the configuration only if it needs changing; some printers
        // accept SET_CONFIGURATION and then silently drop the next job.
        let mut current = [0u8; 1];
        let request = rusb::request_type(Direction::In, RequestType::Standard, Recipient::Device);
        let current = match handle.read_control(
            request,
            LIBUSB_REQUEST_GET_CONFIGURATION,
            0,
            0,
            &mut current,
            CONTROL_TIMEOUT,
        ) {
            Ok(1) => current[0],
            // Assume not configured.
            _ => 0,
        };

        if current != self.conf_value {
            if let Err(e) = handle.set_active_configuration(self.conf_value) {
                // Single-configuration devices often reject this;
                // they'll work regardless.
                if e != rusb::Error::Busy {
                    debug!(
                        "failed to set configuration {} for {vendor:04x}:{product:04x}: {e}",
                        self.conf_value
                    );
                }
            }
        }

        // This backend only works with the usblp kernel module out of
        // the way.
        match handle.kernel_driver_active(self.iface_number) {
            Ok(false) => self.usblp_attached = false,
            Ok(true) => {
                self.usblp_attached = true;
                if let Err(e) = handle.detach_kernel_driver(self.iface_number) {
                    debug!("failed to detach usblp from {vendor:04x}:{product:04x}: {e}");
                    return Err(e);
                }
            }
            Err(e) => {
                self.usblp_attached = false;
                debug!(
                    "failed to check the usblp module on {vendor:04x}:{product:04x}: {e}"
                );
                return Err(e);
            }
        }

        if let Err(e) = handle.claim_interface(self.iface_number) {
            if e != rusb::Error::Busy {
                debug!(
                    "failed to claim interface {} for {vendor:04x}:{product:04x}: {e}",
                    self.iface_number
                );
            }
            return Err(e);
        }

        // Select the alternate setting only when there is a choice; some
        // printers mis-handle SET_INTERFACE with a single setting.
        if self.num_altsetting > 1 {
            if let Err(e) = handle.set_alternate_setting(self.iface_number, self.altset_value) {
                if e != rusb::Error::Busy {
                    debug!(
                        "failed to set alternate setting {} for {vendor:04x}:{product:04x}: {e}",
                        self.altset_value
                    );
                }
                return Err(e);
            }
        }

        Ok(())
    }

    /// Release the interface, re-attach the kernel driver when we
    /// displaced it, and close the handle. Re-attachment is best-effort.
    pub fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        let _ = handle.release_interface(self.iface_number);
        if self.iface_number != 0 {
            let _ = handle.release_interface(0);
        }

        if self.usblp_attached {
            if let Err(e) = handle.attach_kernel_driver(self.iface_number) {
                let (vendor, product) = self.ids();
                debug!("failed to re-attach usblp to {vendor:04x}:{product:04x}: {e}");
            }
        }
    }

    /// Fetch and decode the IEEE-1284 device ID.
    pub fn fetch_device_id(&self) -> Result<String, TransferError> {
        let handle = self.handle.as_ref().ok_or(TransferError::Other)?;

        let mut buffer = [0u8; 1024];
        let request = rusb::request_type(Direction::In, RequestType::Class, Recipient::Interface);
        let value = self.conf_index as u16;
        let index = ((self.iface_position as u16) << 8) | self.altset_index as u16;

        handle
            .read_control(request, 0, value, index, &mut buffer, CONTROL_TIMEOUT)
            .map_err(TransferError::from)?;

        extract_device_id(&buffer, buffer.len()).map_err(|_| TransferError::Other)
    }

    /// Compose the printer's `usb://` URI from its device ID, falling
    /// back to the USB serial-number string descriptor.
    pub fn device_uri(&self, device_id: &str) -> String {
        let id = parse_device_id(device_id);
        let fallback = self.read_serial();
        make_device_uri(
            &id,
            UriParts {
                fallback_serial: fallback.as_deref(),
                interface: self.iface_position,
            },
        )
    }

    fn read_serial(&self) -> Option<String> {
        let handle = self.handle.as_ref()?;
        let desc = self.device.device_descriptor().ok()?;
        let index = desc.serial_number_string_index()?;
        handle.read_string_descriptor_ascii(index).ok()
    }
}

impl PrinterPort for UsbPrinter {
    fn write_bulk(&self, data: &[u8], timeout: Duration) -> Result<usize, TransferError> {
        let handle = self.handle.as_ref().ok_or(TransferError::Disconnected)?;
        handle
            .write_bulk(self.write_endp, data, timeout)
            .map_err(TransferError::from)
    }

    fn read_bulk(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransferError> {
        let handle = self.handle.as_ref().ok_or(TransferError::Disconnected)?;
        let endpoint = self.read_endp.ok_or(TransferError::Other)?;
        handle
            .read_bulk(endpoint, buf, timeout)
            .map_err(TransferError::from)
    }

    fn device_id(&self) -> Result<String, TransferError> {
        self.fetch_device_id()
    }

    fn reset(&self) -> Result<(), TransferError> {
        let handle = self.handle.as_ref().ok_or(TransferError::Disconnected)?;
        handle.reset().map_err(TransferError::from)
    }

    fn bidirectional(&self) -> bool {
        self.protocol >= 2
    }

    fn connected(&self) -> bool {
        self.handle.is_some()
    }
}
