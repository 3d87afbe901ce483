//! USB and SMBus enumeration.
//!
//! Matches attached devices against the descriptor catalog (or the
//! configured selectors), opens one transport per device and wraps it in the
//! family's driver.

use std::ffi::CString;
use std::sync::Arc;

use async_trait::async_trait;
use hidapi::{HidApi, HidDevice};
use log::{debug, info, warn};

use crate::config::{DeviceSelector, MemoryCfg};
use crate::descriptor::{self, DeviceDescriptor, Family, TransportKind};
use crate::drivers::DeviceDriver;
use crate::drivers::headset::HeadsetDriver;
use crate::drivers::hydro::HydroDriver;
use crate::drivers::lcd_cover::LcdCoverDriver;
use crate::drivers::memory::MemoryDriver;
use crate::drivers::mouse::MouseDriver;
use crate::drivers::nexus::NexusDriver;
use crate::drivers::platinum::PlatinumDriver;
use crate::supervisor::DeviceFactory;
use crate::transport::{HidIo, LinuxSmBus, READ_TIMEOUT, Transport, TransportConfig, UsbBulkEndpoint};

/// One enumerated USB interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbCandidate {
    pub vid: u16,
    pub pid: u16,
    pub serial: Option<String>,
    pub interface: i32,
}

impl UsbCandidate {
    fn same_device(&self, other: &UsbCandidate) -> bool {
        self.vid == other.vid && self.pid == other.pid && self.serial == other.serial
    }
}

/// Picks the candidates to drive and their descriptors.
///
/// Without selectors every catalog product is taken. With selectors only
/// matching devices are, using the selector's descriptor. HID devices are
/// taken on their control interface only; a device shows up once.
pub fn select(
    candidates: &[UsbCandidate],
    selectors: &[DeviceSelector],
) -> Vec<(DeviceDescriptor, UsbCandidate)> {
    let mut chosen: Vec<(DeviceDescriptor, UsbCandidate)> = Vec::new();
    for candidate in candidates {
        let descriptor = if selectors.is_empty() {
            descriptor::lookup(candidate.vid, candidate.pid)
        } else {
            selectors
                .iter()
                .find(|s| s.matches(candidate.vid, candidate.pid, candidate.serial.as_deref()))
                .map(DeviceSelector::descriptor)
        };
        let Some(descriptor) = descriptor else {
            continue;
        };
        if descriptor.transport == TransportKind::Hid
            && candidate.interface != i32::from(descriptor.interface)
        {
            continue;
        }
        if chosen.iter().any(|(_, c)| c.same_device(candidate)) {
            continue;
        }
        chosen.push((descriptor, candidate.clone()));
    }
    chosen
}

/// Serial used to key profiles. Devices without a USB serial get one derived
/// from the product id and enumeration order.
fn device_serial(candidate: &UsbCandidate, index: usize) -> String {
    match candidate.serial.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => format!("{:04x}-{:04x}-{index}", candidate.vid, candidate.pid),
    }
}

fn transport_config(descriptor: &DeviceDescriptor) -> TransportConfig {
    TransportConfig {
        write_size: descriptor.write_buffer_size,
        read_size: descriptor.read_buffer_size,
        timeout_ms: READ_TIMEOUT,
    }
}

/// Opened HID handles of one device.
struct HidHandles {
    descriptor: DeviceDescriptor,
    candidate: UsbCandidate,
    control: HidDevice,
    secondary: Option<HidDevice>,
}

/// Discovers devices on the host buses.
pub struct UsbFactory {
    selectors: Vec<DeviceSelector>,
    memory: MemoryCfg,
}

impl UsbFactory {
    pub fn new(selectors: Vec<DeviceSelector>, memory: MemoryCfg) -> Self {
        Self { selectors, memory }
    }

    fn open_hid(selectors: &[DeviceSelector]) -> anyhow::Result<Vec<HidHandles>> {
        let api = HidApi::new()?;
        let infos: Vec<(UsbCandidate, CString)> = api
            .device_list()
            .map(|d| {
                (
                    UsbCandidate {
                        vid: d.vendor_id(),
                        pid: d.product_id(),
                        serial: d.serial_number().map(str::to_string),
                        interface: d.interface_number(),
                    },
                    d.path().to_owned(),
                )
            })
            .collect();
        let candidates: Vec<UsbCandidate> = infos.iter().map(|(c, _)| c.clone()).collect();

        let mut opened = Vec::new();
        for (descriptor, candidate) in select(&candidates, selectors) {
            if descriptor.transport != TransportKind::Hid {
                continue;
            }
            let Some((_, path)) = infos.iter().find(|(c, _)| c == &candidate) else {
                continue;
            };
            let control = match api.open_path(path) {
                Ok(dev) => dev,
                Err(e) => {
                    warn!("{}: cannot open HID interface: {e}", descriptor.name);
                    continue;
                }
            };
            let secondary = if descriptor.family == Family::Nexus {
                infos
                    .iter()
                    .find(|(c, _)| c.same_device(&candidate) && c.interface != candidate.interface)
                    .and_then(|(_, path)| api.open_path(path).ok())
            } else {
                None
            };
            opened.push(HidHandles {
                descriptor,
                candidate,
                control,
                secondary,
            });
        }
        Ok(opened)
    }

    fn bulk_candidates(&self) -> Vec<(DeviceDescriptor, UsbCandidate)> {
        let devices = match nusb::list_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("USB enumeration failed: {e}");
                return Vec::new();
            }
        };
        let candidates: Vec<UsbCandidate> = devices
            .map(|d| UsbCandidate {
                vid: d.vendor_id(),
                pid: d.product_id(),
                serial: d.serial_number().map(str::to_string),
                interface: 0,
            })
            .collect();
        select(&candidates, &self.selectors)
            .into_iter()
            .filter(|(d, _)| d.transport == TransportKind::UsbBulk)
            .collect()
    }

    fn hid_driver(handles: HidHandles, serial: String) -> Option<Arc<dyn DeviceDriver>> {
        let HidHandles {
            descriptor,
            control,
            secondary,
            ..
        } = handles;
        let transport = Transport::new(Box::new(HidIo::new(control)), transport_config(&descriptor));
        let driver: Arc<dyn DeviceDriver> = match descriptor.family {
            Family::Platinum => Arc::new(PlatinumDriver::new(descriptor, serial, transport)),
            Family::LcdCover => Arc::new(LcdCoverDriver::new(descriptor, serial, transport)?),
            Family::Nexus => {
                let touch = secondary
                    .map(|dev| Transport::new(Box::new(HidIo::new(dev)), TransportConfig::default()));
                Arc::new(NexusDriver::new(descriptor, serial, transport, touch)?)
            }
            Family::Headset => Arc::new(HeadsetDriver::new(descriptor, serial, transport)),
            Family::Mouse => Arc::new(MouseDriver::new(descriptor, serial, transport)),
            Family::Hydro | Family::Memory => return None,
        };
        Some(driver)
    }

    async fn memory_driver(&self) -> Option<Arc<dyn DeviceDriver>> {
        if !self.memory.enabled {
            return None;
        }
        let kind = self.memory.ddr_kind()?;
        let adapter = self.memory.smbus.clone();
        let bus = match LinuxSmBus::open(&adapter) {
            Ok(bus) => bus,
            Err(e) => {
                warn!("{adapter}: cannot open SMBus adapter: {e}");
                return None;
            }
        };
        match MemoryDriver::probe(&adapter, Box::new(bus), kind, self.memory.sku_source()).await {
            Ok(Some(driver)) => Some(Arc::new(driver)),
            Ok(None) => None,
            Err(e) => {
                warn!("{adapter}: memory probe failed: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl DeviceFactory for UsbFactory {
    async fn discover(&self) -> Vec<Arc<dyn DeviceDriver>> {
        let mut drivers: Vec<Arc<dyn DeviceDriver>> = Vec::new();

        let selectors = self.selectors.clone();
        match tokio::task::spawn_blocking(move || Self::open_hid(&selectors)).await {
            Ok(Ok(handles)) => {
                for (index, handles) in handles.into_iter().enumerate() {
                    let serial = device_serial(&handles.candidate, index);
                    let name = handles.descriptor.name.clone();
                    match Self::hid_driver(handles, serial.clone()) {
                        Some(driver) => {
                            info!("Found {name} ({serial})");
                            drivers.push(driver);
                        }
                        None => warn!("{name}: descriptor lacks what its driver needs"),
                    }
                }
            }
            Ok(Err(e)) => warn!("HID enumeration failed: {e}"),
            Err(e) => warn!("HID enumeration task failed: {e}"),
        }

        for (index, (descriptor, candidate)) in self.bulk_candidates().into_iter().enumerate() {
            let serial = device_serial(&candidate, index);
            let endpoint = UsbBulkEndpoint::open(
                candidate.vid,
                candidate.pid,
                candidate.serial.as_deref(),
                descriptor.interface,
                descriptor.endpoint_out,
                descriptor.endpoint_in,
            );
            match endpoint {
                Ok(endpoint) => {
                    info!("Found {} ({serial})", descriptor.name);
                    let transport = Transport::new(Box::new(endpoint), transport_config(&descriptor));
                    drivers.push(Arc::new(HydroDriver::new(descriptor, serial, transport)));
                }
                Err(e) => warn!("{}: cannot claim bulk interface: {e}", descriptor.name),
            }
        }

        if let Some(memory) = self.memory_driver().await {
            info!("Found {} ({})", memory.descriptor().name, memory.serial());
            drivers.push(memory);
        }

        debug!("Discovery produced {} driver(s)", drivers.len());
        drivers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UsbSelector;
    use descriptor::VID_CORSAIR;
    use pretty_assertions::assert_eq;

    fn hid(pid: u16, serial: Option<&str>, interface: i32) -> UsbCandidate {
        UsbCandidate {
            vid: VID_CORSAIR,
            pid,
            serial: serial.map(str::to_string),
            interface,
        }
    }

    #[test]
    fn catalog_products_on_their_control_interface() {
        let candidates = vec![
            hid(0x0c18, Some("P1"), 0),
            hid(0x0c18, Some("P1"), 1),
            hid(0x1b8e, Some("N1"), 1),
            hid(0x1b8e, Some("N1"), 0),
            hid(0xffff, Some("X"), 0),
        ];
        let chosen = select(&candidates, &[]);
        let picked: Vec<(Family, Option<String>, i32)> = chosen
            .iter()
            .map(|(d, c)| (d.family, c.serial.clone(), c.interface))
            .collect();
        assert_eq!(
            picked,
            vec![
                (Family::Platinum, Some("P1".into()), 0),
                (Family::Nexus, Some("N1".into()), 0),
            ]
        );
    }

    #[test]
    fn selectors_restrict_and_extend_the_catalog() {
        let selectors = vec![DeviceSelector::Platinum {
            usb: UsbSelector {
                vid: VID_CORSAIR,
                pid: 0x0c99,
                serial: None,
            },
        }];
        let candidates = vec![hid(0x0c18, Some("P1"), 0), hid(0x0c99, None, 0)];
        let chosen = select(&candidates, &selectors);
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].0.family, Family::Platinum);
        assert_eq!(chosen[0].0.product_id, 0x0c99);
    }

    #[test]
    fn missing_serials_are_derived() {
        assert_eq!(device_serial(&hid(0x0c18, None, 0), 2), "1b1c-0c18-2");
        assert_eq!(device_serial(&hid(0x0c18, Some("  "), 0), 0), "1b1c-0c18-0");
        assert_eq!(device_serial(&hid(0x0c18, Some("AB12"), 0), 0), "AB12");
    }

    #[test]
    fn transport_geometry_follows_the_descriptor() {
        let cfg = transport_config(&descriptor::lcd_cover(0x0c39, "Elite LCD Cover"));
        assert_eq!(cfg.write_size, 1024);
        assert_eq!(cfg.read_size, 64);
    }

    #[tokio::test]
    async fn disabled_memory_is_not_probed() {
        let factory = UsbFactory::new(Vec::new(), MemoryCfg::default());
        assert!(factory.memory_driver().await.is_none());
    }
}
