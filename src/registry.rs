//! Global directory of attached devices.
//!
//! Entries are added at attach and removed at detach. Readers get cloned
//! snapshots, so no lock is held across I/O.

use std::sync::Arc;

use dashmap::DashMap;

use crate::descriptor::{ChannelKind, Family};
use crate::state::{Channel, DeviceState, TemperatureUnit};

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    pub id: u8,
    pub name: String,
    pub kind: ChannelKind,
    pub has_temperature: bool,
    pub rpm: u16,
    pub temperature: Option<f32>,
    pub rendered: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub serial: String,
    pub name: String,
    pub family: Family,
    pub firmware: String,
    pub channels: Vec<ChannelSnapshot>,
    pub liquid_temperature: Option<f32>,
    pub battery: Option<u8>,
}

impl DeviceSnapshot {
    pub fn new(serial: &str, name: &str, family: Family, channels: &[Channel]) -> Self {
        Self {
            serial: serial.to_string(),
            name: name.to_string(),
            family,
            firmware: String::new(),
            channels: channels
                .iter()
                .map(|c| ChannelSnapshot {
                    id: c.id,
                    name: c.name.clone(),
                    kind: c.kind,
                    has_temperature: c.has_temperature,
                    rpm: 0,
                    temperature: None,
                    rendered: None,
                })
                .collect(),
            liquid_temperature: None,
            battery: None,
        }
    }

    /// Copies one whole telemetry snapshot in.
    pub fn refresh(&mut self, state: &DeviceState, unit: TemperatureUnit) {
        self.firmware.clone_from(&state.firmware);
        self.liquid_temperature = state.liquid_temperature;
        self.battery = state.battery;
        for (snap, reading) in self.channels.iter_mut().zip(&state.channels) {
            snap.rpm = reading.rpm;
            snap.temperature = reading.temperature;
            snap.rendered = reading.temperature.map(|t| unit.render(t));
        }
    }

    /// Temperature exposed by `channel`: its own reading, or the liquid
    /// temperature for the pump.
    pub fn temperature(&self, channel: u8) -> Option<f32> {
        let ch = self.channels.iter().find(|c| c.id == channel)?;
        if !ch.has_temperature {
            return None;
        }
        ch.temperature.or(match ch.kind {
            ChannelKind::Pump => self.liquid_temperature,
            _ => None,
        })
    }
}

/// Cloneable handle on the shared directory.
#[derive(Debug, Clone, Default)]
pub struct DeviceDirectory {
    devices: Arc<DashMap<String, DeviceSnapshot>>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, snapshot: DeviceSnapshot) {
        self.devices.insert(snapshot.serial.clone(), snapshot);
    }

    pub fn remove(&self, serial: &str) -> Option<DeviceSnapshot> {
        self.devices.remove(serial).map(|(_, v)| v)
    }

    /// Applies `f` to the entry of `serial`. Returns `false` when absent.
    pub fn update<F>(&self, serial: &str, f: F) -> bool
    where
        F: FnOnce(&mut DeviceSnapshot),
    {
        match self.devices.get_mut(serial) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, serial: &str) -> Option<DeviceSnapshot> {
        self.devices.get(serial).map(|e| e.value().clone())
    }

    pub fn temperature(&self, serial: &str, channel: u8) -> Option<f32> {
        self.devices
            .get(serial)
            .and_then(|e| e.value().temperature(channel))
    }

    /// Does `serial:channel` name a channel that reports a temperature?
    pub fn has_probe(&self, serial: &str, channel: u8) -> bool {
        self.devices.get(serial).is_some_and(|e| {
            e.value()
                .channels
                .iter()
                .any(|c| c.id == channel && c.has_temperature)
        })
    }

    pub fn serials(&self) -> Vec<String> {
        let mut serials: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        serials.sort();
        serials
    }

    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let mut all: Vec<DeviceSnapshot> = self.devices.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.serial.cmp(&b.serial));
        all
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
