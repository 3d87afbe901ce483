//! Runtime state of one device: channels, polled telemetry and flags.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::descriptor::{ChannelKind, DeviceDescriptor};

/// One logical actuator or LED group.
///
/// Identity and LED count come from the descriptor and never change; the
/// mutable readings live in [`DeviceState`].
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: u8,
    pub kind: ChannelKind,
    pub hw_index: u8,
    pub led_count: u16,
    pub name: String,
    pub contains_pump: bool,
    pub has_temperature: bool,
}

impl Channel {
    pub fn from_descriptor(descriptor: &DeviceDescriptor) -> Vec<Channel> {
        descriptor
            .zones
            .iter()
            .enumerate()
            .map(|(id, zone)| Channel {
                id: id as u8,
                kind: zone.kind,
                hw_index: zone.hw_index,
                led_count: zone.leds,
                name: zone.name.clone(),
                contains_pump: zone.contains_pump,
                has_temperature: zone.has_temperature,
            })
            .collect()
    }

    pub fn is_actuator(&self) -> bool {
        matches!(self.kind, ChannelKind::Pump | ChannelKind::Fan)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn render(self, celsius: f32) -> String {
        match self {
            TemperatureUnit::Celsius => format!("{celsius:.1} °C"),
            TemperatureUnit::Fahrenheit => format!("{:.1} °F", celsius * 9.0 / 5.0 + 32.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelReading {
    pub rpm: u16,
    pub temperature: Option<f32>,
    /// Last duty sent by the control loop.
    pub duty: Option<u8>,
}

/// Everything one telemetry tick produced. Applied to [`DeviceState`] as a
/// whole so readers never see half-updated RPM/temperature pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telemetry {
    /// `(channel id, rpm, temperature)`
    pub channels: Vec<(u8, u16, Option<f32>)>,
    pub liquid_temperature: Option<f32>,
    pub battery: Option<u8>,
    pub mic_muted: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    pub channels: Vec<ChannelReading>,
    pub liquid_temperature: Option<f32>,
    pub battery: Option<u8>,
    pub firmware: String,
    pub connected: bool,
}

impl DeviceState {
    pub fn new(channel_count: usize) -> Self {
        Self {
            channels: vec![ChannelReading::default(); channel_count],
            ..Self::default()
        }
    }

    pub fn apply(&mut self, t: &Telemetry) {
        for &(id, rpm, temperature) in &t.channels {
            if let Some(reading) = self.channels.get_mut(id as usize) {
                reading.rpm = rpm;
                if temperature.is_some() {
                    reading.temperature = temperature;
                }
            }
        }
        if t.liquid_temperature.is_some() {
            self.liquid_temperature = t.liquid_temperature;
        }
        if t.battery.is_some() {
            self.battery = t.battery;
        }
        self.connected = true;
    }
}

/// State shared by all workers of one device.
#[derive(Debug, Default)]
pub struct DeviceShared {
    pub state: RwLock<DeviceState>,
    exiting: AtomicBool,
    mic_muted: AtomicBool,
}

impl DeviceShared {
    pub fn new(channel_count: usize) -> Self {
        Self {
            state: RwLock::new(DeviceState::new(channel_count)),
            ..Self::default()
        }
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    /// Sets the exiting flag. Returns `true` only for the first caller.
    pub fn begin_exit(&self) -> bool {
        !self.exiting.swap(true, Ordering::AcqRel)
    }

    /// Clears the flag so a stopped device object can be started again.
    pub fn clear_exit(&self) {
        self.exiting.store(false, Ordering::Release);
    }

    pub fn mic_muted(&self) -> bool {
        self.mic_muted.load(Ordering::Acquire)
    }

    /// Returns `true` when the value changed.
    pub fn set_mic_muted(&self, muted: bool) -> bool {
        self.mic_muted.swap(muted, Ordering::AcqRel) != muted
    }
}
