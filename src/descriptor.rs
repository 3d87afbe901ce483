//! Immutable per-product device descriptions.
//!
//! A [`DeviceDescriptor`] carries everything a generic engine needs to drive
//! a product: zones and LED counts, opcodes, buffer sizes, tick periods and
//! LCD geometry. Drivers are configured by it; they never hardcode geometry.

use std::time::Duration;

use crate::rgb::color::Rgb;

pub const VID_CORSAIR: u16 = 0x1b1c;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Hydro,
    Platinum,
    LcdCover,
    Nexus,
    Headset,
    Mouse,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Hid,
    UsbBulk,
    SmBus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    Pump,
    Fan,
    /// LED-only group with no actuator behind it.
    Lighting,
}

/// Byte order of an LED frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedLayout {
    /// `R G B R G B ...`
    Interleaved,
    /// `R R R ... G G G ... B B B ...`
    Planar,
}

/// One logical zone of a product. Each zone becomes one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub name: String,
    pub kind: ChannelKind,
    pub hw_index: u8,
    pub leds: u16,
    pub contains_pump: bool,
    pub has_temperature: bool,
}

impl Zone {
    pub fn new(name: &str, kind: ChannelKind, hw_index: u8, leds: u16) -> Self {
        Self {
            name: name.to_string(),
            kind,
            hw_index,
            leds,
            contains_pump: kind == ChannelKind::Pump,
            has_temperature: false,
        }
    }

    pub fn with_temperature(mut self) -> Self {
        self.has_temperature = true;
        self
    }
}

/// Command bytes. `None` means the product has no such command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Opcodes {
    pub firmware: Option<u8>,
    pub device_data: Option<u8>,
    pub get_fan: Option<u8>,
    pub set_fan: Option<u8>,
    pub get_pump: Option<u8>,
    pub set_pump: Option<u8>,
    pub liquid_temperature: Option<u8>,
    pub set_color: Option<u8>,
    pub init_color: Option<u8>,
    pub mode_switch: Option<u8>,
    pub battery: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LcdGeometry {
    pub width: u32,
    pub height: u32,
    /// Full packet size including the header.
    pub buffer: usize,
    pub header: usize,
    /// Nexus panels carry 0x40 in header byte 2.
    pub nexus: bool,
    /// Feature report id used for rotation and hardware hand-back.
    pub control_report: u8,
}

impl LcdGeometry {
    pub fn chunk_payload(&self) -> usize {
        self.buffer - self.header
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub family: Family,
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: String,
    pub transport: TransportKind,
    pub interface: u8,
    pub endpoint_out: u8,
    pub endpoint_in: u8,
    pub write_buffer_size: usize,
    pub read_buffer_size: usize,
    pub zones: Vec<Zone>,
    pub opcodes: Opcodes,
    /// Ordered "mode byte -> name" table for pumps driven by modes.
    pub pump_modes: &'static [(u8, &'static str)],
    pub led_layout: LedLayout,
    /// Largest colour payload per packet; longer frames are chunked.
    pub max_color_chunk: usize,
    pub telemetry_interval: Duration,
    pub control_interval: Duration,
    pub frame_interval: Duration,
    pub lcd: Option<LcdGeometry>,
    /// Keyframes `(position 0..1, colour)` for temperature-mapped RGB.
    pub temperature_palette: &'static [(f32, Rgb)],
    pub wireless: bool,
    pub psu: bool,
}

impl DeviceDescriptor {
    pub fn fans(&self) -> usize {
        self.zones
            .iter()
            .filter(|z| z.kind == ChannelKind::Fan)
            .count()
    }

    pub fn has_pump(&self) -> bool {
        self.zones.iter().any(|z| z.contains_pump)
    }

    pub fn total_leds(&self) -> usize {
        self.zones.iter().map(|z| z.leds as usize).sum()
    }
}

pub const DEFAULT_PALETTE: &[(f32, Rgb)] = &[
    (0.0, Rgb::new(0, 0, 255)),
    (0.35, Rgb::new(0, 255, 0)),
    (0.7, Rgb::new(255, 255, 0)),
    (1.0, Rgb::new(255, 0, 0)),
];

const PLATINUM_PUMP_MODES: &[(u8, &str)] = &[(0x00, "Quiet"), (0x01, "Balanced"), (0x02, "Extreme")];

fn base(family: Family, pid: u16, name: &str, transport: TransportKind) -> DeviceDescriptor {
    DeviceDescriptor {
        family,
        vendor_id: VID_CORSAIR,
        product_id: pid,
        name: name.to_string(),
        transport,
        interface: 0,
        endpoint_out: 0,
        endpoint_in: 0,
        write_buffer_size: 64,
        read_buffer_size: 64,
        zones: Vec::new(),
        opcodes: Opcodes::default(),
        pump_modes: &[],
        led_layout: LedLayout::Interleaved,
        max_color_chunk: 60,
        telemetry_interval: Duration::from_millis(1000),
        control_interval: Duration::from_millis(3000),
        frame_interval: Duration::from_millis(40),
        lcd: None,
        temperature_palette: DEFAULT_PALETTE,
        wireless: false,
        psu: false,
    }
}

/// Fan RPM slots in the Hydro `device data` block. Bytes 4..7 carry the
/// firmware version, so a third fan has nowhere to go.
pub const HYDRO_MAX_FANS: u8 = 2;

/// Bulk-endpoint AIO: one pump and up to [`HYDRO_MAX_FANS`] fan headers.
pub fn hydro(pid: u16, name: &str, fans: u8) -> DeviceDescriptor {
    let mut d = base(Family::Hydro, pid, name, TransportKind::UsbBulk);
    d.endpoint_out = 0x02;
    d.endpoint_in = 0x82;
    d.opcodes = Opcodes {
        device_data: Some(0x20),
        set_fan: Some(0x11),
        set_pump: Some(0x13),
        ..Opcodes::default()
    };
    d.zones.push(Zone::new("Pump", ChannelKind::Pump, 0, 0).with_temperature());
    for i in 0..fans.min(HYDRO_MAX_FANS) {
        d.zones
            .push(Zone::new(&format!("Fan {}", i + 1), ChannelKind::Fan, i, 0));
    }
    d
}

/// HID AIO with pump modes and 24 addressable LEDs.
pub fn platinum(pid: u16, name: &str) -> DeviceDescriptor {
    let mut d = base(Family::Platinum, pid, name, TransportKind::Hid);
    d.opcodes = Opcodes {
        firmware: Some(0xaa),
        get_fan: Some(0x41),
        set_fan: Some(0x42),
        get_pump: Some(0x31),
        set_pump: Some(0x32),
        liquid_temperature: Some(0xa9),
        set_color: Some(0x62),
        init_color: Some(0x61),
        ..Opcodes::default()
    };
    d.pump_modes = PLATINUM_PUMP_MODES;
    d.telemetry_interval = Duration::from_millis(1500);
    d.zones = vec![
        Zone::new("Pump", ChannelKind::Pump, 0, 16).with_temperature(),
        Zone::new("Fan 1", ChannelKind::Fan, 0, 4),
        Zone::new("Fan 2", ChannelKind::Fan, 1, 4),
    ];
    d
}

pub fn lcd_cover(pid: u16, name: &str) -> DeviceDescriptor {
    let mut d = base(Family::LcdCover, pid, name, TransportKind::Hid);
    d.write_buffer_size = 1024;
    d.read_buffer_size = 64;
    d.telemetry_interval = Duration::from_millis(3000);
    d.lcd = Some(LcdGeometry {
        width: 480,
        height: 480,
        buffer: 1024,
        header: 8,
        nexus: false,
        control_report: 0x03,
    });
    d
}

pub fn nexus(pid: u16) -> DeviceDescriptor {
    let mut d = base(Family::Nexus, pid, "iCUE NEXUS", TransportKind::Hid);
    d.write_buffer_size = 1024;
    d.telemetry_interval = Duration::from_millis(3000);
    d.lcd = Some(LcdGeometry {
        width: 640,
        height: 48,
        buffer: 1024,
        header: 8,
        nexus: true,
        control_report: 0x03,
    });
    d
}

pub fn headset(pid: u16, name: &str, wireless: bool) -> DeviceDescriptor {
    let mut d = base(Family::Headset, pid, name, TransportKind::Hid);
    d.opcodes = Opcodes {
        firmware: Some(0x01),
        set_color: Some(0x05),
        init_color: Some(0x03),
        mode_switch: Some(0x09),
        battery: Some(0x0f),
        ..Opcodes::default()
    };
    d.led_layout = LedLayout::Planar;
    d.telemetry_interval = Duration::from_millis(3000);
    d.wireless = wireless;
    d.zones = vec![
        Zone::new("Left Logo", ChannelKind::Lighting, 0, 1),
        Zone::new("Indicator LED", ChannelKind::Lighting, 1, 1),
        Zone::new("Right Logo", ChannelKind::Lighting, 2, 1),
    ];
    d
}

pub fn mouse(pid: u16, name: &str, wireless: bool) -> DeviceDescriptor {
    let mut d = base(Family::Mouse, pid, name, TransportKind::Hid);
    d.opcodes = Opcodes {
        firmware: Some(0x01),
        set_color: Some(0x22),
        init_color: Some(0x03),
        battery: Some(0x0f),
        ..Opcodes::default()
    };
    d.telemetry_interval = Duration::from_millis(3000);
    d.wireless = wireless;
    d.zones = vec![
        Zone::new("Logo", ChannelKind::Lighting, 0, 1),
        Zone::new("Scroll Wheel", ChannelKind::Lighting, 1, 1),
    ];
    d
}

/// DIMM set behind one SMBus adapter. One zone per populated slot.
pub fn memory(name: &str, dimms: &[(u8, u16)]) -> DeviceDescriptor {
    let mut d = base(Family::Memory, 0, name, TransportKind::SmBus);
    d.vendor_id = 0;
    d.telemetry_interval = Duration::from_millis(3000);
    d.frame_interval = Duration::from_millis(100);
    d.max_color_chunk = 30;
    d.zones = dimms
        .iter()
        .map(|&(slot, leds)| {
            Zone::new(&format!("DIMM {slot}"), ChannelKind::Lighting, slot, leds).with_temperature()
        })
        .collect();
    d
}

/// Products recognised on the USB bus.
pub fn usb_catalog() -> Vec<DeviceDescriptor> {
    vec![
        hydro(0x0c09, "Hydro H60i", 1),
        hydro(0x0c02, "Hydro H80i GT", 2),
        hydro(0x0c03, "Hydro H100i GTX", 2),
        platinum(0x0c18, "H100i Platinum"),
        platinum(0x0c17, "H115i Platinum"),
        lcd_cover(0x0c39, "Elite LCD Cover"),
        nexus(0x1b8e),
        headset(0x0a42, "Virtuoso RGB Wireless", true),
        mouse(0x1b4c, "Ironclaw RGB Wireless", true),
    ]
}

pub fn lookup(vid: u16, pid: u16) -> Option<DeviceDescriptor> {
    usb_catalog()
        .into_iter()
        .find(|d| d.vendor_id == vid && d.product_id == pid)
}
