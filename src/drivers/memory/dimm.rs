//! SMBus transactions of one RGB DIMM.
//!
//! All functions are blocking and run inside [`SmBusTransport::with_bus`].
//!
//! [`SmBusTransport::with_bus`]: crate::transport::SmBusTransport::with_bus

use log::{debug, warn};

use crate::drivers::memory::sku::Sku;
use crate::error::TransportError;
use crate::transport::SmBusBus;
use crate::transport::smbus::I2C_BLOCK_MAX;

pub const SPD_FIRST: u8 = 0x50;
pub const SPD_LAST: u8 = 0x57;

/// DDR4 SPD page select addresses.
pub const DDR4_PAGE0: u8 = 0x36;
pub const DDR4_PAGE1: u8 = 0x37;
pub const DDR4_SKU: std::ops::RangeInclusive<u8> = 0x49..=0x5b;
pub const DDR4_THERMAL_BASE: u8 = 0x18;
pub const DDR4_THERMAL_REG: u8 = 0x05;
pub const DDR4_RGB_BASE: u8 = 0x58;

pub const DDR5_LEGACY_REG: u8 = 0x0b;
pub const DDR5_LEGACY_MODE: u8 = 0x04;
pub const DDR5_SKU: std::ops::RangeInclusive<u8> = 0x89..=0x9b;
pub const DDR5_THERMAL_REG: u8 = 0x31;
pub const DDR5_RGB_BASE: u8 = 0x18;

/// Colour register of the direct mode payload.
pub const RGB_REG: u8 = 0x31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdrKind {
    Ddr4,
    Ddr5,
}

impl DdrKind {
    pub fn from_generation(generation: u8) -> Option<Self> {
        match generation {
            4 => Some(DdrKind::Ddr4),
            5 => Some(DdrKind::Ddr5),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DdrKind::Ddr4 => "DDR4",
            DdrKind::Ddr5 => "DDR5",
        }
    }
}

/// One populated slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimm {
    pub slot: u8,
    pub kind: DdrKind,
    pub sku: Sku,
}

impl Dimm {
    pub fn spd(&self) -> u8 {
        SPD_FIRST + self.slot
    }

    pub fn leds(&self) -> u16 {
        self.sku.line.leds()
    }

    fn rgb_addr(&self) -> u8 {
        match self.kind {
            DdrKind::Ddr4 => DDR4_RGB_BASE + self.slot,
            DdrKind::Ddr5 => DDR5_RGB_BASE + self.slot,
        }
    }

    pub fn temperature(&self, bus: &mut dyn SmBusBus) -> Result<f32, TransportError> {
        match self.kind {
            DdrKind::Ddr4 => {
                let raw = bus.read_word(DDR4_THERMAL_BASE + self.slot, DDR4_THERMAL_REG)?;
                Ok(ddr4_temperature(raw))
            }
            DdrKind::Ddr5 => {
                let raw = bus.read_word(self.spd(), DDR5_THERMAL_REG)?;
                Ok(ddr5_temperature(raw))
            }
        }
    }

    /// Writes `[leds, R G B.., crc]` starting at [`RGB_REG`] in blocks of at
    /// most 32 bytes.
    pub fn write_colors(&self, bus: &mut dyn SmBusBus, rgb: &[u8]) -> Result<(), TransportError> {
        let payload = color_payload(rgb);
        for (i, block) in payload.chunks(I2C_BLOCK_MAX).enumerate() {
            bus.write_block(self.rgb_addr(), RGB_REG + i as u8, block)?;
        }
        Ok(())
    }
}

pub fn color_payload(rgb: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(rgb.len() + 2);
    payload.push((rgb.len() / 3) as u8);
    payload.extend_from_slice(rgb);
    payload.push(crc8(&payload));
    payload
}

/// CRC-8/CCITT: polynomial 0x07, initial value 0.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |mut crc, byte| {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// JEDEC TSE2004 reading: byte swapped, 13-bit two's complement, 1/16 °C.
pub fn ddr4_temperature(word: u16) -> f32 {
    const BITS: i32 = 10;
    let mut raw = i32::from(word.swap_bytes() & 0x1fff);
    if raw > 0x0fff {
        raw -= 0x2000;
    }
    raw as f32 * 0.25 / (1 << (12 - BITS)) as f32
}

/// SPD5118 reading: bits 2..13, 11-bit two's complement, 1/4 °C.
pub fn ddr5_temperature(word: u16) -> f32 {
    let mut raw = i32::from((word >> 2) & 0x07ff);
    if raw & 0x0400 != 0 {
        raw -= 0x0800;
    }
    raw as f32 * 0.25
}

fn read_string(
    bus: &mut dyn SmBusBus,
    addr: u8,
    range: std::ops::RangeInclusive<u8>,
) -> Result<String, TransportError> {
    let bytes = range
        .map(|reg| bus.read_byte(addr, reg))
        .collect::<Result<Vec<u8>, _>>()?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_sku(bus: &mut dyn SmBusBus, addr: u8, kind: DdrKind) -> Result<String, TransportError> {
    match kind {
        DdrKind::Ddr4 => {
            bus.write_byte(DDR4_PAGE1, 0x00, 0x00)?;
            let sku = read_string(bus, addr, DDR4_SKU);
            bus.write_byte(DDR4_PAGE0, 0x00, 0x00)?;
            sku
        }
        DdrKind::Ddr5 => {
            bus.write_byte(addr, DDR5_LEGACY_REG, DDR5_LEGACY_MODE)?;
            read_string(bus, addr, DDR5_SKU)
        }
    }
}

/// How the part number of each DIMM is learned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkuSource {
    /// Read from SPD. Slots whose part number is not a known kit are skipped.
    Decode,
    /// One part number for every populated slot.
    Fixed(String),
}

/// Finds populated RGB DIMMs on the bus.
pub fn probe(bus: &mut dyn SmBusBus, kind: DdrKind, source: &SkuSource) -> Vec<Dimm> {
    let fixed = match source {
        SkuSource::Fixed(part) => match Sku::parse(part) {
            Ok(sku) => Some(sku),
            Err(e) => {
                warn!("configured memory part: {e}");
                return Vec::new();
            }
        },
        SkuSource::Decode => None,
    };
    let mut dimms = Vec::new();
    for addr in SPD_FIRST..=SPD_LAST {
        if bus.read_byte(addr, 0x00).is_err() {
            continue;
        }
        let slot = addr - SPD_FIRST;
        let sku = match &fixed {
            Some(sku) => sku.clone(),
            None => match read_sku(bus, addr, kind).map(|raw| Sku::parse(&raw)) {
                Ok(Ok(sku)) => sku,
                Ok(Err(e)) => {
                    debug!("slot {slot}: {e}");
                    continue;
                }
                Err(e) => {
                    warn!("slot {slot}: part number unreadable: {e}");
                    continue;
                }
            },
        };
        debug!("slot {slot}: {sku}");
        dimms.push(Dimm { slot, kind, sku });
    }
    dimms
}
