//! RGB DIMMs behind one SMBus adapter, driven as a single device with one
//! lighting channel per populated slot.

pub mod dimm;
pub mod sku;

use async_trait::async_trait;
use log::{info, warn};

use crate::descriptor::{self, DeviceDescriptor};
use crate::drivers::DeviceDriver;
use crate::error::DeviceResult;
use crate::rgb::frame::LedFrame;
use crate::state::Telemetry;
use crate::transport::{SmBusBus, SmBusTransport};

pub use dimm::{DdrKind, Dimm, SkuSource};
pub use sku::Sku;

pub struct MemoryDriver {
    descriptor: DeviceDescriptor,
    serial: String,
    dimms: Vec<Dimm>,
    transport: SmBusTransport,
}

impl MemoryDriver {
    /// Probes the adapter. `None` when no RGB DIMM answers.
    pub async fn probe(
        adapter: &str,
        bus: Box<dyn SmBusBus>,
        kind: DdrKind,
        source: SkuSource,
    ) -> DeviceResult<Option<Self>> {
        let transport = SmBusTransport::new(bus);
        let dimms = transport
            .with_bus(move |bus| Ok(dimm::probe(bus, kind, &source)))
            .await?;
        if dimms.is_empty() {
            info!("{adapter}: no RGB {} modules found", kind.name());
            transport.close().await;
            return Ok(None);
        }
        Ok(Some(Self::new(adapter, dimms, transport)))
    }

    pub fn new(adapter: &str, dimms: Vec<Dimm>, transport: SmBusTransport) -> Self {
        let zones: Vec<(u8, u16)> = dimms.iter().map(|d| (d.slot, d.leds())).collect();
        let name = dimms
            .first()
            .map_or("RGB memory", |d| d.sku.line.name())
            .to_string();
        Self {
            descriptor: descriptor::memory(&name, &zones),
            serial: format!("DRAM-{adapter}"),
            dimms,
            transport,
        }
    }

    pub fn dimms(&self) -> &[Dimm] {
        &self.dimms
    }
}

#[async_trait]
impl DeviceDriver for MemoryDriver {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    /// DIMMs carry no firmware version; the generation and part stand in.
    async fn firmware(&self) -> DeviceResult<String> {
        Ok(self
            .dimms
            .first()
            .map(|d| format!("{} {}", d.kind.name(), d.sku.part))
            .unwrap_or_default())
    }

    async fn telemetry(&self) -> DeviceResult<Telemetry> {
        let dimms = self.dimms.clone();
        let readings = self
            .transport
            .with_bus(move |bus| {
                Ok(dimms
                    .iter()
                    .map(|d| d.temperature(bus))
                    .collect::<Vec<_>>())
            })
            .await?;
        let channels = readings
            .into_iter()
            .enumerate()
            .map(|(id, reading)| {
                let temperature = reading
                    .inspect_err(|e| warn!("{}: DIMM {id} temperature: {e}", self.serial))
                    .ok();
                (id as u8, 0, temperature)
            })
            .collect();
        Ok(Telemetry {
            channels,
            ..Telemetry::default()
        })
    }

    async fn render_frame(&self, frame: &LedFrame) -> DeviceResult<()> {
        let writes: Vec<(Dimm, Vec<u8>)> = self
            .dimms
            .iter()
            .enumerate()
            .map(|(ch, d)| (d.clone(), frame.channel_rgb(ch)))
            .collect();
        self.transport
            .with_bus(move |bus| {
                writes
                    .iter()
                    .try_for_each(|(d, rgb)| d.write_colors(bus, rgb))
            })
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rgb::color::Rgb;
    use crate::transport::mock::RecordingBus;
    use pretty_assertions::assert_eq;

    async fn ddr5_pair() -> (MemoryDriver, crate::transport::mock::Bus) {
        let raw = RecordingBus::new();
        let bus = raw.bus();
        bus.set_string(0x50, 0x89, "CMH32GX5M2B5600C36");
        bus.set_string(0x52, 0x89, "CMH32GX5M2B5600C36");
        bus.set_word(0x50, 0x31, (36 * 4) << 2);
        let driver = MemoryDriver::probe("i2c-0", Box::new(raw), DdrKind::Ddr5, SkuSource::Decode)
            .await
            .unwrap()
            .unwrap();
        bus.clear();
        (driver, bus)
    }

    #[tokio::test]
    async fn probe_builds_one_zone_per_dimm() {
        let (d, _) = ddr5_pair().await;
        assert_eq!(d.serial(), "DRAM-i2c-0");
        assert_eq!(d.descriptor().zones.len(), 2);
        assert_eq!(d.descriptor().total_leds(), 20);
        assert_eq!(d.descriptor().name, "VENGEANCE RGB");
        assert_eq!(d.firmware().await.unwrap(), "DDR5 CMH32GX5M2B5600C36");
    }

    #[tokio::test]
    async fn ddr5_static_red_at_half_brightness() {
        let (d, bus) = ddr5_pair().await;
        let mut frame = LedFrame::new(d.descriptor());
        for ch in 0..2 {
            frame.fill(ch, Rgb::RED.scaled(50));
        }
        d.render_frame(&frame).await.unwrap();

        let blocks = bus.blocks();
        assert_eq!(blocks.len(), 2);
        let mut expected = vec![10u8];
        expected.extend([127, 0, 0].repeat(10));
        expected.push(dimm::crc8(&expected));
        assert_eq!(blocks[0], (0x18, 0x31, expected.clone()));
        assert_eq!(blocks[1], (0x1a, 0x31, expected));
    }

    #[tokio::test]
    async fn temperatures_per_slot() {
        let (d, _) = ddr5_pair().await;
        let t = d.telemetry().await.unwrap();
        assert_eq!(t.channels[0], (0, 0, Some(36.0)));
        assert_eq!(t.channels[1], (1, 0, Some(0.0)));
    }

    #[tokio::test]
    async fn empty_bus_is_not_a_device() {
        let found = MemoryDriver::probe(
            "i2c-1",
            Box::new(RecordingBus::new()),
            DdrKind::Ddr4,
            SkuSource::Decode,
        )
        .await
        .unwrap();
        assert!(found.is_none());
    }
}
