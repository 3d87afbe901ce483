//! LCD pump cover: a 480x480 panel fed with chunked JPEG images.
//!
//! [`Panel`] holds the streaming and control-plane logic shared with the
//! Nexus companion display.

use async_trait::async_trait;
use log::debug;

use crate::descriptor::{DeviceDescriptor, LcdGeometry};
use crate::drivers::{DeviceDriver, dotted};
use crate::error::{DeviceResult, ValidationError};
use crate::lcd::packet;
use crate::state::Telemetry;
use crate::transport::Transport;

/// Feature report carrying the firmware version.
pub const FIRMWARE_REPORT: u8 = 0x05;
const FIRMWARE_REPORT_LEN: usize = 32;

/// Control report selectors, written after the report id.
pub const SELECT_ROTATION: u8 = 0x0c;
pub const SELECT_HARDWARE: u8 = 0x0d;

/// Streaming and control plane of one LCD panel.
pub(crate) struct Panel {
    geometry: LcdGeometry,
    transport: Transport,
}

impl Panel {
    pub(crate) fn new(descriptor: &DeviceDescriptor, transport: Transport) -> Option<Self> {
        Some(Self {
            geometry: descriptor.lcd?,
            transport,
        })
    }

    pub(crate) async fn firmware(&self) -> DeviceResult<String> {
        let buf = self
            .transport
            .feature_report_get(FIRMWARE_REPORT, FIRMWARE_REPORT_LEN)
            .await?;
        Ok(dotted(buf.get(2..5).unwrap_or_default()))
    }

    /// Writes every chunk of one image inside one critical section.
    pub(crate) async fn stream(&self, jpeg: &[u8]) -> DeviceResult<()> {
        let packets = packet::packets(&self.geometry, jpeg)?;
        debug!("LCD image {} bytes in {} packets", jpeg.len(), packets.len());
        self.transport.write_all(packets).await?;
        Ok(())
    }

    pub(crate) async fn rotate(&self, degrees: u16) -> DeviceResult<()> {
        if degrees % 90 != 0 || degrees >= 360 {
            return Err(ValidationError::OutOfRange {
                field: "rotation",
                value: i64::from(degrees),
            }
            .into());
        }
        self.transport
            .feature_report_set(
                self.geometry.control_report,
                &[SELECT_ROTATION, (degrees / 90) as u8],
            )
            .await?;
        Ok(())
    }

    pub(crate) async fn to_hardware(&self) -> DeviceResult<()> {
        self.transport
            .feature_report_set(self.geometry.control_report, &[SELECT_HARDWARE, 0x01])
            .await?;
        Ok(())
    }

    pub(crate) async fn close(&self) {
        self.transport.close().await;
    }
}

pub struct LcdCoverDriver {
    descriptor: DeviceDescriptor,
    serial: String,
    panel: Panel,
}

impl LcdCoverDriver {
    /// `None` when the descriptor has no LCD geometry.
    pub fn new(descriptor: DeviceDescriptor, serial: String, transport: Transport) -> Option<Self> {
        let panel = Panel::new(&descriptor, transport)?;
        Some(Self {
            descriptor,
            serial,
            panel,
        })
    }
}

#[async_trait]
impl DeviceDriver for LcdCoverDriver {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    async fn firmware(&self) -> DeviceResult<String> {
        self.panel.firmware().await
    }

    /// The cover has no sensors of its own.
    async fn telemetry(&self) -> DeviceResult<Telemetry> {
        Ok(Telemetry::default())
    }

    async fn render_lcd(&self, jpeg: &[u8]) -> DeviceResult<()> {
        self.panel.stream(jpeg).await
    }

    async fn set_lcd_rotation(&self, degrees: u16) -> DeviceResult<()> {
        self.panel.rotate(degrees).await
    }

    async fn lcd_to_hardware(&self) -> DeviceResult<()> {
        self.panel.to_hardware().await
    }

    async fn close(&self) {
        self.panel.close().await;
    }
}
