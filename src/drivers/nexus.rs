//! iCUE Nexus companion: a 640x48 strip display with touch buttons.

use async_trait::async_trait;

use crate::descriptor::DeviceDescriptor;
use crate::drivers::lcd_cover::Panel;
use crate::drivers::{DeviceDriver, InputEvent};
use crate::error::DeviceResult;
use crate::lcd::touch::{self, TOUCH_REPORT_LEN};
use crate::state::Telemetry;
use crate::transport::Transport;

/// Touch interface poll budget in milliseconds.
const TOUCH_TIMEOUT: i32 = 100;

pub struct NexusDriver {
    descriptor: DeviceDescriptor,
    serial: String,
    panel: Panel,
    touch: Option<Transport>,
}

impl NexusDriver {
    /// `touch` is the secondary HID interface, absent when it could not be opened.
    pub fn new(
        descriptor: DeviceDescriptor,
        serial: String,
        transport: Transport,
        touch: Option<Transport>,
    ) -> Option<Self> {
        let panel = Panel::new(&descriptor, transport)?;
        Some(Self {
            descriptor,
            serial,
            panel,
            touch,
        })
    }
}

#[async_trait]
impl DeviceDriver for NexusDriver {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    async fn firmware(&self) -> DeviceResult<String> {
        self.panel.firmware().await
    }

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

    fn has_input(&self) -> bool {
        self.touch.is_some()
    }

    async fn read_input(&self) -> DeviceResult<Option<InputEvent>> {
        let Some(touch) = &self.touch else {
            return Ok(None);
        };
        let report = touch.read(TOUCH_REPORT_LEN, TOUCH_TIMEOUT).await?;
        Ok(touch::parse(&report))
    }

    async fn close(&self) {
        if let Some(touch) = &self.touch {
            touch.close().await;
        }
        self.panel.close().await;
    }
}
