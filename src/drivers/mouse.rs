//! Wireless RGB mice: two LEDs, DPI stages and a battery gauge.

use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::descriptor::DeviceDescriptor;
use crate::drivers::{
    ColorMode, DeviceDriver, DeviceSetting, InputEvent, PeripheralLink,
};
use crate::error::{DeviceResult, ValidationError};
use crate::profile::device::{DPI_MAX, DPI_MIN};
use crate::rgb::frame::LedFrame;
use crate::state::Telemetry;
use crate::transport::Transport;

pub const CMD_FIRMWARE: u8 = 0x01;
pub const CMD_INIT_COLOR: u8 = 0x03;
pub const CMD_BATTERY: u8 = 0x0f;
pub const CMD_SET_COLOR: u8 = 0x22;
pub const CMD_DPI: u8 = 0x30;

/// Input report id of a side button press; byte 1 is the button code.
pub const REPORT_BUTTON: u8 = 0x12;

const MAX_STAGES: usize = 5;
const INPUT_TIMEOUT: i32 = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    InitColor(ColorMode),
    Colors(Vec<u8>),
    Dpi { stages: Vec<u16>, active: u8 },
}

impl Command {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Command::InitColor(ColorMode::Software) => vec![CMD_INIT_COLOR, 0x01],
            Command::InitColor(ColorMode::Hardware) => vec![CMD_INIT_COLOR, 0x00],
            Command::Colors(rgb) => {
                let mut buf = Vec::with_capacity(rgb.len() + 2);
                buf.push(CMD_SET_COLOR);
                buf.push((rgb.len() / 3) as u8);
                buf.extend_from_slice(rgb);
                buf
            }
            Command::Dpi { stages, active } => {
                let mut buf = vec![0u8; 3 + stages.len() * 2];
                buf[0] = CMD_DPI;
                buf[1] = *active;
                buf[2] = stages.len() as u8;
                for (i, dpi) in stages.iter().enumerate() {
                    LittleEndian::write_u16(&mut buf[3 + i * 2..5 + i * 2], *dpi);
                }
                buf
            }
        }
    }
}

pub fn parse_input(report: &[u8]) -> Option<InputEvent> {
    match report {
        [REPORT_BUTTON, code, ..] => Some(InputEvent::Button(*code)),
        _ => None,
    }
}

pub struct MouseDriver {
    descriptor: DeviceDescriptor,
    serial: String,
    link: PeripheralLink,
}

impl MouseDriver {
    pub fn new(descriptor: DeviceDescriptor, serial: String, transport: Transport) -> Self {
        Self {
            descriptor,
            serial,
            link: PeripheralLink::new(transport),
        }
    }
}

#[async_trait]
impl DeviceDriver for MouseDriver {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    async fn firmware(&self) -> DeviceResult<String> {
        self.link.firmware(CMD_FIRMWARE).await
    }

    async fn telemetry(&self) -> DeviceResult<Telemetry> {
        let battery = if self.descriptor.wireless {
            self.link.battery(CMD_BATTERY).await
        } else {
            None
        };
        Ok(Telemetry {
            battery,
            ..Telemetry::default()
        })
    }

    async fn render_frame(&self, frame: &LedFrame) -> DeviceResult<()> {
        self.link
            .write(Command::Colors(frame.as_bytes().to_vec()).to_bytes())
            .await?;
        Ok(())
    }

    async fn set_color_mode(&self, mode: ColorMode) -> DeviceResult<()> {
        self.link
            .write(Command::InitColor(mode).to_bytes())
            .await?;
        Ok(())
    }

    async fn configure(&self, setting: &DeviceSetting) -> DeviceResult<()> {
        let DeviceSetting::Dpi { stages, active } = setting else {
            return Err(ValidationError::Unsupported("mouse setting").into());
        };
        let stages: Vec<u16> = stages
            .iter()
            .take(MAX_STAGES)
            .map(|s| (*s).clamp(DPI_MIN, DPI_MAX))
            .collect();
        if stages.is_empty() {
            return Err(ValidationError::OutOfRange {
                field: "dpi stages",
                value: 0,
            }
            .into());
        }
        let active = (*active).min(stages.len() as u8 - 1);
        debug!("{}: DPI stages {stages:?}, active {active}", self.serial);
        self.link
            .write(Command::Dpi { stages, active }.to_bytes())
            .await?;
        Ok(())
    }

    fn has_input(&self) -> bool {
        true
    }

    async fn read_input(&self) -> DeviceResult<Option<InputEvent>> {
        let report = self.link.next_report(INPUT_TIMEOUT).await?;
        Ok(parse_input(&report))
    }

    async fn close(&self) {
        self.link.close().await;
    }
}
