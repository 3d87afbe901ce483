//! HID Platinum AIO coolers: pump modes, two fans, 24 addressable LEDs.

use async_trait::async_trait;

use crate::descriptor::{ChannelKind, DeviceDescriptor};
use crate::drivers::{Actuation, ColorMode, DeviceDriver, dotted};
use crate::error::{DeviceResult, ProtocolError};
use crate::rgb::frame::LedFrame;
use crate::state::Telemetry;
use crate::transport::Transport;

pub const CMD_FIRMWARE: u8 = 0xaa;
pub const CMD_LIQUID_TEMPERATURE: u8 = 0xa9;
pub const CMD_GET_PUMP: u8 = 0x31;
pub const CMD_SET_PUMP: u8 = 0x32;
pub const CMD_GET_FAN: u8 = 0x41;
pub const CMD_SET_FAN: u8 = 0x42;
pub const CMD_INIT_COLOR: u8 = 0x61;
pub const CMD_SET_COLOR: u8 = 0x62;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    SetFan { index: u8, duty: u8 },
    SetPumpMode { mode: u8 },
    InitColor(ColorMode),
}

impl Command {
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Command::SetFan { index, duty } => vec![CMD_SET_FAN, index, duty],
            Command::SetPumpMode { mode } => vec![CMD_SET_PUMP, mode],
            Command::InitColor(ColorMode::Software) => vec![CMD_INIT_COLOR, 0x01],
            Command::InitColor(ColorMode::Hardware) => vec![CMD_INIT_COLOR, 0x00],
        }
    }
}

/// Pump duty to pump mode: up to 75 % Quiet, up to 90 % Balanced, else Extreme.
pub fn pump_mode(descriptor: &DeviceDescriptor, duty: u8) -> u8 {
    let slot = match duty {
        0..=75 => 0,
        76..=90 => 1,
        _ => 2,
    };
    descriptor
        .pump_modes
        .get(slot)
        .or(descriptor.pump_modes.last())
        .map_or(slot as u8, |(mode, _)| *mode)
}

fn echo(expected: u8, buf: &[u8]) -> Result<(), ProtocolError> {
    match buf.first() {
        Some(&got) if got == expected => Ok(()),
        Some(&got) => Err(ProtocolError::UnexpectedOpcode { expected, got }),
        None => Err(ProtocolError::Malformed("empty response".into())),
    }
}

fn rpm(buf: &[u8]) -> u16 {
    buf.get(2..4)
        .map_or(0, |b| u16::from_be_bytes([b[0], b[1]]))
}

/// `buf[3] + sign(buf[3]) * buf[4] * 0.1`, integer part signed.
pub fn liquid(buf: &[u8]) -> f32 {
    let (Some(&whole), Some(&tenths)) = (buf.get(3), buf.get(4)) else {
        return 0.0;
    };
    let whole = f32::from(whole as i8);
    let sign = if whole < 0.0 { -1.0 } else { 1.0 };
    whole + sign * f32::from(tenths) * 0.1
}

pub struct PlatinumDriver {
    descriptor: DeviceDescriptor,
    serial: String,
    transport: Transport,
}

impl PlatinumDriver {
    pub fn new(descriptor: DeviceDescriptor, serial: String, transport: Transport) -> Self {
        Self {
            descriptor,
            serial,
            transport,
        }
    }
}

#[async_trait]
impl DeviceDriver for PlatinumDriver {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    async fn firmware(&self) -> DeviceResult<String> {
        let buf = self.transport.exchange(CMD_FIRMWARE, &[]).await?;
        echo(CMD_FIRMWARE, &buf)?;
        Ok(dotted(&buf[3..7]))
    }

    async fn telemetry(&self) -> DeviceResult<Telemetry> {
        let temp = self
            .transport
            .exchange_or_zero(CMD_LIQUID_TEMPERATURE, &[])
            .await;
        let liquid = liquid(&temp);
        let mut channels = Vec::with_capacity(self.descriptor.zones.len());
        for (id, zone) in self.descriptor.zones.iter().enumerate() {
            let reading = match zone.kind {
                ChannelKind::Pump => {
                    let buf = self.transport.exchange_or_zero(CMD_GET_PUMP, &[]).await;
                    (rpm(&buf), Some(liquid))
                }
                ChannelKind::Fan => {
                    let buf = self
                        .transport
                        .exchange_or_zero(CMD_GET_FAN, &[zone.hw_index])
                        .await;
                    (rpm(&buf), None)
                }
                ChannelKind::Lighting => continue,
            };
            channels.push((id as u8, reading.0, reading.1));
        }
        Ok(Telemetry {
            channels,
            liquid_temperature: Some(liquid),
            ..Telemetry::default()
        })
    }

    async fn actuate(&self, actuations: &[Actuation]) -> DeviceResult<()> {
        let frames = actuations
            .iter()
            .filter_map(|a| match a.kind {
                ChannelKind::Pump => Some(Command::SetPumpMode {
                    mode: pump_mode(&self.descriptor, a.duty),
                }),
                ChannelKind::Fan => Some(Command::SetFan {
                    index: a.hw_index,
                    duty: a.duty,
                }),
                ChannelKind::Lighting => None,
            })
            .map(|c| c.to_bytes())
            .collect();
        self.transport.write_all(frames).await?;
        Ok(())
    }

    async fn render_frame(&self, frame: &LedFrame) -> DeviceResult<()> {
        let packets = frame.packets(CMD_SET_COLOR, self.descriptor.max_color_chunk);
        self.transport.write_all(packets).await?;
        Ok(())
    }

    async fn set_color_mode(&self, mode: ColorMode) -> DeviceResult<()> {
        self.transport
            .write(Command::InitColor(mode).to_bytes())
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.transport.close().await;
    }
}
