//! Bulk-endpoint Hydro AIO coolers.
//!
//! Every request is `[cmd, data..]` padded to 64 bytes; every answer is a
//! 64 byte block. One `device data` request carries fan RPM, pump RPM and the
//! liquid temperature, and also the firmware version.

use async_trait::async_trait;
use log::debug;

use crate::descriptor::{ChannelKind, DeviceDescriptor, HYDRO_MAX_FANS};
use crate::drivers::{Actuation, DeviceDriver, dotted};
use crate::error::{DeviceResult, ProtocolError};
use crate::state::Telemetry;
use crate::transport::Transport;

pub const CMD_DEVICE_DATA: u8 = 0x20;
pub const CMD_SET_FAN: u8 = 0x11;
pub const CMD_SET_PUMP: u8 = 0x13;

const FAN_PAYLOAD: usize = 12;
const DUTY_CAP: u8 = 0x64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    DeviceData,
    SetFan { index: u8, duty: u8 },
    SetPump { duty: u8 },
}

impl Command {
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Command::DeviceData => vec![CMD_DEVICE_DATA],
            Command::SetFan { index, duty } => {
                let mut buf = vec![0u8; FAN_PAYLOAD + 1];
                buf[0] = CMD_SET_FAN;
                buf[1] = index;
                buf[2] = DUTY_CAP;
                buf[7] = duty;
                buf[8] = duty;
                buf
            }
            Command::SetPump { duty } => vec![CMD_SET_PUMP, duty],
        }
    }
}

/// Decoded `device data` block.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceData {
    pub fan_rpm: Vec<u16>,
    pub pump_rpm: u16,
    pub liquid: f32,
    pub firmware: String,
}

impl DeviceData {
    /// Fan `i` sits at big-endian bytes `[2i, 2i+2)`, the pump at `[8, 10)`.
    /// Only the first [`HYDRO_MAX_FANS`] fans have a slot.
    pub fn parse(buf: &[u8], fans: usize) -> Result<Self, ProtocolError> {
        if buf.len() < 15 {
            return Err(ProtocolError::Malformed(format!(
                "device data is {} bytes",
                buf.len()
            )));
        }
        let be = |at: usize| u16::from_be_bytes([buf[at], buf[at + 1]]);
        Ok(Self {
            fan_rpm: (0..fans.min(usize::from(HYDRO_MAX_FANS)))
                .map(|i| be(i * 2))
                .collect(),
            pump_rpm: be(8),
            liquid: f32::from(buf[10]) + f32::from(buf[14]) * 0.1,
            firmware: dotted(&buf[4..7]),
        })
    }
}

pub struct HydroDriver {
    descriptor: DeviceDescriptor,
    serial: String,
    transport: Transport,
}

impl HydroDriver {
    pub fn new(descriptor: DeviceDescriptor, serial: String, transport: Transport) -> Self {
        Self {
            descriptor,
            serial,
            transport,
        }
    }
}

#[async_trait]
impl DeviceDriver for HydroDriver {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    async fn firmware(&self) -> DeviceResult<String> {
        let buf = self.transport.exchange(CMD_DEVICE_DATA, &[]).await?;
        Ok(DeviceData::parse(&buf, 0)?.firmware)
    }

    async fn telemetry(&self) -> DeviceResult<Telemetry> {
        let buf = self.transport.exchange_or_zero(CMD_DEVICE_DATA, &[]).await;
        let data = DeviceData::parse(&buf, self.descriptor.fans())?;
        let mut channels = Vec::with_capacity(self.descriptor.zones.len());
        for (id, zone) in self.descriptor.zones.iter().enumerate() {
            let reading = match zone.kind {
                ChannelKind::Pump => (data.pump_rpm, Some(data.liquid)),
                ChannelKind::Fan => (
                    data.fan_rpm.get(usize::from(zone.hw_index)).copied().unwrap_or(0),
                    None,
                ),
                ChannelKind::Lighting => continue,
            };
            channels.push((id as u8, reading.0, reading.1));
        }
        Ok(Telemetry {
            channels,
            liquid_temperature: Some(data.liquid),
            ..Telemetry::default()
        })
    }

    async fn actuate(&self, actuations: &[Actuation]) -> DeviceResult<()> {
        let frames: Vec<Vec<u8>> = actuations
            .iter()
            .filter_map(|a| match a.kind {
                ChannelKind::Pump => Some(Command::SetPump { duty: a.duty }),
                ChannelKind::Fan => Some(Command::SetFan {
                    index: a.hw_index,
                    duty: a.duty,
                }),
                ChannelKind::Lighting => None,
            })
            .map(|c| c.to_bytes())
            .collect();
        debug!("{}: {} actuation frame(s)", self.serial, frames.len());
        self.transport.write_all(frames).await?;
        Ok(())
    }

    async fn close(&self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor;
    use crate::transport::TransportConfig;
    use crate::transport::mock::RecordingIo;
    use pretty_assertions::assert_eq;

    fn data_block() -> Vec<u8> {
        let mut buf = vec![0u8; 64];
        buf[0..2].copy_from_slice(&1200u16.to_be_bytes());
        buf[2..4].copy_from_slice(&900u16.to_be_bytes());
        buf[4..7].copy_from_slice(&[2, 1, 9]);
        buf[8..10].copy_from_slice(&2600u16.to_be_bytes());
        buf[10] = 31;
        buf[14] = 4;
        buf
    }

    fn driver(io: RecordingIo, fans: u8) -> HydroDriver {
        HydroDriver::new(
            descriptor::hydro(0x0c02, "H80i", fans),
            "HYDRO".into(),
            Transport::new(Box::new(io), TransportConfig::default()),
        )
    }

    #[test]
    fn fan_command_layout() {
        assert_eq!(
            Command::SetFan { index: 0, duty: 60 }.to_bytes(),
            vec![0x11, 0x00, 0x64, 0, 0, 0, 0, 60, 60, 0, 0, 0, 0]
        );
        assert_eq!(Command::SetPump { duty: 85 }.to_bytes(), vec![0x13, 85]);
    }

    #[test]
    fn device_data_parsing() {
        let data = DeviceData::parse(&data_block(), 2).unwrap();
        assert_eq!(data.fan_rpm, vec![1200, 900]);
        assert_eq!(data.pump_rpm, 2600);
        assert!((data.liquid - 31.4).abs() < 1e-4);
        assert_eq!(data.firmware, "2.1.9");
        assert!(DeviceData::parse(&[0; 4], 1).is_err());
    }

    #[test]
    fn firmware_bytes_are_never_read_as_fan_speed() {
        let data = DeviceData::parse(&data_block(), 4).unwrap();
        assert_eq!(data.fan_rpm, vec![1200, 900]);
    }

    #[tokio::test]
    async fn telemetry_maps_zones_to_readings() {
        let io = RecordingIo::new().respond_with(|_| data_block());
        let d = driver(io, 2);
        assert_eq!(d.firmware().await.unwrap(), "2.1.9");
        let t = d.telemetry().await.unwrap();
        assert_eq!(t.channels.len(), 3);
        assert_eq!(t.channels[0].0, 0);
        assert_eq!(t.channels[0].1, 2600);
        assert_eq!(t.channels[1].1, 1200);
        assert_eq!(t.channels[2].1, 900);
        assert!(t.liquid_temperature.is_some());
    }

    #[tokio::test]
    async fn silent_device_yields_zero_telemetry() {
        let d = driver(RecordingIo::new(), 1);
        let t = d.telemetry().await.unwrap();
        assert_eq!(t.liquid_temperature, Some(0.0));
        assert!(t.channels.iter().all(|c| c.1 == 0));
    }

    #[tokio::test]
    async fn actuations_are_written_together() {
        let io = RecordingIo::new();
        let wire = io.wire();
        let d = driver(io, 1);
        d.actuate(&[
            Actuation {
                channel: 1,
                kind: ChannelKind::Fan,
                hw_index: 0,
                duty: 60,
            },
            Actuation {
                channel: 0,
                kind: ChannelKind::Pump,
                hw_index: 0,
                duty: 85,
            },
        ])
        .await
        .unwrap();
        let writes = wire.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(&writes[0][..13], &[0x11, 0, 0x64, 0, 0, 0, 0, 60, 60, 0, 0, 0, 0]);
        assert_eq!(&writes[1][..2], &[0x13, 85]);
        assert!(writes[1][2..].iter().all(|b| *b == 0));
    }
}
