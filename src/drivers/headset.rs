//! Wireless/wired RGB headsets.
//!
//! Three planar LEDs (left logo, mic indicator, right logo), sidetone, sleep
//! timer, a ten band equalizer and a battery gauge. Mute changes arrive as
//! unsolicited input reports.

use async_trait::async_trait;

use crate::descriptor::DeviceDescriptor;
use crate::drivers::{
    ColorMode, DeviceDriver, DeviceSetting, InputEvent, PeripheralLink,
};
use crate::error::{DeviceResult, ValidationError};
use crate::profile::device::EQ_LIMIT;
use crate::rgb::frame::LedFrame;
use crate::state::Telemetry;
use crate::transport::Transport;

pub const CMD_FIRMWARE: u8 = 0x01;
pub const CMD_SET_COLOR: u8 = 0x05;
pub const CMD_MODE: u8 = 0x09;
pub const CMD_SIDETONE: u8 = 0x0a;
pub const CMD_SLEEP: u8 = 0x0b;
pub const CMD_EQUALIZER: u8 = 0x0c;
pub const CMD_BATTERY: u8 = 0x0f;

/// Input report id of a microphone state change; byte 1 is 1 when muted.
pub const REPORT_MIC: u8 = 0x11;

const INPUT_TIMEOUT: i32 = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Mode(ColorMode),
    Colors(Vec<u8>),
    Sidetone(u8),
    Sleep(u8),
    Equalizer([i8; 10]),
}

impl Command {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Command::Mode(ColorMode::Software) => vec![CMD_MODE, 0x01],
            Command::Mode(ColorMode::Hardware) => vec![CMD_MODE, 0x00],
            Command::Colors(planar) => {
                let mut buf = Vec::with_capacity(planar.len() + 2);
                buf.push(CMD_SET_COLOR);
                buf.push((planar.len() / 3) as u8);
                buf.extend_from_slice(planar);
                buf
            }
            Command::Sidetone(level) => vec![CMD_SIDETONE, *level],
            Command::Sleep(minutes) => vec![CMD_SLEEP, *minutes],
            Command::Equalizer(bands) => {
                let mut buf = vec![CMD_EQUALIZER];
                buf.extend(bands.iter().map(|b| *b as u8));
                buf
            }
        }
    }
}

pub fn parse_input(report: &[u8]) -> Option<InputEvent> {
    match report {
        [REPORT_MIC, state, ..] => Some(InputEvent::MicMute(*state == 1)),
        _ => None,
    }
}

pub struct HeadsetDriver {
    descriptor: DeviceDescriptor,
    serial: String,
    link: PeripheralLink,
}

impl HeadsetDriver {
    pub fn new(descriptor: DeviceDescriptor, serial: String, transport: Transport) -> Self {
        Self {
            descriptor,
            serial,
            link: PeripheralLink::new(transport),
        }
    }
}

#[async_trait]
impl DeviceDriver for HeadsetDriver {
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
        self.link.write(Command::Mode(mode).to_bytes()).await?;
        Ok(())
    }

    async fn configure(&self, setting: &DeviceSetting) -> DeviceResult<()> {
        let command = match setting {
            DeviceSetting::Sidetone(level) if *level <= 100 => Command::Sidetone(*level),
            DeviceSetting::Sidetone(level) => {
                return Err(ValidationError::OutOfRange {
                    field: "sidetone",
                    value: i64::from(*level),
                }
                .into());
            }
            DeviceSetting::SleepMinutes(m) => Command::Sleep(*m),
            DeviceSetting::Equalizer(bands) => {
                if let Some(b) = bands.iter().find(|b| !(-EQ_LIMIT..=EQ_LIMIT).contains(*b)) {
                    return Err(ValidationError::OutOfRange {
                        field: "equalizer",
                        value: i64::from(*b),
                    }
                    .into());
                }
                Command::Equalizer(*bands)
            }
            DeviceSetting::Dpi { .. } => return Err(ValidationError::Unsupported("dpi").into()),
        };
        self.link.write(command.to_bytes()).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor;
    use crate::rgb::color::Rgb;
    use crate::transport::TransportConfig;
    use crate::transport::mock::RecordingIo;
    use pretty_assertions::assert_eq;

    fn driver(io: RecordingIo) -> HeadsetDriver {
        HeadsetDriver::new(
            descriptor::headset(0x0a42, "Virtuoso", true),
            "HS".into(),
            Transport::new(Box::new(io), TransportConfig::default()),
        )
    }

    #[tokio::test]
    async fn planar_frame_is_sent_in_one_report() {
        let io = RecordingIo::new();
        let wire = io.wire();
        let d = driver(io);
        let mut frame = LedFrame::new(d.descriptor());
        frame.fill(1, Rgb::RED);
        d.render_frame(&frame).await.unwrap();
        let w = &wire.writes()[0];
        assert_eq!(&w[..11], &[0x05, 3, 0, 0xff, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn battery_and_firmware() {
        let io = RecordingIo::new().respond_with(|req| {
            let mut r = vec![0u8; 64];
            r[0] = req[0];
            r[2] = if req[0] == CMD_BATTERY { 87 } else { 4 };
            r[3] = 1;
            r[4] = 2;
            r
        });
        let d = driver(io);
        assert_eq!(d.firmware().await.unwrap(), "4.1.2");
        assert_eq!(d.telemetry().await.unwrap().battery, Some(87));
    }

    #[tokio::test]
    async fn settings_are_validated_before_the_wire() {
        let io = RecordingIo::new();
        let wire = io.wire();
        let d = driver(io);
        d.configure(&DeviceSetting::Sidetone(40)).await.unwrap();
        assert!(d.configure(&DeviceSetting::Sidetone(101)).await.is_err());
        let mut eq = [0i8; 10];
        eq[0] = -12;
        eq[9] = 12;
        d.configure(&DeviceSetting::Equalizer(eq)).await.unwrap();
        eq[3] = 13;
        assert!(d.configure(&DeviceSetting::Equalizer(eq)).await.is_err());
        let writes = wire.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(&writes[0][..2], &[0x0a, 40]);
        assert_eq!(&writes[1][..2], &[0x0c, 0xf4]);
        assert_eq!(writes[1][10], 12);
    }

    #[tokio::test]
    async fn mute_reports_are_parsed() {
        let io = RecordingIo::new();
        let wire = io.wire();
        let d = driver(io);
        wire.push_input(vec![REPORT_MIC, 1]);
        assert_eq!(d.read_input().await.unwrap(), Some(InputEvent::MicMute(true)));
        wire.push_input(vec![REPORT_MIC, 0]);
        assert_eq!(d.read_input().await.unwrap(), Some(InputEvent::MicMute(false)));
        assert_eq!(d.read_input().await.unwrap(), None);
    }

    #[tokio::test]
    async fn mute_toggle_during_battery_poll_is_not_lost() {
        let io = RecordingIo::new();
        let wire = io.wire();
        let late = wire.clone();
        let io = io.respond_with(move |req| {
            // unmute lands after the request, before its answer
            late.push_input(vec![REPORT_MIC, 0]);
            let mut r = vec![0u8; 64];
            r[0] = req[0];
            r[2] = 87;
            r
        });
        let d = driver(io);
        wire.push_input(vec![REPORT_MIC, 1]);

        assert_eq!(d.telemetry().await.unwrap().battery, Some(87));
        assert_eq!(d.read_input().await.unwrap(), Some(InputEvent::MicMute(true)));
        assert_eq!(d.read_input().await.unwrap(), Some(InputEvent::MicMute(false)));
        assert_eq!(d.read_input().await.unwrap(), None);
    }
}
