//! Per-family device drivers.
//!
//! Each family implements [`DeviceDriver`], the capability set the generic
//! workers call into. A driver is built once per attached device from its
//! [`DeviceDescriptor`] and never hardcodes geometry the descriptor carries.

pub mod headset;
pub mod hydro;
pub mod lcd_cover;
pub mod memory;
pub mod mouse;
pub mod nexus;
pub mod platinum;

use std::collections::VecDeque;

use async_trait::async_trait;
use log::warn;
use tokio::sync::Mutex;

use crate::descriptor::{ChannelKind, DeviceDescriptor};
use crate::error::{DeviceResult, ProtocolError, TransportError, ValidationError};
use crate::rgb::frame::LedFrame;
use crate::state::Telemetry;
use crate::transport::Transport;

/// Who drives the LEDs: the daemon or the device's own firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Software,
    Hardware,
}

/// One duty change emitted by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actuation {
    pub channel: u8,
    pub kind: ChannelKind,
    pub hw_index: u8,
    pub duty: u8,
}

/// Device-level settings outside the channel model.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceSetting {
    Sidetone(u8),
    SleepMinutes(u8),
    Equalizer([i8; 10]),
    Dpi { stages: Vec<u16>, active: u8 },
}

/// Unsolicited input from a device's secondary interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Touch press on a Nexus panel at horizontal position `x`.
    Touch { x: u16 },
    MicMute(bool),
    /// Side button of a mouse. Parsed, no action bound.
    Button(u8),
}

#[async_trait]
pub trait DeviceDriver: Send + Sync {
    fn descriptor(&self) -> &DeviceDescriptor;

    fn serial(&self) -> &str;

    /// Probes firmware. A wrong echo aborts the device start.
    async fn firmware(&self) -> DeviceResult<String>;

    /// One whole telemetry snapshot.
    async fn telemetry(&self) -> DeviceResult<Telemetry>;

    /// Sends all actuations inside one transport critical section.
    async fn actuate(&self, _actuations: &[Actuation]) -> DeviceResult<()> {
        Err(ValidationError::Unsupported("actuation").into())
    }

    async fn render_frame(&self, _frame: &LedFrame) -> DeviceResult<()> {
        Ok(())
    }

    /// Streams one encoded LCD image.
    async fn render_lcd(&self, _jpeg: &[u8]) -> DeviceResult<()> {
        Ok(())
    }

    async fn set_color_mode(&self, _mode: ColorMode) -> DeviceResult<()> {
        Ok(())
    }

    async fn set_lcd_rotation(&self, _degrees: u16) -> DeviceResult<()> {
        Ok(())
    }

    /// Hands the LCD back to the device firmware.
    async fn lcd_to_hardware(&self) -> DeviceResult<()> {
        Ok(())
    }

    async fn configure(&self, _setting: &DeviceSetting) -> DeviceResult<()> {
        Err(ValidationError::Unsupported("setting").into())
    }

    fn has_input(&self) -> bool {
        false
    }

    /// Waits briefly for one input report. `None` when nothing arrived.
    async fn read_input(&self) -> DeviceResult<Option<InputEvent>> {
        Ok(None)
    }

    /// Releases the transport. Safe to call twice.
    async fn close(&self);
}

/// `major.minor.patch` from three bytes.
pub(crate) fn dotted(parts: &[u8]) -> String {
    parts
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Input reports a peripheral link keeps for [`PeripheralLink::next_report`].
const BACKLOG_DEPTH: usize = 16;

const INPUT_REPORT_LEN: usize = 64;

/// HID link of a peripheral that pushes unsolicited input reports.
///
/// Requests are matched by opcode. Input that shows up while a request is in
/// flight is queued and served by [`PeripheralLink::next_report`] before the
/// wire is read again, so a mute toggle during a battery poll is not lost.
pub(crate) struct PeripheralLink {
    transport: Transport,
    backlog: Mutex<VecDeque<Vec<u8>>>,
}

impl PeripheralLink {
    pub(crate) fn new(transport: Transport) -> Self {
        Self {
            transport,
            backlog: Mutex::new(VecDeque::with_capacity(BACKLOG_DEPTH)),
        }
    }

    async fn request(&self, op: u8) -> Result<Vec<u8>, TransportError> {
        let reply = self
            .transport
            .request(op, &[], move |report| report.first() == Some(&op))
            .await?;
        if !reply.unsolicited.is_empty() {
            let mut backlog = self.backlog.lock().await;
            for report in reply.unsolicited {
                if backlog.len() == BACKLOG_DEPTH {
                    backlog.pop_front();
                }
                backlog.push_back(report);
            }
        }
        reply.response
    }

    /// Firmware probe: `[op, _, major, minor, patch]`.
    pub(crate) async fn firmware(&self, op: u8) -> DeviceResult<String> {
        let buf = self.request(op).await?;
        match buf.get(2..5) {
            Some(parts) => Ok(dotted(parts)),
            None => Err(ProtocolError::Malformed("short firmware response".into()).into()),
        }
    }

    /// Battery percentage at byte 2. `None` when the receiver has nothing
    /// paired or did not answer.
    pub(crate) async fn battery(&self, op: u8) -> Option<u8> {
        match self.request(op).await {
            Ok(buf) => buf.get(2).map(|b| (*b).min(100)),
            Err(TransportError::ClosedHandle) => None,
            Err(e) => {
                warn!("battery request {op:#04x} failed: {e}");
                None
            }
        }
    }

    pub(crate) async fn write(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.transport.write(frame).await
    }

    /// Next input report: queued ones first, then the wire. Empty when
    /// nothing arrived within `timeout_ms`.
    pub(crate) async fn next_report(&self, timeout_ms: i32) -> Result<Vec<u8>, TransportError> {
        if let Some(report) = self.backlog.lock().await.pop_front() {
            return Ok(report);
        }
        self.transport.read(INPUT_REPORT_LEN, timeout_ms).await
    }

    pub(crate) async fn close(&self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Driver double that records what the workers ask for.

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    pub(crate) struct FrameRecorder {
        descriptor: DeviceDescriptor,
        pub(crate) frames: Mutex<Vec<Vec<u8>>>,
        pub(crate) images: Mutex<Vec<Vec<u8>>>,
        pub(crate) rotations: Mutex<Vec<u16>>,
        pub(crate) actuations: Mutex<Vec<Vec<Actuation>>>,
        pub(crate) telemetry: Mutex<Telemetry>,
        pub(crate) inputs: Mutex<Vec<InputEvent>>,
        pub(crate) closed: AtomicUsize,
    }

    impl FrameRecorder {
        pub(crate) fn new(descriptor: DeviceDescriptor) -> Self {
            Self {
                descriptor,
                frames: Mutex::new(Vec::new()),
                images: Mutex::new(Vec::new()),
                rotations: Mutex::new(Vec::new()),
                actuations: Mutex::new(Vec::new()),
                telemetry: Mutex::new(Telemetry::default()),
                inputs: Mutex::new(Vec::new()),
                closed: AtomicUsize::new(0),
            }
        }

        pub(crate) fn frames(&self) -> Vec<Vec<u8>> {
            self.frames.lock().unwrap().clone()
        }

        pub(crate) fn images(&self) -> Vec<Vec<u8>> {
            self.images.lock().unwrap().clone()
        }

        pub(crate) fn actuations(&self) -> Vec<Vec<Actuation>> {
            self.actuations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeviceDriver for FrameRecorder {
        fn descriptor(&self) -> &DeviceDescriptor {
            &self.descriptor
        }

        fn serial(&self) -> &str {
            "REC"
        }

        async fn firmware(&self) -> DeviceResult<String> {
            Ok("1.0.0".into())
        }

        async fn telemetry(&self) -> DeviceResult<Telemetry> {
            Ok(self.telemetry.lock().unwrap().clone())
        }

        async fn actuate(&self, actuations: &[Actuation]) -> DeviceResult<()> {
            self.actuations.lock().unwrap().push(actuations.to_vec());
            Ok(())
        }

        async fn render_frame(&self, frame: &LedFrame) -> DeviceResult<()> {
            self.frames.lock().unwrap().push(frame.as_bytes().to_vec());
            Ok(())
        }

        async fn render_lcd(&self, jpeg: &[u8]) -> DeviceResult<()> {
            self.images.lock().unwrap().push(jpeg.to_vec());
            Ok(())
        }

        async fn set_lcd_rotation(&self, degrees: u16) -> DeviceResult<()> {
            self.rotations.lock().unwrap().push(degrees);
            Ok(())
        }

        fn has_input(&self) -> bool {
            !self.inputs.lock().unwrap().is_empty()
        }

        async fn read_input(&self) -> DeviceResult<Option<InputEvent>> {
            let next = {
                let mut inputs = self.inputs.lock().unwrap();
                (!inputs.is_empty()).then(|| inputs.remove(0))
            };
            if next.is_none() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            Ok(next)
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
