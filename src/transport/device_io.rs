use hidapi::HidDevice;

use crate::error::TransportError;

/// Raw byte channel to one device handle.
///
/// Implementations are blocking; [`super::Transport`] runs them under
/// `spawn_blocking` while holding the per-device lock.
pub trait DeviceIo: Send + 'static {
    /// Writes one complete protocol frame and returns the bytes accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Reads into `buf`. Returns `Ok(0)` when nothing arrived within `timeout_ms`.
    fn read(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportError>;

    /// Reads a feature report. `buf[0]` carries the report id.
    fn get_feature_report(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
        Err(TransportError::Pipe("feature reports unsupported".into()))
    }

    /// Sends a feature report. `buf[0]` carries the report id.
    fn send_feature_report(&mut self, _buf: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Pipe("feature reports unsupported".into()))
    }

    /// Releases the OS handle. Called once by the transport.
    fn close(&mut self) {}
}

/// hidapi handle. Output reports are sent with report id 0.
pub struct HidIo {
    dev: HidDevice,
    scratch: Vec<u8>,
}

impl HidIo {
    pub fn new(dev: HidDevice) -> Self {
        Self {
            dev,
            scratch: Vec::with_capacity(1025),
        }
    }
}

impl DeviceIo for HidIo {
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.scratch.clear();
        self.scratch.push(0x00);
        self.scratch.extend_from_slice(buf);
        let n = self.dev.write(&self.scratch)?;
        Ok(n.saturating_sub(1))
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportError> {
        Ok(self.dev.read_timeout(buf, timeout_ms)?)
    }

    fn get_feature_report(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(self.dev.get_feature_report(buf)?)
    }

    fn send_feature_report(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        Ok(self.dev.send_feature_report(buf)?)
    }
}
