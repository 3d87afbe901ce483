//! Exclusive, ordered byte channel to one physical device.
//!
//! Every public call takes the device lock for the full request/response
//! exchange, so concurrent workers of one device never interleave frames.
//! The transport does not retry; callers own the retry policy.

pub mod bulk;
pub mod device_io;
#[cfg(test)]
pub mod mock;
pub mod smbus;

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::Mutex;

pub use bulk::UsbBulkEndpoint;
pub use device_io::{DeviceIo, HidIo};
pub use smbus::{LinuxSmBus, SmBusBus, SmBusTransport};

use crate::error::TransportError;

/// Default bulk/HID request timeout in milliseconds.
pub const READ_TIMEOUT: i32 = 1000;

/// Stale-input drain budget in milliseconds, for the whole drain.
pub const DRAIN_TIMEOUT: i32 = 5;

/// Upper bound on input reports taken off the wire by one request.
pub const MAX_STRAY_REPORTS: usize = 32;

/// Answer to [`Transport::request`] and the input reports read around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub response: Result<Vec<u8>, TransportError>,
    /// Reports that were not the answer, in arrival order.
    pub unsolicited: Vec<Vec<u8>>,
}

/// Frame geometry of one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Frames shorter than this are zero padded. 0 disables padding.
    pub write_size: usize,
    /// Exact length of an `exchange` response.
    pub read_size: usize,
    pub timeout_ms: i32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            write_size: 64,
            read_size: 64,
            timeout_ms: READ_TIMEOUT,
        }
    }
}

/// Cloneable handle shared by all workers of one device.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Mutex<Option<Box<dyn DeviceIo>>>>,
    cfg: TransportConfig,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").field("cfg", &self.cfg).finish()
    }
}

impl Transport {
    pub fn new(io: Box<dyn DeviceIo>, cfg: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(io))),
            cfg,
        }
    }

    pub fn config(&self) -> TransportConfig {
        self.cfg
    }

    async fn with_io<F, R>(&self, f: F) -> Result<R, TransportError>
    where
        F: FnOnce(&mut dyn DeviceIo, &TransportConfig) -> Result<R, TransportError>
            + Send
            + 'static,
        R: Send + 'static,
    {
        let inner = self.inner.clone();
        let cfg = self.cfg;
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.blocking_lock();
            let io = guard.as_mut().ok_or(TransportError::ClosedHandle)?;
            f(io.as_mut(), &cfg)
        })
        .await
        .map_err(|e| TransportError::Pipe(e.to_string()))?
    }

    /// Writes one complete protocol frame.
    pub async fn write(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.with_io(move |io, cfg| write_frame(io, cfg, &frame))
            .await
    }

    /// Writes several frames inside one critical section.
    pub async fn write_all(&self, frames: Vec<Vec<u8>>) -> Result<(), TransportError> {
        self.with_io(move |io, cfg| {
            frames
                .iter()
                .try_for_each(|frame| write_frame(io, cfg, frame))
        })
        .await
    }

    /// Bulk-style request: drain, write `[cmd, payload..]`, read one response.
    pub async fn exchange(&self, cmd: u8, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut frame = Vec::with_capacity(self.cfg.write_size.max(payload.len() + 1));
        frame.push(cmd);
        frame.extend_from_slice(payload);
        self.with_io(move |io, cfg| exchange_frame(io, cfg, &frame))
            .await
    }

    /// Request for devices that also push input reports: nothing read off the
    /// wire is dropped. The first report accepted by `is_response` is the
    /// answer, every other one is handed back in [`Reply::unsolicited`].
    pub async fn request<F>(&self, cmd: u8, payload: &[u8], is_response: F) -> Result<Reply, TransportError>
    where
        F: Fn(&[u8]) -> bool + Send + 'static,
    {
        let mut frame = Vec::with_capacity(self.cfg.write_size.max(payload.len() + 1));
        frame.push(cmd);
        frame.extend_from_slice(payload);
        self.with_io(move |io, cfg| request_frame(io, cfg, &frame, &is_response))
            .await
    }

    /// Telemetry variant of [`Transport::exchange`]: failures are logged and a
    /// zero-filled response is returned so one bad read never stops a poller.
    pub async fn exchange_or_zero(&self, cmd: u8, payload: &[u8]) -> Vec<u8> {
        match self.exchange(cmd, payload).await {
            Ok(buf) => buf,
            Err(TransportError::ClosedHandle) => vec![0u8; self.cfg.read_size],
            Err(e) => {
                warn!("exchange {cmd:#04x} failed: {e}");
                vec![0u8; self.cfg.read_size]
            }
        }
    }

    /// Reads one input report without writing first.
    pub async fn read(&self, len: usize, timeout_ms: i32) -> Result<Vec<u8>, TransportError> {
        self.with_io(move |io, _| {
            let mut buf = vec![0u8; len];
            let n = io.read(&mut buf, timeout_ms)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
    }

    pub async fn feature_report_get(&self, id: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        self.with_io(move |io, _| {
            let mut buf = vec![0u8; len.max(1)];
            buf[0] = id;
            let n = io.get_feature_report(&mut buf)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
    }

    pub async fn feature_report_set(&self, id: u8, data: &[u8]) -> Result<(), TransportError> {
        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.push(id);
        buf.extend_from_slice(data);
        self.with_io(move |io, _| io.send_feature_report(&buf)).await
    }

    /// Releases the handle. Safe to call more than once and from racing workers.
    pub async fn close(&self) {
        if let Some(mut io) = self.inner.lock().await.take() {
            io.close();
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

fn padded<'a>(frame: &'a [u8], cfg: &TransportConfig, scratch: &'a mut Vec<u8>) -> &'a [u8] {
    if frame.len() >= cfg.write_size {
        return frame;
    }
    scratch.clear();
    scratch.extend_from_slice(frame);
    scratch.resize(cfg.write_size, 0);
    scratch
}

fn write_frame(io: &mut dyn DeviceIo, cfg: &TransportConfig, frame: &[u8]) -> Result<(), TransportError> {
    let mut scratch = Vec::new();
    let out = padded(frame, cfg, &mut scratch);
    let n = io.write(out)?;
    if n < out.len() {
        return Err(TransportError::Pipe(format!(
            "partial write: {n} of {} bytes",
            out.len()
        )));
    }
    Ok(())
}

/// Remaining part of `deadline` as a read timeout, `None` once it passed.
fn remaining_ms(deadline: Instant) -> Option<i32> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return None;
    }
    Some(i32::try_from(left.as_millis()).unwrap_or(i32::MAX).max(1))
}

/// Takes pending input off the wire. Bounded by [`DRAIN_TIMEOUT`] and
/// [`MAX_STRAY_REPORTS`] so a device that never goes quiet cannot hold the
/// lock.
fn drain(io: &mut dyn DeviceIo, cfg: &TransportConfig) -> Result<Vec<Vec<u8>>, TransportError> {
    let deadline = Instant::now() + Duration::from_millis(DRAIN_TIMEOUT as u64);
    let mut buf = vec![0u8; cfg.read_size.max(1)];
    let mut stale = Vec::new();
    while stale.len() < MAX_STRAY_REPORTS {
        let Some(timeout) = remaining_ms(deadline) else {
            break;
        };
        let n = io.read(&mut buf, timeout)?;
        if n == 0 {
            break;
        }
        stale.push(buf[..n].to_vec());
    }
    if stale.len() == MAX_STRAY_REPORTS {
        debug!("drain stopped after {MAX_STRAY_REPORTS} reports");
    }
    Ok(stale)
}

fn exchange_frame(
    io: &mut dyn DeviceIo,
    cfg: &TransportConfig,
    frame: &[u8],
) -> Result<Vec<u8>, TransportError> {
    drain(io, cfg)?;
    write_frame(io, cfg, frame)?;

    let mut buf = vec![0u8; cfg.read_size];
    let n = io.read(&mut buf, cfg.timeout_ms)?;
    full_response(buf, n, cfg)
}

fn full_response(buf: Vec<u8>, n: usize, cfg: &TransportConfig) -> Result<Vec<u8>, TransportError> {
    match n {
        0 => Err(TransportError::Timeout),
        n if n < cfg.read_size => Err(TransportError::ShortRead {
            expected: cfg.read_size,
            got: n,
        }),
        _ => Ok(buf),
    }
}

fn request_frame(
    io: &mut dyn DeviceIo,
    cfg: &TransportConfig,
    frame: &[u8],
    is_response: &dyn Fn(&[u8]) -> bool,
) -> Result<Reply, TransportError> {
    let mut unsolicited = drain(io, cfg)?;
    if let Err(e) = write_frame(io, cfg, frame) {
        return Ok(Reply {
            response: Err(e),
            unsolicited,
        });
    }

    let deadline = Instant::now() + Duration::from_millis(cfg.timeout_ms.max(0) as u64);
    let mut buf = vec![0u8; cfg.read_size.max(1)];
    let response = loop {
        let Some(timeout) = remaining_ms(deadline) else {
            break Err(TransportError::Timeout);
        };
        if unsolicited.len() >= 2 * MAX_STRAY_REPORTS {
            break Err(TransportError::Timeout);
        }
        match io.read(&mut buf, timeout) {
            Ok(0) => break Err(TransportError::Timeout),
            Ok(n) if is_response(&buf[..n]) => break full_response(buf.clone(), n, cfg),
            Ok(n) => unsolicited.push(buf[..n].to_vec()),
            Err(e) => break Err(e),
        }
    };
    Ok(Reply {
        response,
        unsolicited,
    })
}
