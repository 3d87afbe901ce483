//! In-memory [`DeviceIo`] that records every wire operation.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use super::device_io::DeviceIo;
use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireOp {
    Write(Vec<u8>),
    Feature(Vec<u8>),
    Close,
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Default)]
struct Shared {
    ops: Vec<WireOp>,
    pending: VecDeque<Vec<u8>>,
}

/// Cloneable view on the recorded wire traffic.
#[derive(Clone, Default)]
pub struct Wire(Arc<Mutex<Shared>>);

impl Wire {
    pub fn ops(&self) -> Vec<WireOp> {
        self.0.lock().unwrap().ops.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                WireOp::Write(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    pub fn features(&self) -> Vec<Vec<u8>> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                WireOp::Feature(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().ops.clear();
    }

    /// Queues an unsolicited input report.
    pub fn push_input(&self, report: Vec<u8>) {
        self.0.lock().unwrap().pending.push_back(report);
    }
}

pub struct RecordingIo {
    wire: Wire,
    responder: Option<Responder>,
}

impl RecordingIo {
    pub fn new() -> Self {
        Self {
            wire: Wire::default(),
            responder: None,
        }
    }

    /// Every write is answered by `f(frame)`; an empty answer means silence.
    pub fn respond_with<F>(mut self, f: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        self.responder = Some(Box::new(f));
        self
    }

    pub fn push_stale(&self, report: Vec<u8>) {
        self.wire.push_input(report);
    }

    pub fn wire(&self) -> Wire {
        self.wire.clone()
    }
}

impl DeviceIo for RecordingIo {
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let answer = self.responder.as_mut().map(|f| f(buf));
        let mut shared = self.wire.0.lock().unwrap();
        shared.ops.push(WireOp::Write(buf.to_vec()));
        if let Some(answer) = answer.filter(|a| !a.is_empty()) {
            shared.pending.push_back(answer);
        }
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8], _timeout_ms: i32) -> Result<usize, TransportError> {
        let Some(report) = self.wire.0.lock().unwrap().pending.pop_front() else {
            return Ok(0);
        };
        let n = report.len().min(buf.len());
        buf[..n].copy_from_slice(&report[..n]);
        Ok(n)
    }

    fn get_feature_report(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(buf.len())
    }

    fn send_feature_report(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.wire
            .0
            .lock()
            .unwrap()
            .ops
            .push(WireOp::Feature(buf.to_vec()));
        Ok(())
    }

    fn close(&mut self) {
        self.wire.0.lock().unwrap().ops.push(WireOp::Close);
    }
}

/// One recorded SMBus transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    WriteByte { addr: u8, reg: u8, value: u8 },
    WriteBlock { addr: u8, reg: u8, data: Vec<u8> },
}

#[derive(Default)]
struct BusShared {
    ops: Vec<BusOp>,
    bytes: std::collections::HashMap<(u8, u8), u8>,
    words: std::collections::HashMap<(u8, u8), u16>,
}

/// Cloneable view on a [`RecordingBus`].
#[derive(Clone, Default)]
pub struct Bus(Arc<Mutex<BusShared>>);

impl Bus {
    pub fn ops(&self) -> Vec<BusOp> {
        self.0.lock().unwrap().ops.clone()
    }

    pub fn blocks(&self) -> Vec<(u8, u8, Vec<u8>)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                BusOp::WriteBlock { addr, reg, data } => Some((addr, reg, data)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().ops.clear();
    }

    /// Makes `addr` answer byte reads of `reg` with `value`.
    pub fn set_byte(&self, addr: u8, reg: u8, value: u8) {
        self.0.lock().unwrap().bytes.insert((addr, reg), value);
    }

    pub fn set_word(&self, addr: u8, reg: u8, value: u16) {
        self.0.lock().unwrap().words.insert((addr, reg), value);
    }

    /// Places `text` at consecutive registers starting at `first`.
    pub fn set_string(&self, addr: u8, first: u8, text: &str) {
        for (i, b) in text.bytes().enumerate() {
            self.set_byte(addr, first + i as u8, b);
        }
    }
}

/// In-memory [`SmBusBus`](super::SmBusBus). Unknown addresses answer `NotFound`.
#[derive(Default)]
pub struct RecordingBus {
    bus: Bus,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    fn known(&self, addr: u8) -> bool {
        let shared = self.bus.0.lock().unwrap();
        shared.bytes.keys().any(|(a, _)| *a == addr) || shared.words.keys().any(|(a, _)| *a == addr)
    }
}

impl super::SmBusBus for RecordingBus {
    fn read_byte(&mut self, addr: u8, reg: u8) -> Result<u8, TransportError> {
        if !self.known(addr) {
            return Err(TransportError::NotFound);
        }
        Ok(*self.bus.0.lock().unwrap().bytes.get(&(addr, reg)).unwrap_or(&0))
    }

    fn read_word(&mut self, addr: u8, reg: u8) -> Result<u16, TransportError> {
        if !self.known(addr) {
            return Err(TransportError::NotFound);
        }
        Ok(*self.bus.0.lock().unwrap().words.get(&(addr, reg)).unwrap_or(&0))
    }

    fn write_byte(&mut self, addr: u8, reg: u8, value: u8) -> Result<(), TransportError> {
        self.bus
            .0
            .lock()
            .unwrap()
            .ops
            .push(BusOp::WriteByte { addr, reg, value });
        Ok(())
    }

    fn write_block(&mut self, addr: u8, reg: u8, data: &[u8]) -> Result<(), TransportError> {
        self.bus.0.lock().unwrap().ops.push(BusOp::WriteBlock {
            addr,
            reg,
            data: data.to_vec(),
        });
        Ok(())
    }
}
