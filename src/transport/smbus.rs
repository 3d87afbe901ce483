//! SMBus access for RGB DIMMs.
//!
//! Only the four transactions the memory drivers need are exposed. The Linux
//! backend opens `/dev/i2c-N` through `i2cdev`, one handle per slave address.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;
use tokio::sync::Mutex;

use crate::error::TransportError;

/// Minimal SMBus capability.
pub trait SmBusBus: Send + 'static {
    fn read_byte(&mut self, addr: u8, reg: u8) -> Result<u8, TransportError>;
    fn read_word(&mut self, addr: u8, reg: u8) -> Result<u16, TransportError>;
    fn write_byte(&mut self, addr: u8, reg: u8, value: u8) -> Result<(), TransportError>;
    fn write_block(&mut self, addr: u8, reg: u8, data: &[u8]) -> Result<(), TransportError>;
}

/// Largest I2C block transfer the kernel accepts.
pub const I2C_BLOCK_MAX: usize = 32;

/// `/dev/i2c-N` adapter.
pub struct LinuxSmBus {
    path: PathBuf,
    slaves: BTreeMap<u8, LinuxI2CDevice>,
}

impl LinuxSmBus {
    /// Opens `/dev/<name>` (for example `i2c-0`). Slave handles are opened on
    /// first use.
    pub fn open(name: &str) -> Result<Self, TransportError> {
        let path = PathBuf::from(format!("/dev/{name}"));
        std::fs::metadata(&path)?;
        Ok(Self {
            path,
            slaves: BTreeMap::new(),
        })
    }

    fn slave(&mut self, addr: u8) -> Result<&mut LinuxI2CDevice, TransportError> {
        if !self.slaves.contains_key(&addr) {
            let dev = LinuxI2CDevice::new(&self.path, u16::from(addr))?;
            self.slaves.insert(addr, dev);
        }
        self.slaves
            .get_mut(&addr)
            .ok_or_else(|| TransportError::Pipe(format!("smbus slave {addr:#04x} unavailable")))
    }
}

impl SmBusBus for LinuxSmBus {
    fn read_byte(&mut self, addr: u8, reg: u8) -> Result<u8, TransportError> {
        Ok(self.slave(addr)?.smbus_read_byte_data(reg)?)
    }

    fn read_word(&mut self, addr: u8, reg: u8) -> Result<u16, TransportError> {
        Ok(self.slave(addr)?.smbus_read_word_data(reg)?)
    }

    fn write_byte(&mut self, addr: u8, reg: u8, value: u8) -> Result<(), TransportError> {
        Ok(self.slave(addr)?.smbus_write_byte_data(reg, value)?)
    }

    fn write_block(&mut self, addr: u8, reg: u8, data: &[u8]) -> Result<(), TransportError> {
        check_block(data)?;
        Ok(self.slave(addr)?.smbus_write_i2c_block_data(reg, data)?)
    }
}

fn check_block(data: &[u8]) -> Result<(), TransportError> {
    if data.len() > I2C_BLOCK_MAX {
        return Err(TransportError::Pipe(format!(
            "smbus block of {} bytes exceeds {I2C_BLOCK_MAX}",
            data.len()
        )));
    }
    Ok(())
}

/// Serialized, closable access to one SMBus adapter.
#[derive(Clone)]
pub struct SmBusTransport {
    inner: Arc<Mutex<Option<Box<dyn SmBusBus>>>>,
}

impl SmBusTransport {
    pub fn new(bus: Box<dyn SmBusBus>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(bus))),
        }
    }

    /// Runs `f` with exclusive access to the bus.
    pub async fn with_bus<F, R>(&self, f: F) -> Result<R, TransportError>
    where
        F: FnOnce(&mut dyn SmBusBus) -> Result<R, TransportError> + Send + 'static,
        R: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.blocking_lock();
            let bus = guard.as_mut().ok_or(TransportError::ClosedHandle)?;
            f(bus.as_mut())
        })
        .await
        .map_err(|e| TransportError::Pipe(e.to_string()))?
    }

    pub async fn close(&self) {
        self.inner.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn oversized_blocks_never_reach_the_bus() {
        assert!(check_block(&[0u8; I2C_BLOCK_MAX]).is_ok());
        assert!(matches!(
            check_block(&[0u8; I2C_BLOCK_MAX + 1]),
            Err(TransportError::Pipe(_))
        ));
    }

    #[test]
    fn missing_adapter_fails_to_open() {
        let err = LinuxSmBus::open("i2c-does-not-exist").err();
        assert_eq!(err, Some(TransportError::NotFound));
    }
}
