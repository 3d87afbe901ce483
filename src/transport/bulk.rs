//! USB bulk endpoint pair for devices that do not speak HID on their
//! control interface (Hydro coolers).
//!
//! `nusb` transfers are futures; the transport already runs on a blocking
//! thread, so each transfer is driven with the runtime handle and bounded by
//! `tokio::time::timeout`. Dropping a timed-out transfer cancels it.

use std::time::Duration;

use log::debug;
use nusb::transfer::{ControlOut, ControlType, Recipient, RequestBuffer, TransferError};

use super::device_io::DeviceIo;
use crate::error::TransportError;

impl From<TransferError> for TransportError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Cancelled => TransportError::Timeout,
            TransferError::Disconnected => TransportError::NotFound,
            other => TransportError::Pipe(other.to_string()),
        }
    }
}

/// Claimed interface with one bulk OUT and one bulk IN endpoint.
pub struct UsbBulkEndpoint {
    interface: nusb::Interface,
    ep_out: u8,
    ep_in: u8,
    runtime: tokio::runtime::Handle,
}

impl UsbBulkEndpoint {
    /// Opens the first device matching `vid:pid` and claims `interface`.
    pub fn open(
        vid: u16,
        pid: u16,
        serial: Option<&str>,
        interface: u8,
        ep_out: u8,
        ep_in: u8,
    ) -> Result<Self, TransportError> {
        let info = nusb::list_devices()?
            .find(|d| {
                d.vendor_id() == vid
                    && d.product_id() == pid
                    && serial.is_none_or(|s| d.serial_number() == Some(s))
            })
            .ok_or(TransportError::NotFound)?;

        let device = info.open()?;
        let interface = device.claim_interface(interface)?;
        debug!("claimed bulk interface on {vid:04x}:{pid:04x}");

        Ok(Self {
            interface,
            ep_out,
            ep_in,
            runtime: tokio::runtime::Handle::current(),
        })
    }

    /// Vendor control request on the default pipe.
    pub fn control_vendor(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let fut = self.interface.control_out(ControlOut {
            control_type: ControlType::Vendor,
            recipient: Recipient::Device,
            request,
            value,
            index,
            data,
        });
        let completion = self
            .runtime
            .block_on(async { tokio::time::timeout(Duration::from_millis(1000), fut).await })
            .map_err(|_| TransportError::Timeout)?;
        completion.status?;
        Ok(())
    }

    fn read_with_timeout(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportError> {
        let fut = self
            .interface
            .bulk_in(self.ep_in, RequestBuffer::new(buf.len()));
        let timeout = Duration::from_millis(timeout_ms.max(1) as u64);
        match self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, fut).await })
        {
            Ok(completion) => {
                completion.status?;
                let n = completion.data.len().min(buf.len());
                buf[..n].copy_from_slice(&completion.data[..n]);
                Ok(n)
            }
            Err(_) => Ok(0),
        }
    }
}

impl DeviceIo for UsbBulkEndpoint {
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let fut = self.interface.bulk_out(self.ep_out, buf.to_vec());
        let completion = self
            .runtime
            .block_on(async { tokio::time::timeout(Duration::from_millis(1000), fut).await })
            .map_err(|_| TransportError::Timeout)?;
        completion.status?;
        Ok(completion.data.actual_length())
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportError> {
        self.read_with_timeout(buf, timeout_ms)
    }
}
