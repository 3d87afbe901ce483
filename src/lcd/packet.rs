//! Chunked LCD streaming packets.
//!
//! Each packet is `[0x02, 0x05, nexus?0x40:0x00, last?1:0, index, 0,
//! LE16(len)]` followed by up to `buffer - header` payload bytes. The panel
//! only commits an image once it sees the terminator on the final chunk.

use byteorder::{ByteOrder, LittleEndian};

use crate::descriptor::LcdGeometry;
use crate::error::DeviceError;

/// The chunk index is a single byte.
pub const MAX_CHUNKS: usize = 256;

const REPORT: u8 = 0x02;
const COMMAND: u8 = 0x05;
const NEXUS_FLAG: u8 = 0x40;

pub fn header(geometry: &LcdGeometry, index: u8, last: bool, len: usize) -> Vec<u8> {
    let mut h = vec![0u8; geometry.header.max(8)];
    h[0] = REPORT;
    h[1] = COMMAND;
    h[2] = if geometry.nexus { NEXUS_FLAG } else { 0 };
    h[3] = u8::from(last);
    h[4] = index;
    LittleEndian::write_u16(&mut h[6..8], len as u16);
    h
}

/// Splits an encoded image into transport-ready packets.
///
/// An empty image still yields one terminator packet. Images needing more
/// than [`MAX_CHUNKS`] packets are refused.
pub fn packets(geometry: &LcdGeometry, image: &[u8]) -> Result<Vec<Vec<u8>>, DeviceError> {
    let payload = geometry.chunk_payload().max(1);
    let count = image.len().div_ceil(payload).max(1);
    if count > MAX_CHUNKS {
        return Err(DeviceError::Render(format!(
            "LCD image of {} bytes needs {count} chunks, at most {MAX_CHUNKS} fit",
            image.len()
        )));
    }
    Ok((0..count)
        .map(|i| {
            let chunk = image.get(i * payload..((i + 1) * payload).min(image.len())).unwrap_or(&[]);
            let mut packet = header(geometry, i as u8, i + 1 == count, chunk.len());
            packet.extend_from_slice(chunk);
            packet
        })
        .collect())
}
