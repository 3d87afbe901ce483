//! Pre-allocated LED frame.
//!
//! The byte buffer is sized once at attach from the descriptor's zones and
//! reused for every frame. An offset table maps `(channel, led, component)`
//! onto the device's byte order.

use crate::descriptor::{DeviceDescriptor, LedLayout};
use crate::rgb::color::Rgb;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    first: usize,
    len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedFrame {
    layout: LedLayout,
    spans: Vec<Span>,
    total: usize,
    bytes: Vec<u8>,
}

impl LedFrame {
    pub fn new(descriptor: &DeviceDescriptor) -> Self {
        let counts: Vec<u16> = descriptor.zones.iter().map(|z| z.leds).collect();
        Self::with_layout(descriptor.led_layout, &counts)
    }

    pub fn with_layout(layout: LedLayout, counts: &[u16]) -> Self {
        let mut first = 0;
        let spans = counts
            .iter()
            .map(|&n| {
                let span = Span {
                    first,
                    len: usize::from(n),
                };
                first += span.len;
                span
            })
            .collect();
        Self {
            layout,
            spans,
            total: first,
            bytes: vec![0; first * 3],
        }
    }

    pub fn channels(&self) -> usize {
        self.spans.len()
    }

    pub fn total_leds(&self) -> usize {
        self.total
    }

    pub fn channel_len(&self, channel: usize) -> usize {
        self.spans.get(channel).map_or(0, |s| s.len)
    }

    /// Byte offset of `component` (0 = R, 1 = G, 2 = B) of one LED.
    pub fn offset(&self, channel: usize, led: usize, component: usize) -> Option<usize> {
        let span = self.spans.get(channel)?;
        if led >= span.len || component > 2 {
            return None;
        }
        let index = span.first + led;
        Some(match self.layout {
            LedLayout::Interleaved => index * 3 + component,
            LedLayout::Planar => component * self.total + index,
        })
    }

    pub fn set(&mut self, channel: usize, led: usize, color: Rgb) {
        for (component, value) in [color.r, color.g, color.b].into_iter().enumerate() {
            if let Some(at) = self.offset(channel, led, component) {
                self.bytes[at] = value;
            }
        }
    }

    pub fn get(&self, channel: usize, led: usize) -> Option<Rgb> {
        let c = |component| self.offset(channel, led, component).map(|at| self.bytes[at]);
        Some(Rgb::new(c(0)?, c(1)?, c(2)?))
    }

    pub fn fill(&mut self, channel: usize, color: Rgb) {
        for led in 0..self.channel_len(channel) {
            self.set(channel, led, color);
        }
    }

    /// Interleaved `R G B` bytes of one channel, whatever the device layout.
    pub fn channel_rgb(&self, channel: usize) -> Vec<u8> {
        (0..self.channel_len(channel))
            .filter_map(|led| self.get(channel, led))
            .flat_map(|c| [c.r, c.g, c.b])
            .collect()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copies a raw frame from an external writer. Short input leaves the
    /// tail untouched, long input is truncated.
    pub fn copy_from(&mut self, raw: &[u8]) {
        let n = raw.len().min(self.bytes.len());
        self.bytes[..n].copy_from_slice(&raw[..n]);
    }

    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    pub fn is_blank(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    /// Splits the buffer into `[opcode, register, payload..]` packets of at
    /// most `chunk` payload bytes. The register starts at 0 and increments
    /// per chunk so the device reassembles the string in order.
    pub fn packets(&self, opcode: u8, chunk: usize) -> Vec<Vec<u8>> {
        self.bytes
            .chunks(chunk.max(1))
            .enumerate()
            .map(|(register, payload)| {
                let mut packet = Vec::with_capacity(payload.len() + 2);
                packet.push(opcode);
                packet.push(register as u8);
                packet.extend_from_slice(payload);
                packet
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor;
    use pretty_assertions::assert_eq;

    #[test]
    fn planar_headset_indicator_sits_at_1_4_7() {
        let mut frame = LedFrame::new(&descriptor::headset(0x0a42, "H", true));
        frame.fill(1, Rgb::new(0xaa, 0xbb, 0xcc));
        let b = frame.as_bytes();
        assert_eq!(b.len(), 9);
        assert_eq!([b[1], b[4], b[7]], [0xaa, 0xbb, 0xcc]);
        assert_eq!(frame.channel_rgb(1), vec![0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn interleaved_offsets_follow_zone_order() {
        let mut frame = LedFrame::with_layout(LedLayout::Interleaved, &[2, 3]);
        frame.set(1, 0, Rgb::new(1, 2, 3));
        assert_eq!(frame.offset(1, 0, 0), Some(6));
        assert_eq!(&frame.as_bytes()[6..9], &[1, 2, 3]);
        assert_eq!(frame.offset(1, 3, 0), None);
        assert_eq!(frame.offset(2, 0, 0), None);
    }

    #[test]
    fn packets_carry_an_incrementing_register() {
        let mut frame = LedFrame::new(&descriptor::platinum(0x0c18, "P"));
        frame.fill(0, Rgb::RED);
        let packets = frame.packets(0x62, 60);
        assert_eq!(packets.len(), 2);
        assert_eq!(&packets[0][..2], &[0x62, 0]);
        assert_eq!(packets[0].len(), 62);
        assert_eq!(&packets[1][..2], &[0x62, 1]);
        assert_eq!(packets[1].len(), 2 + 12);
        let joined: Vec<u8> = packets.iter().flat_map(|p| p[2..].to_vec()).collect();
        assert_eq!(joined, frame.as_bytes());
    }

    #[test]
    fn clear_and_external_copy() {
        let mut frame = LedFrame::with_layout(LedLayout::Interleaved, &[2]);
        frame.copy_from(&[9; 10]);
        assert_eq!(frame.as_bytes(), &[9; 6]);
        frame.clear();
        assert!(frame.is_blank());
    }
}
