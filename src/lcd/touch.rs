//! Nexus touch strip.
//!
//! Reports arrive on a secondary HID interface. Byte 5 is 1 on a press and
//! bytes 6..8 carry the horizontal position, little endian.

use byteorder::{ByteOrder, LittleEndian};

use crate::drivers::InputEvent;

pub const TOUCH_REPORT_LEN: usize = 64;

pub fn parse(report: &[u8]) -> Option<InputEvent> {
    if report.len() < 8 || report[5] != 1 {
        return None;
    }
    Some(InputEvent::Touch {
        x: LittleEndian::read_u16(&report[6..8]),
    })
}

/// Index of the button under `x` when `buttons` equal slots share `width`.
pub fn button_at(x: u16, width: u32, buttons: usize) -> Option<usize> {
    if buttons == 0 || width == 0 || u32::from(x) >= width {
        return None;
    }
    Some((u32::from(x) as usize * buttons) / width as usize)
}
