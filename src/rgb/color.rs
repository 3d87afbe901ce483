//! Colour primitives shared by the RGB and LCD engines.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const RED: Rgb = Rgb::new(255, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rrggbb` or `rrggbb`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 {
            return None;
        }
        let c = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self::new(c(0)?, c(2)?, c(4)?))
    }

    /// Applies the brightness slider (0..=100).
    ///
    /// Each component becomes `round(c * b / 100)`; exact halves round down.
    pub fn scaled(self, brightness: u8) -> Self {
        let b = u32::from(brightness.min(100));
        let s = |c: u8| ((u32::from(c) * b + 49) / 100) as u8;
        Self::new(s(self.r), s(self.g), s(self.b))
    }

    /// Multiplies by a factor in 0..=1.
    pub fn dimmed(self, factor: f32) -> Self {
        let f = factor.clamp(0.0, 1.0);
        let s = |c: u8| (f32::from(c) * f).round() as u8;
        Self::new(s(self.r), s(self.g), s(self.b))
    }

    pub fn lerp(self, other: Rgb, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let l = |a: u8, b: u8| (f32::from(a) + (f32::from(b) - f32::from(a)) * t).round() as u8;
        Self::new(l(self.r, other.r), l(self.g, other.g), l(self.b, other.b))
    }

    /// HSV to RGB, `h` in degrees, `s` and `v` in 0..=1.
    pub fn from_hsv(h: f32, s: f32, v: f32) -> Self {
        let h = h.rem_euclid(360.0);
        let c = v * s;
        let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
        let m = v - c;
        let (r, g, b) = match h as u32 {
            0..60 => (c, x, 0.0),
            60..120 => (x, c, 0.0),
            120..180 => (0.0, c, x),
            180..240 => (0.0, x, c),
            240..300 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        let q = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Self::new(q(r), q(g), q(b))
    }
}

/// Samples a keyframe palette at `position` (0..=1).
pub fn sample_palette(palette: &[(f32, Rgb)], position: f32) -> Rgb {
    let position = position.clamp(0.0, 1.0);
    let Some(first) = palette.first() else {
        return Rgb::BLACK;
    };
    if position <= first.0 {
        return first.1;
    }
    for pair in palette.windows(2) {
        let (p0, c0) = pair[0];
        let (p1, c1) = pair[1];
        if position <= p1 {
            let span = p1 - p0;
            if span <= f32::EPSILON {
                return c1;
            }
            return c0.lerp(c1, (position - p0) / span);
        }
    }
    palette.last().map(|p| p.1).unwrap_or(Rgb::BLACK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn half_brightness_of_full_red_is_127() {
        assert_eq!(Rgb::RED.scaled(50), Rgb::new(127, 0, 0));
    }

    #[test]
    fn brightness_bounds() {
        let c = Rgb::new(10, 200, 255);
        assert_eq!(c.scaled(100), c);
        assert_eq!(c.scaled(0), Rgb::BLACK);
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(Rgb::from_hex("#FF8000"), Some(Rgb::new(255, 128, 0)));
        assert_eq!(Rgb::from_hex("00ff00"), Some(Rgb::new(0, 255, 0)));
        assert_eq!(Rgb::from_hex("#12"), None);
    }

    #[test]
    fn hsv_primaries() {
        assert_eq!(Rgb::from_hsv(0.0, 1.0, 1.0), Rgb::new(255, 0, 0));
        assert_eq!(Rgb::from_hsv(120.0, 1.0, 1.0), Rgb::new(0, 255, 0));
        assert_eq!(Rgb::from_hsv(240.0, 1.0, 1.0), Rgb::new(0, 0, 255));
        assert_eq!(Rgb::from_hsv(360.0, 1.0, 1.0), Rgb::new(255, 0, 0));
    }

    #[test]
    fn palette_endpoints_and_midpoint() {
        let p = [(0.0, Rgb::new(0, 0, 0)), (1.0, Rgb::new(200, 100, 0))];
        assert_eq!(sample_palette(&p, -1.0), Rgb::new(0, 0, 0));
        assert_eq!(sample_palette(&p, 0.5), Rgb::new(100, 50, 0));
        assert_eq!(sample_palette(&p, 2.0), Rgb::new(200, 100, 0));
    }

    proptest! {
        #[test]
        fn scaled_matches_rounding_rule(c in 0u8..=255, b in 0u8..=100) {
            let got = Rgb::new(c, c, c).scaled(b).r as f64;
            let exact = c as f64 * b as f64 / 100.0;
            let diff = exact - got;
            // round-half-down: result is within half a step, never above on ties
            prop_assert!(diff.abs() <= 0.5 + 1e-9);
            prop_assert!((diff + 0.5).abs() > 1e-9);
        }
    }
}
