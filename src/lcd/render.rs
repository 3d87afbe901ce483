//! LCD frame rendering.
//!
//! Frames are drawn into an RGB buffer of the panel's size, then JPEG
//! encoded. The panel applies rotation itself, so nothing is rotated here.

use std::f32::consts::{FRAC_PI_2, TAU};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use image::codecs::gif::GifDecoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, ColorType, DynamicImage, Rgb as Pixel, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use log::{info, warn};
use rusttype::{Font, Scale};

use crate::descriptor::LcdGeometry;
use crate::error::{DeviceError, DeviceResult};
use crate::profile::{ArcProfile, DoubleArcProfile, Gauge};
use crate::rgb::color::Rgb;

const JPEG_QUALITY: u8 = 90;
/// Single-frame and zero-delay GIF frames are shown at least this long.
pub const MIN_FRAME_DELAY: Duration = Duration::from_millis(100);

const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/linkhubd/fonts/font.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans-Bold.ttf",
];

fn pixel(c: Rgb) -> Pixel<u8> {
    Pixel([c.r, c.g, c.b])
}

fn load_font(preferred: Option<&Path>) -> Option<Font<'static>> {
    let candidates = preferred
        .into_iter()
        .map(Path::to_path_buf)
        .chain(FONT_CANDIDATES.iter().map(|p| Path::new(p).to_path_buf()));
    for path in candidates {
        if let Ok(data) = std::fs::read(&path)
            && let Some(font) = Font::try_from_vec(data)
        {
            info!("LCD font {}", path.display());
            return Some(font);
        }
    }
    warn!("no usable TrueType font, LCD text is disabled");
    None
}

/// Sweep angle of a gauge in radians: `2π · clamp01((v - min) / (max - min))`.
pub fn sweep(gauge: &Gauge, value: f32) -> f32 {
    TAU * gauge.normalized(value)
}

/// One line of text, centred horizontally at a vertical position given as a
/// fraction of the panel height.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub size: f32,
    pub y: f32,
    pub color: Rgb,
}

impl TextLine {
    pub fn new(text: impl Into<String>, size: f32, y: f32) -> Self {
        Self {
            text: text.into(),
            size,
            y,
            color: Rgb::new(255, 255, 255),
        }
    }
}

pub struct Renderer {
    width: u32,
    height: u32,
    font: Option<Font<'static>>,
}

impl Renderer {
    pub fn new(geometry: &LcdGeometry, font_path: Option<&Path>) -> Self {
        Self {
            width: geometry.width,
            height: geometry.height,
            font: load_font(font_path),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn blank(&self) -> RgbImage {
        RgbImage::new(self.width, self.height)
    }

    /// Text template: background colour plus centred lines.
    pub fn text(&self, background: Rgb, lines: &[TextLine]) -> RgbImage {
        let mut img = RgbImage::from_pixel(self.width, self.height, pixel(background));
        self.draw_lines(&mut img, lines);
        img
    }

    pub fn arc(&self, profile: &ArcProfile, value: f32, label: &str) -> RgbImage {
        let mut img = RgbImage::from_pixel(self.width, self.height, pixel(profile.background));
        let outer = self.width.min(self.height) as f32 / 2.0 - 2.0;
        draw_arc(&mut img, outer, profile.thickness as f32, sweep(&profile.gauge, value), profile.gauge.color);
        self.draw_lines(
            &mut img,
            &[TextLine {
                color: profile.text,
                ..TextLine::new(label, self.scaled(0.2), 0.5)
            }],
        );
        img
    }

    pub fn double_arc(
        &self,
        profile: &DoubleArcProfile,
        inner: f32,
        outer: f32,
        labels: (&str, &str),
    ) -> RgbImage {
        let mut img = RgbImage::from_pixel(self.width, self.height, pixel(profile.background));
        let radius = self.width.min(self.height) as f32 / 2.0 - 2.0;
        let thickness = profile.thickness as f32;
        draw_arc(&mut img, radius, thickness, sweep(&profile.outer, outer), profile.outer.color);
        draw_arc(
            &mut img,
            radius - thickness - 6.0,
            thickness,
            sweep(&profile.inner, inner),
            profile.inner.color,
        );
        let lines = [
            TextLine {
                color: profile.text,
                ..TextLine::new(labels.0, self.scaled(0.14), 0.4)
            },
            TextLine {
                color: profile.text,
                ..TextLine::new(labels.1, self.scaled(0.14), 0.6)
            },
        ];
        self.draw_lines(&mut img, &lines);
        img
    }

    /// Font size as a fraction of the shorter panel side.
    pub fn scaled(&self, fraction: f32) -> f32 {
        self.width.min(self.height) as f32 * fraction
    }

    fn draw_lines(&self, img: &mut RgbImage, lines: &[TextLine]) {
        let Some(font) = &self.font else {
            return;
        };
        for line in lines {
            let scale = Scale::uniform(line.size);
            let (w, h) = text_size(scale, font, &line.text);
            let x = (self.width as i32 - w) / 2;
            let y = (self.height as f32 * line.y) as i32 - h / 2;
            draw_text_mut(img, pixel(line.color), x, y, scale, font, &line.text);
        }
    }

    /// Decodes a GIF into pre-encoded frames with their display time.
    pub fn load_animation(&self, path: &Path) -> DeviceResult<Vec<(Vec<u8>, Duration)>> {
        let render = |e: &dyn std::fmt::Display| DeviceError::Render(format!("{}: {e}", path.display()));
        let file = File::open(path).map_err(|e| render(&e))?;
        let decoder = GifDecoder::new(BufReader::new(file)).map_err(|e| render(&e))?;
        let frames = decoder
            .into_frames()
            .collect_frames()
            .map_err(|e| render(&e))?;
        if frames.is_empty() {
            return Err(render(&"no frames"));
        }
        frames
            .into_iter()
            .map(|frame| {
                let (num, den) = frame.delay().numer_denom_ms();
                let delay = Duration::from_millis(u64::from(num / den.max(1))).max(MIN_FRAME_DELAY);
                let img = DynamicImage::ImageRgba8(frame.into_buffer())
                    .resize_exact(self.width, self.height, FilterType::Triangle)
                    .to_rgb8();
                Ok((encode_jpeg(&img)?, delay))
            })
            .collect()
    }
}

/// Draws an arc that starts at 12 o'clock and runs clockwise by `sweep`.
fn draw_arc(img: &mut RgbImage, outer: f32, thickness: f32, sweep: f32, color: Rgb) {
    if sweep <= 0.0 || outer <= 0.0 {
        return;
    }
    let inner = (outer - thickness).max(0.0);
    let cx = img.width() as f32 / 2.0;
    let cy = img.height() as f32 / 2.0;
    let color = pixel(color);
    for (x, y, p) in img.enumerate_pixels_mut() {
        let dx = x as f32 + 0.5 - cx;
        let dy = y as f32 + 0.5 - cy;
        let dist = (dx * dx + dy * dy).sqrt();
        if dist < inner || dist > outer {
            continue;
        }
        // angle measured clockwise from straight up
        let angle = (dy.atan2(dx) + FRAC_PI_2).rem_euclid(TAU);
        if angle <= sweep {
            *p = color;
        }
    }
}

pub fn encode_jpeg(img: &RgbImage) -> DeviceResult<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode(img.as_raw(), img.width(), img.height(), ColorType::Rgb8)
        .map_err(|e| DeviceError::Render(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor;
    use crate::profile::SensorSource;
    use pretty_assertions::assert_eq;
    use std::f32::consts::PI;

    fn renderer() -> Renderer {
        Renderer {
            width: 100,
            height: 100,
            font: None,
        }
    }

    #[test]
    fn sweep_is_proportional_and_clamped() {
        let gauge = Gauge::new(SensorSource::Gpu, 30.0, 90.0, Rgb::RED);
        assert!((sweep(&gauge, 60.0) - PI).abs() < 1e-5);
        assert_eq!(sweep(&gauge, 10.0), 0.0);
        assert!((sweep(&gauge, 200.0) - TAU).abs() < 1e-5);
    }

    #[test]
    fn half_arc_covers_the_right_side_only() {
        let mut profile = ArcProfile::default();
        profile.gauge = Gauge::new(SensorSource::Gpu, 30.0, 90.0, Rgb::RED);
        profile.background = Rgb::BLACK;
        profile.thickness = 10;
        let img = renderer().arc(&profile, 60.0, "60");
        // right edge of the ring is inside the sweep, left edge is not
        assert_eq!(*img.get_pixel(95, 50), Pixel([255, 0, 0]));
        assert_eq!(*img.get_pixel(4, 50), Pixel([0, 0, 0]));
        assert_eq!(*img.get_pixel(50, 50), Pixel([0, 0, 0]));
    }

    #[test]
    fn jpeg_frames_split_into_terminated_chunks() {
        let g = descriptor::lcd_cover(0x0c39, "LCD").lcd.unwrap();
        let r = Renderer {
            width: g.width,
            height: g.height,
            font: None,
        };
        let mut profile = ArcProfile::default();
        profile.gauge = Gauge::new(SensorSource::Gpu, 30.0, 90.0, Rgb::RED);
        let jpeg = encode_jpeg(&r.arc(&profile, 60.0, "60 °C")).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
        let packets = crate::lcd::packet::packets(&g, &jpeg).unwrap();
        assert_eq!(packets.len(), jpeg.len().div_ceil(g.chunk_payload()));
        let (last, rest) = packets.split_last().unwrap();
        assert!(rest.iter().all(|p| p[3] == 0 && p.len() == g.buffer));
        assert_eq!(last[3], 1);
    }

    #[test]
    fn missing_gif_is_a_render_error() {
        let err = renderer().load_animation(Path::new("/nonexistent.gif"));
        assert!(matches!(err, Err(DeviceError::Render(_))));
    }

    #[test]
    fn text_without_font_still_paints_background() {
        let img = renderer().text(Rgb::new(0, 0, 80), &[TextLine::new("42", 20.0, 0.5)]);
        assert_eq!(*img.get_pixel(0, 0), Pixel([0, 0, 80]));
    }
}
