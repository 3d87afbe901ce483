//! Global LCD assets (`lcd/*.json`) and audio settings (`audio.json`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::profile::speed::SensorSource;
use crate::rgb::color::Rgb;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LcdMode {
    #[default]
    Liquid,
    Cpu,
    Gpu,
    Combined,
    Time,
    Animation,
    Arc,
    DoubleArc,
    Off,
}

impl LcdMode {
    /// Modes redrawn on the 1 Hz tick rather than on GIF delays.
    pub fn is_computed(self) -> bool {
        !matches!(self, LcdMode::Animation | LcdMode::Off)
    }
}

/// One circular gauge: a sensor clamped into `[min, max]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gauge {
    #[serde(flatten)]
    pub sensor: SensorSource,
    pub min: f32,
    pub max: f32,
    pub color: Rgb,
}

impl Gauge {
    pub fn new(sensor: SensorSource, min: f32, max: f32, color: Rgb) -> Self {
        Self {
            sensor,
            min,
            max,
            color,
        }
    }

    /// Position of `value` inside the gauge range, clamped to 0..=1.
    pub fn normalized(&self, value: f32) -> f32 {
        let span = self.max - self.min;
        if span <= f32::EPSILON {
            return 0.0;
        }
        ((value - self.min) / span).clamp(0.0, 1.0)
    }
}

/// `lcd/arc.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcProfile {
    pub gauge: Gauge,
    pub background: Rgb,
    pub text: Rgb,
    #[serde(default = "default_thickness")]
    pub thickness: u32,
}

impl Default for ArcProfile {
    fn default() -> Self {
        Self {
            gauge: Gauge::new(SensorSource::Cpu, 30.0, 90.0, Rgb::new(0, 200, 255)),
            background: Rgb::BLACK,
            text: Rgb::new(255, 255, 255),
            thickness: default_thickness(),
        }
    }
}

/// `lcd/double-arc.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoubleArcProfile {
    pub inner: Gauge,
    pub outer: Gauge,
    pub background: Rgb,
    pub text: Rgb,
    #[serde(default = "default_thickness")]
    pub thickness: u32,
}

impl Default for DoubleArcProfile {
    fn default() -> Self {
        Self {
            inner: Gauge::new(SensorSource::Cpu, 30.0, 90.0, Rgb::new(0, 200, 255)),
            outer: Gauge::new(SensorSource::Gpu, 30.0, 90.0, Rgb::new(255, 80, 0)),
            background: Rgb::BLACK,
            text: Rgb::new(255, 255, 255),
            thickness: default_thickness(),
        }
    }
}

fn default_thickness() -> u32 {
    24
}

/// `lcd/animation.json`: GIF name under `lcd/images/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationProfile {
    pub image: String,
}

impl Default for AnimationProfile {
    fn default() -> Self {
        Self {
            image: "default.gif".to_string(),
        }
    }
}

/// `audio.json`: equalizer presets shared by all headsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettings {
    #[serde(default)]
    pub presets: BTreeMap<String, [i8; 10]>,
}
