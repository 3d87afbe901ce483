//! Named lighting profiles and the per-device catalog.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rgb::color::Rgb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RgbMode {
    Off,
    Static,
    Rainbow,
    #[serde(rename = "pastelrainbow")]
    PastelRainbow,
    Watercolor,
    Gradient,
    #[serde(rename = "colorpulse")]
    ColorPulse,
    #[serde(rename = "colorshift")]
    ColorShift,
    #[serde(rename = "colorwarp")]
    ColorWarp,
    Rotator,
    Wave,
    Storm,
    Flickering,
    Circle,
    #[serde(rename = "circleshift")]
    CircleShift,
    Spinner,
    CpuTemperature,
    GpuTemperature,
    LiquidTemperature,
}

impl RgbMode {
    pub const ALL: [RgbMode; 19] = [
        RgbMode::Off,
        RgbMode::Static,
        RgbMode::Rainbow,
        RgbMode::PastelRainbow,
        RgbMode::Watercolor,
        RgbMode::Gradient,
        RgbMode::ColorPulse,
        RgbMode::ColorShift,
        RgbMode::ColorWarp,
        RgbMode::Rotator,
        RgbMode::Wave,
        RgbMode::Storm,
        RgbMode::Flickering,
        RgbMode::Circle,
        RgbMode::CircleShift,
        RgbMode::Spinner,
        RgbMode::CpuTemperature,
        RgbMode::GpuTemperature,
        RgbMode::LiquidTemperature,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RgbMode::Off => "off",
            RgbMode::Static => "static",
            RgbMode::Rainbow => "rainbow",
            RgbMode::PastelRainbow => "pastelrainbow",
            RgbMode::Watercolor => "watercolor",
            RgbMode::Gradient => "gradient",
            RgbMode::ColorPulse => "colorpulse",
            RgbMode::ColorShift => "colorshift",
            RgbMode::ColorWarp => "colorwarp",
            RgbMode::Rotator => "rotator",
            RgbMode::Wave => "wave",
            RgbMode::Storm => "storm",
            RgbMode::Flickering => "flickering",
            RgbMode::Circle => "circle",
            RgbMode::CircleShift => "circleshift",
            RgbMode::Spinner => "spinner",
            RgbMode::CpuTemperature => "cpu-temperature",
            RgbMode::GpuTemperature => "gpu-temperature",
            RgbMode::LiquidTemperature => "liquid-temperature",
        }
    }

    pub fn is_temperature(self) -> bool {
        matches!(
            self,
            RgbMode::CpuTemperature | RgbMode::GpuTemperature | RgbMode::LiquidTemperature
        )
    }
}

/// Colour with its own default brightness (0..=1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    #[serde(default = "full")]
    pub brightness: f32,
}

fn full() -> f32 {
    1.0
}

impl ProfileColor {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self {
            red,
            green,
            blue,
            brightness: 1.0,
        }
    }

    pub fn rgb(&self) -> Rgb {
        Rgb::new(self.red, self.green, self.blue)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RgbProfile {
    pub mode: RgbMode,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_smoothness")]
    pub smoothness: u8,
    pub start: ProfileColor,
    pub end: ProfileColor,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gradients: Vec<ProfileColor>,
    #[serde(default = "default_min_temp")]
    pub min_temp: f32,
    #[serde(default = "default_max_temp")]
    pub max_temp: f32,
}

fn default_speed() -> f32 {
    4.0
}

fn default_smoothness() -> u8 {
    20
}

fn default_min_temp() -> f32 {
    30.0
}

fn default_max_temp() -> f32 {
    80.0
}

impl RgbProfile {
    pub fn new(mode: RgbMode, start: Rgb, end: Rgb) -> Self {
        Self {
            mode,
            speed: default_speed(),
            smoothness: default_smoothness(),
            start: ProfileColor::new(start.r, start.g, start.b),
            end: ProfileColor::new(end.r, end.g, end.b),
            gradients: Vec::new(),
            min_temp: default_min_temp(),
            max_temp: default_max_temp(),
        }
    }

    /// Speed clamped into 0.1..=10.
    pub fn speed(&self) -> f32 {
        self.speed.clamp(0.1, 10.0)
    }

    /// Smoothness clamped into 1..=100.
    pub fn smoothness(&self) -> u8 {
        self.smoothness.clamp(1, 100)
    }
}

/// Named profiles for one device, persisted under `rgb/<serial>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RgbCatalog {
    pub profiles: BTreeMap<String, RgbProfile>,
}

impl Default for RgbCatalog {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        for mode in RgbMode::ALL {
            let mut p = RgbProfile::new(mode, Rgb::new(0, 255, 255), Rgb::new(255, 0, 255));
            if mode == RgbMode::Gradient {
                p.gradients = vec![
                    ProfileColor::new(255, 0, 0),
                    ProfileColor::new(0, 255, 0),
                    ProfileColor::new(0, 0, 255),
                ];
            }
            profiles.insert(mode.name().to_string(), p);
        }
        profiles.insert(
            "headset".to_string(),
            RgbProfile::new(RgbMode::Static, Rgb::new(255, 255, 255), Rgb::BLACK),
        );
        Self { profiles }
    }
}

impl RgbCatalog {
    pub fn get(&self, name: &str) -> Option<&RgbProfile> {
        self.profiles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }
}
