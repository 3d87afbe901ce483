//! Per-device profile persisted as `profiles/<serial>.json`.
//!
//! All mutations go through typed setters that validate first and leave the
//! profile untouched on rejection. Persistence is the caller's job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::descriptor::Family;
use crate::error::ValidationError;
use crate::profile::lcd::LcdMode;
use crate::profile::rgb::RgbCatalog;
use crate::profile::speed::{SensorSource, SpeedProfile};
use crate::state::Channel;

pub const DEFAULT_SPEED_PROFILE: &str = "Normal";
pub const DEFAULT_RGB_PROFILE: &str = "static";
pub const DEFAULT_LABEL: &str = "Set Label";

pub const DPI_MIN: u16 = 200;
pub const DPI_MAX: u16 = 18000;
pub const EQ_BANDS: usize = 10;
pub const EQ_LIMIT: i8 = 12;

pub const NEXUS_KEYS: [&str; 6] = [
    "KEY_PREVIOUSSONG",
    "KEY_PLAYPAUSE",
    "KEY_NEXTSONG",
    "KEY_VOLUMEDOWN",
    "KEY_VOLUMEUP",
    "KEY_MUTE",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LcdSettings {
    pub mode: LcdMode,
    #[serde(default)]
    pub rotation: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Key actions of the touch buttons, left to right.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadsetSettings {
    pub sleep_minutes: u8,
    pub sidetone: u8,
    #[serde(default)]
    pub disable_mic_indicator: bool,
}

impl Default for HeadsetSettings {
    fn default() -> Self {
        Self {
            sleep_minutes: 30,
            sidetone: 0,
            disable_mic_indicator: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpiSettings {
    pub stages: Vec<u16>,
    pub active: u8,
}

impl Default for DpiSettings {
    fn default() -> Self {
        Self {
            stages: vec![800, 1500, 3000],
            active: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub active: bool,
    pub brightness: u8,
    /// Slider value saved while a scheduler override is in effect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_brightness: Option<u8>,
    pub speed_profiles: BTreeMap<u8, String>,
    pub rgb_profiles: BTreeMap<u8, String>,
    pub labels: BTreeMap<u8, String>,
    #[serde(default)]
    pub lcd: LcdSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headset: Option<HeadsetSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<[i8; EQ_BANDS]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpi: Option<DpiSettings>,
}

/// What a setter needs to know about the device and its surroundings.
pub struct ValidationContext<'a> {
    pub channels: &'a [Channel],
    pub has_pump: bool,
    pub psu: bool,
    pub speed_profiles: &'a BTreeMap<String, SpeedProfile>,
    /// Does `serial:channel` name a registered device channel?
    pub probe: &'a (dyn Fn(&str, u8) -> bool + Sync),
}

impl DeviceProfile {
    /// Profile synthesized when the store has no entry for a device.
    pub fn default_for(family: Family, channels: &[Channel]) -> Self {
        let mut speed_profiles = BTreeMap::new();
        let mut rgb_profiles = BTreeMap::new();
        let mut labels = BTreeMap::new();
        for ch in channels {
            if ch.is_actuator() {
                speed_profiles.insert(ch.id, DEFAULT_SPEED_PROFILE.to_string());
            }
            let rgb = match family {
                Family::Headset => "headset",
                _ => DEFAULT_RGB_PROFILE,
            };
            rgb_profiles.insert(ch.id, rgb.to_string());
            labels.insert(ch.id, DEFAULT_LABEL.to_string());
        }
        Self {
            active: true,
            brightness: 100,
            original_brightness: None,
            speed_profiles,
            rgb_profiles,
            labels,
            lcd: LcdSettings {
                keys: match family {
                    Family::Nexus => NEXUS_KEYS.iter().map(|k| k.to_string()).collect(),
                    _ => Vec::new(),
                },
                ..LcdSettings::default()
            },
            headset: (family == Family::Headset).then(HeadsetSettings::default),
            equalizer: (family == Family::Headset).then_some([0; EQ_BANDS]),
            dpi: (family == Family::Mouse).then(DpiSettings::default),
        }
    }

    pub fn speed_profile(&self, channel: u8) -> &str {
        self.speed_profiles
            .get(&channel)
            .map(String::as_str)
            .unwrap_or(DEFAULT_SPEED_PROFILE)
    }

    pub fn rgb_profile(&self, channel: u8) -> &str {
        self.rgb_profiles
            .get(&channel)
            .map(String::as_str)
            .unwrap_or(DEFAULT_RGB_PROFILE)
    }

    pub fn set_brightness(&mut self, value: i32) -> Result<(), ValidationError> {
        self.brightness = brightness(value)?;
        Ok(())
    }

    /// Scheduler override: remembers the user slider the first time.
    pub fn override_brightness(&mut self, value: i32) -> Result<(), ValidationError> {
        let value = brightness(value)?;
        if self.original_brightness.is_none() {
            self.original_brightness = Some(self.brightness);
        }
        self.brightness = value;
        Ok(())
    }

    /// Ends a scheduler override. Returns `false` when none was active.
    pub fn restore_brightness(&mut self) -> bool {
        match self.original_brightness.take() {
            Some(original) => {
                self.brightness = original;
                true
            }
            None => false,
        }
    }

    pub fn set_speed_profile(
        &mut self,
        channel: u8,
        name: &str,
        ctx: &ValidationContext<'_>,
    ) -> Result<(), ValidationError> {
        let ch = ctx
            .channels
            .iter()
            .find(|c| c.id == channel)
            .ok_or(ValidationError::UnknownChannel(channel))?;
        if !ch.is_actuator() {
            return Err(ValidationError::Unsupported("lighting channel"));
        }
        let profile = ctx
            .speed_profiles
            .get(name)
            .ok_or_else(|| ValidationError::UnknownProfile(name.to_string()))?;
        if profile.psu && !ctx.psu {
            return Err(ValidationError::NotPsu(name.to_string()));
        }
        match &profile.sensor {
            SensorSource::Liquid if !ctx.has_pump => return Err(ValidationError::NoPump),
            SensorSource::Global { serial, channel } if !(ctx.probe)(serial, *channel) => {
                return Err(ValidationError::UnknownProbe(format!("{serial}:{channel}")));
            }
            _ => {}
        }
        self.speed_profiles.insert(channel, name.to_string());
        Ok(())
    }

    pub fn set_rgb_profile(
        &mut self,
        channel: u8,
        name: &str,
        channels: &[Channel],
        catalog: &RgbCatalog,
    ) -> Result<(), ValidationError> {
        if !channels.iter().any(|c| c.id == channel) {
            return Err(ValidationError::UnknownChannel(channel));
        }
        if !catalog.contains(name) {
            return Err(ValidationError::UnknownProfile(name.to_string()));
        }
        self.rgb_profiles.insert(channel, name.to_string());
        Ok(())
    }

    pub fn set_label(
        &mut self,
        channel: u8,
        label: &str,
        channels: &[Channel],
    ) -> Result<(), ValidationError> {
        if !channels.iter().any(|c| c.id == channel) {
            return Err(ValidationError::UnknownChannel(channel));
        }
        let label = label.trim();
        if label.is_empty() {
            return Err(ValidationError::OutOfRange {
                field: "label",
                value: 0,
            });
        }
        self.labels.insert(channel, label.to_string());
        Ok(())
    }

    pub fn set_lcd_mode(&mut self, mode: LcdMode) {
        self.lcd.mode = mode;
    }

    pub fn set_lcd_rotation(&mut self, degrees: u16) -> Result<(), ValidationError> {
        if !matches!(degrees, 0 | 90 | 180 | 270) {
            return Err(ValidationError::OutOfRange {
                field: "rotation",
                value: i64::from(degrees),
            });
        }
        self.lcd.rotation = degrees;
        Ok(())
    }

    pub fn set_lcd_image(&mut self, image: &str) {
        self.lcd.image = Some(image.to_string());
    }

    pub fn set_sidetone(&mut self, value: i32) -> Result<(), ValidationError> {
        let headset = self
            .headset
            .as_mut()
            .ok_or(ValidationError::Unsupported("sidetone"))?;
        headset.sidetone = in_range("sidetone", value, 0, 100)?;
        Ok(())
    }

    pub fn set_sleep_minutes(&mut self, value: i32) -> Result<(), ValidationError> {
        let headset = self
            .headset
            .as_mut()
            .ok_or(ValidationError::Unsupported("sleep timer"))?;
        headset.sleep_minutes = in_range("sleep_minutes", value, 1, 120)?;
        Ok(())
    }

    pub fn set_mic_indicator(&mut self, disabled: bool) -> Result<(), ValidationError> {
        let headset = self
            .headset
            .as_mut()
            .ok_or(ValidationError::Unsupported("mic indicator"))?;
        headset.disable_mic_indicator = disabled;
        Ok(())
    }

    pub fn set_equalizer(&mut self, bands: &[i32]) -> Result<(), ValidationError> {
        if self.equalizer.is_none() {
            return Err(ValidationError::Unsupported("equalizer"));
        }
        if bands.len() != EQ_BANDS {
            return Err(ValidationError::OutOfRange {
                field: "equalizer bands",
                value: bands.len() as i64,
            });
        }
        let mut eq = [0i8; EQ_BANDS];
        for (slot, &band) in eq.iter_mut().zip(bands) {
            *slot = in_range("equalizer", band, -i32::from(EQ_LIMIT), i32::from(EQ_LIMIT))?;
        }
        self.equalizer = Some(eq);
        Ok(())
    }

    /// Stage values are clamped into `[200, 18000]` without complaint.
    pub fn set_dpi_stages(&mut self, stages: &[i32]) -> Result<(), ValidationError> {
        let dpi = self
            .dpi
            .as_mut()
            .ok_or(ValidationError::Unsupported("dpi"))?;
        if stages.is_empty() {
            return Err(ValidationError::OutOfRange {
                field: "dpi stages",
                value: 0,
            });
        }
        dpi.stages = stages
            .iter()
            .map(|&v| v.clamp(i32::from(DPI_MIN), i32::from(DPI_MAX)) as u16)
            .collect();
        if usize::from(dpi.active) >= dpi.stages.len() {
            dpi.active = 0;
        }
        Ok(())
    }
}

fn brightness(value: i32) -> Result<u8, ValidationError> {
    in_range("brightness", value, 0, 100)
}

fn in_range<T: TryFrom<i32>>(
    field: &'static str,
    value: i32,
    min: i32,
    max: i32,
) -> Result<T, ValidationError> {
    if !(min..=max).contains(&value) {
        return Err(ValidationError::OutOfRange {
            field,
            value: i64::from(value),
        });
    }
    T::try_from(value).map_err(|_| ValidationError::OutOfRange {
        field,
        value: i64::from(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor;
    use crate::profile::speed::builtin_profiles;
    use pretty_assertions::assert_eq;

    fn platinum_channels() -> Vec<Channel> {
        Channel::from_descriptor(&descriptor::platinum(0x0c18, "P"))
    }

    fn ctx<'a>(
        channels: &'a [Channel],
        profiles: &'a BTreeMap<String, SpeedProfile>,
        has_pump: bool,
    ) -> ValidationContext<'a> {
        ValidationContext {
            channels,
            has_pump,
            psu: false,
            speed_profiles: profiles,
            probe: &|serial, ch| serial == "ABC" && ch == 0,
        }
    }

    #[test]
    fn default_profile_uses_normal_static_and_placeholder_label() {
        let p = DeviceProfile::default_for(Family::Platinum, &platinum_channels());
        assert_eq!(p.speed_profile(0), "Normal");
        assert_eq!(p.rgb_profile(2), "static");
        assert_eq!(p.labels[&1], "Set Label");
        assert_eq!(p.brightness, 100);
        assert!(p.headset.is_none());
    }

    #[test]
    fn brightness_bounds_are_inclusive() {
        let mut p = DeviceProfile::default_for(Family::Platinum, &platinum_channels());
        assert!(p.set_brightness(0).is_ok());
        assert!(p.set_brightness(100).is_ok());
        assert!(p.set_brightness(-1).is_err());
        assert!(p.set_brightness(101).is_err());
        assert_eq!(p.brightness, 100);
    }

    #[test]
    fn override_and_restore_brightness() {
        let mut p = DeviceProfile::default_for(Family::Platinum, &platinum_channels());
        p.set_brightness(80).unwrap();
        p.override_brightness(10).unwrap();
        p.override_brightness(20).unwrap();
        assert_eq!(p.original_brightness, Some(80));
        assert!(p.restore_brightness());
        assert_eq!(p.brightness, 80);
        assert!(!p.restore_brightness());
    }

    #[test]
    fn liquid_profile_needs_a_pump() {
        let channels = platinum_channels();
        let profiles = builtin_profiles();
        let mut p = DeviceProfile::default_for(Family::Platinum, &channels);
        assert_eq!(
            p.set_speed_profile(1, "Liquid", &ctx(&channels, &profiles, false)),
            Err(ValidationError::NoPump)
        );
        assert!(p.set_speed_profile(1, "Liquid", &ctx(&channels, &profiles, true)).is_ok());
        assert_eq!(p.speed_profile(1), "Liquid");
    }

    #[test]
    fn psu_and_probe_preconditions() {
        let channels = platinum_channels();
        let mut profiles = builtin_profiles();
        let mut psu = profiles["Normal"].clone();
        psu.psu = true;
        profiles.insert("PSU".into(), psu);
        let mut probe = profiles["Normal"].clone();
        probe.sensor = SensorSource::Global {
            serial: "XYZ".into(),
            channel: 3,
        };
        profiles.insert("Probe".into(), probe);

        let mut p = DeviceProfile::default_for(Family::Platinum, &channels);
        let c = ctx(&channels, &profiles, true);
        assert_eq!(
            p.set_speed_profile(0, "PSU", &c),
            Err(ValidationError::NotPsu("PSU".into()))
        );
        assert_eq!(
            p.set_speed_profile(0, "Probe", &c),
            Err(ValidationError::UnknownProbe("XYZ:3".into()))
        );
        assert_eq!(
            p.set_speed_profile(0, "Nope", &c),
            Err(ValidationError::UnknownProfile("Nope".into()))
        );
        assert_eq!(p.speed_profile(0), "Normal");
    }

    #[test]
    fn dpi_is_clamped_silently() {
        let channels = Channel::from_descriptor(&descriptor::mouse(0x1b4c, "M", true));
        let mut p = DeviceProfile::default_for(Family::Mouse, &channels);
        p.set_dpi_stages(&[50, 1600, 40000]).unwrap();
        assert_eq!(p.dpi.unwrap().stages, vec![200, 1600, 18000]);
    }

    #[test]
    fn headset_ranges() {
        let channels = Channel::from_descriptor(&descriptor::headset(0x0a42, "H", true));
        let mut p = DeviceProfile::default_for(Family::Headset, &channels);
        assert_eq!(p.rgb_profile(1), "headset");
        assert!(p.set_sidetone(100).is_ok());
        assert!(p.set_sidetone(101).is_err());
        assert!(p.set_sleep_minutes(0).is_err());
        assert!(p.set_sleep_minutes(120).is_ok());
        assert!(p.set_equalizer(&[12, -12, 0, 0, 0, 0, 0, 0, 0, 0]).is_ok());
        assert!(p.set_equalizer(&[13, 0, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());
        assert!(p.set_equalizer(&[0; 3]).is_err());
    }

    #[test]
    fn rotation_accepts_quarter_turns_only() {
        let mut p = DeviceProfile::default_for(Family::LcdCover, &[]);
        assert!(p.set_lcd_rotation(270).is_ok());
        assert!(p.set_lcd_rotation(45).is_err());
        assert_eq!(p.lcd.rotation, 270);
    }

    #[test]
    fn reserialization_is_stable() {
        let p = DeviceProfile::default_for(Family::Headset, &platinum_channels());
        let first = serde_json::to_string_pretty(&p).unwrap();
        let back: DeviceProfile = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string_pretty(&back).unwrap();
        assert_eq!(first, second);
    }
}
