//! User-facing configuration: speed profiles, RGB profiles, LCD assets and
//! the per-device profile that binds them to channels.

pub mod device;
pub mod lcd;
pub mod rgb;
pub mod speed;

pub use device::{DeviceProfile, DpiSettings, HeadsetSettings, LcdSettings, ValidationContext};
pub use lcd::{AnimationProfile, ArcProfile, AudioSettings, DoubleArcProfile, Gauge, LcdMode};
pub use rgb::{ProfileColor, RgbCatalog, RgbMode, RgbProfile};
pub use speed::{SensorSource, SpeedMode, SpeedProfile};
