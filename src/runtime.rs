//! Process-wide collaborators handed to every device.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use log::{debug, warn};

use crate::event::EventBus;
use crate::profile::{
    AnimationProfile, ArcProfile, AudioSettings, DeviceProfile, DoubleArcProfile, RgbCatalog,
    SensorSource, SpeedProfile,
};
use crate::registry::DeviceDirectory;
use crate::sensors::SensorProvider;
use crate::state::TemperatureUnit;
use crate::store::{self, ProfileStore};

pub use crate::profile::speed::FALLBACK_TEMPERATURE;

/// Switches that shape how devices run.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeOptions {
    /// No control loop; fans and pumps stay where the device put them.
    pub manual: bool,
    /// Table profiles are evaluated as interpolated curves.
    pub graph_profiles: bool,
    pub temperature_unit: TemperatureUnit,
    pub resume_delay: Duration,
    pub font_path: Option<PathBuf>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            manual: false,
            graph_profiles: false,
            temperature_unit: TemperatureUnit::Celsius,
            resume_delay: Duration::from_millis(5000),
            font_path: None,
        }
    }
}

/// Shared, cheaply cloneable context.
#[derive(Clone)]
pub struct Runtime {
    pub store_root: PathBuf,
    pub sensors: Arc<dyn SensorProvider>,
    pub directory: DeviceDirectory,
    pub event_bus: EventBus,
    pub options: RuntimeOptions,
    pub speed_profiles: Arc<BTreeMap<String, SpeedProfile>>,
}

impl Runtime {
    pub fn new(
        store_root: PathBuf,
        sensors: Arc<dyn SensorProvider>,
        event_bus: EventBus,
        options: RuntimeOptions,
        speed_profiles: BTreeMap<String, SpeedProfile>,
    ) -> Self {
        let speed_profiles = if options.graph_profiles {
            speed_profiles
                .into_iter()
                .map(|(name, p)| (name, p.to_curve()))
                .collect()
        } else {
            speed_profiles
        };
        Self {
            store_root,
            sensors,
            directory: DeviceDirectory::new(),
            event_bus,
            options,
            speed_profiles: Arc::new(speed_profiles),
        }
    }

    pub fn profiles(&self) -> ProfileStore<DeviceProfile> {
        ProfileStore::new(&self.store_root, store::PROFILES_DIR)
    }

    pub fn rgb_catalogs(&self) -> ProfileStore<RgbCatalog> {
        ProfileStore::new(&self.store_root, store::RGB_DIR)
    }

    pub fn arc(&self) -> ArcProfile {
        ProfileStore::<ArcProfile>::new(&self.store_root, store::LCD_DIR).load("arc")
    }

    pub fn save_arc(&self, arc: &ArcProfile) -> Result<()> {
        ProfileStore::new(&self.store_root, store::LCD_DIR).save("arc", arc)?;
        Ok(())
    }

    pub fn double_arc(&self) -> DoubleArcProfile {
        ProfileStore::<DoubleArcProfile>::new(&self.store_root, store::LCD_DIR).load("double-arc")
    }

    pub fn save_double_arc(&self, arc: &DoubleArcProfile) -> Result<()> {
        ProfileStore::new(&self.store_root, store::LCD_DIR).save("double-arc", arc)?;
        Ok(())
    }

    pub fn animation(&self) -> AnimationProfile {
        ProfileStore::<AnimationProfile>::new(&self.store_root, store::LCD_DIR).load("animation")
    }

    pub fn audio(&self) -> AudioSettings {
        ProfileStore::<AudioSettings>::new(&self.store_root, "").load("audio")
    }

    pub fn save_audio(&self, audio: &AudioSettings) -> Result<()> {
        ProfileStore::new(&self.store_root, "").save("audio", audio)?;
        Ok(())
    }

    pub fn lcd_image(&self, name: &str) -> PathBuf {
        self.store_root.join(store::LCD_IMAGES_DIR).join(name)
    }

    pub fn root(&self) -> &Path {
        &self.store_root
    }

    /// Reads a sensor and substitutes [`FALLBACK_TEMPERATURE`] for absent
    /// values. `liquid` is the device's own liquid temperature, if any.
    pub async fn read_sensor(&self, source: &SensorSource, liquid: Option<f32>) -> f32 {
        let raw = match source {
            SensorSource::Cpu => self.sensors.cpu().await,
            SensorSource::Gpu => self.gpu_or_cpu(0).await,
            SensorSource::MultiGpu { index } => self.gpu_or_cpu(*index).await,
            SensorSource::CpuGpuMax => {
                let cpu = self.sensors.cpu().await.unwrap_or(0.0);
                let gpu = self.sensors.gpu(0).await.unwrap_or(0.0);
                Ok(cpu.max(gpu))
            }
            SensorSource::Liquid => liquid.ok_or_else(|| anyhow!("no liquid temperature")),
            SensorSource::Hwmon { chip, input } => self.sensors.hwmon(chip, input).await,
            SensorSource::External { path } => self.sensors.external(path).await,
            SensorSource::Global { serial, channel } => self
                .directory
                .temperature(serial, *channel)
                .ok_or_else(|| anyhow!("probe {serial}:{channel} has no reading")),
        };
        substitute(source, raw)
    }

    async fn gpu_or_cpu(&self, index: u32) -> Result<f32> {
        match self.sensors.gpu(index).await {
            Ok(t) if t > 0.0 => Ok(t),
            other => {
                debug!("gpu {index} unavailable ({other:?}), using cpu");
                self.sensors.cpu().await
            }
        }
    }
}

fn substitute(source: &SensorSource, raw: Result<f32>) -> f32 {
    match raw {
        Ok(t) if t.is_finite() && t != 0.0 => t,
        Ok(_) => {
            warn!("{source:?} reported 0, substituting {FALLBACK_TEMPERATURE} °C");
            FALLBACK_TEMPERATURE
        }
        Err(e) => {
            warn!("{source:?} unavailable ({e}), substituting {FALLBACK_TEMPERATURE} °C");
            FALLBACK_TEMPERATURE
        }
    }
}
