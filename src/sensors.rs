//! Host temperature sources consumed by the control loop and the LCD engine.

use std::path::Path;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::debug;

use crate::temperature_sensors::{external, gpu, hwmon, lm_sensor};

/// Raw host sensor readings in °C.
///
/// Implementations report what they read; substitution of absent values
/// happens in [`Runtime::read_sensor`](crate::runtime::Runtime::read_sensor).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SensorProvider: Send + Sync {
    async fn cpu(&self) -> Result<f32>;

    /// GPU `index`, NVIDIA first, AMD second.
    async fn gpu(&self, index: u32) -> Result<f32>;

    /// `temp*_input` of the hwmon chip whose `name` file equals `chip`.
    async fn hwmon(&self, chip: &str, input: &str) -> Result<f32>;

    /// Runs `path` and parses its stdout as integer °C.
    async fn external(&self, path: &Path) -> Result<f32>;
}

/// lm-sensors, sysfs hwmon and `nvidia-smi` backed provider.
#[derive(Debug, Default)]
pub struct SystemSensors;

#[async_trait]
impl SensorProvider for SystemSensors {
    async fn cpu(&self) -> Result<f32> {
        tokio::task::spawn_blocking(lm_sensor::cpu_temperature).await?
    }

    async fn gpu(&self, index: u32) -> Result<f32> {
        match gpu::nvidia(index).await {
            Ok(t) if t > 0.0 => return Ok(t),
            Ok(_) => debug!("nvidia-smi reported 0 for gpu {index}"),
            Err(e) => debug!("nvidia gpu {index}: {e}"),
        }
        let amd = tokio::task::spawn_blocking(move || gpu::amd(hwmon::HWMON_ROOT, index)).await?;
        amd.map_err(|e| anyhow!("no gpu temperature for index {index}: {e}"))
    }

    async fn hwmon(&self, chip: &str, input: &str) -> Result<f32> {
        let (chip, input) = (chip.to_string(), input.to_string());
        tokio::task::spawn_blocking(move || hwmon::read(Path::new(hwmon::HWMON_ROOT), &chip, &input))
            .await?
    }

    async fn external(&self, path: &Path) -> Result<f32> {
        external::run(path).await
    }
}
