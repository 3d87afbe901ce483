use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use lm_sensors::{
    LMSensors, SubFeatureRef,
    value::{Kind as ValueKind, Value},
};
use log::{info, warn};

/// Chip and feature names that carry the CPU package temperature, in order
/// of preference.
const CPU_CANDIDATES: &[(&str, &[&str])] = &[
    ("k10temp", &["Tctl", "Tdie"]),
    ("zenpower", &["Tdie", "Tctl"]),
    ("coretemp", &["Package id 0"]),
    ("cpu_thermal", &["temp1"]),
];

/// Wrapper for the lm-sensors handle.
pub struct LMSensorsRef(pub LMSensors);

// SAFETY: lm-sensors library (>= 3.6) uses internal global mutex for all operations.
// The library is thread-safe but doesn't implement Send/Sync markers.
unsafe impl Send for LMSensorsRef {}
unsafe impl Sync for LMSensorsRef {}

/// Process-wide lm-sensors instance. `None` if the library is unavailable.
pub static LMSENSORS: LazyLock<Option<LMSensorsRef>> =
    LazyLock::new(|| match lm_sensors::Initializer::default().initialize() {
        Ok(sensors) => {
            info!("lm-sensors initialized successfully");
            Some(LMSensorsRef(sensors))
        }
        Err(e) => {
            warn!("lm-sensors not available: {e}. CPU temperature will fall back to 50 °C.");
            None
        }
    });

struct CpuInput(SubFeatureRef<'static>);

// SAFETY: libsensors (>= 3.6) guards all sensor access with an internal global mutex.
//         The `SubFeatureRef::value()` call is read-only.
unsafe impl Send for CpuInput {}
unsafe impl Sync for CpuInput {}

static CPU_INPUT: LazyLock<Option<CpuInput>> = LazyLock::new(|| {
    let lms = &LMSENSORS.as_ref()?.0;
    let found = discover(lms);
    if found.is_none() {
        warn!("no CPU temperature feature found in lm-sensors");
    }
    found
});

fn discover(lms: &'static LMSensors) -> Option<CpuInput> {
    for (chip_name, features) in CPU_CANDIDATES {
        let Some(chip) = lms
            .chip_iter(None)
            .find(|c| {
                c.name()
                    .map(|n| n.split('-').next() == Some(*chip_name))
                    .unwrap_or(false)
            })
        else {
            continue;
        };
        for feature_name in *features {
            let feature = chip.feature_iter().find(|f| {
                f.label()
                    .map(|l| l == *feature_name)
                    .unwrap_or(false)
            });
            let Some(feature) = feature else {
                continue;
            };
            if let Some(sub) = feature
                .sub_feature_iter()
                .find(|s| matches!(s.kind(), Some(ValueKind::TemperatureInput)))
            {
                info!("CPU temperature from {chip_name}/{feature_name}");
                return Some(CpuInput(sub));
            }
        }
    }
    None
}

/// Blocking read of the CPU package temperature.
pub fn cpu_temperature() -> Result<f32> {
    let input = CPU_INPUT
        .as_ref()
        .ok_or_else(|| anyhow!("cpu temperature sensor unavailable"))?;
    match input.0.value()? {
        Value::TemperatureInput(t) => Ok(t as f32),
        _ => Err(anyhow!("non-temperature value")),
    }
}
