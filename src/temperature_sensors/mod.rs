//! Backends behind [`SystemSensors`](crate::sensors::SystemSensors).

pub mod external;
pub mod gpu;
pub mod hwmon;
pub mod lm_sensor;
