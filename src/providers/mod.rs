//! Services started through the [`TaskManager`](crate::task_manager::TaskManager).
//!
//! Per-device workers live next to the system services: each one is a
//! [`ServiceProvider`] with a name, a start priority and a criticality.

pub mod control;
pub mod dbus;
pub mod input;
pub mod key_sink;
pub mod sleep_monitor;
pub mod store_watcher;
pub mod telemetry;
pub mod traits;

pub use control::ControlServiceProvider;
pub use dbus::DBusServiceProvider;
pub use input::InputServiceProvider;
pub use key_sink::KeySinkServiceProvider;
pub use sleep_monitor::SleepMonitorServiceProvider;
pub use store_watcher::StoreWatcherServiceProvider;
pub use telemetry::TelemetryServiceProvider;
pub use traits::ServiceProvider;
