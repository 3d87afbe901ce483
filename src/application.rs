//! Application entry point and builder pattern implementation.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use log::{info, warn};

use crate::config::ConfigManager;
use crate::discovery::UsbFactory;
use crate::event::EventBus;
use crate::providers::{
    DBusServiceProvider, KeySinkServiceProvider, SleepMonitorServiceProvider,
    StoreWatcherServiceProvider,
};
use crate::runtime::Runtime;
use crate::sensors::{SensorProvider, SystemSensors};
use crate::store;
use crate::supervisor::{DeviceFactory, Supervisor};

/// Main application structure that orchestrates all daemon components.
///
/// # Example
///
/// ```no_run
/// use linkhubd::application::Application;
/// use linkhubd::config::ConfigManager;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = ConfigManager::load(None)?;
/// let mut app = Application::builder()
///     .with_config_manager(config_manager)
///     .build()
///     .await?;
///
/// app.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    pub supervisor: Supervisor,
}

impl Application {
    /// Creates a new ApplicationBuilder for constructing Application instances.
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Starts services, then devices, then runs until a shutdown request.
    pub async fn run(&mut self) -> Result<()> {
        self.supervisor.start_all_services().await?;

        let running = self.supervisor.start_devices().await?;
        info!("{running} device(s) running");

        self.supervisor.run_main_loop().await
    }
}

/// Builder pattern for creating Application instances.
pub struct ApplicationBuilder {
    config_manager: Option<ConfigManager>,
    sensors: Option<Arc<dyn SensorProvider>>,
    factory: Option<Arc<dyn DeviceFactory>>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config_manager: None,
            sensors: None,
            factory: None,
        }
    }

    /// Sets the configuration manager for the application.
    pub fn with_config_manager(mut self, config_manager: ConfigManager) -> Self {
        self.config_manager = Some(config_manager);
        self
    }

    /// Replaces the host sensors.
    pub fn with_sensors(mut self, sensors: Arc<dyn SensorProvider>) -> Self {
        self.sensors = Some(sensors);
        self
    }

    /// Replaces USB/SMBus discovery.
    pub fn with_factory(mut self, factory: Arc<dyn DeviceFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Prepares the store and registers the configured services.
    pub async fn build(self) -> Result<Application> {
        let config_manager = self
            .config_manager
            .ok_or_else(|| anyhow!("Configuration manager is required"))?;
        let config = config_manager.get();

        store::prepare_root(&config.database).with_context(|| {
            format!("Profile store {} is not usable", config.database.display())
        })?;

        let event_bus = EventBus::new();
        let sensors = self
            .sensors
            .unwrap_or_else(|| Arc::new(SystemSensors));
        let runtime = Runtime::new(
            config.database.clone(),
            sensors,
            event_bus.clone(),
            config.runtime_options(),
            config.speed_profiles(),
        );
        let factory = self.factory.unwrap_or_else(|| {
            Arc::new(UsbFactory::new(config.devices.clone(), config.memory.clone()))
        });

        let mut supervisor = Supervisor::new(runtime, factory);
        supervisor.add_service(Box::new(StoreWatcherServiceProvider::new(
            &config.database,
            event_bus.clone(),
        )));
        supervisor.add_service(Box::new(KeySinkServiceProvider::new(event_bus.clone())));
        if config.dbus.monitor {
            supervisor.add_service(Box::new(SleepMonitorServiceProvider::new(event_bus.clone())));
        }
        if config.dbus.control {
            match DBusServiceProvider::new(
                supervisor.devices(),
                supervisor.runtime().directory.clone(),
                event_bus.clone(),
            )
            .await
            {
                Ok(provider) => supervisor.add_service(Box::new(provider)),
                Err(e) => warn!("D-Bus control disabled: {e:#}"),
            }
        }

        Ok(Application { supervisor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sensors::MockSensorProvider;
    use crate::supervisor::MockDeviceFactory;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn manager(root: &TempDir, monitor: bool) -> ConfigManager {
        let mut config = Config {
            database: root.path().join("db"),
            ..Config::default()
        };
        config.dbus.monitor = monitor;
        ConfigManager::new(config, None)
    }

    #[tokio::test]
    async fn build_prepares_the_store_and_services() {
        let root = TempDir::new().unwrap();
        let app = Application::builder()
            .with_config_manager(manager(&root, true))
            .with_sensors(Arc::new(MockSensorProvider::new()))
            .with_factory(Arc::new(MockDeviceFactory::new()))
            .build()
            .await
            .unwrap();
        assert!(root.path().join("db/profiles").is_dir());
        assert!(root.path().join("db/lcd/images").is_dir());
        assert_eq!(
            app.supervisor.registered_services(),
            vec!["sleep-monitor", "store-watcher", "key-sink"]
        );
    }

    #[tokio::test]
    async fn unusable_store_is_a_bootstrap_error() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("db");
        std::fs::write(&file, "not a directory").unwrap();
        let result = Application::builder()
            .with_config_manager(manager(&root, false))
            .with_factory(Arc::new(MockDeviceFactory::new()))
            .build()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn builder_requires_configuration() {
        assert!(Application::builder().build().await.is_err());
    }
}
