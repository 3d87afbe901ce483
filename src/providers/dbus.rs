//! D-Bus service provider.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use tokio_util::sync::CancellationToken;
use zbus::Connection;

use crate::event::EventBus;
use crate::interface::{BUS_NAME, DBusInterface, OBJECT_PATH};
use crate::providers::traits::ServiceProvider;
use crate::registry::DeviceDirectory;
use crate::supervisor::Devices;
use crate::task_manager::TaskManager;

pub const DBUS_TASK: &str = "dbus";

/// Exposes the control surface of the running devices on the session bus.
///
/// - **Service Name**: `io.github.linkhubd`
/// - **Object Path**: `/io/github/linkhubd`
///
/// Creation fails when no session bus is reachable. Only enabled when the
/// configuration asks for it, and then treated as critical.
pub struct DBusServiceProvider {
    devices: Devices,
    directory: DeviceDirectory,
    event_bus: EventBus,
    connection: Connection,
}

impl DBusServiceProvider {
    pub async fn new(devices: Devices, directory: DeviceDirectory, event_bus: EventBus) -> Result<Self> {
        let connection = Connection::session()
            .await
            .context("session bus unavailable")?;
        Ok(Self {
            devices,
            directory,
            event_bus,
            connection,
        })
    }
}

#[async_trait]
impl ServiceProvider for DBusServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let interface = DBusInterface {
            devices: self.devices.clone(),
            directory: self.directory.clone(),
            event_bus: self.event_bus.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let connection = self.connection.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_dbus_service(interface, connection, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        DBUS_TASK
    }

    fn priority(&self) -> i32 {
        8
    }

    fn is_critical(&self) -> bool {
        true
    }
}

async fn run_dbus_service(
    interface: DBusInterface,
    connection: Connection,
    cancel_token: CancellationToken,
) -> Result<()> {
    connection.object_server().at(OBJECT_PATH, interface).await?;
    connection.request_name(BUS_NAME).await?;
    info!("D-Bus interface published as {BUS_NAME}");

    cancel_token.cancelled().await;

    connection
        .object_server()
        .remove::<DBusInterface, _>(OBJECT_PATH)
        .await?;
    connection.release_name(BUS_NAME).await?;
    info!("D-Bus service cancelled");
    Ok(())
}
