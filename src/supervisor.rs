//! Process-wide lifecycle: device discovery, per-device start/stop, system
//! services and the main event loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;

use crate::device::Device;
use crate::drivers::DeviceDriver;
use crate::event::Event;
use crate::providers::ServiceProvider;
use crate::runtime::Runtime;
use crate::task_manager::TaskManager;

/// Running devices keyed by serial.
pub type Devices = Arc<Mutex<BTreeMap<String, Device>>>;

/// Finds attached hardware and opens a driver per device.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceFactory: Send + Sync {
    async fn discover(&self) -> Vec<Arc<dyn DeviceDriver>>;
}

/// Every discovered device failed to start.
#[derive(Error, Debug)]
#[error("all {failed} discovered device(s) failed to start")]
pub struct NoDeviceStarted {
    pub failed: usize,
}

pub struct Supervisor {
    runtime: Runtime,
    factory: Arc<dyn DeviceFactory>,
    devices: Devices,
    task_manager: TaskManager,
    service_providers: Vec<Box<dyn ServiceProvider>>,
    suspended: bool,
    /// When the main loop restarts devices after a resume signal.
    resume_at: Option<Instant>,
}

impl Supervisor {
    pub fn new(runtime: Runtime, factory: Arc<dyn DeviceFactory>) -> Self {
        Self {
            runtime,
            factory,
            devices: Arc::new(Mutex::new(BTreeMap::new())),
            task_manager: TaskManager::new(),
            service_providers: Vec::new(),
            suspended: false,
            resume_at: None,
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Shared handle on the running devices for control surfaces.
    pub fn devices(&self) -> Devices {
        self.devices.clone()
    }

    /// Registers a system service. Services start in priority order.
    pub fn add_service(&mut self, provider: Box<dyn ServiceProvider>) {
        self.service_providers.push(provider);
        self.service_providers
            .sort_by_key(|p| std::cmp::Reverse(p.priority()));
    }

    pub fn registered_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }

    /// Discovers devices and starts each one on its own. A failing device is
    /// logged and skipped. Returns the number of devices now running.
    pub async fn start_devices(&mut self) -> Result<usize> {
        let drivers = self.factory.discover().await;
        if drivers.is_empty() {
            warn!("No supported devices found");
            return Ok(0);
        }
        info!("Discovered {} device(s)", drivers.len());

        let mut failed = 0;
        let mut devices = self.devices.lock().await;
        for driver in drivers {
            let serial = driver.serial().to_string();
            if devices.contains_key(&serial) {
                debug!("{serial}: already running");
                driver.close().await;
                continue;
            }
            match Device::start(driver, self.runtime.clone()).await {
                Ok(device) => {
                    info!("{serial}: started");
                    devices.insert(serial, device);
                }
                Err(e) => {
                    error!("{serial}: {e:#}");
                    failed += 1;
                }
            }
        }
        if devices.is_empty() && failed > 0 {
            return Err(NoDeviceStarted { failed }.into());
        }
        Ok(devices.len())
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start successfully, while non-critical services
    /// can fail without stopping the system.
    pub async fn start_all_services(&mut self) -> Result<()> {
        info!(
            "Starting {} services in priority order...",
            self.service_providers.len()
        );

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => {
                    info!(
                        "Service '{}' started (priority: {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        is_critical
                    );
                }
                Err(e) if is_critical => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => {
                    warn!("Non-critical service '{}' failed to start: {}", provider.name(), e);
                }
            }
        }
        Ok(())
    }

    /// Stops every device gracefully before the host sleeps. Drops a resume
    /// that is still waiting for its delay.
    pub async fn suspend(&mut self) {
        if self.resume_at.take().is_some() {
            debug!("Pending resume cancelled");
        }
        if self.suspended {
            return;
        }
        info!("Suspending: stopping all devices");
        self.stop_devices().await;
        self.suspended = true;
    }

    /// Waits the resume delay, then re-enumerates and restarts devices.
    pub async fn resume(&mut self) -> Result<usize> {
        if !self.suspended {
            debug!("Resume without suspend ignored");
            return Ok(self.devices.lock().await.len());
        }
        let delay = self.runtime.options.resume_delay;
        info!("Resuming in {} ms", delay.as_millis());
        tokio::time::sleep(delay).await;
        self.finish_resume().await
    }

    /// Arms the resume deadline serviced by the main loop.
    fn schedule_resume(&mut self) {
        if !self.suspended {
            debug!("Resume without suspend ignored");
            return;
        }
        let delay = self.runtime.options.resume_delay;
        info!("Resuming in {} ms", delay.as_millis());
        self.resume_at = Some(Instant::now() + delay);
    }

    async fn finish_resume(&mut self) -> Result<usize> {
        self.resume_at = None;
        self.suspended = false;
        self.start_devices().await
    }

    async fn stop_devices(&mut self) {
        let mut devices = std::mem::take(&mut *self.devices.lock().await);
        for device in devices.values_mut() {
            device.stop().await;
        }
    }

    /// Rebuilds the LED producer of one device after its catalog changed.
    pub async fn restart_rgb(&self, serial: &str) {
        let mut devices = self.devices.lock().await;
        match devices.get_mut(serial) {
            Some(device) => {
                info!("{serial}: RGB catalog changed, restarting RGB engine");
                if let Err(e) = device.restart_rgb().await {
                    error!("{serial}: {e:#}");
                }
            }
            None => debug!("{serial}: catalog changed for a device that is not running"),
        }
    }

    /// Main event loop: signals and bus events until shutdown.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut event_rx = self.runtime.event_bus.subscribe();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        info!("Starting main event loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        bail!("Failed to listen for shutdown signal: {}", e);
                    }
                    info!("Received Ctrl+C, initiating graceful shutdown...");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown...");
                    break;
                }
                event = event_rx.recv() => {
                    if !self.handle_event(event).await? {
                        break;
                    }
                }
                () = tokio::time::sleep_until(self.resume_at.unwrap_or_else(Instant::now)),
                    if self.resume_at.is_some() =>
                {
                    if let Err(e) = self.finish_resume().await {
                        error!("Resume failed: {e:#}");
                    }
                }
            }
        }

        self.shutdown().await;
        info!("Main event loop terminated");
        Ok(())
    }

    /// Returns `false` when the loop should end.
    async fn handle_event(
        &mut self,
        event_result: Result<Event, broadcast::error::RecvError>,
    ) -> Result<bool> {
        match event_result {
            Ok(Event::Suspend) => self.suspend().await,
            Ok(Event::Resume) => self.schedule_resume(),
            Ok(Event::RgbCatalogChanged(serial)) => self.restart_rgb(&serial).await,
            Ok(Event::SystemShutdown) => {
                info!("Processing SystemShutdown event");
                return Ok(false);
            }
            Ok(Event::NexusKey { serial, action }) => debug!("{serial}: key {action}"),
            Ok(event) => debug!("Received event: {event:?}"),
            Err(broadcast::error::RecvError::Closed) => {
                bail!("Event bus channel closed unexpectedly");
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event bus lagged by {n} messages");
            }
        }
        Ok(true)
    }

    /// Stops devices, then services.
    pub async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");
        self.stop_devices().await;
        if let Err(e) = self.task_manager.shutdown_all().await {
            error!("Error during task shutdown: {}", e);
        }
        info!("Shutdown complete");
    }
}
