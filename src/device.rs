//! One attached device: driver, profile and the set of workers running on it.
//!
//! [`Device::start`] and [`Device::stop`] follow a fixed order. Workers are
//! spawned through a per-device [`TaskManager`], so restarting one engine
//! never touches the others.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::sync::RwLock;

use crate::descriptor::DeviceDescriptor;
use crate::drivers::{ColorMode, DeviceDriver, DeviceSetting};
use crate::error::{ConfigError, Status, ValidationError};
use crate::event::Event;
use crate::lcd::engine::{LCD_TASK, LcdServiceProvider};
use crate::profile::{DeviceProfile, HeadsetSettings, LcdMode, ValidationContext};
use crate::providers::control::{CONTROL_TASK, ControlServiceProvider};
use crate::providers::input::{INPUT_TASK, InputServiceProvider};
use crate::providers::telemetry::{self, TELEMETRY_TASK, TelemetryServiceProvider};
use crate::providers::traits::ServiceProvider;
use crate::registry::DeviceSnapshot;
use crate::rgb::engine::{ExternalFrames, ExternalReceiver, RGB_TASK, RgbServiceProvider, RgbSetup};
use crate::runtime::Runtime;
use crate::state::{Channel, DeviceShared};
use crate::store::ProfileStore;
use crate::task_manager::TaskManager;

/// Stop order of the workers.
const STOP_ORDER: [&str; 5] = [RGB_TASK, LCD_TASK, CONTROL_TASK, TELEMETRY_TASK, INPUT_TASK];

/// Everything a worker needs to know about its device.
#[derive(Clone)]
pub struct DeviceContext {
    pub serial: String,
    pub driver: Arc<dyn DeviceDriver>,
    pub shared: Arc<DeviceShared>,
    pub runtime: Runtime,
    pub channels: Arc<[Channel]>,
    /// Readers clone what they need and drop the guard before any I/O.
    pub profile: Arc<RwLock<DeviceProfile>>,
}

impl DeviceContext {
    pub fn new(driver: Arc<dyn DeviceDriver>, runtime: Runtime, profile: DeviceProfile) -> Self {
        let channels: Arc<[Channel]> = Channel::from_descriptor(driver.descriptor()).into();
        Self {
            serial: driver.serial().to_string(),
            shared: Arc::new(DeviceShared::new(channels.len())),
            driver,
            runtime,
            channels,
            profile: Arc::new(RwLock::new(profile)),
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        self.driver.descriptor()
    }
}

pub struct Device {
    ctx: DeviceContext,
    tasks: TaskManager,
    external: ExternalFrames,
    external_rx: ExternalReceiver,
}

impl Device {
    /// Brings a device up: firmware probe, profile, first telemetry read,
    /// directory registration, then the workers.
    ///
    /// The driver is closed again when the device cannot be started.
    pub async fn start(driver: Arc<dyn DeviceDriver>, runtime: Runtime) -> Result<Self> {
        let serial = driver.serial().to_string();
        let firmware = match driver.firmware().await {
            Ok(firmware) => firmware,
            Err(e) => {
                driver.close().await;
                return Err(e).with_context(|| format!("{serial}: firmware probe failed"));
            }
        };
        info!("{serial}: {} firmware {firmware}", driver.descriptor().name);

        let store = runtime.profiles();
        if let Err(e) = store.list(&serial) {
            error!("{serial}: {e}");
            driver.close().await;
            return Err(e.into());
        }
        let channels = Channel::from_descriptor(driver.descriptor());
        let profile = load_profile(&store, &serial, driver.descriptor(), &channels);

        let ctx = DeviceContext::new(driver, runtime, profile);
        ctx.shared.state.write().await.firmware = firmware.clone();
        if let Err(e) = telemetry::poll_once(&ctx).await {
            warn!("{serial}: first telemetry read failed: {e}");
        }

        let mut snapshot = DeviceSnapshot::new(
            &serial,
            &ctx.descriptor().name,
            ctx.descriptor().family,
            &ctx.channels,
        );
        snapshot.firmware = firmware;
        snapshot.refresh(
            &*ctx.shared.state.read().await,
            ctx.runtime.options.temperature_unit,
        );
        ctx.runtime.directory.register(snapshot);
        ctx.runtime
            .event_bus
            .notify(Event::DeviceAttached(serial.clone()));

        let (external, external_rx) = ExternalFrames::channel();
        let mut device = Self {
            ctx,
            tasks: TaskManager::new(),
            external,
            external_rx,
        };
        if let Err(e) = device.start_workers().await {
            device.stop_dirty().await;
            return Err(e);
        }
        device.apply_stored_settings().await;
        Ok(device)
    }

    async fn start_workers(&mut self) -> Result<()> {
        TelemetryServiceProvider::new(self.ctx.clone())
            .start(&mut self.tasks)
            .await?;

        let has_actuators = self.ctx.channels.iter().any(Channel::is_actuator);
        if self.ctx.runtime.options.manual {
            info!("{}: manual mode, control loop not started", self.ctx.serial);
        } else if has_actuators {
            ControlServiceProvider::new(self.ctx.clone())
                .start(&mut self.tasks)
                .await?;
        }

        if self.has_leds() {
            if let Err(e) = self.ctx.driver.set_color_mode(ColorMode::Software).await {
                warn!("{}: software colour mode not set: {e}", self.ctx.serial);
            }
            self.start_rgb().await?;
        }
        self.start_lcd().await?;

        if self.ctx.driver.has_input() {
            InputServiceProvider::new(self.ctx.clone())
                .start(&mut self.tasks)
                .await?;
        }
        debug!(
            "{}: {} worker(s) running",
            self.ctx.serial,
            self.tasks.active_count()
        );
        Ok(())
    }

    async fn start_rgb(&mut self) -> Result<()> {
        if !self.has_leds() {
            return Ok(());
        }
        let catalog = self.ctx.runtime.rgb_catalogs().load(&self.ctx.serial);
        let setup = {
            let profile = self.ctx.profile.read().await;
            RgbSetup::resolve(&profile, &self.ctx.channels, &catalog)
        };
        RgbServiceProvider::new(self.ctx.clone(), setup, self.external_rx.clone())
            .start(&mut self.tasks)
            .await
    }

    async fn start_lcd(&mut self) -> Result<()> {
        if self.ctx.descriptor().lcd.is_none() {
            return Ok(());
        }
        let settings = self.ctx.profile.read().await.lcd.clone();
        LcdServiceProvider::new(self.ctx.clone(), settings)
            .start(&mut self.tasks)
            .await
    }

    /// Replaces the running LED producer with one built from the current
    /// profile and catalog.
    pub async fn restart_rgb(&mut self) -> Result<()> {
        if self.ctx.shared.is_exiting() {
            return Ok(());
        }
        self.tasks.stop_task(RGB_TASK).await?;
        self.start_rgb().await
    }

    pub async fn restart_lcd(&mut self) -> Result<()> {
        if self.ctx.shared.is_exiting() {
            return Ok(());
        }
        self.tasks.stop_task(LCD_TASK).await?;
        self.start_lcd().await
    }

    /// Pushes the headset and mouse settings kept in the profile.
    async fn apply_stored_settings(&self) {
        let settings = {
            let profile = self.ctx.profile.read().await;
            let mut settings = Vec::new();
            if let Some(h) = &profile.headset {
                settings.push(DeviceSetting::Sidetone(h.sidetone));
                settings.push(DeviceSetting::SleepMinutes(h.sleep_minutes));
            }
            if let Some(eq) = profile.equalizer {
                settings.push(DeviceSetting::Equalizer(eq));
            }
            if let Some(dpi) = &profile.dpi {
                settings.push(DeviceSetting::Dpi {
                    stages: dpi.stages.clone(),
                    active: dpi.active,
                });
            }
            settings
        };
        for setting in &settings {
            self.configure(setting).await;
        }
    }

    async fn configure(&self, setting: &DeviceSetting) {
        if let Err(e) = self.ctx.driver.configure(setting).await {
            warn!("{}: {setting:?} not applied: {e}", self.ctx.serial);
        }
    }

    /// Graceful stop. Only the first call does anything.
    pub async fn stop(&mut self) {
        if !self.ctx.shared.begin_exit() {
            return;
        }
        info!("{}: stopping", self.ctx.serial);
        for name in STOP_ORDER {
            if let Err(e) = self.tasks.stop_task(name).await {
                warn!("{}: {e:#}", self.ctx.serial);
            }
        }
        if self.has_leds()
            && let Err(e) = self.ctx.driver.set_color_mode(ColorMode::Hardware).await
        {
            warn!("{}: hardware colour mode not restored: {e}", self.ctx.serial);
        }
        if self.ctx.descriptor().lcd.is_some()
            && let Err(e) = self.ctx.driver.lcd_to_hardware().await
        {
            warn!("{}: LCD not handed back: {e}", self.ctx.serial);
        }
        self.ctx.driver.close().await;
        self.detach();
    }

    /// Fast exit: cancels the workers without waiting and closes the handle.
    pub async fn stop_dirty(&mut self) {
        if !self.ctx.shared.begin_exit() {
            return;
        }
        for name in STOP_ORDER {
            self.tasks.cancel_task(name);
        }
        self.ctx.driver.close().await;
        self.detach();
    }

    fn detach(&self) {
        self.ctx.runtime.directory.remove(&self.ctx.serial);
        self.ctx
            .runtime
            .event_bus
            .notify(Event::DeviceDetached(self.ctx.serial.clone()));
        info!("{}: detached", self.ctx.serial);
    }

    pub fn serial(&self) -> &str {
        &self.ctx.serial
    }

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn is_running(&self, task: &str) -> bool {
        self.tasks.is_running(task)
    }

    pub async fn profile(&self) -> DeviceProfile {
        self.ctx.profile.read().await.clone()
    }

    /// Queues a raw frame from an external writer.
    pub fn submit_frame(&self, frame: Vec<u8>) -> bool {
        self.external.submit(frame)
    }

    fn has_leds(&self) -> bool {
        self.ctx.descriptor().total_leds() > 0
    }

    /// Validates and applies one profile change, then persists the profile.
    async fn mutate<F>(&self, what: &str, f: F) -> Status
    where
        F: FnOnce(&mut DeviceProfile) -> Result<(), ValidationError>,
    {
        let snapshot = {
            let mut profile = self.ctx.profile.write().await;
            if let Err(e) = f(&mut profile) {
                debug!("{}: {what} rejected: {e}", self.ctx.serial);
                return Status::from(&e);
            }
            profile.clone()
        };
        if let Err(e) = self.ctx.runtime.profiles().save(&self.ctx.serial, &snapshot) {
            error!("{}: profile not saved: {e}", self.ctx.serial);
        }
        debug!("{}: {what} applied", self.ctx.serial);
        Status::Applied
    }

    async fn restart_rgb_logged(&mut self) {
        if let Err(e) = self.restart_rgb().await {
            error!("{}: RGB engine restart failed: {e:#}", self.ctx.serial);
        }
    }

    async fn restart_lcd_logged(&mut self) {
        if let Err(e) = self.restart_lcd().await {
            error!("{}: LCD engine restart failed: {e:#}", self.ctx.serial);
        }
    }

    pub async fn set_brightness(&mut self, value: i32) -> Status {
        let status = self.mutate("brightness", |p| p.set_brightness(value)).await;
        if status == Status::Applied {
            self.restart_rgb_logged().await;
        }
        status
    }

    /// Scheduler override of the brightness slider.
    pub async fn override_brightness(&mut self, value: i32) -> Status {
        let status = self
            .mutate("brightness override", |p| p.override_brightness(value))
            .await;
        if status == Status::Applied {
            self.restart_rgb_logged().await;
        }
        status
    }

    pub async fn restore_brightness(&mut self) -> Status {
        let status = self
            .mutate("brightness restore", |p| {
                if p.restore_brightness() {
                    Ok(())
                } else {
                    Err(ValidationError::Unsupported("brightness restore without override"))
                }
            })
            .await;
        if status == Status::Applied {
            self.restart_rgb_logged().await;
        }
        status
    }

    /// The control loop picks the new profile up on its next tick.
    pub async fn set_speed_profile(&mut self, channel: u8, name: &str) -> Status {
        let descriptor = self.ctx.descriptor();
        let directory = self.ctx.runtime.directory.clone();
        let probe = move |serial: &str, channel: u8| directory.has_probe(serial, channel);
        let validation = ValidationContext {
            channels: &self.ctx.channels,
            has_pump: descriptor.has_pump(),
            psu: descriptor.psu,
            speed_profiles: &self.ctx.runtime.speed_profiles,
            probe: &probe,
        };
        self.mutate("speed profile", |p| p.set_speed_profile(channel, name, &validation))
            .await
    }

    pub async fn set_rgb_profile(&mut self, channel: u8, name: &str) -> Status {
        let catalog = self.ctx.runtime.rgb_catalogs().load(&self.ctx.serial);
        let channels = self.ctx.channels.clone();
        let status = self
            .mutate("rgb profile", |p| p.set_rgb_profile(channel, name, &channels, &catalog))
            .await;
        if status == Status::Applied {
            self.restart_rgb_logged().await;
        }
        status
    }

    pub async fn set_label(&mut self, channel: u8, label: &str) -> Status {
        let channels = self.ctx.channels.clone();
        self.mutate("label", |p| p.set_label(channel, label, &channels))
            .await
    }

    fn require_lcd(&self) -> Result<(), ValidationError> {
        match self.ctx.descriptor().lcd {
            Some(_) => Ok(()),
            None => Err(ValidationError::Unsupported("lcd")),
        }
    }

    pub async fn set_lcd_mode(&mut self, mode: LcdMode) -> Status {
        let lcd = self.require_lcd();
        let status = self
            .mutate("lcd mode", |p| {
                lcd?;
                p.set_lcd_mode(mode);
                Ok(())
            })
            .await;
        if status == Status::Applied {
            self.restart_lcd_logged().await;
        }
        status
    }

    pub async fn set_lcd_rotation(&mut self, degrees: u16) -> Status {
        let lcd = self.require_lcd();
        let status = self
            .mutate("lcd rotation", |p| {
                lcd?;
                p.set_lcd_rotation(degrees)
            })
            .await;
        if status == Status::Applied {
            self.restart_lcd_logged().await;
        }
        status
    }

    /// Selects an animation under `lcd/images`. The file must exist.
    pub async fn set_lcd_image(&mut self, image: &str) -> Status {
        let lcd = self.require_lcd();
        let exists = self.ctx.runtime.lcd_image(image).is_file();
        let status = self
            .mutate("lcd image", |p| {
                lcd?;
                if !exists {
                    return Err(ValidationError::UnknownProfile(image.to_string()));
                }
                p.set_lcd_image(image);
                Ok(())
            })
            .await;
        if status == Status::Applied {
            self.restart_lcd_logged().await;
        }
        status
    }

    pub async fn set_sidetone(&mut self, value: i32) -> Status {
        let status = self.mutate("sidetone", |p| p.set_sidetone(value)).await;
        if status == Status::Applied {
            self.push_headset(|h| DeviceSetting::Sidetone(h.sidetone))
                .await;
        }
        status
    }

    pub async fn set_sleep_minutes(&mut self, value: i32) -> Status {
        let status = self
            .mutate("sleep timer", |p| p.set_sleep_minutes(value))
            .await;
        if status == Status::Applied {
            self.push_headset(|h| DeviceSetting::SleepMinutes(h.sleep_minutes))
                .await;
        }
        status
    }

    /// Turns the mute indicator override off (`disabled`) or back on.
    pub async fn set_mic_indicator(&mut self, disabled: bool) -> Status {
        let status = self
            .mutate("mic indicator", |p| p.set_mic_indicator(disabled))
            .await;
        if status == Status::Applied {
            self.restart_rgb_logged().await;
        }
        status
    }

    pub async fn set_equalizer(&mut self, bands: &[i32]) -> Status {
        let status = self.mutate("equalizer", |p| p.set_equalizer(bands)).await;
        if status == Status::Applied
            && let Some(eq) = self.ctx.profile.read().await.equalizer
        {
            self.configure(&DeviceSetting::Equalizer(eq)).await;
        }
        status
    }

    pub async fn set_dpi_stages(&mut self, stages: &[i32]) -> Status {
        let status = self.mutate("dpi stages", |p| p.set_dpi_stages(stages)).await;
        if status == Status::Applied {
            let dpi = self.ctx.profile.read().await.dpi.clone();
            if let Some(dpi) = dpi {
                self.configure(&DeviceSetting::Dpi {
                    stages: dpi.stages,
                    active: dpi.active,
                })
                .await;
            }
        }
        status
    }

    async fn push_headset<F>(&self, f: F)
    where
        F: FnOnce(&HeadsetSettings) -> DeviceSetting,
    {
        let setting = self.ctx.profile.read().await.headset.as_ref().map(f);
        if let Some(setting) = setting {
            self.configure(&setting).await;
        }
    }

    /// Saves the active profile as `profiles/<serial>-<name>.json`.
    pub async fn save_preset(&self, name: &str) -> Status {
        if name.trim().is_empty() {
            return Status::Rejected;
        }
        let profile = self.profile().await;
        match self
            .ctx
            .runtime
            .profiles()
            .save_named(&self.ctx.serial, name, &profile)
        {
            Ok(()) => {
                info!("{}: preset '{name}' saved", self.ctx.serial);
                Status::Applied
            }
            Err(e) => {
                error!("{}: preset '{name}' not saved: {e}", self.ctx.serial);
                Status::Rejected
            }
        }
    }

    /// Makes a saved preset the active profile and restarts the engines.
    pub async fn load_preset(&mut self, name: &str) -> Status {
        let preset = match self
            .ctx
            .runtime
            .profiles()
            .load_named(&self.ctx.serial, name)
        {
            Ok(preset) => preset,
            Err(e) => {
                warn!("{}: preset '{name}': {e}", self.ctx.serial);
                return Status::Rejected;
            }
        };
        let status = self
            .mutate("preset", |p| {
                *p = preset;
                Ok(())
            })
            .await;
        self.restart_rgb_logged().await;
        self.restart_lcd_logged().await;
        self.apply_stored_settings().await;
        status
    }

    pub fn delete_preset(&self, name: &str) -> Status {
        match self.ctx.runtime.profiles().delete(&self.ctx.serial, name) {
            Ok(()) => Status::Applied,
            Err(e) => {
                warn!("{}: preset '{name}': {e}", self.ctx.serial);
                Status::Rejected
            }
        }
    }

    pub fn presets(&self) -> Vec<String> {
        self.ctx
            .runtime
            .profiles()
            .list(&self.ctx.serial)
            .unwrap_or_else(|e| {
                warn!("{}: {e}", self.ctx.serial);
                Vec::new()
            })
    }
}

/// Loads the stored profile. A missing file is replaced by a default that is
/// saved right away; an unreadable one by a default that is not.
fn load_profile(
    store: &ProfileStore<DeviceProfile>,
    serial: &str,
    descriptor: &DeviceDescriptor,
    channels: &[Channel],
) -> DeviceProfile {
    match store.try_load(serial) {
        Ok(profile) => profile,
        Err(ConfigError::MissingFile(_)) => {
            info!("{serial}: no profile stored, creating default");
            let profile = DeviceProfile::default_for(descriptor.family, channels);
            if let Err(e) = store.save(serial, &profile) {
                error!("{serial}: default profile not saved: {e}");
            }
            profile
        }
        Err(e) => {
            warn!("{serial}: {e}, using default profile");
            DeviceProfile::default_for(descriptor.family, channels)
        }
    }
}
