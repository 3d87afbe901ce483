//! D-Bus control surface.
//!
//! Every mutation addresses a device by serial and answers with a status
//! code: 0 rejected, 1 applied, 2 precondition failed, 3 unknown probe.

use log::{debug, info};
use zbus::{interface, object_server::SignalEmitter};

use crate::error::Status;
use crate::event::{Event, EventBus};
use crate::profile::LcdMode;
use crate::registry::DeviceDirectory;
use crate::supervisor::Devices;

pub const BUS_NAME: &str = "io.github.linkhubd";
pub const OBJECT_PATH: &str = "/io/github/linkhubd";

pub struct DBusInterface {
    pub devices: Devices,
    pub directory: DeviceDirectory,
    pub event_bus: EventBus,
    pub version: String,
}

macro_rules! on_device {
    ($self:ident, $serial:expr, |$device:ident| $call:expr) => {{
        let mut devices = $self.devices.lock().await;
        match devices.get_mut(&$serial) {
            Some($device) => Status::from($call).code(),
            None => {
                debug!("D-Bus call for unknown device {}", $serial);
                Status::Rejected.code()
            }
        }
    }};
}

#[interface(name = "io.github.linkhubd1")]
impl DBusInterface {
    #[zbus(signal)]
    async fn stopped(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    async fn stop(
        &self,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> zbus::fdo::Result<()> {
        emitter.stopped().await?;
        info!("Shutdown requested over D-Bus");
        self.event_bus.notify(Event::SystemShutdown);
        Ok(())
    }

    async fn devices(&self) -> Vec<String> {
        self.directory.serials()
    }

    /// `(id, name, rpm, rendered temperature)` per channel.
    async fn channels(&self, serial: String) -> Vec<(u8, String, u16, String)> {
        self.directory
            .get(&serial)
            .map(|snapshot| {
                snapshot
                    .channels
                    .into_iter()
                    .map(|c| (c.id, c.name, c.rpm, c.rendered.unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn firmware(&self, serial: String) -> String {
        self.directory
            .get(&serial)
            .map(|s| s.firmware)
            .unwrap_or_default()
    }

    async fn battery(&self, serial: String) -> i32 {
        self.directory
            .get(&serial)
            .and_then(|s| s.battery)
            .map_or(-1, i32::from)
    }

    async fn set_brightness(&self, serial: String, value: i32) -> u8 {
        on_device!(self, serial, |d| d.set_brightness(value).await)
    }

    async fn override_brightness(&self, serial: String, value: i32) -> u8 {
        on_device!(self, serial, |d| d.override_brightness(value).await)
    }

    async fn restore_brightness(&self, serial: String) -> u8 {
        on_device!(self, serial, |d| d.restore_brightness().await)
    }

    async fn set_speed_profile(&self, serial: String, channel: u8, profile: String) -> u8 {
        on_device!(self, serial, |d| d.set_speed_profile(channel, &profile).await)
    }

    async fn set_rgb_profile(&self, serial: String, channel: u8, profile: String) -> u8 {
        on_device!(self, serial, |d| d.set_rgb_profile(channel, &profile).await)
    }

    async fn set_label(&self, serial: String, channel: u8, label: String) -> u8 {
        on_device!(self, serial, |d| d.set_label(channel, &label).await)
    }

    /// Mode names are kebab-case: `liquid`, `double-arc`, `off`, ...
    async fn set_lcd_mode(&self, serial: String, mode: String) -> u8 {
        let Some(mode) = parse_lcd_mode(&mode) else {
            return Status::Rejected.code();
        };
        on_device!(self, serial, |d| d.set_lcd_mode(mode).await)
    }

    async fn set_lcd_rotation(&self, serial: String, degrees: u16) -> u8 {
        on_device!(self, serial, |d| d.set_lcd_rotation(degrees).await)
    }

    async fn set_lcd_image(&self, serial: String, image: String) -> u8 {
        on_device!(self, serial, |d| d.set_lcd_image(&image).await)
    }

    async fn set_sidetone(&self, serial: String, value: i32) -> u8 {
        on_device!(self, serial, |d| d.set_sidetone(value).await)
    }

    async fn set_sleep_minutes(&self, serial: String, minutes: i32) -> u8 {
        on_device!(self, serial, |d| d.set_sleep_minutes(minutes).await)
    }

    async fn set_mic_indicator(&self, serial: String, disabled: bool) -> u8 {
        on_device!(self, serial, |d| d.set_mic_indicator(disabled).await)
    }

    async fn set_equalizer(&self, serial: String, bands: Vec<i32>) -> u8 {
        on_device!(self, serial, |d| d.set_equalizer(&bands).await)
    }

    async fn set_dpi_stages(&self, serial: String, stages: Vec<i32>) -> u8 {
        on_device!(self, serial, |d| d.set_dpi_stages(&stages).await)
    }

    async fn save_preset(&self, serial: String, name: String) -> u8 {
        on_device!(self, serial, |d| d.save_preset(&name).await)
    }

    async fn load_preset(&self, serial: String, name: String) -> u8 {
        on_device!(self, serial, |d| d.load_preset(&name).await)
    }

    async fn delete_preset(&self, serial: String, name: String) -> u8 {
        on_device!(self, serial, |d| d.delete_preset(&name))
    }

    async fn presets(&self, serial: String) -> Vec<String> {
        let devices = self.devices.lock().await;
        devices.get(&serial).map(|d| d.presets()).unwrap_or_default()
    }

    /// Raw RGB bytes from an external producer. `false` when the device is
    /// unknown or the frame was refused.
    async fn submit_frame(&self, serial: String, frame: Vec<u8>) -> bool {
        let devices = self.devices.lock().await;
        devices.get(&serial).is_some_and(|d| d.submit_frame(frame))
    }

    #[zbus(property)]
    async fn version(&self) -> String {
        self.version.clone()
    }
}

fn parse_lcd_mode(name: &str) -> Option<LcdMode> {
    serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor;
    use crate::device::Device;
    use crate::drivers::testing::FrameRecorder;
    use crate::runtime::tests::test_runtime;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    async fn interface(root: &TempDir) -> DBusInterface {
        let runtime = test_runtime(root.path(), 40.0, 40.0);
        let driver = Arc::new(FrameRecorder::new(descriptor::platinum(0x0c18, "P")));
        let device = Device::start(driver, runtime.clone()).await.unwrap();
        let mut devices = BTreeMap::new();
        devices.insert("REC".to_string(), device);
        DBusInterface {
            devices: Arc::new(Mutex::new(devices)),
            directory: runtime.directory.clone(),
            event_bus: runtime.event_bus.clone(),
            version: "test".into(),
        }
    }

    async fn stop_all(iface: &DBusInterface) {
        for device in iface.devices.lock().await.values_mut() {
            device.stop().await;
        }
    }

    #[test]
    fn lcd_modes_use_kebab_case() {
        assert_eq!(parse_lcd_mode("double-arc"), Some(LcdMode::DoubleArc));
        assert_eq!(parse_lcd_mode("liquid"), Some(LcdMode::Liquid));
        assert_eq!(parse_lcd_mode("DoubleArc"), None);
    }

    #[tokio::test]
    async fn calls_answer_with_status_codes() {
        let root = TempDir::new().unwrap();
        let iface = interface(&root).await;

        assert_eq!(iface.devices().await, vec!["REC".to_string()]);
        assert_eq!(iface.firmware("REC".into()).await, "1.0.0");
        assert_eq!(iface.channels("REC".into()).await.len(), 3);

        assert_eq!(iface.set_brightness("REC".into(), 40).await, 1);
        assert_eq!(iface.set_brightness("REC".into(), 101).await, 0);
        assert_eq!(iface.set_brightness("NOPE".into(), 40).await, 0);
        assert_eq!(iface.set_speed_profile("REC".into(), 1, "Liquid".into()).await, 1);
        assert_eq!(iface.set_speed_profile("REC".into(), 1, "Nope".into()).await, 0);
        // Platinum has no LCD
        assert_eq!(iface.set_lcd_mode("REC".into(), "arc".into()).await, 0);
        assert_eq!(iface.set_lcd_mode("REC".into(), "bogus".into()).await, 0);

        assert_eq!(iface.save_preset("REC".into(), "night".into()).await, 1);
        assert_eq!(iface.presets("REC".into()).await, vec!["night".to_string()]);
        assert_eq!(iface.delete_preset("REC".into(), "night".into()).await, 1);

        assert!(!iface.submit_frame("NOPE".into(), vec![0; 72]).await);
        assert_eq!(iface.battery("REC".into()).await, -1);
        stop_all(&iface).await;
    }
}
