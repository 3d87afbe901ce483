use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::device::DeviceContext;
use crate::drivers::Actuation;
use crate::error::{DeviceError, DeviceResult, TransportError};
use crate::profile::SpeedProfile;
use crate::profile::device::DEFAULT_SPEED_PROFILE;
use crate::providers::traits::ServiceProvider;
use crate::task_manager::TaskManager;

pub const CONTROL_TASK: &str = "control";

/// Temperature to duty control loop of one device.
pub struct ControlServiceProvider {
    ctx: DeviceContext,
}

impl ControlServiceProvider {
    pub fn new(ctx: DeviceContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ServiceProvider for ControlServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let ctx = self.ctx.clone();
        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_control_service(ctx, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        CONTROL_TASK
    }

    fn priority(&self) -> i32 {
        8
    }
}

async fn run_control_service(ctx: DeviceContext, cancel_token: CancellationToken) -> Result<()> {
    let mut interval = interval(ctx.driver.descriptor().control_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut control = ControlLoop::default();

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!("{}: control loop cancelled", ctx.serial);
                break;
            }
            _instant = interval.tick() => {
                if ctx.shared.is_exiting() {
                    continue;
                }
                match control.tick(&ctx).await {
                    Ok(0) => {}
                    Ok(n) => debug!("{}: {n} actuation(s) sent", ctx.serial),
                    Err(DeviceError::Transport(TransportError::ClosedHandle)) => break,
                    Err(e) => warn!("{}: actuation failed: {e}", ctx.serial),
                }
            }
        }
    }
    Ok(())
}

/// Change detection state. A fresh loop re-emits every channel, which is
/// what a resumed device needs.
#[derive(Debug, Default)]
pub struct ControlLoop {
    keys: HashMap<u8, String>,
    fallback_logged: HashSet<u8>,
}

impl ControlLoop {
    /// Evaluates every actuator channel and sends what changed in one
    /// critical section. Returns the number of actuations sent.
    pub async fn tick(&mut self, ctx: &DeviceContext) -> DeviceResult<usize> {
        let assigned: Vec<(u8, String)> = {
            let profile = ctx.profile.read().await;
            ctx.channels
                .iter()
                .filter(|c| c.is_actuator())
                .map(|c| (c.id, profile.speed_profile(c.id).to_string()))
                .collect()
        };
        let liquid = ctx.shared.state.read().await.liquid_temperature;

        let mut actuations = Vec::new();
        let mut pending = Vec::new();
        for (id, name) in assigned {
            let Some(channel) = ctx.channels.iter().find(|c| c.id == id) else {
                continue;
            };
            let Some((name, profile)) = self.resolve(ctx, id, &name) else {
                continue;
            };
            let temp = ctx.runtime.read_sensor(&profile.sensor, liquid).await;
            let duty = profile.duty_for(temp, channel.kind, channel.contains_pump);
            let key = format!("{name}-{id}-{duty}");
            if self.keys.get(&id) == Some(&key) {
                continue;
            }
            debug!("{}: channel {id} {name} at {temp:.1} °C -> {duty}%", ctx.serial);
            actuations.push(Actuation {
                channel: id,
                kind: channel.kind,
                hw_index: channel.hw_index,
                duty,
            });
            pending.push((id, key));
        }

        if actuations.is_empty() {
            return Ok(0);
        }
        ctx.driver.actuate(&actuations).await?;

        let mut state = ctx.shared.state.write().await;
        for a in &actuations {
            if let Some(reading) = state.channels.get_mut(usize::from(a.channel)) {
                reading.duty = Some(a.duty);
            }
        }
        self.keys.extend(pending);
        Ok(actuations.len())
    }

    /// Forgets every change key so the next tick re-emits all channels.
    pub fn reset(&mut self) {
        self.keys.clear();
    }

    fn resolve<'a>(
        &mut self,
        ctx: &'a DeviceContext,
        channel: u8,
        name: &str,
    ) -> Option<(String, &'a SpeedProfile)> {
        if let Some(profile) = ctx.runtime.speed_profiles.get(name) {
            return Some((name.to_string(), profile));
        }
        if self.fallback_logged.insert(channel) {
            info!(
                "{}: speed profile '{name}' of channel {channel} not found, using '{DEFAULT_SPEED_PROFILE}'",
                ctx.serial
            );
        }
        match ctx.runtime.speed_profiles.get(DEFAULT_SPEED_PROFILE) {
            Some(profile) => Some((DEFAULT_SPEED_PROFILE.to_string(), profile)),
            None => {
                warn!("{}: no '{DEFAULT_SPEED_PROFILE}' profile, channel {channel} left alone", ctx.serial);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{self, ChannelKind};
    use crate::drivers::DeviceDriver;
    use crate::drivers::hydro::HydroDriver;
    use crate::drivers::testing::FrameRecorder;
    use crate::profile::{DeviceProfile, SensorSource};
    use crate::runtime::Runtime;
    use crate::runtime::tests::test_runtime;
    use crate::state::Channel;
    use crate::transport::mock::RecordingIo;
    use crate::transport::{Transport, TransportConfig};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn normal_liquid(runtime: &mut Runtime) {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "Normal".to_string(),
            SpeedProfile::table(
                SensorSource::Liquid,
                &[(0.0, 40.0, 70, 30), (40.0, 60.0, 85, 60), (60.0, 100.0, 100, 100)],
            ),
        );
        runtime.speed_profiles = Arc::new(profiles);
    }

    fn context(root: &TempDir, driver: Arc<dyn DeviceDriver>) -> DeviceContext {
        let mut runtime = test_runtime(root.path(), 45.0, 55.0);
        normal_liquid(&mut runtime);
        let channels = Channel::from_descriptor(driver.descriptor());
        let profile = DeviceProfile::default_for(driver.descriptor().family, &channels);
        DeviceContext::new(driver, runtime, profile)
    }

    #[tokio::test]
    async fn hydro_steady_state_emits_once() {
        let root = TempDir::new().unwrap();
        let io = RecordingIo::new();
        let wire = io.wire();
        let driver = Arc::new(HydroDriver::new(
            descriptor::hydro(0x0c09, "Hydro H60i", 1),
            "HYDRO".into(),
            Transport::new(Box::new(io), TransportConfig::default()),
        ));
        let ctx = context(&root, driver);
        ctx.shared.state.write().await.liquid_temperature = Some(42.0);

        let mut control = ControlLoop::default();
        assert_eq!(control.tick(&ctx).await.unwrap(), 2);

        let writes = wire.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(&writes[0][..2], &[0x13, 85]);
        assert_eq!(
            &writes[1][..13],
            &[0x11, 0x00, 0x64, 0, 0, 0, 0, 60, 60, 0, 0, 0, 0]
        );

        ctx.shared.state.write().await.liquid_temperature = Some(55.0);
        assert_eq!(control.tick(&ctx).await.unwrap(), 0);
        assert_eq!(wire.writes().len(), 2);
        assert_eq!(ctx.shared.state.read().await.channels[1].duty, Some(60));
    }

    #[tokio::test]
    async fn reset_re_emits_everything() {
        let root = TempDir::new().unwrap();
        let recorder = Arc::new(FrameRecorder::new(descriptor::platinum(0x0c18, "P")));
        let ctx = context(&root, recorder.clone());
        let mut control = ControlLoop::default();
        assert_eq!(control.tick(&ctx).await.unwrap(), 3);
        assert_eq!(control.tick(&ctx).await.unwrap(), 0);
        control.reset();
        assert_eq!(control.tick(&ctx).await.unwrap(), 3);
        assert_eq!(recorder.actuations().len(), 2);
    }

    #[tokio::test]
    async fn missing_profile_falls_back_to_normal() {
        let root = TempDir::new().unwrap();
        let recorder = Arc::new(FrameRecorder::new(descriptor::platinum(0x0c18, "P")));
        let ctx = context(&root, recorder.clone());
        ctx.profile
            .write()
            .await
            .speed_profiles
            .insert(1, "Gone".into());
        let mut control = ControlLoop::default();
        control.tick(&ctx).await.unwrap();
        // absent liquid reading is substituted with 50 °C
        let sent = &recorder.actuations()[0];
        assert_eq!(sent[0].kind, ChannelKind::Pump);
        assert_eq!(sent[0].duty, 85);
        assert_eq!(sent[1].duty, 60);
        assert_eq!(sent[1].hw_index, 0);
        assert_eq!(sent[2].hw_index, 1);
    }

    #[tokio::test]
    async fn lighting_only_devices_are_left_alone() {
        let root = TempDir::new().unwrap();
        let recorder = Arc::new(FrameRecorder::new(descriptor::headset(0x0a42, "H", true)));
        let ctx = context(&root, recorder.clone());
        assert_eq!(ControlLoop::default().tick(&ctx).await.unwrap(), 0);
        assert!(recorder.actuations().is_empty());
    }

    proptest! {
        #[test]
        fn duties_stay_in_safe_range(temp in -50.0f32..200.0) {
            let root = TempDir::new().unwrap();
            let recorder = Arc::new(FrameRecorder::new(descriptor::platinum(0x0c18, "P")));
            let ctx = context(&root, recorder.clone());
            tokio_test::block_on(async {
                ctx.shared.state.write().await.liquid_temperature = Some(temp);
                ControlLoop::default().tick(&ctx).await.unwrap();
            });
            for a in &recorder.actuations()[0] {
                match a.kind {
                    ChannelKind::Pump => prop_assert!((70..=100).contains(&a.duty)),
                    _ => prop_assert!((20..=100).contains(&a.duty)),
                }
            }
        }
    }
}
