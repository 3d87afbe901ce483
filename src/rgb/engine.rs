//! The single LED producer task of a device.
//!
//! Exactly one producer runs per device. A configuration change stops the
//! running task (waiting for it), then starts a fresh one with the new
//! setup. External writers feed a bounded queue drained by the same task, so
//! their frames never interleave with generated ones.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::device::DeviceContext;
use crate::error::{DeviceError, TransportError};
use crate::profile::device::DEFAULT_RGB_PROFILE;
use crate::profile::{DeviceProfile, RgbCatalog, RgbMode, RgbProfile, SensorSource};
use crate::providers::traits::ServiceProvider;
use crate::rgb::color::Rgb;
use crate::rgb::effects::{Effect, FrameContext};
use crate::rgb::frame::LedFrame;
use crate::state::Channel;
use crate::task_manager::TaskManager;

pub const RGB_TASK: &str = "rgb";
pub const EXTERNAL_QUEUE_DEPTH: usize = 10;
/// Zone whose colour follows the microphone mute state.
pub const INDICATOR_ZONE: &str = "Indicator LED";

/// Generated frames pause this long after an external frame.
const EXTERNAL_HOLD: Duration = Duration::from_secs(1);
const TEMPERATURE_REFRESH: Duration = Duration::from_secs(1);

pub type ExternalReceiver = Arc<Mutex<mpsc::Receiver<Vec<u8>>>>;

/// Producer side of the external frame queue.
#[derive(Debug, Clone)]
pub struct ExternalFrames {
    sender: mpsc::Sender<Vec<u8>>,
}

impl ExternalFrames {
    pub fn channel() -> (Self, ExternalReceiver) {
        let (sender, receiver) = mpsc::channel(EXTERNAL_QUEUE_DEPTH);
        (Self { sender }, Arc::new(Mutex::new(receiver)))
    }

    /// Queues a raw frame. Returns `false` when it was dropped.
    pub fn submit(&self, frame: Vec<u8>) -> bool {
        match self.sender.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("external LED queue full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Mute indicator override for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indicator {
    pub channel: usize,
    pub disabled: bool,
}

impl Indicator {
    pub fn color(&self, muted: bool, profile: Rgb) -> Rgb {
        if self.disabled {
            Rgb::BLACK
        } else if muted {
            Rgb::RED
        } else {
            profile
        }
    }
}

/// Everything a producer task needs, resolved at (re)start.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbSetup {
    /// One profile per channel, indexed by channel id.
    pub profiles: Vec<RgbProfile>,
    pub brightness: u8,
    pub indicator: Option<Indicator>,
}

impl RgbSetup {
    pub fn resolve(profile: &DeviceProfile, channels: &[Channel], catalog: &RgbCatalog) -> Self {
        let profiles = channels
            .iter()
            .map(|c| {
                let name = profile.rgb_profile(c.id);
                catalog
                    .get(name)
                    .or_else(|| {
                        warn!("RGB profile '{name}' missing, using '{DEFAULT_RGB_PROFILE}'");
                        catalog.get(DEFAULT_RGB_PROFILE)
                    })
                    .cloned()
                    .unwrap_or_else(|| RgbProfile::new(RgbMode::Static, Rgb::new(255, 255, 255), Rgb::BLACK))
            })
            .collect();
        let indicator = channels
            .iter()
            .position(|c| c.name == INDICATOR_ZONE)
            .map(|channel| Indicator {
                channel,
                disabled: profile
                    .headset
                    .as_ref()
                    .is_some_and(|h| h.disable_mic_indicator),
            });
        Self {
            profiles,
            brightness: profile.brightness,
            indicator,
        }
    }

    fn needs_temperature(&self) -> bool {
        self.profiles.iter().any(|p| p.mode.is_temperature())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Temperatures {
    cpu: f32,
    gpu: f32,
    liquid: f32,
}

impl Temperatures {
    fn for_mode(&self, mode: RgbMode) -> f32 {
        match mode {
            RgbMode::GpuTemperature => self.gpu,
            RgbMode::LiquidTemperature => self.liquid,
            _ => self.cpu,
        }
    }

    async fn read(ctx: &DeviceContext) -> Self {
        let liquid = ctx.shared.state.read().await.liquid_temperature;
        Self {
            cpu: ctx.runtime.read_sensor(&SensorSource::Cpu, None).await,
            gpu: ctx.runtime.read_sensor(&SensorSource::Gpu, None).await,
            liquid: ctx.runtime.read_sensor(&SensorSource::Liquid, liquid).await,
        }
    }
}

/// Starts the producer task under the name [`RGB_TASK`].
pub struct RgbServiceProvider {
    ctx: DeviceContext,
    setup: RgbSetup,
    external: ExternalReceiver,
}

impl RgbServiceProvider {
    pub fn new(ctx: DeviceContext, setup: RgbSetup, external: ExternalReceiver) -> Self {
        Self {
            ctx,
            setup,
            external,
        }
    }
}

#[async_trait]
impl ServiceProvider for RgbServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let ctx = self.ctx.clone();
        let setup = self.setup.clone();
        let external = self.external.clone();
        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_rgb_engine(ctx, setup, external, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        RGB_TASK
    }

    fn priority(&self) -> i32 {
        6
    }
}

async fn run_rgb_engine(
    ctx: DeviceContext,
    setup: RgbSetup,
    external: ExternalReceiver,
    cancel_token: CancellationToken,
) -> Result<()> {
    let descriptor = ctx.driver.descriptor();
    let mut frame = LedFrame::new(descriptor);
    let mut effects: Vec<Effect> = setup
        .profiles
        .iter()
        .enumerate()
        .map(|(ch, p)| Effect::new(p, frame.channel_len(ch), descriptor.temperature_palette))
        .collect();
    let widest = (0..frame.channels())
        .map(|ch| frame.channel_len(ch))
        .max()
        .unwrap_or(0);
    let mut scratch = vec![Rgb::BLACK; widest];
    let mut external = external.lock().await;
    let mut ticker = interval(descriptor.frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let started = Instant::now();
    let mut temperatures = Temperatures::default();
    let mut temperatures_at: Option<Instant> = None;
    let mut hold_until: Option<Instant> = None;
    info!("{}: RGB engine started", ctx.serial);

    loop {
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            Some(raw) = external.recv() => {
                frame.copy_from(&raw);
                hold_until = Some(Instant::now() + EXTERNAL_HOLD);
                if !emit(&ctx, &frame).await {
                    break;
                }
            }
            _instant = ticker.tick() => {
                if ctx.shared.is_exiting() {
                    break;
                }
                if hold_until.is_some_and(|until| Instant::now() < until) {
                    continue;
                }
                if setup.needs_temperature()
                    && temperatures_at.is_none_or(|at| at.elapsed() >= TEMPERATURE_REFRESH)
                {
                    temperatures = Temperatures::read(&ctx).await;
                    temperatures_at = Some(Instant::now());
                }
                compose(
                    &mut frame,
                    &mut effects,
                    &mut scratch,
                    &setup,
                    started.elapsed(),
                    &temperatures,
                    ctx.shared.mic_muted(),
                );
                if !emit(&ctx, &frame).await {
                    break;
                }
            }
        }
    }

    frame.clear();
    if let Err(e) = ctx.driver.render_frame(&frame).await {
        debug!("{}: final blank frame not sent: {e}", ctx.serial);
    }
    info!("{}: RGB engine stopped", ctx.serial);
    Ok(())
}

/// Writes one frame. Returns `false` once the transport is gone.
async fn emit(ctx: &DeviceContext, frame: &LedFrame) -> bool {
    match ctx.driver.render_frame(frame).await {
        Ok(()) => true,
        Err(DeviceError::Transport(TransportError::ClosedHandle)) => false,
        Err(e) => {
            warn!("{}: LED frame failed: {e}", ctx.serial);
            true
        }
    }
}

fn compose(
    frame: &mut LedFrame,
    effects: &mut [Effect],
    scratch: &mut [Rgb],
    setup: &RgbSetup,
    elapsed: Duration,
    temperatures: &Temperatures,
    muted: bool,
) {
    for (ch, effect) in effects.iter_mut().enumerate() {
        let leds = &mut scratch[..frame.channel_len(ch)];
        let fc = FrameContext {
            elapsed,
            temperature: temperatures.for_mode(effect.mode()),
        };
        effect.render(&fc, leds);
        for (led, color) in leds.iter().enumerate() {
            frame.set(ch, led, color.scaled(setup.brightness));
        }
    }
    if let Some(indicator) = setup.indicator {
        let current = frame.get(indicator.channel, 0).unwrap_or(Rgb::BLACK);
        frame.fill(indicator.channel, indicator.color(muted, current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{self, DeviceDescriptor, Family};
    use crate::drivers::DeviceDriver;
    use crate::drivers::testing::FrameRecorder;
    use crate::runtime::tests::test_runtime;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn static_setup(channels: usize, color: Rgb, brightness: u8) -> RgbSetup {
        RgbSetup {
            profiles: vec![RgbProfile::new(RgbMode::Static, color, Rgb::BLACK); channels],
            brightness,
            indicator: None,
        }
    }

    async fn run_for(
        ctx: &DeviceContext,
        setup: RgbSetup,
        external: ExternalReceiver,
        millis: u64,
    ) {
        let mut tasks = TaskManager::new();
        RgbServiceProvider::new(ctx.clone(), setup, external)
            .start(&mut tasks)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(millis)).await;
        tasks.stop_task(RGB_TASK).await.unwrap();
    }

    fn context(root: &TempDir, descriptor: DeviceDescriptor) -> (DeviceContext, Arc<FrameRecorder>) {
        let recorder = Arc::new(FrameRecorder::new(descriptor));
        let runtime = test_runtime(root.path(), 45.0, 55.0);
        let channels = Channel::from_descriptor(recorder.descriptor());
        let profile = DeviceProfile::default_for(recorder.descriptor().family, &channels);
        (DeviceContext::new(recorder.clone(), runtime, profile), recorder)
    }

    #[tokio::test]
    async fn static_frames_follow_the_brightness_rule() {
        let root = TempDir::new().unwrap();
        let (ctx, recorder) = context(&root, descriptor::platinum(0x0c18, "P"));
        let (_tx, rx) = ExternalFrames::channel();
        run_for(&ctx, static_setup(3, Rgb::new(255, 100, 3), 50), rx, 150).await;

        let frames = recorder.frames();
        assert!(frames.len() >= 2);
        let (last, generated) = frames.split_last().unwrap();
        assert!(last.iter().all(|b| *b == 0));
        for f in generated {
            for led in f.chunks(3) {
                assert_eq!(led, &[127, 50, 1]);
            }
        }
    }

    #[tokio::test]
    async fn exactly_one_blank_frame_on_exit() {
        let root = TempDir::new().unwrap();
        let (ctx, recorder) = context(&root, descriptor::platinum(0x0c18, "P"));
        let (_tx, rx) = ExternalFrames::channel();
        let mut setup = static_setup(3, Rgb::RED, 100);
        setup.profiles[0].mode = RgbMode::Rainbow;
        run_for(&ctx, setup, rx, 120).await;
        let blanks = recorder
            .frames()
            .iter()
            .filter(|f| f.iter().all(|b| *b == 0))
            .count();
        assert_eq!(blanks, 1);
    }

    #[tokio::test]
    async fn mute_indicator_overrides_the_profile_colour() {
        let root = TempDir::new().unwrap();
        let (ctx, recorder) = context(&root, descriptor::headset(0x0a42, "H", true));
        let mut setup = static_setup(3, Rgb::new(0, 0, 255), 100);
        setup.indicator = Some(Indicator {
            channel: 1,
            disabled: false,
        });
        let (_tx, rx) = ExternalFrames::channel();
        run_for(&ctx, setup.clone(), rx.clone(), 90).await;
        let first = recorder.frames()[0].clone();
        assert_eq!([first[1], first[4], first[7]], [0, 0, 255]);

        ctx.shared.set_mic_muted(true);
        recorder.frames.lock().unwrap().clear();
        run_for(&ctx, setup.clone(), rx.clone(), 90).await;
        let muted = recorder.frames()[0].clone();
        assert_eq!([muted[1], muted[4], muted[7]], [0xff, 0, 0]);
        assert_eq!([muted[0], muted[3], muted[6]], [0, 0, 255]);

        ctx.shared.set_mic_muted(false);
        setup.indicator = Some(Indicator {
            channel: 1,
            disabled: true,
        });
        recorder.frames.lock().unwrap().clear();
        run_for(&ctx, setup, rx, 90).await;
        let disabled = recorder.frames()[0].clone();
        assert_eq!([disabled[1], disabled[4], disabled[7]], [0, 0, 0]);
    }

    #[tokio::test]
    async fn external_frames_are_written_by_the_producer() {
        let root = TempDir::new().unwrap();
        let (ctx, recorder) = context(&root, descriptor::mouse(0x1b4c, "M", true));
        let (tx, rx) = ExternalFrames::channel();
        assert!(tx.submit(vec![1, 2, 3, 4, 5, 6]));
        run_for(&ctx, static_setup(2, Rgb::RED, 100), rx, 100).await;
        let frames = recorder.frames();
        assert!(frames.contains(&vec![1, 2, 3, 4, 5, 6]));
        // generated frames pause while the external writer is active
        assert!(!frames.contains(&vec![255, 0, 0, 255, 0, 0]));
    }

    #[test]
    fn external_queue_drops_when_full() {
        let (tx, _rx) = ExternalFrames::channel();
        for _ in 0..EXTERNAL_QUEUE_DEPTH {
            assert!(tx.submit(vec![0]));
        }
        assert!(!tx.submit(vec![0]));
    }

    #[test]
    fn setup_resolves_catalog_and_indicator() {
        let d = descriptor::headset(0x0a42, "H", true);
        let channels = Channel::from_descriptor(&d);
        let mut profile = DeviceProfile::default_for(Family::Headset, &channels);
        profile.rgb_profiles.insert(2, "missing".into());
        let setup = RgbSetup::resolve(&profile, &channels, &RgbCatalog::default());
        assert_eq!(setup.profiles.len(), 3);
        assert_eq!(setup.profiles[2].mode, RgbMode::Static);
        assert_eq!(
            setup.indicator,
            Some(Indicator {
                channel: 1,
                disabled: false
            })
        );
    }
}
