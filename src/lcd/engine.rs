//! LCD producer task.
//!
//! Computed modes are redrawn once a second, animations follow their GIF
//! delays. Rendering runs on the blocking pool since drawing and JPEG
//! encoding a 480x480 frame is pure CPU work.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use image::RgbImage;
use log::{debug, info, warn};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;

use crate::device::DeviceContext;
use crate::error::{DeviceError, DeviceResult, TransportError};
use crate::lcd::render::{Renderer, TextLine, encode_jpeg};
use crate::profile::device::LcdSettings;
use crate::profile::{ArcProfile, DoubleArcProfile, LcdMode, SensorSource};
use crate::providers::traits::ServiceProvider;
use crate::rgb::color::Rgb;
use crate::task_manager::TaskManager;

pub const LCD_TASK: &str = "lcd";
const REFRESH: Duration = Duration::from_secs(1);

/// What one computed frame shows, resolved from sensors on the async side.
#[derive(Debug, Clone, PartialEq)]
enum Template {
    Text(Vec<(String, f32, f32)>),
    Arc {
        profile: ArcProfile,
        value: f32,
        label: String,
    },
    DoubleArc {
        profile: DoubleArcProfile,
        inner: f32,
        outer: f32,
        labels: (String, String),
    },
}

impl Template {
    fn draw(&self, renderer: &Renderer) -> RgbImage {
        match self {
            Template::Text(lines) => {
                let lines: Vec<TextLine> = lines
                    .iter()
                    .map(|(text, size, y)| TextLine::new(text.clone(), renderer.scaled(*size), *y))
                    .collect();
                renderer.text(Rgb::BLACK, &lines)
            }
            Template::Arc {
                profile,
                value,
                label,
            } => renderer.arc(profile, *value, label),
            Template::DoubleArc {
                profile,
                inner,
                outer,
                labels,
            } => renderer.double_arc(profile, *inner, *outer, (&labels.0, &labels.1)),
        }
    }
}

pub struct LcdServiceProvider {
    ctx: DeviceContext,
    settings: LcdSettings,
}

impl LcdServiceProvider {
    pub fn new(ctx: DeviceContext, settings: LcdSettings) -> Self {
        Self { ctx, settings }
    }
}

#[async_trait]
impl ServiceProvider for LcdServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let ctx = self.ctx.clone();
        let settings = self.settings.clone();
        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_lcd_engine(ctx, settings, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        LCD_TASK
    }

    fn priority(&self) -> i32 {
        7
    }
}

async fn run_lcd_engine(
    ctx: DeviceContext,
    settings: LcdSettings,
    cancel_token: CancellationToken,
) -> Result<()> {
    let Some(geometry) = ctx.driver.descriptor().lcd else {
        return Ok(());
    };
    if let Err(e) = ctx.driver.set_lcd_rotation(settings.rotation).await {
        warn!("{}: LCD rotation not applied: {e}", ctx.serial);
    }
    let font_path = ctx.runtime.options.font_path.clone();
    let renderer = Arc::new(
        tokio::task::spawn_blocking(move || Renderer::new(&geometry, font_path.as_deref())).await?,
    );
    info!("{}: LCD engine started in {:?} mode", ctx.serial, settings.mode);

    match settings.mode {
        LcdMode::Off => {
            let blank = encode_jpeg(&renderer.blank())?;
            push(&ctx, &blank).await;
            cancel_token.cancelled().await;
        }
        LcdMode::Animation => {
            let name = settings
                .image
                .clone()
                .unwrap_or_else(|| ctx.runtime.animation().image);
            let path = ctx.runtime.lcd_image(&name);
            let loader = renderer.clone();
            match tokio::task::spawn_blocking(move || loader.load_animation(&path)).await? {
                Ok(frames) => run_animation(&ctx, &frames, &cancel_token).await,
                Err(e) => {
                    warn!("{}: animation '{name}' unusable ({e}), showing liquid", ctx.serial);
                    run_computed(&ctx, LcdMode::Liquid, renderer, &cancel_token).await;
                }
            }
        }
        mode => run_computed(&ctx, mode, renderer, &cancel_token).await,
    }
    info!("{}: LCD engine stopped", ctx.serial);
    Ok(())
}

async fn run_animation(
    ctx: &DeviceContext,
    frames: &[(Vec<u8>, Duration)],
    cancel_token: &CancellationToken,
) {
    for (jpeg, delay) in frames.iter().cycle() {
        if ctx.shared.is_exiting() || !push(ctx, jpeg).await {
            return;
        }
        tokio::select! {
            () = cancel_token.cancelled() => return,
            () = sleep(*delay) => {}
        }
    }
}

async fn run_computed(
    ctx: &DeviceContext,
    mode: LcdMode,
    renderer: Arc<Renderer>,
    cancel_token: &CancellationToken,
) {
    let mut ticker = interval(REFRESH);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks = IntervalStream::new(ticker);
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            tick = ticks.next() => {
                if tick.is_none() || ctx.shared.is_exiting() {
                    break;
                }
                let template = template(ctx, mode).await;
                let r = renderer.clone();
                let jpeg = match tokio::task::spawn_blocking(move || render(&r, &template)).await {
                    Ok(Ok(jpeg)) => jpeg,
                    Ok(Err(e)) => {
                        warn!("{}: LCD frame not rendered: {e}", ctx.serial);
                        continue;
                    }
                    Err(e) => {
                        warn!("{}: LCD render task failed: {e}", ctx.serial);
                        continue;
                    }
                };
                if !push(ctx, &jpeg).await {
                    break;
                }
            }
        }
    }
}

fn render(renderer: &Renderer, template: &Template) -> DeviceResult<Vec<u8>> {
    encode_jpeg(&template.draw(renderer))
}

/// Streams one image. Returns `false` once the transport is gone.
async fn push(ctx: &DeviceContext, jpeg: &[u8]) -> bool {
    match ctx.driver.render_lcd(jpeg).await {
        Ok(()) => true,
        Err(DeviceError::Transport(TransportError::ClosedHandle)) => false,
        Err(e) => {
            debug!("{}: LCD image failed: {e}", ctx.serial);
            true
        }
    }
}

async fn template(ctx: &DeviceContext, mode: LcdMode) -> Template {
    let unit = ctx.runtime.options.temperature_unit;
    let liquid = ctx.shared.state.read().await.liquid_temperature;
    let read = |source: SensorSource| {
        let runtime = ctx.runtime.clone();
        async move { runtime.read_sensor(&source, liquid).await }
    };
    match mode {
        LcdMode::Cpu => Template::Text(vec![
            ("CPU".into(), 0.1, 0.3),
            (unit.render(read(SensorSource::Cpu).await), 0.25, 0.55),
        ]),
        LcdMode::Gpu => Template::Text(vec![
            ("GPU".into(), 0.1, 0.3),
            (unit.render(read(SensorSource::Gpu).await), 0.25, 0.55),
        ]),
        LcdMode::Combined => Template::Text(vec![
            (format!("CPU {}", unit.render(read(SensorSource::Cpu).await)), 0.12, 0.3),
            (format!("GPU {}", unit.render(read(SensorSource::Gpu).await)), 0.12, 0.5),
            (format!("LIQ {}", unit.render(read(SensorSource::Liquid).await)), 0.12, 0.7),
        ]),
        LcdMode::Time => Template::Text(vec![(local_clock(), 0.2, 0.5)]),
        LcdMode::Arc => {
            let profile = ctx.runtime.arc();
            let value = read(profile.gauge.sensor.clone()).await;
            Template::Arc {
                label: unit.render(value),
                value,
                profile,
            }
        }
        LcdMode::DoubleArc => {
            let profile = ctx.runtime.double_arc();
            let inner = read(profile.inner.sensor.clone()).await;
            let outer = read(profile.outer.sensor.clone()).await;
            Template::DoubleArc {
                labels: (unit.render(inner), unit.render(outer)),
                inner,
                outer,
                profile,
            }
        }
        _ => Template::Text(vec![
            ("LIQUID".into(), 0.1, 0.3),
            (unit.render(read(SensorSource::Liquid).await), 0.25, 0.55),
        ]),
    }
}

/// `HH:MM:SS` in the local timezone.
fn local_clock() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{self, DeviceDescriptor};
    use crate::drivers::DeviceDriver;
    use crate::drivers::testing::FrameRecorder;
    use crate::profile::DeviceProfile;
    use crate::runtime::tests::test_runtime;
    use crate::state::Channel;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn context(root: &TempDir, descriptor: DeviceDescriptor) -> (DeviceContext, Arc<FrameRecorder>) {
        let recorder = Arc::new(FrameRecorder::new(descriptor));
        let runtime = test_runtime(root.path(), 45.0, 55.0);
        let channels = Channel::from_descriptor(recorder.descriptor());
        let profile = DeviceProfile::default_for(recorder.descriptor().family, &channels);
        (DeviceContext::new(recorder.clone(), runtime, profile), recorder)
    }

    async fn run_for(ctx: &DeviceContext, settings: LcdSettings, millis: u64) {
        let mut tasks = TaskManager::new();
        LcdServiceProvider::new(ctx.clone(), settings)
            .start(&mut tasks)
            .await
            .unwrap();
        sleep(Duration::from_millis(millis)).await;
        tasks.stop_task(LCD_TASK).await.unwrap();
    }

    #[tokio::test]
    async fn arc_mode_pushes_jpeg_and_sets_rotation_once() {
        let root = TempDir::new().unwrap();
        let (ctx, recorder) = context(&root, descriptor::lcd_cover(0x0c39, "LCD"));
        let settings = LcdSettings {
            mode: LcdMode::Arc,
            rotation: 90,
            ..LcdSettings::default()
        };
        run_for(&ctx, settings, 300).await;
        assert_eq!(*recorder.rotations.lock().unwrap(), vec![90]);
        let images = recorder.images();
        assert_eq!(images.len(), 1);
        assert_eq!(&images[0][..2], &[0xff, 0xd8]);
    }

    #[tokio::test]
    async fn off_mode_blanks_once() {
        let root = TempDir::new().unwrap();
        let (ctx, recorder) = context(&root, descriptor::lcd_cover(0x0c39, "LCD"));
        let settings = LcdSettings {
            mode: LcdMode::Off,
            ..LcdSettings::default()
        };
        run_for(&ctx, settings, 100).await;
        assert_eq!(recorder.images().len(), 1);
    }

    #[tokio::test]
    async fn missing_animation_falls_back_to_computed() {
        let root = TempDir::new().unwrap();
        let (ctx, recorder) = context(&root, descriptor::nexus(0x1b8e));
        let settings = LcdSettings {
            mode: LcdMode::Animation,
            image: Some("absent.gif".into()),
            ..LcdSettings::default()
        };
        run_for(&ctx, settings, 300).await;
        assert_eq!(recorder.images().len(), 1);
    }

    #[tokio::test]
    async fn devices_without_a_panel_do_nothing() {
        let root = TempDir::new().unwrap();
        let (ctx, recorder) = context(&root, descriptor::platinum(0x0c18, "P"));
        run_for(&ctx, LcdSettings::default(), 50).await;
        assert!(recorder.images().is_empty());
        assert!(recorder.rotations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn templates_read_the_configured_sensors() {
        let root = TempDir::new().unwrap();
        let (ctx, _) = context(&root, descriptor::lcd_cover(0x0c39, "LCD"));
        match template(&ctx, LcdMode::DoubleArc).await {
            Template::DoubleArc { inner, outer, .. } => {
                assert_eq!((inner, outer), (45.0, 55.0));
            }
            other => panic!("unexpected template {other:?}"),
        }
        // no liquid reading yet: substituted
        match template(&ctx, LcdMode::Liquid).await {
            Template::Text(lines) => assert_eq!(lines[1].0, "50.0 °C"),
            other => panic!("unexpected template {other:?}"),
        }
    }

    #[test]
    fn clock_is_formatted() {
        let clock = local_clock();
        assert_eq!(clock.len(), 8);
        assert_eq!(clock.as_bytes()[2], b':');
    }
}
