use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::device::DeviceContext;
use crate::error::{DeviceError, DeviceResult, TransportError};
use crate::event::Event;
use crate::providers::traits::ServiceProvider;
use crate::task_manager::TaskManager;

pub const TELEMETRY_TASK: &str = "telemetry";

/// Device telemetry poller.
///
/// Ticks at the descriptor's telemetry interval. Ticks never overlap: a slow
/// exchange delays the next tick instead of queueing another one.
pub struct TelemetryServiceProvider {
    ctx: DeviceContext,
}

impl TelemetryServiceProvider {
    pub fn new(ctx: DeviceContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ServiceProvider for TelemetryServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let ctx = self.ctx.clone();
        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_telemetry_service(ctx, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        TELEMETRY_TASK
    }

    fn priority(&self) -> i32 {
        10
    }
}

async fn run_telemetry_service(ctx: DeviceContext, cancel_token: CancellationToken) -> Result<()> {
    let mut interval = interval(ctx.driver.descriptor().telemetry_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!("{}: telemetry poller cancelled", ctx.serial);
                break;
            }
            _instant = interval.tick() => {
                if ctx.shared.is_exiting() {
                    continue;
                }
                match poll_once(&ctx).await {
                    Ok(()) => {}
                    Err(DeviceError::Transport(TransportError::ClosedHandle)) => break,
                    Err(e) => warn!("{}: telemetry failed: {e}", ctx.serial),
                }
            }
        }
    }
    Ok(())
}

/// Reads one snapshot and publishes it as a whole: device state first, then
/// the global directory, then the events.
pub async fn poll_once(ctx: &DeviceContext) -> DeviceResult<()> {
    let telemetry = ctx.driver.telemetry().await?;
    if let Some(muted) = telemetry.mic_muted
        && ctx.shared.set_mic_muted(muted)
    {
        info!("{}: microphone {}", ctx.serial, if muted { "muted" } else { "live" });
    }

    let state = {
        let mut state = ctx.shared.state.write().await;
        state.apply(&telemetry);
        state.clone()
    };

    let unit = ctx.runtime.options.temperature_unit;
    ctx.runtime
        .directory
        .update(&ctx.serial, |snapshot| snapshot.refresh(&state, unit));

    for (id, reading) in state.channels.iter().enumerate() {
        let temperature = reading.temperature.or_else(|| {
            ctx.channels
                .get(id)
                .filter(|c| c.contains_pump)
                .and(state.liquid_temperature)
        });
        if let Some(t) = temperature {
            ctx.runtime.event_bus.notify(Event::TemperatureChanged {
                serial: ctx.serial.clone(),
                channel: id as u8,
                rendered: unit.render(t),
            });
        }
    }
    ctx.runtime.event_bus.notify(Event::TelemetryUpdated {
        serial: ctx.serial.clone(),
    });
    Ok(())
}
