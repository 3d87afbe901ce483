use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::device::DeviceContext;
use crate::drivers::InputEvent;
use crate::error::{DeviceError, TransportError};
use crate::event::Event;
use crate::lcd::touch;
use crate::providers::traits::ServiceProvider;
use crate::task_manager::TaskManager;

pub const INPUT_TASK: &str = "input";

const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Listener for unsolicited device input: Nexus touches, headset mute
/// changes and mouse side buttons.
pub struct InputServiceProvider {
    ctx: DeviceContext,
}

impl InputServiceProvider {
    pub fn new(ctx: DeviceContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ServiceProvider for InputServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let ctx = self.ctx.clone();
        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_input_service(ctx, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        INPUT_TASK
    }

    fn priority(&self) -> i32 {
        5
    }
}

async fn run_input_service(ctx: DeviceContext, cancel_token: CancellationToken) -> Result<()> {
    loop {
        if ctx.shared.is_exiting() {
            break;
        }
        tokio::select! {
            () = cancel_token.cancelled() => break,
            read = ctx.driver.read_input() => match read {
                Ok(Some(event)) => handle(&ctx, event).await,
                Ok(None) => {}
                Err(DeviceError::Transport(TransportError::ClosedHandle)) => break,
                Err(e) => {
                    warn!("{}: input read failed: {e}", ctx.serial);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            },
        }
    }
    debug!("{}: input listener stopped", ctx.serial);
    Ok(())
}

async fn handle(ctx: &DeviceContext, event: InputEvent) {
    match event {
        InputEvent::Touch { x } => {
            let keys = ctx.profile.read().await.lcd.keys.clone();
            let width = ctx.driver.descriptor().lcd.map_or(0, |g| g.width);
            match touch::button_at(x, width, keys.len()).and_then(|i| keys.get(i)) {
                Some(action) => {
                    debug!("{}: touch at {x} -> {action}", ctx.serial);
                    ctx.runtime.event_bus.notify(Event::NexusKey {
                        serial: ctx.serial.clone(),
                        action: action.clone(),
                    });
                }
                None => debug!("{}: touch at {x} outside any button", ctx.serial),
            }
        }
        InputEvent::MicMute(muted) => {
            if ctx.shared.set_mic_muted(muted) {
                info!("{}: microphone {}", ctx.serial, if muted { "muted" } else { "live" });
            }
        }
        InputEvent::Button(code) => debug!("{}: button {code:#04x} pressed", ctx.serial),
    }
}
