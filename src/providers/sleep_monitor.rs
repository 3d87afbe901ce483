use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use log::{info, warn};
use tokio_util::sync::CancellationToken;
use zbus::{Connection, proxy};

use crate::event::{Event, EventBus};
use crate::providers::traits::ServiceProvider;
use crate::task_manager::TaskManager;

pub const SLEEP_MONITOR_TASK: &str = "sleep-monitor";

#[proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait Login1Manager {
    #[zbus(signal)]
    fn prepare_for_sleep(&self, start: bool) -> zbus::Result<()>;
}

/// Turns logind's `PrepareForSleep` signal into `Suspend`/`Resume` events.
///
/// Needs the system bus. Non-critical: without it the daemon keeps running
/// and simply does not react to sleep.
pub struct SleepMonitorServiceProvider {
    event_bus: EventBus,
}

impl SleepMonitorServiceProvider {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

#[async_trait]
impl ServiceProvider for SleepMonitorServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let connection = Connection::system()
            .await
            .context("system bus unavailable")?;
        let manager = Login1ManagerProxy::new(&connection).await?;
        let signals = manager.receive_prepare_for_sleep().await?;
        let event_bus = self.event_bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), move |cancel_token| async move {
                // keeps the proxy and its connection alive with the stream
                let _manager = manager;
                run_sleep_monitor(signals, event_bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        SLEEP_MONITOR_TASK
    }

    fn priority(&self) -> i32 {
        7
    }
}

/// `start == true` means the host is going down.
pub fn sleep_event(start: bool) -> Event {
    if start { Event::Suspend } else { Event::Resume }
}

async fn run_sleep_monitor(
    mut signals: PrepareForSleepStream,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Listening for login1 PrepareForSleep");
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            signal = signals.next() => {
                let Some(signal) = signal else {
                    warn!("login1 signal stream ended");
                    break;
                };
                match signal.args() {
                    Ok(args) => {
                        let event = sleep_event(args.start);
                        info!("Host sleep signal: {event:?}");
                        event_bus.notify(event);
                    }
                    Err(e) => warn!("Malformed PrepareForSleep signal: {e}"),
                }
            }
        }
    }
    Ok(())
}
