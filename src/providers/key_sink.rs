use std::io;

use anyhow::{Context, Result};
use async_trait::async_trait;
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, EventType, InputEvent, Key};
use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::event::{Event, EventBus};
use crate::providers::traits::ServiceProvider;
use crate::task_manager::TaskManager;

pub const KEY_SINK_TASK: &str = "key-sink";

const DEVICE_NAME: &str = "linkhubd virtual keyboard";

/// Key actions a Nexus button may carry, by their evdev names.
const ACTIONS: &[(&str, Key)] = &[
    ("KEY_PREVIOUSSONG", Key::KEY_PREVIOUSSONG),
    ("KEY_PLAYPAUSE", Key::KEY_PLAYPAUSE),
    ("KEY_NEXTSONG", Key::KEY_NEXTSONG),
    ("KEY_STOPCD", Key::KEY_STOPCD),
    ("KEY_VOLUMEDOWN", Key::KEY_VOLUMEDOWN),
    ("KEY_VOLUMEUP", Key::KEY_VOLUMEUP),
    ("KEY_MUTE", Key::KEY_MUTE),
    ("KEY_MICMUTE", Key::KEY_MICMUTE),
];

/// Key code of an action name, `None` for names outside the supported set.
pub fn key_code(action: &str) -> Option<Key> {
    ACTIONS
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, key)| *key)
}

/// Destination of emitted key presses.
#[cfg_attr(test, mockall::automock)]
pub trait KeySink: Send + 'static {
    /// Press and release `key`.
    fn tap(&mut self, key: Key) -> io::Result<()>;
}

/// uinput keyboard advertising every supported action.
pub struct UinputKeyboard {
    device: VirtualDevice,
}

impl UinputKeyboard {
    pub fn create() -> io::Result<Self> {
        let mut keys = AttributeSet::<Key>::new();
        for (_, key) in ACTIONS {
            keys.insert(*key);
        }
        let device = VirtualDeviceBuilder::new()?
            .name(DEVICE_NAME)
            .with_keys(&keys)?
            .build()?;
        Ok(Self { device })
    }
}

impl KeySink for UinputKeyboard {
    fn tap(&mut self, key: Key) -> io::Result<()> {
        self.device
            .emit(&[InputEvent::new(EventType::KEY, key.code(), 1)])?;
        self.device
            .emit(&[InputEvent::new(EventType::KEY, key.code(), 0)])
    }
}

/// Turns `NexusKey` events into key presses on a virtual keyboard.
///
/// Needs write access to `/dev/uinput`. Non-critical: without it touches
/// are still decoded and logged.
pub struct KeySinkServiceProvider {
    event_bus: EventBus,
}

impl KeySinkServiceProvider {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

#[async_trait]
impl ServiceProvider for KeySinkServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let keyboard = UinputKeyboard::create().context("uinput keyboard unavailable")?;
        let event_bus = self.event_bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), move |cancel_token| async move {
                run_key_sink(Box::new(keyboard), event_bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        KEY_SINK_TASK
    }

    fn priority(&self) -> i32 {
        5
    }
}

async fn run_key_sink(
    mut sink: Box<dyn KeySink>,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut events = event_bus.subscribe();
    info!("Virtual keyboard ready");
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            event = events.recv() => match event {
                Ok(Event::NexusKey { serial, action }) => match key_code(&action) {
                    Some(key) => {
                        debug!("{serial}: emitting {action}");
                        if let Err(e) = sink.tap(key) {
                            warn!("{serial}: key {action} not emitted: {e}");
                        }
                    }
                    None => warn!("{serial}: unknown key action {action}"),
                },
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("Key sink lagged by {n} events"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("Key sink stopped");
    Ok(())
}
