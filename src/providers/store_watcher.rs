use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use notify::{Event, EventHandler, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::{Event as AppEvent, EventBus};
use crate::providers::traits::ServiceProvider;
use crate::store;
use crate::task_manager::TaskManager;

pub const STORE_WATCHER_TASK: &str = "store-watcher";

const DEBOUNCE: Duration = Duration::from_millis(2000);

/// Watches the RGB catalog directory of the profile store.
///
/// Editors write a catalog in several steps, so changes are collected per
/// serial and published as one `RgbCatalogChanged` once the directory has
/// been quiet for the debounce period. The serial is the file stem of the
/// catalog (`rgb/<serial>.json`).
///
/// Non-critical: without it catalog edits take effect on the next restart.
pub struct StoreWatcherServiceProvider {
    rgb_dir: PathBuf,
    event_bus: EventBus,
    debounce: Duration,
}

impl StoreWatcherServiceProvider {
    pub fn new(store_root: &Path, event_bus: EventBus) -> Self {
        Self {
            rgb_dir: store_root.join(store::RGB_DIR),
            event_bus,
            debounce: DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

#[async_trait]
impl ServiceProvider for StoreWatcherServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let rgb_dir = self.rgb_dir.clone();
        let event_bus = self.event_bus.clone();
        let debounce = self.debounce;

        task_manager
            .spawn_task(self.name().to_string(), move |cancel_token| async move {
                run_store_watcher_service(rgb_dir, event_bus, debounce, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        STORE_WATCHER_TASK
    }

    fn priority(&self) -> i32 {
        6
    }
}

#[derive(Debug)]
struct AsyncEventHandler {
    sender: mpsc::UnboundedSender<notify::Result<Event>>,
}

impl EventHandler for AsyncEventHandler {
    fn handle_event(&mut self, event: notify::Result<Event>) {
        if let Err(e) = self.sender.send(event) {
            error!("Failed to send filesystem event to async handler: {}", e);
        }
    }
}

/// Serial of a catalog file, `None` for anything that is not `<serial>.json`.
fn catalog_serial(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty() && !s.starts_with('.'))
        .map(str::to_string)
}

async fn run_store_watcher_service(
    rgb_dir: PathBuf,
    event_bus: EventBus,
    debounce: Duration,
    cancel_token: CancellationToken,
) -> Result<()> {
    std::fs::create_dir_all(&rgb_dir)?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut watcher = recommended_watcher(AsyncEventHandler { sender: event_tx })?;
    watcher.watch(&rgb_dir, RecursiveMode::NonRecursive)?;
    info!("Watching RGB catalogs in {}", rgb_dir.display());

    let mut debounce_interval = tokio::time::interval(debounce);
    debounce_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut pending: BTreeSet<String> = BTreeSet::new();

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,

            event_result = event_rx.recv() => match event_result {
                Some(Ok(event)) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        continue;
                    }
                    for serial in event.paths.iter().filter_map(|p| catalog_serial(p)) {
                        debug!("Catalog of {serial} touched");
                        pending.insert(serial);
                    }
                    debounce_interval.reset();
                }
                Some(Err(e)) => warn!("Filesystem watcher error: {}", e),
                None => {
                    warn!("Filesystem event channel closed, exiting");
                    break;
                }
            },

            _ = debounce_interval.tick(), if !pending.is_empty() => {
                for serial in std::mem::take(&mut pending) {
                    info!("RGB catalog of {serial} changed");
                    event_bus.notify(AppEvent::RgbCatalogChanged(serial));
                }
            }
        }
    }

    if let Err(e) = watcher.unwatch(&rgb_dir) {
        warn!("Failed to unwatch path during cleanup: {}", e);
    }
    debug!("Store watcher stopped");
    Ok(())
}
