//! Task management for async worker lifecycle.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Join budget for one task during shutdown.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Manages async tasks with proper lifecycle and error handling.
///
/// Each task gets a child of `global_token`, so a task can be stopped on its
/// own (`stop_task`) or together with every other task (`shutdown_all`).
pub struct TaskManager {
    tasks: HashMap<String, TaskInfo>,
    pub global_token: CancellationToken,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            global_token: CancellationToken::new(),
        }
    }

    /// Spawns and registers a task with the given name.
    pub async fn spawn_task<F, Fut>(&mut self, name: String, task_fn: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        if self.tasks.contains_key(&name) {
            anyhow::bail!("Task '{name}' is already running");
        }

        let task_token = self.global_token.child_token();
        let task_token_clone = task_token.clone();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            debug!("Starting task: {}", task_name);
            match task_fn(task_token_clone).await {
                Ok(()) => {
                    debug!("Task '{}' completed successfully", task_name);
                    Ok(())
                }
                Err(e) => {
                    error!("Task '{}' failed: {}", task_name, e);
                    Err(e)
                }
            }
        });

        self.tasks.insert(
            name.clone(),
            TaskInfo {
                handle,
                cancel_token: task_token,
            },
        );

        debug!("Task '{}' spawned", name);
        Ok(())
    }

    /// Cancels one task and waits for it to finish.
    ///
    /// Unknown names are ignored so stop sequences can run unconditionally.
    pub async fn stop_task(&mut self, name: &str) -> Result<()> {
        let Some(info) = self.tasks.remove(name) else {
            return Ok(());
        };
        info.cancel_token.cancel();
        join(name, info.handle).await
    }

    /// Cancels one task without waiting for it.
    pub fn cancel_task(&mut self, name: &str) {
        if let Some(info) = self.tasks.remove(name) {
            info.cancel_token.cancel();
        }
    }

    /// Shuts down all registered tasks gracefully.
    ///
    /// Returns the first error encountered, if any.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("Stopping all {} tasks", self.tasks.len());

        self.global_token.cancel();

        let mut first_error = None;
        let tasks: Vec<_> = self.tasks.drain().collect();

        for (name, info) in tasks {
            if let Err(e) = join(&name, info.handle).await {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        // A fresh token lets the manager be reused after resume.
        self.global_token = CancellationToken::new();

        if let Some(error) = first_error {
            Err(error).context("One or more tasks failed during shutdown")
        } else {
            Ok(())
        }
    }

    /// Returns the count of registered tasks.
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn join(name: &str, handle: JoinHandle<Result<()>>) -> Result<()> {
    match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => {
            warn!("Task '{name}' failed during shutdown: {e}");
            Err(e)
        }
        Ok(Err(e)) => {
            let error = anyhow::anyhow!("Task '{name}' panicked: {e}");
            error!("{}", error);
            Err(error)
        }
        Err(_) => {
            let error = anyhow::anyhow!("Task '{name}' shutdown timeout exceeded");
            error!("{}", error);
            Err(error)
        }
    }
}

struct TaskInfo {
    handle: JoinHandle<Result<()>>,
    cancel_token: CancellationToken,
}
