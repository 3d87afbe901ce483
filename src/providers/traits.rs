use anyhow::Result;
use async_trait::async_trait;

use crate::task_manager::TaskManager;

/// Trait for services that can be started through TaskManager.
///
/// Device workers (telemetry, control, input) and system services (D-Bus,
/// store watcher, sleep monitor) all start this way. Priority decides the
/// start order, criticality decides whether a failed start aborts.
///
/// # Example
///
/// ```no_run
/// use linkhubd::providers::traits::ServiceProvider;
/// use linkhubd::task_manager::TaskManager;
/// use anyhow::Result;
///
/// struct ExampleService;
///
/// #[async_trait::async_trait]
/// impl ServiceProvider for ExampleService {
///     async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
///         task_manager.spawn_task("example".to_string(), |token| async move {
///             token.cancelled().await;
///             Ok(())
///         }).await
///     }
///
///     fn name(&self) -> &'static str { "example" }
///     fn priority(&self) -> i32 { 5 }
/// }
/// ```
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Starts the service in TaskManager.
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()>;

    /// Returns service name for logging and management.
    fn name(&self) -> &'static str;

    /// Returns startup priority (higher numbers start first).
    fn priority(&self) -> i32 {
        0
    }

    /// Indicates if service is critical for system operation.
    fn is_critical(&self) -> bool {
        false
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::Duration;

    pub(crate) struct MockService {
        pub(crate) name: &'static str,
        pub(crate) priority: i32,
        pub(crate) critical: bool,
        pub(crate) fail: bool,
        pub(crate) ran: Arc<AtomicBool>,
    }

    impl MockService {
        pub(crate) fn new(name: &'static str, priority: i32, critical: bool) -> Self {
            Self {
                name,
                priority,
                critical,
                fail: false,
                ran: Arc::new(AtomicBool::new(false)),
            }
        }

        pub(crate) fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl ServiceProvider for MockService {
        async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
            if self.fail {
                return Err(anyhow!("{}: start failed", self.name));
            }
            let ran = self.ran.clone();
            task_manager
                .spawn_task(self.name.to_string(), move |token| async move {
                    ran.store(true, Ordering::SeqCst);
                    token.cancelled().await;
                    Ok(())
                })
                .await
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn is_critical(&self) -> bool {
            self.critical
        }
    }

    #[tokio::test]
    async fn started_service_runs_until_cancelled() {
        let mut task_manager = TaskManager::new();
        let service = MockService::new("svc", 5, false);
        service.start(&mut task_manager).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(service.ran.load(Ordering::SeqCst));
        assert!(task_manager.is_running("svc"));
        task_manager.stop_task("svc").await.unwrap();
        assert!(!task_manager.is_running("svc"));
    }

    #[tokio::test]
    async fn defaults_are_low_priority_and_optional() {
        struct DefaultService;

        #[async_trait]
        impl ServiceProvider for DefaultService {
            async fn start(&self, _task_manager: &mut TaskManager) -> Result<()> {
                Ok(())
            }

            fn name(&self) -> &'static str {
                "default_service"
            }
        }

        assert_eq!(DefaultService.priority(), 0);
        assert!(!DefaultService.is_critical());
    }

    #[tokio::test]
    async fn failing_start_names_the_service() {
        let mut task_manager = TaskManager::new();
        let err = MockService::new("broken", 1, true)
            .failing()
            .start(&mut task_manager)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert_eq!(task_manager.active_count(), 0);
    }

    #[tokio::test]
    async fn same_name_cannot_start_twice() {
        let mut task_manager = TaskManager::new();
        let service = MockService::new("dup", 1, false);
        service.start(&mut task_manager).await.unwrap();
        assert!(service.start(&mut task_manager).await.is_err());
        task_manager.shutdown_all().await.unwrap();
    }
}
