//! Event-driven communication between the supervisor and its services.

use anyhow::Result;
use tokio::sync::broadcast;

/// Application events.
///
/// Device workers publish observations, system services publish lifecycle
/// requests. The supervisor is the main consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A device finished a telemetry tick.
    TelemetryUpdated { serial: String },
    /// Rendered temperature string for a device channel (°C or °F).
    TemperatureChanged {
        serial: String,
        channel: u8,
        rendered: String,
    },
    DeviceAttached(String),
    DeviceDetached(String),
    /// Host is about to sleep.
    Suspend,
    /// Host woke up.
    Resume,
    /// An RGB catalog file changed on disk.
    RgbCatalogChanged(String),
    /// Nexus touch button pressed.
    NexusKey { serial: String, action: String },
    SystemShutdown,
}

/// Publish-subscribe bus shared by all services.
///
/// # Example
///
/// ```no_run
/// use linkhubd::event::{Event, EventBus};
///
/// let event_bus = EventBus::new();
/// let mut subscriber = event_bus.subscribe();
/// event_bus.publish(Event::Suspend).ok();
/// // let event = subscriber.recv().await;
/// ```
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new EventBus with default capacity.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    #[cfg(test)]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }

    /// Publishes and ignores the "no subscribers" case.
    pub fn notify(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::{Duration, sleep};

    #[test]
    fn clone_shares_the_channel() {
        let event_bus1 = EventBus::new();
        let event_bus2 = event_bus1.clone();

        let _receiver1 = event_bus1.subscribe();
        let _receiver2 = event_bus2.subscribe();

        assert_eq!(event_bus1.sender.receiver_count(), 2);
        assert_eq!(event_bus2.sender.receiver_count(), 2);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let event_bus = EventBus::new();
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        event_bus
            .publish(Event::RgbCatalogChanged("ABC".into()))
            .unwrap();

        assert_eq!(
            receiver1.recv().await.unwrap(),
            Event::RgbCatalogChanged("ABC".into())
        );
        assert_eq!(
            receiver2.recv().await.unwrap(),
            Event::RgbCatalogChanged("ABC".into())
        );
    }

    #[tokio::test]
    async fn publish_without_subscribers_returns_error() {
        let event_bus = EventBus::new();
        assert!(event_bus.publish(Event::Suspend).is_err());
        // notify swallows the same condition
        event_bus.notify(Event::Suspend);
    }

    #[tokio::test]
    async fn sequential_events_received_in_order() {
        let event_bus = EventBus::with_capacity(8);
        let mut receiver = event_bus.subscribe();

        event_bus.publish(Event::Suspend).unwrap();
        event_bus.publish(Event::Resume).unwrap();
        event_bus.publish(Event::SystemShutdown).unwrap();

        assert_eq!(receiver.recv().await.unwrap(), Event::Suspend);
        assert_eq!(receiver.recv().await.unwrap(), Event::Resume);
        assert_eq!(receiver.recv().await.unwrap(), Event::SystemShutdown);
    }

    #[tokio::test]
    async fn event_bus_works_across_async_tasks() {
        let event_bus = EventBus::new();
        let mut receiver = event_bus.subscribe();
        let publisher_bus = event_bus.clone();

        let publisher = tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            publisher_bus
                .publish(Event::DeviceAttached("S1".into()))
                .unwrap();
        });

        let received = tokio::spawn(async move { receiver.recv().await.unwrap() });

        publisher.await.unwrap();
        assert_eq!(received.await.unwrap(), Event::DeviceAttached("S1".into()));
    }
}
