//! Typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels so every subscriber receives
//! every message and a slow subscriber never blocks the servo loop.  Sending
//! is synchronous, so blocking worker threads can publish without a runtime.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::ServoProgress`] | State-machine progress lines and the terminal outcome |
//! | [`Topic::Perception`] | One summary per published perception snapshot |
//! | [`Topic::SystemAlerts`] | Hardware faults, driver loss |

use armsight_types::{ArmError, Event};
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Default channel capacity (events buffered before slow subscribers lag).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ServoProgress,
    Perception,
    SystemAlerts,
}

/// Shared event bus.  Clones share the same channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    servo_progress: broadcast::Sender<Event>,
    perception: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus; `capacity` applies to each topic independently.
    pub fn new(capacity: usize) -> Self {
        let (servo_progress, _) = broadcast::channel(capacity);
        let (perception, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            servo_progress,
            perception,
            system_alerts,
        }
    }

    /// Publish `event` on `topic`.
    ///
    /// Returns the number of receivers handed the event.
    ///
    /// # Errors
    ///
    /// [`ArmError::Channel`] when nobody is subscribed to the topic.
    /// Progress publishers treat that as "nobody is watching" and move on.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, ArmError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| ArmError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Subscribe to one topic.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn receiver_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::ServoProgress => &self.servo_progress,
            Topic::Perception => &self.perception,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A receiver bound to a single [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event.
    ///
    /// `Err(Lagged(n))` means `n` events were dropped for this receiver;
    /// `Err(Closed)` means every bus handle is gone.
    pub async fn recv(&mut self) -> Result<Event, RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, for synchronous consumers and tests.
    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armsight_types::EventPayload;

    fn progress(state: &str) -> Event {
        Event::new(
            "armsight-runtime::servo",
            EventPayload::ServoProgress {
                state: state.to_string(),
                message: "tick".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn subscribers_on_a_topic_all_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut a = bus.subscribe_to(Topic::ServoProgress);
        let mut b = bus.subscribe_to(Topic::ServoProgress);

        let event = progress("DETECT");
        assert_eq!(bus.publish_to(Topic::ServoProgress, event.clone())?, 2);

        assert_eq!(a.recv().await?.id, event.id);
        assert_eq!(b.recv().await?.id, event.id);
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_channel_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::ServoProgress, progress("IDLE"));
        assert!(matches!(result, Err(ArmError::Channel(_))));
    }

    #[tokio::test]
    async fn topics_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let _progress = bus.subscribe_to(Topic::ServoProgress);

        bus.publish_to(Topic::ServoProgress, progress("GRASP"))?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), alerts.recv()).await;
        assert!(result.is_err(), "alerts must not see servo progress");
        Ok(())
    }

    #[test]
    fn sync_publish_and_try_recv() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Perception);
        assert_eq!(bus.receiver_count(Topic::Perception), 1);
        bus.publish_to(Topic::Perception, progress("x")).unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(rx.topic(), Topic::Perception);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(16);
        let mut slow = bus.subscribe_to(Topic::ServoProgress);
        for _ in 0..1_000 {
            let _ = bus.publish_to(Topic::ServoProgress, progress("VISUAL_SERVO"));
        }
        let result = slow.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
    }
}
