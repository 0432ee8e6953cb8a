//! In-process event bus
//!
//! Fan-out of ordered JSON events keyed by kiosk username. One bounded queue
//! per subscriber; a full queue drops its oldest item so a slow consumer can
//! never block a publisher. Single process only, no persistence.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use uuid::Uuid;

/// Per-subscriber queue capacity. Beyond this the oldest event is evicted.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

struct SubscriberQueue {
    id: Uuid,
    items: Mutex<VecDeque<serde_json::Value>>,
    notify: Notify,
}

struct BusInner {
    /// channel (kiosk username) -> subscriber queues
    channels: Mutex<HashMap<String, Vec<Arc<SubscriberQueue>>>>,
    queue_capacity: usize,
}

/// Process-wide event bus. Cheap to clone; all clones share the same channels.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                channels: Mutex::new(HashMap::new()),
                queue_capacity,
            }),
        }
    }

    /// Subscribe to a channel. The subscription is removed from the channel
    /// when the returned handle is dropped; the channel entry itself is
    /// removed when its last subscriber leaves.
    pub fn subscribe(&self, channel: &str) -> Subscription {
        let queue = Arc::new(SubscriberQueue {
            id: Uuid::new_v4(),
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        });

        let mut channels = self.inner.channels.lock().expect("bus lock poisoned");
        channels
            .entry(channel.to_string())
            .or_default()
            .push(queue.clone());
        drop(channels);

        tracing::debug!(channel, subscription = %queue.id, "bus subscribe");

        Subscription {
            bus: self.clone(),
            channel: channel.to_string(),
            queue,
        }
    }

    /// Publish an event to every current subscriber of a channel, in order.
    /// Never blocks: a full queue evicts its oldest item first. Returns the
    /// number of subscribers the event was delivered to.
    pub fn publish(&self, channel: &str, event: serde_json::Value) -> usize {
        let queues: Vec<Arc<SubscriberQueue>> = {
            let channels = self.inner.channels.lock().expect("bus lock poisoned");
            channels.get(channel).cloned().unwrap_or_default()
        };

        for queue in &queues {
            let mut items = queue.items.lock().expect("bus queue lock poisoned");
            if items.len() >= self.inner.queue_capacity {
                items.pop_front();
            }
            items.push_back(event.clone());
            drop(items);
            queue.notify.notify_one();
        }

        queues.len()
    }

    /// Number of active subscribers on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.inner.channels.lock().expect("bus lock poisoned");
        channels.get(channel).map(|subs| subs.len()).unwrap_or(0)
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().expect("bus lock poisoned").len()
    }

    fn unsubscribe(&self, channel: &str, subscription_id: Uuid) {
        let mut channels = self.inner.channels.lock().expect("bus lock poisoned");
        if let Some(queues) = channels.get_mut(channel) {
            queues.retain(|queue| queue.id != subscription_id);
            if queues.is_empty() {
                channels.remove(channel);
            }
        }
        tracing::debug!(channel, subscription = %subscription_id, "bus unsubscribe");
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a channel subscription. Dropping it unsubscribes.
pub struct Subscription {
    bus: EventBus,
    channel: String,
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    /// Wait for the next event. Events arrive in publish order per publisher.
    pub async fn recv(&mut self) -> serde_json::Value {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(event) = self.try_recv() {
                return event;
            }
            notified.await;
        }
    }

    /// Pop the next event without waiting.
    pub fn try_recv(&self) -> Option<serde_json::Value> {
        self.queue
            .items
            .lock()
            .expect("bus queue lock poisoned")
            .pop_front()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Adapt the subscription into an endless `Stream` of events. The
    /// subscription stays alive for as long as the stream does.
    pub fn into_stream(self) -> impl futures::Stream<Item = serde_json::Value> {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await;
            Some((event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.channel, self.queue.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_in_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("kiosk-1");

        for i in 0..10 {
            bus.publish("kiosk-1", json!({ "seq": i }));
        }

        for i in 0..10 {
            let event = sub.recv().await;
            assert_eq!(event["seq"], i);
        }
    }

    #[tokio::test]
    async fn test_backpressure_drops_oldest() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("kiosk-1");

        // Publisher emits 150 events into a capacity-100 queue without the
        // subscriber reading: the oldest 50 must be evicted.
        for i in 0..150 {
            bus.publish("kiosk-1", json!({ "seq": i }));
        }

        let mut received = Vec::new();
        while let Some(event) = sub.try_recv() {
            received.push(event["seq"].as_i64().unwrap());
        }

        assert_eq!(received.len(), 100);
        assert_eq!(received.first(), Some(&50));
        assert_eq!(received.last(), Some(&149));
    }

    #[tokio::test]
    async fn test_fan_out_to_multiple_subscribers() {
        let bus = EventBus::new();
        let mut first = bus.subscribe("kiosk-1");
        let mut second = bus.subscribe("kiosk-1");

        let delivered = bus.publish("kiosk-1", json!({ "type": "STATE_CHANGED" }));
        assert_eq!(delivered, 2);
        assert_eq!(first.recv().await["type"], "STATE_CHANGED");
        assert_eq!(second.recv().await["type"], "STATE_CHANGED");
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = EventBus::new();
        let mut one = bus.subscribe("kiosk-1");
        let mut two = bus.subscribe("kiosk-2");

        bus.publish("kiosk-1", json!({ "for": "one" }));

        assert_eq!(one.try_recv().unwrap()["for"], "one");
        assert!(two.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes_and_removes_channel() {
        let bus = EventBus::new();
        let sub = bus.subscribe("kiosk-1");
        assert_eq!(bus.subscriber_count("kiosk-1"), 1);
        assert_eq!(bus.channel_count(), 1);

        drop(sub);
        assert_eq!(bus.subscriber_count("kiosk-1"), 0);
        assert_eq!(bus.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish("nobody", json!({})), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_only_new_events() {
        let bus = EventBus::new();
        bus.publish("kiosk-1", json!({ "seq": 0 }));

        let mut sub = bus.subscribe("kiosk-1");
        bus.publish("kiosk-1", json!({ "seq": 1 }));

        assert_eq!(sub.recv().await["seq"], 1);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("kiosk-1");

        let publisher = bus.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            publisher.publish("kiosk-1", json!({ "seq": 42 }));
        });

        let event = sub.recv().await;
        assert_eq!(event["seq"], 42);
        handle.await.unwrap();
    }
}
