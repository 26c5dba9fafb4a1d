//! In-process event fan-out
//!
//! The bus is an explicitly constructed value owned by the application root
//! and shared by `Arc`. Membership is an ordered list deduplicated by `Arc`
//! identity. `publish` runs synchronously on the caller's task and delivers to
//! the subscribers registered when it was called.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{error, trace, warn};

use crate::protocol::Event;

// ----------------------------------------------------------------------------
// Subscriber Trait
// ----------------------------------------------------------------------------

/// Error a subscriber reports for one delivery
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every event published while it is registered
///
/// Delivery happens on the publisher's task. Long blocking work here delays
/// every later event for every other subscriber; hand it off instead.
pub trait Subscriber: Send + Sync {
    /// Handle one event
    fn on_event(&self, event: &Event) -> Result<(), SubscriberError>;

    /// Name used in delivery failure logs
    fn name(&self) -> &str {
        "subscriber"
    }
}

// ----------------------------------------------------------------------------
// Event Bus
// ----------------------------------------------------------------------------

/// Outcome of one `publish` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Subscribers that handled the event
    pub delivered: usize,
    /// Subscribers that returned an error or panicked
    pub failed: usize,
}

/// Publish/subscribe fan-out of [`Event`]s
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
    published: AtomicU64,
    failures: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; returns `false` if it was already registered
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if subscribers.iter().any(|s| same_subscriber(s, &subscriber)) {
            return false;
        }
        subscribers.push(subscriber);
        true
    }

    /// Remove a subscriber; returns `false` if it was not registered
    pub fn unsubscribe(&self, subscriber: &Arc<dyn Subscriber>) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match subscribers.iter().position(|s| same_subscriber(s, subscriber)) {
            Some(index) => {
                subscribers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver `event` to the current snapshot of subscribers, in registration order
    ///
    /// A subscriber that errors or panics is logged and skipped; the remaining
    /// subscribers still receive the event.
    pub fn publish(&self, event: &Event) -> DeliveryReport {
        let snapshot: Vec<Arc<dyn Subscriber>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        self.published.fetch_add(1, Ordering::Relaxed);
        trace!("Publishing {} to {} subscribers", event.kind, snapshot.len());

        let mut report = DeliveryReport::default();
        for subscriber in snapshot {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    warn!("Subscriber '{}' failed on {}: {}", subscriber.name(), event.kind, e);
                    report.failed += 1;
                }
                Err(_) => {
                    error!("Subscriber '{}' panicked on {}", subscriber.name(), event.kind);
                    report.failed += 1;
                }
            }
        }

        if report.failed > 0 {
            self.failures.fetch_add(report.failed as u64, Ordering::Relaxed);
        }
        report
    }

    /// Events published since construction
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Failed deliveries since construction
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

fn same_subscriber(a: &Arc<dyn Subscriber>, b: &Arc<dyn Subscriber>) -> bool {
    // Compare data pointers only; vtable pointers are not unique per type
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

// ----------------------------------------------------------------------------
// Adapters
// ----------------------------------------------------------------------------

/// Subscriber backed by a closure
pub struct FnSubscriber<F> {
    name: String,
    handler: F,
}

impl<F> FnSubscriber<F>
where
    F: Fn(&Event) -> Result<(), SubscriberError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(&Event) -> Result<(), SubscriberError> + Send + Sync,
{
    fn on_event(&self, event: &Event) -> Result<(), SubscriberError> {
        (self.handler)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Forwards events into an unbounded channel for async consumers
///
/// The send never blocks the publisher. Once the receiver is dropped every
/// delivery reports an error.
pub struct ChannelSubscriber {
    name: String,
    sender: mpsc::UnboundedSender<Event>,
}

impl ChannelSubscriber {
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                sender,
            },
            receiver,
        )
    }
}

impl Subscriber for ChannelSubscriber {
    fn on_event(&self, event: &Event) -> Result<(), SubscriberError> {
        self.sender
            .send(event.clone())
            .map_err(|_| format!("receiver for '{}' was dropped", self.name).into())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EventKind;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn broadcast(text: &str) -> Event {
        Event::new(EventKind::Broadcast, serde_json::json!({ "content": text }))
    }

    fn counter(hits: Arc<AtomicUsize>) -> Arc<dyn Subscriber> {
        Arc::new(FnSubscriber::new("counter", move |_event: &Event| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }

    #[test]
    fn test_double_subscribe_delivers_once() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let subscriber = counter(hits.clone());

        assert!(bus.subscribe(subscriber.clone()));
        assert!(!bus.subscribe(subscriber.clone()));
        assert_eq!(bus.subscriber_count(), 1);

        let report = bus.publish(&broadcast("hi"));
        assert_eq!(report.delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_absent_is_noop() {
        let bus = EventBus::new();
        let stranger = counter(Arc::new(AtomicUsize::new(0)));
        assert!(!bus.unsubscribe(&stranger));

        bus.subscribe(stranger.clone());
        assert!(bus.unsubscribe(&stranger));
        assert!(!bus.unsubscribe(&stranger));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_failing_and_panicking_subscribers_are_isolated() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Arc::new(FnSubscriber::new("failing", |_event: &Event| {
            Err("disk full".into())
        })));
        bus.subscribe(Arc::new(FnSubscriber::new(
            "panicking",
            |_event: &Event| -> Result<(), SubscriberError> { panic!("subscriber bug") },
        )));
        bus.subscribe(counter(hits.clone()));

        let report = bus.publish(&broadcast("still delivered"));
        assert_eq!(report, DeliveryReport { delivered: 1, failed: 2 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.failure_count(), 2);
    }

    #[test]
    fn test_subscriber_added_during_publish_misses_that_event() {
        let bus = Arc::new(EventBus::new());
        let late_hits = Arc::new(AtomicUsize::new(0));
        let late = counter(late_hits.clone());

        let bus_for_hook = Arc::clone(&bus);
        let late_for_hook = late.clone();
        bus.subscribe(Arc::new(FnSubscriber::new("registrar", move |_event: &Event| {
            bus_for_hook.subscribe(late_for_hook.clone());
            Ok(())
        })));

        bus.publish(&broadcast("first"));
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);

        bus.publish(&broadcast("second"));
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivery_preserves_publish_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(Arc::new(FnSubscriber::new("recorder", move |event: &Event| {
            let content = event.payload["content"].as_str().unwrap_or_default();
            sink.lock().unwrap().push(content.to_string());
            Ok(())
        })));

        for text in ["one", "two", "three"] {
            bus.publish(&broadcast(text));
        }
        assert_eq!(*seen.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_channel_subscriber_forwards() {
        let bus = EventBus::new();
        let (subscriber, mut receiver) = ChannelSubscriber::new("ui");
        bus.subscribe(Arc::new(subscriber));

        bus.publish(&broadcast("async"));
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Broadcast);

        drop(receiver);
        assert_eq!(bus.publish(&broadcast("gone")).failed, 1);
    }
}
