//! Event Bus - In-Process Publish/Subscribe Router
//!
//! The bus connects background services (producers, each on its own thread)
//! with screen modules and the frame driver (consumers). It transports opaque
//! payloads and never inspects them.
//!
//! # Architecture
//!
//! ```text
//!   service thread A ──┐                         ┌──► handler 1 (enqueue)
//!   service thread B ──┼──► publish(topic) ──────┼──► handler 2 (enqueue)
//!   frame driver     ──┘   snapshot handlers     └──► handler N
//!                          (lock released before dispatch)
//! ```
//!
//! # Dispatch Rules
//!
//! - `publish` runs every handler subscribed to the topic at the moment of
//!   the call, synchronously, in registration order, on the caller's thread.
//! - The handler list is copied under the lock and the lock is released
//!   before any handler runs, so handlers may subscribe or unsubscribe
//!   (including themselves) without affecting the publish in progress.
//! - A handler that returns an error or panics is logged and skipped; the
//!   remaining handlers still run and the publisher never sees the error.
//!
//! # Thread Safety
//!
//! The subscriber table sits behind a `parking_lot::RwLock`. Registration,
//! removal and snapshotting are mutually exclusive; handler execution is not
//! serialized across publishes.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;

use crate::error::panic_message;
use crate::topics;

/// Owner recorded for subscriptions made without an explicit owner
pub const ANONYMOUS_OWNER: &str = "anonymous";

// ============================================================================
// Payload & Event
// ============================================================================

/// Opaque, cheaply cloneable event payload
///
/// The bus never looks inside. Consumers recover the concrete type with
/// [`Payload::downcast_ref`]; JSON payloads get the [`Payload::json`]
/// shorthand because most services speak JSON.
#[derive(Clone, Default)]
pub struct Payload {
    value: Option<Arc<dyn Any + Send + Sync>>,
    type_name: &'static str,
}

impl Payload {
    /// A payload carrying nothing
    #[must_use]
    pub fn empty() -> Self {
        Self {
            value: None,
            type_name: "()",
        }
    }

    /// Wrap any thread-safe value
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Some(Arc::new(value)),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Whether the payload carries nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Borrow the payload as `T` if that is what it holds
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    /// Borrow the payload as a JSON value
    #[must_use]
    pub fn json(&self) -> Option<&serde_json::Value> {
        self.downcast_ref::<serde_json::Value>()
    }

    /// Name of the wrapped type (diagnostics only)
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        if self.value.is_none() {
            "()"
        } else {
            self.type_name
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.json() {
            Some(value) => write!(f, "Payload({value})"),
            None => write!(f, "Payload(<{}>)", self.type_name()),
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value)
    }
}

impl From<()> for Payload {
    fn from((): ()) -> Self {
        Self::empty()
    }
}

/// A published event
///
/// Immutable once created; handlers receive it by reference.
#[derive(Clone, Debug)]
pub struct Event {
    topic: String,
    payload: Payload,
    published_at: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current wall-clock time
    pub fn new(topic: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            published_at: Utc::now(),
        }
    }

    /// Topic the event was published on
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The opaque payload
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Wall-clock publish time
    #[must_use]
    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }
}

// ============================================================================
// Handlers & Subscriptions
// ============================================================================

/// Error raised by a subscriber during dispatch
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler reported a failure
    #[error("{0}")]
    Failed(String),

    /// The handler panicked
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Convenience constructor for [`HandlerError::Failed`]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Result returned by handlers
pub type HandlerResult = Result<(), HandlerError>;

type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Unique subscription identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Handle returned by `subscribe`, used to remove the subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    topic: String,
    owner: String,
}

impl SubscriptionHandle {
    /// Subscription identifier
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Subscribed topic
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Module or service that owns the subscription
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

struct Subscription {
    id: SubscriptionId,
    owner: String,
    handler: Handler,
}

/// Outcome of a single publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Handlers that completed successfully
    pub delivered: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

/// Lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Publish calls
    pub published: u64,
    /// Successful handler invocations
    pub delivered: u64,
    /// Failed handler invocations
    pub handler_failures: u64,
}

// ============================================================================
// EventBus
// ============================================================================

#[derive(Default)]
struct BusInner {
    topics: RwLock<HashMap<String, Vec<Arc<Subscription>>>>,
    next_id: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
}

/// Thread-safe publish/subscribe router
///
/// Cheap to clone; clones share the same subscriber table.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.inner.topics.read().len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe an anonymous handler to `topic`
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe_as(ANONYMOUS_OWNER, topic, handler)
    }

    /// Subscribe a handler to `topic` on behalf of `owner`
    ///
    /// Never fails. Malformed topic names are accepted but logged.
    pub fn subscribe_as<F>(
        &self,
        owner: impl Into<String>,
        topic: impl Into<String>,
        handler: F,
    ) -> SubscriptionHandle
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let topic = topic.into();
        let owner = owner.into();
        if !topics::is_well_formed(&topic) {
            tracing::warn!(topic = %topic, owner = %owner, "Subscribing to malformed topic");
        }

        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let subscription = Arc::new(Subscription {
            id,
            owner: owner.clone(),
            handler: Arc::new(handler),
        });

        self.inner
            .topics
            .write()
            .entry(topic.clone())
            .or_default()
            .push(subscription);

        tracing::debug!(topic = %topic, owner = %owner, subscription = %id, "Subscribed");
        SubscriptionHandle { id, topic, owner }
    }

    /// Remove a subscription
    ///
    /// Idempotent; returns whether something was removed. Safe to call from
    /// inside a handler.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut topics = self.inner.topics.write();
        let Some(subscribers) = topics.get_mut(&handle.topic) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != handle.id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            topics.remove(&handle.topic);
        }
        if removed {
            tracing::debug!(topic = %handle.topic, subscription = %handle.id, "Unsubscribed");
        }
        removed
    }

    /// Remove every subscription registered by `owner`
    ///
    /// Returns the number of subscriptions removed.
    pub fn unsubscribe_owner(&self, owner: &str) -> usize {
        let mut topics = self.inner.topics.write();
        let mut removed = 0;
        topics.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|s| s.owner != owner);
            removed += before - subscribers.len();
            !subscribers.is_empty()
        });
        if removed > 0 {
            tracing::debug!(owner = %owner, removed, "Removed owner subscriptions");
        }
        removed
    }

    /// Publish `payload` on `topic`
    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Payload>) -> PublishReport {
        self.publish_event(&Event::new(topic, payload))
    }

    /// Publish an already constructed event
    pub fn publish_event(&self, event: &Event) -> PublishReport {
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let snapshot: Vec<Arc<Subscription>> = self
            .inner
            .topics
            .read()
            .get(event.topic())
            .cloned()
            .unwrap_or_default();

        if snapshot.is_empty() {
            tracing::trace!(topic = %event.topic(), "No subscribers");
            return PublishReport::default();
        }

        let mut report = PublishReport::default();
        for subscription in &snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (subscription.handler)(event)))
                .unwrap_or_else(|payload| {
                    Err(HandlerError::Panicked(panic_message(payload.as_ref())))
                });

            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        topic = %event.topic(),
                        owner = %subscription.owner,
                        subscription = %subscription.id,
                        error = %e,
                        "Event handler failed"
                    );
                }
            }
        }

        self.inner
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.inner
            .handler_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        report
    }

    /// Number of handlers currently subscribed to `topic`
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.read().get(topic).map_or(0, Vec::len)
    }

    /// Topics with at least one subscriber, sorted
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.topics.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Lifetime counters
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            handler_failures: self.inner.handler_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread;

    #[test]
    fn test_publish_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            bus.subscribe("services.mqtt.detection", move |_| {
                log.lock().push(name);
                Ok(())
            });
        }

        let report = bus.publish("services.mqtt.detection", ());
        assert_eq!(report.delivered, 3);
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        let report = bus.publish("nobody.listens", ());
        assert_eq!(report, PublishReport::default());
        assert_eq!(bus.stats().published, 1);
    }

    #[test]
    fn test_topics_are_isolated() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        bus.subscribe("ui.alert", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish("system.restart", ());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        bus.publish("ui.alert", ());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_self_unsubscribe_does_not_affect_current_publish() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

        let (b, s, l) = (bus.clone(), Arc::clone(&slot), Arc::clone(&log));
        let handle = bus.subscribe("t", move |_| {
            l.lock().push("self-removing");
            if let Some(handle) = s.lock().as_ref() {
                b.unsubscribe(handle);
            }
            Ok(())
        });
        *slot.lock() = Some(handle);

        let l = Arc::clone(&log);
        bus.subscribe("t", move |_| {
            l.lock().push("second");
            Ok(())
        });

        bus.publish("t", ());
        assert_eq!(*log.lock(), vec!["self-removing", "second"]);

        log.lock().clear();
        bus.publish("t", ());
        assert_eq!(*log.lock(), vec!["second"]);
    }

    #[test]
    fn test_subscribe_during_dispatch_waits_for_next_publish() {
        let bus = EventBus::new();
        let late_hits = Arc::new(AtomicU64::new(0));

        let (b, hits) = (bus.clone(), Arc::clone(&late_hits));
        bus.subscribe("t", move |_| {
            let hits = Arc::clone(&hits);
            b.subscribe("t", move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        let report = bus.publish("t", ());
        assert_eq!(report.delivered, 1);
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);

        bus.publish("t", ());
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_and_panicking_handlers_are_isolated() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicU64::new(0));

        bus.subscribe("t", |_| Err(HandlerError::failed("boom")));
        bus.subscribe("t", |_| panic!("handler exploded"));
        let r = Arc::clone(&reached);
        bus.subscribe("t", move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = bus.publish("t", ());
        assert_eq!(report.failed, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().handler_failures, 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let handle = bus.subscribe("t", |_| Ok(()));
        assert!(bus.unsubscribe(&handle));
        assert!(!bus.unsubscribe(&handle));
        assert_eq!(bus.subscriber_count("t"), 0);
        assert!(bus.topics().is_empty());
    }

    #[test]
    fn test_unsubscribe_owner_removes_only_that_owner() {
        let bus = EventBus::new();
        bus.subscribe_as("camera", "services.mqtt.detection", |_| Ok(()));
        bus.subscribe_as("camera", "services.video.frame", |_| Ok(()));
        bus.subscribe_as("radar", "services.mqtt.flights", |_| Ok(()));

        assert_eq!(bus.unsubscribe_owner("camera"), 2);
        assert_eq!(bus.unsubscribe_owner("camera"), 0);
        assert_eq!(bus.topics(), vec!["services.mqtt.flights".to_string()]);
    }

    #[test]
    fn test_payload_downcast() {
        let payload = Payload::from(serde_json::json!({"state": "danger"}));
        assert_eq!(payload.json().unwrap()["state"], "danger");
        assert!(payload.downcast_ref::<String>().is_none());

        let frame = Payload::new(vec![0_u8; 4]);
        assert_eq!(frame.downcast_ref::<Vec<u8>>().map(Vec::len), Some(4));
        assert!(Payload::empty().is_empty());
    }

    #[test]
    fn test_concurrent_publishers() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        bus.subscribe("services.mqtt.flights", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        bus.publish("services.mqtt.flights", ());
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(hits.load(Ordering::SeqCst), 1000);
        assert_eq!(bus.stats().published, 1000);
    }
}
