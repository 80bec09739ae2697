//! Events, handler ids and the in-process event bus

use crate::error::EventError;
use crate::utils::current_timestamp;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};
use uuid::Uuid;

/// An event routed by type to every subscribed handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id
    pub id: Uuid,
    /// Routing key
    pub event_type: String,
    /// Event payload
    pub data: Value,
    /// Creation time in milliseconds since the epoch
    pub timestamp: u64,
}

impl Event {
    /// Create a new event of the given type
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            data,
            timestamp: current_timestamp(),
        }
    }

    /// Deserialize the payload into a concrete type
    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, EventError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Opaque token returned by subscription, required for unsubscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl HandlerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Handler callback. The returned value is collected into the publish results.
pub type EventHandlerFn = Arc<dyn Fn(&Event) -> Result<Value, EventError> + Send + Sync>;

/// Publish/subscribe capability shared by every plugin in a process
pub trait EventBus: Send + Sync {
    /// Subscribe a handler to an event type. Higher priorities run first.
    fn subscribe(&self, event_type: &str, handler: EventHandlerFn, priority: i32) -> HandlerId;

    /// Remove a previously subscribed handler
    fn unsubscribe(&self, handler_id: HandlerId) -> Result<(), EventError>;

    /// Run every handler for the event's type and return their results in dispatch order
    fn publish_sync(&self, event: &Event) -> Result<Vec<Value>, EventError>;

    /// Same as [`EventBus::publish_sync`], but resolves later without blocking the caller
    fn publish_async(&self, event: Event) -> BoxFuture<'static, Result<Vec<Value>, EventError>>;
}

/// Statistics for event bus monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStats {
    pub events_published: u64,
    pub handlers_invoked: u64,
    pub handler_failures: u64,
    pub total_handlers: usize,
}

#[derive(Clone)]
struct Subscription {
    id: HandlerId,
    priority: i32,
    handler: EventHandlerFn,
}

#[derive(Debug, Default)]
struct Counters {
    events_published: AtomicU64,
    handlers_invoked: AtomicU64,
    handler_failures: AtomicU64,
}

/// In-process event bus keyed by event type
pub struct InMemoryEventBus {
    /// Subscriptions per event type, kept sorted by descending priority
    handlers: DashMap<String, SmallVec<[Subscription; 4]>>,
    /// Handler id to event type, for unsubscription
    index: DashMap<HandlerId, String>,
    counters: Arc<Counters>,
}

impl InMemoryEventBus {
    /// Create an empty event bus
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            index: DashMap::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Number of handlers subscribed to an event type
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map(|entry| entry.len()).unwrap_or(0)
    }

    /// Total number of live subscriptions
    pub fn total_handlers(&self) -> usize {
        self.index.len()
    }

    /// Event types with at least one subscription
    pub fn registered_types(&self) -> Vec<String> {
        self.handlers
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Get current statistics
    pub fn stats(&self) -> EventStats {
        EventStats {
            events_published: self.counters.events_published.load(Ordering::Relaxed),
            handlers_invoked: self.counters.handlers_invoked.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
            total_handlers: self.total_handlers(),
        }
    }

    fn snapshot(&self, event_type: &str) -> SmallVec<[Subscription; 4]> {
        self.handlers
            .get(event_type)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch(counters: &Counters, subscriptions: &[Subscription], event: &Event) -> Vec<Value> {
    counters.events_published.fetch_add(1, Ordering::Relaxed);

    let mut results = Vec::with_capacity(subscriptions.len());
    for subscription in subscriptions {
        counters.handlers_invoked.fetch_add(1, Ordering::Relaxed);
        match (subscription.handler)(event) {
            Ok(value) => results.push(value),
            Err(e) => {
                counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!("❌ Handler {} failed on {}: {}", subscription.id, event.event_type, e);
            }
        }
    }
    results
}

impl EventBus for InMemoryEventBus {
    fn subscribe(&self, event_type: &str, handler: EventHandlerFn, priority: i32) -> HandlerId {
        let id = HandlerId::new();
        let mut entry = self.handlers.entry(event_type.to_string()).or_default();

        // Insert after every subscription of equal or higher priority
        let position = entry
            .iter()
            .position(|existing| existing.priority < priority)
            .unwrap_or(entry.len());
        entry.insert(position, Subscription { id, priority, handler });
        drop(entry);

        self.index.insert(id, event_type.to_string());
        debug!("📝 Registered handler {} for {} (priority {})", id, event_type, priority);
        id
    }

    fn unsubscribe(&self, handler_id: HandlerId) -> Result<(), EventError> {
        let (_, event_type) = self
            .index
            .remove(&handler_id)
            .ok_or_else(|| EventError::HandlerNotFound(handler_id.to_string()))?;

        if let Some(mut entry) = self.handlers.get_mut(&event_type) {
            entry.retain(|subscription| subscription.id != handler_id);
        }
        self.handlers.remove_if(&event_type, |_, subscriptions| subscriptions.is_empty());

        debug!("🗑️ Removed handler {} from {}", handler_id, event_type);
        Ok(())
    }

    fn publish_sync(&self, event: &Event) -> Result<Vec<Value>, EventError> {
        let subscriptions = self.snapshot(&event.event_type);
        trace!("📤 Publishing {} to {} handlers", event.event_type, subscriptions.len());
        Ok(dispatch(&self.counters, &subscriptions, event))
    }

    fn publish_async(&self, event: Event) -> BoxFuture<'static, Result<Vec<Value>, EventError>> {
        let subscriptions = self.snapshot(&event.event_type);
        let counters = self.counters.clone();
        trace!("📤 Queued {} for {} handlers", event.event_type, subscriptions.len());

        async move {
            tokio::task::yield_now().await;
            Ok(dispatch(&counters, &subscriptions, &event))
        }
        .boxed()
    }
}
