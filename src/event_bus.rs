//! Typed publish/subscribe hub used as the only cross-component channel.
//!
//! Ported from a Python callback-dict bus: subscriber lists are
//! copy-on-write, dispatch to each handler is isolated (one handler
//! failing never aborts the others), and a wildcard subscriber sees
//! every event regardless of topic.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::domain::Event;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
pub type Handler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

const WILDCARD: &str = "*";

#[derive(Default)]
struct Subscribers {
    by_topic: HashMap<String, Vec<Handler>>,
}

#[derive(Debug, Default, Clone)]
pub struct EventBusStats {
    pub total_subscribers: usize,
    pub topics: usize,
    pub wildcard_subscribers: usize,
    pub event_counts: HashMap<String, u64>,
}

/// Central event bus. Cheap to clone (all state is behind `Arc`).
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<Subscribers>>,
    counts: Arc<RwLock<HashMap<String, Arc<AtomicU64>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Subscribers::default())),
            counts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe to a topic (e.g. `k.orderbook_update`) or `"*"` for every
    /// event. The handler runs on its own task per publish, so a slow or
    /// panicking handler cannot block or poison the publisher.
    pub fn subscribe(&self, topic: &str, handler: Handler) {
        let mut subs = self.subscribers.write();
        subs.by_topic.entry(topic.to_string()).or_default().push(handler);
        debug!(topic, "event subscription added");
    }

    /// Publish an event under `topic`, dispatching concurrently to every
    /// matching handler plus any wildcard subscribers. Returns the errors
    /// collected from handlers that failed; the caller does not retry.
    pub async fn publish(&self, topic: &str, event: Event) -> Vec<String> {
        self.counts
            .write()
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(1, Ordering::Relaxed);

        let handlers: Vec<Handler> = {
            let subs = self.subscribers.read();
            let mut out = Vec::new();
            if let Some(h) = subs.by_topic.get(topic) {
                out.extend(h.iter().cloned());
            }
            if let Some(h) = subs.by_topic.get(WILDCARD) {
                out.extend(h.iter().cloned());
            }
            out
        };

        if handlers.is_empty() {
            debug!(topic, "no subscribers for event");
            return Vec::new();
        }

        let mut tasks = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let event = event.clone();
            tasks.push(tokio::spawn(async move { (handler)(event).await }));
        }

        let mut errors = Vec::new();
        for task in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(join_err) => errors.push(format!("handler panicked: {join_err}")),
            }
        }

        if !errors.is_empty() {
            warn!(topic, errors = errors.len(), "event handlers reported errors");
        }
        errors
    }

    pub fn stats(&self) -> EventBusStats {
        let subs = self.subscribers.read();
        let wildcard = subs.by_topic.get(WILDCARD).map(|v| v.len()).unwrap_or(0);
        let total_subscribers: usize = subs.by_topic.values().map(|v| v.len()).sum();
        let event_counts = self
            .counts
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();
        EventBusStats {
            total_subscribers,
            topics: subs.by_topic.len(),
            wildcard_subscribers: wildcard,
            event_counts,
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
    use crate::domain::{ConnectionStatusEvent, Event};
    use std::sync::atomic::AtomicUsize;

    fn boxed_handler(counter: Arc<AtomicUsize>) -> Handler {
        Arc::new(move |_event: Event| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn dispatches_to_matching_and_wildcard_subscribers() {
        let bus = EventBus::new();
        let topic_hits = Arc::new(AtomicUsize::new(0));
        let wildcard_hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe("venue.connection_status", boxed_handler(topic_hits.clone()));
        bus.subscribe(WILDCARD, boxed_handler(wildcard_hits.clone()));

        let event = Event::VenueConnectionStatus(ConnectionStatusEvent {
            client_id: "k".into(),
            connected: true,
        });
        let errors = bus.publish("venue.connection_status", event).await;

        assert!(errors.is_empty());
        assert_eq!(topic_hits.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_handler_failure_does_not_abort_others() {
        let bus = EventBus::new();
        let ok_hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(
            "venue.client_error",
            Arc::new(|_event: Event| Box::pin(async move { Err("boom".to_string()) })),
        );
        bus.subscribe("venue.client_error", boxed_handler(ok_hits.clone()));

        let event = Event::VenueClientError(crate::domain::ErrorEvent {
            client_id: "k".into(),
            error: "boom".into(),
        });
        let errors = bus.publish("venue.client_error", event).await;

        assert_eq!(errors.len(), 1);
        assert_eq!(ok_hits.load(Ordering::SeqCst), 1);
    }
}
