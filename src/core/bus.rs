//! In-process event bus.
//!
//! The pipeline publishes its lifecycle on the bus and everything else
//! listens: the CLI prints alerts, tests capture event order, and a
//! broadcast adapter can forward events out of process. Subscribers get
//! their own unbounded queue; a slow consumer never blocks a publisher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Kinds of events the pipeline publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    SessionStopped,
    ChunkTranscribed,
    SummaryUpdated,
    CoachingAlert,
    PaceWarning,
    CompetitorMention,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::SessionStopped => "session_stopped",
            EventKind::ChunkTranscribed => "chunk_transcribed",
            EventKind::SummaryUpdated => "summary_updated",
            EventKind::CoachingAlert => "coaching_alert",
            EventKind::PaceWarning => "pace_warning",
            EventKind::CompetitorMention => "competitor_mention",
        }
    }
}

/// A published event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub data: Value,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, session_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            data,
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }
}

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Inner {
    // None key = wildcard subscription
    queues: HashMap<Option<EventKind>, Vec<(u64, UnboundedSender<Event>)>>,
    callbacks: HashMap<Option<EventKind>, Vec<(u64, Callback)>>,
}

/// A queue subscription handed out by [`EventBus::subscribe`].
///
/// Dropping the subscription detaches it; the bus prunes the dead queue
/// on the next publish.
pub struct Subscription {
    pub id: u64,
    pub kind: Option<EventKind>,
    pub receiver: UnboundedReceiver<Event>,
}

impl Subscription {
    /// Drain everything currently queued without waiting.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Fan-out hub for pipeline events
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe with a per-subscriber queue. `None` subscribes to every
    /// event kind.
    pub fn subscribe(&self, kind: Option<EventKind>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded_channel();
        self.lock().queues.entry(kind).or_default().push((id, tx));
        Subscription {
            id,
            kind,
            receiver: rx,
        }
    }

    /// Register a synchronous callback. Callbacks run inline on the
    /// publisher's task, so they must be fast and must not publish
    /// reentrantly.
    pub fn subscribe_fn(
        &self,
        kind: Option<EventKind>,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .callbacks
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscription or callback by id.
    pub fn unsubscribe(&self, id: u64) {
        let mut inner = self.lock();
        for subs in inner.queues.values_mut() {
            subs.retain(|(sub_id, _)| *sub_id != id);
        }
        for subs in inner.callbacks.values_mut() {
            subs.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Deliver an event to exact-kind queues, then wildcard queues, then
    /// exact-kind callbacks, then wildcard callbacks.
    pub fn publish(&self, event: Event) {
        // Clone callbacks out so they run outside the lock
        let callbacks: Vec<Callback> = {
            let mut inner = self.lock();

            for key in [Some(event.kind), None] {
                if let Some(subs) = inner.queues.get_mut(&key) {
                    subs.retain(|(_, tx)| tx.send(event.clone()).is_ok());
                }
            }

            let mut out = Vec::new();
            for key in [Some(event.kind), None] {
                if let Some(subs) = inner.callbacks.get(&key) {
                    out.extend(subs.iter().map(|(_, cb)| Arc::clone(cb)));
                }
            }
            out
        };

        for callback in callbacks {
            callback(&event);
        }
    }

    /// Deliver only to callbacks, skipping queues. Used for chatty
    /// progress events no queue consumer should have to drain.
    pub fn publish_sync(&self, event: Event) {
        let callbacks: Vec<Callback> = {
            let inner = self.lock();
            let mut out = Vec::new();
            for key in [Some(event.kind), None] {
                if let Some(subs) = inner.callbacks.get(&key) {
                    out.extend(subs.iter().map(|(_, cb)| Arc::clone(cb)));
                }
            }
            out
        };

        for callback in callbacks {
            callback(&event);
        }
    }

    /// Number of live subscriptions and callbacks, all kinds combined.
    pub fn subscriber_count(&self) -> usize {
        let inner = self.lock();
        let queues: usize = inner.queues.values().map(Vec::len).sum();
        let callbacks: usize = inner.callbacks.values().map(Vec::len).sum();
        queues + callbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: EventKind) -> Event {
        Event::new(kind, "test-session", json!({"n": 1}))
    }

    #[test]
    fn test_exact_subscription_receives_matching_only() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Some(EventKind::CoachingAlert));

        bus.publish(event(EventKind::ChunkTranscribed));
        bus.publish(event(EventKind::CoachingAlert));

        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::CoachingAlert);
    }

    #[test]
    fn test_wildcard_receives_everything() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(None);

        bus.publish(event(EventKind::SessionStarted));
        bus.publish(event(EventKind::SummaryUpdated));

        let events = sub.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::SessionStarted);
        assert_eq!(events[1].kind, EventKind::SummaryUpdated);
    }

    #[test]
    fn test_callbacks_run_inline() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_cb = Arc::clone(&seen);
        bus.subscribe_fn(Some(EventKind::CoachingAlert), move |e| {
            seen_cb.lock().unwrap().push(e.kind);
        });

        bus.publish(event(EventKind::CoachingAlert));
        bus.publish(event(EventKind::ChunkTranscribed));

        assert_eq!(&*seen.lock().unwrap(), &[EventKind::CoachingAlert]);
    }

    #[test]
    fn test_publish_sync_skips_queues() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(None);
        let seen = Arc::new(Mutex::new(0usize));

        let seen_cb = Arc::clone(&seen);
        bus.subscribe_fn(None, move |_| {
            *seen_cb.lock().unwrap() += 1;
        });

        bus.publish_sync(event(EventKind::ChunkTranscribed));

        assert!(sub.drain().is_empty());
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0usize));

        let seen_cb = Arc::clone(&seen);
        let id = bus.subscribe_fn(None, move |_| {
            *seen_cb.lock().unwrap() += 1;
        });

        bus.publish(event(EventKind::SessionStarted));
        bus.unsubscribe(id);
        bus.publish(event(EventKind::SessionStarted));

        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let bus = EventBus::new();
        let sub = bus.subscribe(None);
        assert_eq!(bus.subscriber_count(), 1);

        drop(sub);
        bus.publish(event(EventKind::SessionStarted));

        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_delivery_order_within_publisher() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Some(EventKind::ChunkTranscribed));

        for n in 0..5 {
            bus.publish(Event::new(
                EventKind::ChunkTranscribed,
                "s",
                json!({"index": n}),
            ));
        }

        let indices: Vec<i64> = sub
            .drain()
            .iter()
            .map(|e| e.data["index"].as_i64().unwrap())
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }
}
