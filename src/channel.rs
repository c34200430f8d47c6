//! In-process publish/subscribe channel for pipeline events.
//!
//! Subscribers are registered while the orchestrator is being wired and are
//! called synchronously, in subscription order, for every event on their
//! topic. A failing or panicking subscriber is logged and skipped; it never
//! affects the run or the other subscribers.
//!
//! The bus also keeps the last [`HISTORY_LIMIT`] events of each topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

/// Events retained per topic.
pub const HISTORY_LIMIT: usize = 100;

/// Topic names published by the orchestrator.
pub mod topics {
    pub const KNOWLEDGE_EXTRACTED: &str = "knowledge.extracted";
    pub const STRATEGY_READY: &str = "strategy.ready";
    pub const CHAPTER_PLANNED: &str = "chapter.planned";
    pub const CHAPTER_WRITTEN: &str = "chapter.written";
    pub const QUALITY_SCORED: &str = "quality.scored";
    /// Score below threshold, published before a revision round.
    pub const QUALITY_ALERT: &str = "quality.alert";
    pub const RUN_COMPLETED: &str = "run.completed";

    pub const ALL: [&str; 7] = [
        KNOWLEDGE_EXTRACTED,
        STRATEGY_READY,
        CHAPTER_PLANNED,
        CHAPTER_WRITTEN,
        QUALITY_SCORED,
        QUALITY_ALERT,
        RUN_COMPLETED,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub topic: String,
    pub publisher: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl ChannelEvent {
    pub fn new(topic: impl Into<String>, publisher: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            publisher: publisher.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

pub type Subscriber = Arc<dyn Fn(&ChannelEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<String, Vec<Subscriber>>,
    history: Mutex<HashMap<String, VecDeque<ChannelEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, topic: impl Into<String>, callback: F)
    where
        F: Fn(&ChannelEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribers
            .entry(topic.into())
            .or_default()
            .push(Arc::new(callback));
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.get(topic).map_or(0, Vec::len)
    }

    /// Events published on `topic`, oldest first.
    pub fn history(&self, topic: &str) -> Vec<ChannelEvent> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history
            .get(topic)
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn record(&self, event: &ChannelEvent) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let events = history.entry(event.topic.clone()).or_default();
        if events.len() == HISTORY_LIMIT {
            events.pop_front();
        }
        events.push_back(event.clone());
    }

    /// Record an event and deliver it to every subscriber of its topic.
    ///
    /// Returns the number of subscribers that handled it successfully.
    pub fn publish(&self, event: &ChannelEvent) -> usize {
        self.record(event);
        let Some(subscribers) = self.subscribers.get(&event.topic) else {
            return 0;
        };

        let mut delivered = 0;
        for (index, subscriber) in subscribers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| subscriber(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(topic = %event.topic, subscriber = index, error = %e, "Subscriber failed");
                }
                Err(_) => {
                    tracing::warn!(topic = %event.topic, subscriber = index, "Subscriber panicked");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn event(topic: &str) -> ChannelEvent {
        ChannelEvent::new(topic, "test", json!({"n": 1}))
    }

    #[test]
    fn test_delivers_in_subscription_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        for id in 0..3 {
            let seen = seen.clone();
            bus.subscribe(topics::CHAPTER_WRITTEN, move |_| {
                seen.lock().unwrap().push(id);
                Ok(())
            });
        }
        assert_eq!(bus.publish(&event(topics::CHAPTER_WRITTEN)), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_failing_and_panicking_subscribers_are_skipped() {
        let seen = Arc::new(Mutex::new(0));
        let mut bus = EventBus::new();
        bus.subscribe(topics::QUALITY_ALERT, |_| anyhow::bail!("broken"));
        bus.subscribe(topics::QUALITY_ALERT, |_| panic!("boom"));
        let counter = seen.clone();
        bus.subscribe(topics::QUALITY_ALERT, move |e| {
            assert_eq!(e.payload["n"], 1);
            *counter.lock().unwrap() += 1;
            Ok(())
        });
        assert_eq!(bus.publish(&event(topics::QUALITY_ALERT)), 1);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_topics_are_isolated() {
        let mut bus = EventBus::new();
        bus.subscribe(topics::RUN_COMPLETED, |_| Ok(()));
        assert_eq!(bus.publish(&event(topics::STRATEGY_READY)), 0);
        assert_eq!(bus.subscriber_count(topics::RUN_COMPLETED), 1);
        assert_eq!(bus.subscriber_count(topics::STRATEGY_READY), 0);
    }

    #[test]
    fn test_history_is_kept_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(&ChannelEvent::new(topics::CHAPTER_WRITTEN, "a", json!({"number": 81})));
        bus.publish(&ChannelEvent::new(topics::CHAPTER_WRITTEN, "a", json!({"number": 82})));
        bus.publish(&event(topics::RUN_COMPLETED));

        let numbers: Vec<_> = bus
            .history(topics::CHAPTER_WRITTEN)
            .iter()
            .map(|e| e.payload["number"].as_u64().unwrap())
            .collect();
        assert_eq!(numbers, vec![81, 82]);
        assert_eq!(bus.history(topics::RUN_COMPLETED).len(), 1);
        assert!(bus.history(topics::QUALITY_ALERT).is_empty());
    }

    #[test]
    fn test_history_drops_oldest_events() {
        let bus = EventBus::new();
        for n in 0..HISTORY_LIMIT + 5 {
            bus.publish(&ChannelEvent::new(topics::QUALITY_SCORED, "checker", json!({ "n": n })));
        }
        let history = bus.history(topics::QUALITY_SCORED);
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].payload["n"], 5);
        assert_eq!(history[HISTORY_LIMIT - 1].payload["n"], HISTORY_LIMIT + 4);
    }

    #[test]
    fn test_event_serializes() {
        let json = serde_json::to_value(event(topics::QUALITY_SCORED)).unwrap();
        assert_eq!(json["topic"], "quality.scored");
        assert_eq!(json["publisher"], "test");
    }
}
