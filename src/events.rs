//! Domain events published after each committed mutation.
//!
//! Publishing is fire-and-forget: a sink cannot fail the operation that
//! produced the event, and events are only handed over once the write is durable.
use crate::order::{ActorRole, OrderStatus};
use crate::review::ReviewResult;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum DomainEvent {
    #[serde(rename = "order.status.changed", rename_all = "camelCase")]
    StatusChanged {
        order_id: String,
        display_id: String,
        previous_status: Option<OrderStatus>,
        new_status: OrderStatus,
        actor_id: String,
        actor_role: ActorRole,
        notes: Option<String>,
    },
    #[serde(rename = "order.review.completed", rename_all = "camelCase")]
    ReviewCompleted {
        order_id: String,
        review_id: String,
        result: ReviewResult,
        approved_qty: u64,
        rejected_qty: u64,
        second_quality_qty: u64,
        reviewer_id: String,
    },
    #[serde(rename = "order.rework.spawned", rename_all = "camelCase")]
    ReworkSpawned {
        parent_order_id: String,
        child_order_id: String,
        quantity: u64,
        revision_number: u32,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::StatusChanged { .. } => "order.status.changed",
            DomainEvent::ReviewCompleted { .. } => "order.review.completed",
            DomainEvent::ReworkSpawned { .. } => "order.rework.spawned",
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            DomainEvent::StatusChanged { order_id, .. }
            | DomainEvent::ReviewCompleted { order_id, .. } => order_id,
            DomainEvent::ReworkSpawned {
                parent_order_id, ..
            } => parent_order_id,
        }
    }

    /// `{"event": "<name>", "payload": {...}}`
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: &DomainEvent);
}

/// Writes every event to the `order_events` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &DomainEvent) {
        match event.to_json() {
            Ok(payload) => tracing::info!(
                target: "order_events",
                event = event.name(),
                order_id = event.order_id(),
                %payload,
                "domain event"
            ),
            Err(err) => tracing::warn!(
                target: "order_events",
                event = event.name(),
                error = %err,
                "failed to render event payload"
            ),
        }
    }
}

/// Keeps events in memory for inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DomainEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(DomainEvent::name).collect()
    }

    pub fn drain(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: &DomainEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Fans one event out to several sinks.
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<std::sync::Arc<dyn EventSink>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, sink: std::sync::Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanOut {
    fn publish(&self, event: &DomainEvent) {
        for sink in &self.sinks {
            sink.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn payload_uses_event_names_and_camel_case() {
        let event = DomainEvent::ReviewCompleted {
            order_id: "order_1".into(),
            review_id: "review_1".into(),
            result: ReviewResult::Partial,
            approved_qty: 80,
            rejected_qty: 15,
            second_quality_qty: 5,
            reviewer_id: "user_1".into(),
        };

        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "order.review.completed");
        assert_eq!(json["payload"]["result"], "PARTIAL");
        assert_eq!(json["payload"]["secondQualityQty"], 5);
    }

    #[test]
    fn fan_out_reaches_every_sink() {
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        let fan = FanOut::new().with(a.clone()).with(b.clone());

        fan.publish(&DomainEvent::ReworkSpawned {
            parent_order_id: "order_1".into(),
            child_order_id: "order_2".into(),
            quantity: 15,
            revision_number: 1,
        });

        assert_eq!(a.names(), vec!["order.rework.spawned"]);
        assert_eq!(b.drain().len(), 1);
        assert!(b.events().is_empty());
    }

    #[test]
    fn memory_sink_survives_a_poisoned_lock() {
        let sink = Arc::new(MemorySink::new());
        let poisoner = sink.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.events.lock().unwrap();
            panic!("poison the sink");
        })
        .join();
        assert!(sink.events.is_poisoned());

        sink.publish(&DomainEvent::ReworkSpawned {
            parent_order_id: "order_1".into(),
            child_order_id: "order_2".into(),
            quantity: 4,
            revision_number: 1,
        });

        assert_eq!(sink.names(), vec!["order.rework.spawned"]);
        assert_eq!(sink.drain().len(), 1);
    }
}
