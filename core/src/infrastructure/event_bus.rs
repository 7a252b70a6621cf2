// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Task event hub — publish-many, subscribe-many, with silent error
//! containment. A lagging or dropped subscriber never affects another.

use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::domain::event::LiveTaskEvent;
use crate::domain::task::TaskId;

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("event bus channel closed")]
    Closed,
    #[error("subscriber lagged, {0} events dropped")]
    Lagged(u64),
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LiveTaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1_000)
    }

    pub fn publish(&self, event: LiveTaskEvent) {
        // A publish with no subscribers is not an error: the journal is
        // still the source of truth and a late subscriber reads from there.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            inner: BroadcastStream::new(self.sender.subscribe()),
        }
    }

    /// A receiver filtered to events for one task, matching the spec's
    /// per-task subscriber semantics.
    pub fn subscribe_task(&self, task_id: TaskId) -> TaskEventReceiver {
        TaskEventReceiver {
            inner: BroadcastStream::new(self.sender.subscribe()),
            task_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct EventReceiver {
    inner: BroadcastStream<LiveTaskEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<LiveTaskEvent, EventBusError> {
        match self.inner.next().await {
            Some(Ok(event)) => Ok(event),
            Some(Err(BroadcastStreamRecvError::Lagged(n))) => Err(EventBusError::Lagged(n)),
            None => Err(EventBusError::Closed),
        }
    }
}

pub struct TaskEventReceiver {
    inner: BroadcastStream<LiveTaskEvent>,
    task_id: TaskId,
}

impl TaskEventReceiver {
    /// Awaits the next event for this receiver's task, silently skipping
    /// events belonging to other tasks and silently absorbing lag —
    /// subscribers must never be poisoned by one missed batch.
    pub async fn recv(&mut self) -> Option<LiveTaskEvent> {
        loop {
            match self.inner.next().await {
                Some(Ok(event)) if event.task_id == self.task_id => return Some(event),
                Some(Ok(_)) => continue,
                Some(Err(BroadcastStreamRecvError::Lagged(_))) => continue,
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let task_id = TaskId::new();
        bus.publish(LiveTaskEvent::new(task_id, "status_changed", json!({"status": "running"})));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.task_id, task_id);
    }

    #[tokio::test]
    async fn task_filtering_drops_other_tasks_events() {
        let bus = EventBus::new(16);
        let task_a = TaskId::new();
        let task_b = TaskId::new();
        let mut rx = bus.subscribe_task(task_a);

        bus.publish(LiveTaskEvent::new(task_b, "status_changed", json!({"status": "running"})));
        bus.publish(LiveTaskEvent::new(task_a, "status_changed", json!({"status": "completed"})));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.task_id, task_a);
        assert_eq!(event.payload["status"], "completed");
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_their_own_copy() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(LiveTaskEvent::new(TaskId::new(), "output", json!({"stream": "stdout"})));
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
