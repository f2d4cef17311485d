//! Process-wide change notifications.
//!
//! The scheduler publishes; the reaper subscribes. Neither knows of the
//! other. In a single process a channel-based bus is the production
//! implementation; a multi-process deployment would back the same port with
//! the database's notify/listen facility.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

/// Fan-out channels. Task-shaped events and agent-shaped events travel
/// separately so the reaper only wakes for agent liveness changes.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum EventChannel {
    Task,
    Agent,
}

/// Change notifications published on the bus. Delivery is fire-and-forget;
/// anything that must not be lost belongs in the store, not on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TaskCreated { task_id: i64, project_id: String },
    TaskUpdated { task_id: i64, project_id: String },
    TaskAssigned { task_id: i64, project_id: String, agent_id: i64 },
    TaskCompleted { task_id: i64, project_id: String },
    AgentOnline { agent_id: i64, project_id: String },
    AgentOffline { agent_id: i64, project_id: String },
}

impl Event {
    /// The channel this event fans out on.
    pub fn channel(&self) -> EventChannel {
        match self {
            Event::TaskCreated { .. }
            | Event::TaskUpdated { .. }
            | Event::TaskAssigned { .. }
            | Event::TaskCompleted { .. } => EventChannel::Task,
            Event::AgentOnline { .. } | Event::AgentOffline { .. } => EventChannel::Agent,
        }
    }
}

/// Event bus port: fire-and-forget publish plus channel subscription.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event on its channel. Publishing to a channel nobody
    /// listens on is not an error.
    async fn publish(&self, event: Event) -> Result<()>;

    /// Subscribe to a channel. Slow subscribers may observe
    /// [`broadcast::error::RecvError::Lagged`] and should resync from the
    /// store rather than replaying.
    fn subscribe(&self, channel: EventChannel) -> broadcast::Receiver<Event>;
}

/// Channel-backed bus for a single dispatcher process.
pub struct InProcessEventBus {
    task_tx: broadcast::Sender<Event>,
    agent_tx: broadcast::Sender<Event>,
}

impl InProcessEventBus {
    /// Create a bus with the given per-channel buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (task_tx, _) = broadcast::channel(capacity);
        let (agent_tx, _) = broadcast::channel(capacity);
        Self { task_tx, agent_tx }
    }

    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    fn sender(&self, channel: EventChannel) -> &broadcast::Sender<Event> {
        match channel {
            EventChannel::Task => &self.task_tx,
            EventChannel::Agent => &self.agent_tx,
        }
    }
}

impl Default for InProcessEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InProcessEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        // send only fails when there are no receivers, which is fine for a
        // fire-and-forget bus
        let _ = self.sender(event.channel()).send(event);
        Ok(())
    }

    fn subscribe(&self, channel: EventChannel) -> broadcast::Receiver<Event> {
        self.sender(channel).subscribe()
    }
}
