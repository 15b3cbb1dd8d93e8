//! The typed event union the queue engine emits, plus a fan-out
//! subscription registry built on a broadcast channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::broadcast;
use uuid::Uuid;

/// One emitted event, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskQueueEvent {
    TaskQueued { task_id: Uuid, timestamp: DateTime<Utc> },
    TaskStarted { task_id: Uuid, timestamp: DateTime<Utc> },
    TaskProgress { task_id: Uuid, data: Json, timestamp: DateTime<Utc> },
    TaskCompleted { task_id: Uuid, data: Json, timestamp: DateTime<Utc> },
    TaskFailed { task_id: Uuid, data: Json, timestamp: DateTime<Utc> },
    TaskCancelled { task_id: Uuid, timestamp: DateTime<Utc> },
    TaskApprovalRequired { task_id: Uuid, data: Json, timestamp: DateTime<Utc> },
    QueueStarted { timestamp: DateTime<Utc> },
    QueuePaused { timestamp: DateTime<Utc> },
    QueueResumed { timestamp: DateTime<Utc> },
    QueueCompleted { timestamp: DateTime<Utc> },
}

impl TaskQueueEvent {
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::TaskQueued { task_id, .. }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskProgress { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskCancelled { task_id, .. }
            | Self::TaskApprovalRequired { task_id, .. } => Some(*task_id),
            Self::QueueStarted { .. }
            | Self::QueuePaused { .. }
            | Self::QueueResumed { .. }
            | Self::QueueCompleted { .. } => None,
        }
    }
}

/// A per-queue fan-out registry. Subscribers are additive; a slow or
/// absent subscriber never blocks emission -- lagging receivers drop the
/// oldest events, matching the "ordering is per-emitter FIFO" guarantee
/// without back-pressuring the engine.
pub struct EventBus {
    sender: broadcast::Sender<TaskQueueEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskQueueEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. No-op (never errors) when there are no subscribers.
    pub fn emit(&self, event: TaskQueueEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
