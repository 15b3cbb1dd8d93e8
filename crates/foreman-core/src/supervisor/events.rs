//! The supervisor's own event union, layered on top of the queue's
//! `TaskQueueEvent` stream via the same broadcast-channel fan-out shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::SupervisorStats;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SupervisorEvent {
    AutonomousStarted { timestamp: DateTime<Utc> },
    AutonomousProgress { stats: SupervisorStats, timestamp: DateTime<Utc> },
    AutonomousPaused { timestamp: DateTime<Utc> },
    AutonomousResumed { timestamp: DateTime<Utc> },
    AutonomousStopped { timestamp: DateTime<Utc> },
    AutonomousError { message: String, timestamp: DateTime<Utc> },
    AutonomousIdleTimeout { timestamp: DateTime<Utc> },
    TaskStuck { task_id: Uuid, timestamp: DateTime<Utc> },
    TaskRetried { task_id: Uuid, timestamp: DateTime<Utc> },
    AutoApproved { task_id: Uuid, gate_id: Uuid, timestamp: DateTime<Utc> },
    ManualApprovalRequired { task_id: Uuid, gate_id: Uuid, timestamp: DateTime<Utc> },
}

pub struct SupervisorEventBus {
    sender: broadcast::Sender<SupervisorEvent>,
}

impl SupervisorEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SupervisorEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for SupervisorEventBus {
    fn default() -> Self {
        Self::new()
    }
}
