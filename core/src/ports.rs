//! Collaborator ports the scheduler drives but does not implement: worker
//! distribution, per-worker push, per-role broadcast, and the sweep lock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::Result, models::Agent};

/// Message pushed to a single worker's channel.
///
/// `task_returned` marks a bounce-back landing on the task's original coder;
/// every other hand-off is `task_assigned`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PushMessage {
    TaskAssigned { task_id: i64 },
    TaskReturned { task_id: i64 },
}

impl PushMessage {
    pub fn task_id(&self) -> i64 {
        match self {
            PushMessage::TaskAssigned { task_id } | PushMessage::TaskReturned { task_id } => *task_id,
        }
    }
}

/// Broadcast payload delivered to all connected workers of a role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleBroadcast {
    pub event: String,
    pub merged_task_id: i64,
}

/// Claims one idle worker of a role for a project.
///
/// The scheduler only ever knows the string name of the role it wants; the
/// contract is "give me one Idle worker with this role", which lets tests
/// substitute an in-memory implementation.
#[async_trait]
pub trait Distributor: Send + Sync {
    /// Atomically claim the oldest Idle agent of `role` in the project.
    ///
    /// # Returns
    /// * `Ok(Some(Agent))` - The claimed agent, already marked Working
    /// * `Ok(None)` - No agent available; not an error, the task stays
    ///   unassigned until a sweep picks it up
    async fn distribute(&self, project_id: &str, role: &str) -> Result<Option<Agent>>;
}

/// Best-effort push to one worker. A worker without a live session is a
/// no-op; failures are logged by the caller and never surfaced, the task
/// state in the store stays authoritative.
#[async_trait]
pub trait AgentNotifier: Send + Sync {
    async fn notify_agent(&self, agent_id: i64, message: &PushMessage) -> Result<()>;
}

/// Best-effort broadcast to all connected workers of a role in a project.
#[async_trait]
pub trait RoleNotifier: Send + Sync {
    async fn notify_project_role(
        &self,
        project_id: &str,
        role: &str,
        message: &RoleBroadcast,
    ) -> Result<()>;
}

/// Held for the duration of a sweep's critical section; releases on drop,
/// which covers every exit path including errors.
pub trait LockLease: Send {}

/// Mutual exclusion keyed on a stable integer.
///
/// Two sweeps for the same (project, role) key must serialise so they cannot
/// assign the same task or the same agent twice.
#[async_trait]
pub trait AdvisoryLocker: Send + Sync {
    /// Acquire the lock for `key`, waiting until it is free.
    async fn acquire(&self, key: i64) -> Result<Box<dyn LockLease>>;
}
