//! Recording implementations of the notifier ports.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use dispatch_core::{
    error::{DispatchError, Result},
    ports::{AgentNotifier, PushMessage, RoleBroadcast, RoleNotifier},
};

/// Records every per-worker push for later assertions.
#[derive(Default)]
pub struct RecordingAgentNotifier {
    pushes: Arc<Mutex<Vec<(i64, PushMessage)>>>,
    fail_next: Arc<Mutex<bool>>,
}

impl RecordingAgentNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded pushes in order
    pub fn pushes(&self) -> Vec<(i64, PushMessage)> {
        self.pushes.lock().clone()
    }

    /// Pushes delivered to one agent, in order
    pub fn pushes_for(&self, agent_id: i64) -> Vec<PushMessage> {
        self.pushes
            .lock()
            .iter()
            .filter(|(id, _)| *id == agent_id)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Make the next push fail. Pushes are best-effort, so the scheduler
    /// must log and carry on.
    pub fn fail_next(&self) {
        *self.fail_next.lock() = true;
    }
}

#[async_trait]
impl AgentNotifier for RecordingAgentNotifier {
    async fn notify_agent(&self, agent_id: i64, message: &PushMessage) -> Result<()> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(DispatchError::Notify("injected push failure".to_string()));
        }
        self.pushes.lock().push((agent_id, message.clone()));
        Ok(())
    }
}

/// Records every role broadcast for later assertions.
#[derive(Default)]
pub struct RecordingRoleNotifier {
    broadcasts: Arc<Mutex<Vec<(String, String, RoleBroadcast)>>>,
    fail_next: Arc<Mutex<bool>>,
}

impl RecordingRoleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded broadcasts as (project_id, role, payload)
    pub fn broadcasts(&self) -> Vec<(String, String, RoleBroadcast)> {
        self.broadcasts.lock().clone()
    }

    /// Broadcasts for one (project, role) pair
    pub fn broadcasts_for(&self, project_id: &str, role: &str) -> Vec<RoleBroadcast> {
        self.broadcasts
            .lock()
            .iter()
            .filter(|(p, r, _)| p == project_id && r == role)
            .map(|(_, _, payload)| payload.clone())
            .collect()
    }

    pub fn fail_next(&self) {
        *self.fail_next.lock() = true;
    }
}

#[async_trait]
impl RoleNotifier for RecordingRoleNotifier {
    async fn notify_project_role(
        &self,
        project_id: &str,
        role: &str,
        message: &RoleBroadcast,
    ) -> Result<()> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(DispatchError::Notify("injected broadcast failure".to_string()));
        }
        self.broadcasts
            .lock()
            .push((project_id.to_string(), role.to_string(), message.clone()));
        Ok(())
    }
}
