//! Notifier stand-ins for a dispatcher running without a connected
//! transport.
//!
//! The push and broadcast ports are best-effort by contract: a worker
//! without a live session is a no-op. Until a transport session layer
//! registers real channels, these implementations record that fact in the
//! logs and nothing else.

use async_trait::async_trait;

use dispatch_core::{
    error::Result,
    ports::{AgentNotifier, PushMessage, RoleBroadcast, RoleNotifier},
};

pub struct LoggingAgentNotifier;

#[async_trait]
impl AgentNotifier for LoggingAgentNotifier {
    async fn notify_agent(&self, agent_id: i64, message: &PushMessage) -> Result<()> {
        tracing::debug!(agent_id, ?message, "push skipped: no session transport attached");
        Ok(())
    }
}

pub struct LoggingRoleNotifier;

#[async_trait]
impl RoleNotifier for LoggingRoleNotifier {
    async fn notify_project_role(
        &self,
        project_id: &str,
        role: &str,
        message: &RoleBroadcast,
    ) -> Result<()> {
        tracing::debug!(project_id, role, ?message, "broadcast skipped: no session transport attached");
        Ok(())
    }
}
