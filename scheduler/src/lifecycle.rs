//! Agent lifecycle primitives consumed by the scheduler and the transport.

use dispatch_core::{
    error::Result,
    events::Event,
    models::{Agent, AgentStatus, NewAgent},
};

use crate::scheduler::Scheduler;

/// Register / reactivate / mark / reap operations on agents.
///
/// Each liveness change is announced on the bus so the reaper can keep its
/// grace timers in step. Registration and reactivation also trigger a sweep
/// for the agent's role: a worker coming online is exactly the moment
/// stranded tasks become placeable.
pub struct AgentLifecycle {
    scheduler: Scheduler,
}

impl AgentLifecycle {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// Create an Idle agent and publish `AgentOnline`.
    pub async fn register(&self, new_agent: NewAgent) -> Result<Agent> {
        let agent = self.scheduler.agent_store().create(new_agent).await?;
        tracing::info!(agent_id = agent.id, project_id = %agent.project_id, role = %agent.role, "agent registered");
        self.scheduler
            .publish(Event::AgentOnline {
                agent_id: agent.id,
                project_id: agent.project_id.clone(),
            })
            .await;
        self.scheduler.schedule_sweep(&agent.project_id, &agent.role);
        Ok(agent)
    }

    /// Reconnect with a previously issued id: set the agent Idle and
    /// publish `AgentOnline`.
    ///
    /// Unconditional: an agent still marked Working loses that marker and
    /// its `current_task_id`. A safer variant would CAS on Offline.
    pub async fn reactivate(&self, agent_id: i64) -> Result<Agent> {
        let agent = self.scheduler.agent_store().set_idle(agent_id).await?;
        tracing::info!(agent_id, role = %agent.role, "agent reactivated");
        self.scheduler
            .publish(Event::AgentOnline {
                agent_id,
                project_id: agent.project_id.clone(),
            })
            .await;
        self.scheduler.schedule_sweep(&agent.project_id, &agent.role);
        Ok(agent)
    }

    /// Mark the agent Working on a task.
    ///
    /// No Offline guard: a claim racing a reap may transiently mark an
    /// Offline agent Working. The reaper's release pass corrects it.
    pub async fn set_working(&self, agent_id: i64, task_id: i64) -> Result<Agent> {
        self.scheduler.agent_store().set_working(agent_id, task_id).await
    }

    /// Mark the agent Idle, clearing its current task.
    pub async fn set_idle(&self, agent_id: i64) -> Result<Agent> {
        self.scheduler.agent_store().set_idle(agent_id).await
    }

    /// Update the agent's heartbeat timestamp.
    pub async fn heartbeat(&self, agent_id: i64) -> Result<Agent> {
        self.scheduler.agent_store().touch_heartbeat(agent_id).await
    }

    /// Session close: mark the agent Offline, release its Ready tasks
    /// immediately (in-flight work waits for the reaper's grace), publish
    /// `AgentOffline`.
    pub async fn reap_orphaned(&self, agent_id: i64) -> Result<Agent> {
        let agent = self
            .scheduler
            .agent_store()
            .update_status(agent_id, AgentStatus::Offline)
            .await?;
        let released = self.scheduler.task_store().unassign_ready_by_agent(agent_id).await?;
        if released > 0 {
            tracing::info!(agent_id, released, "released Ready tasks on session close");
        }
        self.scheduler
            .publish(Event::AgentOffline {
                agent_id,
                project_id: agent.project_id.clone(),
            })
            .await;
        Ok(agent)
    }
}
