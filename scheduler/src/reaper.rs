//! Grace-period recovery of work held by disconnected agents.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use dispatch_core::{
    error::Result,
    events::{Event, EventChannel},
    models::{AgentStatus, TaskStatus},
};

use crate::scheduler::Scheduler;

/// Grace periods before a disconnected agent's in-flight work is released.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Delay between a live session closing and the release pass.
    pub grace: Duration,
    /// Shorter delay used by the startup orphan scan, so state left behind
    /// by a crashed process converges quickly.
    pub startup_grace: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(300),
            startup_grace: Duration::from_secs(30),
        }
    }
}

/// Watches agent liveness events and recovers in-flight work after a grace
/// period.
///
/// One timer per offline agent: `AgentOffline` schedules it, `AgentOnline`
/// cancels it. The timer body re-checks the agent's status before touching
/// anything, so a reconnect that beats the timer makes the release a silent
/// no-op. All timer work runs on detached tasks independent of any request
/// context.
pub struct Reaper {
    scheduler: Scheduler,
    config: ReaperConfig,
    timers: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl Reaper {
    pub fn new(scheduler: Scheduler, config: ReaperConfig) -> Self {
        Self {
            scheduler,
            config,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the agent channel and run until the bus closes.
    ///
    /// The subscription is taken here, synchronously, so liveness events
    /// published right after `spawn` returns cannot be missed.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let reaper = Arc::clone(self);
        let events = self.scheduler.bus().subscribe(EventChannel::Agent);
        tokio::spawn(async move { reaper.run(events).await })
    }

    async fn run(self: Arc<Self>, mut events: tokio::sync::broadcast::Receiver<Event>) {
        loop {
            match events.recv().await {
                Ok(Event::AgentOffline { agent_id, .. }) => {
                    self.schedule_release(agent_id, self.config.grace);
                }
                Ok(Event::AgentOnline { agent_id, .. }) => {
                    self.cancel_release(agent_id);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    // Missed liveness events; the startup-style scan would
                    // catch strays, and timers re-check status anyway.
                    tracing::warn!(skipped, "reaper lagged behind the agent channel");
                }
                Err(RecvError::Closed) => {
                    tracing::info!("agent channel closed; reaper stopping");
                    break;
                }
            }
        }
    }

    /// Schedule a release pass for every Offline agent that still holds
    /// in-flight work. Run once at process start.
    pub async fn scan_orphans(self: &Arc<Self>) -> Result<usize> {
        let orphaned = self.scheduler.agent_store().list_offline_with_inflight_tasks().await?;
        let count = orphaned.len();
        for agent in orphaned {
            self.schedule_release(agent.id, self.config.startup_grace);
        }
        if count > 0 {
            tracing::info!(count, "startup scan scheduled releases for offline agents");
        }
        Ok(count)
    }

    /// (Re)arm the grace timer for an agent.
    pub fn schedule_release(self: &Arc<Self>, agent_id: i64, grace: Duration) {
        let reaper = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Err(error) = reaper.release_agent(agent_id).await {
                tracing::error!(agent_id, %error, "release after grace failed");
            }
            reaper.timers.lock().remove(&agent_id);
        });
        tracing::debug!(agent_id, grace_secs = grace.as_secs(), "grace timer armed");
        if let Some(previous) = self.timers.lock().insert(agent_id, handle) {
            previous.abort();
        }
    }

    /// Cancel a pending grace timer, if any. Called when the agent comes
    /// back online before expiry.
    pub fn cancel_release(&self, agent_id: i64) {
        if let Some(handle) = self.timers.lock().remove(&agent_id) {
            handle.abort();
            tracing::debug!(agent_id, "agent reconnected; grace timer cancelled");
        }
    }

    /// Number of armed grace timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.lock().len()
    }

    /// Release all in-flight work held by an agent and sweep the freed
    /// roles.
    ///
    /// A no-op returning `(None, [])` when the agent is missing or no
    /// longer Offline (it reconnected before the grace expired). Otherwise
    /// the store releases in one transaction — InProgress back to Ready,
    /// InQA/InReview keep their status, all lose their holder — and a sweep
    /// is scheduled for the pipeline role freed by each affected status.
    pub async fn release_agent(&self, agent_id: i64) -> Result<(Option<String>, Vec<TaskStatus>)> {
        let agent = match self.scheduler.agent_store().get_by_id(agent_id).await? {
            Some(agent) => agent,
            None => return Ok((None, vec![])),
        };
        if agent.status != AgentStatus::Offline {
            return Ok((None, vec![]));
        }

        let freed = self.scheduler.task_store().release_in_flight_by_agent(agent_id).await?;
        if !freed.is_empty() {
            tracing::info!(agent_id, ?freed, "released in-flight tasks after grace expiry");
        }

        for status in &freed {
            if let Some(role) = self.scheduler.pipeline().effective_freed_role(*status) {
                self.scheduler.schedule_sweep(&agent.project_id, role);
            }
        }

        Ok((Some(agent.project_id), freed))
    }
}
