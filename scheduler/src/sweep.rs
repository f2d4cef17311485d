//! The FIFO unassigned-task sweep.

use dispatch_core::{
    error::Result,
    models::TaskFilter,
    ports::PushMessage,
};

use crate::locks::sweep_key;
use crate::scheduler::Scheduler;

impl Scheduler {
    /// Schedule a background sweep for `(project_id, role)`.
    ///
    /// The sweep runs on a detached task: its value persists beyond the RPC
    /// that scheduled it, so it must not inherit the caller's cancellation.
    /// Sweep errors never affect the caller; the sweep logs its own.
    pub fn schedule_sweep(&self, project_id: &str, role: &str) {
        let scheduler = self.clone();
        let project_id = project_id.to_string();
        let role = role.to_string();
        tokio::spawn(async move {
            if let Err(error) = scheduler.sweep_unassigned(&project_id, &role).await {
                tracing::error!(%project_id, %role, %error, "scheduled sweep failed");
            }
        });
    }

    /// Greedily place unassigned tasks of `role` onto available workers.
    ///
    /// Under the `(project_id, role)` advisory lock, visits every status
    /// whose pipeline action assigns OR frees this role — the dual match is
    /// what recovers an InProgress task stranded without a holder after a
    /// failed bounce-back — and lists unassigned tasks oldest-first. Each
    /// candidate gets one `distribute` attempt; the first time no agent is
    /// available the whole sweep returns `Ok`, because every later candidate
    /// would fail the same way. Tasks whose dependencies are not all Merged
    /// are skipped, not assigned out of order.
    pub async fn sweep_unassigned(&self, project_id: &str, role: &str) -> Result<()> {
        let _lease = self.locker().acquire(sweep_key(project_id, role)).await?;

        for status in self.pipeline().statuses_for_role(role) {
            let candidates = self
                .task_store()
                .list(TaskFilter {
                    project_id: Some(project_id.to_string()),
                    status: Some(status),
                    unassigned: true,
                    oldest_first: true,
                    ..Default::default()
                })
                .await?;

            for task in candidates {
                if !self.task_store().dependencies_merged(task.id).await? {
                    tracing::debug!(task_id = task.id, "sweep skipped task with unmerged dependencies");
                    continue;
                }

                match self.distributor().distribute(project_id, role).await? {
                    Some(agent) => {
                        self.assign_to(&task, &agent, PushMessage::TaskAssigned { task_id: task.id })
                            .await?;
                    }
                    None => {
                        tracing::info!(project_id, role, "sweep stopped: no idle agents left");
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }
}
