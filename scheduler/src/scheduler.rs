use std::sync::Arc;

use dispatch_core::{
    error::{DispatchError, Result},
    events::{Event, EventBus},
    models::{Agent, NewTask, Task, TaskStatus},
    pipeline::PipelineConfig,
    ports::{AdvisoryLocker, AgentNotifier, Distributor, PushMessage, RoleBroadcast, RoleNotifier},
    repository::{AgentStore, TaskStore},
};

/// The pipeline scheduler.
///
/// [`Scheduler::update_status`] is the single entry point for status
/// changes. Each call validates the transition, performs a compare-and-swap
/// on the store, and then executes up to four independent effects: assign
/// (or bounce-back assign), push to the newly assigned worker, broadcast to
/// a role, and schedule a background sweep for any role freed by the
/// transition.
///
/// The scheduler is cheap to clone; all fields are shared handles. Sweeps
/// it schedules run on detached tasks so they survive cancellation of the
/// request that triggered them.
#[derive(Clone)]
pub struct Scheduler {
    tasks: Arc<dyn TaskStore>,
    agents: Arc<dyn AgentStore>,
    distributor: Arc<dyn Distributor>,
    agent_notifier: Arc<dyn AgentNotifier>,
    role_notifier: Arc<dyn RoleNotifier>,
    bus: Arc<dyn EventBus>,
    locker: Arc<dyn AdvisoryLocker>,
    pipeline: Arc<PipelineConfig>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        agents: Arc<dyn AgentStore>,
        distributor: Arc<dyn Distributor>,
        agent_notifier: Arc<dyn AgentNotifier>,
        role_notifier: Arc<dyn RoleNotifier>,
        bus: Arc<dyn EventBus>,
        locker: Arc<dyn AdvisoryLocker>,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            tasks,
            agents,
            distributor,
            agent_notifier,
            role_notifier,
            bus,
            locker,
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub(crate) fn task_store(&self) -> &Arc<dyn TaskStore> {
        &self.tasks
    }

    pub(crate) fn agent_store(&self) -> &Arc<dyn AgentStore> {
        &self.agents
    }

    pub(crate) fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub(crate) fn locker(&self) -> &Arc<dyn AdvisoryLocker> {
        &self.locker
    }

    pub(crate) fn distributor(&self) -> &Arc<dyn Distributor> {
        &self.distributor
    }

    /// Create a task (Backlog) and announce it on the bus.
    pub async fn create_task(&self, new_task: NewTask) -> Result<Task> {
        let task = self.tasks.create(new_task).await?;
        tracing::info!(task_id = task.id, project_id = %task.project_id, "task created");
        self.publish(Event::TaskCreated {
            task_id: task.id,
            project_id: task.project_id.clone(),
        })
        .await;
        Ok(task)
    }

    /// Record the task's pull request URL and announce the update.
    pub async fn set_pr_url(&self, task_id: i64, url: &str) -> Result<Task> {
        let task = self.tasks.set_pr_url(task_id, url).await?;
        self.publish(Event::TaskUpdated {
            task_id: task.id,
            project_id: task.project_id.clone(),
        })
        .await;
        Ok(task)
    }

    /// Drive a task from `from` to `to`, with all routing side effects.
    ///
    /// Steps, in order:
    ///
    /// 1. Gate: reject edges not in the pipeline graph.
    /// 2. CAS the transition against `from`; a concurrent mover wins and
    ///    this call gets `CasFailed`.
    /// 3. Refetch the task for the updated `coder_id` / timestamps.
    /// 4. Bounce-back branch (`to` = InProgress from InQA/InReview): the
    ///    original coder has strict priority, any idle coder is the
    ///    fallback, and the freed role is swept. Returns without the normal
    ///    assign/broadcast path.
    /// 5. Normal branch: assign the entry role if the table names one,
    ///    sweep the role freed by leaving `from`, broadcast if configured,
    ///    and publish `TaskCompleted` on entry to Merged.
    ///
    /// `NoAgentAvailable` from the distributor is not an error: the task
    /// stays unassigned and a later sweep places it.
    pub async fn update_status(&self, task_id: i64, from: TaskStatus, to: TaskStatus) -> Result<Task> {
        if !from.can_transition_to(to) {
            return Err(DispatchError::invalid_transition(from, to));
        }

        self.tasks.update_status(task_id, from, to).await?;
        let task = self.require_task(task_id).await?;
        tracing::info!(task_id, %from, %to, "task transitioned");

        if to == TaskStatus::InProgress && from.is_bounce_back_source() {
            self.bounce_back(&task, from).await?;
            return self.require_task(task_id).await;
        }

        if let Some(role) = self.pipeline.action(to).and_then(|action| action.assign_role.as_deref()) {
            match self.distributor.distribute(&task.project_id, role).await? {
                Some(agent) => {
                    self.assign_to(&task, &agent, PushMessage::TaskAssigned { task_id }).await?;
                }
                None => {
                    // The previous stage's worker is done with the task;
                    // only an unassigned task is visible to the sweep that
                    // will eventually place it
                    self.tasks.unassign(task_id).await?;
                    tracing::info!(task_id, role, "no idle agent; task waits for a sweep");
                }
            }
        }

        if let Some(freed_role) = self.pipeline.effective_freed_role(from) {
            self.schedule_sweep(&task.project_id, freed_role);
        }

        if let Some(action) = self.pipeline.action(to) {
            if let (Some(event), Some(role)) = (action.broadcast_event.as_deref(), action.broadcast_role.as_deref()) {
                let message = RoleBroadcast {
                    event: event.to_string(),
                    merged_task_id: task_id,
                };
                if let Err(error) = self
                    .role_notifier
                    .notify_project_role(&task.project_id, role, &message)
                    .await
                {
                    tracing::warn!(task_id, role, %error, "role broadcast failed");
                }
            }
        }

        if to == TaskStatus::Merged {
            self.publish(Event::TaskCompleted {
                task_id,
                project_id: task.project_id.clone(),
            })
            .await;
        }

        self.require_task(task_id).await
    }

    /// Bounce-back routing: InQA/InReview → InProgress means the work
    /// failed QA or review and returns to coding.
    async fn bounce_back(&self, task: &Task, from: TaskStatus) -> Result<()> {
        let mut claimed = false;

        // The original coder has strict priority over FIFO age.
        if let Some(coder_id) = task.coder_id {
            claimed = self.tasks.assign_if_idle(task.id, coder_id).await?;
            if claimed {
                tracing::info!(task_id = task.id, coder_id, "task returned to its original coder");
                self.push(coder_id, &PushMessage::TaskReturned { task_id: task.id }).await;
                self.publish(Event::TaskAssigned {
                    task_id: task.id,
                    project_id: task.project_id.clone(),
                    agent_id: coder_id,
                })
                .await;
            }
        }

        if !claimed {
            if let Some(role) = self.pipeline.effective_freed_role(TaskStatus::InProgress) {
                match self.distributor.distribute(&task.project_id, role).await? {
                    Some(agent) => {
                        self.assign_to(task, &agent, PushMessage::TaskAssigned { task_id: task.id }).await?;
                    }
                    None => {
                        // Acceptable transient: the task sits InProgress and
                        // unassigned until the dual-match sweep recovers it.
                        tracing::info!(task_id = task.id, role, "bounce-back found no idle agent");
                    }
                }
            }
        }

        if let Some(freed_role) = self.pipeline.effective_freed_role(from) {
            self.schedule_sweep(&task.project_id, freed_role);
        }

        Ok(())
    }

    /// Plain assignment: task holder, agent's current task, push, event.
    pub(crate) async fn assign_to(&self, task: &Task, agent: &Agent, message: PushMessage) -> Result<()> {
        self.tasks.assign(task.id, agent.id).await?;
        self.agents.set_working(agent.id, task.id).await?;
        tracing::info!(task_id = task.id, agent_id = agent.id, role = %agent.role, "task assigned");
        self.push(agent.id, &message).await;
        self.publish(Event::TaskAssigned {
            task_id: task.id,
            project_id: task.project_id.clone(),
            agent_id: agent.id,
        })
        .await;
        Ok(())
    }

    /// Best-effort push to one worker; failures are logged, never surfaced.
    pub(crate) async fn push(&self, agent_id: i64, message: &PushMessage) {
        if let Err(error) = self.agent_notifier.notify_agent(agent_id, message).await {
            tracing::warn!(agent_id, %error, "agent push failed");
        }
    }

    /// Fire-and-forget event publish; failures are logged, never surfaced.
    pub(crate) async fn publish(&self, event: Event) {
        if let Err(error) = self.bus.publish(event).await {
            tracing::warn!(%error, "event publish failed");
        }
    }

    pub(crate) async fn require_task(&self, task_id: i64) -> Result<Task> {
        self.tasks
            .get_by_id(task_id)
            .await?
            .ok_or(DispatchError::TaskNotFound(task_id))
    }
}
