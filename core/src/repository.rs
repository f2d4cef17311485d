use async_trait::async_trait;

use crate::{
    error::Result,
    models::{Agent, AgentFilter, AgentStatus, NewAgent, NewTask, Task, TaskFilter, TaskStatus},
};

/// Persistence port for tasks.
///
/// This is the scheduler's view of durable task state. Implementations must
/// be thread-safe; every method may race with every other. The authoritative
/// state lives behind this trait — the scheduler keeps no task state in
/// memory, which is what lets the compare-and-swap methods serialise
/// concurrent transitions.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a new task in Backlog.
    async fn create(&self, task: NewTask) -> Result<Task>;

    /// Get a task by id.
    ///
    /// # Returns
    /// * `Ok(Some(Task))` - The task if found
    /// * `Ok(None)` - If no task exists with that id
    async fn get_by_id(&self, id: i64) -> Result<Option<Task>>;

    /// List tasks matching the given filter criteria.
    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>>;

    /// Compare-and-swap status transition.
    ///
    /// The transition happens only if the stored status still equals `from`.
    /// Entry side effects are part of the same atomic write: on entry to
    /// InProgress, `started_at` is set if null and (when arriving from
    /// Ready) `coder_id` is captured from `assigned_agent_id` if null; on a
    /// bounce-back entry (from InQA/InReview) the rejecting holder is
    /// cleared, leaving reassignment to the caller; on entry to Merged,
    /// `completed_at` is set.
    ///
    /// # Returns
    /// * `Ok(Task)` - The updated task
    /// * `Err(DispatchError::CasFailed)` - If the stored status ≠ `from`
    /// * `Err(DispatchError::TaskNotFound)` - If the task doesn't exist
    ///
    /// The permitted-transition gate is the scheduler's job; the store only
    /// guarantees atomicity against the expected prior status.
    async fn update_status(&self, id: i64, from: TaskStatus, to: TaskStatus) -> Result<Task>;

    /// Set the task's holder.
    ///
    /// # Returns
    /// * `Err(DispatchError::TerminalAssign)` - If the task is Merged or
    ///   Backlog; those statuses never take an assignee
    async fn assign(&self, task_id: i64, agent_id: i64) -> Result<Task>;

    /// Bounce-back claim: in one atomic write, if the agent is still Idle,
    /// mark it Working on this task and set the task's holder.
    ///
    /// # Returns
    /// * `Ok(true)` - The agent was Idle and now holds the task
    /// * `Ok(false)` - The agent was busy, offline, or missing
    async fn assign_if_idle(&self, task_id: i64, agent_id: i64) -> Result<bool>;

    /// Clear the task's holder.
    async fn unassign(&self, task_id: i64) -> Result<()>;

    /// Clear the holder of every Ready task held by the agent. Invoked on
    /// session close, before the grace timer fires.
    ///
    /// # Returns
    /// * `Ok(u64)` - Number of tasks released
    async fn unassign_ready_by_agent(&self, agent_id: i64) -> Result<u64>;

    /// Release every in-flight task held by the agent, in one transaction:
    /// InProgress tasks reset to Ready and lose their holder; InQA and
    /// InReview tasks keep their status and lose their holder.
    ///
    /// # Returns
    /// * `Ok(Vec<TaskStatus>)` - The statuses that had at least one task
    ///   released (pre-release statuses, for sweep routing)
    async fn release_in_flight_by_agent(&self, agent_id: i64) -> Result<Vec<TaskStatus>>;

    /// Record the task's pull request URL.
    async fn set_pr_url(&self, id: i64, url: &str) -> Result<Task>;

    /// Add a dependency edge; `task_id` is not sweep-eligible until
    /// `depends_on_id` is Merged.
    async fn add_dependency(&self, task_id: i64, depends_on_id: i64) -> Result<()>;

    /// List direct dependencies of a task.
    async fn list_dependencies(&self, task_id: i64) -> Result<Vec<i64>>;

    /// True when every dependency of the task is Merged (vacuously true for
    /// tasks without dependencies).
    async fn dependencies_merged(&self, task_id: i64) -> Result<bool>;
}

/// Persistence port for agents.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Register a new agent in Idle.
    async fn create(&self, agent: NewAgent) -> Result<Agent>;

    /// Get an agent by id.
    async fn get_by_id(&self, id: i64) -> Result<Option<Agent>>;

    /// List agents matching the given filter criteria.
    async fn list(&self, filter: AgentFilter) -> Result<Vec<Agent>>;

    /// Set an agent's status unconditionally.
    ///
    /// No guard against the current status: `reactivate` relies on this to
    /// bring an agent back to Idle whatever state it was left in.
    async fn update_status(&self, id: i64, status: AgentStatus) -> Result<Agent>;

    /// Mark the agent Working on the given task.
    async fn set_working(&self, id: i64, task_id: i64) -> Result<Agent>;

    /// Mark the agent Idle and clear its current task.
    async fn set_idle(&self, id: i64) -> Result<Agent>;

    /// Atomically claim one idle worker: the oldest (by `created_at`) Idle
    /// agent of the role in the project becomes Working with a cleared
    /// `current_task_id` (the caller records the task after assignment).
    ///
    /// Concurrent calls claim distinct agents; the select-and-mark must be
    /// one atomic step against the store.
    ///
    /// # Returns
    /// * `Ok(Some(Agent))` - The claimed agent, already marked Working
    /// * `Ok(None)` - No Idle agent of that role in the project
    async fn claim_agent(&self, project_id: &str, role: &str) -> Result<Option<Agent>>;

    /// Update the agent's heartbeat timestamp.
    async fn touch_heartbeat(&self, id: i64) -> Result<Agent>;

    /// Agents with status Offline that still hold at least one in-flight
    /// (InProgress, InQA, InReview) task. Used by the startup orphan scan.
    async fn list_offline_with_inflight_tasks(&self) -> Result<Vec<Agent>>;
}
