use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Core task representation in the work dispatcher.
///
/// A task is the unit of scheduled work. It moves through the role pipeline
/// (coder → QA → reviewer → merged) and is held by at most one agent at a
/// time. The dispatcher mutates `status`, `assigned_agent_id`, `coder_id`,
/// the lifecycle timestamps and `pr_url`; everything else is owned by the
/// transport that created the task.
///
/// # Examples
///
/// ```rust
/// use dispatch_core::models::{Task, TaskStatus};
///
/// # fn demo(task: Task) {
/// // Check if the task may enter QA
/// if task.status.can_transition_to(TaskStatus::InQa) {
///     // safe to hand to the QA role
/// }
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Auto-increment primary key
    pub id: i64,
    /// Project this task belongs to (opaque identifier)
    pub project_id: String,
    /// Brief task title
    pub title: String,
    /// Detailed task requirements
    pub description: String,
    /// Working branch for the task, if one exists yet
    pub branch_name: Option<String>,
    /// Pull request URL once published
    pub pr_url: Option<String>,
    /// Current pipeline status
    pub status: TaskStatus,
    /// Scheduling priority
    pub priority: Priority,
    /// Agent currently holding the task, if any
    pub assigned_agent_id: Option<i64>,
    /// First agent to take the task into InProgress; preserved across
    /// bounce-backs so rejected work returns to its author
    pub coder_id: Option<i64>,
    /// Free-form labels
    pub labels: Vec<String>,
    /// Role override for assignment, when the pipeline default is wrong
    pub required_role: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
    /// Set on first entry to InProgress
    pub started_at: Option<DateTime<Utc>>,
    /// Set on entry to Merged
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// True while the task has no holder and is eligible for a sweep.
    pub fn is_unassigned(&self) -> bool {
        self.assigned_agent_id.is_none()
    }
}

/// Pipeline statuses for a task.
///
/// Statuses form a directed graph; every transition not listed in
/// [`TaskStatus::can_transition_to`] is rejected, including self-transitions.
///
/// # Transition graph
///
/// - `Backlog` → `Ready`
/// - `Ready` → `InProgress`, `Backlog`
/// - `InProgress` → `InQa`, `Ready`
/// - `InQa` → `InReview`, `InProgress`
/// - `InReview` → `Merged`, `InProgress`
/// - `Merged` → (terminal)
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskStatus {
    /// Not yet scheduled; invisible to the pipeline
    Backlog,
    /// Scheduled and waiting for (or held by) a coder
    Ready,
    /// Being implemented
    InProgress,
    /// Waiting for or under QA
    InQa,
    /// Waiting for or under review
    InReview,
    /// On the shared main branch; terminal
    Merged,
}

impl TaskStatus {
    /// All statuses in pipeline order. Used wherever deterministic iteration
    /// over the pipeline table matters (sweeps are FIFO per status).
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Backlog,
        TaskStatus::Ready,
        TaskStatus::InProgress,
        TaskStatus::InQa,
        TaskStatus::InReview,
        TaskStatus::Merged,
    ];

    /// Check whether the pipeline permits moving from `self` to `to`.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;

        match (self, to) {
            // Self-transitions are never valid
            (from, to) if from == to => false,

            (Backlog, Ready) => true,
            (Ready, InProgress | Backlog) => true,
            (InProgress, InQa | Ready) => true,
            (InQa, InReview | InProgress) => true,
            (InReview, Merged | InProgress) => true,

            // Merged is terminal
            (Merged, _) => false,

            _ => false,
        }
    }

    /// Statuses in which a task must never be handed to an agent.
    pub fn refuses_assignment(self) -> bool {
        matches!(self, TaskStatus::Merged | TaskStatus::Backlog)
    }

    /// True for statuses whose exit to InProgress is a bounce-back: the
    /// work failed QA or review and returns to coding.
    pub fn is_bounce_back_source(self) -> bool {
        matches!(self, TaskStatus::InQa | TaskStatus::InReview)
    }

    /// Stable storage string, also used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Backlog => "Backlog",
            TaskStatus::Ready => "Ready",
            TaskStatus::InProgress => "InProgress",
            TaskStatus::InQa => "InQA",
            TaskStatus::InReview => "InReview",
            TaskStatus::Merged => "Merged",
        }
    }

    /// Parse a storage string produced by [`TaskStatus::as_str`].
    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "Backlog" => Some(TaskStatus::Backlog),
            "Ready" => Some(TaskStatus::Ready),
            "InProgress" => Some(TaskStatus::InProgress),
            "InQA" => Some(TaskStatus::InQa),
            "InReview" => Some(TaskStatus::InReview),
            "Merged" => Some(TaskStatus::Merged),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Ordering is Critical first.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "Critical",
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }

    pub fn parse(s: &str) -> Option<Priority> {
        match s {
            "Critical" => Some(Priority::Critical),
            "High" => Some(Priority::High),
            "Medium" => Some(Priority::Medium),
            "Low" => Some(Priority::Low),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data transfer object for creating new tasks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    /// Project the task belongs to
    pub project_id: String,
    /// Brief task title
    pub title: String,
    /// Detailed task requirements
    pub description: String,
    /// Working branch, when known up front
    pub branch_name: Option<String>,
    /// Scheduling priority
    #[serde(default)]
    pub priority: Priority,
    /// Free-form labels
    #[serde(default)]
    pub labels: Vec<String>,
    /// Role override for assignment
    pub required_role: Option<String>,
}

impl NewTask {
    /// Create a NewTask with default priority and no labels.
    pub fn new(project_id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            title: title.into(),
            description: description.into(),
            branch_name: None,
            priority: Priority::Medium,
            labels: vec![],
            required_role: None,
        }
    }
}

/// Filter criteria for querying tasks.
///
/// All fields are optional; set fields combine with AND logic. `unassigned`
/// and `oldest_first` exist for the sweep, which lists unassigned work in
/// FIFO (`created_at ASC`) order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Filter by project
    pub project_id: Option<String>,
    /// Filter by pipeline status
    pub status: Option<TaskStatus>,
    /// Filter by priority
    pub priority: Option<Priority>,
    /// Filter by current holder
    pub assigned_to: Option<i64>,
    /// Filter by label membership
    pub label: Option<String>,
    /// Only tasks without a holder
    #[serde(default)]
    pub unassigned: bool,
    /// Order by `created_at ASC` instead of the default newest-first
    #[serde(default)]
    pub oldest_first: bool,
    /// Maximum number of tasks to return
    pub limit: Option<u32>,
}

/// A worker process connected to the dispatcher, playing a single role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    /// Auto-increment primary key
    pub id: i64,
    /// Project the agent serves
    pub project_id: String,
    /// Pipeline role, e.g. "coder", "qa", "reviewer"
    pub role: String,
    /// Human-readable name
    pub name: String,
    /// Model identifier the worker runs
    pub model: String,
    /// Current availability
    pub status: AgentStatus,
    /// Task the agent is working on; set iff status is Working
    pub current_task_id: Option<i64>,
    /// Last heartbeat timestamp
    pub last_heartbeat_at: DateTime<Utc>,
    /// Registration timestamp; claim order is oldest-first
    pub created_at: DateTime<Utc>,
}

/// Agent availability states.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
pub enum AgentStatus {
    /// Connected and waiting for work
    Idle,
    /// Holding a task
    Working,
    /// Connected but unable to take work
    Blocked,
    /// Session closed; in-flight work is released after the grace period
    Offline,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Idle => "Idle",
            AgentStatus::Working => "Working",
            AgentStatus::Blocked => "Blocked",
            AgentStatus::Offline => "Offline",
        }
    }

    pub fn parse(s: &str) -> Option<AgentStatus> {
        match s {
            "Idle" => Some(AgentStatus::Idle),
            "Working" => Some(AgentStatus::Working),
            "Blocked" => Some(AgentStatus::Blocked),
            "Offline" => Some(AgentStatus::Offline),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data transfer object for registering agents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAgent {
    pub project_id: String,
    pub role: String,
    pub name: String,
    pub model: String,
}

impl NewAgent {
    pub fn new(
        project_id: impl Into<String>,
        role: impl Into<String>,
        name: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            role: role.into(),
            name: name.into(),
            model: model.into(),
        }
    }
}

/// Filter criteria for querying agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentFilter {
    pub project_id: Option<String>,
    pub role: Option<String>,
    pub status: Option<AgentStatus>,
}

/// A dependency edge: `task_id` cannot be swept onto a worker until
/// `depends_on_id` is Merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dependency {
    pub task_id: i64,
    pub depends_on_id: i64,
}
