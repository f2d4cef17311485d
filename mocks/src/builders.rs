//! Builder pattern implementations for easy test data construction

use chrono::{DateTime, Duration, Utc};

use dispatch_core::models::{Agent, AgentStatus, Priority, Task, TaskStatus};

/// Builder for constructing Task instances in tests
pub struct TaskBuilder {
    task: Task,
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBuilder {
    /// Create new builder with default values
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            task: Task {
                id: 1,
                project_id: "proj-1".to_string(),
                title: "Test Task".to_string(),
                description: "A test task".to_string(),
                branch_name: None,
                pr_url: None,
                status: TaskStatus::Backlog,
                priority: Priority::Medium,
                assigned_agent_id: None,
                coder_id: None,
                labels: vec![],
                required_role: None,
                created_at: now,
                updated_at: now,
                started_at: None,
                completed_at: None,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.task.project_id = project_id.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.task.title = title.into();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        if status == TaskStatus::Merged && self.task.completed_at.is_none() {
            self.task.completed_at = Some(Utc::now());
        }
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_assignee(mut self, agent_id: i64) -> Self {
        self.task.assigned_agent_id = Some(agent_id);
        self
    }

    pub fn with_coder(mut self, agent_id: i64) -> Self {
        self.task.coder_id = Some(agent_id);
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.task.labels = labels;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.task.created_at = created_at;
        self
    }

    /// Shift `created_at` back by whole seconds; handy for FIFO seeding.
    pub fn created_secs_ago(mut self, secs: i64) -> Self {
        self.task.created_at = Utc::now() - Duration::seconds(secs);
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Builder for constructing Agent instances in tests
pub struct AgentBuilder {
    agent: Agent,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    /// Create new builder with default values
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            agent: Agent {
                id: 1,
                project_id: "proj-1".to_string(),
                role: "coder".to_string(),
                name: "test-agent".to_string(),
                model: "test-model".to_string(),
                status: AgentStatus::Idle,
                current_task_id: None,
                last_heartbeat_at: now,
                created_at: now,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.agent.id = id;
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.agent.project_id = project_id.into();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.agent.role = role.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.agent.name = name.into();
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.agent.status = status;
        self
    }

    pub fn with_current_task(mut self, task_id: i64) -> Self {
        self.agent.current_task_id = Some(task_id);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.agent.created_at = created_at;
        self
    }

    /// Shift `created_at` back by whole seconds; claim order is oldest-first.
    pub fn created_secs_ago(mut self, secs: i64) -> Self {
        self.agent.created_at = Utc::now() - Duration::seconds(secs);
        self
    }

    pub fn build(self) -> Agent {
        self.agent
    }
}
