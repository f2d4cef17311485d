//! Mock implementation of the TaskStore and AgentStore traits
//!
//! Provides a thread-safe in-memory store with:
//! - Error injection capabilities
//! - Call tracking for verification
//! - The same atomicity guarantees the SQLite adapter gives (every
//!   compound mutation happens under one lock)

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use dispatch_core::{
    error::{DispatchError, Result},
    models::{
        Agent, AgentFilter, AgentStatus, Dependency, NewAgent, NewTask, Task, TaskFilter, TaskStatus,
    },
    repository::{AgentStore, TaskStore},
};

/// In-memory implementation of both store ports for testing.
///
/// Tasks and agents live behind one mutex each; compound operations
/// (`assign_if_idle`, `claim_agent`, `release_in_flight_by_agent`) take the
/// locks they need for the whole mutation, mirroring the transactional
/// behaviour of the real adapter.
pub struct MockDispatchStore {
    tasks: Arc<Mutex<HashMap<i64, Task>>>,
    agents: Arc<Mutex<HashMap<i64, Agent>>>,
    dependencies: Arc<Mutex<Vec<Dependency>>>,
    next_task_id: Arc<AtomicI64>,
    next_agent_id: Arc<AtomicI64>,
    error_injection: Arc<Mutex<Option<DispatchError>>>,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl Default for MockDispatchStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDispatchStore {
    /// Create a new empty mock store
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            agents: Arc::new(Mutex::new(HashMap::new())),
            dependencies: Arc::new(Mutex::new(Vec::new())),
            next_task_id: Arc::new(AtomicI64::new(1)),
            next_agent_id: Arc::new(AtomicI64::new(1)),
            error_injection: Arc::new(Mutex::new(None)),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Seed a task, bumping the id counter past it.
    pub fn seed_task(&self, task: Task) {
        let mut next = self.next_task_id.load(Ordering::SeqCst);
        if task.id >= next {
            next = task.id + 1;
            self.next_task_id.store(next, Ordering::SeqCst);
        }
        self.tasks.lock().insert(task.id, task);
    }

    /// Seed an agent, bumping the id counter past it.
    pub fn seed_agent(&self, agent: Agent) {
        let mut next = self.next_agent_id.load(Ordering::SeqCst);
        if agent.id >= next {
            next = agent.id + 1;
            self.next_agent_id.store(next, Ordering::SeqCst);
        }
        self.agents.lock().insert(agent.id, agent);
    }

    /// Inject an error for the next store operation
    pub fn inject_error(&self, error: DispatchError) {
        *self.error_injection.lock() = Some(error);
    }

    /// Clear error injection
    pub fn clear_error(&self) {
        *self.error_injection.lock() = None;
    }

    /// Get history of called methods
    pub fn call_history(&self) -> Vec<String> {
        self.call_history.lock().clone()
    }

    /// Assert a method was called at least once
    pub fn assert_called(&self, method: &str) {
        let history = self.call_history.lock();
        assert!(
            history.iter().any(|call| call.contains(method)),
            "method '{}' was not called; call history: {:?}",
            method,
            *history
        );
    }

    fn check_error_injection(&self) -> Result<()> {
        if let Some(error) = self.error_injection.lock().take() {
            return Err(error);
        }
        Ok(())
    }

    fn record_call(&self, call: String) {
        self.call_history.lock().push(call);
    }
}

#[async_trait]
impl TaskStore for MockDispatchStore {
    async fn create(&self, task: NewTask) -> Result<Task> {
        self.record_call(format!("create_task(title={})", task.title));
        self.check_error_injection()?;

        if task.title.trim().is_empty() {
            return Err(DispatchError::empty_field("title"));
        }

        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();

        let new_task = Task {
            id,
            project_id: task.project_id,
            title: task.title,
            description: task.description,
            branch_name: task.branch_name,
            pr_url: None,
            status: TaskStatus::Backlog,
            priority: task.priority,
            assigned_agent_id: None,
            coder_id: None,
            labels: task.labels,
            required_role: task.required_role,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };

        self.tasks.lock().insert(id, new_task.clone());
        Ok(new_task)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Task>> {
        self.record_call(format!("get_task(id={id})"));
        self.check_error_injection()?;
        Ok(self.tasks.lock().get(&id).cloned())
    }

    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        self.record_call("list_tasks".to_string());
        self.check_error_injection()?;

        let tasks = self.tasks.lock();
        let mut result: Vec<Task> = tasks
            .values()
            .filter(|task| {
                if let Some(ref project_id) = filter.project_id {
                    if task.project_id != *project_id {
                        return false;
                    }
                }
                if let Some(status) = filter.status {
                    if task.status != status {
                        return false;
                    }
                }
                if let Some(priority) = filter.priority {
                    if task.priority != priority {
                        return false;
                    }
                }
                if let Some(assigned_to) = filter.assigned_to {
                    if task.assigned_agent_id != Some(assigned_to) {
                        return false;
                    }
                }
                if let Some(ref label) = filter.label {
                    if !task.labels.iter().any(|l| l == label) {
                        return false;
                    }
                }
                if filter.unassigned && !task.is_unassigned() {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        // id breaks created_at ties, like the adapter's ORDER BY
        if filter.oldest_first {
            result.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        } else {
            result.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        }

        if let Some(limit) = filter.limit {
            result.truncate(limit as usize);
        }

        Ok(result)
    }

    async fn update_status(&self, id: i64, from: TaskStatus, to: TaskStatus) -> Result<Task> {
        self.record_call(format!("update_status(id={id}, from={from}, to={to})"));
        self.check_error_injection()?;

        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(&id).ok_or(DispatchError::TaskNotFound(id))?;

        if task.status != from {
            return Err(DispatchError::cas_failed(id, from));
        }

        let now = Utc::now();
        task.status = to;
        task.updated_at = now;
        if to == TaskStatus::InProgress {
            if task.started_at.is_none() {
                task.started_at = Some(now);
            }
            if from == TaskStatus::Ready && task.coder_id.is_none() {
                task.coder_id = task.assigned_agent_id;
            }
            if from.is_bounce_back_source() {
                // Rejected work loses its holder; bounce-back routing
                // reassigns it or a sweep recovers it
                task.assigned_agent_id = None;
            }
        }
        if to == TaskStatus::Merged {
            task.completed_at = Some(now);
        }

        Ok(task.clone())
    }

    async fn assign(&self, task_id: i64, agent_id: i64) -> Result<Task> {
        self.record_call(format!("assign(task={task_id}, agent={agent_id})"));
        self.check_error_injection()?;

        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(&task_id).ok_or(DispatchError::TaskNotFound(task_id))?;

        if task.status.refuses_assignment() {
            return Err(DispatchError::terminal_assign(task_id, task.status));
        }

        task.assigned_agent_id = Some(agent_id);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn assign_if_idle(&self, task_id: i64, agent_id: i64) -> Result<bool> {
        self.record_call(format!("assign_if_idle(task={task_id}, agent={agent_id})"));
        self.check_error_injection()?;

        // Both locks held for the whole mutation, like the adapter's
        // transaction
        let mut agents = self.agents.lock();
        let mut tasks = self.tasks.lock();

        if !tasks.contains_key(&task_id) {
            return Err(DispatchError::TaskNotFound(task_id));
        }

        let agent = match agents.get_mut(&agent_id) {
            Some(agent) if agent.status == AgentStatus::Idle => agent,
            _ => return Ok(false),
        };

        agent.status = AgentStatus::Working;
        agent.current_task_id = Some(task_id);

        let task = tasks.get_mut(&task_id).ok_or(DispatchError::TaskNotFound(task_id))?;
        task.assigned_agent_id = Some(agent_id);
        task.updated_at = Utc::now();

        Ok(true)
    }

    async fn unassign(&self, task_id: i64) -> Result<()> {
        self.record_call(format!("unassign(task={task_id})"));
        self.check_error_injection()?;

        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(&task_id).ok_or(DispatchError::TaskNotFound(task_id))?;
        task.assigned_agent_id = None;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn unassign_ready_by_agent(&self, agent_id: i64) -> Result<u64> {
        self.record_call(format!("unassign_ready_by_agent(agent={agent_id})"));
        self.check_error_injection()?;

        let mut released = 0;
        let now = Utc::now();
        for task in self.tasks.lock().values_mut() {
            if task.assigned_agent_id == Some(agent_id) && task.status == TaskStatus::Ready {
                task.assigned_agent_id = None;
                task.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn release_in_flight_by_agent(&self, agent_id: i64) -> Result<Vec<TaskStatus>> {
        self.record_call(format!("release_in_flight_by_agent(agent={agent_id})"));
        self.check_error_injection()?;

        let mut freed = Vec::new();
        let now = Utc::now();
        let mut tasks = self.tasks.lock();

        for status in [TaskStatus::InProgress, TaskStatus::InQa, TaskStatus::InReview] {
            let mut any = false;
            for task in tasks.values_mut() {
                if task.assigned_agent_id == Some(agent_id) && task.status == status {
                    if status == TaskStatus::InProgress {
                        task.status = TaskStatus::Ready;
                    }
                    task.assigned_agent_id = None;
                    task.updated_at = now;
                    any = true;
                }
            }
            if any {
                freed.push(status);
            }
        }

        Ok(freed)
    }

    async fn set_pr_url(&self, id: i64, url: &str) -> Result<Task> {
        self.record_call(format!("set_pr_url(id={id})"));
        self.check_error_injection()?;

        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(&id).ok_or(DispatchError::TaskNotFound(id))?;
        task.pr_url = Some(url.to_string());
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn add_dependency(&self, task_id: i64, depends_on_id: i64) -> Result<()> {
        self.record_call(format!("add_dependency(task={task_id}, on={depends_on_id})"));
        self.check_error_injection()?;

        let tasks = self.tasks.lock();
        if !tasks.contains_key(&task_id) {
            return Err(DispatchError::TaskNotFound(task_id));
        }
        if !tasks.contains_key(&depends_on_id) {
            return Err(DispatchError::TaskNotFound(depends_on_id));
        }
        drop(tasks);

        let mut dependencies = self.dependencies.lock();
        let edge = Dependency { task_id, depends_on_id };
        if !dependencies.contains(&edge) {
            dependencies.push(edge);
        }
        Ok(())
    }

    async fn list_dependencies(&self, task_id: i64) -> Result<Vec<i64>> {
        self.record_call(format!("list_dependencies(task={task_id})"));
        self.check_error_injection()?;

        Ok(self
            .dependencies
            .lock()
            .iter()
            .filter(|edge| edge.task_id == task_id)
            .map(|edge| edge.depends_on_id)
            .collect())
    }

    async fn dependencies_merged(&self, task_id: i64) -> Result<bool> {
        self.record_call(format!("dependencies_merged(task={task_id})"));
        self.check_error_injection()?;

        let dependencies = self.dependencies.lock();
        let tasks = self.tasks.lock();
        Ok(dependencies
            .iter()
            .filter(|edge| edge.task_id == task_id)
            .all(|edge| {
                tasks
                    .get(&edge.depends_on_id)
                    .is_some_and(|dep| dep.status == TaskStatus::Merged)
            }))
    }
}

#[async_trait]
impl AgentStore for MockDispatchStore {
    async fn create(&self, agent: NewAgent) -> Result<Agent> {
        self.record_call(format!("create_agent(name={})", agent.name));
        self.check_error_injection()?;

        if agent.role.trim().is_empty() {
            return Err(DispatchError::empty_field("role"));
        }

        let id = self.next_agent_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();

        let new_agent = Agent {
            id,
            project_id: agent.project_id,
            role: agent.role,
            name: agent.name,
            model: agent.model,
            status: AgentStatus::Idle,
            current_task_id: None,
            last_heartbeat_at: now,
            created_at: now,
        };

        self.agents.lock().insert(id, new_agent.clone());
        Ok(new_agent)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Agent>> {
        self.record_call(format!("get_agent(id={id})"));
        self.check_error_injection()?;
        Ok(self.agents.lock().get(&id).cloned())
    }

    async fn list(&self, filter: AgentFilter) -> Result<Vec<Agent>> {
        self.record_call("list_agents".to_string());
        self.check_error_injection()?;

        let agents = self.agents.lock();
        let mut result: Vec<Agent> = agents
            .values()
            .filter(|agent| {
                if let Some(ref project_id) = filter.project_id {
                    if agent.project_id != *project_id {
                        return false;
                    }
                }
                if let Some(ref role) = filter.role {
                    if agent.role != *role {
                        return false;
                    }
                }
                if let Some(status) = filter.status {
                    if agent.status != status {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        result.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(result)
    }

    async fn update_status(&self, id: i64, status: AgentStatus) -> Result<Agent> {
        self.record_call(format!("update_agent_status(id={id}, status={status})"));
        self.check_error_injection()?;

        let mut agents = self.agents.lock();
        let agent = agents.get_mut(&id).ok_or(DispatchError::AgentNotFound(id))?;
        agent.status = status;
        Ok(agent.clone())
    }

    async fn set_working(&self, id: i64, task_id: i64) -> Result<Agent> {
        self.record_call(format!("set_working(id={id}, task={task_id})"));
        self.check_error_injection()?;

        let mut agents = self.agents.lock();
        let agent = agents.get_mut(&id).ok_or(DispatchError::AgentNotFound(id))?;
        agent.status = AgentStatus::Working;
        agent.current_task_id = Some(task_id);
        Ok(agent.clone())
    }

    async fn set_idle(&self, id: i64) -> Result<Agent> {
        self.record_call(format!("set_idle(id={id})"));
        self.check_error_injection()?;

        let mut agents = self.agents.lock();
        let agent = agents.get_mut(&id).ok_or(DispatchError::AgentNotFound(id))?;
        agent.status = AgentStatus::Idle;
        agent.current_task_id = None;
        Ok(agent.clone())
    }

    async fn claim_agent(&self, project_id: &str, role: &str) -> Result<Option<Agent>> {
        self.record_call(format!("claim_agent(project={project_id}, role={role})"));
        self.check_error_injection()?;

        let mut agents = self.agents.lock();

        // Oldest Idle agent of the role wins; id breaks ties
        let candidate = agents
            .values()
            .filter(|agent| {
                agent.project_id == project_id
                    && agent.role == role
                    && agent.status == AgentStatus::Idle
            })
            .min_by_key(|agent| (agent.created_at, agent.id))
            .map(|agent| agent.id);

        match candidate {
            Some(id) => {
                let agent = agents.get_mut(&id).ok_or(DispatchError::AgentNotFound(id))?;
                agent.status = AgentStatus::Working;
                agent.current_task_id = None;
                Ok(Some(agent.clone()))
            }
            None => Ok(None),
        }
    }

    async fn touch_heartbeat(&self, id: i64) -> Result<Agent> {
        self.record_call(format!("touch_heartbeat(id={id})"));
        self.check_error_injection()?;

        let mut agents = self.agents.lock();
        let agent = agents.get_mut(&id).ok_or(DispatchError::AgentNotFound(id))?;
        agent.last_heartbeat_at = Utc::now();
        Ok(agent.clone())
    }

    async fn list_offline_with_inflight_tasks(&self) -> Result<Vec<Agent>> {
        self.record_call("list_offline_with_inflight_tasks".to_string());
        self.check_error_injection()?;

        let agents = self.agents.lock();
        let tasks = self.tasks.lock();

        let mut result: Vec<Agent> = agents
            .values()
            .filter(|agent| {
                agent.status == AgentStatus::Offline
                    && tasks.values().any(|task| {
                        task.assigned_agent_id == Some(agent.id)
                            && matches!(
                                task.status,
                                TaskStatus::InProgress | TaskStatus::InQa | TaskStatus::InReview
                            )
                    })
            })
            .cloned()
            .collect();

        result.sort_by_key(|agent| agent.id);
        Ok(result)
    }
}
