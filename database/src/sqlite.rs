use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use dispatch_core::{
    error::{DispatchError, Result},
    models::{
        Agent, AgentFilter, AgentStatus, NewAgent, NewTask, Task, TaskFilter, TaskStatus,
    },
    repository::{AgentStore, TaskStore},
};

use crate::common::{
    build_task_filter_query, row_to_agent, row_to_task, sqlx_error_to_dispatch_error,
    status_to_string, AGENT_COLUMNS, TASK_COLUMNS,
};

/// SQLite implementation of the TaskStore and AgentStore traits.
///
/// One pool serves both ports so compound operations (claim, assign-if-idle,
/// release) can run in a single transaction. SQLite serialises writers,
/// which is what makes the single-statement claim below atomic; a Postgres
/// adapter would use `FOR UPDATE SKIP LOCKED` for the same contract.
#[derive(Debug, Clone)]
pub struct SqliteDispatchStore {
    pool: SqlitePool,
}

impl SqliteDispatchStore {
    /// Create a new store with the given database URL.
    ///
    /// # Arguments
    /// * `database_url` - SQLite database URL (file path or `:memory:`)
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = if database_url.contains(":memory:") {
            // An in-memory database lives and dies with its connection, so
            // the pool must never hand out a second one
            let options = sqlx::sqlite::SqliteConnectOptions::new()
                .in_memory(true)
                .foreign_keys(true)
                .busy_timeout(std::time::Duration::from_secs(5));
            sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await
                .map_err(sqlx_error_to_dispatch_error)?
        } else {
            let options = sqlx::sqlite::SqliteConnectOptions::new()
                .filename(database_url.trim_start_matches("sqlite://"))
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true);
            SqlitePool::connect_with(options)
                .await
                .map_err(sqlx_error_to_dispatch_error)?
        };

        Ok(Self { pool })
    }

    /// Run database migrations. Call once after constructing the store.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| DispatchError::Database(format!("migration failed: {e}")))?;

        tracing::info!("database migrations completed");
        Ok(())
    }

    /// Access the underlying pool; intended for tests that need raw SQL.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Verify database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqliteDispatchStore {
    async fn create(&self, task: NewTask) -> Result<Task> {
        if task.title.trim().is_empty() {
            return Err(DispatchError::empty_field("title"));
        }
        if task.project_id.trim().is_empty() {
            return Err(DispatchError::empty_field("project_id"));
        }

        let now = Utc::now();
        let labels = serde_json::to_string(&task.labels)
            .map_err(|e| DispatchError::Database(format!("labels encoding failed: {e}")))?;

        let sql = format!(
            "INSERT INTO tasks (project_id, title, description, branch_name, status, priority, \
             labels, required_role, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&task.project_id)
            .bind(&task.title)
            .bind(&task.description)
            .bind(&task.branch_name)
            .bind(status_to_string(TaskStatus::Backlog))
            .bind(task.priority.as_str())
            .bind(labels)
            .bind(&task.required_role)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        row_to_task(&row)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?");
        let result = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        match result {
            Some(row) => Ok(Some(row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        let mut query_builder = build_task_filter_query(&filter);
        let rows = query_builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        rows.iter().map(row_to_task).collect()
    }

    async fn update_status(&self, id: i64, from: TaskStatus, to: TaskStatus) -> Result<Task> {
        // One statement keeps the CAS and its entry side effects atomic:
        // started_at / coder_id on entering InProgress from Ready, the
        // holder cleared on a bounce-back entry, completed_at on entering
        // Merged. SET expressions read the pre-update row, so the coder
        // capture sees the assignment as it was.
        let now = Utc::now();
        let sql = format!(
            "UPDATE tasks SET \
               status = ?1, \
               updated_at = ?2, \
               started_at = CASE WHEN ?1 = 'InProgress' AND started_at IS NULL \
                   THEN ?2 ELSE started_at END, \
               coder_id = CASE WHEN ?1 = 'InProgress' AND ?4 = 'Ready' AND coder_id IS NULL \
                   THEN assigned_agent_id ELSE coder_id END, \
               assigned_agent_id = CASE WHEN ?1 = 'InProgress' AND ?4 IN ('InQA', 'InReview') \
                   THEN NULL ELSE assigned_agent_id END, \
               completed_at = CASE WHEN ?1 = 'Merged' THEN ?2 ELSE completed_at END \
             WHERE id = ?3 AND status = ?4 \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(status_to_string(to))
            .bind(now)
            .bind(id)
            .bind(status_to_string(from))
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        match row {
            Some(row) => row_to_task(&row),
            None => {
                // Zero rows: either the task is gone or the CAS lost
                match TaskStore::get_by_id(self, id).await? {
                    Some(_) => Err(DispatchError::cas_failed(id, from)),
                    None => Err(DispatchError::TaskNotFound(id)),
                }
            }
        }
    }

    async fn assign(&self, task_id: i64, agent_id: i64) -> Result<Task> {
        let sql = format!(
            "UPDATE tasks SET assigned_agent_id = ?, updated_at = ? \
             WHERE id = ? AND status NOT IN ('Merged', 'Backlog') \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(agent_id)
            .bind(Utc::now())
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        match row {
            Some(row) => row_to_task(&row),
            None => match TaskStore::get_by_id(self, task_id).await? {
                Some(task) => Err(DispatchError::terminal_assign(task_id, task.status)),
                None => Err(DispatchError::TaskNotFound(task_id)),
            },
        }
    }

    async fn assign_if_idle(&self, task_id: i64, agent_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_dispatch_error)?;

        // Claim the agent only if it is still Idle
        let claimed = sqlx::query(
            "UPDATE agents SET status = 'Working', current_task_id = ? \
             WHERE id = ? AND status = 'Idle'",
        )
        .bind(task_id)
        .bind(agent_id)
        .execute(&mut *tx)
        .await
        .map_err(sqlx_error_to_dispatch_error)?;

        if claimed.rows_affected() == 0 {
            // Busy, offline, or unknown: not an error, just not claimed
            return Ok(false);
        }

        let updated = sqlx::query("UPDATE tasks SET assigned_agent_id = ?, updated_at = ? WHERE id = ?")
            .bind(agent_id)
            .bind(Utc::now())
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        if updated.rows_affected() == 0 {
            // Dropping the transaction rolls the agent claim back
            return Err(DispatchError::TaskNotFound(task_id));
        }

        tx.commit().await.map_err(sqlx_error_to_dispatch_error)?;
        Ok(true)
    }

    async fn unassign(&self, task_id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE tasks SET assigned_agent_id = NULL, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        if result.rows_affected() == 0 {
            return Err(DispatchError::TaskNotFound(task_id));
        }
        Ok(())
    }

    async fn unassign_ready_by_agent(&self, agent_id: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE tasks SET assigned_agent_id = NULL, updated_at = ? \
             WHERE assigned_agent_id = ? AND status = 'Ready'",
        )
        .bind(Utc::now())
        .bind(agent_id)
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_dispatch_error)?;

        Ok(result.rows_affected())
    }

    async fn release_in_flight_by_agent(&self, agent_id: i64) -> Result<Vec<TaskStatus>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_dispatch_error)?;
        let mut freed = Vec::new();

        // InProgress work goes back to Ready for any coder to pick up
        let released = sqlx::query(
            "UPDATE tasks SET status = 'Ready', assigned_agent_id = NULL, updated_at = ? \
             WHERE assigned_agent_id = ? AND status = 'InProgress'",
        )
        .bind(now)
        .bind(agent_id)
        .execute(&mut *tx)
        .await
        .map_err(sqlx_error_to_dispatch_error)?;
        if released.rows_affected() > 0 {
            freed.push(TaskStatus::InProgress);
        }

        // QA and review work keeps its place in the pipeline
        for status in [TaskStatus::InQa, TaskStatus::InReview] {
            let released = sqlx::query(
                "UPDATE tasks SET assigned_agent_id = NULL, updated_at = ? \
                 WHERE assigned_agent_id = ? AND status = ?",
            )
            .bind(now)
            .bind(agent_id)
            .bind(status_to_string(status))
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;
            if released.rows_affected() > 0 {
                freed.push(status);
            }
        }

        tx.commit().await.map_err(sqlx_error_to_dispatch_error)?;
        Ok(freed)
    }

    async fn set_pr_url(&self, id: i64, url: &str) -> Result<Task> {
        let sql = format!(
            "UPDATE tasks SET pr_url = ?, updated_at = ? WHERE id = ? RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(url)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        match row {
            Some(row) => row_to_task(&row),
            None => Err(DispatchError::TaskNotFound(id)),
        }
    }

    async fn add_dependency(&self, task_id: i64, depends_on_id: i64) -> Result<()> {
        for id in [task_id, depends_on_id] {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?)")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(sqlx_error_to_dispatch_error)?;
            if !exists {
                return Err(DispatchError::TaskNotFound(id));
            }
        }

        sqlx::query("INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id) VALUES (?, ?)")
            .bind(task_id)
            .bind(depends_on_id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        Ok(())
    }

    async fn list_dependencies(&self, task_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT depends_on_id FROM task_dependencies WHERE task_id = ? ORDER BY depends_on_id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_dispatch_error)?;

        Ok(ids)
    }

    async fn dependencies_merged(&self, task_id: i64) -> Result<bool> {
        let ready: bool = sqlx::query_scalar(
            "SELECT NOT EXISTS( \
               SELECT 1 FROM task_dependencies d \
               LEFT JOIN tasks t ON t.id = d.depends_on_id \
               WHERE d.task_id = ? AND (t.status IS NULL OR t.status != 'Merged'))",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_dispatch_error)?;

        Ok(ready)
    }
}

#[async_trait]
impl AgentStore for SqliteDispatchStore {
    async fn create(&self, agent: NewAgent) -> Result<Agent> {
        if agent.role.trim().is_empty() {
            return Err(DispatchError::empty_field("role"));
        }
        if agent.name.trim().is_empty() {
            return Err(DispatchError::empty_field("name"));
        }

        let now = Utc::now();
        let sql = format!(
            "INSERT INTO agents (project_id, role, name, model, status, last_heartbeat_at, created_at) \
             VALUES (?, ?, ?, ?, 'Idle', ?, ?) \
             RETURNING {AGENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&agent.project_id)
            .bind(&agent.role)
            .bind(&agent.name)
            .bind(&agent.model)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        row_to_agent(&row)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Agent>> {
        let sql = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?");
        let result = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        match result {
            Some(row) => Ok(Some(row_to_agent(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: AgentFilter) -> Result<Vec<Agent>> {
        let mut query_builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new(format!("SELECT {AGENT_COLUMNS} FROM agents WHERE 1=1"));

        if let Some(ref project_id) = filter.project_id {
            query_builder.push(" AND project_id = ");
            query_builder.push_bind(project_id);
        }
        if let Some(ref role) = filter.role {
            query_builder.push(" AND role = ");
            query_builder.push_bind(role);
        }
        if let Some(status) = filter.status {
            query_builder.push(" AND status = ");
            query_builder.push_bind(status.as_str());
        }
        query_builder.push(" ORDER BY created_at ASC, id ASC");

        let rows = query_builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        rows.iter().map(row_to_agent).collect()
    }

    async fn update_status(&self, id: i64, status: AgentStatus) -> Result<Agent> {
        let sql = format!("UPDATE agents SET status = ? WHERE id = ? RETURNING {AGENT_COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        match row {
            Some(row) => row_to_agent(&row),
            None => Err(DispatchError::AgentNotFound(id)),
        }
    }

    async fn set_working(&self, id: i64, task_id: i64) -> Result<Agent> {
        let sql = format!(
            "UPDATE agents SET status = 'Working', current_task_id = ? \
             WHERE id = ? RETURNING {AGENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(task_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        match row {
            Some(row) => row_to_agent(&row),
            None => Err(DispatchError::AgentNotFound(id)),
        }
    }

    async fn set_idle(&self, id: i64) -> Result<Agent> {
        let sql = format!(
            "UPDATE agents SET status = 'Idle', current_task_id = NULL \
             WHERE id = ? RETURNING {AGENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        match row {
            Some(row) => row_to_agent(&row),
            None => Err(DispatchError::AgentNotFound(id)),
        }
    }

    async fn claim_agent(&self, project_id: &str, role: &str) -> Result<Option<Agent>> {
        // Single statement: the subselect and the update are one atomic
        // write under SQLite's writer serialisation, so N concurrent claims
        // take N distinct agents. current_task_id is cleared; the caller
        // records the task after assignment.
        let sql = format!(
            "UPDATE agents SET status = 'Working', current_task_id = NULL \
             WHERE id = ( \
               SELECT id FROM agents \
               WHERE project_id = ? AND role = ? AND status = 'Idle' \
               ORDER BY created_at ASC, id ASC \
               LIMIT 1) \
             RETURNING {AGENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(project_id)
            .bind(role)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        match row {
            Some(row) => Ok(Some(row_to_agent(&row)?)),
            None => Ok(None),
        }
    }

    async fn touch_heartbeat(&self, id: i64) -> Result<Agent> {
        let sql = format!(
            "UPDATE agents SET last_heartbeat_at = ? WHERE id = ? RETURNING {AGENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        match row {
            Some(row) => row_to_agent(&row),
            None => Err(DispatchError::AgentNotFound(id)),
        }
    }

    async fn list_offline_with_inflight_tasks(&self) -> Result<Vec<Agent>> {
        let sql = format!(
            "SELECT {AGENT_COLUMNS} FROM agents \
             WHERE status = 'Offline' AND EXISTS ( \
               SELECT 1 FROM tasks \
               WHERE tasks.assigned_agent_id = agents.id \
                 AND tasks.status IN ('InProgress', 'InQA', 'InReview')) \
             ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_dispatch_error)?;

        rows.iter().map(row_to_agent).collect()
    }
}
