use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use dispatch_core::{
    error::{DispatchError, Result},
    models::{Agent, AgentStatus, Priority, Task, TaskFilter, TaskStatus},
};

/// Column list matching [`row_to_task`]. Every task query selects or
/// returns exactly these columns in this order.
pub const TASK_COLUMNS: &str = "id, project_id, title, description, branch_name, pr_url, status, \
     priority, assigned_agent_id, coder_id, labels, required_role, \
     created_at, updated_at, started_at, completed_at";

/// Column list matching [`row_to_agent`].
pub const AGENT_COLUMNS: &str =
    "id, project_id, role, name, model, status, current_task_id, last_heartbeat_at, created_at";

/// Convert TaskStatus enum to string for database storage
pub fn status_to_string(status: TaskStatus) -> &'static str {
    status.as_str()
}

/// Convert string from database to TaskStatus enum
pub fn string_to_status(s: &str) -> Result<TaskStatus> {
    TaskStatus::parse(s)
        .ok_or_else(|| DispatchError::Database(format!("invalid task status in database: {s}")))
}

/// Convert string from database to Priority enum
pub fn string_to_priority(s: &str) -> Result<Priority> {
    Priority::parse(s)
        .ok_or_else(|| DispatchError::Database(format!("invalid priority in database: {s}")))
}

/// Convert string from database to AgentStatus enum
pub fn string_to_agent_status(s: &str) -> Result<AgentStatus> {
    AgentStatus::parse(s)
        .ok_or_else(|| DispatchError::Database(format!("invalid agent status in database: {s}")))
}

/// Convert a SQLite row to a Task model
pub fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let status_str: String = row.get("status");
    let status = string_to_status(&status_str)?;
    let priority_str: String = row.get("priority");
    let priority = string_to_priority(&priority_str)?;

    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");
    let started_at: Option<DateTime<Utc>> = row.get("started_at");
    let completed_at: Option<DateTime<Utc>> = row.get("completed_at");

    // labels live in a JSON text column
    let labels_json: String = row.get("labels");
    let labels: Vec<String> = serde_json::from_str(&labels_json)
        .map_err(|e| DispatchError::Database(format!("invalid labels column: {e}")))?;

    Ok(Task {
        id: row.get("id"),
        project_id: row.get("project_id"),
        title: row.get("title"),
        description: row.get("description"),
        branch_name: row.get("branch_name"),
        pr_url: row.get("pr_url"),
        status,
        priority,
        assigned_agent_id: row.get("assigned_agent_id"),
        coder_id: row.get("coder_id"),
        labels,
        required_role: row.get("required_role"),
        created_at,
        updated_at,
        started_at,
        completed_at,
    })
}

/// Convert a SQLite row to an Agent model
pub fn row_to_agent(row: &SqliteRow) -> Result<Agent> {
    let status_str: String = row.get("status");
    let status = string_to_agent_status(&status_str)?;

    let last_heartbeat_at: DateTime<Utc> = row.get("last_heartbeat_at");
    let created_at: DateTime<Utc> = row.get("created_at");

    Ok(Agent {
        id: row.get("id"),
        project_id: row.get("project_id"),
        role: row.get("role"),
        name: row.get("name"),
        model: row.get("model"),
        status,
        current_task_id: row.get("current_task_id"),
        last_heartbeat_at,
        created_at,
    })
}

/// Convert a SQLx error to a DispatchError
pub fn sqlx_error_to_dispatch_error(err: sqlx::Error) -> DispatchError {
    match &err {
        sqlx::Error::Database(db_err) => {
            DispatchError::Database(format!("database constraint error: {}", db_err.message()))
        }
        sqlx::Error::RowNotFound => {
            // Missing rows are handled at the call sites with fetch_optional
            DispatchError::Database("unexpected RowNotFound error".to_string())
        }
        sqlx::Error::PoolTimedOut => DispatchError::Database("connection pool timeout".to_string()),
        sqlx::Error::Io(io_err) => DispatchError::Database(format!("database I/O error: {io_err}")),
        _ => DispatchError::Database(format!("database operation failed: {err}")),
    }
}

/// Build the task list query for a filter using QueryBuilder with proper
/// type binding
pub fn build_task_filter_query(filter: &TaskFilter) -> sqlx::QueryBuilder<'_, sqlx::Sqlite> {
    let mut query_builder: sqlx::QueryBuilder<sqlx::Sqlite> =
        sqlx::QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1=1"));

    if let Some(ref project_id) = filter.project_id {
        query_builder.push(" AND project_id = ");
        query_builder.push_bind(project_id);
    }

    if let Some(status) = filter.status {
        query_builder.push(" AND status = ");
        query_builder.push_bind(status_to_string(status));
    }

    if let Some(priority) = filter.priority {
        query_builder.push(" AND priority = ");
        query_builder.push_bind(priority.as_str());
    }

    if let Some(assigned_to) = filter.assigned_to {
        query_builder.push(" AND assigned_agent_id = ");
        query_builder.push_bind(assigned_to);
    }

    if let Some(ref label) = filter.label {
        // labels is a JSON array of strings; membership by quoted substring
        query_builder.push(" AND labels LIKE ");
        query_builder.push_bind(format!("%\"{label}\"%"));
    }

    if filter.unassigned {
        query_builder.push(" AND assigned_agent_id IS NULL");
    }

    if filter.oldest_first {
        // FIFO for sweeps; id breaks created_at ties
        query_builder.push(" ORDER BY created_at ASC, id ASC");
    } else {
        query_builder.push(" ORDER BY created_at DESC, id DESC");
    }

    if let Some(limit) = filter.limit {
        query_builder.push(" LIMIT ");
        query_builder.push_bind(limit);
    }

    query_builder
}
