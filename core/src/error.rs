use crate::models::TaskStatus;
use thiserror::Error;

/// Result type alias for dispatcher operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Error types for the work dispatcher.
///
/// State-mutating failures surface to the caller; side-effect failures
/// (notifications, event publishes) are logged at their call sites and
/// swallowed, so `Notify` and `EventBus` never travel far.
///
/// # Examples
///
/// ```rust
/// use dispatch_core::error::DispatchError;
/// use dispatch_core::models::TaskStatus;
///
/// let error = DispatchError::cas_failed(42, TaskStatus::InProgress);
/// assert!(error.is_cas_failed());
///
/// let error = DispatchError::task_not_found(7);
/// assert!(error.is_not_found());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Task not found by id
    #[error("task {0} not found")]
    TaskNotFound(i64),

    /// Agent not found by id
    #[error("agent {0} not found")]
    AgentNotFound(i64),

    /// The requested transition is not an edge of the pipeline graph
    #[error("invalid status transition from {0} to {1}")]
    InvalidTransition(TaskStatus, TaskStatus),

    /// Compare-and-swap lost: the task was no longer in the expected status
    #[error("task {0} is no longer in status {1}")]
    CasFailed(i64, TaskStatus),

    /// Attempt to assign a task in a terminal-for-routing status
    #[error("task {0} is {1} and cannot be assigned")]
    TerminalAssign(i64, TaskStatus),

    /// Validation error with details
    #[error("validation error: {0}")]
    Validation(String),

    /// Persistence failure
    #[error("database error: {0}")]
    Database(String),

    /// Push to a single worker failed (best-effort; logged, not surfaced)
    #[error("notify error: {0}")]
    Notify(String),

    /// Event bus publish or subscribe failed
    #[error("event bus error: {0}")]
    EventBus(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl DispatchError {
    /// Create a not found error for a task id
    pub fn task_not_found(id: i64) -> Self {
        Self::TaskNotFound(id)
    }

    /// Create a not found error for an agent id
    pub fn agent_not_found(id: i64) -> Self {
        Self::AgentNotFound(id)
    }

    /// Create a transition error for a rejected edge
    pub fn invalid_transition(from: TaskStatus, to: TaskStatus) -> Self {
        Self::InvalidTransition(from, to)
    }

    /// Create a CAS error for a task that moved under the caller
    pub fn cas_failed(task_id: i64, expected: TaskStatus) -> Self {
        Self::CasFailed(task_id, expected)
    }

    /// Create an assignment-refused error for a Merged/Backlog task
    pub fn terminal_assign(task_id: i64, status: TaskStatus) -> Self {
        Self::TerminalAssign(task_id, status)
    }

    /// Create a validation error for an empty field
    pub fn empty_field(field: &str) -> Self {
        Self::Validation(format!("field '{field}' cannot be empty"))
    }

    /// Check if this error indicates a missing task or agent
    pub fn is_not_found(&self) -> bool {
        matches!(self, DispatchError::TaskNotFound(_) | DispatchError::AgentNotFound(_))
    }

    /// Check if this error is a lost compare-and-swap
    pub fn is_cas_failed(&self) -> bool {
        matches!(self, DispatchError::CasFailed(_, _))
    }

    /// Check if this error is a rejected pipeline edge
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, DispatchError::InvalidTransition(_, _))
    }

    /// Check if this error indicates a persistence problem
    pub fn is_database(&self) -> bool {
        matches!(self, DispatchError::Database(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = DispatchError::task_not_found(42);
        assert_eq!(error, DispatchError::TaskNotFound(42));
        assert!(error.is_not_found());

        let error = DispatchError::agent_not_found(7);
        assert!(error.is_not_found());

        let error = DispatchError::cas_failed(3, TaskStatus::InQa);
        assert!(error.is_cas_failed());
        assert!(!error.is_not_found());

        let error = DispatchError::invalid_transition(TaskStatus::Merged, TaskStatus::InProgress);
        assert!(error.is_invalid_transition());
    }

    #[test]
    fn test_error_display() {
        let error = DispatchError::InvalidTransition(TaskStatus::Merged, TaskStatus::InProgress);
        assert_eq!(
            format!("{error}"),
            "invalid status transition from Merged to InProgress"
        );

        let error = DispatchError::CasFailed(9, TaskStatus::Ready);
        assert_eq!(format!("{error}"), "task 9 is no longer in status Ready");

        let error = DispatchError::TerminalAssign(4, TaskStatus::Merged);
        assert_eq!(format!("{error}"), "task 4 is Merged and cannot be assigned");
    }

    #[test]
    fn test_error_predicates() {
        assert!(DispatchError::Database("boom".to_string()).is_database());
        assert!(!DispatchError::Notify("boom".to_string()).is_database());
        assert!(!DispatchError::empty_field("title").is_not_found());
    }
}
