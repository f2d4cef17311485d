//! The pipeline table: which role takes a task on entry to a status, which
//! role is freed on exit, and what gets broadcast.
//!
//! All role-specific behaviour lives here as data. The scheduler never names
//! a role in code; adding a stage means extending [`TaskStatus`] and this
//! table, not touching scheduler logic.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::TaskStatus;

/// Actions attached to a single pipeline status.
///
/// All fields are optional. A status with no action (e.g. Backlog) simply
/// passes tasks through without routing side effects.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageAction {
    /// Role to hand the task to on entry to this status
    pub assign_role: Option<String>,
    /// Role released when a task leaves this status; defaults to
    /// `assign_role` when unset
    pub freed_role: Option<String>,
    /// Event name to broadcast on entry, paired with `broadcast_role`
    pub broadcast_event: Option<String>,
    /// Role whose connected workers receive `broadcast_event`
    pub broadcast_role: Option<String>,
}

impl StageAction {
    /// Action that assigns the given role on entry.
    pub fn assign(role: impl Into<String>) -> Self {
        Self {
            assign_role: Some(role.into()),
            ..Default::default()
        }
    }

    /// Action that only frees a role on exit.
    pub fn freeing(role: impl Into<String>) -> Self {
        Self {
            freed_role: Some(role.into()),
            ..Default::default()
        }
    }

    /// Action that broadcasts an event to a role on entry.
    pub fn broadcast(event: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            broadcast_event: Some(event.into()),
            broadcast_role: Some(role.into()),
            ..Default::default()
        }
    }

    /// The role whose worker is released when a task leaves this status.
    pub fn effective_freed_role(&self) -> Option<&str> {
        self.freed_role.as_deref().or(self.assign_role.as_deref())
    }
}

/// Read-only map from status to [`StageAction`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    stages: HashMap<TaskStatus, StageAction>,
}

impl PipelineConfig {
    /// Build a pipeline from an explicit table.
    pub fn new(stages: HashMap<TaskStatus, StageAction>) -> Self {
        Self { stages }
    }

    /// The coder → QA → reviewer pipeline this dispatcher ships with.
    ///
    /// "coder" appears only as the freed role of InProgress: entry to
    /// InProgress is either a coder pulling its own Ready task or a
    /// bounce-back, neither of which routes through `assign_role`.
    pub fn standard() -> Self {
        let mut stages = HashMap::new();
        stages.insert(TaskStatus::Ready, StageAction::assign("coder"));
        stages.insert(TaskStatus::InProgress, StageAction::freeing("coder"));
        stages.insert(TaskStatus::InQa, StageAction::assign("qa"));
        stages.insert(TaskStatus::InReview, StageAction::assign("reviewer"));
        stages.insert(TaskStatus::Merged, StageAction::broadcast("main_updated", "coder"));
        Self { stages }
    }

    /// Action for a status, if the table has one.
    pub fn action(&self, status: TaskStatus) -> Option<&StageAction> {
        self.stages.get(&status)
    }

    /// The role released when a task leaves `status`.
    pub fn effective_freed_role(&self, status: TaskStatus) -> Option<&str> {
        self.action(status).and_then(StageAction::effective_freed_role)
    }

    /// Statuses a sweep for `role` must visit, in pipeline order.
    ///
    /// Matches on `assign_role` OR `freed_role`. The dual match recovers
    /// tasks stranded in a status whose role appears only as freed (an
    /// InProgress task left unassigned by a failed bounce-back is found by
    /// the coder sweep this way).
    pub fn statuses_for_role(&self, role: &str) -> Vec<TaskStatus> {
        TaskStatus::ALL
            .iter()
            .copied()
            .filter(|status| {
                self.action(*status).is_some_and(|action| {
                    action.assign_role.as_deref() == Some(role)
                        || action.freed_role.as_deref() == Some(role)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table() {
        let pipeline = PipelineConfig::standard();

        assert_eq!(
            pipeline.action(TaskStatus::Ready).unwrap().assign_role.as_deref(),
            Some("coder")
        );
        assert_eq!(
            pipeline.action(TaskStatus::InQa).unwrap().assign_role.as_deref(),
            Some("qa")
        );
        assert_eq!(
            pipeline.action(TaskStatus::InReview).unwrap().assign_role.as_deref(),
            Some("reviewer")
        );
        assert!(pipeline.action(TaskStatus::Backlog).is_none());

        let merged = pipeline.action(TaskStatus::Merged).unwrap();
        assert_eq!(merged.broadcast_event.as_deref(), Some("main_updated"));
        assert_eq!(merged.broadcast_role.as_deref(), Some("coder"));
        assert!(merged.assign_role.is_none());
    }

    #[test]
    fn test_effective_freed_role_falls_back_to_assign_role() {
        let pipeline = PipelineConfig::standard();

        // Explicit freed role
        assert_eq!(pipeline.effective_freed_role(TaskStatus::InProgress), Some("coder"));
        // Fallback to assign role
        assert_eq!(pipeline.effective_freed_role(TaskStatus::InQa), Some("qa"));
        assert_eq!(pipeline.effective_freed_role(TaskStatus::InReview), Some("reviewer"));
        // No action at all
        assert_eq!(pipeline.effective_freed_role(TaskStatus::Backlog), None);
        // Broadcast-only action frees nobody
        assert_eq!(pipeline.effective_freed_role(TaskStatus::Merged), None);
    }

    #[test]
    fn test_statuses_for_role_dual_match() {
        let pipeline = PipelineConfig::standard();

        // "coder" matches Ready via assign_role and InProgress via freed_role
        assert_eq!(
            pipeline.statuses_for_role("coder"),
            vec![TaskStatus::Ready, TaskStatus::InProgress]
        );
        assert_eq!(pipeline.statuses_for_role("qa"), vec![TaskStatus::InQa]);
        assert_eq!(pipeline.statuses_for_role("reviewer"), vec![TaskStatus::InReview]);
        assert!(pipeline.statuses_for_role("architect").is_empty());
    }

    #[test]
    fn test_custom_table_round_trips_through_serde() {
        let mut stages = HashMap::new();
        stages.insert(TaskStatus::Ready, StageAction::assign("architect"));
        let pipeline = PipelineConfig::new(stages);

        let json = serde_json::to_string(&pipeline).unwrap();
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, pipeline);
    }
}
