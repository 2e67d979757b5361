//! Workflow error model.

use thiserror::Error;

use photohub_core::{DomainError, ProjectId};

use crate::status::ProjectStatus;
use crate::store::ProjectStoreError;

/// Statuses listed in a user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusList(pub Vec<ProjectStatus>);

impl core::fmt::Display for StatusList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("none");
        }
        for (i, status) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(status.as_str())?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The transition table does not allow `from -> to`.
    #[error(
        "illegal status transition for project {project_id}: {from} -> {to} (allowed from {from}: {allowed})"
    )]
    IllegalTransition {
        project_id: ProjectId,
        from: ProjectStatus,
        to: ProjectStatus,
        allowed: StatusList,
    },

    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] ProjectStoreError),
}

impl WorkflowError {
    pub fn illegal(project_id: ProjectId, from: ProjectStatus, to: ProjectStatus) -> Self {
        Self::IllegalTransition {
            project_id,
            from,
            to,
            allowed: StatusList(from.allowed_next().to_vec()),
        }
    }

    pub fn is_illegal_transition(&self) -> bool {
        matches!(self, WorkflowError::IllegalTransition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_message_names_the_rule() {
        let id = ProjectId::new();
        let err = WorkflowError::illegal(id, ProjectStatus::New, ProjectStatus::Editing);
        let msg = err.to_string();
        assert!(msg.contains("new -> editing"), "{msg}");
        assert!(msg.contains("allowed from new: importing"), "{msg}");
    }

    #[test]
    fn archived_lists_no_alternatives() {
        let err = WorkflowError::illegal(
            ProjectId::new(),
            ProjectStatus::Archived,
            ProjectStatus::Editing,
        );
        assert!(err.to_string().ends_with("(allowed from archived: none)"));
    }
}
