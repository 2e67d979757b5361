//! Project aggregate: owns the status and decides status changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use photohub_core::{Aggregate, AggregateRoot, DomainError, JobId, ProjectId};
use photohub_events::Event;

use crate::error::WorkflowError;
use crate::status::{ProjectStatus, can_transition};

/// Who asked for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionOrigin {
    /// Explicit user action.
    Manual,
    /// A background job starting or completing.
    Job { job_id: JobId },
}

/// Aggregate root: Project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    id: ProjectId,
    name: String,
    status: Option<ProjectStatus>,
    version: u64,
    created: bool,
}

impl Project {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: ProjectId) -> Self {
        Self {
            id,
            name: String::new(),
            status: None,
            version: 0,
            created: false,
        }
    }

    /// Rebuild a project from persisted state.
    pub fn restore(
        id: ProjectId,
        name: impl Into<String>,
        status: Option<ProjectStatus>,
        version: u64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            status,
            version,
            created: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw stored status (`None` when missing or unrecognised).
    pub fn stored_status(&self) -> Option<ProjectStatus> {
        self.status
    }

    /// Status as the workflow sees it.
    pub fn status(&self) -> ProjectStatus {
        self.status.unwrap_or(ProjectStatus::New)
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Project {
    type Id = ProjectId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProject {
    pub project_id: ProjectId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub project_id: ProjectId,
    pub next: ProjectStatus,
    pub origin: TransitionOrigin,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectCommand {
    CreateProject(CreateProject),
    ChangeStatus(ChangeStatus),
}

/// Event: ProjectCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCreated {
    pub project_id: ProjectId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub project_id: ProjectId,
    pub from: ProjectStatus,
    pub to: ProjectStatus,
    pub origin: TransitionOrigin,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectEvent {
    ProjectCreated(ProjectCreated),
    StatusChanged(StatusChanged),
}

impl ProjectEvent {
    pub fn project_id(&self) -> ProjectId {
        match self {
            ProjectEvent::ProjectCreated(e) => e.project_id,
            ProjectEvent::StatusChanged(e) => e.project_id,
        }
    }
}

impl Event for ProjectEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProjectEvent::ProjectCreated(_) => "project.created",
            ProjectEvent::StatusChanged(_) => "project.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProjectEvent::ProjectCreated(e) => e.occurred_at,
            ProjectEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Project {
    type Command = ProjectCommand;
    type Event = ProjectEvent;
    type Error = WorkflowError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProjectEvent::ProjectCreated(e) => {
                self.id = e.project_id;
                self.name = e.name.clone();
                self.status = Some(ProjectStatus::New);
                self.created = true;
            }
            ProjectEvent::StatusChanged(e) => {
                self.status = Some(e.to);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProjectCommand::CreateProject(cmd) => self.handle_create(cmd),
            ProjectCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
        }
    }
}

impl Project {
    fn ensure_project_id(&self, project_id: ProjectId) -> Result<(), WorkflowError> {
        if self.id != project_id {
            return Err(DomainError::validation("project_id mismatch").into());
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProject) -> Result<Vec<ProjectEvent>, WorkflowError> {
        if self.created {
            return Err(DomainError::conflict("project already exists").into());
        }

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("project name cannot be empty").into());
        }

        Ok(vec![ProjectEvent::ProjectCreated(ProjectCreated {
            project_id: cmd.project_id,
            name: name.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(
        &self,
        cmd: &ChangeStatus,
    ) -> Result<Vec<ProjectEvent>, WorkflowError> {
        if !self.created {
            return Err(WorkflowError::ProjectNotFound(cmd.project_id));
        }
        self.ensure_project_id(cmd.project_id)?;

        if !can_transition(self.status, cmd.next) {
            return Err(WorkflowError::illegal(self.id, self.status(), cmd.next));
        }

        Ok(vec![ProjectEvent::StatusChanged(StatusChanged {
            project_id: self.id,
            from: self.status(),
            to: cmd.next,
            origin: cmd.origin,
            occurred_at: cmd.occurred_at,
        })])
    }
}
