//! Project workflow: the status vocabulary, the fixed transition table, and
//! the guard every status change must go through.
//!
//! No component sets a project status directly. Manual changes and
//! job-driven changes both call [`WorkflowGuard::apply_transition`] (or
//! [`WorkflowGuard::ensure_status`]), which validates against
//! [`TRANSITIONS`] and commits under a per-project lock.

pub mod error;
pub mod guard;
pub mod project;
pub mod status;
pub mod store;

pub use error::{StatusList, WorkflowError};
pub use guard::WorkflowGuard;
pub use project::{
    ChangeStatus, CreateProject, Project, ProjectCommand, ProjectCreated, ProjectEvent,
    StatusChanged, TransitionOrigin,
};
pub use status::{ProjectStatus, TRANSITIONS, can_transition};
pub use store::{InMemoryProjectStore, JsonFileProjectStore, ProjectStore, ProjectStoreError};
