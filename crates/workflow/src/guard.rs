//! Workflow guard: the only write path for project status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::{info, warn};

use photohub_core::{Aggregate, AggregateRoot, ExpectedVersion, ProjectId};
use photohub_events::{EventBus, InMemoryEventBus, Subscription};

use crate::error::WorkflowError;
use crate::project::{ChangeStatus, CreateProject, Project, ProjectCommand, ProjectEvent, TransitionOrigin};
use crate::status::{ProjectStatus, can_transition};
use crate::store::ProjectStore;

/// Validates and commits project status transitions.
///
/// - Every change is checked against the fixed transition table.
/// - Writers are serialised per project: two concurrent transitions on the
///   same project run one after the other, each re-reading the stored status.
/// - The store is re-read on every call, so a guard created at startup sees
///   whatever status was persisted before the restart.
pub struct WorkflowGuard {
    store: Arc<dyn ProjectStore>,
    /// One writer lock per project, created on first use and kept for the
    /// guard's lifetime. Projects are never deleted, so this grows with the
    /// project count only.
    locks: Mutex<HashMap<ProjectId, Arc<Mutex<()>>>>,
    events: InMemoryEventBus<ProjectEvent>,
}

impl core::fmt::Debug for WorkflowGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkflowGuard").finish_non_exhaustive()
    }
}

impl WorkflowGuard {
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            events: InMemoryEventBus::new(),
        }
    }

    /// Pure check against the transition table.
    pub fn can_transition(current: Option<ProjectStatus>, next: ProjectStatus) -> bool {
        can_transition(current, next)
    }

    /// Register a new project at status `new`.
    pub fn create_project(&self, name: &str) -> Result<ProjectId, WorkflowError> {
        let id = ProjectId::new();
        let project = Project::empty(id);
        let command = ProjectCommand::CreateProject(CreateProject {
            project_id: id,
            name: name.to_string(),
            occurred_at: Utc::now(),
        });

        let lock = self.project_lock(id);
        let _writer = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.commit(project, &command)?;

        info!(project_id = %id, name = name.trim(), "project created");
        Ok(id)
    }

    pub fn project(&self, project_id: ProjectId) -> Result<Project, WorkflowError> {
        self.store
            .load(project_id)?
            .filter(Project::is_created)
            .ok_or(WorkflowError::ProjectNotFound(project_id))
    }

    pub fn projects(&self) -> Result<Vec<Project>, WorkflowError> {
        Ok(self.store.list()?)
    }

    pub fn current_status(&self, project_id: ProjectId) -> Result<ProjectStatus, WorkflowError> {
        Ok(self.project(project_id)?.status())
    }

    /// Statuses the project may move to next.
    pub fn allowed_next(
        &self,
        project_id: ProjectId,
    ) -> Result<&'static [ProjectStatus], WorkflowError> {
        Ok(self.current_status(project_id)?.allowed_next())
    }

    /// Manual (user-initiated) status change.
    pub fn apply_transition(
        &self,
        project_id: ProjectId,
        next: ProjectStatus,
    ) -> Result<ProjectStatus, WorkflowError> {
        self.transition(project_id, next, TransitionOrigin::Manual)
    }

    /// Status change with an explicit origin.
    ///
    /// Fails with [`WorkflowError::IllegalTransition`] when the table does not
    /// allow the move from the project's current status; otherwise the new
    /// status is persisted before this returns.
    pub fn transition(
        &self,
        project_id: ProjectId,
        next: ProjectStatus,
        origin: TransitionOrigin,
    ) -> Result<ProjectStatus, WorkflowError> {
        let lock = self.project_lock(project_id);
        let _writer = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.transition_locked(project_id, next, origin)
    }

    /// Move to `target` unless the project is already there.
    ///
    /// Used for job-driven changes, where a retried job finds the project
    /// already in the job's working status.
    pub fn ensure_status(
        &self,
        project_id: ProjectId,
        target: ProjectStatus,
        origin: TransitionOrigin,
    ) -> Result<ProjectStatus, WorkflowError> {
        let lock = self.project_lock(project_id);
        let _writer = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if self.current_status(project_id)? == target {
            return Ok(target);
        }
        self.transition_locked(project_id, target, origin)
    }

    /// Stream of project events committed after this call.
    pub fn subscribe(&self) -> Subscription<ProjectEvent> {
        self.events.subscribe()
    }

    fn transition_locked(
        &self,
        project_id: ProjectId,
        next: ProjectStatus,
        origin: TransitionOrigin,
    ) -> Result<ProjectStatus, WorkflowError> {
        let project = self.project(project_id)?;
        let command = ProjectCommand::ChangeStatus(ChangeStatus {
            project_id,
            next,
            origin,
            occurred_at: Utc::now(),
        });

        match self.commit(project, &command) {
            Ok(project) => Ok(project.status()),
            Err(err) => {
                warn!(project_id = %project_id, to = %next, origin = ?origin, error = %err, "project transition rejected");
                Err(err)
            }
        }
    }

    /// Decide, apply, persist, publish. Caller holds the project lock.
    fn commit(&self, mut project: Project, command: &ProjectCommand) -> Result<Project, WorkflowError> {
        let expected = ExpectedVersion::Exact(project.version());
        let events = project.handle(command)?;
        for event in &events {
            project.apply(event);
        }
        self.store.save(&project, expected)?;

        for event in events {
            if let ProjectEvent::StatusChanged(e) = &event {
                info!(
                    project_id = %e.project_id,
                    from = %e.from,
                    to = %e.to,
                    origin = ?e.origin,
                    "project status changed"
                );
            }
            if let Err(err) = self.events.publish(event) {
                warn!(error = ?err, "failed to publish project event");
            }
        }

        Ok(project)
    }

    fn project_lock(&self, project_id: ProjectId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(project_id).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryProjectStore, JsonFileProjectStore};
    use photohub_core::JobId;
    use proptest::prelude::*;
    use std::thread;

    fn guard() -> WorkflowGuard {
        WorkflowGuard::new(Arc::new(InMemoryProjectStore::new()))
    }

    fn walk(guard: &WorkflowGuard, id: ProjectId, path: &[ProjectStatus]) {
        for status in path {
            guard.apply_transition(id, *status).unwrap();
        }
    }

    #[test]
    fn writer_locks_are_one_per_project() {
        let guard = guard();
        let a = guard.create_project("A").unwrap();
        let b = guard.create_project("B").unwrap();
        walk(&guard, a, &[ProjectStatus::Importing, ProjectStatus::New, ProjectStatus::Importing]);
        walk(&guard, b, &[ProjectStatus::Importing]);

        assert_eq!(guard.locks.lock().unwrap().len(), 2);
    }

    #[test]
    fn apply_transition_commits_and_returns_new_status() {
        let guard = guard();
        let id = guard.create_project("Studio session").unwrap();

        let status = guard.apply_transition(id, ProjectStatus::Importing).unwrap();

        assert_eq!(status, ProjectStatus::Importing);
        assert_eq!(guard.current_status(id).unwrap(), ProjectStatus::Importing);
    }

    #[test]
    fn skipping_import_and_culling_is_rejected() {
        let guard = guard();
        let id = guard.create_project("Skip ahead").unwrap();

        let err = guard.apply_transition(id, ProjectStatus::Editing).unwrap_err();

        match err {
            WorkflowError::IllegalTransition { from, to, .. } => {
                assert_eq!(from, ProjectStatus::New);
                assert_eq!(to, ProjectStatus::Editing);
            }
            other => panic!("expected IllegalTransition, got {other:?}"),
        }
        assert_eq!(guard.current_status(id).unwrap(), ProjectStatus::New);
    }

    #[test]
    fn archived_rejects_every_further_transition() {
        use ProjectStatus::*;
        let guard = guard();
        let id = guard.create_project("Done").unwrap();
        walk(&guard, id, &[Importing, Culling, Editing, Exporting, Delivered, Archived]);

        for next in ProjectStatus::ALL {
            let err = guard.apply_transition(id, next).unwrap_err();
            assert!(err.is_illegal_transition(), "archived -> {next} must be illegal");
        }
        assert_eq!(guard.allowed_next(id).unwrap(), &[] as &[ProjectStatus]);
    }

    #[test]
    fn ensure_status_is_a_no_op_when_already_there() {
        let guard = guard();
        let id = guard.create_project("Retry").unwrap();
        let origin = TransitionOrigin::Job { job_id: JobId::new() };
        let events = guard.subscribe();

        guard.ensure_status(id, ProjectStatus::Importing, origin).unwrap();
        guard.ensure_status(id, ProjectStatus::Importing, origin).unwrap();

        assert_eq!(events.drain().len(), 1);
        assert_eq!(guard.current_status(id).unwrap(), ProjectStatus::Importing);
    }

    #[test]
    fn unknown_project_is_reported() {
        let guard = guard();
        let err = guard.apply_transition(ProjectId::new(), ProjectStatus::Importing).unwrap_err();
        assert!(matches!(err, WorkflowError::ProjectNotFound(_)));
    }

    #[test]
    fn status_changes_are_published_with_origin() {
        let guard = guard();
        let id = guard.create_project("Events").unwrap();
        let events = guard.subscribe();
        let job_id = JobId::new();

        guard
            .transition(id, ProjectStatus::Importing, TransitionOrigin::Job { job_id })
            .unwrap();

        match events.try_recv().unwrap() {
            ProjectEvent::StatusChanged(e) => {
                assert_eq!(e.origin, TransitionOrigin::Job { job_id });
                assert_eq!(e.to, ProjectStatus::Importing);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn concurrent_transitions_on_one_project_commit_exactly_once() {
        let guard = Arc::new(guard());
        let id = guard.create_project("Race").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                thread::spawn(move || guard.apply_transition(id, ProjectStatus::Importing).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(guard.project(id).unwrap().version(), 2);
    }

    #[test]
    fn status_is_reread_from_persisted_store_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");

        let id = {
            let guard = WorkflowGuard::new(Arc::new(JsonFileProjectStore::open(&path).unwrap()));
            let id = guard.create_project("Persisted").unwrap();
            guard.apply_transition(id, ProjectStatus::Importing).unwrap();
            id
        };

        let guard = WorkflowGuard::new(Arc::new(JsonFileProjectStore::open(&path).unwrap()));
        assert_eq!(guard.current_status(id).unwrap(), ProjectStatus::Importing);
        assert!(guard.apply_transition(id, ProjectStatus::Culling).is_ok());
    }

    proptest! {
        /// Whatever sequence of attempts is made, the committed history only
        /// follows table edges, and archived is absorbing.
        #[test]
        fn random_attempts_only_follow_table_edges(
            attempts in proptest::collection::vec(0usize..7, 0..40)
        ) {
            let guard = guard();
            let id = guard.create_project("Property").unwrap();
            let mut current = ProjectStatus::New;

            for index in attempts {
                let next = ProjectStatus::ALL[index];
                let result = guard.apply_transition(id, next);
                if can_transition(Some(current), next) {
                    prop_assert_eq!(result.unwrap(), next);
                    current = next;
                } else {
                    prop_assert!(result.unwrap_err().is_illegal_transition());
                }
                prop_assert_eq!(guard.current_status(id).unwrap(), current);
                if current == ProjectStatus::Archived {
                    prop_assert!(current.allowed_next().is_empty());
                }
            }
        }
    }
}
