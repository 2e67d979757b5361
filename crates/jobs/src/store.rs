//! Archive for finished jobs.
//!
//! The engine keeps live jobs in its own registry. Once a job is terminal and
//! no longer interesting to the UI, `JobEngine::cleanup` moves it here so the
//! registry stays small while history stays queryable.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use photohub_core::JobId;

use crate::types::{Job, JobKind, JobState};

/// Job archive abstraction.
pub trait JobStore: Send + Sync {
    /// Archive a terminal job.
    fn archive(&self, job: Job) -> Result<(), JobStoreError>;

    /// Get an archived job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// List archived jobs, oldest first, optionally filtered by kind.
    fn list(&self, kind: Option<JobKind>, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    /// Delete archived jobs in any of `states` that finished before `older_than`.
    /// Returns how many were removed.
    fn purge(&self, states: &[JobState], older_than: DateTime<Utc>) -> Result<usize, JobStoreError>;

    /// Counts per state.
    fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job already archived: {0}")]
    AlreadyExists(JobId),
    #[error("only finished jobs can be archived: {0} is {1}")]
    NotTerminal(JobId, JobState),
}

/// Job statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub queued: usize,
    pub running: usize,
    pub paused: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl JobStats {
    pub fn count(&mut self, state: JobState) {
        match state {
            JobState::Queued => self.queued += 1,
            JobState::Running => self.running += 1,
            JobState::Paused => self.paused += 1,
            JobState::Succeeded => self.succeeded += 1,
            JobState::Failed => self.failed += 1,
            JobState::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.running + self.paused + self.succeeded + self.failed + self.cancelled
    }
}

impl core::ops::Add for JobStats {
    type Output = JobStats;

    fn add(self, rhs: JobStats) -> JobStats {
        JobStats {
            queued: self.queued + rhs.queued,
            running: self.running + rhs.running,
            paused: self.paused + rhs.paused,
            succeeded: self.succeeded + rhs.succeeded,
            failed: self.failed + rhs.failed,
            cancelled: self.cancelled + rhs.cancelled,
        }
    }
}

/// In-memory job archive for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl JobStore for InMemoryJobStore {
    fn archive(&self, job: Job) -> Result<(), JobStoreError> {
        if !job.is_terminal() {
            return Err(JobStoreError::NotTerminal(job.id, job.state));
        }
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(jobs.get(&job_id).cloned())
    }

    fn list(&self, kind: Option<JobKind>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| kind.is_none_or(|k| j.kind == k))
            .cloned()
            .collect();

        result.sort_by_key(|j| j.created_at);
        result.truncate(limit);
        Ok(result)
    }

    fn purge(&self, states: &[JobState], older_than: DateTime<Utc>) -> Result<usize, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, j| {
            let finished = j.finished_at.unwrap_or(j.updated_at);
            !(states.contains(&j.state) && finished < older_than)
        });
        Ok(before - jobs.len())
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = JobStats::default();
        for job in jobs.values() {
            stats.count(job.state);
        }
        Ok(stats)
    }
}

impl JobStore for Arc<InMemoryJobStore> {
    fn archive(&self, job: Job) -> Result<(), JobStoreError> {
        (**self).archive(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(job_id)
    }

    fn list(&self, kind: Option<JobKind>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        (**self).list(kind, limit)
    }

    fn purge(&self, states: &[JobState], older_than: DateTime<Utc>) -> Result<usize, JobStoreError> {
        (**self).purge(states, older_than)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobParams;
    use std::path::PathBuf;

    fn finished(kind: JobKind, state: JobState) -> Job {
        let params = match kind {
            JobKind::Import => JobParams::Import {
                source_dir: PathBuf::from("/card"),
                dest_dir: PathBuf::from("/lib"),
                files: vec![PathBuf::from("a.jpg")],
            },
            JobKind::Export => JobParams::Export {
                destination: PathBuf::from("/out"),
                assets: vec![PathBuf::from("a.jpg")],
            },
            JobKind::CullBatch => JobParams::CullBatch {
                assets: vec!["a".into()],
                rating: Some(4),
                rejected: None,
            },
        };
        let mut job = Job::new(kind, params, None);
        match state {
            JobState::Succeeded => job.mark_succeeded(),
            JobState::Failed => job.mark_failed("boom"),
            JobState::Cancelled => job.mark_cancelled(),
            other => job.state = other,
        }
        job
    }

    #[test]
    fn archive_and_get() {
        let store = InMemoryJobStore::new();
        let job = finished(JobKind::Export, JobState::Succeeded);
        let id = job.id;

        store.archive(job.clone()).unwrap();

        assert_eq!(store.get(id).unwrap().unwrap().id, id);
        assert!(matches!(
            store.archive(job),
            Err(JobStoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn live_jobs_cannot_be_archived() {
        let store = InMemoryJobStore::new();
        let job = finished(JobKind::Import, JobState::Running);
        assert!(matches!(
            store.archive(job),
            Err(JobStoreError::NotTerminal(_, JobState::Running))
        ));
    }

    #[test]
    fn list_filters_by_kind() {
        let store = InMemoryJobStore::new();
        store.archive(finished(JobKind::Import, JobState::Succeeded)).unwrap();
        store.archive(finished(JobKind::Export, JobState::Failed)).unwrap();
        store.archive(finished(JobKind::Export, JobState::Cancelled)).unwrap();

        assert_eq!(store.list(None, 10).unwrap().len(), 3);
        assert_eq!(store.list(Some(JobKind::Export), 10).unwrap().len(), 2);
        assert_eq!(store.list(None, 1).unwrap().len(), 1);
    }

    #[test]
    fn purge_removes_only_matching_old_jobs() {
        let store = InMemoryJobStore::new();
        store.archive(finished(JobKind::Import, JobState::Succeeded)).unwrap();
        store.archive(finished(JobKind::Export, JobState::Failed)).unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let removed = store.purge(&[JobState::Succeeded], cutoff).unwrap();
        assert_eq!(removed, 1);

        let removed = store
            .purge(&[JobState::Failed], Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(removed, 0);

        let stats = store.stats().unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total(), 1);
    }
}
