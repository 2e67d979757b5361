//! Job engine: registry, control operations and worker lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use photohub_core::{JobId, ProjectId};
use photohub_events::{EventBus, InMemoryEventBus, Subscription};
use photohub_workflow::{TransitionOrigin, WorkflowGuard};

use crate::config::JobEngineConfig;
use crate::control::{JobControl, JobHandle};
use crate::error::JobError;
use crate::handler::{HandlerRegistry, UnitHandler};
use crate::store::{InMemoryJobStore, JobStats, JobStore};
use crate::types::{Job, JobKind, JobLogEntry, JobParams, JobState, LogLevel};
use crate::update::JobUpdate;
use crate::worker;

pub(crate) struct Entry {
    pub(crate) job: Job,
    pub(crate) control: Arc<JobControl>,
    /// Submission order, used to admit queued jobs first-come first-served.
    pub(crate) seq: u64,
    worker: Option<thread::JoinHandle<()>>,
}

#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) jobs: HashMap<JobId, Entry>,
    /// Jobs currently holding a worker slot (running or paused).
    pub(crate) running: usize,
    next_seq: u64,
    shutting_down: bool,
}

pub(crate) struct EngineInner {
    pub(crate) config: JobEngineConfig,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) guard: Option<Arc<WorkflowGuard>>,
    store: Arc<dyn JobStore>,
    registry: Mutex<Registry>,
    /// Signalled on every job state change, unit completion and slot release.
    pub(crate) changed: Condvar,
    updates: InMemoryEventBus<JobUpdate>,
}

impl EngineInner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish(&self, update: JobUpdate) {
        if let Err(err) = self.updates.publish(update) {
            warn!(error = ?err, "failed to publish job update");
        }
    }

    /// Apply a terminal transition to an admitted job and release its slot.
    pub(crate) fn finish<F>(&self, job_id: JobId, apply: F)
    where
        F: FnOnce(&mut Job),
    {
        let mut reg = self.lock();
        self.finish_locked(&mut reg, job_id, apply);
    }

    /// [`EngineInner::finish`] for a caller already holding the registry lock.
    pub(crate) fn finish_locked<F>(&self, reg: &mut Registry, job_id: JobId, apply: F)
    where
        F: FnOnce(&mut Job),
    {
        reg.running = reg.running.saturating_sub(1);
        if let Some(entry) = reg.jobs.get_mut(&job_id) {
            apply(&mut entry.job);
            entry.control.set_state(entry.job.state);
            entry
                .control
                .publish_progress(entry.job.units_done, entry.job.progress, entry.job.eta);

            match entry.job.state {
                JobState::Succeeded => info!(
                    job_id = %job_id,
                    kind = %entry.job.kind,
                    skipped = entry.job.skipped.len(),
                    "job succeeded"
                ),
                JobState::Failed => warn!(
                    job_id = %job_id,
                    kind = %entry.job.kind,
                    error = entry.job.error.as_deref().unwrap_or_default(),
                    "job failed"
                ),
                state => info!(job_id = %job_id, kind = %entry.job.kind, state = %state, "job finished"),
            }
            self.publish(JobUpdate::of(&entry.job));
        }
        self.changed.notify_all();
    }
}

/// Builder for [`JobEngine`].
pub struct JobEngineBuilder {
    config: JobEngineConfig,
    handlers: HandlerRegistry,
    guard: Option<Arc<WorkflowGuard>>,
    store: Option<Arc<dyn JobStore>>,
}

impl JobEngineBuilder {
    /// Register the unit handler for a job kind.
    pub fn handler<H>(mut self, kind: JobKind, handler: H) -> Self
    where
        H: UnitHandler + 'static,
    {
        self.handlers.register(kind, handler);
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Route job-driven project status changes through `guard`.
    pub fn workflow(mut self, guard: Arc<WorkflowGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Archive for cleaned-up jobs. Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> JobEngine {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryJobStore::new()) as Arc<dyn JobStore>);
        info!(
            name = %self.config.name,
            max_concurrent = self.config.max_concurrent,
            max_retries = self.config.retry.max_retries,
            unit_failure_tolerance = self.config.unit_failure_tolerance,
            kinds = ?self.handlers.kinds(),
            "job engine started"
        );
        JobEngine {
            inner: Arc::new(EngineInner {
                config: self.config,
                handlers: self.handlers,
                guard: self.guard,
                store,
                registry: Mutex::new(Registry::default()),
                changed: Condvar::new(),
                updates: InMemoryEventBus::new(),
            }),
        }
    }
}

/// Runs import, export and cull-batch jobs on worker threads.
///
/// - One worker thread per job; at most `max_concurrent` jobs run or sit
///   paused at once, the rest wait queued in submission order.
/// - Every state change goes through a single registry lock, so concurrent
///   control calls on one job (cancel racing retry, say) are serialised.
/// - Progress reads go through [`JobHandle`] and never block on a worker.
///
/// The engine has an explicit lifecycle: call [`JobEngine::shutdown`] to
/// cancel outstanding work and join the workers.
#[derive(Clone)]
pub struct JobEngine {
    inner: Arc<EngineInner>,
}

impl core::fmt::Debug for JobEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobEngine")
            .field("name", &self.inner.config.name)
            .finish_non_exhaustive()
    }
}

impl JobEngine {
    pub fn builder(config: JobEngineConfig) -> JobEngineBuilder {
        JobEngineBuilder {
            config,
            handlers: HandlerRegistry::new(),
            guard: None,
            store: None,
        }
    }

    pub fn config(&self) -> &JobEngineConfig {
        &self.inner.config
    }

    /// Queue a job that is not tied to a project.
    pub fn submit(&self, kind: JobKind, params: JobParams) -> Result<JobId, JobError> {
        self.submit_job(kind, params, None)
    }

    /// Queue a job for a project.
    ///
    /// Import and export jobs first move the project into their working
    /// status; if the workflow rejects that move the job is not created.
    pub fn submit_for_project(
        &self,
        project_id: ProjectId,
        kind: JobKind,
        params: JobParams,
    ) -> Result<JobId, JobError> {
        self.submit_job(kind, params, Some(project_id))
    }

    fn submit_job(
        &self,
        kind: JobKind,
        params: JobParams,
        project_id: Option<ProjectId>,
    ) -> Result<JobId, JobError> {
        params.validate(kind)?;

        // Held across the start transition so a concurrent shutdown cannot
        // leave the project in a working status with no job behind it.
        let mut reg = self.inner.lock();
        if reg.shutting_down {
            return Err(JobError::ShuttingDown);
        }

        let job = Job::new(kind, params, project_id);
        self.enter_start_status(&job)?;
        let job_id = self.spawn(&mut reg, job)?;
        info!(job_id = %job_id, kind = %kind, project_id = ?project_id, "job submitted");
        Ok(job_id)
    }

    /// Request cancellation.
    ///
    /// Queued jobs are cancelled on the spot and never run. Running and paused
    /// jobs stop at their next checkpoint, keeping the units already done.
    /// Finished jobs are left alone.
    pub fn cancel(&self, job_id: JobId) -> Result<(), JobError> {
        let mut reg = self.inner.lock();
        let Some(entry) = reg.jobs.get_mut(&job_id) else {
            return self.archived(job_id).map(|_| ());
        };

        match entry.job.state {
            JobState::Queued => {
                entry.job.mark_cancelled();
                entry.control.set_state(JobState::Cancelled);
                entry.control.request_cancel();
                info!(job_id = %job_id, kind = %entry.job.kind, "queued job cancelled");
                self.inner.publish(JobUpdate::of(&entry.job));
                self.inner.changed.notify_all();
            }
            JobState::Running | JobState::Paused => {
                entry.job.push_log(LogLevel::Info, "cancel requested");
                entry.control.request_cancel();
                debug!(job_id = %job_id, "cancel requested");
            }
            JobState::Succeeded | JobState::Failed | JobState::Cancelled => {}
        }
        Ok(())
    }

    /// Hold an export job at its next checkpoint.
    pub fn pause(&self, job_id: JobId) -> Result<(), JobError> {
        let mut reg = self.inner.lock();
        let entry = self.live_entry(&mut reg, job_id, "pause")?;

        if !entry.job.kind.supports_pause() {
            return Err(JobError::invalid_state(
                job_id,
                "pause",
                entry.job.state,
                format!("only export jobs can be paused, this is a {} job", entry.job.kind),
            ));
        }
        if entry.job.state != JobState::Running {
            return Err(JobError::invalid_state(
                job_id,
                "pause",
                entry.job.state,
                "only running jobs can be paused",
            ));
        }

        entry.job.mark_paused();
        entry.control.set_state(JobState::Paused);
        entry.control.request_pause();
        info!(job_id = %job_id, units_done = entry.job.units_done, "job paused");
        self.inner.publish(JobUpdate::of(&entry.job));
        self.inner.changed.notify_all();
        Ok(())
    }

    pub fn resume(&self, job_id: JobId) -> Result<(), JobError> {
        let mut reg = self.inner.lock();
        let entry = self.live_entry(&mut reg, job_id, "resume")?;

        if !entry.job.kind.supports_pause() {
            return Err(JobError::invalid_state(
                job_id,
                "resume",
                entry.job.state,
                format!("only export jobs can be resumed, this is a {} job", entry.job.kind),
            ));
        }
        if entry.job.state != JobState::Paused {
            return Err(JobError::invalid_state(
                job_id,
                "resume",
                entry.job.state,
                "only paused jobs can be resumed",
            ));
        }

        entry.job.mark_resumed();
        entry.control.set_state(JobState::Running);
        entry.control.request_resume();
        info!(job_id = %job_id, "job resumed");
        self.inner.publish(JobUpdate::of(&entry.job));
        self.inner.changed.notify_all();
        Ok(())
    }

    /// Queue a new job with the parameters of a failed one.
    ///
    /// The new job starts after the retry policy's backoff delay. Each failed
    /// job can be retried once; retry the newest job in the chain to go again.
    pub fn retry(&self, job_id: JobId) -> Result<JobId, JobError> {
        let mut reg = self.inner.lock();
        if reg.shutting_down {
            return Err(JobError::ShuttingDown);
        }
        let entry = self.live_entry(&mut reg, job_id, "retry")?;
        let failed = &entry.job;

        if failed.state != JobState::Failed {
            return Err(JobError::invalid_state(
                job_id,
                "retry",
                failed.state,
                "only failed jobs can be retried",
            ));
        }
        if let Some(by) = failed.retried_by {
            return Err(JobError::invalid_state(
                job_id,
                "retry",
                failed.state,
                format!("already retried as job {by}"),
            ));
        }

        let policy = &self.inner.config.retry;
        if !policy.allows_retry(failed.retry_count) {
            warn!(
                job_id = %job_id,
                retry_count = failed.retry_count,
                max_retries = policy.max_retries,
                "retry limit reached"
            );
            return Err(JobError::RetryLimitExceeded {
                job_id,
                retry_count: failed.retry_count,
                max_retries: policy.max_retries,
            });
        }

        let delay = policy.delay_for_attempt(failed.retry_count + 1);
        let job = Job::retry_of(failed, retry_not_before(delay));

        // Registry lock is held here; the guard only ever takes project locks
        // after it, never before.
        self.enter_start_status(&job)?;

        let retry_id = job.id;
        let retry_count = job.retry_count;
        if let Some(entry) = reg.jobs.get_mut(&job_id) {
            entry.job.retried_by = Some(retry_id);
            entry
                .job
                .push_log(LogLevel::Info, format!("retried as job {retry_id}"));
        }
        self.spawn(&mut reg, job)?;

        info!(
            job_id = %retry_id,
            retry_of = %job_id,
            retry_count,
            delay_ms = delay.as_millis() as u64,
            "job retry queued"
        );
        Ok(retry_id)
    }

    /// `(progress, eta)` snapshot.
    ///
    /// The values come from the job's atomics; only the id lookup briefly
    /// takes the registry lock. Hold a [`JobHandle`] to poll without it.
    pub fn progress_of(&self, job_id: JobId) -> Result<(f64, Option<Duration>), JobError> {
        match self.handle(job_id) {
            Ok(handle) => Ok((handle.progress(), handle.eta())),
            Err(JobError::NotFound(_)) => {
                let job = self.archived(job_id)?;
                Ok((job.progress, job.eta))
            }
            Err(err) => Err(err),
        }
    }

    /// Cloneable read-only view of a live job. Reads through the handle are
    /// lock-free.
    pub fn handle(&self, job_id: JobId) -> Result<JobHandle, JobError> {
        let control = {
            let reg = self.inner.lock();
            reg.jobs
                .get(&job_id)
                .map(|e| e.control.clone())
                .ok_or(JobError::NotFound(job_id))?
        };
        Ok(JobHandle::new(control))
    }

    /// Live job, or archived job after cleanup.
    pub fn get(&self, job_id: JobId) -> Result<Job, JobError> {
        if let Some(entry) = self.inner.lock().jobs.get(&job_id) {
            return Ok(entry.job.clone());
        }
        self.archived(job_id)
    }

    /// Live jobs in submission order, optionally filtered by state.
    pub fn list(&self, state: Option<JobState>) -> Vec<Job> {
        let reg = self.inner.lock();
        let mut entries: Vec<_> = reg
            .jobs
            .values()
            .filter(|e| state.is_none_or(|s| e.job.state == s))
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    /// Archived jobs, oldest first, optionally filtered by kind. At most
    /// `limit` are returned.
    pub fn history(&self, kind: Option<JobKind>, limit: usize) -> Result<Vec<Job>, JobError> {
        Ok(self.inner.store.list(kind, limit)?)
    }

    pub fn log(&self, job_id: JobId) -> Result<Vec<JobLogEntry>, JobError> {
        Ok(self.get(job_id)?.log)
    }

    /// Counts per state across live and archived jobs.
    pub fn stats(&self) -> Result<JobStats, JobError> {
        let mut live = JobStats::default();
        for entry in self.inner.lock().jobs.values() {
            live.count(entry.job.state);
        }
        Ok(live + self.inner.store.stats()?)
    }

    /// Subscribe to job updates published from now on.
    pub fn subscribe(&self) -> Subscription<JobUpdate> {
        self.inner.updates.subscribe()
    }

    /// Block until the job is finished, or `timeout` elapses.
    pub fn wait(&self, job_id: JobId, timeout: Duration) -> Result<Job, JobError> {
        let deadline = Instant::now() + timeout;
        let mut reg = self.inner.lock();
        loop {
            let state = match reg.jobs.get(&job_id) {
                Some(entry) if entry.job.is_terminal() => return Ok(entry.job.clone()),
                Some(entry) => Some(entry.job.state),
                None => None,
            };
            let Some(state) = state else {
                drop(reg);
                return self.archived(job_id);
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(JobError::WaitTimedOut {
                    job_id,
                    state,
                    timeout,
                });
            }
            reg = self
                .inner
                .changed
                .wait_timeout(reg, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Move finished jobs from the live registry into the archive.
    ///
    /// Returns how many jobs were archived.
    pub fn cleanup(&self) -> Result<usize, JobError> {
        let finished: Vec<Entry> = {
            let mut reg = self.inner.lock();
            let ids: Vec<JobId> = reg
                .jobs
                .iter()
                .filter(|(_, e)| e.job.is_terminal())
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| reg.jobs.remove(id)).collect()
        };

        let mut archived = 0;
        let mut first_error = None;
        for mut entry in finished {
            if let Some(worker) = entry.worker.take() {
                if worker.join().is_err() {
                    warn!(job_id = %entry.job.id, "job worker panicked");
                }
            }
            let job_id = entry.job.id;
            match self.inner.store.archive(entry.job) {
                Ok(()) => archived += 1,
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "failed to archive job");
                    first_error.get_or_insert(err);
                }
            }
        }

        debug!(archived, "job cleanup");
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(archived),
        }
    }

    /// Drop archived jobs in `states` that finished before `older_than`.
    pub fn purge(&self, states: &[JobState], older_than: DateTime<Utc>) -> Result<usize, JobError> {
        let purged = self.inner.store.purge(states, older_than)?;
        info!(purged, states = ?states, "purged archived jobs");
        Ok(purged)
    }

    /// Cancel everything outstanding and join all worker threads.
    ///
    /// Workers stop at their next checkpoint, so this returns once every
    /// in-flight unit has completed. Further submissions fail with
    /// [`JobError::ShuttingDown`].
    pub fn shutdown(&self) {
        let workers: Vec<(JobId, thread::JoinHandle<()>)> = {
            let mut reg = self.inner.lock();
            reg.shutting_down = true;
            for entry in reg.jobs.values_mut() {
                match entry.job.state {
                    JobState::Queued => {
                        entry.job.mark_cancelled();
                        entry.control.set_state(JobState::Cancelled);
                        entry.control.request_cancel();
                        self.inner.publish(JobUpdate::of(&entry.job));
                    }
                    JobState::Running | JobState::Paused => entry.control.request_cancel(),
                    _ => {}
                }
            }
            self.inner.changed.notify_all();
            reg.jobs
                .iter_mut()
                .filter_map(|(id, e)| e.worker.take().map(|w| (*id, w)))
                .collect()
        };

        let count = workers.len();
        for (job_id, worker) in workers {
            if worker.join().is_err() {
                warn!(job_id = %job_id, "job worker panicked");
            }
        }
        info!(name = %self.inner.config.name, workers = count, "job engine stopped");
    }

    /// Move the project into the job's working status, or check it exists.
    fn enter_start_status(&self, job: &Job) -> Result<(), JobError> {
        let Some(project_id) = job.project_id else {
            return Ok(());
        };
        let Some(guard) = &self.inner.guard else {
            return Err(JobError::InvalidParams {
                kind: job.kind,
                reason: "engine has no workflow guard, project jobs are unavailable".into(),
            });
        };

        match job.kind.start_status() {
            Some(status) => {
                guard.ensure_status(project_id, status, TransitionOrigin::Job { job_id: job.id })?;
            }
            None => {
                guard.project(project_id)?;
            }
        }
        Ok(())
    }

    /// Register `job` and start its worker. Caller holds the registry lock.
    fn spawn(&self, reg: &mut Registry, job: Job) -> Result<JobId, JobError> {
        let job_id = job.id;
        let control = Arc::new(JobControl::new(job_id, job.kind, job.units_total));
        let update = JobUpdate::of(&job);
        let seq = reg.next_seq;
        reg.next_seq += 1;
        reg.jobs.insert(
            job_id,
            Entry {
                job,
                control,
                seq,
                worker: None,
            },
        );

        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.inner.config.name, seq))
            .spawn(move || worker::run(inner, job_id));

        match spawned {
            Ok(worker) => {
                if let Some(entry) = reg.jobs.get_mut(&job_id) {
                    entry.worker = Some(worker);
                }
                self.inner.publish(update);
                Ok(job_id)
            }
            Err(source) => {
                // A project start status entered for this job is not rolled
                // back: the previous status may not be reachable from it.
                reg.jobs.remove(&job_id);
                warn!(job_id = %job_id, error = %source, "failed to spawn job worker");
                Err(JobError::Spawn { job_id, source })
            }
        }
    }

    fn live_entry<'r>(
        &self,
        reg: &'r mut Registry,
        job_id: JobId,
        operation: &'static str,
    ) -> Result<&'r mut Entry, JobError> {
        if !reg.jobs.contains_key(&job_id) {
            let job = self.archived(job_id)?;
            return Err(JobError::invalid_state(
                job_id,
                operation,
                job.state,
                "job has been archived",
            ));
        }
        reg.jobs.get_mut(&job_id).ok_or(JobError::NotFound(job_id))
    }

    fn archived(&self, job_id: JobId) -> Result<Job, JobError> {
        self.inner
            .store
            .get(job_id)?
            .ok_or(JobError::NotFound(job_id))
    }
}

fn retry_not_before(delay: Duration) -> Option<DateTime<Utc>> {
    if delay.is_zero() {
        return None;
    }
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    Utc::now().checked_add_signed(delay)
}
