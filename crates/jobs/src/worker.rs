//! Worker thread body: wait for a slot, then process units between checkpoints.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use photohub_core::{JobId, ProjectId};
use photohub_workflow::TransitionOrigin;

use crate::control::{Checkpoint, JobControl};
use crate::engine::EngineInner;
use crate::eta::EtaEstimator;
use crate::handler::UnitContext;
use crate::types::{JobKind, JobParams, JobState, LogLevel, WorkUnit};
use crate::update::JobUpdate;

/// What a worker needs once its job is admitted.
struct Admitted {
    kind: JobKind,
    project_id: Option<ProjectId>,
    params: JobParams,
    units: Vec<WorkUnit>,
    control: Arc<JobControl>,
}

pub(crate) fn run(inner: Arc<EngineInner>, job_id: JobId) {
    let Some(job) = admit(&inner, job_id) else {
        debug!(job_id = %job_id, "job left the queue without running");
        return;
    };

    let Some(handler) = inner.handlers.get(job.kind) else {
        let kind = job.kind;
        inner.finish(job_id, |j| {
            j.mark_failed(format!("no handler registered for {kind} jobs"))
        });
        return;
    };

    let tolerance = inner.config.unit_failure_tolerance;
    let total = job.units.len();
    let mut eta = EtaEstimator::new(inner.config.eta_window, inner.config.eta_smoothing);
    let mut failures = 0usize;

    for unit in &job.units {
        match job.control.checkpoint() {
            Checkpoint::Cancel => {
                inner.finish(job_id, |j| j.mark_cancelled());
                return;
            }
            Checkpoint::Proceed { was_paused } => {
                if was_paused {
                    debug!(job_id = %job_id, unit = unit.index, "continuing after pause");
                }
            }
        }

        let ctx = UnitContext {
            job_id,
            kind: job.kind,
            project_id: job.project_id,
            params: &job.params,
            unit,
            control: &job.control,
        };

        let started = Instant::now();
        let outcome = match catch_unwind(AssertUnwindSafe(|| handler.process(&ctx))) {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => Some(format!("handler panicked: {}", panic_message(payload.as_ref()))),
        };
        eta.record(started.elapsed());

        let remaining = total - (unit.index + 1);
        let estimate = job
            .kind
            .reports_eta()
            .then(|| eta.estimate(remaining))
            .flatten();

        let fatal = {
            let mut reg = inner.lock();
            let Some(entry) = reg.jobs.get_mut(&job_id) else {
                return;
            };

            let mut fatal = None;
            if let Some(error) = &outcome {
                failures += 1;
                warn!(
                    job_id = %job_id,
                    unit = %unit.key,
                    failures,
                    tolerance,
                    error = %error,
                    "unit failed"
                );
                entry.job.record_unit_failure(unit, error.clone());
                if failures > tolerance {
                    fatal = Some(format!(
                        "unit '{}' failed: {error} ({failures} failures exceed tolerance of {tolerance})",
                        unit.key
                    ));
                }
            }

            entry.job.record_unit_done(estimate);
            entry
                .control
                .publish_progress(entry.job.units_done, entry.job.progress, entry.job.eta);
            if fatal.is_none() {
                inner.publish(JobUpdate::of(&entry.job));
                inner.changed.notify_all();
            }
            fatal
        };

        if let Some(error) = fatal {
            inner.finish(job_id, |j| j.mark_failed(error));
            return;
        }
    }

    // Cancel takes the registry lock too, so holding it from the last check
    // until the job is succeeded leaves no window for a cancel to be lost.
    let mut reg = inner.lock();
    if job.control.is_cancel_requested() {
        inner.finish_locked(&mut reg, job_id, |j| j.mark_cancelled());
        return;
    }

    let transition_warning = enter_completion_status(&inner, job_id, job.kind, job.project_id);
    inner.finish_locked(&mut reg, job_id, |j| {
        if let Some(warning) = transition_warning {
            j.push_log(LogLevel::Warning, warning);
        }
        j.mark_succeeded();
    });
}

/// Wait until the job may start and a slot is free, then mark it running.
///
/// Returns `None` if the job stopped being queued (cancelled, shut down)
/// before it was admitted.
fn admit(inner: &EngineInner, job_id: JobId) -> Option<Admitted> {
    let mut reg = inner.lock();
    loop {
        let entry = reg.jobs.get(&job_id)?;
        if entry.job.state != JobState::Queued {
            return None;
        }

        let backoff = entry
            .job
            .not_before
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .filter(|d| !d.is_zero());
        if let Some(backoff) = backoff {
            reg = inner
                .changed
                .wait_timeout(reg, backoff)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        let seq = entry.seq;
        let earlier_waiting = reg.jobs.values().any(|e| {
            e.seq < seq && e.job.state == JobState::Queued && e.job.is_ready()
        });
        if reg.running >= inner.config.max_concurrent || earlier_waiting {
            // Bounded wait: an earlier job's backoff may expire without anyone
            // signalling.
            reg = inner
                .changed
                .wait_timeout(reg, Duration::from_millis(250))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        reg.running += 1;
        let entry = reg.jobs.get_mut(&job_id)?;
        entry.job.mark_running();
        entry.control.set_state(JobState::Running);
        info!(
            job_id = %job_id,
            kind = %entry.job.kind,
            units = entry.job.units_total,
            retry_count = entry.job.retry_count,
            "job started"
        );
        inner.publish(JobUpdate::of(&entry.job));
        let admitted = Admitted {
            kind: entry.job.kind,
            project_id: entry.job.project_id,
            params: entry.job.params.clone(),
            units: entry.job.params.units(),
            control: entry.control.clone(),
        };
        inner.changed.notify_all();
        return Some(admitted);
    }
}

/// Move the project on after a successful job. A rejection does not fail the
/// job; it comes back as a warning for the job log.
///
/// Called with the registry lock held; the guard only takes project locks.
fn enter_completion_status(
    inner: &EngineInner,
    job_id: JobId,
    kind: JobKind,
    project_id: Option<ProjectId>,
) -> Option<String> {
    let project_id = project_id?;
    let status = kind.completion_status()?;
    let guard = inner.guard.as_ref()?;

    match guard.ensure_status(project_id, status, TransitionOrigin::Job { job_id }) {
        Ok(_) => None,
        Err(err) => {
            warn!(
                job_id = %job_id,
                project_id = %project_id,
                to = %status,
                error = %err,
                "project status not updated after job"
            );
            Some(format!("project status not moved to {status}: {err}"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
