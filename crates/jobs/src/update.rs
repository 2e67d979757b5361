//! Progress notifications published by the engine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use photohub_core::{JobId, ProjectId};
use photohub_events::Event;

use crate::types::{Job, JobKind, JobState};

/// Snapshot of a job after a state change or a completed unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobUpdate {
    pub job_id: JobId,
    pub kind: JobKind,
    pub project_id: Option<ProjectId>,
    pub state: JobState,
    pub progress: f64,
    pub eta: Option<Duration>,
    pub units_done: usize,
    pub units_total: usize,
    pub failed_units: usize,
    pub at: DateTime<Utc>,
}

impl JobUpdate {
    pub fn of(job: &Job) -> Self {
        Self {
            job_id: job.id,
            kind: job.kind,
            project_id: job.project_id,
            state: job.state,
            progress: job.progress,
            eta: job.eta,
            units_done: job.units_done,
            units_total: job.units_total,
            failed_units: job.failed_units(),
            at: job.updated_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

impl Event for JobUpdate {
    fn event_type(&self) -> &'static str {
        "job.updated"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.at
    }
}
