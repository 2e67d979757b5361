//! Core job types and policies.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use photohub_core::{JobId, ProjectId};
use photohub_workflow::ProjectStatus;

use crate::error::JobError;

/// Kind of background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Import,
    Export,
    CullBatch,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Import, JobKind::Export, JobKind::CullBatch];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Import => "import",
            JobKind::Export => "export",
            JobKind::CullBatch => "cull-batch",
        }
    }

    /// Only exports can be paused and resumed.
    pub fn supports_pause(self) -> bool {
        matches!(self, JobKind::Export)
    }

    /// Only exports report an ETA.
    pub fn reports_eta(self) -> bool {
        matches!(self, JobKind::Export)
    }

    /// Project status entered when a job of this kind is submitted.
    pub fn start_status(self) -> Option<ProjectStatus> {
        match self {
            JobKind::Import => Some(ProjectStatus::Importing),
            JobKind::Export => Some(ProjectStatus::Exporting),
            JobKind::CullBatch => None,
        }
    }

    /// Project status entered when a job of this kind succeeds.
    ///
    /// Cull batches never move the project: rating or rejecting photos is not
    /// by itself a workflow step.
    pub fn completion_status(self) -> Option<ProjectStatus> {
        match self {
            JobKind::Import => Some(ProjectStatus::Culling),
            JobKind::Export => Some(ProjectStatus::Delivered),
            JobKind::CullBatch => None,
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker slot (or for its retry backoff to elapse)
    Queued,
    /// Executing units
    Running,
    /// Held at a checkpoint (export only)
    Paused,
    /// All units processed, failures within tolerance
    Succeeded,
    /// Unit failures exceeded tolerance, or the job could not start
    Failed,
    /// Cancelled by request
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Queued,
        JobState::Running,
        JobState::Paused,
        JobState::Succeeded,
        JobState::Failed,
        JobState::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }

    /// Holding a worker slot.
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Running | JobState::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Paused => "paused",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Running => 1,
            JobState::Paused => 2,
            JobState::Succeeded => 3,
            JobState::Failed => 4,
            JobState::Cancelled => 5,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => JobState::Running,
            2 => JobState::Paused,
            3 => JobState::Succeeded,
            4 => JobState::Failed,
            5 => JobState::Cancelled,
            _ => JobState::Queued,
        }
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed parameters, one variant per job kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobParams {
    /// Copy media files from a card or folder into the project.
    Import {
        source_dir: PathBuf,
        dest_dir: PathBuf,
        files: Vec<PathBuf>,
    },
    /// Render/copy selected assets to a delivery folder.
    Export {
        destination: PathBuf,
        assets: Vec<PathBuf>,
    },
    /// Apply a rating and/or reject flag to many assets.
    CullBatch {
        assets: Vec<String>,
        #[serde(default)]
        rating: Option<u8>,
        #[serde(default)]
        rejected: Option<bool>,
    },
}

pub const MAX_RATING: u8 = 5;

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::Import { .. } => JobKind::Import,
            JobParams::Export { .. } => JobKind::Export,
            JobParams::CullBatch { .. } => JobKind::CullBatch,
        }
    }

    /// Check the parameters are usable for a job of `kind`.
    pub fn validate(&self, kind: JobKind) -> Result<(), JobError> {
        let invalid = |reason: String| JobError::InvalidParams { kind, reason };

        if self.kind() != kind {
            return Err(invalid(format!(
                "parameters are for a {} job",
                self.kind()
            )));
        }

        match self {
            JobParams::Import {
                source_dir,
                dest_dir,
                files,
            } => {
                if source_dir.as_os_str().is_empty() {
                    return Err(invalid("source_dir is empty".into()));
                }
                if dest_dir.as_os_str().is_empty() {
                    return Err(invalid("dest_dir is empty".into()));
                }
                if files.iter().any(|f| f.as_os_str().is_empty()) {
                    return Err(invalid("file list contains an empty path".into()));
                }
            }
            JobParams::Export {
                destination,
                assets,
            } => {
                if destination.as_os_str().is_empty() {
                    return Err(invalid("destination is empty".into()));
                }
                if assets.iter().any(|a| a.as_os_str().is_empty()) {
                    return Err(invalid("asset list contains an empty path".into()));
                }
            }
            JobParams::CullBatch {
                assets,
                rating,
                rejected,
            } => {
                if assets.iter().any(|a| a.trim().is_empty()) {
                    return Err(invalid("asset list contains an empty id".into()));
                }
                if rating.is_none() && rejected.is_none() {
                    return Err(invalid("nothing to apply: set a rating or a reject flag".into()));
                }
                if let Some(r) = rating {
                    if *r > MAX_RATING {
                        return Err(invalid(format!("rating {r} is above {MAX_RATING}")));
                    }
                }
            }
        }

        let units = self.units();
        if units.is_empty() {
            return Err(invalid("no units to process".into()));
        }
        let mut seen = HashSet::with_capacity(units.len());
        if let Some(dup) = units.iter().find(|u| !seen.insert(u.key.as_str())) {
            return Err(invalid(format!("unit '{}' is listed twice", dup.key)));
        }

        Ok(())
    }

    /// Atomic units of work, in processing order.
    pub fn units(&self) -> Vec<WorkUnit> {
        let keys: Vec<String> = match self {
            JobParams::Import { files, .. } => {
                files.iter().map(|p| p.display().to_string()).collect()
            }
            JobParams::Export { assets, .. } => {
                assets.iter().map(|p| p.display().to_string()).collect()
            }
            JobParams::CullBatch { assets, .. } => {
                assets.iter().map(|a| a.trim().to_string()).collect()
            }
        };

        keys.into_iter()
            .enumerate()
            .map(|(index, key)| WorkUnit { index, key })
            .collect()
    }
}

/// One atomic unit of a job (a file, an asset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub index: usize,
    pub key: String,
}

/// A recorded, non-fatal unit failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub index: usize,
    pub key: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(retry-1)
    #[default]
    Exponential,
    /// Linear backoff: base * retry
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries of one original job (0 = no retries)
    pub max_retries: u32,
    /// Base delay before a retried job may start
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay before retry number `retry` (1-indexed) may start.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((retry - 1).min(30) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * (retry as f64)).min(max_ms),
        };

        // Deterministic jitter derived from the retry number.
        let jitter_range = delay_ms * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((retry as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Whether a job that has already been retried `retry_count` times may be
    /// retried again.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// One line of a job's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// A background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    pub kind: JobKind,
    pub params: JobParams,
    /// Project the job works on, if any
    pub project_id: Option<ProjectId>,
    pub state: JobState,
    /// Fraction of units processed, in [0, 1]
    pub progress: f64,
    /// Estimated remaining time (export jobs only)
    pub eta: Option<Duration>,
    pub units_total: usize,
    pub units_done: usize,
    /// Failed units that were skipped
    pub skipped: Vec<UnitFailure>,
    /// How many retries separate this job from the original submission
    pub retry_count: u32,
    /// The failed job this one retries
    pub retry_of: Option<JobId>,
    /// The job created by retrying this one
    pub retried_by: Option<JobId>,
    /// Set only when `state == Failed`
    pub error: Option<String>,
    /// Earliest time the job may start (retry backoff)
    pub not_before: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub log: Vec<JobLogEntry>,
}

impl Job {
    /// Create a queued job. Parameters must already be validated.
    pub fn new(kind: JobKind, params: JobParams, project_id: Option<ProjectId>) -> Self {
        let now = Utc::now();
        let units_total = params.units().len();
        let mut job = Self {
            id: JobId::new(),
            kind,
            params,
            project_id,
            state: JobState::Queued,
            progress: 0.0,
            eta: None,
            units_total,
            units_done: 0,
            skipped: Vec::new(),
            retry_count: 0,
            retry_of: None,
            retried_by: None,
            error: None,
            not_before: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            log: Vec::new(),
        };
        job.push_log(LogLevel::Info, format!("{kind} job queued ({units_total} units)"));
        job
    }

    /// New queued job retrying `failed`, sharing its parameters.
    pub fn retry_of(failed: &Job, not_before: Option<DateTime<Utc>>) -> Self {
        let mut job = Job::new(failed.kind, failed.params.clone(), failed.project_id);
        job.retry_count = failed.retry_count + 1;
        job.retry_of = Some(failed.id);
        job.not_before = not_before;
        job.push_log(
            LogLevel::Info,
            format!("retry {} of job {}", job.retry_count, failed.id),
        );
        job
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the retry backoff has elapsed.
    pub fn is_ready(&self) -> bool {
        match self.not_before {
            Some(at) => Utc::now() >= at,
            None => true,
        }
    }

    pub fn failed_units(&self) -> usize {
        self.skipped.len()
    }

    pub(crate) fn push_log(&mut self, level: LogLevel, message: impl Into<String>) {
        let now = Utc::now();
        self.updated_at = now;
        self.log.push(JobLogEntry {
            at: now,
            level,
            message: message.into(),
        });
    }

    pub(crate) fn mark_running(&mut self) {
        let now = Utc::now();
        self.state = JobState::Running;
        self.started_at = Some(now);
        self.push_log(LogLevel::Info, "job started");
    }

    pub(crate) fn mark_paused(&mut self) {
        self.state = JobState::Paused;
        self.push_log(LogLevel::Info, "pause requested");
    }

    pub(crate) fn mark_resumed(&mut self) {
        self.state = JobState::Running;
        self.push_log(LogLevel::Info, "resumed");
    }

    /// Count one processed unit. Progress never decreases.
    pub(crate) fn record_unit_done(&mut self, eta: Option<Duration>) {
        self.units_done = (self.units_done + 1).min(self.units_total);
        let progress = if self.units_total == 0 {
            1.0
        } else {
            self.units_done as f64 / self.units_total as f64
        };
        self.progress = self.progress.max(progress);
        self.eta = eta;
        self.updated_at = Utc::now();
    }

    pub(crate) fn record_unit_failure(&mut self, unit: &WorkUnit, error: impl Into<String>) {
        let error = error.into();
        self.push_log(
            LogLevel::Warning,
            format!("unit '{}' failed: {error}", unit.key),
        );
        self.skipped.push(UnitFailure {
            index: unit.index,
            key: unit.key.clone(),
            error,
            at: Utc::now(),
        });
    }

    pub(crate) fn mark_succeeded(&mut self) {
        let now = Utc::now();
        self.state = JobState::Succeeded;
        self.progress = 1.0;
        self.eta = self.kind.reports_eta().then_some(Duration::ZERO);
        self.finished_at = Some(now);
        let message = if self.skipped.is_empty() {
            "job succeeded".to_string()
        } else {
            format!("job succeeded with {} skipped units", self.skipped.len())
        };
        self.push_log(LogLevel::Info, message);
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.state = JobState::Failed;
        self.eta = None;
        self.finished_at = Some(Utc::now());
        self.push_log(LogLevel::Error, format!("job failed: {error}"));
        self.error = Some(error);
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.state = JobState::Cancelled;
        self.eta = None;
        self.finished_at = Some(Utc::now());
        self.push_log(LogLevel::Warning, "job cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export_params(n: usize) -> JobParams {
        JobParams::Export {
            destination: PathBuf::from("/tmp/out"),
            assets: (0..n).map(|i| PathBuf::from(format!("IMG_{i:04}.jpg"))).collect(),
        }
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(8), Duration::from_millis(10_000));
    }

    #[test]
    fn default_policy_matches_desktop_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(300));
    }

    #[test]
    fn fixed_and_linear_backoff() {
        let fixed = RetryPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(fixed.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(fixed.delay_for_attempt(3), Duration::from_millis(500));

        let linear = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            base_delay: Duration::from_millis(100),
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn jitter_stays_within_range() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(1000), Duration::from_secs(60));
        for retry in 1..=5 {
            let nominal = 1000.0 * 2_f64.powi(retry as i32 - 1);
            let actual = policy.delay_for_attempt(retry).as_millis() as f64;
            assert!((actual - nominal).abs() <= nominal * 0.1 + 1.0);
        }
    }

    #[test]
    fn allows_retry_respects_max() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..Default::default()
        };
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));
        assert!(!RetryPolicy::no_retry().allows_retry(0));
    }

    #[test]
    fn only_export_can_pause() {
        assert!(JobKind::Export.supports_pause());
        assert!(!JobKind::Import.supports_pause());
        assert!(!JobKind::CullBatch.supports_pause());
    }

    #[test]
    fn validate_rejects_kind_mismatch() {
        let err = export_params(2).validate(JobKind::Import).unwrap_err();
        assert!(matches!(err, JobError::InvalidParams { kind: JobKind::Import, .. }));
    }

    #[test]
    fn validate_rejects_empty_and_duplicate_units() {
        assert!(export_params(0).validate(JobKind::Export).is_err());

        let dup = JobParams::CullBatch {
            assets: vec!["a".into(), " a ".into()],
            rating: Some(3),
            rejected: None,
        };
        let err = dup.validate(JobKind::CullBatch).unwrap_err();
        assert!(err.to_string().contains("listed twice"), "{err}");
    }

    #[test]
    fn validate_rejects_out_of_range_ratings_and_noop_culls() {
        let high = JobParams::CullBatch {
            assets: vec!["a".into()],
            rating: Some(6),
            rejected: None,
        };
        assert!(high.validate(JobKind::CullBatch).is_err());

        let noop = JobParams::CullBatch {
            assets: vec!["a".into()],
            rating: None,
            rejected: None,
        };
        assert!(noop.validate(JobKind::CullBatch).is_err());

        let export = JobParams::Export {
            destination: PathBuf::from(""),
            assets: vec![PathBuf::from("a.jpg")],
        };
        assert!(export.validate(JobKind::Export).is_err());
    }

    #[test]
    fn units_follow_param_order() {
        let units = export_params(3).units();
        assert_eq!(units.len(), 3);
        assert_eq!(units[2].index, 2);
        assert_eq!(units[2].key, "IMG_0002.jpg");
    }

    #[test]
    fn job_lifecycle() {
        let mut job = Job::new(JobKind::Export, export_params(2), None);
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.units_total, 2);

        job.mark_running();
        assert_eq!(job.state, JobState::Running);
        assert!(job.started_at.is_some());

        job.record_unit_done(Some(Duration::from_secs(1)));
        assert_eq!(job.progress, 0.5);

        job.record_unit_failure(&job.params.units()[1], "disk full");
        job.record_unit_done(None);
        job.mark_succeeded();

        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.progress, 1.0);
        assert_eq!(job.failed_units(), 1);
        assert!(job.error.is_none());
        assert!(job.log.iter().any(|l| l.message.contains("1 skipped")));
    }

    #[test]
    fn retry_shares_params_and_links_jobs() {
        let mut failed = Job::new(JobKind::Export, export_params(1), None);
        failed.mark_failed("boom");

        let retry = Job::retry_of(&failed, None);
        assert_ne!(retry.id, failed.id);
        assert_eq!(retry.params, failed.params);
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.retry_of, Some(failed.id));
        assert_eq!(retry.state, JobState::Queued);
        assert!(retry.error.is_none());
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in JobState::ALL {
            assert_eq!(JobState::from_u8(state.to_u8()), state);
        }
    }

    #[test]
    fn params_serialize_with_kind_tag() {
        let json = serde_json::to_value(export_params(1)).unwrap();
        assert_eq!(json["kind"], "export");
        assert_eq!(json.as_object().unwrap().len(), 3, "{json}");
    }

    #[test]
    fn kind_serializes_as_it_displays() {
        for kind in JobKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }

        let cull = JobParams::CullBatch {
            assets: vec!["a".into()],
            rating: Some(2),
            rejected: None,
        };
        let json = serde_json::to_value(&cull).unwrap();
        assert_eq!(json["kind"], "cull-batch");
        let back: JobParams = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), JobKind::CullBatch);
    }
}
