//! Per-job control block shared between the engine and the job's worker.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use photohub_core::JobId;

use crate::types::{JobKind, JobState};

const NO_ETA: u64 = u64::MAX;

/// What the worker should do at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Checkpoint {
    Proceed { was_paused: bool },
    Cancel,
}

/// Lock-free progress plus the cancel/pause signals.
///
/// Progress and ETA are mirrored here so readers never take the registry
/// lock while a worker is busy. Signals are flipped while holding `gate` so a
/// worker waiting in [`JobControl::checkpoint`] cannot miss a wake-up.
#[derive(Debug)]
pub(crate) struct JobControl {
    job_id: JobId,
    kind: JobKind,
    units_total: usize,
    cancel: AtomicBool,
    pause: AtomicBool,
    state: AtomicU8,
    progress: AtomicU64,
    eta_millis: AtomicU64,
    units_done: AtomicUsize,
    gate: Mutex<()>,
    wake: Condvar,
}

impl JobControl {
    pub(crate) fn new(job_id: JobId, kind: JobKind, units_total: usize) -> Self {
        Self {
            job_id,
            kind,
            units_total,
            cancel: AtomicBool::new(false),
            pause: AtomicBool::new(false),
            state: AtomicU8::new(JobState::Queued.to_u8()),
            progress: AtomicU64::new(0f64.to_bits()),
            eta_millis: AtomicU64::new(NO_ETA),
            units_done: AtomicUsize::new(0),
            gate: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    pub(crate) fn request_cancel(&self) {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.cancel.store(true, Ordering::SeqCst);
        self.wake.notify_all();
    }

    pub(crate) fn request_pause(&self) {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.pause.store(true, Ordering::SeqCst);
        self.wake.notify_all();
    }

    pub(crate) fn request_resume(&self) {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.pause.store(false, Ordering::SeqCst);
        self.wake.notify_all();
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Block while paused. Cancellation wins over pause.
    pub(crate) fn checkpoint(&self) -> Checkpoint {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let mut was_paused = false;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Checkpoint::Cancel;
            }
            if !self.pause.load(Ordering::SeqCst) {
                return Checkpoint::Proceed { was_paused };
            }
            was_paused = true;
            gate = self.wake.wait(gate).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn set_state(&self, state: JobState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    pub(crate) fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn publish_progress(&self, units_done: usize, progress: f64, eta: Option<Duration>) {
        self.units_done.store(units_done, Ordering::SeqCst);
        self.progress.fetch_max_f64(progress);
        let eta = eta.map_or(NO_ETA, |d| d.as_millis().min(u128::from(NO_ETA - 1)) as u64);
        self.eta_millis.store(eta, Ordering::SeqCst);
    }

    pub(crate) fn progress(&self) -> f64 {
        f64::from_bits(self.progress.load(Ordering::SeqCst))
    }

    pub(crate) fn eta(&self) -> Option<Duration> {
        match self.eta_millis.load(Ordering::SeqCst) {
            NO_ETA => None,
            millis => Some(Duration::from_millis(millis)),
        }
    }

    pub(crate) fn units_done(&self) -> usize {
        self.units_done.load(Ordering::SeqCst)
    }
}

trait FetchMaxF64 {
    fn fetch_max_f64(&self, value: f64);
}

impl FetchMaxF64 for AtomicU64 {
    /// Progress is non-negative, so the bit patterns order like the values.
    fn fetch_max_f64(&self, value: f64) {
        self.fetch_max(value.clamp(0.0, 1.0).to_bits(), Ordering::SeqCst);
    }
}

/// Read-only, lock-free view of a job's progress.
///
/// Cheap to clone and safe to poll from a UI thread at any rate.
#[derive(Debug, Clone)]
pub struct JobHandle {
    control: Arc<JobControl>,
}

impl JobHandle {
    pub(crate) fn new(control: Arc<JobControl>) -> Self {
        Self { control }
    }

    pub fn id(&self) -> JobId {
        self.control.job_id
    }

    pub fn kind(&self) -> JobKind {
        self.control.kind
    }

    pub fn state(&self) -> JobState {
        self.control.state()
    }

    /// Fraction of units processed, in [0, 1]. Never decreases.
    pub fn progress(&self) -> f64 {
        self.control.progress()
    }

    /// Estimated remaining time (export jobs, after the first unit).
    pub fn eta(&self) -> Option<Duration> {
        self.control.eta()
    }

    pub fn units_done(&self) -> usize {
        self.control.units_done()
    }

    pub fn units_total(&self) -> usize {
        self.control.units_total
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.control.is_cancel_requested()
    }
}
