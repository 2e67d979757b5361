//! Unit handlers: the code that actually copies, renders or rates one unit.

use std::collections::HashMap;
use std::sync::Arc;

use photohub_core::{JobId, ProjectId};

use crate::control::JobControl;
use crate::error::UnitError;
use crate::types::{JobKind, JobParams, WorkUnit};

/// Everything a handler needs to process one unit.
pub struct UnitContext<'a> {
    pub job_id: JobId,
    pub kind: JobKind,
    pub project_id: Option<ProjectId>,
    pub params: &'a JobParams,
    pub unit: &'a WorkUnit,
    pub(crate) control: &'a JobControl,
}

impl UnitContext<'_> {
    /// Long-running units may poll this and stop early. The engine only acts
    /// on cancellation between units either way.
    pub fn is_cancel_requested(&self) -> bool {
        self.control.is_cancel_requested()
    }
}

impl core::fmt::Debug for UnitContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnitContext")
            .field("job_id", &self.job_id)
            .field("kind", &self.kind)
            .field("unit", &self.unit)
            .finish_non_exhaustive()
    }
}

/// Processes one unit of a job.
///
/// Returning an error counts against the job's unit-failure tolerance; a
/// panic is treated the same way.
pub trait UnitHandler: Send + Sync {
    fn process(&self, ctx: &UnitContext<'_>) -> Result<(), UnitError>;
}

impl<F> UnitHandler for F
where
    F: Fn(&UnitContext<'_>) -> Result<(), UnitError> + Send + Sync,
{
    fn process(&self, ctx: &UnitContext<'_>) -> Result<(), UnitError> {
        self(ctx)
    }
}

/// One handler per job kind.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn UnitHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `kind`.
    pub fn register<H>(&mut self, kind: JobKind, handler: H)
    where
        H: UnitHandler + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn UnitHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        JobKind::ALL
            .into_iter()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_handlers() {
        let mut registry = HandlerRegistry::new();
        registry.register(JobKind::CullBatch, |ctx: &UnitContext<'_>| {
            if ctx.unit.key == "bad" {
                Err(UnitError::new("cannot rate"))
            } else {
                Ok(())
            }
        });

        assert_eq!(registry.kinds(), vec![JobKind::CullBatch]);
        assert!(registry.get(JobKind::Export).is_none());

        let params = JobParams::CullBatch {
            assets: vec!["good".into(), "bad".into()],
            rating: Some(2),
            rejected: None,
        };
        let units = params.units();
        let control = JobControl::new(JobId::new(), JobKind::CullBatch, units.len());
        let handler = registry.get(JobKind::CullBatch).unwrap();

        let results: Vec<_> = units
            .iter()
            .map(|unit| {
                handler.process(&UnitContext {
                    job_id: JobId::new(),
                    kind: JobKind::CullBatch,
                    project_id: None,
                    params: &params,
                    unit,
                    control: &control,
                })
            })
            .collect();

        assert!(results[0].is_ok());
        assert_eq!(results[1], Err(UnitError::new("cannot rate")));
    }
}
