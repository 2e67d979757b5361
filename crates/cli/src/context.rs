//! Wiring of the project store, workflow guard and job engine.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};

use photohub_jobs::{JobEngine, JobKind};
use photohub_workflow::{JsonFileProjectStore, WorkflowGuard};

use crate::fs_jobs::{ExportAssets, ImportFiles};
use crate::settings::Settings;

pub struct AppContext {
    pub guard: Arc<WorkflowGuard>,
    pub engine: JobEngine,
}

impl AppContext {
    /// Open the project store under the data directory and start an engine
    /// with the filesystem handlers.
    pub fn open(settings: &Settings) -> Result<Self> {
        fs::create_dir_all(&settings.data_dir).with_context(|| {
            format!("cannot create data directory {}", settings.data_dir.display())
        })?;

        let path = settings.projects_file();
        let store = JsonFileProjectStore::open(&path)
            .with_context(|| format!("cannot open project store {}", path.display()))?;
        let guard = Arc::new(WorkflowGuard::new(Arc::new(store)));

        let engine = JobEngine::builder(settings.engine.clone())
            .workflow(guard.clone())
            .handler(JobKind::Import, ImportFiles)
            .handler(JobKind::Export, ExportAssets)
            .build();

        Ok(Self { guard, engine })
    }
}
