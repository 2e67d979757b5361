//! Project persistence.
//!
//! The store is the source of truth for project status: the guard re-reads
//! it on every transition and nothing caches status elsewhere.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use photohub_core::{AggregateRoot, ExpectedVersion, ProjectId};

use crate::project::Project;
use crate::status::ProjectStatus;

/// Project store abstraction.
pub trait ProjectStore: Send + Sync {
    /// Load a project by id.
    fn load(&self, id: ProjectId) -> Result<Option<Project>, ProjectStoreError>;

    /// Persist `project`.
    ///
    /// `expected` is checked against the currently stored version (an absent
    /// project counts as version 0).
    fn save(&self, project: &Project, expected: ExpectedVersion) -> Result<(), ProjectStoreError>;

    /// All known projects, ordered by id (creation time).
    fn list(&self) -> Result<Vec<Project>, ProjectStoreError>;
}

/// Project store error.
#[derive(Debug, Error)]
pub enum ProjectStoreError {
    #[error("version conflict: {0}")]
    Conflict(String),
    #[error("project store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("project store data error: {0}")]
    Serde(#[from] serde_json::Error),
}

fn check_version(
    stored: Option<u64>,
    expected: ExpectedVersion,
) -> Result<(), ProjectStoreError> {
    expected
        .check(stored.unwrap_or(0))
        .map_err(|e| ProjectStoreError::Conflict(e.to_string()))
}

/// In-memory project store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProjectStore {
    projects: RwLock<HashMap<ProjectId, Project>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectStore for InMemoryProjectStore {
    fn load(&self, id: ProjectId) -> Result<Option<Project>, ProjectStoreError> {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(projects.get(&id).cloned())
    }

    fn save(&self, project: &Project, expected: ExpectedVersion) -> Result<(), ProjectStoreError> {
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        check_version(projects.get(project.id()).map(|p| p.version()), expected)?;
        projects.insert(*project.id(), project.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Project>, ProjectStoreError> {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = projects.values().cloned().collect();
        all.sort_by_key(|p| *p.id());
        Ok(all)
    }
}

/// On-disk shape of a project.
///
/// `status` is kept as a raw string so values written by older versions
/// (or edited by hand) load instead of failing; unknown values read as
/// `New`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProjectRecord {
    id: ProjectId,
    name: String,
    #[serde(default)]
    status: Option<String>,
    version: u64,
    updated_at: DateTime<Utc>,
}

impl ProjectRecord {
    fn from_project(project: &Project) -> Self {
        Self {
            id: *project.id(),
            name: project.name().to_string(),
            status: project.stored_status().map(|s| s.as_str().to_string()),
            version: project.version(),
            updated_at: Utc::now(),
        }
    }

    fn to_project(&self) -> Project {
        Project::restore(
            self.id,
            self.name.clone(),
            ProjectStatus::from_stored(self.status.as_deref()),
            self.version,
        )
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProjectFile {
    projects: Vec<ProjectRecord>,
}

/// Project store persisted as a single JSON document.
///
/// The file is read once at open time; every save rewrites it through a
/// temporary file followed by a rename, so a crash never leaves a truncated
/// document behind.
#[derive(Debug)]
pub struct JsonFileProjectStore {
    path: PathBuf,
    records: RwLock<HashMap<ProjectId, ProjectRecord>>,
}

impl JsonFileProjectStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ProjectStoreError> {
        let path = path.into();
        let records = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let file: ProjectFile = if raw.trim().is_empty() {
                ProjectFile::default()
            } else {
                serde_json::from_str(&raw)?
            };
            file.projects.into_iter().map(|r| (r.id, r)).collect()
        } else {
            HashMap::new()
        };

        tracing::debug!(path = %path.display(), projects = records.len(), "project store opened");

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self, records: &HashMap<ProjectId, ProjectRecord>) -> Result<(), ProjectStoreError> {
        let mut projects: Vec<_> = records.values().cloned().collect();
        projects.sort_by_key(|r| r.id);
        let body = serde_json::to_vec_pretty(&ProjectFile { projects })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ProjectStore for JsonFileProjectStore {
    fn load(&self, id: ProjectId) -> Result<Option<Project>, ProjectStoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(&id).map(ProjectRecord::to_project))
    }

    fn save(&self, project: &Project, expected: ExpectedVersion) -> Result<(), ProjectStoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        check_version(records.get(project.id()).map(|r| r.version), expected)?;

        let previous = records.insert(*project.id(), ProjectRecord::from_project(project));
        if let Err(err) = self.write_all(&records) {
            // Keep memory consistent with disk.
            match previous {
                Some(prev) => records.insert(prev.id, prev),
                None => records.remove(project.id()),
            };
            return Err(err);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<Project>, ProjectStoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = records.values().map(ProjectRecord::to_project).collect();
        all.sort_by_key(|p| *p.id());
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(status: Option<ProjectStatus>, version: u64) -> Project {
        Project::restore(ProjectId::new(), "Portraits", status, version)
    }

    #[test]
    fn in_memory_save_checks_expected_version() {
        let store = InMemoryProjectStore::new();
        let project = sample(Some(ProjectStatus::New), 1);

        store.save(&project, ExpectedVersion::Exact(0)).unwrap();
        let err = store.save(&project, ExpectedVersion::Exact(0)).unwrap_err();
        assert!(matches!(err, ProjectStoreError::Conflict(_)));

        store.save(&project, ExpectedVersion::Exact(1)).unwrap();
        assert_eq!(store.load(*project.id()).unwrap(), Some(project));
    }

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("projects.json");
        let project = sample(Some(ProjectStatus::Culling), 3);

        {
            let store = JsonFileProjectStore::open(&path).unwrap();
            store.save(&project, ExpectedVersion::Any).unwrap();
        }

        let reopened = JsonFileProjectStore::open(&path).unwrap();
        let loaded = reopened.load(*project.id()).unwrap().unwrap();
        assert_eq!(loaded.status(), ProjectStatus::Culling);
        assert_eq!(loaded.version(), 3);
        assert_eq!(reopened.list().unwrap().len(), 1);
    }

    #[test]
    fn json_store_reads_unknown_status_as_new() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        let id = ProjectId::new();
        let raw = serde_json::json!({
            "projects": [{
                "id": id,
                "name": "legacy",
                "status": "pret_a_livrer",
                "version": 9,
                "updated_at": Utc::now(),
            }]
        });
        fs::write(&path, raw.to_string()).unwrap();

        let store = JsonFileProjectStore::open(&path).unwrap();
        let project = store.load(id).unwrap().unwrap();
        assert_eq!(project.stored_status(), None);
        assert_eq!(project.status(), ProjectStatus::New);
    }

    #[test]
    fn json_store_opens_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        fs::write(&path, "").unwrap();

        let store = JsonFileProjectStore::open(&path).unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
