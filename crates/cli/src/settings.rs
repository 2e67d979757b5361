//! Where the CLI keeps its data, and how the job engine is tuned.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use photohub_jobs::JobEngineConfig;

pub const ENV_DATA_DIR: &str = "PHOTOHUB_DATA_DIR";
const APP_DIR: &str = "PhotoHub";
const PROJECTS_FILE: &str = "projects.json";

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub engine: JobEngineConfig,
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env(data_dir: Option<PathBuf>) -> Result<Self> {
        Self::resolve(data_dir, |var| std::env::var(var).ok())
    }

    /// Data directory precedence: explicit flag, `PHOTOHUB_DATA_DIR`, then
    /// the platform data directory.
    pub fn resolve<F>(data_dir: Option<PathBuf>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => match lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
                Some(dir) => PathBuf::from(dir),
                None => dirs::data_dir()
                    .map(|d| d.join(APP_DIR))
                    .ok_or_else(|| anyhow!("no data directory: set {ENV_DATA_DIR} or pass --data-dir"))?,
            },
        };

        let engine = JobEngineConfig::from_lookup(lookup).context("invalid job engine settings")?;
        Ok(Self { data_dir, engine })
    }

    pub fn projects_file(&self) -> PathBuf {
        self.data_dir.join(PROJECTS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_beats_environment() {
        let settings = Settings::resolve(Some(PathBuf::from("/flag")), |var| {
            (var == ENV_DATA_DIR).then(|| "/env".to_string())
        })
        .unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/flag"));
        assert_eq!(settings.projects_file(), PathBuf::from("/flag/projects.json"));
    }

    #[test]
    fn environment_beats_platform_default() {
        let settings =
            Settings::resolve(None, |var| (var == ENV_DATA_DIR).then(|| "/env".to_string()))
                .unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/env"));
    }

    #[test]
    fn engine_settings_come_from_the_same_lookup() {
        let settings = Settings::resolve(Some(PathBuf::from("/d")), |var| {
            (var == "PHOTOHUB_MAX_RETRIES").then(|| "7".to_string())
        })
        .unwrap();
        assert_eq!(settings.engine.retry.max_retries, 7);

        let err = Settings::resolve(Some(PathBuf::from("/d")), |var| {
            (var == "PHOTOHUB_MAX_CONCURRENT").then(|| "zero".to_string())
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("PHOTOHUB_MAX_CONCURRENT"));
    }
}
