//! Unit handlers that copy files on disk.
//!
//! Every copy goes to a `.part` file first and is renamed into place only when
//! complete, so a failed or interrupted unit never leaves a truncated photo
//! behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use photohub_jobs::{JobParams, UnitContext, UnitError, UnitHandler};

use crate::media::unique_path;

/// A temporary file next to its final target, removed on drop unless committed.
#[derive(Debug)]
pub struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl PartialFile {
    pub fn for_target(target: &Path) -> Self {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".part");
        Self {
            path: target.with_file_name(name),
            committed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the finished file into place.
    pub fn commit(mut self, target: &Path) -> io::Result<()> {
        fs::rename(&self.path, target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Copy `source` into `dir` under its own file name, never overwriting.
pub fn copy_into(source: &Path, dir: &Path) -> Result<PathBuf, UnitError> {
    let name = source
        .file_name()
        .ok_or_else(|| UnitError::new(format!("{} has no file name", source.display())))?;
    if !source.is_file() {
        return Err(UnitError::new(format!("{} is not a file", source.display())));
    }

    fs::create_dir_all(dir)?;
    let target = unique_path(&dir.join(name));
    let partial = PartialFile::for_target(&target);
    fs::copy(source, partial.path())?;
    partial.commit(&target)?;
    Ok(target)
}

/// Copies one file of an import job from the source folder to the project.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImportFiles;

impl UnitHandler for ImportFiles {
    fn process(&self, ctx: &UnitContext<'_>) -> Result<(), UnitError> {
        let JobParams::Import {
            source_dir,
            dest_dir,
            files,
        } = ctx.params
        else {
            return Err(UnitError::new("import handler received non-import parameters"));
        };
        let file = files
            .get(ctx.unit.index)
            .ok_or_else(|| UnitError::new(format!("no file for unit {}", ctx.unit.index)))?;

        let source = if file.is_absolute() {
            file.clone()
        } else {
            source_dir.join(file)
        };
        let target = copy_into(&source, dest_dir)?;
        debug!(job_id = %ctx.job_id, source = %source.display(), target = %target.display(), "imported file");
        Ok(())
    }
}

/// Copies one asset of an export job to the delivery folder.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExportAssets;

impl UnitHandler for ExportAssets {
    fn process(&self, ctx: &UnitContext<'_>) -> Result<(), UnitError> {
        let JobParams::Export {
            destination,
            assets,
            ..
        } = ctx.params
        else {
            return Err(UnitError::new("export handler received non-export parameters"));
        };
        let asset = assets
            .get(ctx.unit.index)
            .ok_or_else(|| UnitError::new(format!("no asset for unit {}", ctx.unit.index)))?;

        let target = copy_into(asset, destination)?;
        debug!(job_id = %ctx.job_id, asset = %asset.display(), target = %target.display(), "exported asset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_commits_and_leaves_no_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("IMG_0001.jpg");
        fs::write(&source, b"pixels").unwrap();
        let out = dir.path().join("out");

        let first = copy_into(&source, &out).unwrap();
        let second = copy_into(&source, &out).unwrap();

        assert_eq!(first, out.join("IMG_0001.jpg"));
        assert_eq!(second, out.join("IMG_0001_1.jpg"));
        assert_eq!(fs::read(&second).unwrap(), b"pixels");
        let names: Vec<_> = fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".part")), "{names:?}");
    }

    #[test]
    fn uncommitted_partial_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("export.tif");
        let part_path = {
            let partial = PartialFile::for_target(&target);
            fs::write(partial.path(), b"half").unwrap();
            partial.path().to_path_buf()
        };

        assert_eq!(part_path, dir.path().join("export.tif.part"));
        assert!(!part_path.exists());
        assert!(!target.exists());
    }

    #[test]
    fn missing_source_is_a_unit_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = copy_into(&dir.path().join("gone.jpg"), dir.path()).unwrap_err();
        assert!(err.to_string().contains("is not a file"));
    }
}
