//! Removal of recovery artifacts that would block a relaunch with a restore prompt.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub errors: Vec<String>,
}

/// Recovery artifacts under a project directory.
pub fn recovery_artifacts(project_dir: &Path) -> [PathBuf; 2] {
    let autosaves = project_dir.join("Saved").join("Autosaves");
    [
        autosaves.join("PackageRestoreData.json"),
        autosaves.join("Temp"),
    ]
}

/// Delete whatever recovery artifacts exist. Missing files are fine.
pub fn cleanup(project_dir: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();
    for path in recovery_artifacts(project_dir) {
        let result = match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
            Ok(_) => fs::remove_file(&path),
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => {
                debug!(path = %path.display(), "removed recovery artifact");
                report.removed.push(path);
            }
            Err(err) => {
                warn!(path = %path.display(), err = %err, "failed to remove recovery artifact");
                report.errors.push(format!("{}: {err}", path.display()));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_to_clean_is_empty_report() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(cleanup(temp.path()), CleanupReport::default());
    }

    #[test]
    fn removes_restore_data_and_temp_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let [restore, temp_dir] = recovery_artifacts(temp.path());
        fs::create_dir_all(temp_dir.join("Maps")).expect("mkdir");
        fs::write(temp_dir.join("Maps/Level.umap"), "x").expect("write");
        fs::write(&restore, "{}").expect("write");

        let report = cleanup(temp.path());
        assert_eq!(report.removed, vec![restore.clone(), temp_dir.clone()]);
        assert!(report.errors.is_empty());
        assert!(!restore.exists());
        assert!(!temp_dir.exists());
        // Other autosaves are left alone.
        assert!(temp.path().join("Saved/Autosaves").is_dir());
    }
}
