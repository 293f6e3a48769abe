//! Advisory record of the last launched editor pid.
//!
//! The record is a hint, never proof: callers re-verify the process through
//! the process backend before acting on it.

use std::cell::Cell;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

pub trait PidStore {
    /// `None` when there is no record or it cannot be parsed.
    fn load(&self) -> Option<u32>;
    fn save(&self, pid: u32) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// One integer plus newline in a file, replaced whole on every save.
#[derive(Debug, Clone)]
pub struct FilePidStore {
    path: PathBuf,
}

impl FilePidStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PidStore for FilePidStore {
    fn load(&self) -> Option<u32> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let pid = raw.trim().parse().ok();
        if pid.is_none() {
            debug!(path = %self.path.display(), "ignoring unparsable pid record");
        }
        pid
    }

    fn save(&self, pid: u32) -> Result<()> {
        let parent = self
            .path
            .parent()
            .with_context(|| format!("pid path missing parent {}", self.path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
        let tmp_path = self.path.with_extension("pid.tmp");
        fs::write(&tmp_path, format!("{pid}\n"))
            .with_context(|| format!("write temp pid record {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace pid record {}", self.path.display()))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("remove pid record {}", self.path.display()))
            }
        }
    }
}

/// In-memory store, used when no project directory gives the record a home.
#[derive(Debug, Default)]
pub struct MemoryPidStore {
    pid: Cell<Option<u32>>,
}

impl MemoryPidStore {
    pub fn with_pid(pid: u32) -> Self {
        Self {
            pid: Cell::new(Some(pid)),
        }
    }
}

impl PidStore for MemoryPidStore {
    fn load(&self) -> Option<u32> {
        self.pid.get()
    }

    fn save(&self, pid: u32) -> Result<()> {
        self.pid.set(Some(pid));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.pid.set(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_clear() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FilePidStore::new(temp.path().join("Saved/Rebuilder/editor.pid"));
        assert_eq!(store.load(), None);

        store.save(4242).expect("save");
        assert_eq!(fs::read_to_string(store.path()).expect("read"), "4242\n");
        assert_eq!(store.load(), Some(4242));

        store.save(7).expect("overwrite");
        assert_eq!(store.load(), Some(7));

        store.clear().expect("clear");
        assert_eq!(store.load(), None);
        store.clear().expect("clear twice");
    }

    #[test]
    fn garbage_record_loads_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("editor.pid");
        fs::write(&path, "not a pid").expect("write");
        assert_eq!(FilePidStore::new(path).load(), None);
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryPidStore::with_pid(9);
        assert_eq!(store.load(), Some(9));
        store.clear().expect("clear");
        assert_eq!(store.load(), None);
    }
}
