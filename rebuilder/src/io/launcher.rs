//! Detached launch of the editor executable.

use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

pub trait Launcher {
    /// Start `executable` detached and return its pid.
    fn launch(&self, executable: &Path, project_file: Option<&Path>) -> Result<u32>;
}

/// Spawns the executable with null stdio, detached from this process.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedLauncher;

impl Launcher for DetachedLauncher {
    #[instrument(skip_all, fields(executable = %executable.display()))]
    fn launch(&self, executable: &Path, project_file: Option<&Path>) -> Result<u32> {
        if !executable.is_file() {
            bail!("executable not found at {}", executable.display());
        }
        let mut cmd = Command::new(executable);
        if let Some(project) = project_file {
            cmd.arg(project);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut cmd);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn {}", executable.display()))?;
        let pid = child.id();
        info!(pid, "editor launched");
        // Reap the editor if it exits while we are still running, so it never
        // lingers as a zombie that process detection would report.
        thread::spawn(move || match child.wait() {
            Ok(status) => debug!(pid, code = ?status.code(), "editor exited"),
            Err(err) => debug!(pid, err = %err, "wait on editor failed"),
        });
        Ok(pid)
    }
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}
