//! Host process detection and forced termination.
//!
//! Two interchangeable backends sit behind [`ProcessBackend`]. The
//! [`ProcessController`] picks one once, at construction, and every caller
//! goes through the same kill-by-name-set contract. Termination is
//! best-effort: failures land in the [`KillReport`] and never abort.

use std::process::Command;
use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info, instrument, warn};

use crate::core::names::{comm_name, image_stem, matches_any};
use crate::core::types::{KillReport, ProcessHandle};
use crate::io::config::BackendPreference;
use crate::io::process::run_command_with_timeout;

/// Upper bound for one `taskkill`/`pkill` run.
const IMAGE_KILL_TIMEOUT: Duration = Duration::from_secs(10);
const IMAGE_KILL_TAIL_CHARS: usize = 500;

pub trait ProcessBackend {
    fn name(&self) -> &'static str;

    /// Whether the backend can enumerate running processes.
    fn can_introspect(&self) -> bool;

    fn kill_all(&self, names: &[String]) -> KillReport;

    /// First running process whose name matches. Always `None` without introspection.
    fn find_running(&self, names: &[String]) -> Option<ProcessHandle>;

    /// Kill `pid` only if it is alive and still carries one of `names`.
    fn kill_pid(&self, pid: u32, names: &[String]) -> KillReport;
}

/// Enumerates processes through `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoBackend;

impl SysinfoBackend {
    fn snapshot() -> System {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
    }
}

fn process_matches(process: &sysinfo::Process, names: &[String]) -> bool {
    if matches_any(&process.name().to_string_lossy(), names) {
        return true;
    }
    process
        .exe()
        .and_then(|exe| exe.file_name())
        .is_some_and(|file| matches_any(&file.to_string_lossy(), names))
}

impl ProcessBackend for SysinfoBackend {
    fn name(&self) -> &'static str {
        "introspection"
    }

    fn can_introspect(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(backend = "introspection"))]
    fn kill_all(&self, names: &[String]) -> KillReport {
        let system = Self::snapshot();
        let mut report = KillReport::default();
        let own = std::process::id();
        for (pid, process) in system.processes() {
            if pid.as_u32() == own || !process_matches(process, names) {
                continue;
            }
            let label = format!("{} (pid {})", process.name().to_string_lossy(), pid.as_u32());
            if process.kill() {
                info!(process = %label, "killed");
                report.killed.push(label);
            } else {
                warn!(process = %label, "kill failed");
                report.errors.push(format!("failed to kill {label}"));
            }
        }
        report
    }

    fn find_running(&self, names: &[String]) -> Option<ProcessHandle> {
        let system = Self::snapshot();
        let mut found: Vec<ProcessHandle> = system
            .processes()
            .iter()
            .filter(|(_, process)| process_matches(process, names))
            .map(|(pid, process)| ProcessHandle {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
            })
            .collect();
        // HashMap order is arbitrary; lowest pid keeps results stable.
        found.sort_by_key(|handle| handle.pid);
        found.into_iter().next()
    }

    fn kill_pid(&self, pid: u32, names: &[String]) -> KillReport {
        let mut system = System::new();
        let target = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        let mut report = KillReport::default();
        match system.process(target) {
            None => debug!(pid, "recorded pid is not running"),
            Some(process) if !process_matches(process, names) => {
                debug!(pid, name = %process.name().to_string_lossy(), "recorded pid belongs to another program");
            }
            Some(process) => {
                let label = format!("{} (pid {pid})", process.name().to_string_lossy());
                if process.kill() {
                    report.killed.push(label);
                } else {
                    report.errors.push(format!("failed to kill recorded {label}"));
                }
            }
        }
        report
    }
}

/// Kills by image name with the platform's stock tool. Cannot enumerate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageNameBackend;

impl ImageNameBackend {
    fn command_for(name: &str) -> Command {
        if cfg!(windows) {
            let image = if name.to_ascii_lowercase().ends_with(".exe") {
                name.to_string()
            } else {
                format!("{name}.exe")
            };
            let mut cmd = Command::new("taskkill");
            cmd.args(["/F", "/IM", image.as_str()]);
            cmd
        } else {
            let mut cmd = Command::new("pkill");
            cmd.args(["-KILL", "-x", pkill_name(name)]);
            cmd
        }
    }

    /// Exit code the tool uses for "no such process".
    fn not_found_code() -> i32 {
        if cfg!(windows) { 128 } else { 1 }
    }
}

/// `pkill -x` matches `comm`, which Linux truncates.
fn pkill_name(name: &str) -> &str {
    let stem = image_stem(name);
    if cfg!(target_os = "linux") {
        comm_name(stem)
    } else {
        stem
    }
}

impl ProcessBackend for ImageNameBackend {
    fn name(&self) -> &'static str {
        "image-name"
    }

    fn can_introspect(&self) -> bool {
        false
    }

    #[instrument(skip_all, fields(backend = "image-name"))]
    fn kill_all(&self, names: &[String]) -> KillReport {
        let mut report = KillReport::default();
        for name in names.iter().filter(|n| !n.trim().is_empty()) {
            let cmd = Self::command_for(name);
            match run_command_with_timeout(cmd, IMAGE_KILL_TIMEOUT, IMAGE_KILL_TAIL_CHARS) {
                Ok(out) if out.timed_out => {
                    report.errors.push(format!("kill {name}: timed out"));
                }
                Ok(out) if out.code() == 0 => {
                    info!(name = %name, "killed by image name");
                    report.killed.push(name.clone());
                }
                Ok(out) if out.code() == Self::not_found_code() => {
                    debug!(name = %name, "not running");
                }
                Ok(out) => {
                    let mut msg = format!("kill {name}: exit {}", out.code());
                    let detail = out.stderr_tail.trim();
                    if !detail.is_empty() {
                        msg.push_str(": ");
                        msg.push_str(detail);
                    }
                    report.errors.push(msg);
                }
                Err(err) => report.errors.push(format!("kill {name}: {err:#}")),
            }
        }
        report
    }

    fn find_running(&self, _names: &[String]) -> Option<ProcessHandle> {
        None
    }

    fn kill_pid(&self, pid: u32, _names: &[String]) -> KillReport {
        // Without enumeration the pid cannot be tied to a host name, so it is left alone.
        debug!(pid, "image-name backend cannot verify recorded pid, skipping");
        KillReport::default()
    }
}

/// Front door for process termination, bound to one backend and one name set.
pub struct ProcessController {
    backend: Box<dyn ProcessBackend>,
    names: Vec<String>,
}

impl ProcessController {
    /// Choose a backend once. `Auto` prefers introspection where the platform supports it.
    pub fn select(preference: BackendPreference, names: Vec<String>) -> Self {
        let backend: Box<dyn ProcessBackend> = match preference {
            BackendPreference::Introspection => Box::new(SysinfoBackend),
            BackendPreference::ImageName => Box::new(ImageNameBackend),
            BackendPreference::Auto if sysinfo::IS_SUPPORTED_SYSTEM => Box::new(SysinfoBackend),
            BackendPreference::Auto => Box::new(ImageNameBackend),
        };
        debug!(backend = backend.name(), "process backend selected");
        Self::with_backend(backend, names)
    }

    pub fn with_backend(backend: Box<dyn ProcessBackend>, names: Vec<String>) -> Self {
        Self { backend, names }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn can_introspect(&self) -> bool {
        self.backend.can_introspect()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn kill_all(&self) -> KillReport {
        self.backend.kill_all(&self.names)
    }

    pub fn find_running(&self) -> Option<ProcessHandle> {
        self.backend.find_running(&self.names)
    }

    pub fn kill_pid(&self, pid: u32) -> KillReport {
        self.backend.kill_pid(pid, &self.names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["DefinitelyNotRunningEditor.exe".to_string()]
    }

    #[test]
    fn select_honours_forced_preference() {
        let image = ProcessController::select(BackendPreference::ImageName, names());
        assert_eq!(image.backend_name(), "image-name");
        assert!(!image.can_introspect());
        assert_eq!(image.find_running(), None);

        let intro = ProcessController::select(BackendPreference::Introspection, names());
        assert_eq!(intro.backend_name(), "introspection");
        assert!(intro.can_introspect());
    }

    #[test]
    fn introspection_finds_nothing_for_unknown_names() {
        let controller = ProcessController::with_backend(Box::new(SysinfoBackend), names());
        assert_eq!(controller.find_running(), None);
        let report = controller.kill_all();
        assert!(report.killed.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn recorded_pid_of_another_program_is_left_alone() {
        let controller = ProcessController::with_backend(Box::new(SysinfoBackend), names());
        let report = controller.kill_pid(std::process::id());
        assert!(report.killed.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn image_name_backend_skips_recorded_pid() {
        let report = ImageNameBackend.kill_pid(1, &names());
        assert_eq!(report, KillReport::default());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pkill_pattern_fits_linux_comm() {
        let cmd = ImageNameBackend::command_for("CrashReportClientEditor.exe");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["-KILL", "-x", "CrashReportClie"]);

        let cmd = ImageNameBackend::command_for("UnrealEditor.exe");
        assert_eq!(cmd.get_args().last(), Some(std::ffi::OsStr::new("UnrealEditor")));
    }
}
