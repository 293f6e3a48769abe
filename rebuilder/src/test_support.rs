//! Test-only fakes for every trait seam, plus on-disk fixture writers.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::core::types::{BuildOutcome, BuildResult, KillReport, ProcessHandle};
use crate::io::build::{BuildInvocation, BuildRunner};
use crate::io::client::{ClientError, Response, SessionClient};
use crate::io::engine::EngineRegistry;
use crate::io::kill::ProcessBackend;
use crate::io::launcher::Launcher;
use crate::io::project::ProjectDescriptor;

/// Session client answering from a script instead of a socket.
///
/// Port state is consumed from a queue, one entry per probe, then falls back
/// to a fixed default. Commands see the state of the latest probe and answer
/// from per-command replies or a generic success object.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    port_states: RefCell<VecDeque<bool>>,
    port_default: bool,
    replies: HashMap<String, Value>,
    failing: Vec<String>,
    sent: RefCell<Vec<String>>,
    probes: Cell<usize>,
    last_probe: Cell<Option<bool>>,
}

impl ScriptedClient {
    /// Port closed, every command unreachable.
    pub fn offline() -> Self {
        Self::default()
    }

    /// Port open; `ping` and `get_current_level_name` answer like a loaded editor.
    pub fn online() -> Self {
        Self {
            port_default: true,
            ..Self::default()
        }
        .reply("ping", json!({"status": "success", "result": {"message": "pong"}}))
        .reply(
            "get_current_level_name",
            json!({"status": "success", "result": {"level_name": "/Game/Maps/Main"}}),
        )
    }

    pub fn reply(mut self, command: &str, value: Value) -> Self {
        self.replies.insert(command.to_string(), value);
        self
    }

    /// Make `command` fail with a transport error.
    pub fn failing(mut self, command: &str) -> Self {
        self.failing.push(command.to_string());
        self
    }

    /// The first `probes` port checks see a closed port.
    pub fn port_opens_after(self, probes: usize) -> Self {
        self.port_states.borrow_mut().extend(std::iter::repeat_n(false, probes));
        self
    }

    /// Explicit port states for the next probes, then `default`.
    pub fn port_sequence(mut self, states: &[bool], default: bool) -> Self {
        self.port_states.borrow_mut().extend(states.iter().copied());
        self.port_default = default;
        self
    }

    /// Commands sent so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.borrow().clone()
    }

    pub fn probes(&self) -> usize {
        self.probes.get()
    }

    fn next_port_state(&self) -> bool {
        let open = self
            .port_states
            .borrow_mut()
            .pop_front()
            .unwrap_or(self.port_default);
        self.last_probe.set(Some(open));
        open
    }
}

impl SessionClient for ScriptedClient {
    fn send(&self, command: &str, _params: Value, _timeout: Duration) -> Response {
        if !self.last_probe.get().unwrap_or(self.port_default) {
            return Err(ClientError::Connect {
                addr: "127.0.0.1:55557".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        self.sent.borrow_mut().push(command.to_string());
        if self.failing.iter().any(|c| c == command) {
            return Err(ClientError::Closed);
        }
        Ok(self
            .replies
            .get(command)
            .cloned()
            .unwrap_or_else(|| json!({"status": "success", "result": {}})))
    }

    fn is_port_open(&self, _timeout: Duration) -> bool {
        self.probes.set(self.probes.get() + 1);
        self.next_port_state()
    }
}

/// Process backend with an optional pretend-running editor.
#[derive(Debug, Default)]
pub struct FakeBackend {
    running: Cell<Option<u32>>,
    blind: bool,
    kill_calls: Cell<usize>,
    killed_pids: RefCell<Vec<u32>>,
}

impl FakeBackend {
    pub fn running(pid: u32) -> Self {
        Self {
            running: Cell::new(Some(pid)),
            ..Self::default()
        }
    }

    /// Backend without introspection, like the image-name one.
    pub fn blind() -> Self {
        Self {
            blind: true,
            ..Self::default()
        }
    }

    pub fn kill_calls(&self) -> usize {
        self.kill_calls.get()
    }

    pub fn killed_pids(&self) -> Vec<u32> {
        self.killed_pids.borrow().clone()
    }
}

impl ProcessBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn can_introspect(&self) -> bool {
        !self.blind
    }

    fn kill_all(&self, _names: &[String]) -> KillReport {
        self.kill_calls.set(self.kill_calls.get() + 1);
        let mut report = KillReport::default();
        if let Some(pid) = self.running.take() {
            report.killed.push(format!("UnrealEditor.exe (pid {pid})"));
        }
        report
    }

    fn find_running(&self, _names: &[String]) -> Option<ProcessHandle> {
        if self.blind {
            return None;
        }
        self.running.get().map(|pid| ProcessHandle {
            pid,
            name: "UnrealEditor.exe".to_string(),
        })
    }

    fn kill_pid(&self, pid: u32, _names: &[String]) -> KillReport {
        self.killed_pids.borrow_mut().push(pid);
        let mut report = KillReport::default();
        if self.running.get() == Some(pid) {
            self.running.set(None);
            report.killed.push(format!("UnrealEditor.exe (pid {pid})"));
        }
        report
    }
}

/// Lets a test keep a handle on the backend it gave to a `ProcessController`.
impl ProcessBackend for Rc<FakeBackend> {
    fn name(&self) -> &'static str {
        self.as_ref().name()
    }

    fn can_introspect(&self) -> bool {
        self.as_ref().can_introspect()
    }

    fn kill_all(&self, names: &[String]) -> KillReport {
        self.as_ref().kill_all(names)
    }

    fn find_running(&self, names: &[String]) -> Option<ProcessHandle> {
        self.as_ref().find_running(names)
    }

    fn kill_pid(&self, pid: u32, names: &[String]) -> KillReport {
        self.as_ref().kill_pid(pid, names)
    }
}

/// Build runner returning a fixed outcome and remembering what it was asked.
#[derive(Debug)]
pub struct FakeBuild {
    outcome: BuildOutcome,
    stderr: String,
    calls: RefCell<Vec<Vec<String>>>,
}

impl FakeBuild {
    pub fn exiting(code: i32) -> Self {
        Self {
            outcome: BuildOutcome::Exited { code },
            stderr: if code == 0 {
                String::new()
            } else {
                format!("error: build failed with {code}")
            },
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn timing_out(after_secs: u64) -> Self {
        Self {
            outcome: BuildOutcome::TimedOut { after_secs },
            stderr: String::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Command lines of every run, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }
}

impl BuildRunner for FakeBuild {
    fn run(&self, invocation: &BuildInvocation) -> Result<BuildResult> {
        let command = invocation.command_line();
        self.calls.borrow_mut().push(command.clone());
        Ok(BuildResult {
            command,
            outcome: self.outcome,
            stdout_tail: "Building...".to_string(),
            stderr_tail: self.stderr.clone(),
            duration_ms: 5,
        })
    }
}

/// Launcher that hands out a fixed pid or fails.
#[derive(Debug)]
pub struct FakeLauncher {
    pid: Option<u32>,
    launched: RefCell<Vec<(PathBuf, Option<PathBuf>)>>,
}

impl FakeLauncher {
    pub fn with_pid(pid: u32) -> Self {
        Self {
            pid: Some(pid),
            launched: RefCell::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            pid: None,
            launched: RefCell::new(Vec::new()),
        }
    }

    pub fn launched(&self) -> Vec<(PathBuf, Option<PathBuf>)> {
        self.launched.borrow().clone()
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, executable: &Path, project_file: Option<&Path>) -> Result<u32> {
        self.launched
            .borrow_mut()
            .push((executable.to_path_buf(), project_file.map(Path::to_path_buf)));
        self.pid
            .ok_or_else(|| anyhow!("spawn {}: permission denied", executable.display()))
    }
}

/// Registry with canned candidates.
#[derive(Debug, Default, Clone)]
pub struct FakeRegistry {
    pub installed: Vec<PathBuf>,
    pub custom: Vec<PathBuf>,
}

impl EngineRegistry for FakeRegistry {
    fn installed_directories(&self, _association: &str) -> Vec<PathBuf> {
        self.installed.clone()
    }

    fn custom_builds(&self, _association: &str) -> Vec<PathBuf> {
        self.custom.clone()
    }
}

/// Create `<root>/Engine/Build/Build.version` for the given version.
pub fn write_engine_root(root: &Path, major: u32, minor: u32, patch: u32) {
    let build = root.join("Engine").join("Build");
    fs::create_dir_all(&build).expect("create engine build dir");
    let descriptor = json!({
        "MajorVersion": major,
        "MinorVersion": minor,
        "PatchVersion": patch,
        "Changelist": 0,
        "BranchName": format!("++UE{major}+Release-{major}.{minor}"),
    });
    fs::write(build.join("Build.version"), descriptor.to_string()).expect("write Build.version");
}

/// Create `<dir>/<name>.uproject` with the given association and load it.
pub fn write_project(dir: &Path, name: &str, association: &str) -> ProjectDescriptor {
    fs::create_dir_all(dir).expect("create project dir");
    let path = dir.join(format!("{name}.uproject"));
    let descriptor = json!({
        "FileVersion": 3,
        "EngineAssociation": association,
        "Modules": [{"Name": name, "Type": "Runtime", "LoadingPhase": "Default"}],
        "Plugins": [{"Name": "UnrealMCP", "Enabled": true}],
    });
    fs::write(&path, descriptor.to_string()).expect("write uproject");
    ProjectDescriptor::load(&path).expect("load uproject")
}

/// Create an empty file, parents included.
pub fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, "").expect("touch");
}

/// Write an executable `sh` script named `name` into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(dir).expect("create script dir");
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod script");
    path
}
