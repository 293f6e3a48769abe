//! Orchestration for a single unattended `rebuilder rebuild`.
//!
//! Phases run in a fixed order and each appends exactly one record to the
//! session log. Only the build phase can fail the run; every other problem is
//! downgraded to a note in its phase record.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::reply::{error_message, is_error_reply, reply_str};
use crate::core::session::{Phase, PhaseRecord, RebuildSession};
use crate::core::types::{
    BuildConfiguration, BuildOutcome, BuildRequest, BuildResult, KillReport, ReadinessStatus,
};
use crate::exit_codes;
use crate::io::autosave;
use crate::io::build::{BuildInvocation, BuildRunner};
use crate::io::client::SessionClient;
use crate::io::config::RebuilderConfig;
use crate::io::engine::{self, EngineLocator, EngineSource};
use crate::io::kill::ProcessController;
use crate::io::launcher::Launcher;
use crate::io::pid_store::{FilePidStore, MemoryPidStore, PidStore};
use crate::io::project::{ProjectDescriptor, find_project_upward};
use crate::io::readiness::ReadinessPoller;

const SAVE_COMMANDS: [&str; 2] = ["save_current_level", "save_all_assets"];
const ENGINE_PATH_COMMAND: &str = "get_engine_path";

/// What the caller asked for. CLI flags map onto this one to one.
#[derive(Debug, Clone)]
pub struct RebuildOptions {
    pub project_file: Option<PathBuf>,
    pub build_tool: Option<PathBuf>,
    pub editor: Option<PathBuf>,
    pub engine_root: Option<PathBuf>,
    pub target: Option<String>,
    pub configuration: BuildConfiguration,
    pub platform: Option<String>,
    pub extra_args: Option<String>,
    pub relaunch: bool,
    pub wait_ready: bool,
    pub ready_timeout: Duration,
    /// Start of the upward project search when no project is known.
    pub search_from: Option<PathBuf>,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self {
            project_file: None,
            build_tool: None,
            editor: None,
            engine_root: None,
            target: None,
            configuration: BuildConfiguration::Development,
            platform: None,
            extra_args: None,
            relaunch: true,
            wait_ready: true,
            ready_timeout: Duration::from_secs(180),
            search_from: None,
        }
    }
}

/// Collaborators for one run.
pub struct RebuildDeps<'a> {
    pub client: &'a dyn SessionClient,
    pub processes: &'a ProcessController,
    pub locator: &'a EngineLocator,
    pub builder: &'a dyn BuildRunner,
    pub launcher: &'a dyn Launcher,
    /// Pid record; when `None` a file store at the configured path is used.
    pub pid_store: Option<&'a dyn PidStore>,
}

/// Progress notifications, emitted as phases start and finish.
#[derive(Debug, Clone, Copy)]
pub enum Progress<'a> {
    Started(Phase),
    Finished(&'a PhaseRecord),
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub success: bool,
    pub terminal: Phase,
    /// Set only when readiness was waited on.
    pub ready: Option<bool>,
    pub error: Option<String>,
    pub project_file: Option<PathBuf>,
    pub build_tool: Option<PathBuf>,
    pub build: Option<BuildResult>,
    pub readiness: Option<ReadinessStatus>,
    pub steps: RebuildSession,
}

impl RebuildReport {
    /// The build tool's own code when it failed with one, else 1 on failure, else 0.
    pub fn exit_code(&self) -> i32 {
        if self.success {
            return exit_codes::OK;
        }
        match self.build.as_ref().and_then(BuildResult::return_code) {
            Some(code) if code > 0 => code,
            _ => exit_codes::FAILURE,
        }
    }
}

/// What the live session told us during pre-save.
#[derive(Debug, Default)]
struct SessionPaths {
    engine_dir: Option<PathBuf>,
    project_file: Option<PathBuf>,
    build_tool: Option<PathBuf>,
}

struct Run<'a, 'p> {
    cfg: &'a RebuilderConfig,
    deps: &'a RebuildDeps<'a>,
    progress: &'p mut dyn FnMut(Progress<'_>),
    session: RebuildSession,
}

impl Run<'_, '_> {
    fn start(&mut self, phase: Phase) {
        info!(phase = phase.as_str(), "phase started");
        (self.progress)(Progress::Started(phase));
    }

    fn finish(&mut self, phase: Phase, outcome: impl Into<String>) {
        let record = self.session.record(phase, outcome);
        info!(phase = phase.as_str(), outcome = %record.outcome, "phase finished");
        (self.progress)(Progress::Finished(record));
    }
}

/// Run the whole pipeline once.
#[instrument(skip_all, fields(relaunch = opts.relaunch, wait_ready = opts.wait_ready))]
pub fn run_rebuild(
    opts: &RebuildOptions,
    deps: &RebuildDeps<'_>,
    cfg: &RebuilderConfig,
    progress: &mut dyn FnMut(Progress<'_>),
) -> RebuildReport {
    let mut run = Run {
        cfg,
        deps,
        progress,
        session: RebuildSession::new(),
    };

    run.start(Phase::PreSave);
    let (online_paths, pre_save_note) = pre_save(&run);
    run.finish(Phase::PreSave, pre_save_note);

    let project_file = opts
        .project_file
        .clone()
        .or(online_paths.project_file.clone())
        .or_else(|| opts.search_from.as_deref().and_then(find_project_upward));
    let project = project_file.as_deref().and_then(load_project);
    let project_dir = project_file
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);

    let fallback_store = MemoryPidStore::default();
    let file_store = cfg.pid_path(project_dir.as_deref()).map(FilePidStore::new);
    let pid_store: &dyn PidStore = match (deps.pid_store, file_store.as_ref()) {
        (Some(store), _) => store,
        (None, Some(store)) => store,
        (None, None) => &fallback_store,
    };

    run.start(Phase::Kill);
    let kill = kill_phase(deps.processes, pid_store);
    run.finish(Phase::Kill, kill);

    run.start(Phase::WaitPortClose);
    let port = wait_port_close(deps.client, cfg);
    run.finish(Phase::WaitPortClose, port);

    run.start(Phase::Cleanup);
    let cleanup = match project_dir.as_deref() {
        Some(dir) => describe_cleanup(&autosave::cleanup(dir)),
        None => "no project directory known; nothing to clean".to_string(),
    };
    run.finish(Phase::Cleanup, cleanup);

    run.start(Phase::Build);
    // An explicit root beats what the session reports; the session beats discovery.
    let resolution = deps
        .locator
        .resolve(project.as_ref(), opts.engine_root.as_deref());
    let engine_dir = match (resolution.source, resolution.root) {
        (EngineSource::Hint, Some(root)) => Some(engine::engine_dir(&root)),
        (_, root) => online_paths
            .engine_dir
            .clone()
            .or_else(|| root.map(|r| engine::engine_dir(&r))),
    };
    let tool = match resolve_build_tool(opts, &online_paths, engine_dir.as_deref()) {
        Ok(tool) => tool,
        Err(remedy) => {
            warn!(reason = %remedy, "no build tool");
            run.finish(Phase::Build, format!("not started: {remedy}"));
            return failed(run, remedy, project_file, None, None);
        }
    };
    let invocation = BuildInvocation {
        tool: tool.clone(),
        project_file: project_file.clone(),
        request: BuildRequest::new(
            opts.target.as_deref(),
            project_file.as_deref(),
            opts.configuration,
            opts.platform.as_deref(),
            opts.extra_args.as_deref(),
        ),
        timeout: Duration::from_secs(cfg.build.timeout_secs),
        tail_chars: cfg.build.output_tail_chars,
    };
    let build = match deps.builder.run(&invocation) {
        Ok(build) => build,
        Err(err) => {
            let msg = format!("build tool failed to start: {err:#}");
            run.finish(Phase::Build, msg.clone());
            return failed(run, msg, project_file, Some(tool), None);
        }
    };
    if !build.success() {
        let msg = match build.outcome {
            BuildOutcome::TimedOut { after_secs } => {
                format!("build timed out after {after_secs}s")
            }
            BuildOutcome::Exited { code } => {
                format!("build failed with exit code {code}")
            }
        };
        run.finish(Phase::Build, format!("{msg} ({})", secs(build.duration_ms)));
        return failed(run, msg, project_file, Some(tool), Some(build));
    }
    run.finish(Phase::Build, format!("succeeded in {}", secs(build.duration_ms)));

    let finish = |steps: RebuildSession, ready: Option<bool>, readiness: Option<ReadinessStatus>| {
        RebuildReport {
            success: true,
            terminal: steps.terminal().unwrap_or(Phase::Done),
            ready,
            error: None,
            project_file: project_file.clone(),
            build_tool: Some(tool.clone()),
            build: Some(build.clone()),
            readiness,
            steps,
        }
    };

    if !opts.relaunch {
        run.finish(Phase::RelaunchSkipped, "relaunch disabled");
        return finish(run.session, None, None);
    }

    let executable = match &opts.editor {
        Some(editor) if editor.is_file() => Ok(editor.clone()),
        Some(editor) => Err(format!("editor not found at {}", editor.display())),
        None => engine_dir
            .as_deref()
            .and_then(engine::editor_path)
            .ok_or_else(|| "no editor executable resolved".to_string()),
    };
    let executable = match executable {
        Ok(executable) => executable,
        Err(reason) => {
            run.finish(Phase::RelaunchSkipped, reason);
            return finish(run.session, None, None);
        }
    };

    run.start(Phase::Relaunch);
    let pid = match deps.launcher.launch(&executable, project_file.as_deref()) {
        Ok(pid) => pid,
        Err(err) => {
            warn!(err = %err, "relaunch failed");
            run.finish(Phase::RelaunchSkipped, format!("launch failed: {err:#}"));
            return finish(run.session, None, None);
        }
    };
    let mut launched = format!("launched {} (pid {pid})", executable.display());
    if let Err(err) = pid_store.save(pid) {
        warn!(err = %err, "pid record not saved");
        launched.push_str(&format!("; pid record not saved: {err:#}"));
    }
    run.finish(Phase::Relaunch, launched);

    run.start(Phase::WaitReady);
    if !opts.wait_ready {
        run.finish(Phase::WaitReady, "skipped (disabled)");
        run.finish(Phase::Done, "rebuild complete; readiness not checked");
        return finish(run.session, None, None);
    }
    let poller = ReadinessPoller::new(deps.client, Some(deps.processes), &cfg.session);
    let status = poller.wait_ready(
        opts.ready_timeout,
        Duration::from_millis(cfg.readiness.poll_interval_ms),
    );
    let ready = status.overall_ready;
    if ready {
        let level = status.details.level_name.as_deref().unwrap_or("unknown level");
        run.finish(
            Phase::WaitReady,
            format!(
                "ready after {} attempt(s) in {} ({level})",
                status.attempts,
                secs(status.elapsed_ms)
            ),
        );
        run.finish(Phase::Done, "rebuild complete; editor ready");
    } else {
        run.finish(
            Phase::WaitReady,
            format!(
                "timed out after {}; not ready (port_open={}, ping={}, loaded={})",
                secs(status.elapsed_ms),
                status.port_open,
                status.ping_acknowledged,
                status.session_loaded
            ),
        );
        run.finish(Phase::Done, "rebuild complete; editor not confirmed ready");
    }
    finish(run.session, Some(ready), Some(status))
}

fn failed(
    mut run: Run<'_, '_>,
    error: String,
    project_file: Option<PathBuf>,
    build_tool: Option<PathBuf>,
    build: Option<BuildResult>,
) -> RebuildReport {
    run.finish(Phase::Failed, error.clone());
    RebuildReport {
        success: false,
        terminal: Phase::Failed,
        ready: None,
        error: Some(error),
        project_file,
        build_tool,
        build,
        readiness: None,
        steps: run.session,
    }
}

fn pre_save(run: &Run<'_, '_>) -> (SessionPaths, String) {
    let client = run.deps.client;
    let session = &run.cfg.session;
    if !client.is_port_open(session.probe_timeout()) {
        return (
            SessionPaths::default(),
            "session offline; nothing saved".to_string(),
        );
    }

    let mut failures = Vec::new();
    for command in SAVE_COMMANDS {
        if let Err(msg) = request(client, command, session.command_timeout()) {
            failures.push(format!("{command}: {msg}"));
        }
    }

    let mut paths = SessionPaths::default();
    match request(client, ENGINE_PATH_COMMAND, session.command_timeout()) {
        Ok(reply) => paths = session_paths(&reply),
        Err(msg) => failures.push(format!("{ENGINE_PATH_COMMAND}: {msg}")),
    }

    let outcome = if failures.is_empty() {
        "level and assets saved; engine paths fetched".to_string()
    } else {
        warn!(failures = ?failures, "pre-save requests failed");
        format!("online with failures: {}", failures.join("; "))
    };
    (paths, outcome)
}

fn request(client: &dyn SessionClient, command: &str, timeout: Duration) -> Result<Value, String> {
    match client.send(command, Value::Null, timeout) {
        Ok(reply) if is_error_reply(&reply) => {
            Err(error_message(&reply).unwrap_or_else(|| "error reply".to_string()))
        }
        Ok(reply) => Ok(reply),
        Err(err) => Err(err.to_string()),
    }
}

fn session_paths(reply: &Value) -> SessionPaths {
    let path = |key: &str| reply_str(reply, key).map(PathBuf::from);
    SessionPaths {
        engine_dir: path("engine_dir"),
        project_file: path("project_file").filter(|p| p.is_file()),
        build_tool: path("ubt_batch_script").filter(|p| p.is_file()),
    }
}

fn load_project(path: &Path) -> Option<ProjectDescriptor> {
    match ProjectDescriptor::load(path) {
        Ok(project) => Some(project),
        Err(err) => {
            warn!(path = %path.display(), "project descriptor unreadable: {err:#}");
            None
        }
    }
}

fn kill_phase(processes: &ProcessController, pid_store: &dyn PidStore) -> String {
    let mut report = KillReport::default();
    if let Some(pid) = pid_store.load() {
        report.merge(processes.kill_pid(pid));
    }
    report.merge(processes.kill_all());
    if let Err(err) = pid_store.clear() {
        report.errors.push(format!("{err:#}"));
    }

    let mut outcome = if report.killed.is_empty() {
        format!("no host processes running ({} backend)", processes.backend_name())
    } else {
        format!("killed {}", report.killed.join(", "))
    };
    if !report.errors.is_empty() {
        outcome.push_str(&format!("; errors: {}", report.errors.join("; ")));
    }
    outcome
}

fn wait_port_close(client: &dyn SessionClient, cfg: &RebuilderConfig) -> String {
    let started = Instant::now();
    let timeout = Duration::from_secs(cfg.shutdown.port_close_timeout_secs);
    let probe = Duration::from_millis(cfg.shutdown.port_close_probe_ms);
    let interval = Duration::from_millis(cfg.shutdown.port_close_interval_ms);
    loop {
        if !client.is_port_open(probe) {
            return format!("port closed after {}", secs(elapsed_ms(started)));
        }
        if started.elapsed() >= timeout {
            warn!(timeout_secs = timeout.as_secs(), "port still open");
            return format!(
                "port still open after {}; continuing",
                secs(elapsed_ms(started))
            );
        }
        thread::sleep(interval);
    }
}

fn describe_cleanup(report: &autosave::CleanupReport) -> String {
    let mut outcome = if report.removed.is_empty() {
        "no recovery artifacts".to_string()
    } else {
        let removed: Vec<String> = report
            .removed
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        format!("removed {}", removed.join(", "))
    };
    if !report.errors.is_empty() {
        outcome.push_str(&format!("; errors: {}", report.errors.join("; ")));
    }
    outcome
}

/// Explicit flag, then the session's script, then the engine layout.
fn resolve_build_tool(
    opts: &RebuildOptions,
    online: &SessionPaths,
    engine_dir: Option<&Path>,
) -> Result<PathBuf, String> {
    if let Some(tool) = &opts.build_tool {
        return if tool.is_file() {
            Ok(tool.clone())
        } else {
            Err(format!(
                "build tool not found at {}; pass an existing file with --build-tool",
                tool.display()
            ))
        };
    }
    if let Some(tool) = &online.build_tool {
        return Ok(tool.clone());
    }
    if let Some(dir) = engine_dir {
        if let Some(tool) = engine::build_tool_path(dir) {
            return Ok(tool);
        }
        let looked: Vec<String> = engine::build_tool_candidates(dir)
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        return Err(format!(
            "no build tool at {}; pass --build-tool",
            looked.join(" or ")
        ));
    }
    Err("build tool unknown; pass --build-tool, keep the editor session reachable, \
         or make the engine root resolvable (--engine-root or UE_ROOT)"
        .to_string())
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn secs(ms: u64) -> String {
    format!("{:.1}s", ms as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_prefers_build_tool_code() {
        let mut report = RebuildReport {
            success: false,
            terminal: Phase::Failed,
            ready: None,
            error: Some("build failed".to_string()),
            project_file: None,
            build_tool: None,
            build: None,
            readiness: None,
            steps: RebuildSession::new(),
        };
        assert_eq!(report.exit_code(), exit_codes::FAILURE);

        report.build = Some(BuildResult {
            command: Vec::new(),
            outcome: crate::core::types::BuildOutcome::Exited { code: 6 },
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            duration_ms: 0,
        });
        assert_eq!(report.exit_code(), 6);

        report.success = true;
        assert_eq!(report.exit_code(), exit_codes::OK);
    }

    #[test]
    fn session_paths_read_nested_result() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("Build.bat");
        std::fs::write(&script, "").expect("write");
        let reply = serde_json::json!({
            "status": "success",
            "result": {
                "engine_dir": "C:/UE_5.3/Engine/",
                "project_file": temp.path().join("Missing.uproject"),
                "ubt_batch_script": script,
            }
        });
        let paths = session_paths(&reply);
        assert_eq!(paths.engine_dir, Some(PathBuf::from("C:/UE_5.3/Engine/")));
        assert_eq!(paths.project_file, None);
        assert_eq!(paths.build_tool, Some(script));
    }

    #[test]
    fn missing_explicit_tool_names_the_path() {
        let opts = RebuildOptions {
            build_tool: Some(PathBuf::from("/nowhere/Build.sh")),
            ..RebuildOptions::default()
        };
        let err = resolve_build_tool(&opts, &SessionPaths::default(), None).unwrap_err();
        assert!(err.contains("/nowhere/Build.sh"));
        assert!(err.contains("--build-tool"));
    }
}
