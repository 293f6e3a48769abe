//! Unattended build-and-restart orchestrator for a live editor session.
//!
//! `rebuilder rebuild` saves, stops, cleans, rebuilds, relaunches and waits
//! for the editor. The other subcommands expose the individual steps.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use rebuilder::core::reply::reply_str;
use rebuilder::core::session::{Phase, PhaseRecord};
use rebuilder::core::types::{BuildConfiguration, KillReport, ReadinessStatus};
use rebuilder::exit_codes;
use rebuilder::io::build::ToolBuildInvoker;
use rebuilder::io::client::{SessionClient, TcpSessionClient};
use rebuilder::io::config::{DEFAULT_CONFIG_FILE, RebuilderConfig, load_config};
use rebuilder::io::engine::{self, EngineLocator, EngineResolution, EngineSource};
use rebuilder::io::kill::ProcessController;
use rebuilder::io::launcher::{DetachedLauncher, Launcher};
use rebuilder::io::pid_store::{FilePidStore, PidStore};
use rebuilder::io::project::{ProjectDescriptor, find_project_upward, resolve_project_path};
use rebuilder::io::readiness::ReadinessPoller;
use rebuilder::logging;
use rebuilder::rebuild::{Progress, RebuildDeps, RebuildOptions, RebuildReport, run_rebuild};
use rebuilder::smoke::{builtin_commands, load_script, run_smoke};

#[derive(Parser)]
#[command(
    name = "rebuilder",
    version,
    about = "Stop, rebuild and relaunch a live editor session unattended"
)]
struct Cli {
    /// Settings file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    settings: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Save, kill, clean, build, relaunch and wait for the editor.
    Rebuild(RebuildArgs),
    /// Print the readiness matrix once.
    Status {
        #[arg(long)]
        port: Option<u16>,
        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Poll until the editor is ready or the timeout passes.
    Wait {
        #[arg(long)]
        port: Option<u16>,
        /// Seconds to wait before giving up.
        #[arg(long)]
        timeout: Option<u64>,
        /// Seconds between polls.
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Force-kill every editor process.
    Kill,
    /// Launch the editor detached and record its pid.
    Launch {
        #[arg(long)]
        project: Option<PathBuf>,
        #[arg(long)]
        editor: Option<PathBuf>,
        #[arg(long)]
        engine_root: Option<PathBuf>,
    },
    /// Show project and engine installation details.
    Engine {
        /// Project file or directory containing one.
        #[arg(long)]
        project: Option<PathBuf>,
        #[arg(long)]
        engine_root: Option<PathBuf>,
        /// Ask for the engine root when discovery fails.
        #[arg(long)]
        interactive: bool,
    },
    /// Run a batch of commands against the live session.
    Smoke {
        /// JSON array of `{"type": ..., "params": {...}}` objects.
        script: Option<PathBuf>,
        /// Run the built-in read-only command list.
        #[arg(long, conflicts_with = "script")]
        builtin: bool,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Args)]
struct RebuildArgs {
    /// Project file (`.uproject`). Detected from the session or the working directory otherwise.
    #[arg(long)]
    project: Option<PathBuf>,
    /// Build tool to run instead of the derived one.
    #[arg(long)]
    build_tool: Option<PathBuf>,
    /// Editor executable to relaunch instead of the derived one.
    #[arg(long)]
    editor: Option<PathBuf>,
    #[arg(long)]
    engine_root: Option<PathBuf>,
    /// Build target. Defaults to `<Project>Editor`.
    #[arg(long)]
    target: Option<String>,
    #[arg(long = "config", default_value = "Development")]
    configuration: BuildConfiguration,
    #[arg(long)]
    platform: Option<String>,
    /// Extra arguments for the build tool, split on whitespace.
    #[arg(long, allow_hyphen_values = true)]
    extra_args: Option<String>,
    /// Do not relaunch the editor after a successful build.
    #[arg(long)]
    no_launch: bool,
    /// Relaunch but do not wait for readiness.
    #[arg(long)]
    no_wait: bool,
    /// Seconds to wait for readiness after relaunch.
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    port: Option<u16>,
    /// Print the final report as JSON instead of progress lines.
    #[arg(long)]
    json: bool,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILURE);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.settings)?;
    match cli.command {
        Command::Rebuild(args) => cmd_rebuild(cfg, args),
        Command::Status { port, json } => cmd_status(with_port(cfg, port), json),
        Command::Wait {
            port,
            timeout,
            interval,
        } => cmd_wait(with_port(cfg, port), timeout, interval),
        Command::Kill => cmd_kill(&cfg),
        Command::Launch {
            project,
            editor,
            engine_root,
        } => cmd_launch(&cfg, project, editor, engine_root),
        Command::Engine {
            project,
            engine_root,
            interactive,
        } => cmd_engine(project, engine_root, interactive),
        Command::Smoke {
            script,
            builtin,
            port,
        } => cmd_smoke(with_port(cfg, port), script, builtin),
    }
}

fn with_port(mut cfg: RebuilderConfig, port: Option<u16>) -> RebuilderConfig {
    if let Some(port) = port {
        cfg.session.port = port;
    }
    cfg
}

fn process_controller(cfg: &RebuilderConfig) -> ProcessController {
    ProcessController::select(cfg.process.backend, cfg.process.names.clone())
}

fn cmd_rebuild(cfg: RebuilderConfig, args: RebuildArgs) -> Result<i32> {
    let cfg = with_port(cfg, args.port);
    let project_file = args
        .project
        .as_deref()
        .map(resolve_project_path)
        .transpose()?;
    let opts = RebuildOptions {
        project_file,
        build_tool: args.build_tool,
        editor: args.editor,
        engine_root: args.engine_root,
        target: args.target,
        configuration: args.configuration,
        platform: args.platform,
        extra_args: args.extra_args,
        relaunch: !args.no_launch,
        wait_ready: !args.no_wait,
        ready_timeout: Duration::from_secs(args.timeout.unwrap_or(cfg.readiness.timeout_secs)),
        search_from: std::env::current_dir().ok(),
    };

    let client = TcpSessionClient::from_config(&cfg.session);
    let processes = process_controller(&cfg);
    let locator = EngineLocator::from_env();
    let deps = RebuildDeps {
        client: &client,
        processes: &processes,
        locator: &locator,
        builder: &ToolBuildInvoker,
        launcher: &DetachedLauncher,
        pid_store: None,
    };

    let json = args.json;
    let mut progress = |event: Progress<'_>| {
        if json {
            return;
        }
        match event {
            Progress::Started(phase) => println!("[{phase}] ..."),
            Progress::Finished(record) => println!("[{}] {}", record.phase, record.outcome),
        }
    };
    let report = run_rebuild(&opts, &deps, &cfg, &mut progress);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize report")?
        );
    } else {
        print_summary(&report);
    }
    Ok(report.exit_code())
}

fn print_summary(report: &RebuildReport) {
    println!();
    println!("Summary:");
    for PhaseRecord { phase, outcome } in report.steps.records() {
        println!("  {:<17} {outcome}", phase.as_str());
    }
    if let Some(build) = &report.build {
        println!("Build command: {}", build.command_line());
        if !build.success() {
            print_tail("stdout", &build.stdout_tail);
            print_tail("stderr", &build.stderr_tail);
        }
    }
    match (report.success, report.terminal, report.ready) {
        (false, _, _) => println!(
            "Rebuild FAILED: {}",
            report.error.as_deref().unwrap_or("unknown error")
        ),
        (true, Phase::RelaunchSkipped, _) => println!("Rebuild OK (editor not relaunched)"),
        (true, _, Some(false)) => println!("Rebuild OK (editor not confirmed ready)"),
        (true, _, _) => println!("Rebuild OK"),
    }
}

fn print_tail(label: &str, tail: &str) {
    if tail.trim().is_empty() {
        return;
    }
    println!("--- build {label} (tail) ---");
    println!("{}", tail.trim_end());
}

fn print_status(status: &ReadinessStatus) {
    let mark = |ok: bool| if ok { "yes" } else { "no" };
    println!("process detected  {}", mark(status.process_detected));
    println!("port open         {}", mark(status.port_open));
    println!("ping              {}", mark(status.ping_acknowledged));
    println!("session loaded    {}", mark(status.session_loaded));
    println!("ready             {}", mark(status.overall_ready));
    if let Some(pid) = status.details.pid {
        println!("pid               {pid}");
    }
    if let Some(level) = &status.details.level_name {
        println!("level             {level}");
    }
    if let Some(note) = &status.details.process_note {
        println!("note              {note}");
    }
}

fn ready_code(status: &ReadinessStatus) -> i32 {
    if status.overall_ready {
        exit_codes::OK
    } else {
        exit_codes::FAILURE
    }
}

fn cmd_status(cfg: RebuilderConfig, json: bool) -> Result<i32> {
    let client = TcpSessionClient::from_config(&cfg.session);
    let processes = process_controller(&cfg);
    let status = ReadinessPoller::new(&client, Some(&processes), &cfg.session).check_once();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("serialize status")?
        );
    } else {
        println!("Session {}", client.address());
        print_status(&status);
    }
    Ok(ready_code(&status))
}

fn cmd_wait(cfg: RebuilderConfig, timeout: Option<u64>, interval: Option<u64>) -> Result<i32> {
    let client = TcpSessionClient::from_config(&cfg.session);
    let processes = process_controller(&cfg);
    let timeout = Duration::from_secs(timeout.unwrap_or(cfg.readiness.timeout_secs));
    let interval = interval
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_millis(cfg.readiness.poll_interval_ms));
    println!(
        "Waiting up to {}s for {} ...",
        timeout.as_secs(),
        client.address()
    );
    let status = ReadinessPoller::new(&client, Some(&processes), &cfg.session)
        .wait_ready(timeout, interval.max(Duration::from_millis(100)));
    print_status(&status);
    println!(
        "{} attempt(s), {:.1}s",
        status.attempts,
        status.elapsed().as_secs_f64()
    );
    Ok(ready_code(&status))
}

fn local_project() -> Option<PathBuf> {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| find_project_upward(&cwd))
}

fn pid_store_for(cfg: &RebuilderConfig, project_file: Option<&Path>) -> Option<FilePidStore> {
    cfg.pid_path(project_file.and_then(Path::parent))
        .map(FilePidStore::new)
}

fn cmd_kill(cfg: &RebuilderConfig) -> Result<i32> {
    let processes = process_controller(cfg);
    let project = local_project();
    let store = pid_store_for(cfg, project.as_deref());

    let mut report = KillReport::default();
    if let Some(pid) = store.as_ref().and_then(|s| s.load()) {
        report.merge(processes.kill_pid(pid));
    }
    report.merge(processes.kill_all());
    if let Some(Err(err)) = store.as_ref().map(|s| s.clear()) {
        report.errors.push(format!("{err:#}"));
    }

    if report.killed.is_empty() {
        println!("No editor processes running ({} backend)", processes.backend_name());
    }
    for killed in &report.killed {
        println!("killed {killed}");
    }
    for err in &report.errors {
        println!("error  {err}");
    }
    Ok(exit_codes::OK)
}

/// Engine directory reported by a reachable session.
fn session_engine_dir(cfg: &RebuilderConfig) -> Option<PathBuf> {
    let client = TcpSessionClient::from_config(&cfg.session);
    let reply = client
        .send("get_engine_path", Value::Null, cfg.session.command_timeout())
        .ok()?;
    reply_str(&reply, "engine_dir").map(PathBuf::from)
}

fn cmd_launch(
    cfg: &RebuilderConfig,
    project: Option<PathBuf>,
    editor: Option<PathBuf>,
    engine_root: Option<PathBuf>,
) -> Result<i32> {
    let project_file = match project {
        Some(path) => Some(resolve_project_path(&path)?),
        None => local_project(),
    };
    let executable = match editor {
        Some(editor) => Some(editor),
        None => {
            let descriptor = project_file
                .as_deref()
                .and_then(|p| ProjectDescriptor::load(p).ok());
            let resolved = EngineLocator::from_env()
                .resolve(descriptor.as_ref(), engine_root.as_deref())
                .root
                .map(|root| engine::engine_dir(&root));
            resolved
                .or_else(|| session_engine_dir(cfg))
                .and_then(|dir| engine::editor_path(&dir))
        }
    };
    let Some(executable) = executable else {
        eprintln!("No editor executable found; pass --editor or --engine-root");
        return Ok(exit_codes::FAILURE);
    };

    let pid = DetachedLauncher.launch(&executable, project_file.as_deref())?;
    println!("Launched {} (pid {pid})", executable.display());
    if let Some(store) = pid_store_for(cfg, project_file.as_deref()) {
        store
            .save(pid)
            .with_context(|| format!("record pid in {}", store.path().display()))?;
        println!("Pid recorded in {}", store.path().display());
    }
    Ok(exit_codes::OK)
}

fn cmd_engine(
    project: Option<PathBuf>,
    engine_root: Option<PathBuf>,
    interactive: bool,
) -> Result<i32> {
    let project_file = match project {
        Some(path) => Some(resolve_project_path(&path)?),
        None => local_project(),
    };
    let descriptor = project_file
        .as_deref()
        .map(ProjectDescriptor::load)
        .transpose()?;

    if let Some(project) = &descriptor {
        println!("Project      {}", project.name());
        println!("File         {}", project.path.display());
        let association = if project.engine_association.is_empty() {
            "(none)"
        } else {
            project.engine_association.as_str()
        };
        println!("Association  {association}");
        println!("Build type   {}", build_type(project));
        for module in &project.modules {
            println!("Module       {} ({}, {})", module.name, module.kind, module.loading_phase);
        }
        for plugin in &project.plugins {
            let state = if plugin.enabled { "enabled" } else { "disabled" };
            println!("Plugin       {} ({state})", plugin.name);
        }
    } else {
        println!("Project      (none found)");
    }

    let mut resolution =
        EngineLocator::from_env().resolve(descriptor.as_ref(), engine_root.as_deref());
    if resolution.source == EngineSource::NotFound && interactive {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        resolution = engine::prompt_manual_root(&mut input, &mut io::stdout())?;
    }
    print_engine(&resolution);
    Ok(if resolution.root.is_some() {
        exit_codes::OK
    } else {
        exit_codes::FAILURE
    })
}

fn build_type(project: &ProjectDescriptor) -> &'static str {
    if project.is_source_build() {
        "source (engine next to project)"
    } else if project.engine_association.starts_with('{') {
        "custom source build"
    } else {
        "launcher install"
    }
}

fn print_engine(resolution: &EngineResolution) {
    let Some(root) = &resolution.root else {
        println!("Engine root  not found (pass --engine-root, set UE_ROOT, or use --interactive)");
        return;
    };
    println!("Engine root  {} [{}]", root.display(), resolution.source);
    match engine::read_version(root) {
        Some(version) if version.branch.is_empty() => println!("Version      {version}"),
        Some(version) => println!("Version      {version} ({})", version.branch),
        None => println!("Version      unknown"),
    }
    let engine_dir = engine::engine_dir(root);
    let show = |path: Option<PathBuf>| {
        path.map(|p| p.display().to_string())
            .unwrap_or_else(|| "not found".to_string())
    };
    println!("Build tool   {}", show(engine::build_tool_path(&engine_dir)));
    println!("Editor       {}", show(engine::editor_path(&engine_dir)));
}

fn cmd_smoke(cfg: RebuilderConfig, script: Option<PathBuf>, builtin: bool) -> Result<i32> {
    let commands = match script {
        Some(path) if !builtin => load_script(&path)?,
        _ => builtin_commands(),
    };
    let client = TcpSessionClient::from_config(&cfg.session);
    println!("Running {} command(s) against {}", commands.len(), client.address());
    let summary = run_smoke(
        &client,
        &commands,
        cfg.session.command_timeout(),
        &mut |outcome| {
            let mark = if outcome.ok { "OK  " } else { "FAIL" };
            println!(
                "{mark} {} ({} ms): {}",
                outcome.command, outcome.elapsed_ms, outcome.preview
            );
        },
    );
    println!("{}/{} passed", summary.passed(), summary.outcomes.len());
    Ok(summary.exit_code())
}
