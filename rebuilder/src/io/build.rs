//! Build tool invocation.
//!
//! The [`BuildRunner`] trait decouples the rebuild pipeline from the real
//! build tool. Tests use scripted runners that return predetermined results
//! without spawning processes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{info, instrument, warn};

use crate::core::types::{BuildOutcome, BuildRequest, BuildResult};
use crate::io::process::run_command_with_timeout;

/// Managed build tools ship as a `.dll` and run through this host.
const DOTNET_HOST: &str = "dotnet";

/// Everything needed for one build tool run.
#[derive(Debug, Clone)]
pub struct BuildInvocation {
    pub tool: PathBuf,
    pub project_file: Option<PathBuf>,
    pub request: BuildRequest,
    pub timeout: Duration,
    /// Characters kept from the end of each output stream.
    pub tail_chars: usize,
}

impl BuildInvocation {
    /// Full argv, including the `dotnet` host for managed tools.
    pub fn command_line(&self) -> Vec<String> {
        let mut argv = Vec::new();
        if is_managed_tool(&self.tool) {
            argv.push(DOTNET_HOST.to_string());
        }
        argv.push(self.tool.display().to_string());
        argv.push(self.request.target.clone());
        argv.push(self.request.platform.clone());
        argv.push(self.request.configuration.as_str().to_string());
        if let Some(project) = &self.project_file {
            argv.push(format!("-Project={}", project.display()));
        }
        argv.push("-WaitMutex".to_string());
        argv.push("-NoHotReloadFromIDE".to_string());
        argv.extend(self.request.extra_args.iter().cloned());
        argv
    }
}

/// Abstraction over build execution.
pub trait BuildRunner {
    /// Run the build once. A nonzero exit or timeout is a normal `Ok` result;
    /// only a failure to start the tool is an error.
    fn run(&self, invocation: &BuildInvocation) -> Result<BuildResult>;
}

/// Runs the real build tool as a blocking subprocess.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolBuildInvoker;

impl BuildRunner for ToolBuildInvoker {
    #[instrument(skip_all, fields(target = %invocation.request.target, timeout_secs = invocation.timeout.as_secs()))]
    fn run(&self, invocation: &BuildInvocation) -> Result<BuildResult> {
        if !invocation.tool.is_file() {
            bail!("build tool not found at {}", invocation.tool.display());
        }
        let argv = invocation.command_line();
        let Some((program, args)) = argv.split_first() else {
            bail!("empty build command");
        };
        info!(command = %argv.join(" "), "running build tool");

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = invocation.tool.parent() {
            cmd.current_dir(dir);
        }

        let output = run_command_with_timeout(cmd, invocation.timeout, invocation.tail_chars)?;
        let outcome = if output.timed_out {
            warn!(timeout_secs = invocation.timeout.as_secs(), "build timed out");
            BuildOutcome::TimedOut {
                after_secs: invocation.timeout.as_secs(),
            }
        } else {
            BuildOutcome::Exited {
                code: output.code(),
            }
        };
        info!(?outcome, elapsed_ms = output.elapsed.as_millis() as u64, "build finished");

        Ok(BuildResult {
            command: argv,
            outcome,
            stdout_tail: output.stdout_tail,
            stderr_tail: output.stderr_tail,
            duration_ms: output.elapsed.as_millis() as u64,
        })
    }
}

fn is_managed_tool(tool: &Path) -> bool {
    tool.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("dll"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::BuildConfiguration;

    fn invocation(tool: &str, project: Option<&str>) -> BuildInvocation {
        BuildInvocation {
            tool: PathBuf::from(tool),
            project_file: project.map(PathBuf::from),
            request: BuildRequest::new(
                None,
                project.map(Path::new),
                BuildConfiguration::Development,
                Some("Win64"),
                Some("-NoUBA"),
            ),
            timeout: Duration::from_secs(1),
            tail_chars: 100,
        }
    }

    #[test]
    fn argument_shape_for_batch_script() {
        let inv = invocation("/ue/Engine/Build/BatchFiles/Build.bat", Some("/p/Shooter.uproject"));
        assert_eq!(
            inv.command_line(),
            vec![
                "/ue/Engine/Build/BatchFiles/Build.bat",
                "ShooterEditor",
                "Win64",
                "Development",
                "-Project=/p/Shooter.uproject",
                "-WaitMutex",
                "-NoHotReloadFromIDE",
                "-NoUBA",
            ]
        );
    }

    #[test]
    fn managed_tool_runs_through_dotnet() {
        let inv = invocation("/ue/UnrealBuildTool.DLL", None);
        let argv = inv.command_line();
        assert_eq!(argv[0], "dotnet");
        assert_eq!(argv[2], "UnrealEditor");
        assert!(!argv.iter().any(|a| a.starts_with("-Project=")));
    }

    #[test]
    fn missing_tool_is_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = temp.path().join("Build.sh");
        let mut inv = invocation("unused", None);
        inv.tool = tool;
        let err = ToolBuildInvoker.run(&inv).unwrap_err();
        assert!(err.to_string().contains("build tool not found"));
    }
}
