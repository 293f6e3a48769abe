//! Shared deterministic types for the rebuild pipeline.
//!
//! These types are the contracts between the orchestrator and its
//! collaborators. They carry no I/O and are immutable once produced.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Suffix appended to the project name to form the default editor target.
pub const EDITOR_TARGET_SUFFIX: &str = "Editor";
/// Target used when no project file is known.
pub const FALLBACK_TARGET: &str = "UnrealEditor";

/// Build configuration understood by the build tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BuildConfiguration {
    Debug,
    DebugGame,
    #[default]
    Development,
    Test,
    Shipping,
}

impl BuildConfiguration {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildConfiguration::Debug => "Debug",
            BuildConfiguration::DebugGame => "DebugGame",
            BuildConfiguration::Development => "Development",
            BuildConfiguration::Test => "Test",
            BuildConfiguration::Shipping => "Shipping",
        }
    }

    pub fn all() -> &'static [BuildConfiguration] {
        &[
            BuildConfiguration::Debug,
            BuildConfiguration::DebugGame,
            BuildConfiguration::Development,
            BuildConfiguration::Test,
            BuildConfiguration::Shipping,
        ]
    }
}

impl fmt::Display for BuildConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildConfiguration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuildConfiguration::all()
            .iter()
            .copied()
            .find(|cfg| cfg.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<&str> = BuildConfiguration::all()
                    .iter()
                    .map(BuildConfiguration::as_str)
                    .collect();
                format!("unknown configuration '{s}' (expected one of {})", known.join(", "))
            })
    }
}

/// Platform identifier the build tool expects for the host running this binary.
pub fn current_platform() -> &'static str {
    if cfg!(windows) {
        "Win64"
    } else if cfg!(target_os = "macos") {
        "Mac"
    } else {
        "Linux"
    }
}

/// Parameters for a single build invocation, minus the tool and project paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub target: String,
    pub configuration: BuildConfiguration,
    pub platform: String,
    /// Whitespace-split extra arguments appended after the fixed flags.
    pub extra_args: Vec<String>,
}

impl BuildRequest {
    /// Build a request, deriving the target from the project file name when not supplied.
    pub fn new(
        target: Option<&str>,
        project_file: Option<&Path>,
        configuration: BuildConfiguration,
        platform: Option<&str>,
        extra_args: Option<&str>,
    ) -> Self {
        let target = match target.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t.to_string(),
            None => default_target(project_file),
        };
        let platform = platform
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(current_platform())
            .to_string();
        Self {
            target,
            configuration,
            platform,
            extra_args: split_extra_args(extra_args),
        }
    }
}

/// `<ProjectName>Editor`, or `UnrealEditor` when no project file is known.
pub fn default_target(project_file: Option<&Path>) -> String {
    project_file
        .and_then(Path::file_stem)
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .map(|stem| format!("{stem}{EDITOR_TARGET_SUFFIX}"))
        .unwrap_or_else(|| FALLBACK_TARGET.to_string())
}

fn split_extra_args(extra: Option<&str>) -> Vec<String> {
    extra
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// How the build tool process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildOutcome {
    /// Process exited on its own. Signal termination is reported as `-1`.
    Exited { code: i32 },
    /// Process exceeded the wall-clock limit and was killed.
    TimedOut { after_secs: u64 },
}

/// Captured result of one build tool run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildResult {
    pub command: Vec<String>,
    pub outcome: BuildOutcome,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub duration_ms: u64,
}

impl BuildResult {
    /// Determined by outcome alone, never by output text.
    pub fn success(&self) -> bool {
        matches!(self.outcome, BuildOutcome::Exited { code: 0 })
    }

    pub fn return_code(&self) -> Option<i32> {
        match self.outcome {
            BuildOutcome::Exited { code } => Some(code),
            BuildOutcome::TimedOut { .. } => None,
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.outcome, BuildOutcome::TimedOut { .. })
    }

    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Five-dimension readiness snapshot. Built fresh on every poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadinessStatus {
    /// Advisory: a host process was seen. Always false when introspection is unavailable.
    pub process_detected: bool,
    pub port_open: bool,
    pub ping_acknowledged: bool,
    pub session_loaded: bool,
    pub overall_ready: bool,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub details: ReadinessDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadinessDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_note: Option<String>,
}

impl ReadinessStatus {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Recompute `overall_ready` from the gating dimensions.
    pub fn settle(&mut self) {
        self.overall_ready = self.port_open && self.ping_acknowledged && self.session_loaded;
    }
}

/// A running host process as seen by the introspection backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessHandle {
    pub pid: u32,
    pub name: String,
}

/// Best-effort kill summary. Errors never abort the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KillReport {
    pub killed: Vec<String>,
    pub errors: Vec<String>,
}

impl KillReport {
    pub fn merge(&mut self, other: KillReport) {
        self.killed.extend(other.killed);
        self.errors.extend(other.errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn default_target_uses_project_stem() {
        let project = PathBuf::from("/work/Shooter/Shooter.uproject");
        assert_eq!(default_target(Some(&project)), "ShooterEditor");
        assert_eq!(default_target(None), "UnrealEditor");
    }

    #[test]
    fn build_request_prefers_explicit_target_and_splits_args() {
        let req = BuildRequest::new(
            Some("Game"),
            Some(Path::new("/p/Shooter.uproject")),
            BuildConfiguration::Shipping,
            Some("Win64"),
            Some(" -Verbose   -NoUBA "),
        );
        assert_eq!(req.target, "Game");
        assert_eq!(req.platform, "Win64");
        assert_eq!(req.extra_args, vec!["-Verbose", "-NoUBA"]);
    }

    #[test]
    fn blank_target_falls_back_to_default() {
        let req = BuildRequest::new(
            Some("  "),
            Some(Path::new("/p/Shooter.uproject")),
            BuildConfiguration::Development,
            None,
            None,
        );
        assert_eq!(req.target, "ShooterEditor");
        assert_eq!(req.platform, current_platform());
        assert!(req.extra_args.is_empty());
    }

    #[test]
    fn configuration_parses_case_insensitively() {
        assert_eq!(
            "debuggame".parse::<BuildConfiguration>(),
            Ok(BuildConfiguration::DebugGame)
        );
        let err = "Release".parse::<BuildConfiguration>().unwrap_err();
        assert!(err.contains("Development"));
    }

    #[test]
    fn success_follows_outcome_only() {
        let mut result = BuildResult {
            command: vec!["tool".to_string()],
            outcome: BuildOutcome::Exited { code: 0 },
            stdout_tail: "error: looks bad".to_string(),
            stderr_tail: String::new(),
            duration_ms: 1,
        };
        assert!(result.success());
        assert_eq!(result.return_code(), Some(0));

        result.outcome = BuildOutcome::TimedOut { after_secs: 600 };
        assert!(!result.success());
        assert!(result.timed_out());
        assert_eq!(result.return_code(), None);
    }
}
