//! Rebuilder configuration stored in `rebuilder.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::names::DEFAULT_HOST_PROCESS_NAMES;

pub const DEFAULT_CONFIG_FILE: &str = "rebuilder.toml";

/// Rebuilder configuration (TOML).
///
/// Every field has a default so a missing file or a partial file is valid.
/// CLI flags override individual values after loading.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RebuilderConfig {
    /// Pid record location. Defaults to `<project_dir>/Saved/Rebuilder/editor.pid`.
    pub pid_file: Option<PathBuf>,
    pub session: SessionConfig,
    pub build: BuildConfig,
    pub shutdown: ShutdownConfig,
    pub readiness: ReadinessConfig,
    pub process: ProcessConfig,
}

/// Live session endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    /// Per-request timeout for connect, write and read.
    pub command_timeout_ms: u64,
    /// Timeout for a bare port probe.
    pub probe_timeout_ms: u64,
    /// Request key that carries the command name (`type` or `command`).
    pub command_field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    pub timeout_secs: u64,
    /// Characters kept from the end of stdout and stderr.
    pub output_tail_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound on waiting for the session port to close after kill.
    pub port_close_timeout_secs: u64,
    pub port_close_interval_ms: u64,
    /// Probe timeout used while waiting for the port to close.
    pub port_close_probe_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReadinessConfig {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BackendPreference {
    /// Introspection when the platform supports it, image-name otherwise.
    #[default]
    Auto,
    Introspection,
    ImageName,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessConfig {
    pub backend: BackendPreference,
    pub names: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 55557,
            command_timeout_ms: 5_000,
            probe_timeout_ms: 1_000,
            command_field: "type".to_string(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            output_tail_chars: 3_000,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            port_close_timeout_secs: 30,
            port_close_interval_ms: 1_000,
            port_close_probe_ms: 500,
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 180,
            poll_interval_ms: 3_000,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            names: DEFAULT_HOST_PROCESS_NAMES
                .iter()
                .map(|n| n.to_string())
                .collect(),
        }
    }
}

impl SessionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl RebuilderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.session.host.trim().is_empty() {
            return Err(anyhow!("session.host must be non-empty"));
        }
        if self.session.port == 0 {
            return Err(anyhow!("session.port must be > 0"));
        }
        if self.session.command_timeout_ms == 0 || self.session.probe_timeout_ms == 0 {
            return Err(anyhow!("session timeouts must be > 0"));
        }
        if !matches!(self.session.command_field.as_str(), "type" | "command") {
            return Err(anyhow!(
                "session.command_field must be \"type\" or \"command\", got {:?}",
                self.session.command_field
            ));
        }
        if self.build.timeout_secs == 0 {
            return Err(anyhow!("build.timeout_secs must be > 0"));
        }
        if self.build.output_tail_chars == 0 {
            return Err(anyhow!("build.output_tail_chars must be > 0"));
        }
        if self.shutdown.port_close_interval_ms == 0 || self.shutdown.port_close_probe_ms == 0 {
            return Err(anyhow!("shutdown intervals must be > 0"));
        }
        if self.readiness.poll_interval_ms == 0 {
            return Err(anyhow!("readiness.poll_interval_ms must be > 0"));
        }
        if self.process.names.iter().all(|n| n.trim().is_empty()) {
            return Err(anyhow!("process.names must contain at least one name"));
        }
        Ok(())
    }

    /// Explicit `pid_file`, else the per-project default, else none.
    pub fn pid_path(&self, project_dir: Option<&Path>) -> Option<PathBuf> {
        self.pid_file.clone().or_else(|| {
            project_dir.map(|dir| dir.join("Saved").join("Rebuilder").join("editor.pid"))
        })
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RebuilderConfig::default()`.
pub fn load_config(path: &Path) -> Result<RebuilderConfig> {
    if !path.exists() {
        let cfg = RebuilderConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RebuilderConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RebuilderConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RebuilderConfig::default());
        assert_eq!(cfg.session.port, 55557);
        assert_eq!(cfg.build.output_tail_chars, 3000);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rebuilder.toml");
        let mut cfg = RebuilderConfig::default();
        cfg.session.port = 6000;
        cfg.process.backend = BackendPreference::ImageName;
        cfg.pid_file = Some(temp.path().join("editor.pid"));
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rebuilder.toml");
        fs::write(&path, "[session]\nport = 7777\n\n[process]\nbackend = \"image-name\"\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.session.port, 7777);
        assert_eq!(cfg.session.host, "127.0.0.1");
        assert_eq!(cfg.process.backend, BackendPreference::ImageName);
        assert_eq!(cfg.process.names.len(), DEFAULT_HOST_PROCESS_NAMES.len());
    }

    #[test]
    fn rejects_unknown_command_field() {
        let mut cfg = RebuilderConfig::default();
        cfg.session.command_field = "cmd".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("command_field"));
    }

    #[test]
    fn pid_path_prefers_explicit_file() {
        let mut cfg = RebuilderConfig::default();
        let project = Path::new("/work/Shooter");
        assert_eq!(
            cfg.pid_path(Some(project)),
            Some(project.join("Saved/Rebuilder/editor.pid"))
        );
        assert_eq!(cfg.pid_path(None), None);

        cfg.pid_file = Some(PathBuf::from("/tmp/editor.pid"));
        assert_eq!(cfg.pid_path(Some(project)), Some(PathBuf::from("/tmp/editor.pid")));
    }
}
