//! Engine installation discovery and path derivation.
//!
//! Resolution order is fixed: explicit hint, sibling `Engine` directory for
//! source builds, platform registry, `UE_ROOT`, then nothing. Every candidate
//! is validated by the presence of the engine version descriptor, so a stale
//! registry entry or a typo in the hint falls through to the next strategy.

use std::fmt;
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::core::types::current_platform;
use crate::core::version::EngineVersion;
use crate::io::project::ProjectDescriptor;

pub const ENGINE_ROOT_ENV: &str = "UE_ROOT";
/// Attempts the manual prompt allows before giving up.
const MANUAL_PROMPT_ATTEMPTS: usize = 3;

/// Where a resolved engine root came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineSource {
    Hint,
    Sibling,
    Registry,
    RegistryCustom,
    Env,
    Manual,
    NotFound,
}

impl EngineSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineSource::Hint => "hint",
            EngineSource::Sibling => "sibling",
            EngineSource::Registry => "registry",
            EngineSource::RegistryCustom => "registry-custom",
            EngineSource::Env => "env",
            EngineSource::Manual => "manual",
            EngineSource::NotFound => "not-found",
        }
    }
}

impl fmt::Display for EngineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineResolution {
    pub root: Option<PathBuf>,
    pub source: EngineSource,
}

impl EngineResolution {
    pub fn not_found() -> Self {
        Self {
            root: None,
            source: EngineSource::NotFound,
        }
    }

    fn found(root: PathBuf, source: EngineSource) -> Self {
        info!(root = %root.display(), source = source.as_str(), "engine root resolved");
        Self {
            root: Some(root),
            source,
        }
    }
}

/// Installed-engine lookup. Only Windows has a real one.
pub trait EngineRegistry {
    /// `InstalledDirectory` for a launcher association, machine scope first.
    fn installed_directories(&self, association: &str) -> Vec<PathBuf>;

    /// Custom source builds registered by the user, the association's own entry first.
    fn custom_builds(&self, association: &str) -> Vec<PathBuf>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoRegistry;

impl EngineRegistry for NoRegistry {
    fn installed_directories(&self, _association: &str) -> Vec<PathBuf> {
        Vec::new()
    }

    fn custom_builds(&self, _association: &str) -> Vec<PathBuf> {
        Vec::new()
    }
}

#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsRegistry;

#[cfg(windows)]
impl EngineRegistry for WindowsRegistry {
    fn installed_directories(&self, association: &str) -> Vec<PathBuf> {
        use winreg::RegKey;
        use winreg::enums::{HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE};

        if association.is_empty() {
            return Vec::new();
        }
        let subkey = format!("SOFTWARE\\EpicGames\\Unreal Engine\\{association}");
        [HKEY_LOCAL_MACHINE, HKEY_CURRENT_USER]
            .into_iter()
            .filter_map(|hive| RegKey::predef(hive).open_subkey(&subkey).ok())
            .filter_map(|key| key.get_value::<String, _>("InstalledDirectory").ok())
            .map(PathBuf::from)
            .collect()
    }

    fn custom_builds(&self, association: &str) -> Vec<PathBuf> {
        use winreg::RegKey;
        use winreg::enums::HKEY_CURRENT_USER;

        let Ok(builds) = RegKey::predef(HKEY_CURRENT_USER)
            .open_subkey("SOFTWARE\\Epic Games\\Unreal Engine\\Builds")
        else {
            return Vec::new();
        };
        let mut own = Vec::new();
        let mut others = Vec::new();
        for (name, _) in builds.enum_values().filter_map(|v| v.ok()) {
            if let Ok(path) = builds.get_value::<String, _>(&name) {
                if name.eq_ignore_ascii_case(association) {
                    own.push(PathBuf::from(path));
                } else {
                    others.push(PathBuf::from(path));
                }
            }
        }
        own.extend(others);
        own
    }
}

/// The registry for the platform this binary runs on.
pub fn system_registry() -> Box<dyn EngineRegistry> {
    #[cfg(windows)]
    {
        Box::new(WindowsRegistry)
    }
    #[cfg(not(windows))]
    {
        Box::new(NoRegistry)
    }
}

pub struct EngineLocator {
    registry: Box<dyn EngineRegistry>,
    env_root: Option<PathBuf>,
}

impl EngineLocator {
    pub fn new(registry: Box<dyn EngineRegistry>, env_root: Option<PathBuf>) -> Self {
        Self { registry, env_root }
    }

    /// Platform registry plus `UE_ROOT` from the process environment.
    pub fn from_env() -> Self {
        let env_root = std::env::var_os(ENGINE_ROOT_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::new(system_registry(), env_root)
    }

    /// First validated candidate wins.
    pub fn resolve(
        &self,
        project: Option<&ProjectDescriptor>,
        hint: Option<&Path>,
    ) -> EngineResolution {
        if let Some(root) = hint.and_then(validate_root) {
            return EngineResolution::found(root, EngineSource::Hint);
        }
        if let Some(hint) = hint {
            debug!(hint = %hint.display(), "engine hint did not validate");
        }

        if let Some(project) = project {
            if project.is_source_build()
                && let Some(root) = project
                    .project_dir()
                    .parent()
                    .and_then(|parent| validate_root(&parent.join("Engine")))
            {
                return EngineResolution::found(root, EngineSource::Sibling);
            }

            let association = project.engine_association.as_str();
            if let Some(root) = self
                .registry
                .installed_directories(association)
                .iter()
                .find_map(|p| validate_root(p))
            {
                return EngineResolution::found(root, EngineSource::Registry);
            }
            if let Some(root) = self
                .registry
                .custom_builds(association)
                .iter()
                .find_map(|p| validate_root(p))
            {
                return EngineResolution::found(root, EngineSource::RegistryCustom);
            }
        }

        if let Some(root) = self.env_root.as_deref().and_then(validate_root) {
            return EngineResolution::found(root, EngineSource::Env);
        }

        debug!("no engine root candidate validated");
        EngineResolution::not_found()
    }
}

/// Engine root for `candidate`, which may be the root itself or its `Engine` directory.
pub fn validate_root(candidate: &Path) -> Option<PathBuf> {
    if version_file(candidate).is_file() {
        return Some(candidate.to_path_buf());
    }
    if candidate.join("Build").join("Build.version").is_file() {
        return candidate.parent().map(Path::to_path_buf);
    }
    None
}

fn version_file(root: &Path) -> PathBuf {
    root.join("Engine").join("Build").join("Build.version")
}

/// Absent or unreadable descriptors yield `None`.
pub fn read_version(root: &Path) -> Option<EngineVersion> {
    let path = version_file(root);
    let raw = fs::read_to_string(&path).ok()?;
    let version = EngineVersion::parse(&raw);
    if version.is_none() {
        debug!(path = %path.display(), "engine version descriptor unreadable");
    }
    version
}

pub fn engine_dir(root: &Path) -> PathBuf {
    root.join("Engine")
}

/// Build tool candidates for an `Engine` directory, preferred first.
pub fn build_tool_candidates(engine_dir: &Path) -> Vec<PathBuf> {
    let dll = engine_dir
        .join("Binaries")
        .join("DotNET")
        .join("UnrealBuildTool")
        .join("UnrealBuildTool.dll");
    let batch = engine_dir.join("Build").join("BatchFiles");
    let script = match current_platform() {
        "Win64" => batch.join("Build.bat"),
        "Mac" => batch.join("Mac").join("Build.sh"),
        _ => batch.join("Linux").join("Build.sh"),
    };
    vec![dll, script]
}

pub fn build_tool_path(engine_dir: &Path) -> Option<PathBuf> {
    build_tool_candidates(engine_dir)
        .into_iter()
        .find(|p| p.is_file())
}

/// Editor executable candidates for an `Engine` directory, newest naming first.
pub fn editor_candidates(engine_dir: &Path) -> Vec<PathBuf> {
    let bin = engine_dir.join("Binaries").join(current_platform());
    let ext = if cfg!(windows) { ".exe" } else { "" };
    ["UnrealEditor", "UE5Editor", "UE4Editor"]
        .iter()
        .map(|stem| bin.join(format!("{stem}{ext}")))
        .collect()
}

pub fn editor_path(engine_dir: &Path) -> Option<PathBuf> {
    editor_candidates(engine_dir).into_iter().find(|p| p.is_file())
}

/// Ask a human for an engine root until one validates, the input ends, or attempts run out.
pub fn prompt_manual_root<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
) -> Result<EngineResolution> {
    for _ in 0..MANUAL_PROMPT_ATTEMPTS {
        write!(output, "Engine root (directory containing Engine/, empty to skip): ")
            .context("write prompt")?;
        output.flush().context("flush prompt")?;

        let mut line = String::new();
        if input.read_line(&mut line).context("read engine root")? == 0 {
            break;
        }
        let entered = line.trim().trim_matches('"');
        if entered.is_empty() {
            break;
        }
        match validate_root(Path::new(entered)) {
            Some(root) => return Ok(EngineResolution::found(root, EngineSource::Manual)),
            None => writeln!(output, "No Engine/Build/Build.version under {entered}")
                .context("write prompt")?,
        }
    }
    Ok(EngineResolution::not_found())
}
