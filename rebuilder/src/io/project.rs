//! Project descriptor (`*.uproject`) loading and discovery.

use std::fs;
use std::env;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const PROJECT_EXTENSION: &str = "uproject";
/// Directories examined when searching upward for a project file, including the start.
pub const PROJECT_SEARCH_DEPTH: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "LoadingPhase", default)]
    pub loading_phase: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Enabled", default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawDescriptor {
    #[serde(rename = "EngineAssociation", default)]
    engine_association: String,
    #[serde(rename = "Modules", default)]
    modules: Vec<ModuleEntry>,
    #[serde(rename = "Plugins", default)]
    plugins: Vec<PluginEntry>,
}

/// A parsed project file. Read once per run and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectDescriptor {
    pub path: PathBuf,
    /// Empty for a source-built engine next to the project, otherwise an install key.
    pub engine_association: String,
    pub modules: Vec<ModuleEntry>,
    pub plugins: Vec<PluginEntry>,
}

impl ProjectDescriptor {
    /// Load a descriptor. A relative `path` is anchored at the working directory.
    pub fn load(path: &Path) -> Result<Self> {
        let path = &absolute(path)?;
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let raw: RawDescriptor = serde_json::from_str(&contents)
            .with_context(|| format!("parse project descriptor {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            engine_association: raw.engine_association.trim().to_string(),
            modules: raw.modules,
            plugins: raw.plugins,
        })
    }

    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn project_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn is_source_build(&self) -> bool {
        self.engine_association.is_empty()
    }
}

/// Accept either a project file or a directory containing exactly one.
pub fn resolve_project_path(path: &Path) -> Result<PathBuf> {
    let path = &absolute(path)?;
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if path.is_dir() {
        let mut found = project_files_in(path)?;
        return match found.len() {
            0 => bail!("no .{PROJECT_EXTENSION} file in {}", path.display()),
            1 => Ok(found.remove(0)),
            _ => bail!(
                "multiple .{PROJECT_EXTENSION} files in {}; pass one explicitly",
                path.display()
            ),
        };
    }
    bail!("project path does not exist: {}", path.display())
}

/// Walk upward from `start` looking for a project file.
pub fn find_project_upward(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    for _ in 0..PROJECT_SEARCH_DEPTH {
        let current = dir?;
        match project_files_in(current) {
            Ok(files) if !files.is_empty() => {
                debug!(dir = %current.display(), "project file found");
                return files.into_iter().next();
            }
            Ok(_) => {}
            Err(err) => debug!(dir = %current.display(), err = %err, "skipping unreadable directory"),
        }
        dir = current.parent();
    }
    None
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(absolute_from(path, Path::new("")));
    }
    let cwd = env::current_dir().context("read current directory")?;
    Ok(absolute_from(path, &cwd))
}

/// Join `path` onto `base` and fold `.` and `..` components lexically.
pub fn absolute_from(path: &Path, base: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in base.join(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn project_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.with_context(|| format!("read dir entry in {}", dir.display()))?.path();
        let is_project = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(PROJECT_EXTENSION));
        if is_project && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"{
        "FileVersion": 3,
        "EngineAssociation": "5.3",
        "Modules": [{"Name": "Shooter", "Type": "Runtime", "LoadingPhase": "Default"}],
        "Plugins": [{"Name": "UnrealMCP", "Enabled": true}, {"Name": "Paper2D"}]
    }"#;

    #[test]
    fn loads_association_modules_and_plugins() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("Shooter.uproject");
        fs::write(&path, DESCRIPTOR).expect("write");

        let project = ProjectDescriptor::load(&path).expect("load");
        assert_eq!(project.name(), "Shooter");
        assert_eq!(project.engine_association, "5.3");
        assert!(!project.is_source_build());
        assert_eq!(project.modules[0].kind, "Runtime");
        assert!(project.plugins[0].enabled);
        assert!(!project.plugins[1].enabled);
        assert_eq!(project.project_dir(), temp.path());
    }

    #[test]
    fn missing_association_is_source_build() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("Game.uproject");
        fs::write(&path, r#"{"FileVersion": 3}"#).expect("write");
        assert!(ProjectDescriptor::load(&path).expect("load").is_source_build());
    }

    #[test]
    fn finds_project_in_ancestor() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("Game.uproject"), "{}").expect("write");
        let nested = temp.path().join("Source/Game/Private");
        fs::create_dir_all(&nested).expect("mkdir");

        let found = find_project_upward(&nested).expect("found");
        assert_eq!(found, temp.path().join("Game.uproject"));
    }

    #[test]
    fn upward_search_is_bounded() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("Game.uproject"), "{}").expect("write");
        let deep = temp.path().join("a/b/c/d/e");
        fs::create_dir_all(&deep).expect("mkdir");
        assert_eq!(find_project_upward(&deep), None);
    }

    #[test]
    fn relative_paths_are_anchored_at_the_base() {
        let base = Path::new("/work/Game");
        assert_eq!(
            absolute_from(Path::new("Game.uproject"), base),
            Path::new("/work/Game/Game.uproject")
        );
        assert_eq!(absolute_from(Path::new("."), base), base);
        assert_eq!(
            absolute_from(Path::new("../Other/./Other.uproject"), base),
            Path::new("/work/Other/Other.uproject")
        );
        assert_eq!(
            absolute_from(Path::new("/abs/Game/../Game.uproject"), base),
            Path::new("/abs/Game.uproject")
        );
    }

    #[test]
    fn directory_with_two_projects_is_ambiguous() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("A.uproject"), "{}").expect("write");
        fs::write(temp.path().join("B.uproject"), "{}").expect("write");
        let err = resolve_project_path(temp.path()).unwrap_err();
        assert!(err.to_string().contains("multiple"));
    }
}
