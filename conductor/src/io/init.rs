//! Initialization helpers for `.conductor/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{EngineConfig, write_config};

/// All canonical paths within `.conductor/` for a project root.
#[derive(Debug, Clone)]
pub struct ConductorPaths {
    pub root: PathBuf,
    pub conductor_dir: PathBuf,
    pub conversations_dir: PathBuf,
    pub tasks_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
}

impl ConductorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let conductor_dir = root.join(".conductor");
        Self {
            root: root.clone(),
            conductor_dir: conductor_dir.clone(),
            conversations_dir: conductor_dir.join("conversations"),
            tasks_dir: conductor_dir.join("tasks"),
            scratch_dir: conductor_dir.join("scratch"),
            gitignore_path: conductor_dir.join(".gitignore"),
            config_path: conductor_dir.join("config.toml"),
        }
    }
}

/// Options for `init_conductor`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing conductor-owned files.
    pub force: bool,
}

/// Create `.conductor/` scaffolding in `root`.
///
/// Fails if `.conductor/` already exists unless `options.force` is set.
pub fn init_conductor(root: &Path, options: &InitOptions) -> Result<ConductorPaths> {
    let paths = ConductorPaths::new(root);
    if paths.conductor_dir.exists() && !options.force {
        return Err(anyhow!(
            "conductor init: .conductor already exists (use --force to overwrite)"
        ));
    }
    if paths.conductor_dir.exists() && !paths.conductor_dir.is_dir() {
        return Err(anyhow!(
            "conductor init: .conductor exists but is not a directory"
        ));
    }

    create_dir(&paths.conductor_dir)?;
    create_dir(&paths.conversations_dir)?;
    create_dir(&paths.tasks_dir)?;
    create_dir(&paths.scratch_dir)?;

    fs::write(&paths.gitignore_path, CONDUCTOR_GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &EngineConfig::default())?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

const CONDUCTOR_GITIGNORE: &str = "conversations/\ntasks/\nscratch/\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_layout_and_default_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_conductor(temp.path(), &InitOptions { force: false }).expect("init");
        assert!(paths.conversations_dir.is_dir());
        assert!(paths.tasks_dir.is_dir());
        assert!(paths.config_path.is_file());
        let gitignore = fs::read_to_string(&paths.gitignore_path).expect("gitignore");
        assert!(gitignore.contains("conversations/"));
    }

    #[test]
    fn init_refuses_existing_dir_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_conductor(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_conductor(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        init_conductor(temp.path(), &InitOptions { force: true }).expect("force init");
    }
}
