//! File-mutation collaborator backed by the project directory.
//!
//! All paths are workspace-relative. Absolute paths and `..` components are
//! rejected before touching the filesystem.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::core::fileops::{FileEffect, plan_effect};
use crate::core::types::FileOperation;
use crate::error::FileOperationError;

/// Reads files and applies [`FileOperation`]s.
pub trait FileMutator: Send + Sync {
    /// Current content of `path`, or `None` if it does not exist.
    fn read(&self, path: &str) -> Result<Option<String>, FileOperationError>;

    /// Check preconditions for `op` against the current content, then mutate.
    fn apply(&self, op: &FileOperation) -> Result<(), FileOperationError>;

    /// Relative file list used as the static project outline.
    fn outline(&self, limit: usize) -> Vec<String>;
}

/// Workspace rooted at the project directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path, rejecting escapes.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, FileOperationError> {
        let relative = Path::new(path);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if path.trim().is_empty() || escapes {
            return Err(FileOperationError::OutsideWorkspace {
                path: path.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

impl FileMutator for Workspace {
    fn read(&self, path: &str) -> Result<Option<String>, FileOperationError> {
        let full = self.resolve(path)?;
        match fs::read_to_string(&full) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(path, &err)),
        }
    }

    #[instrument(skip_all, fields(op = ?op.operation_type(), path = op.path().unwrap_or("-")))]
    fn apply(&self, op: &FileOperation) -> Result<(), FileOperationError> {
        let Some(path) = op.path() else {
            debug!("noop operation, nothing to apply");
            return Ok(());
        };
        let full = self.resolve(path)?;
        let current = self.read(path)?;
        match plan_effect(op, current.as_deref())? {
            FileEffect::Write(contents) => {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent).map_err(|err| io_error(path, &err))?;
                }
                fs::write(&full, contents).map_err(|err| io_error(path, &err))?;
            }
            FileEffect::Remove => fs::remove_file(&full).map_err(|err| io_error(path, &err))?,
            FileEffect::Nothing => {}
        }
        debug!("operation applied");
        Ok(())
    }

    fn outline(&self, limit: usize) -> Vec<String> {
        project_outline(&self.root, limit)
    }
}

fn io_error(path: &str, err: &std::io::Error) -> FileOperationError {
    FileOperationError::Io {
        path: path.to_string(),
        detail: err.to_string(),
    }
}

/// Sorted relative file list, skipping hidden entries and `target/`.
pub fn project_outline(root: &Path, limit: usize) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(name.starts_with('.') || (entry.file_type().is_dir() && name == "target"))
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();
    files.truncate(limit);
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        (temp, ws)
    }

    #[test]
    fn create_then_replace_then_delete() {
        let (temp, ws) = workspace();
        ws.apply(&FileOperation::Create {
            path: "src/new.rs".to_string(),
            content: "fn a() {}\n".to_string(),
        })
        .expect("create");
        assert_eq!(
            fs::read_to_string(temp.path().join("src/new.rs")).expect("read"),
            "fn a() {}\n"
        );

        ws.apply(&FileOperation::Replace {
            path: "src/new.rs".to_string(),
            content: "fn b() {}\n".to_string(),
        })
        .expect("replace");
        assert_eq!(ws.read("src/new.rs").expect("read").as_deref(), Some("fn b() {}\n"));

        ws.apply(&FileOperation::Delete {
            path: "src/new.rs".to_string(),
        })
        .expect("delete");
        assert_eq!(ws.read("src/new.rs").expect("read"), None);
    }

    #[test]
    fn create_over_existing_file_fails_without_touching_it() {
        let (temp, ws) = workspace();
        fs::write(temp.path().join("a.txt"), "keep").expect("seed");
        let err = ws
            .apply(&FileOperation::Create {
                path: "a.txt".to_string(),
                content: "clobber".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, FileOperationError::AlreadyExists { .. }));
        assert_eq!(fs::read_to_string(temp.path().join("a.txt")).expect("read"), "keep");
    }

    #[test]
    fn noop_leaves_files_unchanged() {
        let (temp, ws) = workspace();
        fs::write(temp.path().join("a.txt"), "same").expect("seed");
        let before = project_outline(temp.path(), 100);
        ws.apply(&FileOperation::NoOp {
            reason: "nothing".to_string(),
        })
        .expect("noop");
        assert_eq!(project_outline(temp.path(), 100), before);
        assert_eq!(fs::read_to_string(temp.path().join("a.txt")).expect("read"), "same");
    }

    #[test]
    fn rejects_paths_outside_workspace() {
        let (_temp, ws) = workspace();
        for path in ["../escape.txt", "/etc/passwd", "a/../../b", ""] {
            let err = ws.read(path).unwrap_err();
            assert!(matches!(err, FileOperationError::OutsideWorkspace { .. }), "{path}");
        }
    }

    #[test]
    fn outline_skips_hidden_and_target() {
        let (temp, ws) = workspace();
        fs::create_dir_all(temp.path().join("src")).expect("src");
        fs::create_dir_all(temp.path().join("target/debug")).expect("target");
        fs::create_dir_all(temp.path().join(".git")).expect("git");
        fs::write(temp.path().join("src/lib.rs"), "").expect("lib");
        fs::write(temp.path().join("README.md"), "").expect("readme");
        fs::write(temp.path().join("target/debug/bin"), "").expect("bin");
        fs::write(temp.path().join(".git/HEAD"), "").expect("head");

        assert_eq!(ws.outline(10), vec!["README.md".to_string(), "src/lib.rs".to_string()]);
        assert_eq!(ws.outline(1).len(), 1);
    }
}
