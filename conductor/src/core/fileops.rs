//! Pure semantics of a [`FileOperation`] against the current file content.
//!
//! Both the on-disk workspace and in-memory test stores apply operations
//! through [`plan_effect`], so precondition rules live in one place.

use std::collections::BTreeMap;

use crate::core::patch::{apply_patch, render_diff};
use crate::core::textedit::apply_edits;
use crate::core::types::{FileOperation, OperationPreview};
use crate::error::FileOperationError;

/// What an operation does to its target once preconditions hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEffect {
    Write(String),
    Remove,
    Nothing,
}

/// Check preconditions and compute the effect of `op`.
///
/// `current` is the target's content, or `None` if it does not exist.
pub fn plan_effect(
    op: &FileOperation,
    current: Option<&str>,
) -> Result<FileEffect, FileOperationError> {
    match op {
        FileOperation::Create { path, content } => match current {
            Some(_) => Err(FileOperationError::AlreadyExists { path: path.clone() }),
            None => Ok(FileEffect::Write(content.clone())),
        },
        FileOperation::Delete { path } => {
            require(path, current)?;
            Ok(FileEffect::Remove)
        }
        FileOperation::Replace { path, content } => {
            require(path, current)?;
            Ok(FileEffect::Write(content.clone()))
        }
        FileOperation::Edit { path, edits } => {
            let before = require(path, current)?;
            apply_edits(path, before, edits).map(FileEffect::Write)
        }
        FileOperation::Patch { path, unified_diff } => {
            let before = require(path, current)?;
            apply_patch(path, before, unified_diff).map(FileEffect::Write)
        }
        FileOperation::NoOp { .. } => Ok(FileEffect::Nothing),
    }
}

fn require<'a>(path: &str, current: Option<&'a str>) -> Result<&'a str, FileOperationError> {
    current.ok_or_else(|| FileOperationError::MissingFile {
        path: path.to_string(),
    })
}

/// Render the approval entry for `op` against the unchanged workspace.
///
/// A precondition failure does not block the preview; it is shown in place of
/// the diff and surfaces again when the operation is applied.
pub fn preview(op: &FileOperation, current: Option<&str>) -> OperationPreview {
    let file_path = op.path().map(str::to_string);
    let diff = match op {
        FileOperation::NoOp { reason } => reason.clone(),
        FileOperation::Patch { unified_diff, .. } => unified_diff.clone(),
        _ => {
            let path = op.path().unwrap_or_default();
            match plan_effect(op, current) {
                Ok(FileEffect::Write(after)) => render_diff(path, current.unwrap_or(""), &after),
                Ok(FileEffect::Remove) => render_diff(path, current.unwrap_or(""), ""),
                Ok(FileEffect::Nothing) => String::new(),
                Err(err) => format!("[cannot apply: {err}]"),
            }
        }
    };
    OperationPreview {
        file_path,
        operation_type: op.operation_type(),
        diff,
    }
}

/// Previews for a whole plan, in order.
///
/// Later operations see the content produced by earlier ones on the same path,
/// so a create followed by an edit previews against the created text.
pub fn preview_plan<F>(ops: &[FileOperation], mut read: F) -> Vec<OperationPreview>
where
    F: FnMut(&str) -> Result<Option<String>, FileOperationError>,
{
    let mut overlay: BTreeMap<String, Option<String>> = BTreeMap::new();
    ops.iter()
        .map(|op| {
            let Some(path) = op.path() else {
                return preview(op, None);
            };
            let current = match overlay.get(path) {
                Some(known) => known.clone(),
                None => match read(path) {
                    Ok(content) => content,
                    Err(err) => {
                        return OperationPreview {
                            file_path: Some(path.to_string()),
                            operation_type: op.operation_type(),
                            diff: format!("[cannot read: {err}]"),
                        };
                    }
                },
            };
            let entry = preview(op, current.as_deref());
            match plan_effect(op, current.as_deref()) {
                Ok(FileEffect::Write(after)) => {
                    overlay.insert(path.to_string(), Some(after));
                }
                Ok(FileEffect::Remove) => {
                    overlay.insert(path.to_string(), None);
                }
                Ok(FileEffect::Nothing) | Err(_) => {
                    overlay.insert(path.to_string(), current);
                }
            }
            entry
        })
        .collect()
}
