//! Range-based text edits.
//!
//! Positions are zero-indexed `{line, character}` pairs where `character`
//! counts chars within the line. Ranges are end-exclusive. A position may sit
//! at the end of a line (or of the file) but never beyond it.

use crate::core::types::{Position, TextEdit};
use crate::error::FileOperationError;

/// Apply `edits` to `content`.
///
/// Edits are validated against the original content, must not overlap, and
/// are applied from the last range to the first so earlier offsets stay valid.
pub fn apply_edits(
    path: &str,
    content: &str,
    edits: &[TextEdit],
) -> Result<String, FileOperationError> {
    let line_starts = line_starts(content);
    let mut resolved = Vec::with_capacity(edits.len());
    for (idx, edit) in edits.iter().enumerate() {
        let start = offset_of(path, content, &line_starts, edit.range.start)?;
        let end = offset_of(path, content, &line_starts, edit.range.end)?;
        if start > end {
            return Err(FileOperationError::RangeOutOfBounds {
                path: path.to_string(),
                detail: format!("edit {idx}: range start is after range end"),
            });
        }
        resolved.push((start, end, idx));
    }

    resolved.sort_by_key(|&(start, end, idx)| (start, end, idx));
    for pair in resolved.windows(2) {
        if pair[0].1 > pair[1].0 {
            return Err(FileOperationError::OverlappingEdits {
                path: path.to_string(),
            });
        }
    }

    let mut out = content.to_string();
    for &(start, end, idx) in resolved.iter().rev() {
        out.replace_range(start..end, &edits[idx].new_text);
    }
    Ok(out)
}

fn line_starts(content: &str) -> Vec<usize> {
    let mut starts = vec![0];
    starts.extend(content.match_indices('\n').map(|(idx, _)| idx + 1));
    starts
}

fn offset_of(
    path: &str,
    content: &str,
    line_starts: &[usize],
    pos: Position,
) -> Result<usize, FileOperationError> {
    let Some(&start) = line_starts.get(pos.line) else {
        return Err(FileOperationError::RangeOutOfBounds {
            path: path.to_string(),
            detail: format!(
                "line {} out of bounds (file has {} lines)",
                pos.line,
                line_starts.len()
            ),
        });
    };
    let end = line_starts
        .get(pos.line + 1)
        .map_or(content.len(), |next| next - 1);
    let line = &content[start..end];
    let chars = line.chars().count();
    if pos.character > chars {
        return Err(FileOperationError::RangeOutOfBounds {
            path: path.to_string(),
            detail: format!(
                "character {} out of bounds on line {} (length {})",
                pos.character, pos.line, chars
            ),
        });
    }
    let within = line
        .char_indices()
        .nth(pos.character)
        .map_or(line.len(), |(idx, _)| idx);
    Ok(start + within)
}
