//! Unified diff rendering and strict application.
//!
//! Patches are applied literally: each hunk must match the current content at
//! the position its header states. There is no fuzzy matching.

use std::sync::LazyLock;

use regex::Regex;
use similar::TextDiff;

use crate::error::FileOperationError;

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

static HUNK_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header regex")
});

/// Render a unified diff (3 lines of context) from `before` to `after`.
pub fn render_diff(path: &str, before: &str, after: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug)]
struct Hunk {
    old_start: usize,
    old_len: usize,
    lines: Vec<HunkLine>,
}

/// Apply `diff` to `before`, returning the patched content.
pub fn apply_patch(path: &str, before: &str, diff: &str) -> Result<String, FileOperationError> {
    let hunks = parse_hunks(path, diff)?;
    let old_lines: Vec<&str> = before.split_inclusive('\n').collect();
    let mut out = String::with_capacity(before.len() + diff.len());
    let mut cursor = 0usize;

    for hunk in &hunks {
        let at = if hunk.old_len == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        if at < cursor || at > old_lines.len() {
            return Err(mismatch(
                path,
                format!("hunk at line {} is out of order or past the end", hunk.old_start),
            ));
        }
        for line in &old_lines[cursor..at] {
            out.push_str(line);
        }
        cursor = at;

        for line in &hunk.lines {
            match line {
                HunkLine::Context(expected) | HunkLine::Remove(expected) => {
                    let actual = old_lines.get(cursor).copied();
                    if actual != Some(expected.as_str()) {
                        return Err(mismatch(
                            path,
                            format!(
                                "line {} expected {:?}, found {:?}",
                                cursor + 1,
                                expected,
                                actual.unwrap_or("<end of file>")
                            ),
                        ));
                    }
                    if matches!(line, HunkLine::Context(_)) {
                        out.push_str(expected);
                    }
                    cursor += 1;
                }
                HunkLine::Add(text) => out.push_str(text),
            }
        }
    }

    for line in &old_lines[cursor..] {
        out.push_str(line);
    }
    Ok(out)
}

fn parse_hunks(path: &str, diff: &str) -> Result<Vec<Hunk>, FileOperationError> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut in_hunk = false;

    for raw in diff.split_inclusive('\n') {
        let header = raw.trim_end_matches(['\r', '\n']);
        if let Some(caps) = HUNK_HEADER_RE.captures(header) {
            let number = |idx: usize, default: usize| {
                caps.get(idx)
                    .map_or(Ok(default), |m| m.as_str().parse::<usize>())
                    .map_err(|_| mismatch(path, format!("bad hunk header {header:?}")))
            };
            hunks.push(Hunk {
                old_start: number(1, 0)?,
                old_len: number(2, 1)?,
                lines: Vec::new(),
            });
            in_hunk = true;
            continue;
        }
        if !in_hunk {
            // `diff --git`, `index`, `---`, `+++` and any preamble.
            continue;
        }
        let Some(hunk) = hunks.last_mut() else {
            continue;
        };
        if header == NO_NEWLINE_MARKER || header.starts_with("\\ ") {
            strip_line_ending(hunk);
            continue;
        }
        let line = match raw.chars().next() {
            Some(' ') => HunkLine::Context(body_line(&raw[1..])),
            Some('-') => HunkLine::Remove(body_line(&raw[1..])),
            Some('+') => HunkLine::Add(body_line(&raw[1..])),
            // Some generators drop the space on blank context lines.
            Some('\r' | '\n') => HunkLine::Context(raw.to_string()),
            _ => {
                in_hunk = false;
                continue;
            }
        };
        hunk.lines.push(line);
    }

    if hunks.is_empty() {
        return Err(mismatch(path, "no hunks found".to_string()));
    }
    for hunk in &hunks {
        let old_count = hunk
            .lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Add(_)))
            .count();
        if old_count != hunk.old_len {
            return Err(mismatch(
                path,
                format!(
                    "hunk at line {} declares {} old lines but has {}",
                    hunk.old_start, hunk.old_len, old_count
                ),
            ));
        }
    }
    Ok(hunks)
}

/// A body line keeps its own terminator; only a diff cut off mid-line gets one.
fn body_line(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

fn strip_line_ending(hunk: &mut Hunk) {
    if let Some(HunkLine::Context(text) | HunkLine::Remove(text) | HunkLine::Add(text)) =
        hunk.lines.last_mut()
        && text.ends_with('\n')
    {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
}

fn mismatch(path: &str, detail: String) -> FileOperationError {
    FileOperationError::ContextMismatch {
        path: path.to_string(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_reproduces_after_content() {
        let cases = [
            ("a\nb\nc\n", "a\nB\nc\nd\n"),
            ("", "new file\nwith two lines\n"),
            ("gone\n", ""),
            ("no newline", "no newline\nnow has more"),
            ("x\ny", "x\nz"),
            (
                "1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n11\n12\n",
                "1\n2b\n3\n4\n5\n6\n7\n8\n9\n10\n11b\n12\n",
            ),
        ];
        for (before, after) in cases {
            let diff = render_diff("f.txt", before, after);
            let patched = apply_patch("f.txt", before, &diff).expect("apply");
            assert_eq!(patched, after, "diff was:\n{diff}");
        }
    }

    #[test]
    fn crlf_content_round_trips() {
        let cases = [
            ("a\r\nb\r\nc\r\n", "a\r\nB\r\nc\r\n"),
            ("one\r\ntwo\r\n", "one\r\ntwo\r\nthree"),
            ("x\r\n\r\ny\r\n", "x\r\n\r\nz\r\n"),
        ];
        for (before, after) in cases {
            let diff = render_diff("f.txt", before, after);
            let patched = apply_patch("f.txt", before, &diff).expect("apply");
            assert_eq!(patched, after, "diff was:\n{diff:?}");
        }
    }

    #[test]
    fn crlf_diff_keeps_line_endings() {
        let before = "a\r\nb\r\n";
        let diff = "@@ -1,2 +1,2 @@\r\n a\r\n-b\r\n+c\r\n";
        let out = apply_patch("f", before, diff).expect("apply");
        assert_eq!(out, "a\r\nc\r\n");
    }

    #[test]
    fn applies_hand_written_diff_without_headers() {
        let before = "fn main() {\n    println!(\"hi\");\n}\n";
        let diff = concat!(
            "@@ -1,3 +1,3 @@\n",
            " fn main() {\n",
            "-    println!(\"hi\");\n",
            "+    println!(\"hello\");\n",
            " }\n",
        );
        let out = apply_patch("main.rs", before, diff).expect("apply");
        assert_eq!(out, "fn main() {\n    println!(\"hello\");\n}\n");
    }

    #[test]
    fn context_mismatch_is_rejected() {
        let diff = "@@ -1,2 +1,2 @@\n a\n-b\n+c\n";
        let err = apply_patch("f", "a\nx\n", diff).unwrap_err();
        assert!(matches!(err, FileOperationError::ContextMismatch { .. }));
    }

    #[test]
    fn hunk_is_not_relocated() {
        // Same lines exist, but one line lower than the header claims.
        let diff = "@@ -1,2 +1,2 @@\n a\n-b\n+c\n";
        let err = apply_patch("f", "z\na\nb\n", diff).unwrap_err();
        assert!(matches!(err, FileOperationError::ContextMismatch { .. }));
    }

    #[test]
    fn diff_without_hunks_is_rejected() {
        let err = apply_patch("f", "a\n", "--- a/f\n+++ b/f\n").unwrap_err();
        assert!(err.to_string().contains("no hunks"));
    }

    #[test]
    fn declared_length_must_match_body() {
        let diff = "@@ -1,3 +1,1 @@\n-a\n";
        assert!(apply_patch("f", "a\nb\nc\n", diff).is_err());
    }
}
