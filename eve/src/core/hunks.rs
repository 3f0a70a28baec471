//! Structured line diffs carried by `WriteFile` actions.

use serde::{Deserialize, Serialize};

/// One contiguous edit: remove `remove` lines starting at `start_line`
/// (1-based, against the original file) and insert `insert` in their place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub start_line: usize,
    pub remove: usize,
    pub insert: Vec<String>,
}

/// Check ordering constraints that do not depend on file contents.
///
/// Returns the index and reason of the first offending hunk.
pub fn check_hunk_order(hunks: &[Hunk]) -> Result<(), (usize, String)> {
    if hunks.is_empty() {
        return Err((0, "diff must contain at least one hunk".to_string()));
    }
    let mut next_free = 1usize;
    for (idx, hunk) in hunks.iter().enumerate() {
        if hunk.start_line == 0 {
            return Err((idx, "start_line is 1-based".to_string()));
        }
        if hunk.start_line < next_free {
            return Err((
                idx,
                format!(
                    "hunks must be ascending and non-overlapping (start_line {} < {})",
                    hunk.start_line, next_free
                ),
            ));
        }
        if hunk.remove == 0 && hunk.insert.is_empty() {
            return Err((idx, "hunk neither removes nor inserts lines".to_string()));
        }
        next_free = hunk
            .start_line
            .checked_add(hunk.remove)
            .ok_or_else(|| (idx, "line range overflows".to_string()))?;
    }
    Ok(())
}

/// Apply ordered hunks to `original`.
///
/// Line endings follow the original: `\r\n` when the file uses them, `\n`
/// otherwise, and a trailing newline is kept if the original had one (or was
/// empty).
pub fn apply_hunks(original: &str, hunks: &[Hunk]) -> Result<String, String> {
    check_hunk_order(hunks).map_err(|(idx, reason)| format!("hunk {idx}: {reason}"))?;

    let lines: Vec<&str> = original.lines().collect();
    let trailing_newline = original.is_empty() || original.ends_with('\n');
    let separator = if original.contains("\r\n") { "\r\n" } else { "\n" };
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut cursor = 0usize;

    for (idx, hunk) in hunks.iter().enumerate() {
        let start = hunk.start_line - 1;
        if start > lines.len() {
            return Err(format!(
                "hunk {idx}: start_line {} is past end of file ({} lines)",
                hunk.start_line,
                lines.len()
            ));
        }
        let end = start
            .checked_add(hunk.remove)
            .ok_or_else(|| format!("hunk {idx}: line range overflows"))?;
        if end > lines.len() {
            return Err(format!(
                "hunk {idx}: removes {} lines from line {} but file has {} lines",
                hunk.remove,
                hunk.start_line,
                lines.len()
            ));
        }
        out.extend(lines[cursor..start].iter().map(|l| (*l).to_string()));
        out.extend(hunk.insert.iter().cloned());
        cursor = end;
    }
    out.extend(lines[cursor..].iter().map(|l| (*l).to_string()));

    let mut result = out.join(separator);
    if trailing_newline && !out.is_empty() {
        result.push_str(separator);
    }
    Ok(result)
}
