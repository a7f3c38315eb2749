//! Mapping between lines of a patch and lines of the new file.

use std::str::FromStr;

use log::error;
use similar::TextDiff;

use crate::hunk::{is_no_newline_marker, HunkHeader};
use crate::models::FileChange;

/// Similarity a patch line needs to stand in for a misquoted query.
const FUZZY_MATCH_CUTOFF: f32 = 0.93;

/// Where a line sits, both within its patch and within the new file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinePosition {
    /// Index of the line among the patch lines.
    pub patch_index: Option<usize>,
    /// 1-based line number in the new file.
    pub absolute_line: Option<usize>,
}

/// Tracks the new-file line number of each patch line.
struct NewLineCounter {
    new_start: i64,
    delta: i64,
}

impl NewLineCounter {
    fn new() -> Self {
        Self {
            new_start: 0,
            delta: 0,
        }
    }

    /// Advance past `line`. Returns the new-file line number for lines that
    /// can be pointed at, `None` for hunk headers.
    fn advance(&mut self, line: &str) -> Option<i64> {
        if line.starts_with("@@") {
            if let Some(header) = HunkHeader::parse(line) {
                self.new_start = header.new_start as i64;
            }
            self.delta = 0;
            return None;
        }
        if !line.starts_with('-') {
            self.delta += 1;
        }
        Some(self.new_start + self.delta - 1)
    }
}

/// Locate a line of `relevant_file` within its patch.
///
/// With `absolute_position`, finds the patch line at that new-file line. A
/// miss keeps the requested position in the result. Otherwise searches for
/// `relevant_line` among the non-deleted lines, first substituting a unique
/// close match among the added lines, and retrying without a leading `+`.
pub fn find_line_number_of_relevant_line_in_file(
    files: &[FileChange],
    relevant_file: &str,
    relevant_line: &str,
    absolute_position: Option<usize>,
) -> LinePosition {
    let not_found = LinePosition {
        patch_index: None,
        absolute_line: absolute_position,
    };

    let Some(file) = files
        .iter()
        .find(|file| !file.filename.is_empty() && file.filename.trim() == relevant_file)
    else {
        return not_found;
    };
    let Some(patch) = file.patch_text() else {
        return not_found;
    };
    let patch_lines: Vec<&str> = patch.lines().collect();

    match absolute_position {
        Some(position) => LinePosition {
            patch_index: find_by_absolute_line(&patch_lines, position),
            absolute_line: Some(position),
        },
        None => find_by_text(&patch_lines, relevant_line).unwrap_or(not_found),
    }
}

fn find_by_absolute_line(patch_lines: &[&str], position: usize) -> Option<usize> {
    let mut counter = NewLineCounter::new();
    patch_lines
        .iter()
        .position(|line| counter.advance(line) == Some(position as i64))
}

fn find_by_text(patch_lines: &[&str], relevant_line: &str) -> Option<LinePosition> {
    if relevant_line.is_empty() {
        return None;
    }

    let close: Vec<&str> = patch_lines
        .iter()
        .copied()
        .filter(|line| TextDiff::from_chars(relevant_line, *line).ratio() >= FUZZY_MATCH_CUTOFF)
        .collect();
    let query = match close.as_slice() {
        [only] if only.starts_with('+') => *only,
        _ => relevant_line,
    };

    if let Some(found) = first_containing(patch_lines, query) {
        return Some(found);
    }
    let unprefixed = query.strip_prefix('+')?.trim_start();
    first_containing(patch_lines, unprefixed)
}

fn first_containing(patch_lines: &[&str], needle: &str) -> Option<LinePosition> {
    let mut counter = NewLineCounter::new();
    for (index, line) in patch_lines.iter().enumerate() {
        let Some(absolute) = counter.advance(line) else {
            continue;
        };
        if !line.starts_with('-') && line.contains(needle) {
            return Some(LinePosition {
                patch_index: Some(index),
                absolute_line: usize::try_from(absolute).ok(),
            });
        }
    }
    None
}

/// Side of a diff a line range refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The old file.
    Left,
    /// The new file.
    Right,
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(format!("Unknown side '{}', expected left or right", other)),
        }
    }
}

/// Hunks of `patch` that contain `line_start`, and the lines within
/// `line_start..=line_end` on the given side.
///
/// Returns two empty strings if the patch has a malformed hunk header.
pub fn extract_hunk_lines_from_patch(
    patch: &str,
    filename: &str,
    line_start: usize,
    line_end: usize,
    side: Side,
    remove_trailing_chars: bool,
) -> (String, String) {
    let mut hunks = format!("\n\n## File: '{}'\n\n", filename.trim());
    let mut selected = String::new();
    let line_start = line_start as i64;
    let line_end = line_end as i64;
    let (mut old_start, mut new_start) = (-1_i64, -1_i64);
    let mut skip_hunk = false;
    let mut selected_count = 0_i64;

    for line in patch.lines() {
        if is_no_newline_marker(line) {
            continue;
        }

        if line.starts_with("@@") {
            let Some(header) = HunkHeader::parse(line) else {
                error!("Failed to extract hunk lines from patch: bad header '{}'", line);
                return (String::new(), String::new());
            };
            skip_hunk = false;
            selected_count = 0;
            old_start = header.old_start as i64;
            new_start = header.new_start as i64;

            let (start, size) = match side {
                Side::Left => (old_start, header.old_size as i64),
                Side::Right => (new_start, header.new_size as i64),
            };
            if !(start <= line_start && line_start <= start + size) {
                skip_hunk = true;
                continue;
            }
            hunks.push('\n');
            hunks.push_str(line);
            hunks.push('\n');
        } else if !skip_hunk {
            let start = match side {
                Side::Left => old_start,
                Side::Right => new_start,
            };
            let current = start + selected_count;
            if line_start <= current && current <= line_end {
                selected.push_str(line);
                selected.push('\n');
            }
            hunks.push_str(line);
            hunks.push('\n');
            if !line.starts_with('-') {
                selected_count += 1;
            }
        }
    }

    if remove_trailing_chars {
        let hunks_len = hunks.trim_end().len();
        hunks.truncate(hunks_len);
        let selected_len = selected.trim_end().len();
        selected.truncate(selected_len);
    }
    (hunks, selected)
}
