//! Removal of deletion-only hunks.

use log::debug;

use crate::hunk::HunkHeader;
use crate::models::{EditKind, FileChange};

/// Drop every hunk that has no added line.
///
/// Lines before the first hunk header travel with the first hunk. Lines
/// starting with `@@` that are not valid headers are dropped.
pub fn omit_deletion_hunks(patch_lines: &[&str]) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut pending: Vec<&str> = Vec::new();
    let mut inside_hunk = false;
    let mut has_addition = false;

    for &line in patch_lines {
        if line.starts_with("@@") {
            if HunkHeader::parse(line).is_some() {
                if inside_hunk && has_addition {
                    kept.append(&mut pending);
                } else if inside_hunk {
                    pending.clear();
                }
                has_addition = false;
                inside_hunk = true;
                pending.push(line);
            }
            continue;
        }
        pending.push(line);
        if inside_hunk && line.starts_with('+') {
            has_addition = true;
        }
    }
    if inside_hunk && has_addition {
        kept.append(&mut pending);
    }
    kept.join("\n")
}

/// Prepare a file's patch for the compressed diff.
///
/// Returns `None` for a deleted file that has no new content; the caller
/// lists such files by name only. Otherwise returns the patch with its
/// deletion-only hunks removed.
pub fn handle_patch_deletions(file: &FileChange, patch: &str) -> Option<String> {
    match file.edit_kind {
        EditKind::Deleted | EditKind::Unknown if file.head_is_empty() => {
            debug!("Processing file: {}, minimizing deletion file", file.filename);
            None
        }
        EditKind::Added
        | EditKind::Deleted
        | EditKind::Modified
        | EditKind::Renamed
        | EditKind::Unknown => {
            let lines: Vec<&str> = patch.lines().collect();
            let filtered = omit_deletion_hunks(&lines);
            if filtered != patch {
                debug!("Processing file: {}, hunks were deleted", file.filename);
                Some(filtered)
            } else {
                Some(patch.to_string())
            }
        }
    }
}
