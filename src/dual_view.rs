//! Dual-view rendering of a patch.
//!
//! Each hunk is rewritten as a `__new hunk__` section, where every line is
//! prefixed with its absolute line number in the new file, optionally
//! followed by an `__old hunk__` section holding the removed lines:
//!
//! ```text
//! ## File: 'src/lib.rs'
//!
//! @@ -12,3 +12,3 @@ fn main() {
//! __new hunk__
//! 12  let a = 1;
//! 13 +let b = 2;
//! 14  let c = 3;
//! __old hunk__
//!  let a = 1;
//! -let b = 1;
//!  let c = 3;
//! ```

use crate::hunk::{is_no_newline_marker, HunkHeader};
use crate::models::{EditKind, FileChange};

const NEW_HUNK_MARKER: &str = "\n__new hunk__\n";
const OLD_HUNK_MARKER: &str = "\n__old hunk__\n";

/// Render `patch` in the dual view, with a file header when `file` is given.
pub fn convert_to_dual_view(patch: &str, file: Option<&FileChange>) -> String {
    let mut writer = DualViewWriter::default();

    if let Some(file) = file {
        if file.edit_kind == EditKind::Deleted {
            return format!("\n\n## File '{}' was deleted\n", file.filename.trim());
        }
        writer
            .parts
            .push(format!("\n\n## File: '{}'\n", file.filename.trim()));
    }

    let lines: Vec<&str> = patch.lines().collect();
    for (index, &line) in lines.iter().enumerate() {
        if is_no_newline_marker(line) {
            continue;
        }

        if line.starts_with("@@") {
            if let Some(header) = HunkHeader::parse(line) {
                writer.start_hunk(line, &header);
                continue;
            }
        }

        if line.starts_with('+') {
            writer.new_lines.push(line);
        } else if line.starts_with('-') {
            writer.old_lines.push(line);
        } else {
            if line.is_empty() && index > 0 {
                let next = lines.get(index + 1);
                if next.map_or(true, |next| next.starts_with("@@")) {
                    continue;
                }
            }
            writer.new_lines.push(line);
            writer.old_lines.push(line);
        }
    }

    writer.finish();
    writer.parts.concat().trim_end().to_string()
}

#[derive(Debug, PartialEq, Eq)]
enum HunkState {
    OutsideHunk,
    InHunk { header_line: String, new_start: i64 },
}

/// Output pieces and the buffers of the hunk being read.
struct DualViewWriter<'a> {
    parts: Vec<String>,
    state: HunkState,
    new_lines: Vec<&'a str>,
    old_lines: Vec<&'a str>,
}

impl Default for DualViewWriter<'_> {
    fn default() -> Self {
        Self {
            parts: Vec::new(),
            state: HunkState::OutsideHunk,
            new_lines: Vec::new(),
            old_lines: Vec::new(),
        }
    }
}

impl<'a> DualViewWriter<'a> {
    fn start_hunk(&mut self, line: &str, header: &HunkHeader) {
        if !self.new_lines.is_empty() || !self.old_lines.is_empty() {
            self.flush();
        }
        self.state = HunkState::InHunk {
            header_line: line.to_string(),
            new_start: header.new_start as i64,
        };
    }

    /// Flush the last hunk. Trailing buffers without new-side lines are dropped.
    fn finish(&mut self) {
        if matches!(self.state, HunkState::InHunk { .. }) && !self.new_lines.is_empty() {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let (header_line, new_start) = match &self.state {
            HunkState::InHunk {
                header_line,
                new_start,
            } => (header_line.clone(), *new_start),
            HunkState::OutsideHunk => (String::new(), -1),
        };

        if !header_line.is_empty() {
            self.parts.push(format!("\n{}\n", header_line));
        }

        let has_added = self.new_lines.iter().any(|line| line.starts_with('+'));
        let has_removed = self.old_lines.iter().any(|line| line.starts_with('-'));

        if has_added || has_removed {
            self.trim_last_part();
            self.parts.push(NEW_HUNK_MARKER.to_string());
            for (offset, line) in self.new_lines.iter().enumerate() {
                self.parts
                    .push(format!("{} {}\n", new_start + offset as i64, line));
            }
        }
        if has_removed {
            self.trim_last_part();
            self.parts.push(OLD_HUNK_MARKER.to_string());
            for line in &self.old_lines {
                self.parts.push(format!("{}\n", line));
            }
        }

        self.new_lines.clear();
        self.old_lines.clear();
    }

    fn trim_last_part(&mut self) {
        if let Some(last) = self.parts.last_mut() {
            if last.ends_with('\n') {
                let trimmed_len = last.trim_end().len();
                last.truncate(trimmed_len);
            }
        }
    }
}
