//! Unified diff hunk headers and line classification.

use std::fmt;

/// Parsed `@@ -old_start,old_size +new_start,new_size @@ section` line.
///
/// Counts omitted from the header (`@@ -3 +3 @@`) are read as `0`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HunkHeader {
    pub old_start: usize,
    pub old_size: usize,
    pub new_start: usize,
    pub new_size: usize,
    /// Text after the closing `@@` (usually the enclosing function signature)
    pub section_header: String,
}

impl HunkHeader {
    /// Parse a hunk header line. Returns `None` for anything that is not one.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix("@@ -")?;
        let (old_start, old_size, rest) = parse_range(rest)?;
        let rest = rest.strip_prefix(" +")?;
        let (new_start, new_size, rest) = parse_range(rest)?;
        let rest = rest.strip_prefix(" @@")?;
        let section = rest.strip_prefix(' ').unwrap_or(rest);

        Some(Self {
            old_start,
            old_size,
            new_start,
            new_size,
            section_header: section.to_string(),
        })
    }
}

impl fmt::Display for HunkHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@@ -{},{} +{},{} @@ {}",
            self.old_start, self.old_size, self.new_start, self.new_size, self.section_header
        )
    }
}

/// Parse `start[,count]`, returning the remaining input.
fn parse_range(input: &str) -> Option<(usize, usize, &str)> {
    let (start, rest) = take_number(input)?;
    match rest.strip_prefix(',') {
        Some(after_comma) => {
            let (count, rest) = take_number(after_comma)?;
            Some((start, count, rest))
        }
        None => Some((start, 0, rest)),
    }
}

fn take_number(input: &str) -> Option<(usize, &str)> {
    let end = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    if end == 0 {
        return None;
    }
    let value = input[..end].parse().ok()?;
    Some((value, &input[end..]))
}

/// Whether a line is git's `\ No newline at end of file` marker.
pub fn is_no_newline_marker(line: &str) -> bool {
    line.starts_with('\\') && line.to_lowercase().contains("no newline at end of file")
}

/// Classification of a single patch line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchLine<'a> {
    Header(HunkHeader),
    Added(&'a str),
    Removed(&'a str),
    Context(&'a str),
    NoNewlineMarker,
}

impl<'a> PatchLine<'a> {
    /// Classify a line. Lines starting with `@@` that fail to parse count as context.
    pub fn classify(line: &'a str) -> Self {
        if line.starts_with("@@") {
            if let Some(header) = HunkHeader::parse(line) {
                return PatchLine::Header(header);
            }
        }
        if is_no_newline_marker(line) {
            return PatchLine::NoNewlineMarker;
        }
        if let Some(rest) = line.strip_prefix('+') {
            PatchLine::Added(rest)
        } else if let Some(rest) = line.strip_prefix('-') {
            PatchLine::Removed(rest)
        } else {
            PatchLine::Context(line.strip_prefix(' ').unwrap_or(line))
        }
    }
}

/// Count added and removed lines in a patch, ignoring file headers.
pub fn count_changed_lines(patch: &str) -> (usize, usize) {
    let mut plus = 0;
    let mut minus = 0;
    let mut in_hunk = false;
    for line in patch.lines() {
        match PatchLine::classify(line) {
            PatchLine::Header(_) => in_hunk = true,
            PatchLine::Added(_) if in_hunk => plus += 1,
            PatchLine::Removed(_) if in_hunk => minus += 1,
            _ => {}
        }
    }
    (plus, minus)
}
