//! Hunk extension.
//!
//! Widens every hunk of a patch with unchanged lines taken from the original
//! file so the reader sees more of the surrounding code. Hunks whose anchor
//! line does not match the original file are passed through untouched, and
//! any internal failure returns the input patch unchanged.

use log::{debug, info, warn};

use crate::encoding::{reencode_as_utf8, Encoding, FALLBACK_ENCODINGS};
use crate::hunk::HunkHeader;
use crate::models::FileContent;

/// Settings for [`extend_patch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendOptions {
    pub extra_lines_before: usize,
    pub extra_lines_after: usize,
    /// Snap the leading context to the hunk's section header when possible.
    pub allow_dynamic_context: bool,
    pub dynamic_context_lines_before: usize,
    pub skip_extensions: Vec<String>,
}

impl ExtendOptions {
    /// Fixed context without dynamic anchoring or skipped extensions.
    pub fn fixed(before: usize, after: usize) -> Self {
        Self {
            extra_lines_before: before,
            extra_lines_after: after,
            allow_dynamic_context: false,
            dynamic_context_lines_before: 0,
            skip_extensions: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtendError {
    #[error("Hunk line number out of range: {0}")]
    LineOutOfRange(usize),
    #[error("Hunk range does not fit in a line number")]
    Overflow,
}

/// Extend every valid hunk in `patch` with context from `original`.
///
/// Returns the patch unchanged when there is nothing to extend with, when the
/// file type is excluded, or when extension fails.
pub fn extend_patch(
    original: Option<&FileContent>,
    patch: &str,
    new: Option<&FileContent>,
    filename: &str,
    options: &ExtendOptions,
) -> String {
    if patch.is_empty()
        || (options.extra_lines_before == 0 && options.extra_lines_after == 0)
    {
        return patch.to_string();
    }
    let Some(original) = original.filter(|content| !content.is_empty()) else {
        return patch.to_string();
    };

    let original_text = original.decode();
    if original_text.is_empty() {
        return patch.to_string();
    }
    let new_text = new.map(FileContent::decode).unwrap_or_default();

    if should_skip(filename, &options.skip_extensions) {
        debug!("Not extending {}: excluded file type", filename);
        return patch.to_string();
    }

    match PatchExtender::new(patch, &original_text, &new_text, options).process() {
        Ok(extended) => extended,
        Err(err) => {
            warn!("Failed to extend patch for {}: {}", filename, err);
            patch.to_string()
        }
    }
}

fn should_skip(filename: &str, skip_extensions: &[String]) -> bool {
    skip_extensions
        .iter()
        .any(|ext| !ext.is_empty() && filename.ends_with(ext.as_str()))
}

/// Line range of an extended hunk, in 1-based file lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HunkRange {
    old_start: i64,
    old_size: i64,
    new_start: i64,
    new_size: i64,
}

impl HunkRange {
    fn from_header(header: &HunkHeader) -> Result<Self, ExtendError> {
        Ok(Self {
            old_start: to_line(header.old_start)?,
            old_size: to_line(header.old_size)?,
            new_start: to_line(header.new_start)?,
            new_size: to_line(header.new_size)?,
        })
    }

    /// Move the start of both sides down by `offset`, keeping the end fixed.
    fn shift(&mut self, offset: usize) -> Result<(), ExtendError> {
        let offset = to_line(offset)?;
        self.old_start = checked(self.old_start.checked_add(offset))?;
        self.old_size = checked(self.old_size.checked_sub(offset))?;
        self.new_start = checked(self.new_start.checked_add(offset))?;
        self.new_size = checked(self.new_size.checked_sub(offset))?;
        Ok(())
    }

    /// Last line of the old side.
    fn old_end(&self) -> Result<i64, ExtendError> {
        checked(
            self.old_start
                .checked_add(self.old_size)
                .and_then(|end| end.checked_sub(1)),
        )
    }

    fn header_line(&self, section_header: &str) -> String {
        format!(
            "@@ -{},{} +{},{} @@ {}",
            self.old_start, self.old_size, self.new_start, self.new_size, section_header
        )
    }
}

fn to_line(value: usize) -> Result<i64, ExtendError> {
    i64::try_from(value).map_err(|_| ExtendError::LineOutOfRange(value))
}

fn checked(value: Option<i64>) -> Result<i64, ExtendError> {
    value.ok_or(ExtendError::Overflow)
}

/// `size + grown + after`
fn widen(size: i64, grown: i64, after: i64) -> Result<i64, ExtendError> {
    checked(size.checked_add(grown).and_then(|size| size.checked_add(after)))
}

/// Lines `[start, end)` of `lines` (0-based), clamped to the slice bounds.
fn clamped<'l, 'a>(lines: &'l [&'a str], start: i64, end: i64) -> &'l [&'a str] {
    let len = lines.len() as i64;
    let start = start.clamp(0, len) as usize;
    let end = end.clamp(0, len) as usize;
    if start >= end {
        &[]
    } else {
        &lines[start..end]
    }
}

/// The hunk currently being copied.
struct ActiveHunk {
    range: HunkRange,
    valid: bool,
}

/// Line-by-line extender. Outside a hunk `current` is `None`.
struct PatchExtender<'a> {
    options: &'a ExtendOptions,
    patch_lines: Vec<&'a str>,
    original_lines: Vec<&'a str>,
    new_lines: Vec<&'a str>,
    output: Vec<String>,
    current: Option<ActiveHunk>,
    detected_encoding: Option<Encoding>,
}

impl<'a> PatchExtender<'a> {
    fn new(
        patch: &'a str,
        original: &'a str,
        new: &'a str,
        options: &'a ExtendOptions,
    ) -> Self {
        Self {
            options,
            patch_lines: patch.lines().collect(),
            original_lines: original.lines().collect(),
            new_lines: new.lines().collect(),
            output: Vec::new(),
            current: None,
            detected_encoding: None,
        }
    }

    fn process(mut self) -> Result<String, ExtendError> {
        for index in 0..self.patch_lines.len() {
            let line = self.patch_lines[index];
            if line.starts_with("@@") {
                if let Some(header) = HunkHeader::parse(line) {
                    self.finish_hunk()?;
                    self.start_hunk(index, line, header)?;
                    continue;
                }
            }
            self.output.push(line.to_string());
        }
        self.finish_hunk()?;
        Ok(self.output.join("\n"))
    }

    fn start_hunk(
        &mut self,
        index: usize,
        line: &str,
        header: HunkHeader,
    ) -> Result<(), ExtendError> {
        let range = HunkRange::from_header(&header)?;
        let valid = self.range_in_file(&range) && self.anchor_matches_file(index, &header);

        if valid {
            self.extend_hunk(range, header.section_header)?;
        } else {
            self.output.push(line.to_string());
        }
        self.current = Some(ActiveHunk { range, valid });
        Ok(())
    }

    /// Append trailing context for the hunk that just ended.
    fn finish_hunk(&mut self) -> Result<(), ExtendError> {
        let Some(hunk) = self.current.take() else {
            return Ok(());
        };
        let after = to_line(self.options.extra_lines_after)?;
        if !hunk.valid || after == 0 {
            return Ok(());
        }
        let end = hunk.range.old_end()?;
        let trailing = clamped(&self.original_lines, end, checked(end.checked_add(after))?);
        self.output
            .extend(trailing.iter().map(|line| format!(" {}", line)));
        Ok(())
    }

    /// Whether the hunk's own old-side lines lie within the original file.
    fn range_in_file(&self, range: &HunkRange) -> bool {
        let original_len = self.original_lines.len() as i64;
        if range.old_end().is_ok_and(|end| end <= original_len) {
            return true;
        }
        info!(
            "Invalid hunk in patch, lines {},{} in hunk header run past the original file",
            range.old_start, range.old_size
        );
        false
    }

    /// Check the first context line of the hunk against the original file.
    fn anchor_matches_file(&mut self, index: usize, header: &HunkHeader) -> bool {
        let Some(&next) = self.patch_lines.get(index + 1) else {
            return true;
        };
        if next.is_empty() {
            return false;
        }
        if !next.starts_with(' ') {
            return true;
        }

        let Some(original) = header
            .old_start
            .checked_sub(1)
            .and_then(|i| self.original_lines.get(i).copied())
        else {
            info!(
                "Invalid hunk in patch, line {} in hunk header is outside the original file",
                header.old_start
            );
            return false;
        };

        let patch_line = next.trim();
        let original_line = original.trim();
        if patch_line == original_line {
            return true;
        }

        if let Some(encoding) = self.matching_encoding(original_line, patch_line) {
            if self.detected_encoding != Some(encoding) {
                info!(
                    "Detected different encoding in hunk header line {}, needed encoding: {}",
                    header.old_start,
                    encoding.name()
                );
                self.detected_encoding = Some(encoding);
            }
            return false;
        }

        info!(
            "Invalid hunk in patch, line {} in hunk header doesn't match the original file content",
            header.old_start
        );
        false
    }

    /// First encoding (cached one first) under which the original line reads as the patch line.
    fn matching_encoding(&self, original_line: &str, patch_line: &str) -> Option<Encoding> {
        self.detected_encoding
            .into_iter()
            .chain(
                FALLBACK_ENCODINGS
                    .into_iter()
                    .filter(|encoding| Some(*encoding) != self.detected_encoding),
            )
            .find(|&encoding| {
                reencode_as_utf8(original_line, encoding)
                    .is_some_and(|text| text.trim() == patch_line)
            })
    }

    /// Compute the widened range for a hunk with `before` leading lines.
    fn context_limits(&self, hunk: &HunkRange, before: usize) -> Result<HunkRange, ExtendError> {
        let before = to_line(before)?;
        let after = to_line(self.options.extra_lines_after)?;

        let old_start = checked(hunk.old_start.checked_sub(before))?.max(1);
        let mut old_size = widen(hunk.old_size, hunk.old_start - old_start, after)?.max(0);
        let new_start = checked(hunk.new_start.checked_sub(before))?.max(1);
        let mut new_size = widen(hunk.new_size, hunk.new_start - new_start, after)?.max(0);

        let original_len = to_line(self.original_lines.len())?;
        let end = checked(old_start.checked_add(old_size))? - 1;
        if end > original_len {
            let overflow = end - original_len;
            old_size = checked(old_size.checked_sub(overflow))?.max(hunk.old_size);
            new_size = checked(new_size.checked_sub(overflow))?.max(hunk.new_size);
        }

        Ok(HunkRange {
            old_start,
            old_size,
            new_start,
            new_size,
        })
    }

    /// Leading lines `[range.start, hunk.start)` on the original side.
    fn leading_original(&self, range: &HunkRange, hunk: &HunkRange) -> &[&'a str] {
        clamped(&self.original_lines, range.old_start - 1, hunk.old_start - 1)
    }

    fn leading_new(&self, range: &HunkRange, hunk: &HunkRange) -> &[&'a str] {
        clamped(&self.new_lines, range.new_start - 1, hunk.new_start - 1)
    }

    /// Start the extended range at the nearest line containing the section
    /// header, if the leading lines from there on are unchanged on both sides.
    fn dynamic_anchor(
        &self,
        hunk: &HunkRange,
        section_header: &str,
    ) -> Result<Option<HunkRange>, ExtendError> {
        if !self.options.allow_dynamic_context || self.new_lines.is_empty() {
            return Ok(None);
        }
        let mut range = self.context_limits(hunk, self.options.dynamic_context_lines_before)?;
        let leading_original = self.leading_original(&range, hunk);
        let leading_new = self.leading_new(&range, hunk);

        let Some(offset) = leading_original
            .iter()
            .position(|line| line.contains(section_header))
        else {
            return Ok(None);
        };
        let unchanged = leading_original[offset..] == *leading_new.get(offset..).unwrap_or(&[]);
        if !unchanged {
            return Ok(None);
        }
        range.shift(offset)?;
        Ok(Some(range))
    }

    /// Offset from which both leading line lists are identical.
    fn common_suffix_offset(original: &[&str], new: &[&str]) -> Option<usize> {
        (0..original.len()).find(|&i| original[i..] == *new.get(i..).unwrap_or(&[]))
    }

    fn extend_hunk(
        &mut self,
        hunk: HunkRange,
        mut section_header: String,
    ) -> Result<(), ExtendError> {
        let mut range = match self.dynamic_anchor(&hunk, &section_header)? {
            Some(anchored) => {
                section_header.clear();
                anchored
            }
            None => self.context_limits(&hunk, self.options.extra_lines_before)?,
        };

        let mut leading = self.leading_original(&range, &hunk);
        if !self.new_lines.is_empty() {
            let leading_new = self.leading_new(&range, &hunk);
            if leading != leading_new {
                match Self::common_suffix_offset(leading, leading_new) {
                    Some(offset) => {
                        leading = &leading[offset..];
                        range.shift(offset)?;
                    }
                    None => {
                        range = hunk;
                        leading = &[];
                    }
                }
            }
        }

        if !section_header.is_empty()
            && !self.options.allow_dynamic_context
            && leading.iter().any(|line| line.contains(section_header.as_str()))
        {
            section_header.clear();
        }

        let leading: Vec<String> = leading.iter().map(|line| format!(" {}", line)).collect();
        self.output.push(String::new());
        self.output.push(range.header_line(&section_header));
        self.output.extend(leading);
        Ok(())
    }
}
