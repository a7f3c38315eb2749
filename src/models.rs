use std::borrow::Cow;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::encoding::decode_bytes;
use crate::hunk::count_changed_lines;

/// How a file was changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EditKind {
    Added,
    Deleted,
    Modified,
    Renamed,
    #[default]
    Unknown,
}

impl EditKind {
    /// Map a `git diff --name-status` status letter (`M`, `A`, `R100`, ...).
    pub fn from_git_status(status: &str) -> Self {
        match status.chars().next() {
            Some('A') => Self::Added,
            Some('D') => Self::Deleted,
            Some('M') | Some('T') => Self::Modified,
            Some('R') => Self::Renamed,
            _ => Self::Unknown,
        }
    }
}

impl Display for EditKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Added => "added",
            Self::Deleted => "deleted",
            Self::Modified => "modified",
            Self::Renamed => "renamed",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// File content as text or as raw bytes of unknown encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl FileContent {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Bytes(bytes) => bytes.is_empty(),
        }
    }

    /// Content as text. Bytes go through the encoding fallback chain and
    /// decode to an empty string if no encoding accepts them.
    pub fn decode(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text),
            Self::Bytes(bytes) => Cow::Owned(
                decode_bytes(bytes)
                    .map(|(text, _)| text)
                    .unwrap_or_default(),
            ),
        }
    }
}

impl From<&str> for FileContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for FileContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// One changed file as reported by a diff provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileChange {
    pub filename: String,
    #[serde(default)]
    pub old_filename: Option<String>,
    #[serde(default)]
    pub base_content: Option<FileContent>,
    #[serde(default)]
    pub head_content: Option<FileContent>,
    #[serde(default)]
    pub patch: Option<String>,
    #[serde(default)]
    pub edit_kind: EditKind,
    /// Rendered size of the file's extended diff, cached by the first pass.
    #[serde(skip)]
    pub token_count: Option<usize>,
    #[serde(default)]
    pub plus_lines: usize,
    #[serde(default)]
    pub minus_lines: usize,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub ai_summary: Option<String>,
}

impl FileChange {
    pub fn new(filename: impl Into<String>, edit_kind: EditKind) -> Self {
        Self {
            filename: filename.into(),
            edit_kind,
            ..Self::default()
        }
    }

    /// Set the patch and recount its added/removed lines.
    pub fn with_patch(mut self, patch: impl Into<String>) -> Self {
        let patch = patch.into();
        let (plus, minus) = count_changed_lines(&patch);
        self.plus_lines = plus;
        self.minus_lines = minus;
        self.patch = Some(patch);
        self
    }

    pub fn with_base(mut self, content: impl Into<FileContent>) -> Self {
        self.base_content = Some(content.into());
        self
    }

    pub fn with_head(mut self, content: impl Into<FileContent>) -> Self {
        self.head_content = Some(content.into());
        self
    }

    pub fn with_old_filename(mut self, old_filename: impl Into<String>) -> Self {
        self.old_filename = Some(old_filename.into());
        self
    }

    pub fn with_ai_summary(mut self, summary: impl Into<String>) -> Self {
        self.ai_summary = Some(summary.into());
        self
    }

    /// The patch, if present and non-empty.
    pub fn patch_text(&self) -> Option<&str> {
        self.patch.as_deref().filter(|patch| !patch.is_empty())
    }

    /// Whether the file has no usable new content.
    pub fn head_is_empty(&self) -> bool {
        self.head_content
            .as_ref()
            .map_or(true, FileContent::is_empty)
    }
}
