//! Sources of changed files.
//!
//! A [`DiffProvider`] yields the changed files of a change set, with their
//! contents and patches, and optionally the size of each language in the
//! repository. [`GitSource`] reads a local repository and [`ManifestSource`]
//! reads files listed in a JSON manifest.

mod git;
mod manifest;

use std::collections::HashMap;

use log::info;
use similar::TextDiff;

use crate::models::FileChange;

pub use git::GitSource;
pub use manifest::{Manifest, ManifestEntry, ManifestSource};

/// Errors from diff providers
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
    #[error("Git command failed: {0}")]
    Git(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid manifest: {0}")]
    Manifest(String),
}

/// Trait for change set sources - allows mocking in tests
pub trait DiffProvider {
    /// All changed files of the change set
    fn get_diff_files(&self) -> Result<Vec<FileChange>, ProviderError>;

    /// Size of each language in the repository, by language name
    fn get_languages(&self) -> Result<HashMap<String, u64>, ProviderError> {
        Ok(HashMap::new())
    }
}

/// Build a unified diff from a file's two versions.
///
/// Trailing whitespace of both versions is trimmed and a final newline added
/// before diffing. The result starts at the first hunk header, like the
/// patches read from git. Returns an empty string if both versions are empty.
pub fn load_large_diff(filename: &str, new_content: &str, original_content: &str) -> String {
    if new_content.is_empty() && original_content.is_empty() {
        return String::new();
    }
    info!(
        "File was modified, but no patch was found. Manually creating patch: {}",
        filename
    );

    let original = format!("{}\n", original_content.trim_end());
    let new = format!("{}\n", new_content.trim_end());
    TextDiff::from_lines(&original, &new)
        .unified_diff()
        .context_radius(3)
        .to_string()
}
