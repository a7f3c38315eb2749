//! Shared test utilities for creating test fixtures.
//!
//! This module provides helper functions for creating test data
//! used across multiple test modules.

use crate::language::{LanguageGroup, OTHER_LANGUAGE};
use crate::models::{EditKind, FileChange};
use crate::tokens::TokenHandler;

/// Create a changed file with the given patch
pub fn make_file(filename: &str, edit_kind: EditKind, patch: &str) -> FileChange {
    FileChange::new(filename, edit_kind).with_patch(patch)
}

/// Create a handler that counts one token per character
pub fn char_handler(prompt_tokens: usize) -> TokenHandler {
    TokenHandler::new(Box::new(|text: &str| text.chars().count()), prompt_tokens)
}

/// Wrap files in a single language group
pub fn single_group(files: Vec<FileChange>) -> Vec<LanguageGroup> {
    vec![LanguageGroup {
        language: OTHER_LANGUAGE.to_string(),
        files,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_file() {
        let file = make_file("src/main.rs", EditKind::Added, "@@ -0,0 +1,1 @@\n+fn main() {}");
        assert_eq!(file.filename, "src/main.rs");
        assert_eq!(file.plus_lines, 1);
    }

    #[test]
    fn test_char_handler() {
        let handler = char_handler(3);
        assert_eq!(handler.prompt_tokens, 3);
        assert_eq!(handler.count_tokens("héllo"), 5);
    }
}
