//! Packing of per-file diffs into token-bounded documents.
//!
//! The extended diff renders every file with extra context. When that does
//! not fit the model, the compressed diff drops deletion-only hunks and packs
//! files greedily, most expensive first within each language, into one or
//! more documents. Files that do not fit are carried to the next pass or
//! listed by name only.

use std::collections::HashMap;

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::LargePatchPolicy;
use crate::deletions::handle_patch_deletions;
use crate::dual_view::convert_to_dual_view;
use crate::extend::{extend_patch, ExtendOptions};
use crate::language::LanguageGroup;
use crate::models::{EditKind, FileChange};
use crate::tokens::{clip_tokens, ClipOptions, TokenHandler};

pub const DELETED_FILES_HEADER: &str = "Deleted files:\n";
pub const MORE_MODIFIED_FILES_HEADER: &str =
    "Additional modified files (insufficient token budget to process):\n";
pub const ADDED_FILES_HEADER: &str =
    "Additional added files (insufficient token budget to process):\n";

/// Tokens kept free for the model's answer when deciding whether a file fits.
pub const OUTPUT_BUFFER_TOKENS_SOFT_THRESHOLD: usize = 1500;
/// Once a document reaches `limit - HARD`, no further file is considered.
pub const OUTPUT_BUFFER_TOKENS_HARD_THRESHOLD: usize = 1000;

/// Minimum free budget for appending the unprocessed-file lists.
const FILE_LIST_MIN_TOKENS: i64 = 10;

/// Result of rendering every file with extended context.
#[derive(Debug, Clone, Default)]
pub struct ExtendedDiff {
    pub patches: Vec<String>,
    pub patch_tokens: Vec<usize>,
    /// Sum of all patches plus the prompt overhead.
    pub total_tokens: usize,
}

impl ExtendedDiff {
    pub fn render(&self) -> String {
        self.patches.join("\n")
    }
}

/// Render every file with a patch, extended by `options`, and cache each
/// file's token count on the file.
pub fn generate_extended_diff(
    groups: &mut [LanguageGroup],
    handler: &TokenHandler,
    add_line_numbers: bool,
    options: &ExtendOptions,
    enable_ai_metadata: bool,
) -> ExtendedDiff {
    let mut result = ExtendedDiff {
        total_tokens: handler.prompt_tokens,
        ..ExtendedDiff::default()
    };

    for file in groups.iter_mut().flat_map(|group| group.files.iter_mut()) {
        let Some(patch) = file.patch_text() else {
            continue;
        };

        let extended = extend_patch(
            file.base_content.as_ref(),
            patch,
            file.head_content.as_ref(),
            &file.filename,
            options,
        );
        if extended.is_empty() {
            warn!("Failed to extend patch for file: {}", file.filename);
            continue;
        }

        let mut rendered = if add_line_numbers {
            convert_to_dual_view(&extended, Some(&*file))
        } else {
            let spaced = extended.replace("\n@@ ", "\n\n@@ ");
            format!(
                "\n\n## File: '{}'\n\n{}\n",
                file.filename.trim(),
                spaced.trim()
            )
        };

        if enable_ai_metadata {
            if let Some(summary) = &file.ai_summary {
                rendered = add_ai_summary_top_patch(summary, &rendered);
            }
        }

        let tokens = handler.count_tokens(&rendered);
        file.token_count = Some(tokens);
        result.total_tokens += tokens;
        result.patch_tokens.push(tokens);
        result.patches.push(rendered);
    }

    result
}

/// Insert an AI-generated summary right below the first `## File:` line.
pub fn add_ai_summary_top_patch(summary: &str, patch: &str) -> String {
    let insert = format!("\n### AI-generated changes summary:\n{}", summary);
    let mut offset = 0;
    for line in patch.split_inclusive('\n') {
        if line.starts_with("## File:") || line.starts_with("## file:") {
            let end = offset + line.trim_end_matches('\n').len();
            let mut result = String::with_capacity(patch.len() + insert.len());
            result.push_str(&patch[..end]);
            result.push_str(&insert);
            result.push_str(&patch[end..]);
            return result;
        }
        offset += line.len();
    }
    patch.to_string()
}

/// One file's text within a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSection {
    pub filename: String,
    pub text: String,
}

/// An ordered set of file sections that fits one model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffDocument {
    sections: Vec<FileSection>,
    total_tokens: usize,
}

impl DiffDocument {
    fn new(prompt_tokens: usize) -> Self {
        Self {
            sections: Vec::new(),
            total_tokens: prompt_tokens,
        }
    }

    fn push(&mut self, filename: &str, text: String, tokens: usize) {
        self.sections.push(FileSection {
            filename: filename.to_string(),
            text,
        });
        self.total_tokens += tokens;
    }

    /// Token count of the document including the prompt overhead.
    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn sections(&self) -> &[FileSection] {
        &self.sections
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|section| section.filename.as_str())
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.filenames().any(|name| name == filename)
    }

    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(|section| section.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Compressed patch of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub filename: String,
    pub patch: String,
    pub tokens: usize,
    pub edit_kind: EditKind,
}

/// Compressed patches by filename, in insertion order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileIndex {
    entries: Vec<FileEntry>,
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

impl FileIndex {
    /// Insert an entry. A repeated filename replaces the earlier entry in place.
    pub fn insert(&mut self, entry: FileEntry) {
        match self.positions.get(&entry.filename) {
            Some(&index) => self.entries[index] = entry,
            None => {
                self.positions
                    .insert(entry.filename.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn get(&self, filename: &str) -> Option<&FileEntry> {
        self.positions
            .get(filename)
            .map(|&index| &self.entries[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Output of the compression pass.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkPlan {
    pub documents: Vec<DiffDocument>,
    /// Files that did not fit into any document.
    pub remaining_filenames: Vec<String>,
    /// Deleted files reduced to their name.
    pub deleted_filenames: Vec<String>,
    pub per_file_index: FileIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressOptions {
    pub convert_to_line_numbers: bool,
    /// Pack leftover files into further documents.
    pub large_pr_handling: bool,
    /// Upper bound on the number of documents when `large_pr_handling` is set.
    pub max_ai_calls: usize,
}

/// Files in cost order: language groups in order, most expensive first within each.
pub fn files_by_cost(groups: &[LanguageGroup]) -> Vec<&FileChange> {
    let mut sorted = Vec::new();
    for group in groups {
        let mut files: Vec<&FileChange> = group.files.iter().collect();
        files.sort_by_key(|file| {
            std::cmp::Reverse(file.token_count.map_or(-1, |tokens| tokens as i64))
        });
        sorted.extend(files);
    }
    sorted
}

/// Pack the files into documents under the model budget.
pub fn generate_compressed_diff(
    groups: &[LanguageGroup],
    handler: &TokenHandler,
    model_limit: usize,
    options: &CompressOptions,
) -> ChunkPlan {
    let sorted = files_by_cost(groups);
    let mut deleted_filenames: Vec<String> = Vec::new();
    let mut index = FileIndex::default();

    for file in &sorted {
        let Some(patch) = file.patch_text() else {
            continue;
        };
        let Some(mut patch) = handle_patch_deletions(file, patch) else {
            if !deleted_filenames.contains(&file.filename) {
                deleted_filenames.push(file.filename.clone());
            }
            continue;
        };
        if options.convert_to_line_numbers {
            patch = convert_to_dual_view(&patch, Some(file));
        }
        let tokens = handler.count_tokens(&patch);
        index.insert(FileEntry {
            filename: file.filename.clone(),
            patch,
            tokens,
            edit_kind: file.edit_kind,
        });
    }

    let remaining: Vec<String> = sorted.iter().map(|file| file.filename.clone()).collect();
    let first = generate_full_patch(
        options.convert_to_line_numbers,
        &index,
        model_limit,
        &remaining,
        handler,
    );
    let mut documents = vec![first.document];
    let mut remaining = first.remaining;

    if options.large_pr_handling {
        let extra_passes = options.max_ai_calls.saturating_sub(1);
        for _ in 0..extra_passes {
            if remaining.is_empty() {
                break;
            }
            let pass = generate_full_patch(
                options.convert_to_line_numbers,
                &index,
                model_limit,
                &remaining,
                handler,
            );
            if pass.document.is_empty() {
                // Every remaining file exceeds the budget on its own.
                break;
            }
            documents.push(pass.document);
            remaining = pass.remaining;
        }
    }

    ChunkPlan {
        documents,
        remaining_filenames: remaining,
        deleted_filenames,
        per_file_index: index,
    }
}

/// One packing pass.
#[derive(Debug, Clone)]
pub struct PackedPass {
    pub document: DiffDocument,
    /// Files deferred because they did not fit this pass.
    pub remaining: Vec<String>,
}

/// Greedily pack `remaining` files, in order, into one document.
///
/// Once the running total passes `limit - HARD` every further file is
/// dropped. A file that would push the total past `limit - SOFT` is deferred.
pub fn generate_full_patch(
    convert_to_line_numbers: bool,
    index: &FileIndex,
    model_limit: usize,
    remaining: &[String],
    handler: &TokenHandler,
) -> PackedPass {
    let mut document = DiffDocument::new(handler.prompt_tokens);
    let mut deferred = Vec::new();
    let newline_tokens = handler.count_tokens("\n\n");
    let hard_limit = model_limit.saturating_sub(OUTPUT_BUFFER_TOKENS_HARD_THRESHOLD);
    let soft_limit = model_limit.saturating_sub(OUTPUT_BUFFER_TOKENS_SOFT_THRESHOLD);

    for filename in remaining {
        let Some(entry) = index.get(filename) else {
            continue;
        };

        if document.total_tokens() > hard_limit {
            warn!("File was fully skipped, no more tokens: {}", filename);
            continue;
        }

        if document.total_tokens() + entry.tokens > soft_limit {
            debug!("Patch too large, deferring it: '{}'", filename);
            deferred.push(filename.clone());
            continue;
        }

        if entry.patch.is_empty() {
            continue;
        }
        if convert_to_line_numbers {
            let text = format!("\n\n{}", entry.patch.trim());
            document.push(filename, text, newline_tokens + entry.tokens);
        } else {
            let header = format!("\n\n## File: '{}'\n\n", filename.trim());
            let header_tokens = handler.count_tokens(&header);
            let text = format!("{}{}\n", header, entry.patch.trim());
            document.push(filename, text, header_tokens + entry.tokens);
        }
        debug!(
            "Tokens: {}, last filename: {}",
            document.total_tokens(),
            filename
        );
    }

    PackedPass {
        document,
        remaining: deferred,
    }
}

/// Render the first document and append name-only lists of the added,
/// modified and deleted files it left out, as far as the budget allows.
pub fn append_unprocessed_file_lists(
    plan: &ChunkPlan,
    handler: &TokenHandler,
    model_limit: usize,
) -> String {
    let Some(first) = plan.documents.first() else {
        return String::new();
    };
    let max_tokens = model_limit as i64 - OUTPUT_BUFFER_TOKENS_HARD_THRESHOLD as i64;
    let mut current_tokens = first.total_tokens() as i64;
    let mut final_diff = first.render();

    let mut added = FileList::new(ADDED_FILES_HEADER);
    let mut modified = FileList::new(MORE_MODIFIED_FILES_HEADER);
    let mut deleted = FileList::new(DELETED_FILES_HEADER);

    if max_tokens - current_tokens > FILE_LIST_MIN_TOKENS {
        for entry in plan.per_file_index.iter() {
            if first.contains(&entry.filename) {
                continue;
            }
            match entry.edit_kind {
                EditKind::Added => added.push(&entry.filename),
                EditKind::Modified | EditKind::Renamed => modified.push(&entry.filename),
                EditKind::Deleted => deleted.push(&entry.filename),
                EditKind::Unknown => {}
            }
        }
        for filename in &plan.deleted_filenames {
            deleted.push(filename);
        }
    }

    for (list, counts_toward_budget) in [(added, true), (modified, true), (deleted, false)] {
        let clipped = clip_tokens(
            &list.text,
            max_tokens - current_tokens,
            handler.counter(),
            ClipOptions::default(),
        );
        if clipped.is_empty() {
            continue;
        }
        final_diff.push_str("\n\n");
        final_diff.push_str(&clipped);
        if counts_toward_budget {
            current_tokens += handler.count_tokens(&clipped) as i64 + 2;
        }
    }

    debug!("Diff with unprocessed file lists: {} tokens", current_tokens);
    final_diff
}

/// A header followed by one filename per line; empty until a name is pushed.
struct FileList {
    header: &'static str,
    text: String,
}

impl FileList {
    fn new(header: &'static str) -> Self {
        Self {
            header,
            text: String::new(),
        }
    }

    fn push(&mut self, filename: &str) {
        if self.text.is_empty() {
            self.text.push_str(self.header);
        }
        self.text.push('\n');
        self.text.push_str(filename);
    }
}

/// Options for [`generate_multi_diffs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiDiffOptions {
    pub max_calls: usize,
    pub add_line_numbers: bool,
    pub large_patch_policy: LargePatchPolicy,
    pub enable_ai_metadata: bool,
}

/// Split all files into up to `max_calls` diffs, each under the model budget.
///
/// A file too large for any single diff is skipped or clipped according to
/// the large patch policy.
pub fn generate_multi_diffs(
    groups: &[LanguageGroup],
    handler: &TokenHandler,
    model_limit: usize,
    options: &MultiDiffOptions,
) -> Vec<String> {
    let soft_limit = model_limit.saturating_sub(OUTPUT_BUFFER_TOKENS_SOFT_THRESHOLD);
    let mut diffs = Vec::new();
    let mut patches: Vec<String> = Vec::new();
    let mut total_tokens = handler.prompt_tokens;
    let mut call_number = 1;

    for file in files_by_cost(groups) {
        if call_number > options.max_calls {
            debug!("Reached max calls ({})", options.max_calls);
            break;
        }
        let Some(patch) = file.patch_text() else {
            continue;
        };
        let Some(patch) = handle_patch_deletions(file, patch) else {
            continue;
        };

        let mut patch = if options.add_line_numbers {
            convert_to_dual_view(&patch, Some(file))
        } else {
            format!(
                "\n\n## File: '{}'\n\n{}\n",
                file.filename.trim(),
                patch.trim()
            )
        };
        if options.enable_ai_metadata {
            if let Some(summary) = &file.ai_summary {
                patch = add_ai_summary_top_patch(summary, &patch);
            }
        }
        let mut patch_tokens = handler.count_tokens(&patch);

        if !patch.is_empty() && handler.prompt_tokens + patch_tokens > soft_limit {
            match fit_large_patch(&patch, patch_tokens, handler, soft_limit, options) {
                Some((clipped, tokens)) => {
                    info!("Clipped large patch for file: {}", file.filename);
                    patch = clipped;
                    patch_tokens = tokens;
                }
                None => {
                    warn!("Patch too large, skipping: {}", file.filename);
                    continue;
                }
            }
        }

        if !patch.is_empty() && total_tokens + patch_tokens > soft_limit {
            diffs.push(patches.join("\n"));
            patches.clear();
            total_tokens = handler.prompt_tokens;
            call_number += 1;
            if call_number > options.max_calls {
                debug!("Reached max calls ({})", options.max_calls);
                break;
            }
            debug!("Call number: {}", call_number);
        }

        if !patch.is_empty() {
            patches.push(patch);
            total_tokens += patch_tokens;
            debug!("Tokens: {}, last filename: {}", total_tokens, file.filename);
        }
    }

    if !patches.is_empty() {
        diffs.push(patches.join("\n").trim().to_string());
    }
    diffs
}

/// Apply the large patch policy to a patch that exceeds the budget on its own.
fn fit_large_patch(
    patch: &str,
    patch_tokens: usize,
    handler: &TokenHandler,
    soft_limit: usize,
    options: &MultiDiffOptions,
) -> Option<(String, usize)> {
    match options.large_patch_policy {
        LargePatchPolicy::Skip => None,
        LargePatchPolicy::Clip => {
            let budget = soft_limit as i64 - handler.prompt_tokens as i64;
            let clipped = clip_tokens(
                patch,
                budget,
                handler.counter(),
                ClipOptions {
                    add_three_dots: true,
                    num_input_tokens: Some(patch_tokens),
                    delete_last_line: true,
                },
            );
            let tokens = handler.count_tokens(&clipped);
            if !clipped.is_empty() && handler.prompt_tokens + tokens > soft_limit {
                None
            } else {
                Some((clipped, tokens))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{char_handler, make_file, single_group};

    #[test]
    fn test_extended_diff_formats_and_caches_tokens() {
        let mut groups = single_group(vec![make_file(
            "a.rs",
            EditKind::Modified,
            "@@ -1,1 +1,1 @@\n-a\n+b",
        )]);
        let handler = char_handler(7);
        let diff = generate_extended_diff(
            &mut groups,
            &handler,
            false,
            &ExtendOptions::fixed(0, 0),
            false,
        );
        let expected = "\n\n## File: 'a.rs'\n\n@@ -1,1 +1,1 @@\n-a\n+b\n";
        assert_eq!(diff.patches, vec![expected.to_string()]);
        assert_eq!(diff.total_tokens, 7 + expected.len());
        assert_eq!(groups[0].files[0].token_count, Some(expected.len()));
    }

    #[test]
    fn test_extended_diff_skips_files_without_patch() {
        let mut groups = single_group(vec![FileChange::new("empty.rs", EditKind::Modified)]);
        let handler = char_handler(0);
        let diff = generate_extended_diff(
            &mut groups,
            &handler,
            true,
            &ExtendOptions::fixed(1, 1),
            false,
        );
        assert!(diff.patches.is_empty());
        assert_eq!(groups[0].files[0].token_count, None);
    }

    #[test]
    fn test_extended_diff_with_ai_summary() {
        let file = make_file("a.rs", EditKind::Modified, "@@ -1,1 +1,1 @@\n-a\n+b")
            .with_ai_summary("Renames a to b");
        let mut groups = single_group(vec![file]);
        let handler = char_handler(0);
        let diff = generate_extended_diff(
            &mut groups,
            &handler,
            false,
            &ExtendOptions::fixed(0, 0),
            true,
        );
        assert!(diff.patches[0].starts_with(
            "\n\n## File: 'a.rs'\n### AI-generated changes summary:\nRenames a to b\n"
        ));
    }

    #[test]
    fn test_add_ai_summary_without_file_header() {
        assert_eq!(add_ai_summary_top_patch("s", "no header"), "no header");
        assert_eq!(
            add_ai_summary_top_patch("s", "## File: 'x'"),
            "## File: 'x'\n### AI-generated changes summary:\ns"
        );
    }

    #[test]
    fn test_files_by_cost_orders_within_group() {
        let mut cheap = make_file("cheap.rs", EditKind::Modified, "@@ -1 +1 @@\n+a");
        cheap.token_count = Some(5);
        let mut pricey = make_file("pricey.rs", EditKind::Modified, "@@ -1 +1 @@\n+a");
        pricey.token_count = Some(50);
        let unknown = make_file("unknown.rs", EditKind::Modified, "@@ -1 +1 @@\n+a");
        let groups = single_group(vec![cheap, unknown, pricey]);
        let order: Vec<&str> = files_by_cost(&groups)
            .iter()
            .map(|f| f.filename.as_str())
            .collect();
        assert_eq!(order, vec!["pricey.rs", "cheap.rs", "unknown.rs"]);
    }

    fn index_of(entries: &[(&str, usize, EditKind)]) -> FileIndex {
        let mut index = FileIndex::default();
        for (name, tokens, kind) in entries {
            index.insert(FileEntry {
                filename: name.to_string(),
                patch: "x".repeat(*tokens),
                tokens: *tokens,
                edit_kind: *kind,
            });
        }
        index
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_full_patch_defers_and_skips() {
        // limit 3000: soft budget 1500, hard budget 2000.
        let index = index_of(&[
            ("a.rs", 1000, EditKind::Modified),
            ("b.rs", 800, EditKind::Modified),
            ("c.rs", 300, EditKind::Modified),
        ]);
        let handler = char_handler(0);
        let pass = generate_full_patch(
            true,
            &index,
            3000,
            &names(&["a.rs", "b.rs", "c.rs", "missing.rs"]),
            &handler,
        );
        let included: Vec<&str> = pass.document.filenames().collect();
        assert_eq!(included, vec!["a.rs", "c.rs"]);
        assert_eq!(pass.remaining, names(&["b.rs"]));
        // Each section costs its patch plus the two separator newlines.
        assert_eq!(pass.document.total_tokens(), 1000 + 2 + 300 + 2);
    }

    #[test]
    fn test_full_patch_hard_stop_drops_files() {
        let index = index_of(&[
            ("a.rs", 10, EditKind::Modified),
            ("b.rs", 10, EditKind::Modified),
        ]);
        // Prompt overhead alone exceeds the hard budget.
        let handler = char_handler(2500);
        let pass = generate_full_patch(true, &index, 3000, &names(&["a.rs", "b.rs"]), &handler);
        assert!(pass.document.is_empty());
        assert!(pass.remaining.is_empty());
    }

    #[test]
    fn test_full_patch_plain_headers() {
        let index = index_of(&[("a.rs", 3, EditKind::Added)]);
        let handler = char_handler(0);
        let pass = generate_full_patch(false, &index, 10_000, &names(&["a.rs"]), &handler);
        assert_eq!(pass.document.render(), "\n\n## File: 'a.rs'\n\nxxx\n");
        assert_eq!(
            pass.document.total_tokens(),
            "\n\n## File: 'a.rs'\n\n".len() + 3
        );
    }

    #[test]
    fn test_compressed_diff_multi_pass() {
        // Twenty files of ~600 tokens each against a 3000 token model: two fit per document.
        let body = format!("@@ -1,1 +1,1 @@\n-old\n+{}", "n".repeat(580));
        let files: Vec<FileChange> = (0..20)
            .map(|i| make_file(&format!("f{:02}.rs", i), EditKind::Modified, &body).with_head("n"))
            .collect();
        let groups = single_group(files);
        let handler = char_handler(0);
        let plan = generate_compressed_diff(
            &groups,
            &handler,
            3000,
            &CompressOptions {
                convert_to_line_numbers: false,
                large_pr_handling: true,
                max_ai_calls: 3,
            },
        );
        assert_eq!(plan.documents.len(), 3);
        assert!(!plan.remaining_filenames.is_empty());
        for document in &plan.documents {
            assert!(!document.is_empty());
            assert!(document.total_tokens() <= 3000 - OUTPUT_BUFFER_TOKENS_HARD_THRESHOLD);
        }
        let packed: usize = plan.documents.iter().map(|d| d.sections().len()).sum();
        assert_eq!(packed + plan.remaining_filenames.len(), 20);
    }

    #[test]
    fn test_compressed_diff_single_pass_without_large_pr() {
        let body = format!("@@ -1,1 +1,1 @@\n-old\n+{}", "n".repeat(580));
        let files: Vec<FileChange> = (0..5)
            .map(|i| make_file(&format!("f{}.rs", i), EditKind::Modified, &body).with_head("n"))
            .collect();
        let groups = single_group(files);
        let handler = char_handler(0);
        let plan = generate_compressed_diff(
            &groups,
            &handler,
            3000,
            &CompressOptions {
                convert_to_line_numbers: false,
                large_pr_handling: false,
                max_ai_calls: 3,
            },
        );
        assert_eq!(plan.documents.len(), 1);
        assert_eq!(plan.remaining_filenames.len(), 3);
    }

    #[test]
    fn test_compressed_diff_collects_deleted_files() {
        let groups = single_group(vec![
            make_file("gone.rs", EditKind::Deleted, "@@ -1,1 +0,0 @@\n-a"),
            make_file("kept.rs", EditKind::Modified, "@@ -1,1 +1,1 @@\n-a\n+b").with_head("b"),
        ]);
        let handler = char_handler(0);
        let plan = generate_compressed_diff(
            &groups,
            &handler,
            10_000,
            &CompressOptions {
                convert_to_line_numbers: true,
                large_pr_handling: false,
                max_ai_calls: 1,
            },
        );
        assert_eq!(plan.deleted_filenames, names(&["gone.rs"]));
        assert!(plan.per_file_index.get("gone.rs").is_none());
        let entry = plan.per_file_index.get("kept.rs").unwrap();
        assert!(entry.patch.contains("__new hunk__"));
    }

    #[test]
    fn test_unprocessed_file_lists() {
        let mut index = index_of(&[
            ("big_added.rs", 2000, EditKind::Added),
            ("small.rs", 10, EditKind::Modified),
            ("big_mod.rs", 2000, EditKind::Modified),
            ("moved.rs", 2000, EditKind::Renamed),
        ]);
        index.insert(FileEntry {
            filename: "small.rs".to_string(),
            patch: "tiny".to_string(),
            tokens: 4,
            edit_kind: EditKind::Modified,
        });
        let handler = char_handler(0);
        let order = names(&["big_added.rs", "small.rs", "big_mod.rs", "moved.rs"]);
        let pass = generate_full_patch(true, &index, 3000, &order, &handler);
        let plan = ChunkPlan {
            documents: vec![pass.document],
            remaining_filenames: pass.remaining,
            deleted_filenames: names(&["gone.rs"]),
            per_file_index: index,
        };
        let diff = append_unprocessed_file_lists(&plan, &handler, 3000);
        assert_eq!(
            diff,
            "\n\ntiny\
             \n\nAdditional added files (insufficient token budget to process):\n\nbig_added.rs\
             \n\nAdditional modified files (insufficient token budget to process):\n\nbig_mod.rs\nmoved.rs\
             \n\nDeleted files:\n\ngone.rs"
        );
    }

    #[test]
    fn test_unprocessed_lists_clipped_when_budget_is_tight() {
        let index = index_of(&[
            ("in.rs", 1480, EditKind::Modified),
            ("out.rs", 900, EditKind::Added),
        ]);
        let handler = char_handler(0);
        let pass = generate_full_patch(true, &index, 3000, &names(&["in.rs", "out.rs"]), &handler);
        let plan = ChunkPlan {
            documents: vec![pass.document],
            remaining_filenames: pass.remaining,
            deleted_filenames: Vec::new(),
            per_file_index: index,
        };
        let diff = append_unprocessed_file_lists(&plan, &handler, 3000);
        // 2000 - 1482 leaves room for the whole list.
        assert!(diff.ends_with("\n\nout.rs"));

        // A prompt leaving no more than ten tokens suppresses the lists.
        let handler = char_handler(1990);
        let order = names(&["in.rs", "out.rs"]);
        let pass = generate_full_patch(true, &plan.per_file_index, 3000, &order, &handler);
        let plan = ChunkPlan {
            documents: vec![pass.document],
            remaining_filenames: pass.remaining,
            deleted_filenames: Vec::new(),
            per_file_index: plan.per_file_index,
        };
        assert_eq!(append_unprocessed_file_lists(&plan, &handler, 3000), "");
    }

    #[test]
    fn test_multi_diffs_split_and_clip() {
        let big = make_file("big.rs", EditKind::Modified, &format!("@@ -1,1 +1,1 @@\n-a\n+{}\n+tail", "b".repeat(3000)))
            .with_head("b");
        let small_a = make_file("a.rs", EditKind::Modified, &format!("@@ -1,1 +1,1 @@\n-a\n+{}", "a".repeat(900)))
            .with_head("a");
        let small_b = make_file("b.rs", EditKind::Modified, &format!("@@ -1,1 +1,1 @@\n-a\n+{}", "c".repeat(900)))
            .with_head("c");
        let groups = single_group(vec![big, small_a, small_b]);
        let handler = char_handler(0);
        let options = MultiDiffOptions {
            max_calls: 5,
            add_line_numbers: false,
            large_patch_policy: LargePatchPolicy::Clip,
            enable_ai_metadata: false,
        };
        let diffs = generate_multi_diffs(&groups, &handler, 3000, &options);
        // The clipped patch leaves room for a.rs; b.rs starts a second diff.
        assert_eq!(diffs.len(), 2);
        assert!(diffs[0].starts_with("\n\n## File: 'big.rs'\n\n@@ -1,1 +1,1 @@\n-a\n...(truncated)"));
        assert!(diffs[0].contains("## File: 'a.rs'"));
        assert!(!diffs[0].contains("+tail"));
        assert_eq!(diffs[1], format!("## File: 'b.rs'\n\n@@ -1,1 +1,1 @@\n-a\n+{}", "c".repeat(900)));

        let skip = MultiDiffOptions {
            large_patch_policy: LargePatchPolicy::Skip,
            max_calls: 1,
            ..options
        };
        let diffs = generate_multi_diffs(&groups, &handler, 3000, &skip);
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].contains("## File: 'a.rs'"));
        assert!(!diffs[0].contains("big.rs"));
    }
}
