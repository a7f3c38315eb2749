//! Grouping of changed files by programming language.
//!
//! Files of the repository's dominant languages come first so that, when the
//! budget runs out, the files left out are the less central ones.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::FileChange;

/// Name of the group collecting files of no main language.
pub const OTHER_LANGUAGE: &str = "Other";

/// Files that belong to one language.
#[derive(Debug, Clone, Serialize)]
pub struct LanguageGroup {
    pub language: String,
    pub files: Vec<FileChange>,
}

const LANGUAGE_EXTENSIONS: &[(&str, &[&str])] = &[
    ("rust", &[".rs"]),
    ("python", &[".py", ".pyi"]),
    ("javascript", &[".js", ".jsx", ".mjs", ".cjs"]),
    ("typescript", &[".ts", ".tsx"]),
    ("go", &[".go"]),
    ("java", &[".java"]),
    ("kotlin", &[".kt", ".kts"]),
    ("c", &[".c", ".h"]),
    ("c++", &[".cc", ".cpp", ".cxx", ".hpp", ".hh", ".hxx"]),
    ("c#", &[".cs"]),
    ("ruby", &[".rb"]),
    ("php", &[".php"]),
    ("swift", &[".swift"]),
    ("scala", &[".scala"]),
    ("shell", &[".sh", ".bash", ".zsh"]),
    ("html", &[".html", ".htm"]),
    ("css", &[".css", ".scss", ".sass", ".less"]),
    ("sql", &[".sql"]),
    ("yaml", &[".yml", ".yaml"]),
    ("toml", &[".toml"]),
    ("json", &[".json"]),
    ("markdown", &[".md"]),
];

/// Extensions of files that never carry a reviewable text diff.
const BAD_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".ico", ".webp", ".tiff", ".pdf", ".zip", ".gz",
    ".tar", ".tgz", ".bz2", ".xz", ".7z", ".rar", ".jar", ".war", ".class", ".exe", ".dll", ".so",
    ".dylib", ".a", ".o", ".obj", ".bin", ".dat", ".woff", ".woff2", ".ttf", ".otf", ".eot",
    ".mp3", ".mp4", ".wav", ".avi", ".mov", ".pyc", ".lock", ".svg",
];

/// The file's extension including the dot, taken after the last `.`.
fn extension(filename: &str) -> String {
    let last = filename.rsplit('.').next().unwrap_or(filename);
    format!(".{}", last.to_lowercase())
}

fn extensions_for(language: &str) -> &'static [&'static str] {
    let language = language.to_lowercase();
    LANGUAGE_EXTENSIONS
        .iter()
        .find(|(name, _)| *name == language)
        .map(|(_, extensions)| *extensions)
        .unwrap_or(&[])
}

/// Language a file belongs to, judged by its extension.
pub fn language_for_filename(filename: &str) -> Option<&'static str> {
    let ext = extension(filename);
    LANGUAGE_EXTENSIONS
        .iter()
        .find(|(_, extensions)| extensions.contains(&ext.as_str()))
        .map(|(name, _)| *name)
}

/// Whether a file should take part in diff processing at all.
pub fn is_valid_file(filename: &str) -> bool {
    !BAD_EXTENSIONS.contains(&extension(filename).as_str())
}

/// Group files by the repository's languages, largest language first.
///
/// `languages` maps a language name to its size in the repository. Files
/// with known binary extensions are dropped. Files of no listed language go
/// to a trailing [`OTHER_LANGUAGE`] group.
pub fn sort_files_by_main_languages(
    languages: &HashMap<String, u64>,
    files: Vec<FileChange>,
) -> Vec<LanguageGroup> {
    let files: Vec<FileChange> = files
        .into_iter()
        .filter(|file| is_valid_file(&file.filename))
        .collect();

    if languages.is_empty() {
        return vec![LanguageGroup {
            language: OTHER_LANGUAGE.to_string(),
            files,
        }];
    }

    let mut ranked: Vec<(&String, &u64)> = languages.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let mut groups: Vec<LanguageGroup> = ranked
        .iter()
        .map(|(language, _)| LanguageGroup {
            language: language.to_string(),
            files: Vec::new(),
        })
        .collect();
    let mut rest = Vec::new();

    for mut file in files {
        let ext = extension(&file.filename);
        let slot = ranked
            .iter()
            .position(|(language, _)| extensions_for(language).contains(&ext.as_str()));
        match slot {
            Some(index) => {
                file.language = Some(groups[index].language.clone());
                groups[index].files.push(file);
            }
            None => rest.push(file),
        }
    }

    groups.retain(|group| !group.files.is_empty());
    groups.push(LanguageGroup {
        language: OTHER_LANGUAGE.to_string(),
        files: rest,
    });
    groups
}
