use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{load_large_diff, DiffProvider, ProviderError};
use crate::models::{EditKind, FileChange, FileContent};

/// A change set described as JSON, with file versions stored on disk.
///
/// ```json
/// {
///   "files": [
///     {"filename": "src/lib.rs", "edit_kind": "modified",
///      "base": "base/lib.rs", "head": "head/lib.rs", "patch": "lib.patch"}
///   ],
///   "languages": {"rust": 1200}
/// }
/// ```
///
/// Paths are relative to the manifest's directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub files: Vec<ManifestEntry>,
    #[serde(default)]
    pub languages: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    #[serde(default)]
    pub edit_kind: EditKind,
    #[serde(default)]
    pub old_filename: Option<String>,
    /// Path of the file before the change.
    #[serde(default)]
    pub base: Option<PathBuf>,
    /// Path of the file after the change.
    #[serde(default)]
    pub head: Option<PathBuf>,
    /// Path of the unified diff for this file.
    #[serde(default)]
    pub patch: Option<PathBuf>,
    #[serde(default)]
    pub ai_summary: Option<String>,
}

/// Reads the files listed in a [`Manifest`].
pub struct ManifestSource {
    manifest: Manifest,
    base_dir: PathBuf,
}

impl ManifestSource {
    pub fn new(manifest: Manifest, base_dir: impl AsRef<Path>) -> Self {
        Self {
            manifest,
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// Load a manifest file; its entries resolve relative to its directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Manifest(format!("{}: {}", path.display(), e)))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self::new(manifest, base_dir))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, ProviderError> {
        let full = self.base_dir.join(path);
        fs::read(&full).map_err(|e| {
            ProviderError::Manifest(format!("cannot read {}: {}", full.display(), e))
        })
    }

    fn load_entry(&self, entry: &ManifestEntry) -> Result<FileChange, ProviderError> {
        let mut file = FileChange::new(entry.filename.as_str(), entry.edit_kind);
        if let Some(old_filename) = &entry.old_filename {
            file = file.with_old_filename(old_filename.as_str());
        }
        if let Some(path) = &entry.base {
            file = file.with_base(self.read(path)?);
        }
        if let Some(path) = &entry.head {
            file = file.with_head(self.read(path)?);
        }
        if let Some(summary) = &entry.ai_summary {
            file = file.with_ai_summary(summary.as_str());
        }

        let patch = match &entry.patch {
            Some(path) => FileContent::Bytes(self.read(path)?).decode().into_owned(),
            None if entry.edit_kind != EditKind::Modified => String::new(),
            None => {
                let new = file.head_content.as_ref().map(FileContent::decode).unwrap_or_default();
                let original = file.base_content.as_ref().map(FileContent::decode).unwrap_or_default();
                load_large_diff(&entry.filename, &new, &original)
            }
        };
        if !patch.is_empty() {
            file = file.with_patch(patch);
        }
        Ok(file)
    }
}

impl DiffProvider for ManifestSource {
    fn get_diff_files(&self) -> Result<Vec<FileChange>, ProviderError> {
        self.manifest
            .files
            .iter()
            .map(|entry| self.load_entry(entry))
            .collect()
    }

    fn get_languages(&self) -> Result<HashMap<String, u64>, ProviderError> {
        Ok(self.manifest.languages.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &[u8]) {
        fs::write(dir.path().join(name), content).unwrap();
    }

    #[test]
    fn test_reads_manifest_entries() {
        let dir = TempDir::new().unwrap();
        write(&dir, "base.rs", b"fn a() {}\n");
        write(&dir, "head.rs", b"fn b() {}\n");
        write(&dir, "lib.patch", b"@@ -1 +1 @@\n-fn a() {}\n+fn b() {}\n");
        write(
            &dir,
            "manifest.json",
            br#"{
                "files": [
                    {"filename": "src/lib.rs", "edit_kind": "modified",
                     "base": "base.rs", "head": "head.rs", "patch": "lib.patch",
                     "ai_summary": "Renames a"}
                ],
                "languages": {"rust": 10}
            }"#,
        );

        let source = ManifestSource::from_file(dir.path().join("manifest.json")).unwrap();
        let files = source.get_diff_files().unwrap();
        assert_eq!(files.len(), 1);
        let file = &files[0];
        assert_eq!(file.filename, "src/lib.rs");
        assert_eq!(file.edit_kind, EditKind::Modified);
        assert_eq!(file.patch_text(), Some("@@ -1 +1 @@\n-fn a() {}\n+fn b() {}\n"));
        assert_eq!((file.plus_lines, file.minus_lines), (1, 1));
        assert_eq!(file.ai_summary.as_deref(), Some("Renames a"));
        assert_eq!(source.get_languages().unwrap().get("rust"), Some(&10));
    }

    #[test]
    fn test_synthesizes_missing_patch() {
        let dir = TempDir::new().unwrap();
        write(&dir, "old.txt", b"hello\n");
        write(&dir, "new.txt", b"hello\nworld\n");
        let manifest = Manifest {
            files: vec![ManifestEntry {
                filename: "notes.txt".to_string(),
                edit_kind: EditKind::Modified,
                base: Some(PathBuf::from("old.txt")),
                head: Some(PathBuf::from("new.txt")),
                ..ManifestEntry::default()
            }],
            languages: HashMap::new(),
        };
        let source = ManifestSource::new(manifest, dir.path());
        let files = source.get_diff_files().unwrap();
        assert_eq!(files[0].patch_text(), Some("@@ -1 +1,2 @@\n hello\n+world\n"));
        assert_eq!((files[0].plus_lines, files[0].minus_lines), (1, 0));
    }

    #[test]
    fn test_only_modified_files_get_synthesized_patches() {
        let dir = TempDir::new().unwrap();
        write(&dir, "new.txt", b"hello\n");
        let manifest = Manifest {
            files: vec![ManifestEntry {
                filename: "new.txt".to_string(),
                edit_kind: EditKind::Added,
                head: Some(PathBuf::from("new.txt")),
                ..ManifestEntry::default()
            }],
            languages: HashMap::new(),
        };
        let source = ManifestSource::new(manifest, dir.path());
        let files = source.get_diff_files().unwrap();
        assert_eq!(files[0].patch_text(), None);
        assert_eq!(files[0].plus_lines, 0);
    }

    #[test]
    fn test_missing_file_is_manifest_error() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest {
            files: vec![ManifestEntry {
                filename: "gone.rs".to_string(),
                base: Some(PathBuf::from("nope.rs")),
                ..ManifestEntry::default()
            }],
            languages: HashMap::new(),
        };
        let source = ManifestSource::new(manifest, dir.path());
        assert!(matches!(
            source.get_diff_files(),
            Err(ProviderError::Manifest(_))
        ));
    }

    #[test]
    fn test_invalid_json() {
        let dir = TempDir::new().unwrap();
        write(&dir, "manifest.json", b"{not json");
        assert!(matches!(
            ManifestSource::from_file(dir.path().join("manifest.json")),
            Err(ProviderError::Manifest(_))
        ));
    }
}
