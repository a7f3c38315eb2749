use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use super::{load_large_diff, DiffProvider, ProviderError};
use crate::language::language_for_filename;
use crate::models::{EditKind, FileChange, FileContent};

/// Changed files between two revisions of a local git repository.
pub struct GitSource {
    /// Working directory for git commands
    work_dir: Option<PathBuf>,
    base: String,
    head: String,
}

impl GitSource {
    pub fn new(base: impl Into<String>, head: impl Into<String>) -> Self {
        Self {
            work_dir: None,
            base: base.into(),
            head: head.into(),
        }
    }

    /// Parse a `base..head` range. A bare revision is compared with `HEAD`.
    pub fn from_range(range: &str) -> Self {
        match range.split_once("..") {
            Some((base, head)) if !head.is_empty() => Self::new(base, head),
            Some((base, _)) => Self::new(base, "HEAD"),
            None => Self::new(range, "HEAD"),
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(work_dir.as_ref().to_path_buf());
        self
    }

    fn run_git(&self, args: &[&str]) -> Result<Vec<u8>, ProviderError> {
        let mut cmd = Command::new("git");
        if let Some(ref dir) = self.work_dir {
            cmd.current_dir(dir);
        }
        cmd.args(args);

        let output = cmd.output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr
            )));
        }

        Ok(output.stdout)
    }

    fn run_git_text(&self, args: &[&str]) -> Result<String, ProviderError> {
        let output = self.run_git(args)?;
        Ok(String::from_utf8_lossy(&output).to_string())
    }

    fn read_blob(&self, rev: &str, path: &str) -> Result<FileContent, ProviderError> {
        let spec = format!("{}:{}", rev, path);
        Ok(FileContent::Bytes(self.run_git(&["show", &spec])?))
    }

    /// The file's patch, without the `diff --git` preamble.
    fn read_patch(&self, paths: &[&str]) -> Result<String, ProviderError> {
        let mut args = vec![
            "diff",
            "--no-color",
            "-M",
            self.base.as_str(),
            self.head.as_str(),
            "--",
        ];
        args.extend_from_slice(paths);
        let output = self.run_git_text(&args)?;
        Ok(strip_preamble(&output).to_string())
    }
}

/// Everything from the first hunk header on; empty when there is none.
fn strip_preamble(diff: &str) -> &str {
    if diff.starts_with("@@") {
        return diff;
    }
    match diff.find("\n@@") {
        Some(index) => &diff[index + 1..],
        None => "",
    }
}

/// One line of `git diff --name-status`.
fn parse_name_status(line: &str) -> Option<(EditKind, Option<&str>, &str)> {
    let mut fields = line.split('\t');
    let status = fields.next()?;
    let first = fields.next()?;
    match fields.next() {
        Some(second) => Some((EditKind::from_git_status(status), Some(first), second)),
        None => Some((EditKind::from_git_status(status), None, first)),
    }
}

/// Destination path of a `--numstat` entry; renames read `a/{x => y}/b` or `x => y`.
fn numstat_path(path: &str) -> String {
    let Some((before, after)) = path.split_once(" => ") else {
        return path.to_string();
    };
    match (before.rfind('{'), after.find('}')) {
        (Some(open), Some(close)) => {
            format!("{}{}{}", &before[..open], &after[..close], &after[close + 1..])
        }
        _ => after.to_string(),
    }
}

impl DiffProvider for GitSource {
    fn get_diff_files(&self) -> Result<Vec<FileChange>, ProviderError> {
        let listing = self.run_git_text(&["diff", "--name-status", "-M", &self.base, &self.head])?;

        let mut files = Vec::new();
        for line in listing.lines().filter(|line| !line.is_empty()) {
            let Some((edit_kind, old_path, path)) = parse_name_status(line) else {
                debug!("Skipping unexpected name-status line: {}", line);
                continue;
            };
            let base_path = old_path.unwrap_or(path);

            let mut file = FileChange::new(path, edit_kind);
            if let Some(old_path) = old_path {
                file = file.with_old_filename(old_path);
            }
            if edit_kind != EditKind::Added {
                file = file.with_base(self.read_blob(&self.base, base_path)?);
            }
            if edit_kind != EditKind::Deleted {
                file = file.with_head(self.read_blob(&self.head, path)?);
            }

            let paths: Vec<&str> = match old_path {
                Some(old_path) => vec![old_path, path],
                None => vec![path],
            };
            let patch = self.read_patch(&paths)?;
            let patch = if patch.is_empty() && edit_kind == EditKind::Modified {
                let new = file.head_content.as_ref().map(FileContent::decode).unwrap_or_default();
                let original = file.base_content.as_ref().map(FileContent::decode).unwrap_or_default();
                load_large_diff(path, &new, &original)
            } else {
                patch
            };
            if !patch.is_empty() {
                file = file.with_patch(patch);
            }

            debug!("Read {} ({})", file.filename, file.edit_kind);
            files.push(file);
        }
        Ok(files)
    }

    fn get_languages(&self) -> Result<HashMap<String, u64>, ProviderError> {
        let numstat = self.run_git_text(&["diff", "--numstat", "-M", &self.base, &self.head])?;

        let mut languages = HashMap::new();
        for line in numstat.lines() {
            let mut fields = line.splitn(3, '\t');
            let (Some(added), Some(removed), Some(path)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            // Binary files report "-" for both counts.
            let (Ok(added), Ok(removed)) = (added.parse::<u64>(), removed.parse::<u64>()) else {
                continue;
            };
            if let Some(language) = language_for_filename(&numstat_path(path)) {
                *languages.entry(language.to_string()).or_insert(0) += added + removed;
            }
        }
        Ok(languages)
    }
}
